use crate::photos::PhotoLocator;
use chrono::NaiveDateTime;
use rollcall_core::source::{observe, FacePipeline, FrameSource};
use rollcall_core::{
    AttendanceStore, FaceOutcome, FrameProcessor, FrameReport, LivenessState, Matcher,
    ProfileStore, RecordOutcome,
};
use serde::Serialize;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the running engine, serialized for `Status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub run_id: String,
    pub gallery_size: usize,
    pub sessions: usize,
    pub verified: usize,
    pub attendance_committed: u64,
    pub photos_shown: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub feed_ended: bool,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Session {
        identity_id: String,
        reply: oneshot::Sender<Option<LivenessState>>,
    },
    Shutdown {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Liveness state of `identity_id` in the current run, if it has been seen.
    pub async fn session(
        &self,
        identity_id: &str,
    ) -> Result<Option<LivenessState>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Session {
                identity_id: identity_id.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Stop the frame loop; returns the final status.
    pub async fn shutdown(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Shutdown { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// The frame loop: pulls frames from the feed, runs them through the
/// decision layer and answers requests between ticks.
pub struct Engine<F, M, S, P> {
    feed: F,
    processor: FrameProcessor<M, S, P>,
    photos: PhotoLocator,
    tick: Duration,
    run_id: uuid::Uuid,
    frames_skipped: u64,
    attendance_committed: u64,
    photos_shown: u64,
    feed_ended: bool,
}

impl<F, M, S, P> Engine<F, M, S, P>
where
    F: FrameSource + FacePipeline<<F as FrameSource>::Frame>,
    M: Matcher,
    S: AttendanceStore,
    P: ProfileStore,
{
    pub fn new(
        feed: F,
        processor: FrameProcessor<M, S, P>,
        photos: PhotoLocator,
        tick: Duration,
    ) -> Self {
        Self {
            feed,
            processor,
            photos,
            tick,
            run_id: uuid::Uuid::new_v4(),
            frames_skipped: 0,
            attendance_committed: 0,
            photos_shown: 0,
            feed_ended: false,
        }
    }

    pub fn status(&self) -> EngineStatus {
        let tracker = self.processor.tracker();
        EngineStatus {
            run_id: self.run_id.to_string(),
            gallery_size: self.processor.matcher().len(),
            sessions: tracker.len(),
            verified: tracker.verified_count(),
            attendance_committed: self.attendance_committed,
            photos_shown: self.photos_shown,
            frames_processed: self.processor.frames_processed(),
            frames_skipped: self.frames_skipped,
            feed_ended: self.feed_ended,
        }
    }

    pub fn feed_ended(&self) -> bool {
        self.feed_ended
    }

    /// Pull and process one frame at wall-clock time `now`.
    ///
    /// Returns `None` when no frame was processed (end of feed, transient
    /// capture failure, or pipeline error).
    pub fn tick_at(&mut self, now: NaiveDateTime) -> Option<FrameReport> {
        if self.feed_ended {
            return None;
        }

        let frame = match self.feed.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.feed_ended = true;
                tracing::info!(
                    frames = self.processor.frames_processed(),
                    skipped = self.frames_skipped,
                    "frame feed ended"
                );
                return None;
            }
            Err(e) => {
                self.frames_skipped += 1;
                tracing::warn!(error = %e, "frame capture failed, skipping tick");
                return None;
            }
        };

        let observation = match observe(&mut self.feed, &frame) {
            Ok(obs) => obs,
            Err(e) => {
                self.frames_skipped += 1;
                tracing::warn!(error = %e, "face pipeline failed, skipping frame");
                return None;
            }
        };

        let report = self.processor.process(&observation, now);
        for outcome in &report.outcomes {
            self.note_outcome(outcome);
        }
        Some(report)
    }

    fn note_outcome(&mut self, outcome: &FaceOutcome) {
        let FaceOutcome::Attendance {
            identity_id,
            outcome,
        } = outcome
        else {
            tracing::debug!(outcome = ?outcome, "face outcome");
            return;
        };

        if let RecordOutcome::Committed(record) = outcome {
            self.attendance_committed += 1;
            tracing::info!(
                identity_id = %identity_id,
                name = %record.name,
                "attendance marked"
            );
        }
        self.show_photo(identity_id);
    }

    /// Every attendance call, committed or not, is followed by a photo lookup.
    fn show_photo(&mut self, identity_id: &str) {
        match self.photos.find(identity_id) {
            Some(photo) => {
                self.photos_shown += 1;
                tracing::info!(identity_id, photo = %photo.display(), "showing identity photo");
            }
            None => tracing::debug!(
                identity_id,
                dir = %self.photos.dir().display(),
                "no photo on file"
            ),
        }
    }

    fn handle(&mut self, req: EngineRequest) -> ControlFlow<()> {
        match req {
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
            EngineRequest::Session { identity_id, reply } => {
                let _ = reply.send(self.processor.session(identity_id.trim()).cloned());
            }
            EngineRequest::Shutdown { reply } => {
                let _ = reply.send(self.status());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Run until shutdown is requested or every handle is dropped.
    fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        let _span = tracing::info_span!("engine", run_id = %self.run_id).entered();
        tracing::info!("engine thread started");
        loop {
            if self.feed_ended() {
                // Nothing left to process; serve requests only.
                let Some(req) = rx.blocking_recv() else { break };
                if self.handle(req).is_break() {
                    break;
                }
                continue;
            }

            let started = Instant::now();
            self.tick_at(chrono::Local::now().naive_local());

            let mut stop = false;
            loop {
                match rx.try_recv() {
                    Ok(req) => {
                        if self.handle(req).is_break() {
                            stop = true;
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        stop = true;
                        break;
                    }
                }
            }
            if stop {
                break;
            }

            if let Some(remaining) = self.tick.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
        tracing::info!(
            run_id = %self.run_id,
            frames = self.processor.frames_processed(),
            committed = self.attendance_committed,
            "engine thread exiting"
        );
    }
}

/// Spawn the engine on a dedicated OS thread.
pub fn spawn_engine<F, M, S, P>(engine: Engine<F, M, S, P>) -> Result<EngineHandle, EngineError>
where
    F: FrameSource + FacePipeline<<F as FrameSource>::Frame> + Send + 'static,
    M: Matcher + Send + 'static,
    S: AttendanceStore + Send + 'static,
    P: ProfileStore + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || engine.run(rx))
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
