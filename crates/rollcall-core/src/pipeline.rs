//! Per-frame decision logic: match → track → liveness → attendance.

use crate::liveness::{self, BlinkConfig, GateStep};
use crate::matcher::{Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::pairing::nearest_landmarks;
use crate::recorder::{
    AttendanceRecorder, AttendanceStore, ProfileStore, RecordOutcome, DEFAULT_DEDUP_WINDOW_SECS,
};
use crate::session::{LivenessState, SessionTracker};
use crate::source::FrameObservation;
use crate::types::Probe;
use chrono::{Duration, NaiveDateTime};

/// Tunables of the decision layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionParams {
    /// Maximum Euclidean distance for a positive match (exclusive).
    pub match_threshold: f32,
    pub blink: BlinkConfig,
    /// Minimum spacing between two attendance records per identity.
    pub dedup_window: Duration,
}

impl Default for DecisionParams {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            blink: BlinkConfig::default(),
            dedup_window: Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
        }
    }
}

/// What happened to one detected face in one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    /// Nearest gallery entry was not close enough.
    Unknown { distance: f32 },
    /// Matched, but no usable landmarks this frame; blink state unchanged.
    NoLandmarks { identity_id: String },
    /// Matched and still collecting blinks.
    Blinking { identity_id: String, blinks: u32 },
    /// Matched, verified, attendance already handled earlier in the run.
    Verified { identity_id: String },
    /// Matched and verified; the recorder was consulted this frame.
    Attendance {
        identity_id: String,
        outcome: RecordOutcome,
    },
    /// Matched and verified, but the record store failed.
    AttendanceFailed { identity_id: String, error: String },
}

/// Outcomes for every face in one frame, in detection order.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub outcomes: Vec<FaceOutcome>,
}

/// Owns the per-run decision state and runs it over frame observations.
///
/// Single-threaded: every session mutation goes through [`FrameProcessor::process`].
pub struct FrameProcessor<M, S, P> {
    matcher: M,
    tracker: SessionTracker,
    recorder: AttendanceRecorder<S>,
    profiles: P,
    params: DecisionParams,
    frames_processed: u64,
}

impl<M, S, P> FrameProcessor<M, S, P>
where
    M: Matcher,
    S: AttendanceStore,
    P: ProfileStore,
{
    pub fn new(matcher: M, attendance: S, profiles: P, params: DecisionParams) -> Self {
        Self {
            matcher,
            tracker: SessionTracker::new(),
            recorder: AttendanceRecorder::new(attendance, params.dedup_window),
            profiles,
            params,
            frames_processed: 0,
        }
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn recorder(&self) -> &AttendanceRecorder<S> {
        &self.recorder
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn session(&self, identity_id: &str) -> Option<&LivenessState> {
        self.tracker.get(identity_id)
    }

    /// Start a new tracking run: all liveness sessions are dropped.
    pub fn restart(&mut self) {
        self.tracker.reset();
    }

    /// Process one frame's observation at wall-clock time `now`.
    pub fn process(&mut self, observation: &FrameObservation, now: NaiveDateTime) -> FrameReport {
        self.frames_processed += 1;
        let outcomes = observation
            .probes
            .iter()
            .map(|probe| self.process_face(probe, observation, now))
            .collect();
        FrameReport { outcomes }
    }

    fn process_face(
        &mut self,
        probe: &Probe,
        observation: &FrameObservation,
        now: NaiveDateTime,
    ) -> FaceOutcome {
        let result = self
            .matcher
            .find(&probe.embedding, self.params.match_threshold);
        let Some(identity_id) = result.identity_id else {
            tracing::debug!(distance = result.distance, "unknown face");
            return FaceOutcome::Unknown {
                distance: result.distance,
            };
        };

        let state = self.tracker.get_or_create(&identity_id);
        state.frames_matched += 1;

        if !state.is_verified() {
            let ear = nearest_landmarks(&probe.bbox, &observation.landmarks)
                .and_then(|set| liveness::average_ear(&set.landmarks));
            let Some(ear) = ear else {
                return FaceOutcome::NoLandmarks { identity_id };
            };

            match state.gate.observe(ear, &self.params.blink) {
                GateStep::Verified { blinks } => {
                    tracing::info!(identity_id = %identity_id, blinks, "liveness verified");
                }
                step => {
                    tracing::debug!(identity_id = %identity_id, ear, ?step, "blink sample");
                    return FaceOutcome::Blinking {
                        blinks: state.gate.blinks(),
                        identity_id,
                    };
                }
            }
        }

        if !state.claim_attendance() {
            return FaceOutcome::Verified { identity_id };
        }

        let profile = match self.profiles.lookup(&identity_id) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(identity_id = %identity_id, error = %e, "profile lookup failed");
                None
            }
        };

        match self.recorder.record(&identity_id, profile.as_ref(), now) {
            Ok(outcome) => FaceOutcome::Attendance {
                identity_id,
                outcome,
            },
            Err(e) => {
                tracing::error!(identity_id = %identity_id, error = %e, "attendance write failed");
                FaceOutcome::AttendanceFailed {
                    identity_id,
                    error: e.to_string(),
                }
            }
        }
    }
}
