//! Contracts of the external frame source and biometric pipeline.
//!
//! Frame capture, face detection, embedding extraction and landmark
//! extraction are black boxes. The core only sees their outputs, gathered
//! into one [`FrameObservation`] per frame.

use crate::types::{BoundingBox, Embedding, FaceLandmarks, LandmarkSet, Probe};
use thiserror::Error;

/// Lazy, non-restartable sequence of raw frames.
pub trait FrameSource {
    type Frame;
    type Error: std::error::Error + Send + Sync + 'static;

    /// `Ok(Some)` for a frame, `Ok(None)` once the stream has ended, `Err`
    /// for a transient capture failure (the tick is skipped).
    fn next_frame(&mut self) -> Result<Option<Self::Frame>, Self::Error>;
}

/// External detection / embedding / landmark pipeline over frames of type `F`.
pub trait FacePipeline<F> {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Face regions used for embedding extraction.
    fn detect_faces(&mut self, frame: &F) -> Result<Vec<BoundingBox>, Self::Error>;

    /// One embedding per box, in the same order.
    fn embed(&mut self, frame: &F, boxes: &[BoundingBox]) -> Result<Vec<Embedding>, Self::Error>;

    /// Face regions used for landmark extraction. These may come from a
    /// different detector than [`FacePipeline::detect_faces`].
    fn landmark_regions(&mut self, frame: &F) -> Result<Vec<BoundingBox>, Self::Error> {
        self.detect_faces(frame)
    }

    /// 68-point landmarks for one region; `None` if extraction failed.
    fn landmarks(&mut self, frame: &F, bbox: &BoundingBox) -> Option<FaceLandmarks>;
}

#[derive(Error, Debug)]
pub enum ObserveError<E: std::error::Error + 'static> {
    #[error("face pipeline error: {0}")]
    Pipeline(#[source] E),
    #[error("pipeline returned {embeddings} embeddings for {boxes} boxes")]
    Misaligned { boxes: usize, embeddings: usize },
}

/// Everything the decision layer needs from one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameObservation {
    pub probes: Vec<Probe>,
    pub landmarks: Vec<LandmarkSet>,
}

/// Run the external pipeline over one frame.
///
/// Landmark extraction failures are dropped silently; detection/embedding
/// failures and box/embedding count mismatches fail the whole frame.
pub fn observe<F, P>(
    pipeline: &mut P,
    frame: &F,
) -> Result<FrameObservation, ObserveError<P::Error>>
where
    P: FacePipeline<F>,
{
    let boxes = pipeline.detect_faces(frame).map_err(ObserveError::Pipeline)?;
    let embeddings = pipeline
        .embed(frame, &boxes)
        .map_err(ObserveError::Pipeline)?;
    if embeddings.len() != boxes.len() {
        return Err(ObserveError::Misaligned {
            boxes: boxes.len(),
            embeddings: embeddings.len(),
        });
    }

    let probes = boxes
        .into_iter()
        .zip(embeddings)
        .map(|(bbox, embedding)| Probe { embedding, bbox })
        .collect();

    let regions = pipeline
        .landmark_regions(frame)
        .map_err(ObserveError::Pipeline)?;
    let landmarks = regions
        .into_iter()
        .filter_map(|bbox| {
            pipeline
                .landmarks(frame, &bbox)
                .map(|landmarks| LandmarkSet { bbox, landmarks })
        })
        .collect();

    Ok(FrameObservation { probes, landmarks })
}
