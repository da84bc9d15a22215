//! rollcall-core: attendance decision layer.
//!
//! Matches face embeddings against a gallery of known identities, gates each
//! identity behind a blink-based liveness check, and commits attendance at
//! most once per dedup window. Frame capture and the biometric models are
//! external; see [`source`].

pub mod gallery;
pub mod liveness;
pub mod matcher;
pub mod memory;
pub mod pairing;
pub mod pipeline;
pub mod recorder;
pub mod session;
pub mod source;
pub mod types;

pub use gallery::{Gallery, GalleryError, KnownIdentity};
pub use liveness::{BlinkConfig, BlinkGate};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher};
pub use pipeline::{DecisionParams, FaceOutcome, FrameProcessor, FrameReport};
pub use recorder::{
    AttendanceRecorder, AttendanceStore, AttendanceSummary, ProfileStore, RecordOutcome,
    RecorderError,
};
pub use session::{LivenessState, SessionTracker};
pub use source::{FacePipeline, FrameObservation, FrameSource};
pub use types::{
    AttendanceRecord, BoundingBox, Embedding, FaceLandmarks, IdentityProfile, LandmarkSet, Probe,
};
