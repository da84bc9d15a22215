//! Active liveness detection via blink counting.
//!
//! A printed photograph or a frozen frame keeps the eye aspect ratio (EAR)
//! constant. A live subject who is asked to blink produces closed→open
//! transitions that drive the EAR below and back above a threshold.
//!
//! Each tracked identity owns a [`BlinkGate`]. The gate consumes one averaged
//! EAR sample per frame until the required number of blinks has been seen,
//! after which it is terminally [`BlinkGate::Verified`] for the rest of the
//! tracking run and further samples are ignored.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs, static images on a screen.
//! - **Does not block:** Video replay of a blinking subject, or a person
//!   holding a photo who blinks near it (landmark pairing is box-based).

use crate::types::{EyeContour, FaceLandmarks};
use serde::Serialize;

/// Default EAR below which the eye is considered shut.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.22;

/// Default number of closed→open transitions needed to pass.
pub const DEFAULT_REQUIRED_BLINKS: u32 = 3;

/// Blink gate tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlinkConfig {
    pub ear_threshold: f32,
    pub required_blinks: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            required_blinks: DEFAULT_REQUIRED_BLINKS,
        }
    }
}

/// Eye aspect ratio of a six-point eye contour.
///
/// EAR = (‖p2−p6‖ + ‖p3−p5‖) / (2·‖p1−p4‖). Returns `None` when the
/// horizontal span collapses to zero.
pub fn eye_aspect_ratio(eye: &EyeContour) -> Option<f32> {
    let vertical_a = dist(eye[1], eye[5]);
    let vertical_b = dist(eye[2], eye[4]);
    let horizontal = dist(eye[0], eye[3]);
    if horizontal <= f32::EPSILON {
        return None;
    }
    Some((vertical_a + vertical_b) / (2.0 * horizontal))
}

/// Mean of the left and right eye aspect ratios.
pub fn average_ear(landmarks: &FaceLandmarks) -> Option<f32> {
    let left = eye_aspect_ratio(&landmarks.left_eye())?;
    let right = eye_aspect_ratio(&landmarks.right_eye())?;
    Some((left + right) / 2.0)
}

fn dist(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Per-identity blink state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BlinkGate {
    Unverified { blinks: u32, eye_closed: bool },
    Verified { blinks: u32 },
}

/// What a single EAR sample did to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    /// Gate already verified; sample ignored.
    Ignored,
    /// Eye shut (or still shut); no count yet.
    Closed,
    /// Eye open with no pending closure.
    Open,
    /// A closed→open transition was counted.
    Blink { blinks: u32 },
    /// This sample completed verification.
    Verified { blinks: u32 },
}

impl Default for BlinkGate {
    fn default() -> Self {
        Self::Unverified {
            blinks: 0,
            eye_closed: false,
        }
    }
}

impl BlinkGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }

    pub fn blinks(&self) -> u32 {
        match *self {
            Self::Unverified { blinks, .. } | Self::Verified { blinks } => blinks,
        }
    }

    /// Feed one averaged EAR sample.
    pub fn observe(&mut self, ear: f32, config: &BlinkConfig) -> GateStep {
        let Self::Unverified { blinks, eye_closed } = *self else {
            return GateStep::Ignored;
        };

        let (blinks, eye_closed, step) = if ear < config.ear_threshold {
            (blinks, true, GateStep::Closed)
        } else if eye_closed {
            (blinks + 1, false, GateStep::Blink { blinks: blinks + 1 })
        } else {
            (blinks, false, GateStep::Open)
        };

        if blinks >= config.required_blinks {
            *self = Self::Verified { blinks };
            return GateStep::Verified { blinks };
        }

        *self = Self::Unverified { blinks, eye_closed };
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Eye contour with unit-ish width and the given vertical opening.
    fn eye(opening: f32) -> EyeContour {
        [
            (0.0, 0.0),
            (1.0, -opening / 2.0),
            (2.0, -opening / 2.0),
            (3.0, 0.0),
            (2.0, opening / 2.0),
            (1.0, opening / 2.0),
        ]
    }

    fn run(samples: &[f32]) -> BlinkGate {
        let mut gate = BlinkGate::new();
        let cfg = BlinkConfig::default();
        for &ear in samples {
            gate.observe(ear, &cfg);
        }
        gate
    }

    #[test]
    fn test_ear_known_geometry() {
        // vertical = 1.2 twice, horizontal = 3.0 → 2.4 / 6.0 = 0.4
        let ear = eye_aspect_ratio(&eye(1.2)).unwrap();
        assert!((ear - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_ear_degenerate_eye() {
        assert!(eye_aspect_ratio(&[(1.0, 1.0); 6]).is_none());
    }

    #[test]
    fn test_average_ear_from_68_points() {
        let mut points = vec![(0.0, 0.0); 68];
        points[36..42].copy_from_slice(&eye(1.2));
        points[42..48].copy_from_slice(&eye(0.6));
        let lm = FaceLandmarks::from_points(points).unwrap();
        // (0.4 + 0.2) / 2
        assert!((average_ear(&lm).unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_three_blinks_verify() {
        let gate = run(&[0.30, 0.15, 0.30, 0.15, 0.30, 0.15, 0.30]);
        assert_eq!(gate, BlinkGate::Verified { blinks: 3 });
        assert!(gate.is_verified());
        assert_eq!(gate.blinks(), 3);
    }

    #[test]
    fn test_two_blinks_stay_unverified() {
        let gate = run(&[0.30, 0.15, 0.30, 0.15, 0.30, 0.15]);
        assert!(!gate.is_verified());
        assert_eq!(
            gate,
            BlinkGate::Unverified {
                blinks: 2,
                eye_closed: true
            }
        );
    }

    #[test]
    fn test_held_closure_counts_once() {
        let gate = run(&[0.10, 0.10, 0.10, 0.30, 0.30, 0.30]);
        assert_eq!(gate.blinks(), 1);
    }

    #[test]
    fn test_static_face_never_verifies() {
        let gate = run(&[0.30; 200]);
        assert_eq!(gate.blinks(), 0);
        assert!(!gate.is_verified());

        let gate = run(&[0.10; 200]);
        assert_eq!(gate.blinks(), 0);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Exactly at threshold counts as open.
        let gate = run(&[0.22, 0.22]);
        assert_eq!(
            gate,
            BlinkGate::Unverified {
                blinks: 0,
                eye_closed: false
            }
        );
    }

    #[test]
    fn test_verified_is_terminal() {
        let mut gate = run(&[0.1, 0.3, 0.1, 0.3, 0.1, 0.3]);
        let cfg = BlinkConfig::default();
        assert_eq!(gate.observe(0.1, &cfg), GateStep::Ignored);
        assert_eq!(gate.observe(0.3, &cfg), GateStep::Ignored);
        assert_eq!(gate, BlinkGate::Verified { blinks: 3 });
    }

    #[test]
    fn test_step_reporting() {
        let mut gate = BlinkGate::new();
        let cfg = BlinkConfig {
            ear_threshold: 0.22,
            required_blinks: 2,
        };
        assert_eq!(gate.observe(0.3, &cfg), GateStep::Open);
        assert_eq!(gate.observe(0.1, &cfg), GateStep::Closed);
        assert_eq!(gate.observe(0.3, &cfg), GateStep::Blink { blinks: 1 });
        assert_eq!(gate.observe(0.1, &cfg), GateStep::Closed);
        assert_eq!(gate.observe(0.3, &cfg), GateStep::Verified { blinks: 2 });
    }
}
