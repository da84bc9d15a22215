//! Per-frame association of recognized faces with landmark sets.
//!
//! Embedding boxes and landmark boxes come from two different detectors, so
//! each face box is paired with the landmark set whose box center is nearest
//! (Manhattan distance). Pairing is recomputed every frame; nothing persists.

use crate::types::{BoundingBox, LandmarkSet};

/// Return the landmark set nearest to `face`, or `None` if there are none.
///
/// On equal distance the earlier landmark set wins.
pub fn nearest_landmarks<'a>(
    face: &BoundingBox,
    candidates: &'a [LandmarkSet],
) -> Option<&'a LandmarkSet> {
    let mut best: Option<(&LandmarkSet, i64)> = None;
    for set in candidates {
        let d = face.center_distance(&set.bbox);
        match best {
            Some((_, best_d)) if best_d <= d => {}
            _ => best = Some((set, d)),
        }
    }
    best.map(|(set, _)| set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FaceLandmarks;

    fn set(bbox: BoundingBox, tag: f32) -> LandmarkSet {
        LandmarkSet {
            bbox,
            landmarks: FaceLandmarks::from_points(vec![(tag, tag); 68]).unwrap(),
        }
    }

    #[test]
    fn test_empty_candidates() {
        let face = BoundingBox::new(0, 10, 10, 0);
        assert!(nearest_landmarks(&face, &[]).is_none());
    }

    #[test]
    fn test_picks_nearest_center() {
        let face = BoundingBox::new(100, 300, 200, 200);
        let sets = vec![
            set(BoundingBox::new(0, 100, 100, 0), 1.0),
            set(BoundingBox::new(110, 310, 210, 210), 2.0),
            set(BoundingBox::new(400, 600, 500, 500), 3.0),
        ];
        let best = nearest_landmarks(&face, &sets).unwrap();
        assert_eq!(best.landmarks.points()[0], (2.0, 2.0));
    }

    #[test]
    fn test_single_candidate_always_paired() {
        // Far away but the only option.
        let face = BoundingBox::new(0, 10, 10, 0);
        let sets = vec![set(BoundingBox::new(900, 1000, 1000, 900), 7.0)];
        assert!(nearest_landmarks(&face, &sets).is_some());
    }

    #[test]
    fn test_tie_keeps_first() {
        let face = BoundingBox::new(100, 200, 200, 100);
        let sets = vec![
            set(BoundingBox::new(100, 210, 200, 110), 1.0),
            set(BoundingBox::new(100, 190, 200, 90), 2.0),
        ];
        let best = nearest_landmarks(&face, &sets).unwrap();
        assert_eq!(best.landmarks.points()[0], (1.0, 1.0));
    }

    #[test]
    fn test_extreme_coordinates_pair_without_overflow() {
        let face = BoundingBox::new(0, i32::MAX, 10, i32::MAX - 10);
        let sets = vec![
            set(BoundingBox::new(i32::MIN, i32::MIN + 10, i32::MIN + 10, i32::MIN), 1.0),
            set(BoundingBox::new(0, i32::MAX, 10, i32::MAX - 20), 2.0),
        ];
        let best = nearest_landmarks(&face, &sets).unwrap();
        assert_eq!(best.landmarks.points()[0], (2.0, 2.0));
    }
}
