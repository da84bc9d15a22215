use crate::gallery::Gallery;
use crate::types::Embedding;

/// Default maximum Euclidean distance for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched identity, or `None` for an unknown face.
    pub identity_id: Option<String>,
    /// Distance to the nearest gallery entry (`f32::INFINITY` if nothing was comparable).
    pub distance: f32,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        self.identity_id.is_some()
    }
}

/// Nearest-neighbour lookup of a probe against a gallery owned by the matcher.
///
/// Callers only see this trait, so an approximate index can replace the
/// linear scan without touching the frame pipeline.
pub trait Matcher {
    fn find(&self, probe: &Embedding, threshold: f32) -> MatchResult;

    /// Number of identities searchable by this matcher.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exhaustive Euclidean matcher, O(N·D) per probe.
pub struct EuclideanMatcher {
    gallery: Gallery,
}

impl EuclideanMatcher {
    pub fn new(gallery: Gallery) -> Self {
        Self { gallery }
    }
}

impl Matcher for EuclideanMatcher {
    fn find(&self, probe: &Embedding, threshold: f32) -> MatchResult {
        if probe.dim() != self.gallery.dim() || !probe.is_finite() {
            tracing::debug!(
                probe_dim = probe.dim(),
                gallery_dim = self.gallery.dim(),
                "probe not comparable with gallery"
            );
            return MatchResult {
                identity_id: None,
                distance: f32::INFINITY,
            };
        }

        let mut best_dist = f32::INFINITY;
        let mut best_id: Option<&str> = None;

        // Strict `<` keeps the earliest-inserted entry on ties.
        for known in self.gallery.iter() {
            let dist = probe.euclidean_distance(&known.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_id = Some(&known.id);
            }
        }

        match best_id {
            Some(id) if best_dist < threshold => MatchResult {
                identity_id: Some(id.to_string()),
                distance: best_dist,
            },
            _ => MatchResult {
                identity_id: None,
                distance: best_dist,
            },
        }
    }

    fn len(&self) -> usize {
        self.gallery.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(entries: &[(&str, &[f32])]) -> EuclideanMatcher {
        let (ids, embs): (Vec<String>, Vec<Embedding>) = entries
            .iter()
            .map(|(id, v)| (id.to_string(), Embedding::new(v.to_vec())))
            .unzip();
        EuclideanMatcher::new(Gallery::from_encodings(embs, ids).unwrap())
    }

    #[test]
    fn test_match_below_threshold() {
        let m = matcher(&[("S100", &[0.0, 0.0]), ("S200", &[1.0, 1.0])]);
        let r = m.find(&Embedding::new(vec![0.3, 0.0]), DEFAULT_MATCH_THRESHOLD);
        assert_eq!(r.identity_id.as_deref(), Some("S100"));
        assert!((r.distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_no_match_at_or_above_threshold() {
        let m = matcher(&[("S100", &[0.0, 0.0])]);
        let r = m.find(&Embedding::new(vec![0.45, 0.0]), 0.45);
        assert!(!r.is_match());
        assert!((r.distance - 0.45).abs() < 1e-6);

        let r = m.find(&Embedding::new(vec![2.0, 0.0]), 0.45);
        assert!(!r.is_match());
    }

    #[test]
    fn test_picks_nearest_even_if_last() {
        let m = matcher(&[
            ("a", &[5.0, 5.0]),
            ("b", &[3.0, 3.0]),
            ("c", &[0.1, 0.0]),
        ]);
        let r = m.find(&Embedding::new(vec![0.0, 0.0]), 0.45);
        assert_eq!(r.identity_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_tie_resolves_to_earliest_inserted() {
        let m = matcher(&[
            ("far", &[9.0, 9.0]),
            ("first", &[0.2, 0.0]),
            ("second", &[0.0, 0.2]),
            ("third", &[-0.2, 0.0]),
        ]);
        let r = m.find(&Embedding::new(vec![0.0, 0.0]), 0.45);
        assert_eq!(r.identity_id.as_deref(), Some("first"));
    }

    #[test]
    fn test_dimension_mismatch_is_unknown() {
        let m = matcher(&[("a", &[0.0, 0.0])]);
        let r = m.find(&Embedding::new(vec![0.0, 0.0, 0.0]), 0.45);
        assert!(!r.is_match());
        assert_eq!(r.distance, f32::INFINITY);
    }

    #[test]
    fn test_nan_probe_is_unknown() {
        let m = matcher(&[("a", &[0.0, 0.0])]);
        let r = m.find(&Embedding::new(vec![f32::NAN, 0.0]), 0.45);
        assert!(!r.is_match());
    }
}
