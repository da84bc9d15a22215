//! Known-identity gallery, loaded once per run from the encode store.

use crate::types::Embedding;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum GalleryError {
    #[error("encode store is empty")]
    Empty,
    #[error("encode store is inconsistent: {embeddings} embeddings for {ids} ids")]
    LengthMismatch { embeddings: usize, ids: usize },
    #[error("duplicate identity id in encode store: {0}")]
    DuplicateId(String),
    #[error("embedding for {id} has dimension {got} (expected {expected})")]
    DimensionMismatch {
        id: String,
        expected: usize,
        got: usize,
    },
    #[error("embedding for {0} contains NaN/Inf")]
    InvalidValue(String),
}

/// A known identity and its reference embedding.
#[derive(Debug, Clone)]
pub struct KnownIdentity {
    pub id: String,
    pub embedding: Embedding,
}

/// Ordered, duplicate-free set of known identities.
///
/// Order is insertion order from the encode store and doubles as the
/// tie-break order for equal-distance matches.
#[derive(Debug, Clone)]
pub struct Gallery {
    identities: Vec<KnownIdentity>,
    dim: usize,
}

impl Gallery {
    /// Build a gallery from the encode store's parallel sequences.
    pub fn from_encodings(
        embeddings: Vec<Embedding>,
        ids: Vec<String>,
    ) -> Result<Self, GalleryError> {
        if embeddings.len() != ids.len() {
            return Err(GalleryError::LengthMismatch {
                embeddings: embeddings.len(),
                ids: ids.len(),
            });
        }
        if embeddings.is_empty() {
            return Err(GalleryError::Empty);
        }

        let dim = embeddings[0].dim();
        let mut seen = HashSet::with_capacity(ids.len());
        let mut identities = Vec::with_capacity(ids.len());

        for (id, embedding) in ids.into_iter().zip(embeddings) {
            if !seen.insert(id.clone()) {
                return Err(GalleryError::DuplicateId(id));
            }
            if embedding.dim() != dim || dim == 0 {
                return Err(GalleryError::DimensionMismatch {
                    id,
                    expected: dim,
                    got: embedding.dim(),
                });
            }
            if !embedding.is_finite() {
                return Err(GalleryError::InvalidValue(id));
            }
            identities.push(KnownIdentity { id, embedding });
        }

        Ok(Self { identities, dim })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Embedding dimension shared by every entry.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn iter(&self) -> impl Iterator<Item = &KnownIdentity> {
        self.identities.iter()
    }
}
