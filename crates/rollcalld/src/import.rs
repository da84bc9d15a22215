//! Offline bootstrap of the encode and profile stores from a JSON file.
//!
//! The frame loop refuses to start on an empty gallery, so a fresh
//! installation is seeded with `rollcalld import <file>` before the daemon
//! runs. The file is a JSON array:
//!
//! ```json
//! [{"id": "S100", "embedding": [0.01, ...],
//!   "profile": {"id": "S100", "name": "...", "program": "...", "branch": "...", "mobile": "..."}}]
//! ```

use crate::store::{RollcallStore, StoreError};
use rollcall_core::{Embedding, IdentityProfile};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid import file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("entry {index}: identity id is empty")]
    EmptyId { index: usize },
    #[error("entry {index} ({id}): profile id {profile_id} does not match")]
    ProfileMismatch {
        index: usize,
        id: String,
        profile_id: String,
    },
    #[error("entry {index} ({id}): {source}")]
    Store {
        index: usize,
        id: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Deserialize)]
struct ImportEntry {
    id: String,
    embedding: Embedding,
    #[serde(default)]
    profile: Option<IdentityProfile>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub identities: usize,
    pub profiles: usize,
}

pub async fn import_file(
    store: &RollcallStore,
    path: &Path,
) -> Result<ImportSummary, ImportError> {
    let text = std::fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.display().to_string(),
        source,
    })?;
    import_str(store, &text).await
}

/// Entries are applied in file order, so gallery order follows the file
/// for identities that are new to the store.
pub async fn import_str(
    store: &RollcallStore,
    text: &str,
) -> Result<ImportSummary, ImportError> {
    let entries: Vec<ImportEntry> = serde_json::from_str(text)?;
    let mut summary = ImportSummary::default();

    for (index, entry) in entries.into_iter().enumerate() {
        let id = entry.id.trim().to_string();
        if id.is_empty() {
            return Err(ImportError::EmptyId { index });
        }
        if let Some(profile) = &entry.profile {
            if profile.id.trim() != id {
                return Err(ImportError::ProfileMismatch {
                    index,
                    id,
                    profile_id: profile.id.clone(),
                });
            }
        }

        let store_err = |source| ImportError::Store {
            index,
            id: id.clone(),
            source,
        };
        store
            .enroll(&id, &entry.embedding)
            .await
            .map_err(store_err)?;
        summary.identities += 1;

        if let Some(profile) = &entry.profile {
            store.upsert_profile(profile).await.map_err(store_err)?;
            summary.profiles += 1;
        }
        tracing::debug!(identity_id = %id, "imported identity");
    }

    tracing::info!(
        identities = summary.identities,
        profiles = summary.profiles,
        "import complete"
    );
    Ok(summary)
}
