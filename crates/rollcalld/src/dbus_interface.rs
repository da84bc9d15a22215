use std::sync::Arc;
use tokio::sync::Mutex;
use zbus::interface;

use rollcall_core::recorder::summarize;
use rollcall_core::{Embedding, IdentityProfile};

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::store::{RollcallStore, StoreError};

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub store: RollcallStore,
}

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct RollcallService {
    pub state: Arc<Mutex<AppState>>,
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl RollcallService {
    /// Return daemon and frame-loop status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let (engine, store, match_threshold, ear_threshold, required_blinks, dedup_window_secs) = {
            let state = self.state.lock().await;
            (
                state.engine.clone(),
                state.store.clone(),
                state.config.match_threshold,
                state.config.ear_threshold,
                state.config.required_blinks,
                state.config.dedup_window_secs,
            )
        };

        let engine_status = engine.status().await.map_err(failed)?;
        let identities = store.count_identities().await.unwrap_or(0);
        let records = store.count_attendance().await.unwrap_or(0);

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities_enrolled": identities,
            "attendance_records": records,
            "match_threshold": match_threshold,
            "ear_threshold": ear_threshold,
            "required_blinks": required_blinks,
            "dedup_window_secs": dedup_window_secs,
            "engine": engine_status,
        })
        .to_string())
    }

    /// Liveness state of one identity in the current run as JSON
    /// (`null` if it has not been matched yet).
    async fn session(&self, identity_id: &str) -> zbus::fdo::Result<String> {
        let engine = self.state.lock().await.engine.clone();
        let session = engine.session(identity_id).await.map_err(failed)?;
        serde_json::to_string(&session).map_err(failed)
    }

    /// Attendance count and most recent mark for one identity as JSON.
    async fn summary(&self, identity_id: &str) -> zbus::fdo::Result<String> {
        let store = self.state.lock().await.store.clone();
        let id = identity_id.trim();
        let records = store.query_attendance(id).await.map_err(|e| {
            tracing::error!(identity_id = id, error = %e, "summary: attendance query failed");
            failed(e)
        })?;
        serde_json::to_string(&summarize(id, &records)).map_err(failed)
    }

    /// Add or replace a reference embedding (JSON array of numbers).
    ///
    /// The frame loop's gallery is fixed at startup; the change applies
    /// from the next daemon run.
    async fn enroll_identity(
        &self,
        identity_id: &str,
        embedding_json: &str,
    ) -> zbus::fdo::Result<bool> {
        let id = identity_id.trim();
        if id.is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "identity id must not be empty".to_string(),
            ));
        }
        let values: Vec<f32> = serde_json::from_str(embedding_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("embedding: {e}")))?;

        let store = self.state.lock().await.store.clone();
        store
            .enroll(id, &Embedding::new(values))
            .await
            .map_err(|e| match e {
                StoreError::EmptyEmbedding
                | StoreError::InvalidEmbeddingValue
                | StoreError::DimensionMismatch { .. } => {
                    tracing::warn!(identity_id = id, error = %e, "enroll rejected");
                    zbus::fdo::Error::InvalidArgs(format!("embedding: {e}"))
                }
                e => {
                    tracing::error!(identity_id = id, error = %e, "enroll failed");
                    failed(e)
                }
            })?;

        tracing::info!(identity_id = id, "identity enrolled, active from next run");
        Ok(true)
    }

    /// Insert or update the display metadata of an identity.
    async fn upsert_profile(
        &self,
        identity_id: &str,
        name: &str,
        program: &str,
        branch: &str,
        mobile: &str,
        email: &str,
    ) -> zbus::fdo::Result<bool> {
        if identity_id.trim().is_empty() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "identity id must not be empty".to_string(),
            ));
        }
        let profile = IdentityProfile {
            id: identity_id.to_string(),
            name: name.to_string(),
            program: program.to_string(),
            branch: branch.to_string(),
            mobile: mobile.to_string(),
            email: email.to_string(),
        };

        let store = self.state.lock().await.store.clone();
        store.upsert_profile(&profile).await.map_err(failed)?;
        tracing::info!(identity_id = %profile.id.trim(), "profile updated");
        Ok(true)
    }
}
