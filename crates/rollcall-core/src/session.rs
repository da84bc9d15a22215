use crate::liveness::BlinkGate;
use serde::Serialize;
use std::collections::HashMap;

/// Liveness and attendance state for one identity within a tracking run.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessState {
    pub identity_id: String,
    pub gate: BlinkGate,
    attendance_logged: bool,
    /// Frames in which this identity was matched.
    pub frames_matched: u64,
}

impl LivenessState {
    fn new(identity_id: &str) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            gate: BlinkGate::new(),
            attendance_logged: false,
            frames_matched: 0,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.gate.is_verified()
    }

    pub fn attendance_logged(&self) -> bool {
        self.attendance_logged
    }

    /// Returns `true` exactly once per run, on the first call after the gate
    /// has verified. The caller must invoke the recorder only when this
    /// returns `true`.
    pub fn claim_attendance(&mut self) -> bool {
        if !self.gate.is_verified() || self.attendance_logged {
            return false;
        }
        self.attendance_logged = true;
        true
    }
}

/// Owns one [`LivenessState`] per identity matched during the current run.
///
/// No eviction: entries live until the run ends (or [`SessionTracker::reset`]).
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<String, LivenessState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Fetch the state for `identity_id`, creating a fresh unverified one on
    /// first sight.
    pub fn get_or_create(&mut self, identity_id: &str) -> &mut LivenessState {
        if !self.sessions.contains_key(identity_id) {
            tracing::debug!(identity_id, "new liveness session");
        }
        self.sessions
            .entry(identity_id.to_string())
            .or_insert_with(|| LivenessState::new(identity_id))
    }

    pub fn get(&self, identity_id: &str) -> Option<&LivenessState> {
        self.sessions.get(identity_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn verified_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_verified()).count()
    }

    /// Drop every session, as on a tracking restart.
    pub fn reset(&mut self) {
        self.sessions.clear();
    }
}
