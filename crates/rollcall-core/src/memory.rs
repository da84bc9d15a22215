//! In-memory record and profile stores.

use crate::recorder::{AttendanceStore, ProfileStore};
use crate::types::{AttendanceRecord, IdentityProfile};
use std::collections::HashMap;
use std::convert::Infallible;

/// Vec-backed attendance store, records kept in append order.
#[derive(Debug, Default, Clone)]
pub struct MemoryAttendanceStore {
    records: Vec<AttendanceRecord>,
}

impl MemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AttendanceStore for MemoryAttendanceStore {
    type Error = Infallible;

    fn append(&mut self, record: &AttendanceRecord) -> Result<(), Infallible> {
        self.records.push(record.clone());
        Ok(())
    }

    fn query(&self, identity_id: &str) -> Result<Vec<AttendanceRecord>, Infallible> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.identity_id == identity_id)
            .cloned()
            .collect())
    }
}

/// HashMap-backed profile store.
#[derive(Debug, Default, Clone)]
pub struct MemoryProfileStore {
    profiles: HashMap<String, IdentityProfile>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, profile: IdentityProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }
}

impl ProfileStore for MemoryProfileStore {
    type Error = Infallible;

    fn lookup(&self, identity_id: &str) -> Result<Option<IdentityProfile>, Infallible> {
        Ok(self.profiles.get(identity_id).cloned())
    }
}
