//! Windowed, deduplicating attendance commits against an external record store.

use crate::types::{AttendanceRecord, IdentityProfile};
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

/// Default minimum spacing between two records for the same identity.
pub const DEFAULT_DEDUP_WINDOW_SECS: i64 = 10 * 60;

/// Append/query contract of the attendance record store.
///
/// `query` returns every record for the identity in no guaranteed order.
pub trait AttendanceStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn append(&mut self, record: &AttendanceRecord) -> Result<(), Self::Error>;
    fn query(&self, identity_id: &str) -> Result<Vec<AttendanceRecord>, Self::Error>;
}

/// Keyed lookup into the identity profile store.
pub trait ProfileStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn lookup(&self, identity_id: &str) -> Result<Option<IdentityProfile>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("attendance store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RecorderError {
    fn store<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::Store(Box::new(e))
    }
}

/// Outcome of a single [`AttendanceRecorder::record`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// A new record was appended.
    Committed(AttendanceRecord),
    /// A record already exists within the dedup window; nothing written.
    SuppressedDuplicate { last: NaiveDateTime },
    /// No profile metadata for the identity; nothing written.
    FailedMissingMetadata,
}

/// Attendance totals for one identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSummary {
    pub identity_id: String,
    pub count: usize,
    pub last_marked: Option<NaiveDateTime>,
}

/// Commits attendance at most once per identity per dedup window.
pub struct AttendanceRecorder<S> {
    store: S,
    dedup_window: Duration,
}

impl<S: AttendanceStore> AttendanceRecorder<S> {
    pub fn new(store: S, dedup_window: Duration) -> Self {
        Self {
            store,
            dedup_window,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Record attendance for `identity_id` at `now`.
    pub fn record(
        &mut self,
        identity_id: &str,
        metadata: Option<&IdentityProfile>,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, RecorderError> {
        let Some(profile) = metadata else {
            tracing::warn!(identity_id, "attendance not recorded: profile missing");
            return Ok(RecordOutcome::FailedMissingMetadata);
        };

        if let Some(last) = self.latest(identity_id)? {
            if now - last < self.dedup_window {
                tracing::info!(
                    identity_id,
                    last = %last,
                    "attendance already marked within window"
                );
                return Ok(RecordOutcome::SuppressedDuplicate { last });
            }
        }

        let record = AttendanceRecord::new(identity_id, profile, now);
        self.store.append(&record).map_err(RecorderError::store)?;
        tracing::info!(
            identity_id,
            date = %record.date,
            time = %record.time,
            "attendance committed"
        );
        Ok(RecordOutcome::Committed(record))
    }

    /// Most recent parsable timestamp for `identity_id`.
    ///
    /// Records whose date/time cannot be parsed are skipped.
    pub fn latest(&self, identity_id: &str) -> Result<Option<NaiveDateTime>, RecorderError> {
        Ok(self.summary(identity_id)?.last_marked)
    }

    /// Count and most recent timestamp of the identity's records.
    pub fn summary(&self, identity_id: &str) -> Result<AttendanceSummary, RecorderError> {
        let records = self
            .store
            .query(identity_id)
            .map_err(RecorderError::store)?;
        Ok(summarize(identity_id, &records))
    }
}

/// Summarize `records` (assumed to belong to `identity_id`), selecting the
/// maximum parsable timestamp regardless of storage order.
pub fn summarize(identity_id: &str, records: &[AttendanceRecord]) -> AttendanceSummary {
    let mut last_marked: Option<NaiveDateTime> = None;
    for rec in records {
        match rec.timestamp() {
            Some(ts) => {
                if last_marked.map_or(true, |prev| ts > prev) {
                    last_marked = Some(ts);
                }
            }
            None => tracing::warn!(
                identity_id,
                date = %rec.date,
                time = %rec.time,
                "skipping attendance record with unparsable timestamp"
            ),
        }
    }

    AttendanceSummary {
        identity_id: identity_id.to_string(),
        count: records.len(),
        last_marked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAttendanceStore;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn profile() -> IdentityProfile {
        IdentityProfile {
            id: "S100".into(),
            name: "Asha Rao".into(),
            program: "BTech".into(),
            branch: "CSE".into(),
            mobile: "9000000000".into(),
            email: "asha@example.edu".into(),
        }
    }

    fn recorder() -> AttendanceRecorder<MemoryAttendanceStore> {
        AttendanceRecorder::new(
            MemoryAttendanceStore::new(),
            Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS),
        )
    }

    #[test]
    fn test_commit_then_suppress_then_commit() {
        let mut rec = recorder();
        let p = profile();

        let first = rec.record("S100", Some(&p), t0()).unwrap();
        assert!(matches!(first, RecordOutcome::Committed(_)));

        let second = rec
            .record("S100", Some(&p), t0() + Duration::minutes(5))
            .unwrap();
        assert_eq!(second, RecordOutcome::SuppressedDuplicate { last: t0() });

        let third = rec
            .record("S100", Some(&p), t0() + Duration::minutes(11))
            .unwrap();
        assert!(matches!(third, RecordOutcome::Committed(_)));
        assert_eq!(rec.store().len(), 2);
    }

    #[test]
    fn test_window_boundary_commits() {
        let mut rec = recorder();
        let p = profile();
        rec.record("S100", Some(&p), t0()).unwrap();
        let at_edge = rec
            .record("S100", Some(&p), t0() + Duration::minutes(10))
            .unwrap();
        assert!(matches!(at_edge, RecordOutcome::Committed(_)));
    }

    #[test]
    fn test_missing_metadata_writes_nothing() {
        let mut rec = recorder();
        let before = rec.store().len();
        let out = rec.record("S100", None, t0()).unwrap();
        assert_eq!(out, RecordOutcome::FailedMissingMetadata);
        assert_eq!(rec.store().len(), before);
    }

    #[test]
    fn test_uses_max_timestamp_not_storage_order() {
        let mut store = MemoryAttendanceStore::new();
        let p = profile();
        // Newest first in storage order.
        store
            .append(&AttendanceRecord::new("S100", &p, t0() + Duration::minutes(30)))
            .unwrap();
        store.append(&AttendanceRecord::new("S100", &p, t0())).unwrap();

        let mut rec = AttendanceRecorder::new(store, Duration::minutes(10));
        let out = rec
            .record("S100", Some(&p), t0() + Duration::minutes(35))
            .unwrap();
        assert_eq!(
            out,
            RecordOutcome::SuppressedDuplicate {
                last: t0() + Duration::minutes(30)
            }
        );
    }

    #[test]
    fn test_other_identity_does_not_suppress() {
        let mut rec = recorder();
        let p = profile();
        let mut q = profile();
        q.id = "S200".into();
        rec.record("S100", Some(&p), t0()).unwrap();
        let out = rec.record("S200", Some(&q), t0()).unwrap();
        assert!(matches!(out, RecordOutcome::Committed(_)));
    }

    #[test]
    fn test_unparsable_rows_are_skipped() {
        let mut store = MemoryAttendanceStore::new();
        let mut bad = AttendanceRecord::new("S100", &profile(), t0());
        bad.time = "garbage".into();
        store.append(&bad).unwrap();

        let mut rec = AttendanceRecorder::new(store, Duration::minutes(10));
        let out = rec.record("S100", Some(&profile()), t0()).unwrap();
        assert!(matches!(out, RecordOutcome::Committed(_)));

        let summary = rec.summary("S100").unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.last_marked, Some(t0()));
    }

    #[test]
    fn test_summary_empty() {
        let rec = recorder();
        let summary = rec.summary("nobody").unwrap();
        assert_eq!(summary.count, 0);
        assert!(summary.last_marked.is_none());
    }
}
