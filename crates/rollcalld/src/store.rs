use rollcall_core::recorder::{AttendanceStore, ProfileStore};
use rollcall_core::{AttendanceRecord, Embedding, IdentityProfile};
use std::path::Path;
use thiserror::Error;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("embedding encryption failed")]
    EncryptionFailed,
    #[error("embedding decryption failed (wrong key or corrupted row)")]
    DecryptionFailed,
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
    #[error("embedding has dimension {got}, gallery uses {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
}

/// SQLite-backed encode, profile and attendance storage.
///
/// Gallery embeddings are AES-256-GCM encrypted at rest. A per-installation
/// 32-byte key is generated at first use and stored at `{db_dir}/.key`
/// (mode 0600).
#[derive(Clone)]
pub struct RollcallStore {
    conn: Connection,
    enc_key: [u8; 32],
}

impl RollcallStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            // In-memory DB (tests): use a fixed all-zeros key
            [0u8; 32]
        } else {
            let key_path = db_path
                .parent()
                .unwrap_or(Path::new("/var/lib/rollcall"))
                .join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS identities (
                     seq INTEGER PRIMARY KEY AUTOINCREMENT,
                     id TEXT NOT NULL UNIQUE,
                     embedding BLOB NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS profiles (
                     id TEXT PRIMARY KEY,
                     name TEXT NOT NULL,
                     program TEXT NOT NULL,
                     branch TEXT NOT NULL,
                     mobile TEXT NOT NULL,
                     email TEXT NOT NULL DEFAULT ''
                 );
                 CREATE TABLE IF NOT EXISTS attendance (
                     row INTEGER PRIMARY KEY AUTOINCREMENT,
                     identity_id TEXT NOT NULL,
                     name TEXT NOT NULL,
                     program TEXT NOT NULL,
                     branch TEXT NOT NULL,
                     mobile TEXT NOT NULL,
                     date TEXT NOT NULL,
                     time TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_attendance_identity ON attendance(identity_id);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, enc_key })
    }

    // ── Encode store ──────────────────────────────────────────────────────────

    /// Insert or replace the reference embedding for `identity_id`.
    ///
    /// Replacing keeps the identity's original position in gallery order.
    /// The embedding must have the same dimension as the other enrolled
    /// identities, otherwise the next gallery load would fail.
    pub async fn enroll(
        &self,
        identity_id: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        let blob = self.encrypt_embedding(&embedding.values)?;
        let id = identity_id.trim().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        let got = embedding.dim();

        let mismatch = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let existing: Option<Vec<u8>> = tx
                    .query_row(
                        "SELECT embedding FROM identities WHERE id != ?1 ORDER BY seq LIMIT 1",
                        [&id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(expected) = existing.and_then(|b| blob_dim(b.len())) {
                    if expected != got {
                        return Ok(Some(expected));
                    }
                }
                tx.execute(
                    "INSERT INTO identities (id, embedding, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding,
                                                   created_at = excluded.created_at",
                    rusqlite::params![id, blob, created_at],
                )?;
                tx.commit()?;
                Ok(None)
            })
            .await?;

        match mismatch {
            Some(expected) => Err(StoreError::DimensionMismatch { expected, got }),
            None => Ok(()),
        }
    }

    /// Load every reference embedding in insertion order.
    pub async fn load_encodings(&self) -> Result<(Vec<Embedding>, Vec<String>), StoreError> {
        // Fetch raw rows from SQLite; decrypt outside the blocking closure
        let rows: Vec<(String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, embedding FROM identities ORDER BY seq")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut embeddings = Vec::with_capacity(rows.len());
        let mut ids = Vec::with_capacity(rows.len());
        for (id, blob) in rows {
            embeddings.push(Embedding::new(self.decrypt_embedding(&blob)?));
            ids.push(id);
        }
        Ok((embeddings, ids))
    }

    /// Count enrolled identities.
    pub async fn count_identities(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Profile store ─────────────────────────────────────────────────────────

    pub async fn upsert_profile(&self, profile: &IdentityProfile) -> Result<(), StoreError> {
        let p = IdentityProfile {
            id: profile.id.trim().to_string(),
            name: profile.name.trim().to_string(),
            program: profile.program.trim().to_string(),
            branch: profile.branch.trim().to_string(),
            mobile: profile.mobile.trim().to_string(),
            email: profile.email.trim().to_string(),
        };
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO profiles (id, name, program, branch, mobile, email)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                         program = excluded.program, branch = excluded.branch,
                         mobile = excluded.mobile, email = excluded.email",
                    rusqlite::params![p.id, p.name, p.program, p.branch, p.mobile, p.email],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Look up a profile by exact (trimmed) identity id.
    pub async fn get_profile(
        &self,
        identity_id: &str,
    ) -> Result<Option<IdentityProfile>, StoreError> {
        let id = identity_id.trim().to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, program, branch, mobile, email FROM profiles WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([&id], |row| {
                    Ok(IdentityProfile {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        program: row.get(2)?,
                        branch: row.get(3)?,
                        mobile: row.get(4)?,
                        email: row.get(5)?,
                    })
                })?;
                Ok(rows.next().transpose()?)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Attendance store ──────────────────────────────────────────────────────

    pub async fn append_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let r = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (identity_id, name, program, branch, mobile, date, time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        r.identity_id,
                        r.name,
                        r.program,
                        r.branch,
                        r.mobile,
                        r.date,
                        r.time
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// All attendance rows for `identity_id`, in storage order.
    pub async fn query_attendance(
        &self,
        identity_id: &str,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let id = identity_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity_id, name, program, branch, mobile, date, time
                     FROM attendance WHERE identity_id = ?1 ORDER BY row",
                )?;
                let rows = stmt.query_map([&id], |row| {
                    Ok(AttendanceRecord {
                        identity_id: row.get(0)?,
                        name: row.get(1)?,
                        program: row.get(2)?,
                        branch: row.get(3)?,
                        mobile: row.get(4)?,
                        date: row.get(5)?,
                        time: row.get(6)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn count_attendance(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt embedding values with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_embedding(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        validate_embedding_values(values)?;
        let plaintext = embedding_to_bytes(values);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn decrypt_embedding(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_embedding_strict(&plaintext)
    }
}

// ── Blocking adapter for the engine thread ────────────────────────────────────

/// Synchronous view of [`RollcallStore`] for the frame loop.
///
/// Must only be used from a thread outside the tokio runtime (the engine
/// thread, or `spawn_blocking`).
#[derive(Clone)]
pub struct BlockingStore {
    store: RollcallStore,
    rt: tokio::runtime::Handle,
}

impl BlockingStore {
    pub fn new(store: RollcallStore, rt: tokio::runtime::Handle) -> Self {
        Self { store, rt }
    }
}

impl AttendanceStore for BlockingStore {
    type Error = StoreError;

    fn append(&mut self, record: &AttendanceRecord) -> Result<(), StoreError> {
        self.rt.block_on(self.store.append_attendance(record))
    }

    fn query(&self, identity_id: &str) -> Result<Vec<AttendanceRecord>, StoreError> {
        self.rt.block_on(self.store.query_attendance(identity_id))
    }
}

impl ProfileStore for BlockingStore {
    type Error = StoreError;

    fn lookup(&self, identity_id: &str) -> Result<Option<IdentityProfile>, StoreError> {
        self.rt.block_on(self.store.get_profile(identity_id))
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        if bytes.len() != 32 {
            return Err(StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

/// Embedding dimension held by an encrypted blob of `len` bytes.
fn blob_dim(len: usize) -> Option<usize> {
    let body = len.checked_sub(NONCE_LEN + TAG_LEN)?;
    (body > 0 && body % 4 == 0).then_some(body / 4)
}

fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_embedding_strict(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f32::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::InvalidEmbeddingValue);
        }
        values.push(v);
    }
    Ok(values)
}

fn validate_embedding_values(values: &[f32]) -> Result<(), StoreError> {
    if values.is_empty() {
        return Err(StoreError::EmptyEmbedding);
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbeddingValue);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rollcall_core::recorder::AttendanceRecorder;
    use rollcall_core::RecordOutcome;

    fn emb(seed: f32) -> Embedding {
        Embedding::new((0..128).map(|i| seed + i as f32 / 128.0).collect())
    }

    fn profile(id: &str) -> IdentityProfile {
        IdentityProfile {
            id: id.into(),
            name: "Asha Rao".into(),
            program: "BTech".into(),
            branch: "CSE".into(),
            mobile: "9000000000".into(),
            email: "asha@example.edu".into(),
        }
    }

    #[tokio::test]
    async fn test_encodings_roundtrip_in_insertion_order() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        store.enroll("S300", &emb(0.3)).await.unwrap();
        store.enroll("S100", &emb(0.1)).await.unwrap();
        store.enroll("S200", &emb(0.2)).await.unwrap();

        let (embeddings, ids) = store.load_encodings().await.unwrap();
        assert_eq!(ids, ["S300", "S100", "S200"]);
        for (orig, rec) in emb(0.1).values.iter().zip(embeddings[1].values.iter()) {
            assert_eq!(orig.to_bits(), rec.to_bits());
        }
        assert_eq!(store.count_identities().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reenroll_replaces_without_duplicate() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        store.enroll("S100", &emb(0.1)).await.unwrap();
        store.enroll("S200", &emb(0.2)).await.unwrap();
        store.enroll("S100", &emb(0.9)).await.unwrap();

        let (embeddings, ids) = store.load_encodings().await.unwrap();
        assert_eq!(ids, ["S100", "S200"]);
        assert_eq!(embeddings[0], emb(0.9));
    }

    #[tokio::test]
    async fn test_enroll_rejects_invalid_embeddings() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        let err = store.enroll("x", &Embedding::new(vec![])).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyEmbedding));
        let err = store
            .enroll("x", &Embedding::new(vec![0.0, f32::NAN]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbeddingValue));
    }

    #[tokio::test]
    async fn test_enroll_rejects_dimension_mismatch() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        store
            .enroll("S100", &Embedding::new(vec![0.1, 0.2, 0.3]))
            .await
            .unwrap();

        let err = store
            .enroll("S200", &Embedding::new(vec![0.5]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 3,
                got: 1
            }
        ));

        let (embeddings, ids) = store.load_encodings().await.unwrap();
        assert_eq!(ids, ["S100"]);
        assert!(rollcall_core::Gallery::from_encodings(embeddings, ids).is_ok());

        // The only identity may change dimension; nothing else depends on it.
        store
            .enroll("S100", &Embedding::new(vec![0.5]))
            .await
            .unwrap();
        store
            .enroll("S200", &Embedding::new(vec![0.7]))
            .await
            .unwrap();
        assert_eq!(store.count_identities().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_blob_dim_matches_encrypted_size() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        let blob = store.encrypt_embedding(&emb(0.5).values).unwrap();
        assert_eq!(blob_dim(blob.len()), Some(128));
        assert_eq!(blob_dim(NONCE_LEN + TAG_LEN), None);
        assert_eq!(blob_dim(4), None);
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let store1 = RollcallStore {
            conn: Connection::open(Path::new(":memory:")).await.unwrap(),
            enc_key: [1u8; 32],
        };
        let store2 = RollcallStore {
            conn: store1.conn.clone(),
            enc_key: [2u8; 32],
        };
        let blob = store1.encrypt_embedding(&emb(0.5).values).unwrap();
        assert!(matches!(
            store2.decrypt_embedding(&blob),
            Err(StoreError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_truncated_blob_rejected() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        let err = store.decrypt_embedding(&[0u8; 8]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidBlob(8)));
    }

    #[test]
    fn test_strict_decode_rejects_ragged_and_nan() {
        assert!(matches!(
            bytes_to_embedding_strict(&[0u8; 6]),
            Err(StoreError::InvalidBlob(6))
        ));
        let bytes = embedding_to_bytes(&[1.0, f32::INFINITY]);
        assert!(matches!(
            bytes_to_embedding_strict(&bytes),
            Err(StoreError::InvalidEmbeddingValue)
        ));
    }

    #[tokio::test]
    async fn test_profile_lookup_trims_id() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        store.upsert_profile(&profile(" S100 ")).await.unwrap();

        let p = store.get_profile("S100 ").await.unwrap().unwrap();
        assert_eq!(p.id, "S100");
        assert_eq!(p.branch, "CSE");
        assert!(store.get_profile("S999").await.unwrap().is_none());

        let mut updated = profile("S100");
        updated.mobile = "111".into();
        store.upsert_profile(&updated).await.unwrap();
        assert_eq!(store.get_profile("S100").await.unwrap().unwrap().mobile, "111");
    }

    #[tokio::test]
    async fn test_attendance_append_and_query() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        let now = NaiveDate::from_ymd_opt(2025, 9, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let p = profile("S100");
        store
            .append_attendance(&AttendanceRecord::new("S100", &p, now))
            .await
            .unwrap();
        store
            .append_attendance(&AttendanceRecord::new("S200", &p, now))
            .await
            .unwrap();

        let rows = store.query_attendance("S100").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, "2025-09-01");
        assert_eq!(rows[0].time, "09:00:00");
        assert_eq!(store.count_attendance().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_store_drives_recorder() {
        let store = RollcallStore::open(Path::new(":memory:")).await.unwrap();
        store.upsert_profile(&profile("S100")).await.unwrap();
        let blocking = BlockingStore::new(store.clone(), tokio::runtime::Handle::current());

        let outcomes = tokio::task::spawn_blocking(move || {
            let t0 = NaiveDate::from_ymd_opt(2025, 9, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap();
            let profile = blocking.lookup("S100").unwrap();
            let mut recorder =
                AttendanceRecorder::new(blocking.clone(), chrono::Duration::minutes(10));
            let first = recorder.record("S100", profile.as_ref(), t0).unwrap();
            let second = recorder
                .record("S100", profile.as_ref(), t0 + chrono::Duration::minutes(5))
                .unwrap();
            (first, second)
        })
        .await
        .unwrap();

        assert!(matches!(outcomes.0, RecordOutcome::Committed(_)));
        assert!(matches!(outcomes.1, RecordOutcome::SuppressedDuplicate { .. }));
        assert_eq!(store.count_attendance().await.unwrap(), 1);
    }
}
