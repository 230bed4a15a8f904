//! Durable on-device buffer of recorded samples.
//!
//! Samples are appended with `synced = 0` and survive process restarts. The
//! buffer is the sole owner of a sample until it is synced; afterwards the
//! remote store owns the durable copy and the local row is a provisional cache
//! that [`LocalBuffer::purge_synced_before`] may drop.
//!
//! Each append and each "mark synced" is a single SQLite statement, so the
//! sync routine and the session can interleave without corrupting the file.
//!
//! Timestamps are stored as whole seconds plus a nanosecond remainder, so a
//! sample reads back exactly as it was appended.
//!
//! The API is blocking. Async callers go through [`run_blocking`], which moves
//! the statement onto tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, Row};

use crate::error::{Result, TrackerError};
use crate::{GpsSample, SampleId, TrackingType};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const SELECT_COLUMNS: &str =
    "id, subject_id, timestamp_secs, timestamp_nanos, latitude, longitude, accuracy, tracking_type, synced";

/// SQLite-backed sample buffer.
pub struct LocalBuffer {
    conn: Mutex<Connection>,
}

impl LocalBuffer {
    /// Open (or create) the buffer at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TrackerError::CorruptRecord(format!(
                        "failed to create buffer directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!("[LocalBuffer] Opened {}", path.display());
        Self::with_connection(conn)
    }

    /// Non-durable buffer, for tests and previews.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        run_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Store a sample as pending.
    ///
    /// Returns `false` if a sample with the same id was already buffered; the
    /// existing row (and its sync flag) is left untouched.
    pub fn append(&self, sample: &GpsSample) -> Result<bool> {
        let conn = self.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO gps_samples (
                id, subject_id, timestamp_secs, timestamp_nanos, latitude, longitude, accuracy,
                tracking_type, synced
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                sample.id.to_string(),
                sample.subject_id,
                sample.timestamp.timestamp(),
                sample.timestamp.timestamp_subsec_nanos(),
                sample.latitude,
                sample.longitude,
                sample.accuracy,
                sample.tracking_type.as_str(),
            ],
        )?;
        debug!("[LocalBuffer] append {} inserted={}", sample.id, inserted > 0);
        Ok(inserted > 0)
    }

    /// Unsynced samples with `timestamp >= session_start`, in insertion order.
    pub fn pending_since(&self, session_start: DateTime<Utc>) -> Result<Vec<GpsSample>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM gps_samples
             WHERE synced = 0
               AND (timestamp_secs > ?1 OR (timestamp_secs = ?1 AND timestamp_nanos >= ?2))
             ORDER BY seq ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![session_start.timestamp(), session_start.timestamp_subsec_nanos()],
                StoredRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(StoredRow::into_sample).collect()
    }

    /// Every unsynced sample, in insertion order.
    pub fn pending(&self) -> Result<Vec<GpsSample>> {
        self.pending_since(DateTime::<Utc>::MIN_UTC)
    }

    pub fn pending_count(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM gps_samples WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Flip a sample to synced. Returns `false` if it was already synced or unknown.
    pub fn mark_synced(&self, id: &SampleId) -> Result<bool> {
        let conn = self.lock();
        let updated = conn.execute(
            "UPDATE gps_samples SET synced = 1 WHERE id = ?1 AND synced = 0",
            params![id.to_string()],
        )?;
        Ok(updated > 0)
    }

    pub fn get(&self, id: &SampleId) -> Result<Option<GpsSample>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM gps_samples WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id.to_string()], StoredRow::from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_sample()?)),
            None => Ok(None),
        }
    }

    /// Drop synced rows older than `before`. Unsynced rows are never purged.
    pub fn purge_synced_before(&self, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM gps_samples
             WHERE synced = 1
               AND (timestamp_secs < ?1 OR (timestamp_secs = ?1 AND timestamp_nanos < ?2))",
            params![before.timestamp(), before.timestamp_subsec_nanos()],
        )?;
        if removed > 0 {
            info!("[LocalBuffer] Purged {} synced samples", removed);
        }
        Ok(removed)
    }
}

/// Run a buffer operation on the blocking pool.
///
/// SQLite calls block the calling thread; async paths must not issue them on
/// a runtime worker.
pub async fn run_blocking<T, F>(buffer: &Arc<LocalBuffer>, op: F) -> Result<T>
where
    F: FnOnce(&LocalBuffer) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let buffer = Arc::clone(buffer);
    tokio::task::spawn_blocking(move || op(&buffer))
        .await
        .map_err(|e| TrackerError::BufferTask(e.to_string()))?
}

struct StoredRow {
    id: String,
    subject_id: String,
    timestamp_secs: i64,
    timestamp_nanos: u32,
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    tracking_type: String,
    synced: bool,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            timestamp_secs: row.get(2)?,
            timestamp_nanos: row.get(3)?,
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            accuracy: row.get(6)?,
            tracking_type: row.get(7)?,
            synced: row.get::<_, i64>(8)? != 0,
        })
    }

    fn into_sample(self) -> Result<GpsSample> {
        let id = SampleId::parse(&self.id)
            .ok_or_else(|| TrackerError::CorruptRecord(format!("invalid sample id '{}'", self.id)))?;
        let timestamp = Utc
            .timestamp_opt(self.timestamp_secs, self.timestamp_nanos)
            .single()
            .ok_or_else(|| {
                TrackerError::CorruptRecord(format!(
                    "invalid timestamp {}.{:09}",
                    self.timestamp_secs, self.timestamp_nanos
                ))
            })?;
        let tracking_type = TrackingType::parse(&self.tracking_type).ok_or_else(|| {
            TrackerError::CorruptRecord(format!("unknown tracking type '{}'", self.tracking_type))
        })?;

        Ok(GpsSample {
            id,
            timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            subject_id: self.subject_id,
            tracking_type,
            synced: self.synced,
        })
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(TrackerError::CorruptRecord(format!(
            "buffer schema version ({}) is newer than supported ({})",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        match next_version {
            1 => tx.execute_batch(include_str!("schemas/schema_v1.sql"))?,
            _ => {
                return Err(TrackerError::CorruptRecord(format!(
                    "no buffer migration for version {next_version}"
                )))
            }
        }
        version = next_version;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    debug!("[LocalBuffer] Migrated schema to version {}", CURRENT_SCHEMA_VERSION);
    Ok(())
}
