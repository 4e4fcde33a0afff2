//! SQLite-backed offline note queue.
//!
//! Every operation commits before returning, so a note that made it into the
//! queue survives process death. The queue is ordered by capture time, not
//! insertion time: a drain always sees the oldest capture first.
//!
//! Concurrency model: one connection behind a mutex, never held across an
//! await. Inserts from a capture session and deletes from a concurrent drain
//! interleave safely at statement granularity.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::domain::{Note, QueuedNote};

/// Errors from the note queue
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("queue database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("queue io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pending_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    captured_at_ms INTEGER NOT NULL,
    display_timestamp TEXT NOT NULL,
    body TEXT NOT NULL,
    target TEXT NOT NULL,
    queued_at_ms INTEGER NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);
CREATE INDEX IF NOT EXISTS idx_pending_notes_captured_at
    ON pending_notes(captured_at_ms);
";

/// Durable queue of notes awaiting delivery
#[derive(Clone)]
pub struct NoteQueue {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl NoteQueue {
    /// Open (or create) the queue database at the given path.
    ///
    /// WAL journaling with full synchronous mode: commits are on disk before
    /// any operation returns.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::debug!("Note queue open at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory queue. Durability tests use [`NoteQueue::open`]; this exists
    /// for tests that only need queue semantics.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Path of the backing database file, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }

    /// Persist a note and return its queue-assigned id.
    ///
    /// `queued_at` is stamped here; `attempt_count` starts at 0.
    pub fn insert(&self, note: &Note) -> Result<i64, StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pending_notes
                 (captured_at_ms, display_timestamp, body, target, queued_at_ms, attempt_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                dt_to_ms(note.captured_at),
                note.display_timestamp,
                note.body,
                note.target,
                dt_to_ms(Utc::now()),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// All queued notes, oldest capture first.
    ///
    /// Ordering is by `captured_at` ascending with id as tiebreak, regardless
    /// of the order notes were inserted.
    pub fn list_all(&self) -> Result<Vec<QueuedNote>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, captured_at_ms, display_timestamp, body, target,
                    queued_at_ms, attempt_count, last_error
             FROM pending_notes
             ORDER BY captured_at_ms ASC, id ASC",
        )?;

        let rows = stmt.query_map([], row_to_note)?;
        let mut notes = Vec::new();
        for row in rows {
            notes.push(row?);
        }

        Ok(notes)
    }

    /// Look up one queued note by id
    pub fn get(&self, id: i64) -> Result<Option<QueuedNote>, StorageError> {
        let conn = self.lock()?;
        let note = conn
            .query_row(
                "SELECT id, captured_at_ms, display_timestamp, body, target,
                        queued_at_ms, attempt_count, last_error
                 FROM pending_notes WHERE id = ?1",
                params![id],
                row_to_note,
            )
            .optional()?;

        Ok(note)
    }

    /// Remove one note. Returns false if the id was not present.
    pub fn delete(&self, id: i64) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM pending_notes WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Remove every queued note, returning how many were removed
    pub fn delete_all(&self) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM pending_notes", [])?;
        Ok(affected)
    }

    /// Number of queued notes
    pub fn count(&self) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_notes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Record a failed delivery attempt: bump `attempt_count`, set
    /// `last_error`.
    ///
    /// Returns false if the record no longer exists. A note deleted by a
    /// concurrent drain or a manual delete stays deleted; this never
    /// re-creates a row.
    pub fn record_failure(&self, id: i64, error_message: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE pending_notes
             SET attempt_count = attempt_count + 1, last_error = ?2
             WHERE id = ?1",
            params![id, error_message],
        )?;

        Ok(affected > 0)
    }
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedNote> {
    let attempts: i64 = row.get(6)?;
    let attempt_count = match u32::try_from(attempts) {
        Ok(count) => count,
        Err(_) => {
            tracing::warn!("Stored attempt count {} is out of range; clamping", attempts);
            attempts.clamp(0, u32::MAX as i64) as u32
        }
    };

    Ok(QueuedNote {
        id: row.get(0)?,
        captured_at: ms_to_dt(row.get(1)?),
        display_timestamp: row.get(2)?,
        body: row.get(3)?,
        target: row.get(4)?,
        queued_at: ms_to_dt(row.get(5)?),
        attempt_count,
        last_error: row.get(7)?,
    })
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Millis column back to an instant. A value outside chrono's range can
/// only come from a mangled row; it is logged and read as now.
fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt,
        None => {
            tracing::warn!("Stored timestamp {} ms is out of range; reading as now", ms);
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn note_at(minute: u32, body: &str) -> Note {
        let at = Utc.with_ymd_and_hms(2025, 12, 22, 16, minute, 0).unwrap();
        Note::new(at, body, "doc-1")
    }

    #[test]
    fn test_insert_assigns_unique_ids() {
        let queue = NoteQueue::open_in_memory().unwrap();

        let a = queue.insert(&note_at(0, "first")).unwrap();
        let b = queue.insert(&note_at(1, "second")).unwrap();

        assert_ne!(a, b);
        assert_eq!(queue.count().unwrap(), 2);
    }

    #[test]
    fn test_insert_then_get_round_trip() {
        let queue = NoteQueue::open_in_memory().unwrap();
        let note = note_at(30, "buy milk");

        let id = queue.insert(&note).unwrap();
        let stored = queue.get(id).unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.captured_at, note.captured_at);
        assert_eq!(stored.display_timestamp, note.display_timestamp);
        assert_eq!(stored.body, "buy milk");
        assert_eq!(stored.target, "doc-1");
        assert_eq!(stored.attempt_count, 0);
        assert!(stored.last_error.is_none());
    }

    #[test]
    fn test_list_orders_by_capture_time_not_insertion() {
        let queue = NoteQueue::open_in_memory().unwrap();

        // Inserted newest-capture first
        queue.insert(&note_at(45, "third")).unwrap();
        queue.insert(&note_at(5, "first")).unwrap();
        queue.insert(&note_at(20, "second")).unwrap();

        let bodies: Vec<String> = queue
            .list_all()
            .unwrap()
            .into_iter()
            .map(|n| n.body)
            .collect();

        assert_eq!(bodies, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_list_tiebreaks_equal_timestamps_by_id() {
        let queue = NoteQueue::open_in_memory().unwrap();

        let a = queue.insert(&note_at(10, "a")).unwrap();
        let b = queue.insert(&note_at(10, "b")).unwrap();

        let ids: Vec<i64> = queue.list_all().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_record_failure_increments_and_annotates() {
        let queue = NoteQueue::open_in_memory().unwrap();
        let id = queue.insert(&note_at(0, "note")).unwrap();

        assert!(queue.record_failure(id, "timeout").unwrap());
        assert!(queue.record_failure(id, "connection refused").unwrap());

        let stored = queue.get(id).unwrap().unwrap();
        assert_eq!(stored.attempt_count, 2);
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_record_failure_after_delete_is_noop() {
        let queue = NoteQueue::open_in_memory().unwrap();
        let id = queue.insert(&note_at(0, "note")).unwrap();

        assert!(queue.delete(id).unwrap());
        assert!(!queue.record_failure(id, "late failure").unwrap());

        // The deleted record must not come back
        assert!(queue.get(id).unwrap().is_none());
        assert_eq!(queue.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_absent_id_is_noop() {
        let queue = NoteQueue::open_in_memory().unwrap();
        assert!(!queue.delete(999).unwrap());
    }

    #[test]
    fn test_delete_all() {
        let queue = NoteQueue::open_in_memory().unwrap();
        queue.insert(&note_at(0, "a")).unwrap();
        queue.insert(&note_at(1, "b")).unwrap();

        assert_eq!(queue.delete_all().unwrap(), 2);
        assert_eq!(queue.count().unwrap(), 0);
        assert!(queue.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("queue.db");

        let id = {
            let queue = NoteQueue::open(&db_path).unwrap();
            queue.insert(&note_at(0, "durable")).unwrap()
        };

        let reopened = NoteQueue::open(&db_path).unwrap();
        let stored = reopened.get(id).unwrap().unwrap();
        assert_eq!(stored.body, "durable");
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let queue = NoteQueue::open_in_memory().unwrap();

        let a = queue.insert(&note_at(0, "a")).unwrap();
        queue.delete(a).unwrap();
        let b = queue.insert(&note_at(1, "b")).unwrap();

        assert!(b > a);
    }

    #[test]
    fn test_storage_failure_surfaces() {
        let queue = NoteQueue::open_in_memory().unwrap();
        queue
            .conn
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE pending_notes")
            .unwrap();

        assert!(queue.insert(&note_at(0, "x")).is_err());
        assert!(queue.count().is_err());
    }

    #[test]
    fn test_mangled_row_values_are_clamped_on_read() {
        let queue = NoteQueue::open_in_memory().unwrap();

        // A row no queue operation can produce: capture instant beyond
        // chrono's range, negative attempt count
        queue
            .conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO pending_notes
                     (captured_at_ms, display_timestamp, body, target, queued_at_ms, attempt_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    i64::MAX,
                    "2025-12-22, Mon, 16:00",
                    "mangled",
                    "doc-1",
                    0i64,
                    -3i64
                ],
            )
            .unwrap();

        let notes = queue.list_all().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].attempt_count, 0);
        assert!(notes[0].captured_at <= Utc::now());
        assert_eq!(notes[0].body, "mangled");
    }
}
