//! SQLite database handle and schema.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_core::StoreError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id          TEXT PRIMARY KEY,
    first_name  TEXT NOT NULL,
    last_name   TEXT NOT NULL,
    code        TEXT UNIQUE,
    level       TEXT,
    grade       TEXT,
    section     TEXT
);

CREATE TABLE IF NOT EXISTS attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    enrollee_id TEXT NOT NULL,
    date        TEXT NOT NULL,
    time        TEXT NOT NULL,
    status      TEXT NOT NULL CHECK (status IN ('present', 'absent', 'late')),
    method      TEXT NOT NULL CHECK (method IN ('manual', 'facial_recognition')),
    emotion     TEXT,
    UNIQUE (enrollee_id, date)
);

CREATE TABLE IF NOT EXISTS emotion_samples (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    enrollee_id  TEXT,
    label        TEXT NOT NULL,
    confidence   REAL NOT NULL,
    distribution TEXT NOT NULL,
    timestamp    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS emotion_samples_enrollee_ts
    ON emotion_samples (enrollee_id, timestamp);

CREATE TABLE IF NOT EXISTS verification_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    enrollee_id TEXT NOT NULL,
    timestamp   TEXT NOT NULL,
    success     INTEGER NOT NULL,
    details     TEXT NOT NULL
);
";

/// Path-holding handle to the attendance database. Cheap to clone; each
/// operation opens and closes its own connection.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Create the database file (and parent directory) if needed and make
    /// sure the schema exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(StoreError::backend)?;
        }

        let db = Self { path };
        db.connect()?
            .execute_batch(SCHEMA)
            .map_err(StoreError::backend)?;
        tracing::info!(path = %db.path.display(), "attendance database ready");
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path).map_err(StoreError::backend)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(StoreError::backend)?;
        Ok(conn)
    }
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(StoreError::backend)
}

pub(crate) fn parse_time(s: &str) -> Result<NaiveTime, StoreError> {
    NaiveTime::parse_from_str(s, TIME_FORMAT).map_err(StoreError::backend)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map_err(StoreError::backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("nested").join("school.db")).unwrap();
        assert!(db.path().exists());

        let conn = db.connect().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for table in ["attendance", "emotion_samples", "students", "verification_log"] {
            assert!(tables.iter().any(|t| t == table), "missing {table}");
        }
    }

    #[test]
    fn test_open_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("school.db");
        Database::open(&path).unwrap();
        Database::open(&path).unwrap();
    }

    #[test]
    fn test_timestamp_format_round_trips() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_milli_opt(8, 15, 30, 250)
            .unwrap();
        let text = ts.format(TIMESTAMP_FORMAT).to_string();
        assert_eq!(text, "2024-03-04T08:15:30.250");
        assert_eq!(parse_timestamp(&text).unwrap(), ts);
    }
}
