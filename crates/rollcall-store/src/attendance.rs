//! SQLite-backed attendance rows.

use crate::db::{parse_date, parse_time, Database, DATE_FORMAT, TIME_FORMAT};
use chrono::{NaiveDate, NaiveTime};
use rollcall_core::emotion::Emotion;
use rollcall_core::{AttendanceMethod, AttendanceRecord, AttendanceStatus, AttendanceStore, StoreError};
use rusqlite::{params, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::Serialize;

/// Rows returned by `recent_for_date` when the caller has no preference.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// One row of the day's attendance, joined with the student's name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentAttendance {
    pub enrollee_id: String,
    /// Empty when the enrollee has no directory entry.
    pub name: String,
    pub time: NaiveTime,
    pub status: AttendanceStatus,
    pub method: AttendanceMethod,
    pub emotion: Option<Emotion>,
}

struct RawRow {
    enrollee_id: String,
    date: String,
    time: String,
    status: String,
    method: String,
    emotion: Option<String>,
}

impl RawRow {
    fn into_record(self) -> Result<AttendanceRecord, StoreError> {
        Ok(AttendanceRecord {
            date: parse_date(&self.date)?,
            time: parse_time(&self.time)?,
            status: self.status.parse().map_err(StoreError::backend)?,
            method: self.method.parse().map_err(StoreError::backend)?,
            emotion: parse_emotion(self.emotion)?,
            enrollee_id: self.enrollee_id,
        })
    }
}

fn parse_emotion(raw: Option<String>) -> Result<Option<Emotion>, StoreError> {
    raw.map(|s| s.parse::<Emotion>().map_err(StoreError::backend))
        .transpose()
}

impl AttendanceStore for Database {
    fn find_by_enrollee_and_date(
        &self,
        enrollee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT enrollee_id, date, time, status, method, emotion
                 FROM attendance WHERE enrollee_id = ?1 AND date = ?2",
                params![enrollee_id, date.format(DATE_FORMAT).to_string()],
                |row| {
                    Ok(RawRow {
                        enrollee_id: row.get(0)?,
                        date: row.get(1)?,
                        time: row.get(2)?,
                        status: row.get(3)?,
                        method: row.get(4)?,
                        emotion: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::backend)?;

        row.map(RawRow::into_record).transpose()
    }

    /// Check and insert under one immediate transaction; the UNIQUE
    /// constraint still backs it up against writers on other connections.
    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let duplicate = || StoreError::Duplicate {
            enrollee_id: record.enrollee_id.clone(),
            date: record.date,
        };
        let date = record.date.format(DATE_FORMAT).to_string();

        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::backend)?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM attendance WHERE enrollee_id = ?1 AND date = ?2)",
                params![record.enrollee_id, date],
                |row| row.get(0),
            )
            .map_err(StoreError::backend)?;
        if exists {
            return Err(duplicate());
        }

        let inserted = tx.execute(
            "INSERT INTO attendance (enrollee_id, date, time, status, method, emotion)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.enrollee_id,
                date,
                record.time.format(TIME_FORMAT).to_string(),
                record.status.as_str(),
                record.method.as_str(),
                record.emotion.map(|e| e.as_str()),
            ],
        );
        match inserted {
            Ok(_) => tx.commit().map_err(StoreError::backend),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                Err(duplicate())
            }
            Err(e) => Err(StoreError::backend(e)),
        }
    }
}

impl Database {
    /// The day's attendance, newest first, at most `limit` rows.
    pub fn recent_for_date(&self, date: NaiveDate, limit: usize) -> Result<Vec<RecentAttendance>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT a.enrollee_id, a.date, a.time, a.status, a.method, a.emotion,
                        COALESCE(TRIM(s.first_name || ' ' || s.last_name), '')
                 FROM attendance a
                 LEFT JOIN students s ON s.id = a.enrollee_id
                 WHERE a.date = ?1
                 ORDER BY a.time DESC, a.id DESC
                 LIMIT ?2",
            )
            .map_err(StoreError::backend)?;

        let rows = stmt
            .query_map(
                params![date.format(DATE_FORMAT).to_string(), limit as i64],
                |row| {
                    Ok((
                        RawRow {
                            enrollee_id: row.get(0)?,
                            date: row.get(1)?,
                            time: row.get(2)?,
                            status: row.get(3)?,
                            method: row.get(4)?,
                            emotion: row.get(5)?,
                        },
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .map_err(StoreError::backend)?;

        let mut recent = Vec::new();
        for row in rows {
            let (raw, name) = row.map_err(StoreError::backend)?;
            let record = raw.into_record()?;
            recent.push(RecentAttendance {
                enrollee_id: record.enrollee_id,
                name,
                time: record.time,
                status: record.status,
                method: record.method,
                emotion: record.emotion,
            });
        }
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use rollcall_core::{AttendanceRecorder, RecordOutcome, StudentProfile};

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("school.db")).unwrap();
        (dir, db)
    }

    fn row_count(db: &Database) -> i64 {
        db.connect()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_insert_then_find() {
        let (_dir, db) = open();
        let record = AttendanceRecord::recognized("S1", at(4, 8, 5), Some(Emotion::Happy));
        db.insert_attendance(&record).unwrap();

        let found = db
            .find_by_enrollee_and_date("S1", record.date)
            .unwrap()
            .unwrap();
        assert_eq!(found, record);
        assert!(db.find_by_enrollee_and_date("S1", at(5, 0, 0).date()).unwrap().is_none());
        assert!(db.find_by_enrollee_and_date("S2", record.date).unwrap().is_none());
    }

    #[test]
    fn test_recorded_row_matches_stored_row() {
        let (_dir, db) = open();
        let recorder = AttendanceRecorder::new(db.clone());
        let when = at(4, 8, 5) + chrono::Duration::milliseconds(481);

        let RecordOutcome::Recorded(record) = recorder.record("S1", when).unwrap() else {
            panic!("expected Recorded");
        };
        let stored = db.find_by_enrollee_and_date("S1", when.date()).unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[test]
    fn test_unique_constraint_reports_duplicate() {
        let (_dir, db) = open();
        db.insert_attendance(&AttendanceRecord::recognized("S1", at(4, 8, 0), None))
            .unwrap();
        let err = db
            .insert_attendance(&AttendanceRecord::recognized("S1", at(4, 9, 0), None))
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { ref enrollee_id, .. } if enrollee_id == "S1"));
        assert_eq!(row_count(&db), 1);
    }

    #[test]
    fn test_recorder_dedup_against_sqlite() {
        let (_dir, db) = open();
        let recorder = AttendanceRecorder::new(db.clone());

        assert!(recorder.record("S1", at(4, 8, 0)).unwrap().is_recorded());
        assert_eq!(
            recorder.record("S1", at(4, 8, 1)).unwrap(),
            RecordOutcome::AlreadyRecorded {
                enrollee_id: "S1".into(),
                date: at(4, 0, 0).date(),
            }
        );
        assert!(recorder.record("S1", at(5, 8, 0)).unwrap().is_recorded());
        assert_eq!(row_count(&db), 2);
    }

    #[test]
    fn test_recent_for_date_newest_first_with_names() {
        let (_dir, db) = open();
        db.upsert_student(&StudentProfile {
            enrollee_id: "S1".into(),
            first_name: "Ana".into(),
            last_name: "Quispe".into(),
            code: Some("A-001".into()),
            level: None,
            grade: None,
            section: None,
        })
        .unwrap();

        let recorder = AttendanceRecorder::new(db.clone());
        recorder.record("S1", at(4, 8, 0)).unwrap();
        recorder.record("S2", at(4, 8, 30)).unwrap();
        recorder.record("S3", at(4, 7, 45)).unwrap();
        recorder.record("S1", at(5, 9, 0)).unwrap();

        let recent = db.recent_for_date(at(4, 0, 0).date(), DEFAULT_RECENT_LIMIT).unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.enrollee_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S1", "S3"]);
        assert_eq!(recent[1].name, "Ana Quispe");
        assert_eq!(recent[0].name, "");

        let limited = db.recent_for_date(at(4, 0, 0).date(), 1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].enrollee_id, "S2");
    }
}
