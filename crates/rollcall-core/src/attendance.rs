//! Attendance records and the once-per-day recording rule.

use crate::emotion::Emotion;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceMethod {
    Manual,
    FacialRecognition,
}

impl AttendanceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceMethod::Manual => "manual",
            AttendanceMethod::FacialRecognition => "facial_recognition",
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for AttendanceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(ParseEnumError { kind: "attendance status", value: other.to_string() }),
        }
    }
}

impl FromStr for AttendanceMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(AttendanceMethod::Manual),
            "facial_recognition" => Ok(AttendanceMethod::FacialRecognition),
            other => Err(ParseEnumError { kind: "attendance method", value: other.to_string() }),
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for AttendanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attendance row. `(enrollee_id, date)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub enrollee_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AttendanceStatus,
    pub method: AttendanceMethod,
    pub emotion: Option<Emotion>,
}

impl AttendanceRecord {
    /// A `present` row produced by a face match at `when`. Time is kept
    /// to whole seconds, the resolution attendance rows are stored at.
    pub fn recognized(enrollee_id: impl Into<String>, when: NaiveDateTime, emotion: Option<Emotion>) -> Self {
        Self {
            enrollee_id: enrollee_id.into(),
            date: when.date(),
            time: when.time().trunc_subsecs(0),
            status: AttendanceStatus::Present,
            method: AttendanceMethod::FacialRecognition,
            emotion,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("attendance for {enrollee_id} on {date} already exists")]
    Duplicate { enrollee_id: String, date: NaiveDate },
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Persistence contract for attendance rows.
///
/// `insert_attendance` must enforce the `(enrollee_id, date)` uniqueness
/// itself and report a clash as [`StoreError::Duplicate`]; the recorder
/// relies on that when two writers race past the lookup.
pub trait AttendanceStore: Send + Sync {
    fn find_by_enrollee_and_date(
        &self,
        enrollee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;
}

impl<S: AttendanceStore + ?Sized> AttendanceStore for Arc<S> {
    fn find_by_enrollee_and_date(
        &self,
        enrollee_id: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        (**self).find_by_enrollee_and_date(enrollee_id, date)
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        (**self).insert_attendance(record)
    }
}

/// Result of a recording attempt. Both variants are normal outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(AttendanceRecord),
    AlreadyRecorded { enrollee_id: String, date: NaiveDate },
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded(_))
    }
}

/// Turns positive matches into at most one attendance row per enrollee
/// per calendar day.
pub struct AttendanceRecorder<S> {
    store: S,
}

impl<S: AttendanceStore> AttendanceRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn record(&self, enrollee_id: &str, when: NaiveDateTime) -> Result<RecordOutcome, StoreError> {
        self.record_with_emotion(enrollee_id, when, None)
    }

    /// Record attendance, storing the emotion observed with the match.
    pub fn record_with_emotion(
        &self,
        enrollee_id: &str,
        when: NaiveDateTime,
        emotion: Option<Emotion>,
    ) -> Result<RecordOutcome, StoreError> {
        let date = when.date();
        let already = || RecordOutcome::AlreadyRecorded {
            enrollee_id: enrollee_id.to_string(),
            date,
        };

        if self.store.find_by_enrollee_and_date(enrollee_id, date)?.is_some() {
            tracing::debug!(enrollee_id, %date, "attendance already recorded today");
            return Ok(already());
        }

        let record = AttendanceRecord::recognized(enrollee_id, when, emotion);
        match self.store.insert_attendance(&record) {
            Ok(()) => {
                tracing::info!(enrollee_id, %date, time = %record.time, "attendance recorded");
                Ok(RecordOutcome::Recorded(record))
            }
            Err(StoreError::Duplicate { .. }) => {
                tracing::debug!(enrollee_id, %date, "concurrent insert won; attendance already recorded");
                Ok(already())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory store enforcing the uniqueness rule on insert. With
    /// `blind_lookup` set, lookups never find anything, which simulates a
    /// second writer racing between lookup and insert.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<AttendanceRecord>>,
        blind_lookup: bool,
    }

    impl AttendanceStore for MemoryStore {
        fn find_by_enrollee_and_date(
            &self,
            enrollee_id: &str,
            date: NaiveDate,
        ) -> Result<Option<AttendanceRecord>, StoreError> {
            if self.blind_lookup {
                return Ok(None);
            }
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .find(|r| r.enrollee_id == enrollee_id && r.date == date)
                .cloned())
        }

        fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            if rows
                .iter()
                .any(|r| r.enrollee_id == record.enrollee_id && r.date == record.date)
            {
                return Err(StoreError::Duplicate {
                    enrollee_id: record.enrollee_id.clone(),
                    date: record.date,
                });
            }
            rows.push(record.clone());
            Ok(())
        }
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_first_record_of_the_day() {
        let recorder = AttendanceRecorder::new(MemoryStore::default());
        let outcome = recorder.record("S1", at(4, 8, 5)).unwrap();

        let RecordOutcome::Recorded(record) = outcome else {
            panic!("expected Recorded");
        };
        assert_eq!(record.status, AttendanceStatus::Present);
        assert_eq!(record.method, AttendanceMethod::FacialRecognition);
        assert_eq!(record.time, NaiveTime::from_hms_opt(8, 5, 0).unwrap());
        assert_eq!(record.emotion, None);
    }

    #[test]
    fn test_recorded_time_drops_subseconds() {
        let when = at(4, 8, 5) + chrono::Duration::milliseconds(734);
        let record = AttendanceRecord::recognized("S1", when, None);
        assert_eq!(record.time, NaiveTime::from_hms_opt(8, 5, 0).unwrap());
        assert_eq!(record.date, when.date());
    }

    #[test]
    fn test_dedup_invariant_same_day() {
        let recorder = AttendanceRecorder::new(MemoryStore::default());
        let outcomes: Vec<_> = (0..5)
            .map(|i| recorder.record("S1", at(4, 8 + i, 0)).unwrap())
            .collect();

        assert_eq!(outcomes.iter().filter(|o| o.is_recorded()).count(), 1);
        assert!(outcomes[0].is_recorded());
        for outcome in &outcomes[1..] {
            assert_eq!(
                outcome,
                &RecordOutcome::AlreadyRecorded {
                    enrollee_id: "S1".into(),
                    date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                }
            );
        }
        assert_eq!(recorder.store().rows.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_new_day_records_again() {
        let recorder = AttendanceRecorder::new(MemoryStore::default());
        assert!(recorder.record("S1", at(4, 23, 59)).unwrap().is_recorded());
        assert!(recorder.record("S1", at(5, 0, 1)).unwrap().is_recorded());
        assert!(recorder.record("S2", at(5, 0, 2)).unwrap().is_recorded());
        assert_eq!(recorder.store().rows.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_racing_insert_reports_already_recorded() {
        let recorder = AttendanceRecorder::new(MemoryStore {
            blind_lookup: true,
            ..Default::default()
        });
        assert!(recorder.record("S1", at(4, 8, 0)).unwrap().is_recorded());
        assert!(!recorder.record("S1", at(4, 9, 0)).unwrap().is_recorded());
        assert_eq!(recorder.store().rows.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_emotion_stored_on_record() {
        let recorder = AttendanceRecorder::new(Arc::new(MemoryStore::default()));
        let outcome = recorder
            .record_with_emotion("S1", at(4, 8, 0), Some(Emotion::Happy))
            .unwrap();
        let RecordOutcome::Recorded(record) = outcome else {
            panic!("expected Recorded");
        };
        assert_eq!(record.emotion, Some(Emotion::Happy));
    }

    #[test]
    fn test_status_and_method_names() {
        assert_eq!("late".parse::<AttendanceStatus>(), Ok(AttendanceStatus::Late));
        assert_eq!(
            "facial_recognition".parse::<AttendanceMethod>(),
            Ok(AttendanceMethod::FacialRecognition)
        );
        assert!("tardy".parse::<AttendanceStatus>().is_err());
    }
}
