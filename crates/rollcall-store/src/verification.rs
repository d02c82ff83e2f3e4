//! Verification attempt log.

use crate::db::{parse_timestamp, Database, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use rollcall_core::{StoreError, Verification};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationAttempt {
    pub enrollee_id: String,
    pub timestamp: NaiveDateTime,
    pub success: bool,
    pub details: String,
}

impl VerificationAttempt {
    pub fn new(enrollee_id: impl Into<String>, timestamp: NaiveDateTime, verification: &Verification) -> Self {
        let details = match verification {
            Verification::Confirmed { confidence } => format!("confirmed (confidence {confidence:.2})"),
            Verification::Mismatch {
                recognized,
                confidence,
            } => format!("face matched {recognized} (confidence {confidence:.2})"),
            Verification::Unrecognized => "face not recognized".to_string(),
        };
        Self {
            enrollee_id: enrollee_id.into(),
            timestamp,
            success: verification.is_confirmed(),
            details,
        }
    }
}

impl Database {
    pub fn log_verification(&self, attempt: &VerificationAttempt) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO verification_log (enrollee_id, timestamp, success, details)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                attempt.enrollee_id,
                attempt.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                attempt.success,
                attempt.details,
            ],
        )
        .map_err(StoreError::backend)?;
        tracing::debug!(enrollee_id = %attempt.enrollee_id, success = attempt.success, "verification logged");
        Ok(())
    }

    /// Most recent attempts for one enrollee, newest first.
    pub fn verifications_for(&self, enrollee_id: &str, limit: usize) -> Result<Vec<VerificationAttempt>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT enrollee_id, timestamp, success, details
                 FROM verification_log WHERE enrollee_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT ?2",
            )
            .map_err(StoreError::backend)?;
        let rows = stmt
            .query_map(params![enrollee_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(StoreError::backend)?;

        let mut attempts = Vec::new();
        for row in rows {
            let (enrollee_id, timestamp, success, details) = row.map_err(StoreError::backend)?;
            attempts.push(VerificationAttempt {
                enrollee_id,
                timestamp: parse_timestamp(&timestamp)?,
                success,
                details,
            });
        }
        Ok(attempts)
    }
}
