//! Student directory lookups.

use crate::db::Database;
use rollcall_core::{IdentityDirectory, StoreError, StudentProfile};
use rusqlite::{params, OptionalExtension};

impl IdentityDirectory for Database {
    fn lookup(&self, enrollee_id: &str) -> Result<Option<StudentProfile>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, first_name, last_name, code, level, grade, section
             FROM students WHERE id = ?1",
            params![enrollee_id],
            |row| {
                Ok(StudentProfile {
                    enrollee_id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                    code: row.get(3)?,
                    level: row.get(4)?,
                    grade: row.get(5)?,
                    section: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::backend)
    }
}

impl Database {
    /// Insert or refresh a student row. The engine itself only reads the
    /// directory; this is for imports from the school records system.
    pub fn upsert_student(&self, profile: &StudentProfile) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO students (id, first_name, last_name, code, level, grade, section)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                code = excluded.code,
                level = excluded.level,
                grade = excluded.grade,
                section = excluded.section",
            params![
                profile.enrollee_id,
                profile.first_name,
                profile.last_name,
                profile.code,
                profile.level,
                profile.grade,
                profile.section,
            ],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }
}
