//! SQLite-backed emotion sample log.

use crate::db::{parse_timestamp, Database, DATE_FORMAT, TIMESTAMP_FORMAT};
use chrono::{Days, NaiveDate};
use rollcall_core::emotion::{Emotion, EmotionDistribution};
use rollcall_core::{EmotionLog, EmotionSample, StoreError};
use rusqlite::params;

impl EmotionLog for Database {
    fn append(&self, sample: &EmotionSample) -> Result<(), StoreError> {
        let distribution = serde_json::to_string(&sample.distribution).map_err(StoreError::backend)?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO emotion_samples (enrollee_id, label, confidence, distribution, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                sample.enrollee_id,
                sample.label.as_str(),
                sample.confidence as f64,
                distribution,
                sample.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )
        .map_err(StoreError::backend)?;
        Ok(())
    }

    fn samples(
        &self,
        enrollee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<EmotionSample>, StoreError> {
        // Timestamps sort lexically, so a date string bounds them.
        let lower = from.format(DATE_FORMAT).to_string();
        let upper = to
            .checked_add_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
            .format(DATE_FORMAT)
            .to_string();

        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT enrollee_id, label, confidence, distribution, timestamp
                 FROM emotion_samples
                 WHERE timestamp >= ?1 AND timestamp < ?2
                   AND (?3 IS NULL OR enrollee_id = ?3)
                 ORDER BY timestamp, id",
            )
            .map_err(StoreError::backend)?;

        let rows = stmt
            .query_map(params![lower, upper, enrollee_id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(StoreError::backend)?;

        let mut samples = Vec::new();
        for row in rows {
            let (enrollee_id, label, confidence, distribution, timestamp) =
                row.map_err(StoreError::backend)?;
            samples.push(EmotionSample {
                enrollee_id,
                label: label.parse::<Emotion>().map_err(StoreError::backend)?,
                confidence: confidence as f32,
                distribution: serde_json::from_str::<EmotionDistribution>(&distribution)
                    .map_err(StoreError::backend)?,
                timestamp: parse_timestamp(&timestamp)?,
            });
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use rollcall_core::trends::{Mood, DEFAULT_HISTORY_FLOOR};

    fn at(day: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn sample(id: Option<&str>, label: Emotion, confidence: f32, when: NaiveDateTime) -> EmotionSample {
        EmotionSample {
            enrollee_id: id.map(str::to_string),
            label,
            confidence,
            distribution: [(label, confidence), (Emotion::Neutral, 1.0 - confidence)]
                .into_iter()
                .collect(),
            timestamp: when,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("school.db")).unwrap();
        let logged = sample(Some("S1"), Emotion::Happy, 0.8, at(4, 9));
        db.append(&logged).unwrap();
        db.append(&sample(None, Emotion::Sad, 0.6, at(4, 10))).unwrap();

        let all = db.samples(None, day(4), day(4)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], logged);
        assert_eq!(all[1].enrollee_id, None);

        let mine = db.samples(Some("S1"), day(4), day(4)).unwrap();
        assert_eq!(mine, vec![logged]);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("school.db")).unwrap();
        for d in 3..=6 {
            db.append(&sample(Some("S1"), Emotion::Happy, 0.9, at(d, 23))).unwrap();
        }
        assert_eq!(db.samples(Some("S1"), day(4), day(5)).unwrap().len(), 2);
    }

    #[test]
    fn test_tally_applies_history_floor() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("school.db")).unwrap();
        db.append(&sample(Some("S1"), Emotion::Happy, 0.9, at(4, 8))).unwrap();
        db.append(&sample(Some("S1"), Emotion::Surprised, 0.7, at(4, 9))).unwrap();
        db.append(&sample(Some("S1"), Emotion::Sad, 0.5, at(4, 10))).unwrap();
        db.append(&sample(Some("S2"), Emotion::Angry, 0.9, at(4, 10))).unwrap();

        let tally = db.tally(Some("S1"), day(1), day(7), DEFAULT_HISTORY_FLOOR).unwrap();
        assert_eq!(tally.total(), 2);
        assert_eq!(tally.count(Emotion::Sad), 0);
        assert_eq!(tally.mood(), Mood::Positive);
    }
}
