//! Recognition pipeline run on every Nth captured frame: match the face
//! against the catalog, classify the emotion, record attendance.

use crate::capture_loop::FrameProcessor;
use chrono::NaiveDateTime;
use rollcall_core::{
    AttendanceRecord, AttendanceRecorder, AttendanceStore, EmotionClassifier, EmotionLog,
    EmotionReading, EmotionSample, EuclideanMatcher, FaceEncoder, IdentityDirectory, MatchResult,
    Matcher, RecordOutcome, StudentProfile,
};
use rollcall_hw::Frame;
use rollcall_store::EncodingStore;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

/// What recognition on one frame did to attendance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttendanceUpdate {
    NoFace,
    NoMatch,
    Recorded {
        record: AttendanceRecord,
        confidence: f32,
        student: Option<StudentProfile>,
    },
    AlreadyRecorded {
        enrollee_id: String,
        confidence: f32,
        student: Option<StudentProfile>,
    },
    /// The frame was unusable or a backend failed; no signal this tick.
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionOutcome {
    pub at: NaiveDateTime,
    pub attendance: AttendanceUpdate,
    pub emotion: Option<EmotionReading>,
}

pub type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

pub struct AttendancePipeline {
    encoder: Arc<Mutex<FaceEncoder>>,
    catalog: Arc<EncodingStore>,
    matcher: EuclideanMatcher,
    emotion: Option<EmotionClassifier>,
    recorder: AttendanceRecorder<Arc<dyn AttendanceStore>>,
    directory: Arc<dyn IdentityDirectory>,
    emotion_log: Arc<dyn EmotionLog>,
    clock: Clock,
}

impl AttendancePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        encoder: Arc<Mutex<FaceEncoder>>,
        catalog: Arc<EncodingStore>,
        matcher: EuclideanMatcher,
        emotion: Option<EmotionClassifier>,
        attendance: Arc<dyn AttendanceStore>,
        directory: Arc<dyn IdentityDirectory>,
        emotion_log: Arc<dyn EmotionLog>,
    ) -> Self {
        Self {
            encoder,
            catalog,
            matcher,
            emotion,
            recorder: AttendanceRecorder::new(attendance),
            directory,
            emotion_log,
            clock: Box::new(|| chrono::Local::now().naive_local()),
        }
    }

    /// Replace the wall clock (local time).
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn run(&mut self, frame: &Frame) -> RecognitionOutcome {
        let at = (self.clock)();
        if frame.is_dark {
            tracing::debug!(sequence = frame.sequence, "dark frame; skipping recognition");
            return RecognitionOutcome {
                at,
                attendance: AttendanceUpdate::Skipped {
                    reason: "dark frame".into(),
                },
                emotion: None,
            };
        }

        let emotion = self
            .emotion
            .as_mut()
            .map(|classifier| classifier.classify(&frame.data, frame.width, frame.height));
        let attendance = self.identify(frame, at, emotion.as_ref());

        if let Some(reading) = &emotion {
            let enrollee_id = match &attendance {
                AttendanceUpdate::Recorded { record, .. } => Some(record.enrollee_id.clone()),
                AttendanceUpdate::AlreadyRecorded { enrollee_id, .. } => Some(enrollee_id.clone()),
                _ => None,
            };
            let sample = EmotionSample::new(reading, enrollee_id, at);
            if let Err(e) = self.emotion_log.append(&sample) {
                tracing::warn!(error = %e, "failed to log emotion sample");
            }
        }

        RecognitionOutcome {
            at,
            attendance,
            emotion,
        }
    }

    fn identify(&self, frame: &Frame, at: NaiveDateTime, emotion: Option<&EmotionReading>) -> AttendanceUpdate {
        let probe = {
            let mut encoder = self.encoder.lock().unwrap_or_else(PoisonError::into_inner);
            encoder.probe(&frame.data, frame.width, frame.height)
        };
        let vector = match probe {
            Ok(Some(vector)) => vector,
            Ok(None) => return AttendanceUpdate::NoFace,
            Err(e) => {
                tracing::warn!(error = %e, "face encoding failed");
                return AttendanceUpdate::Skipped { reason: e.to_string() };
            }
        };

        let catalog = self.catalog.snapshot();
        let (enrollee_id, confidence) = match self.matcher.compare(&vector, &catalog) {
            MatchResult::Match {
                enrollee_id,
                confidence,
                distance,
            } => {
                tracing::debug!(%enrollee_id, confidence, distance, "face matched");
                (enrollee_id, confidence)
            }
            MatchResult::NoMatch => return AttendanceUpdate::NoMatch,
        };

        let student = match self.directory.lookup(&enrollee_id) {
            Ok(student) => student,
            Err(e) => {
                tracing::warn!(%enrollee_id, error = %e, "student lookup failed");
                None
            }
        };

        match self
            .recorder
            .record_with_emotion(&enrollee_id, at, emotion.map(|r| r.label))
        {
            Ok(RecordOutcome::Recorded(record)) => AttendanceUpdate::Recorded {
                record,
                confidence,
                student,
            },
            Ok(RecordOutcome::AlreadyRecorded { enrollee_id, .. }) => AttendanceUpdate::AlreadyRecorded {
                enrollee_id,
                confidence,
                student,
            },
            Err(e) => {
                tracing::warn!(%enrollee_id, error = %e, "attendance write failed");
                AttendanceUpdate::Skipped { reason: e.to_string() }
            }
        }
    }
}

impl FrameProcessor for AttendancePipeline {
    type Output = RecognitionOutcome;

    fn process(&mut self, frame: &Frame) -> RecognitionOutcome {
        self.run(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rollcall_core::detector::{DetectorError, FaceLocator};
    use rollcall_core::embedder::{EmbedderError, FaceEmbedder};
    use rollcall_core::emotion::{Emotion, EmotionBackend, EmotionDistribution, EmotionError};
    use rollcall_core::BoundingBox;
    use rollcall_store::Database;

    /// Finds a face whenever the first pixel is at least 100.
    struct PixelLocator;

    impl FaceLocator for PixelLocator {
        fn locate(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            if frame.first().copied().unwrap_or(0) < 100 {
                return Ok(vec![]);
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
                confidence: 0.9,
            }])
        }
    }

    /// Signature is the first pixel scaled to [0, 1], padded to 2D.
    struct PixelEmbedder;

    impl FaceEmbedder for PixelEmbedder {
        fn embed(&mut self, frame: &[u8], _: u32, _: u32, _: &BoundingBox) -> Result<Vec<f32>, EmbedderError> {
            Ok(vec![frame[0] as f32 / 255.0, 0.0])
        }
    }

    struct HappyBackend;

    impl EmotionBackend for HappyBackend {
        fn distribution(&mut self, _: &[u8], _: u32, _: u32) -> Result<EmotionDistribution, EmotionError> {
            Ok([(Emotion::Happy, 0.8), (Emotion::Neutral, 0.2)].into_iter().collect())
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn pipeline(dir: &tempfile::TempDir) -> (AttendancePipeline, Database) {
        let db = Database::open(dir.path().join("school.db")).unwrap();
        let catalog = Arc::new(EncodingStore::open(dir.path().join("encodings.json")));
        // Pixel 204 -> 0.8, pixel 255 -> 1.0.
        catalog.upsert("S1", vec![0.8, 0.0]).unwrap();
        catalog.upsert("S2", vec![0.0, 0.0]).unwrap();

        let encoder = FaceEncoder::new(Box::new(PixelLocator), Box::new(PixelEmbedder));
        let shared = Arc::new(db.clone());
        let pipeline = AttendancePipeline::new(
            Arc::new(Mutex::new(encoder)),
            catalog,
            EuclideanMatcher::default(),
            Some(EmotionClassifier::new(Box::new(HappyBackend), 0.3)),
            shared.clone(),
            shared.clone(),
            shared,
        )
        .with_clock(Box::new(noon));
        (pipeline, db)
    }

    fn frame(pixel: u8) -> Frame {
        Frame::from_gray(vec![pixel; 4], 2, 2, 0).unwrap()
    }

    #[test]
    fn test_match_records_once_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, db) = pipeline(&dir);

        let first = pipeline.run(&frame(204));
        let AttendanceUpdate::Recorded { record, confidence, .. } = &first.attendance else {
            panic!("expected Recorded, got {:?}", first.attendance);
        };
        assert_eq!(record.enrollee_id, "S1");
        assert_eq!(record.emotion, Some(Emotion::Happy));
        assert!((confidence - 1.0).abs() < 1e-5);

        let second = pipeline.run(&frame(204));
        assert!(matches!(
            second.attendance,
            AttendanceUpdate::AlreadyRecorded { ref enrollee_id, .. } if enrollee_id == "S1"
        ));
        assert_eq!(db.recent_for_date(noon().date(), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_no_face_and_no_match() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _db) = pipeline(&dir);
        let mut pipeline = AttendancePipeline {
            matcher: EuclideanMatcher::new(0.1),
            ..pipeline
        };

        assert_eq!(pipeline.run(&frame(50)).attendance, AttendanceUpdate::NoFace);
        // Pixel 128 encodes to about 0.5: 0.3 from S1 and 0.5 from S2.
        assert_eq!(pipeline.run(&frame(128)).attendance, AttendanceUpdate::NoMatch);
    }

    #[test]
    fn test_dark_frame_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, _db) = pipeline(&dir);
        let outcome = pipeline.run(&frame(0));
        assert!(matches!(outcome.attendance, AttendanceUpdate::Skipped { .. }));
        assert_eq!(outcome.emotion, None);
    }

    #[test]
    fn test_emotion_sample_attributed_to_match() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, db) = pipeline(&dir);
        pipeline.run(&frame(204));
        pipeline.run(&frame(50));

        let day = noon().date();
        let samples = db.samples(None, day, day).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].enrollee_id.as_deref(), Some("S1"));
        assert_eq!(samples[1].enrollee_id, None);
        assert_eq!(samples[0].label, Emotion::Happy);
    }
}
