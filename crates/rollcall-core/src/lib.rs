//! rollcall-core — Biometric attendance engine.
//!
//! Matches face signatures against an enrolled catalog, classifies
//! emotions on captured frames, and turns positive matches into
//! at-most-once-per-day attendance records. Inference backends run
//! via ONNX Runtime; everything else is plain data and rules.

pub mod attendance;
pub mod detector;
pub mod embedder;
pub mod emotion;
pub mod encoder;
pub mod ferplus;
pub mod identity;
pub mod matcher;
pub mod trends;
pub mod types;

pub use attendance::{
    AttendanceMethod, AttendanceRecord, AttendanceRecorder, AttendanceStatus, AttendanceStore,
    RecordOutcome, StoreError,
};
pub use emotion::{Emotion, EmotionClassifier, EmotionLog, EmotionReading, EmotionSample};
pub use encoder::{EncoderError, FaceEncoder};
pub use identity::{IdentityDirectory, StudentProfile};
pub use matcher::{EuclideanMatcher, Matcher, Verification};
pub use trends::EmotionTally;
pub use types::{BoundingBox, CatalogError, EncodingCatalog, FaceSignature, MatchResult};
