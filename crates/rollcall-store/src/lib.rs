//! rollcall-store — Persistence for the attendance engine.
//!
//! The encoding catalog lives in a single versioned JSON file that is
//! rewritten in full on every change. Attendance rows, emotion samples,
//! verification attempts and the read-only student directory live in
//! SQLite; every operation opens its own connection.

pub mod attendance;
pub mod catalog;
pub mod db;
pub mod directory;
pub mod emotion_log;
pub mod verification;

pub use attendance::RecentAttendance;
pub use catalog::{EncodingStore, EncodingStoreError};
pub use db::Database;
pub use verification::VerificationAttempt;
