use crate::capture_loop::CaptureLoop;
use crate::enrollment::{self, EnrollmentError};
use crate::pipeline::AttendancePipeline;
use crate::status::LiveStatus;
use chrono::{Days, Local};
use rollcall_core::types::UpsertOutcome;
use rollcall_core::{EmotionLog, EuclideanMatcher, FaceEncoder, IdentityDirectory};
use rollcall_store::attendance::DEFAULT_RECENT_LIMIT;
use rollcall_store::{Database, EncodingStore};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Attendance1";
pub const OBJECT_PATH: &str = "/org/rollcall/Attendance1";

/// Shared handles the D-Bus methods work with.
#[derive(Clone)]
pub struct AppState {
    pub capture: Arc<Mutex<CaptureLoop<AttendancePipeline>>>,
    pub live: Arc<Mutex<LiveStatus>>,
    pub encoder: Arc<Mutex<FaceEncoder>>,
    pub catalog: Arc<EncodingStore>,
    pub db: Database,
    pub matcher: EuclideanMatcher,
    pub emotion_enabled: bool,
    pub history_floor: f32,
}

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    state: AppState,
}

impl AttendanceService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    async fn blocking<T, F>(&self, work: F) -> zbus::fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(AppState) -> zbus::fdo::Result<T> + Send + 'static,
    {
        let state = self.state.clone();
        tokio::task::spawn_blocking(move || work(state))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("worker task failed: {e}")))?
    }
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json(value: &impl serde::Serialize) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

fn enrollment_error(e: EnrollmentError) -> zbus::fdo::Error {
    match e {
        EnrollmentError::EmptyId | EnrollmentError::Image(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        other => failed(other),
    }
}

fn status_snapshot(state: &AppState) -> serde_json::Value {
    let (active, session, camera_index) = {
        let capture = state.capture.lock().unwrap_or_else(PoisonError::into_inner);
        (capture.is_active(), capture.session(), capture.settings().camera_index)
    };
    let live = state.live.lock().unwrap_or_else(PoisonError::into_inner).clone();

    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "state": if active { "active" } else { "idle" },
        "session": session.map(|s| s.to_string()),
        "camera_index": camera_index,
        "enrolled": state.catalog.snapshot().len(),
        "emotion_enabled": state.emotion_enabled,
        "live": live,
    })
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Start the capture loop. Returns the capture session id.
    async fn start(&self) -> zbus::fdo::Result<String> {
        self.blocking(|state| {
            let mut capture = state.capture.lock().unwrap_or_else(PoisonError::into_inner);
            let session = capture.start().map_err(failed)?;
            *state.live.lock().unwrap_or_else(PoisonError::into_inner) = LiveStatus::default();
            Ok(session.to_string())
        })
        .await
    }

    /// Stop the capture loop. Returns false if it was not running.
    async fn stop(&self) -> zbus::fdo::Result<bool> {
        self.blocking(|state| {
            Ok(state
                .capture
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .stop())
        })
        .await
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        // The capture lock is held across a worker join during Stop.
        let snapshot = self.blocking(|state| Ok(status_snapshot(&state))).await?;
        to_json(&snapshot)
    }

    /// Enroll (or re-enroll) a face from a photo on disk.
    async fn enroll(&self, enrollee_id: &str, image_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(enrollee_id, image_path, "enroll requested");
        let enrollee_id = enrollee_id.to_string();
        let image = PathBuf::from(image_path);
        self.blocking(move |state| {
            let outcome = enrollment::enroll_from_image(&state.encoder, &state.catalog, &enrollee_id, &image)
                .map_err(enrollment_error)?;
            to_json(&serde_json::json!({
                "enrollee_id": enrollee_id,
                "outcome": match outcome {
                    UpsertOutcome::Inserted => "inserted",
                    UpsertOutcome::Replaced => "replaced",
                },
            }))
        })
        .await
    }

    /// Check whether the face in a photo belongs to the given enrollee.
    async fn verify(&self, enrollee_id: &str, image_path: &str) -> zbus::fdo::Result<String> {
        tracing::info!(enrollee_id, image_path, "verify requested");
        let enrollee_id = enrollee_id.to_string();
        let image = PathBuf::from(image_path);
        self.blocking(move |state| {
            let verification = enrollment::verify_from_image(
                &state.encoder,
                &state.catalog,
                &state.matcher,
                &state.db,
                &enrollee_id,
                &image,
                Local::now().naive_local(),
            )
            .map_err(enrollment_error)?;
            to_json(&verification)
        })
        .await
    }

    /// List enrolled ids with their directory names.
    async fn list_enrollees(&self) -> zbus::fdo::Result<String> {
        self.blocking(|state| {
            let catalog = state.catalog.snapshot();
            let mut entries = Vec::with_capacity(catalog.len());
            for id in catalog.ids() {
                let name = state.db.lookup(id).map_err(failed)?.map(|p| p.display_name());
                entries.push(serde_json::json!({ "enrollee_id": id, "name": name }));
            }
            to_json(&entries)
        })
        .await
    }

    /// Remove an enrolled signature.
    async fn remove_enrollee(&self, enrollee_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(enrollee_id, "remove requested");
        let enrollee_id = enrollee_id.to_string();
        self.blocking(move |state| state.catalog.remove(&enrollee_id).map_err(failed))
            .await
    }

    /// Today's attendance, newest first.
    async fn today(&self) -> zbus::fdo::Result<String> {
        self.blocking(|state| {
            let today = Local::now().date_naive();
            let rows = state
                .db
                .recent_for_date(today, DEFAULT_RECENT_LIMIT)
                .map_err(failed)?;
            to_json(&rows)
        })
        .await
    }

    /// Emotion trend summary over the last `days` days. An empty id
    /// covers every sample.
    async fn emotion_trends(&self, enrollee_id: &str, days: u32) -> zbus::fdo::Result<String> {
        let enrollee_id = (!enrollee_id.is_empty()).then(|| enrollee_id.to_string());
        self.blocking(move |state| {
            let to = Local::now().date_naive();
            let from = to
                .checked_sub_days(Days::new(u64::from(days.max(1) - 1)))
                .unwrap_or(to);
            let tally = state
                .db
                .tally(enrollee_id.as_deref(), from, to, state.history_floor)
                .map_err(failed)?;
            to_json(&serde_json::json!({
                "enrollee_id": enrollee_id,
                "from": from,
                "to": to,
                "summary": tally.summary(),
            }))
        })
        .await
    }
}
