use anyhow::{Context, Result};
use rollcall_core::ferplus::FerPlusBackend;
use rollcall_core::{EmotionClassifier, EuclideanMatcher, FaceEncoder};
use rollcall_hw::{Camera, CameraError, FrameSource};
use rollcall_store::{Database, EncodingStore};
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;

mod capture_loop;
mod config;
mod dbus_interface;
mod enrollment;
mod pipeline;
mod status;

use capture_loop::{CaptureLoop, LoopSettings};
use config::Config;
use dbus_interface::{AppState, AttendanceService, BUS_NAME, OBJECT_PATH};
use pipeline::AttendancePipeline;
use status::LiveStatus;

fn open_camera(index: u32) -> Result<Box<dyn FrameSource>, CameraError> {
    Ok(Box::new(Camera::open(index)?))
}

/// Emotion classification is optional: a missing model only disables it.
fn load_emotion(config: &Config) -> Option<EmotionClassifier> {
    if !config.emotion_enabled {
        tracing::info!("emotion classification disabled");
        return None;
    }
    let path = config.emotion_model_path();
    match FerPlusBackend::load(&path) {
        Ok(backend) => {
            tracing::info!(path = %path, "emotion model loaded");
            Some(EmotionClassifier::new(Box::new(backend), config.emotion_floor))
        }
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "emotion model unavailable; continuing without it");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration");

    let db = Database::open(config.db_path()).context("opening attendance database")?;
    let catalog = Arc::new(EncodingStore::open(config.catalog_path()));
    tracing::info!(enrolled = catalog.snapshot().len(), "encoding catalog ready");

    let encoder = FaceEncoder::load_onnx(&config.detector_model_path(), &config.embedder_model_path())
        .context("loading face models")?;
    let encoder = Arc::new(Mutex::new(encoder));
    let matcher = EuclideanMatcher::new(config.match_threshold);

    let shared_db = Arc::new(db.clone());
    let pipeline = AttendancePipeline::new(
        encoder.clone(),
        catalog.clone(),
        matcher,
        load_emotion(&config),
        shared_db.clone(),
        shared_db.clone(),
        shared_db,
    );

    let settings = LoopSettings {
        camera_index: config.camera_index,
        tick_interval: config.tick_interval(),
        recognition_interval: config.recognition_interval,
    };
    let (capture, events) = CaptureLoop::new(settings, Box::new(open_camera), pipeline);

    let live = Arc::new(Mutex::new(LiveStatus::default()));
    tokio::spawn(status::consume_events(events, live.clone()));

    let state = AppState {
        capture: Arc::new(Mutex::new(capture)),
        live,
        encoder,
        catalog,
        db,
        matcher,
        emotion_enabled: config.emotion_enabled,
        history_floor: config.emotion_history_floor,
    };
    let capture = state.capture.clone();

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceService::new(state))?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    tokio::task::spawn_blocking(move || {
        capture.lock().unwrap_or_else(PoisonError::into_inner).stop();
    })
    .await?;

    Ok(())
}
