//! Foreground view of the capture loop, fed from its event channel.

use crate::capture_loop::CaptureEvent;
use crate::pipeline::{AttendanceUpdate, RecognitionOutcome};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveStatus {
    pub frames: u64,
    pub dropped: u64,
    pub recognitions: u64,
    pub recorded: u64,
    pub last_frame_sequence: Option<u32>,
    pub last_outcome: Option<RecognitionOutcome>,
}

impl LiveStatus {
    pub fn apply(&mut self, event: &CaptureEvent<RecognitionOutcome>) {
        match event {
            CaptureEvent::Frame { frame, .. } => {
                self.frames += 1;
                self.last_frame_sequence = Some(frame.sequence);
            }
            CaptureEvent::Recognition { outcome, .. } => {
                self.recognitions += 1;
                if matches!(outcome.attendance, AttendanceUpdate::Recorded { .. }) {
                    self.recorded += 1;
                }
                self.last_outcome = Some(outcome.clone());
            }
            CaptureEvent::FrameDropped { .. } => self.dropped += 1,
            CaptureEvent::Stopped { .. } => {}
        }
    }
}

fn log_outcome(outcome: &RecognitionOutcome) {
    let emotion = outcome.emotion.as_ref().map(|r| r.label.as_str());
    match &outcome.attendance {
        AttendanceUpdate::Recorded {
            record,
            confidence,
            student,
        } => tracing::info!(
            enrollee_id = %record.enrollee_id,
            name = %student.as_ref().map(|s| s.display_name()).unwrap_or_default(),
            confidence,
            time = %record.time,
            emotion,
            "attendance recorded"
        ),
        AttendanceUpdate::AlreadyRecorded {
            enrollee_id,
            confidence,
            ..
        } => tracing::debug!(%enrollee_id, confidence, "already recorded today"),
        AttendanceUpdate::NoMatch => tracing::debug!(emotion, "face not recognized"),
        AttendanceUpdate::NoFace => tracing::trace!("no face"),
        AttendanceUpdate::Skipped { reason } => tracing::debug!(%reason, "recognition skipped"),
    }
}

/// Drain capture events into `status` until every sender is gone.
pub async fn consume_events(
    mut events: mpsc::UnboundedReceiver<CaptureEvent<RecognitionOutcome>>,
    status: Arc<Mutex<LiveStatus>>,
) {
    while let Some(event) = events.recv().await {
        match &event {
            CaptureEvent::Recognition { outcome, .. } => log_outcome(outcome),
            CaptureEvent::Stopped { session } => tracing::info!(%session, "capture session ended"),
            _ => {}
        }
        status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(&event);
    }
    tracing::debug!("capture event channel closed");
}
