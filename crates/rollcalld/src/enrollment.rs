//! Enrollment and identity verification from still photos.

use chrono::NaiveDateTime;
use rollcall_core::encoder::EncoderError;
use rollcall_core::matcher::verify;
use rollcall_core::types::UpsertOutcome;
use rollcall_core::{EuclideanMatcher, FaceEncoder, StoreError, Verification};
use rollcall_hw::frame::FrameError;
use rollcall_hw::Frame;
use rollcall_store::{Database, EncodingStore, EncodingStoreError, VerificationAttempt};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("enrollee id must not be empty")]
    EmptyId,
    #[error("image: {0}")]
    Image(#[from] FrameError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("catalog: {0}")]
    Catalog(#[from] EncodingStoreError),
    #[error("database: {0}")]
    Store(#[from] StoreError),
}

fn encode_photo(encoder: &Mutex<FaceEncoder>, image: &Path) -> Result<Vec<f32>, EnrollmentError> {
    let frame = Frame::from_image_file(image)?;
    let mut encoder = encoder.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(encoder.enroll(&frame.data, frame.width, frame.height)?)
}

/// Encode the face in `image` and store it as `enrollee_id`'s signature,
/// replacing any earlier one.
pub fn enroll_from_image(
    encoder: &Mutex<FaceEncoder>,
    catalog: &EncodingStore,
    enrollee_id: &str,
    image: &Path,
) -> Result<UpsertOutcome, EnrollmentError> {
    let enrollee_id = enrollee_id.trim();
    if enrollee_id.is_empty() {
        return Err(EnrollmentError::EmptyId);
    }
    let vector = encode_photo(encoder, image)?;
    Ok(catalog.upsert(enrollee_id, vector)?)
}

/// Check that the face in `image` belongs to `enrollee_id`. Every attempt,
/// including one on a photo without a face, lands in the verification log.
pub fn verify_from_image(
    encoder: &Mutex<FaceEncoder>,
    catalog: &EncodingStore,
    matcher: &EuclideanMatcher,
    db: &Database,
    enrollee_id: &str,
    image: &Path,
    now: NaiveDateTime,
) -> Result<Verification, EnrollmentError> {
    let vector = match encode_photo(encoder, image) {
        Ok(vector) => vector,
        Err(e) => {
            db.log_verification(&VerificationAttempt {
                enrollee_id: enrollee_id.to_string(),
                timestamp: now,
                success: false,
                details: e.to_string(),
            })?;
            return Err(e);
        }
    };

    let verification = verify(matcher, enrollee_id, &vector, &catalog.snapshot());
    db.log_verification(&VerificationAttempt::new(enrollee_id, now, &verification))?;
    tracing::info!(enrollee_id, confirmed = verification.is_confirmed(), "verification attempt");
    Ok(verification)
}
