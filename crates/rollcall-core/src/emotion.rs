//! Emotion classification on full captured frames.
//!
//! The classifier runs independently of identity matching. Backends
//! produce a probability distribution over a closed label set; the
//! classifier turns it into a reading and applies the confidence floor.

use crate::attendance::StoreError;
use crate::trends::EmotionTally;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minimum top-label probability for the label to be reported as-is.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Scared,
    Disgusted,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Scared,
        Emotion::Disgusted,
        Emotion::Neutral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Scared => "scared",
            Emotion::Disgusted => "disgusted",
            Emotion::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}

/// Probability per label, in [0, 1].
pub type EmotionDistribution = BTreeMap<Emotion, f32>;

/// One classification result.
///
/// `label` is forced to `Neutral` when `confidence` is below the floor,
/// while `confidence` and `distribution` still carry the real values.
/// Callers counting non-neutral emotions should read the distribution
/// (see [`EmotionReading::top_label`]); `label` alone undercounts them
/// at low confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub label: Emotion,
    pub confidence: f32,
    pub distribution: EmotionDistribution,
}

impl EmotionReading {
    /// Reading reported when the backend fails.
    pub fn fallback() -> Self {
        Self {
            label: Emotion::Neutral,
            confidence: 0.0,
            distribution: EmotionDistribution::new(),
        }
    }

    /// Most probable label in the distribution, regardless of the floor.
    pub fn top_label(&self) -> Option<Emotion> {
        top_of(&self.distribution).map(|(label, _)| label)
    }
}

/// Highest finite probability; the earliest label wins ties.
fn top_of(distribution: &EmotionDistribution) -> Option<(Emotion, f32)> {
    distribution
        .iter()
        .filter(|(_, p)| p.is_finite())
        .fold(None, |best: Option<(Emotion, f32)>, (&label, &p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((label, p)),
        })
}

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Produces an emotion distribution for a whole grayscale frame.
pub trait EmotionBackend: Send {
    fn distribution(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<EmotionDistribution, EmotionError>;
}

pub struct EmotionClassifier {
    backend: Box<dyn EmotionBackend>,
    floor: f32,
}

impl EmotionClassifier {
    pub fn new(backend: Box<dyn EmotionBackend>, floor: f32) -> Self {
        Self { backend, floor }
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    /// Classify a frame. Never fails: backend errors degrade to
    /// [`EmotionReading::fallback`].
    pub fn classify(&mut self, frame: &[u8], width: u32, height: u32) -> EmotionReading {
        match self.backend.distribution(frame, width, height) {
            Ok(distribution) => self.reading_from(distribution),
            Err(e) => {
                tracing::warn!(error = %e, "emotion classification failed; reporting neutral");
                EmotionReading::fallback()
            }
        }
    }

    /// Apply the confidence floor to a backend distribution.
    pub fn reading_from(&self, distribution: EmotionDistribution) -> EmotionReading {
        let Some((top, probability)) = top_of(&distribution) else {
            return EmotionReading::fallback();
        };

        let confidence = probability.clamp(0.0, 1.0);
        let label = if confidence >= self.floor { top } else { Emotion::Neutral };

        EmotionReading {
            label,
            confidence,
            distribution,
        }
    }
}

/// A logged classification, optionally attributed to a matched enrollee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSample {
    pub enrollee_id: Option<String>,
    pub label: Emotion,
    pub confidence: f32,
    pub distribution: EmotionDistribution,
    pub timestamp: NaiveDateTime,
}

impl EmotionSample {
    pub fn new(reading: &EmotionReading, enrollee_id: Option<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            enrollee_id,
            label: reading.label,
            confidence: reading.confidence,
            distribution: reading.distribution.clone(),
            timestamp,
        }
    }
}

/// Append-only log of emotion samples. No uniqueness rules apply.
pub trait EmotionLog: Send + Sync {
    fn append(&self, sample: &EmotionSample) -> Result<(), StoreError>;

    /// Samples dated `from..=to`, oldest first. `None` selects every
    /// sample, attributed or not.
    fn samples(
        &self,
        enrollee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<EmotionSample>, StoreError>;

    /// Tally the logged samples in `from..=to` whose confidence clears
    /// `floor`.
    fn tally(
        &self,
        enrollee_id: Option<&str>,
        from: NaiveDate,
        to: NaiveDate,
        floor: f32,
    ) -> Result<EmotionTally, StoreError> {
        let mut tally = EmotionTally::new(floor);
        for sample in self.samples(enrollee_id, from, to)? {
            tally.observe(sample.label, sample.confidence);
        }
        Ok(tally)
    }
}
