//! FER+ emotion model backend.
//!
//! The FER+ network takes a 64x64 grayscale image with raw 0–255 pixel
//! values and emits eight logits. The whole frame is resized, not a face
//! crop, so imperfect face localization does not block classification.

use crate::detector::gray_image;
use crate::emotion::{Emotion, EmotionBackend, EmotionDistribution, EmotionError};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const FERPLUS_INPUT_SIZE: u32 = 64;

/// FER+ output order. `contempt` has no counterpart in our label set.
const FERPLUS_LABELS: [Option<Emotion>; 8] = [
    Some(Emotion::Neutral),
    Some(Emotion::Happy),
    Some(Emotion::Surprised),
    Some(Emotion::Sad),
    Some(Emotion::Angry),
    Some(Emotion::Disgusted),
    Some(Emotion::Scared),
    None,
];

pub struct FerPlusBackend {
    session: Session,
}

impl FerPlusBackend {
    pub fn load(model_path: &str) -> Result<Self, EmotionError> {
        if !Path::new(model_path).exists() {
            return Err(EmotionError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded FER+ emotion model");
        Ok(Self { session })
    }

    fn preprocess(frame: &[u8], width: u32, height: u32) -> Result<Array4<f32>, EmotionError> {
        let gray = gray_image(frame, width, height).ok_or(EmotionError::InvalidFrame {
            expected: width as usize * height as usize,
            actual: frame.len(),
        })?;
        let resized = imageops::resize(&gray, FERPLUS_INPUT_SIZE, FERPLUS_INPUT_SIZE, FilterType::Triangle);

        let size = FERPLUS_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 1, size, size));
        for (x, y, pixel) in resized.enumerate_pixels() {
            tensor[[0, 0, y as usize, x as usize]] = pixel.0[0] as f32;
        }
        Ok(tensor)
    }
}

impl EmotionBackend for FerPlusBackend {
    fn distribution(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<EmotionDistribution, EmotionError> {
        let input = Self::preprocess(frame, width, height)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmotionError::InferenceFailed(format!("logits: {e}")))?;

        if logits.len() != FERPLUS_LABELS.len() {
            return Err(EmotionError::InferenceFailed(format!(
                "expected {} logits, got {}",
                FERPLUS_LABELS.len(),
                logits.len()
            )));
        }

        Ok(map_distribution(&softmax(logits)))
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 {
        exps.iter().map(|e| e / sum).collect()
    } else {
        vec![0.0; logits.len()]
    }
}

/// Map FER+ probabilities onto the seven labels. Every label is present;
/// the `contempt` mass is dropped, not redistributed.
fn map_distribution(probabilities: &[f32]) -> EmotionDistribution {
    let mut distribution: EmotionDistribution = Emotion::ALL.iter().map(|&e| (e, 0.0)).collect();
    for (label, &p) in FERPLUS_LABELS.iter().zip(probabilities) {
        if let Some(label) = label {
            distribution.insert(*label, p);
        }
    }
    distribution
}
