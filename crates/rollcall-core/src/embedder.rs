//! Face embedding via ONNX Runtime.
//!
//! Crops the detected face (plus a small margin), resizes it to the
//! model's square input and returns the L2-normalized output vector.
//! The embedding model itself is interchangeable; only its input size
//! and normalization are fixed here.

use crate::detector::gray_image;
use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBEDDER_INPUT_SIZE: u32 = 112;
const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;
/// Fraction of the box size added on every side before cropping.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face box lies outside the {width}x{height} frame")]
    EmptyCrop { width: u32, height: u32 },
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Reduces one face region of a grayscale frame to a fixed-length vector.
pub trait FaceEmbedder: Send {
    fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Vec<f32>, EmbedderError>;
}

/// ONNX face embedding model taking a 112x112 3-channel crop.
pub struct OnnxEmbedder {
    session: Session,
}

impl OnnxEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face embedding model"
        );

        Ok(Self { session })
    }

    fn preprocess(crop: &GrayImage) -> Array4<f32> {
        let size = EMBEDDER_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in crop.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            if x >= size || y >= size {
                continue;
            }
            let normalized = (pixel.0[0] as f32 - EMBEDDER_MEAN) / EMBEDDER_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }

        tensor
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<Vec<f32>, EmbedderError> {
        let crop = crop_face(frame, width, height, face)?;
        let input = Self::preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(EmbedderError::InferenceFailed("model returned an empty embedding".into()));
        }

        Ok(l2_normalize(raw.to_vec()))
    }
}

/// Crop `face` (grown by the margin and clamped to the frame) and resize it
/// to the embedder's square input.
pub fn crop_face(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
) -> Result<GrayImage, EmbedderError> {
    let gray = gray_image(frame, width, height).ok_or(EmbedderError::InvalidFrame {
        expected: width as usize * height as usize,
        actual: frame.len(),
    })?;

    let margin_x = face.width * CROP_MARGIN;
    let margin_y = face.height * CROP_MARGIN;
    let x0 = (face.x - margin_x).floor().clamp(0.0, width as f32) as u32;
    let y0 = (face.y - margin_y).floor().clamp(0.0, height as f32) as u32;
    let x1 = (face.x + face.width + margin_x).ceil().clamp(0.0, width as f32) as u32;
    let y1 = (face.y + face.height + margin_y).ceil().clamp(0.0, height as f32) as u32;

    if x1 <= x0 || y1 <= y0 {
        return Err(EmbedderError::EmptyCrop { width, height });
    }

    let crop = imageops::crop_imm(&gray, x0, y0, x1 - x0, y1 - y0).to_image();
    Ok(imageops::resize(
        &crop,
        EMBEDDER_INPUT_SIZE,
        EMBEDDER_INPUT_SIZE,
        FilterType::Triangle,
    ))
}

/// Scale a vector to unit length. A zero vector is returned unchanged.
pub fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
