//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the lightweight UltraFace RFB-320 model: the frame is stretched to
//! 320x240, the model emits per-prior face scores and corner-form boxes in
//! normalized coordinates, and overlapping boxes are merged with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ULTRAFACE_INPUT_WIDTH: u32 = 320;
const ULTRAFACE_INPUT_HEIGHT: u32 = 240;
const ULTRAFACE_MEAN: f32 = 127.0;
const ULTRAFACE_STD: f32 = 128.0;
const ULTRAFACE_SCORE_THRESHOLD: f32 = 0.7;
const ULTRAFACE_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Locates face regions in a grayscale frame.
///
/// Implementations return boxes sorted by descending confidence, so the
/// first element is the most confident face.
pub trait FaceLocator: Send {
    fn locate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Wrap a raw grayscale buffer as an image, checking its length.
pub(crate) fn gray_image(frame: &[u8], width: u32, height: u32) -> Option<GrayImage> {
    GrayImage::from_raw(width, height, frame.to_vec())
}

/// UltraFace-based face detector.
pub struct UltraFaceDetector {
    session: Session,
}

impl UltraFaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded UltraFace model"
        );

        Ok(Self { session })
    }

    /// Stretch the frame to the model input and normalize into a NCHW tensor.
    fn preprocess(frame: &[u8], width: u32, height: u32) -> Result<Array4<f32>, DetectorError> {
        let gray = gray_image(frame, width, height).ok_or(DetectorError::InvalidFrame {
            width,
            height,
            expected: width as usize * height as usize,
            actual: frame.len(),
        })?;
        let resized = imageops::resize(
            &gray,
            ULTRAFACE_INPUT_WIDTH,
            ULTRAFACE_INPUT_HEIGHT,
            FilterType::Triangle,
        );

        let mut tensor = Array4::<f32>::zeros((
            1,
            3,
            ULTRAFACE_INPUT_HEIGHT as usize,
            ULTRAFACE_INPUT_WIDTH as usize,
        ));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let normalized = (pixel.0[0] as f32 - ULTRAFACE_MEAN) / ULTRAFACE_STD;
            // Grayscale → 3-channel
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = normalized;
            }
        }

        Ok(tensor)
    }
}

impl FaceLocator for UltraFaceDetector {
    fn locate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = Self::preprocess(frame, width, height)?;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(scores, boxes, width, height, ULTRAFACE_SCORE_THRESHOLD);
        let faces = nms(candidates, ULTRAFACE_NMS_THRESHOLD);
        tracing::trace!(count = faces.len(), "faces located");
        Ok(faces)
    }
}

/// Decode prior scores `[N, 2]` (background, face) and corner boxes `[N, 4]`
/// in normalized coordinates into frame-space boxes above `threshold`.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    width: u32,
    height: u32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let priors = (scores.len() / 2).min(boxes.len() / 4);
    let (w, h) = (width as f32, height as f32);

    (0..priors)
        .filter_map(|i| {
            let confidence = scores[i * 2 + 1];
            if confidence <= threshold {
                return None;
            }
            let x1 = boxes[i * 4].clamp(0.0, 1.0) * w;
            let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * h;
            let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * w;
            let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * h;
            if x2 <= x1 || y2 <= y1 {
                return None;
            }
            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by descending confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<BoundingBox> = Vec::with_capacity(detections.len());
    for det in detections {
        if kept.iter().all(|k| k.iou(&det) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}
