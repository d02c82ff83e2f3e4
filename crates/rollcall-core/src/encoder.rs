//! Frame → signature reduction: locate faces, then embed one of them.

use crate::detector::{DetectorError, FaceLocator, UltraFaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder, OnnxEmbedder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("no face detected")]
    NoFaceDetected,
}

/// Face detection plus embedding.
///
/// When a frame holds several faces only the first (most confident) one is
/// encoded. Multi-face frames are a known limitation, not an error.
pub struct FaceEncoder {
    locator: Box<dyn FaceLocator>,
    embedder: Box<dyn FaceEmbedder>,
}

impl FaceEncoder {
    pub fn new(locator: Box<dyn FaceLocator>, embedder: Box<dyn FaceEmbedder>) -> Self {
        Self { locator, embedder }
    }

    /// Load the ONNX detector and embedding models.
    pub fn load_onnx(detector_path: &str, embedder_path: &str) -> Result<Self, EncoderError> {
        let locator = UltraFaceDetector::load(detector_path)?;
        let embedder = OnnxEmbedder::load(embedder_path)?;
        Ok(Self::new(Box::new(locator), Box::new(embedder)))
    }

    /// Encode the first face for live matching. `Ok(None)` means the frame
    /// had no face, which is no signal rather than a failure.
    pub fn probe(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<f32>>, EncoderError> {
        let faces = self.locator.locate(frame, width, height)?;
        let Some(face) = faces.first() else {
            return Ok(None);
        };
        if faces.len() > 1 {
            tracing::debug!(count = faces.len(), "multiple faces in frame; using the first");
        }

        let vector = self.embedder.embed(frame, width, height, face)?;
        Ok(Some(vector))
    }

    /// Encode an enrollment photo. A photo without a face is a hard error.
    pub fn enroll(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<f32>, EncoderError> {
        self.probe(frame, width, height)?
            .ok_or(EncoderError::NoFaceDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Locator returning a fixed list of faces.
    pub struct FixedLocator(pub Vec<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    /// Embedder that encodes the face's x coordinate, counting calls.
    pub struct PositionEmbedder(pub Arc<AtomicUsize>);

    impl FaceEmbedder for PositionEmbedder {
        fn embed(
            &mut self,
            _: &[u8],
            _: u32,
            _: u32,
            face: &BoundingBox,
        ) -> Result<Vec<f32>, EmbedderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![face.x, face.y])
        }
    }

    fn face(x: f32) -> BoundingBox {
        BoundingBox { x, y: 1.0, width: 10.0, height: 10.0, confidence: 0.9 }
    }

    #[test]
    fn test_probe_uses_first_face_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut encoder = FaceEncoder::new(
            Box::new(FixedLocator(vec![face(5.0), face(50.0)])),
            Box::new(PositionEmbedder(calls.clone())),
        );
        let vector = encoder.probe(&[], 0, 0).unwrap();
        assert_eq!(vector, Some(vec![5.0, 1.0]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_without_face_is_none() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut encoder = FaceEncoder::new(
            Box::new(FixedLocator(vec![])),
            Box::new(PositionEmbedder(calls.clone())),
        );
        assert_eq!(encoder.probe(&[], 0, 0).unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_enroll_without_face_fails() {
        let mut encoder = FaceEncoder::new(
            Box::new(FixedLocator(vec![])),
            Box::new(PositionEmbedder(Arc::new(AtomicUsize::new(0)))),
        );
        assert!(matches!(encoder.enroll(&[], 0, 0), Err(EncoderError::NoFaceDetected)));
    }

    #[test]
    fn test_load_missing_models() {
        let err = FaceEncoder::load_onnx("/nonexistent/det.onnx", "/nonexistent/emb.onnx");
        assert!(matches!(
            err,
            Err(EncoderError::Detector(DetectorError::ModelNotFound(_)))
        ));
    }
}
