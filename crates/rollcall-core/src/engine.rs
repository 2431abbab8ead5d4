//! The vision backend seam: face localization plus embedding extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

/// SCRFD detection model file name inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Locates faces in an RGB image and turns each into an embedding.
pub trait FaceEngine {
    /// Face regions, most confident first.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError>;

    /// One embedding per face, in the same order as `faces`.
    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EngineError>;
}

/// SCRFD + ArcFace running on ONNX Runtime.
pub struct OnnxEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEngine {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EngineError> {
        let scrfd_path = model_dir.join(SCRFD_MODEL_FILE);
        let arcface_path = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd_path.to_string_lossy())?;
        tracing::info!(path = %scrfd_path.display(), "SCRFD detector loaded");
        let recognizer = FaceRecognizer::load(&arcface_path.to_string_lossy())?;
        tracing::info!(path = %arcface_path.display(), "ArcFace recognizer loaded");

        Ok(Self { detector, recognizer })
    }
}

impl FaceEngine for OnnxEngine {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EngineError> {
        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(EngineError::from))
            .collect()
    }
}
