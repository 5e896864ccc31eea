//! The landmark extractor seam and its ONNX-backed implementation.

use crate::detector::{DetectorError, ScrfdDetector};
use crate::landmarker::{ExpressionClassifier, LandmarkRegressor, LandmarkerError};
use crate::types::FaceDetection;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
pub const LANDMARK_MODEL_FILE: &str = "landmark_68.onnx";
/// Optional. Without it, expressions are not scored.
pub const EXPRESSION_MODEL_FILE: &str = "emotion_ferplus.onnx";

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarks: {0}")]
    Landmarks(#[from] LandmarkerError),
    #[error("extractor lock poisoned by an earlier panic")]
    Poisoned,
}

/// Finds the primary face of an image.
///
/// Implementations are shared across concurrent requests and may block;
/// async callers run them on a blocking thread.
pub trait LandmarkExtractor: Send + Sync {
    fn detect_primary_face(&self, image: &RgbImage) -> Result<Option<FaceDetection>, ExtractorError>;
}

impl<F> LandmarkExtractor for F
where
    F: Fn(&RgbImage) -> Result<Option<FaceDetection>, ExtractorError> + Send + Sync,
{
    fn detect_primary_face(&self, image: &RgbImage) -> Result<Option<FaceDetection>, ExtractorError> {
        self(image)
    }
}

/// `$XDG_DATA_HOME/visaphoto/models`, or `~/.local/share/visaphoto/models`.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var("XDG_DATA_HOME").map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".local/share")
    });
    data_home.join("visaphoto").join("models")
}

struct Models {
    detector: ScrfdDetector,
    landmarks: LandmarkRegressor,
    expression: Option<ExpressionClassifier>,
}

/// SCRFD box, 68-point regressor, and optionally an expression classifier.
///
/// ONNX sessions need exclusive access per run, so calls are serialized.
pub struct OnnxLandmarkExtractor {
    models: Mutex<Models>,
}

impl OnnxLandmarkExtractor {
    pub fn load(model_dir: &Path) -> Result<Self, ExtractorError> {
        let detector = ScrfdDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let landmarks = LandmarkRegressor::load(&model_dir.join(LANDMARK_MODEL_FILE))?;
        let expression = match ExpressionClassifier::load(&model_dir.join(EXPRESSION_MODEL_FILE)) {
            Ok(classifier) => Some(classifier),
            Err(LandmarkerError::ModelNotFound(path)) => {
                tracing::info!(path = %path, "no expression model; neutral expression will not be scored");
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            models: Mutex::new(Models { detector, landmarks, expression }),
        })
    }
}

impl LandmarkExtractor for OnnxLandmarkExtractor {
    fn detect_primary_face(&self, image: &RgbImage) -> Result<Option<FaceDetection>, ExtractorError> {
        let mut models = self.models.lock().map_err(|_| ExtractorError::Poisoned)?;

        let Some(best) = models.detector.detect(image)?.into_iter().next() else {
            return Ok(None);
        };
        let landmarks = models.landmarks.predict(image, &best.bbox)?;
        let neutral_score = match models.expression.as_mut() {
            Some(classifier) => match classifier.neutral_score(image, &best.bbox) {
                Ok(score) => Some(score),
                Err(e) => {
                    tracing::warn!(error = %e, "expression scoring failed");
                    None
                }
            },
            None => None,
        };

        tracing::debug!(confidence = best.score, ?neutral_score, "primary face found");
        Ok(Some(FaceDetection {
            bounding_box: best.bbox,
            landmarks,
            confidence: best.score,
            neutral_score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticFace;

    #[test]
    fn test_closure_is_an_extractor() {
        let face = SyntheticFace::new(50.0, 90.0, 40.0).detection();
        let expected = face.clone();
        let extractor = move |_: &RgbImage| -> Result<Option<FaceDetection>, ExtractorError> { Ok(Some(face.clone())) };
        let found = extractor.detect_primary_face(&RgbImage::new(100, 100)).unwrap();
        assert_eq!(found, Some(expected));
    }

    #[test]
    fn test_missing_models_fail_to_load() {
        let dir = std::env::temp_dir().join("visaphoto-no-models-here");
        match OnnxLandmarkExtractor::load(&dir) {
            Err(ExtractorError::Detector(DetectorError::ModelNotFound(path))) => {
                assert!(path.ends_with(DETECTOR_MODEL_FILE));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loaded models from an empty directory"),
        }
    }
}
