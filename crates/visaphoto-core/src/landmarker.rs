//! 68-point landmark regressor and optional expression classifier, both via
//! ONNX Runtime, both run on a square crop around a detected face box.

use crate::types::{BoundingBox, LandmarkSet, Point, LANDMARK_COUNT};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 112;
/// Crop side as a multiple of the longer face-box side.
const CROP_MARGIN: f32 = 1.2;

const EXPRESSION_INPUT_SIZE: u32 = 64;
/// Class order of the FER+ expression model; index 0 is neutral.
const EXPRESSION_CLASSES: usize = 8;
const NEUTRAL_CLASS: usize = 0;

#[derive(Error, Debug)]
pub enum LandmarkerError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected model output: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Square region of the source image fed to a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCrop {
    pub left: f32,
    pub top: f32,
    pub side: f32,
}

impl FaceCrop {
    pub fn around(bbox: &BoundingBox, margin: f32) -> Self {
        let side = bbox.width.max(bbox.height) * margin;
        let c = bbox.center();
        Self { left: c.x - side / 2.0, top: c.y - side / 2.0, side }
    }

    /// Map a point given in crop-relative units (0..1) back into the source.
    pub fn to_source(&self, u: f32, v: f32) -> Point {
        Point::new(self.left + u * self.side, self.top + v * self.side)
    }

    /// Cut and resample the crop to `size × size`. Areas outside the source
    /// repeat the nearest edge pixel.
    pub fn extract(&self, image: &RgbImage, size: u32) -> RgbImage {
        let (w, h) = image.dimensions();
        let step = self.side / size as f32;
        let max_x = w.saturating_sub(1) as f32;
        let max_y = h.saturating_sub(1) as f32;
        RgbImage::from_fn(size, size, |x, y| {
            let sx = (self.left + (x as f32 + 0.5) * step).clamp(0.0, max_x);
            let sy = (self.top + (y as f32 + 0.5) * step).clamp(0.0, max_y);
            *image.get_pixel(sx as u32, sy as u32)
        })
    }
}

/// Predicts 68 landmarks from a face crop.
pub struct LandmarkRegressor {
    session: Session,
}

impl LandmarkRegressor {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkerError> {
        let session = load_session(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded landmark model");
        Ok(Self { session })
    }

    pub fn predict(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<LandmarkSet, LandmarkerError> {
        let crop = FaceCrop::around(face, CROP_MARGIN);
        let patch = crop.extract(image, LANDMARK_INPUT_SIZE);
        let input = rgb_tensor(&patch);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkerError::BadOutput(format!("landmarks: {e}")))?;

        decode_landmarks(raw, &crop)
    }
}

/// Scores how neutral a face's expression is.
pub struct ExpressionClassifier {
    session: Session,
}

impl ExpressionClassifier {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkerError> {
        let session = load_session(model_path)?;
        tracing::info!(path = %model_path.display(), "loaded expression model");
        Ok(Self { session })
    }

    /// Probability in [0, 1] that the expression is neutral.
    pub fn neutral_score(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<f32, LandmarkerError> {
        let patch = FaceCrop::around(face, 1.0).extract(image, EXPRESSION_INPUT_SIZE);
        let input = gray_tensor(&patch);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkerError::BadOutput(format!("expression: {e}")))?;
        if logits.len() != EXPRESSION_CLASSES {
            return Err(LandmarkerError::BadOutput(format!(
                "expected {EXPRESSION_CLASSES} expression classes, got {}",
                logits.len()
            )));
        }
        Ok(softmax(logits)[NEUTRAL_CLASS])
    }
}

fn load_session(model_path: &Path) -> Result<Session, LandmarkerError> {
    if !model_path.exists() {
        return Err(LandmarkerError::ModelNotFound(model_path.display().to_string()));
    }
    Ok(Session::builder()?.with_intra_threads(2)?.commit_from_file(model_path)?)
}

/// NCHW RGB scaled to [0, 1].
fn rgb_tensor(patch: &RgbImage) -> Array4<f32> {
    let (w, h) = patch.dimensions();
    let mut t = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, px) in patch.enumerate_pixels() {
        for c in 0..3 {
            t[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
        }
    }
    t
}

/// Single-channel NCHW luminance in raw 0..255.
fn gray_tensor(patch: &RgbImage) -> Array4<f32> {
    let gray = imageops::grayscale(patch);
    let (w, h) = gray.dimensions();
    let mut t = Array4::<f32>::zeros((1, 1, h as usize, w as usize));
    for (x, y, px) in gray.enumerate_pixels() {
        t[[0, 0, y as usize, x as usize]] = px[0] as f32;
    }
    t
}

/// Interleaved `x0, y0, x1, y1, ...` in crop units → source-image landmarks.
fn decode_landmarks(raw: &[f32], crop: &FaceCrop) -> Result<LandmarkSet, LandmarkerError> {
    if raw.len() != LANDMARK_COUNT * 2 {
        return Err(LandmarkerError::BadOutput(format!(
            "expected {} landmark values, got {}",
            LANDMARK_COUNT * 2,
            raw.len()
        )));
    }
    let points = raw.chunks_exact(2).map(|xy| crop.to_source(xy[0], xy[1])).collect();
    LandmarkSet::new(points).map_err(|e| LandmarkerError::BadOutput(e.to_string()))
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}
