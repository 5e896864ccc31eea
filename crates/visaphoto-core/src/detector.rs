//! SCRFD face detector via ONNX Runtime.
//!
//! Finds face boxes on an RGB photo: letterbox to a square input, decode the
//! anchor-free score and box heads of each stride, then suppress overlaps.

use crate::types::BoundingBox;
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
/// Score and box head per stride. Keypoint heads, if present, are ignored.
const MIN_OUTPUTS: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("face detector model not found: {0}")]
    ModelNotFound(String),
    #[error("face detector output malformed: {0}")]
    BadOutput(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One face box in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub score: f32,
}

/// Mapping between letterboxed input pixels and source pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    scaled_w: u32,
    scaled_h: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let scaled_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let scaled_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            scale,
            pad_x: ((size - scaled_w) / 2) as f32,
            pad_y: ((size - scaled_h) / 2) as f32,
            scaled_w,
            scaled_h,
        }
    }

    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output positions of the score and box tensors for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideSlots {
    score: usize,
    bbox: usize,
}

pub struct ScrfdDetector {
    session: Session,
    slots: [StrideSlots; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < MIN_OUTPUTS {
            return Err(DetectorError::BadOutput(format!(
                "expected at least {MIN_OUTPUTS} outputs, got {}",
                names.len()
            )));
        }
        let slots = output_slots(&names);

        tracing::info!(path = %model_path.display(), outputs = ?names, ?slots, "loaded face detector");
        Ok(Self { session, slots })
    }

    /// Faces in `image`, best first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Candidate>, DetectorError> {
        let (input, letterbox) = letterbox_tensor(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slots, stride) in self.slots.iter().zip(STRIDES) {
            let (_, scores) = outputs[slots.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutput(format!("scores at stride {stride}: {e}")))?;
            let (_, boxes) = outputs[slots.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::BadOutput(format!("boxes at stride {stride}: {e}")))?;
            candidates.extend(decode_stride(scores, boxes, stride, &letterbox, SCORE_THRESHOLD));
        }

        let kept = nms(candidates, NMS_IOU_THRESHOLD);
        tracing::debug!(faces = kept.len(), "face detection done");
        Ok(kept)
    }
}

/// Resize into the square input with centered padding, normalized NCHW.
fn letterbox_tensor(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(image.width(), image.height(), INPUT_SIZE);
    let resized = imageops::resize(image, letterbox.scaled_w, letterbox.scaled_h, imageops::FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    // Padding at the mean normalizes to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (ox, oy) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, px) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, oy + y as usize, ox + x as usize]] = (px[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    (tensor, letterbox)
}

/// Locate score and box tensors by name (`score_8`, `bbox_16`, ...), falling
/// back to the common export order `[scores 8/16/32, boxes 8/16/32, ...]`.
fn output_slots(names: &[String]) -> [StrideSlots; 3] {
    let position = |head: &str, stride: u32| names.iter().position(|n| *n == format!("{head}_{stride}"));
    let named: Option<Vec<StrideSlots>> = STRIDES
        .iter()
        .map(|&s| Some(StrideSlots { score: position("score", s)?, bbox: position("bbox", s)? }))
        .collect();

    match named {
        Some(slots) => [slots[0], slots[1], slots[2]],
        None => {
            tracing::debug!(?names, "unnamed detector outputs; assuming export order");
            [
                StrideSlots { score: 0, bbox: 3 },
                StrideSlots { score: 1, bbox: 4 },
                StrideSlots { score: 2, bbox: 5 },
            ]
        }
    }
}

/// Decode one stride level. Box offsets are distances from the anchor
/// center to the four edges, in stride units.
fn decode_stride(scores: &[f32], boxes: &[f32], stride: u32, letterbox: &Letterbox, threshold: f32) -> Vec<Candidate> {
    let grid = (INPUT_SIZE / stride) as usize;
    let anchors = (grid * grid * ANCHORS_PER_CELL).min(scores.len()).min(boxes.len() / 4);
    let s = stride as f32;

    (0..anchors)
        .filter(|&i| scores[i] > threshold)
        .map(|i| {
            let cell = i / ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * s;
            let ay = (cell / grid) as f32 * s;
            let d = &boxes[i * 4..i * 4 + 4];
            let (x1, y1) = letterbox.to_source(ax - d[0] * s, ay - d[1] * s);
            let (x2, y2) = letterbox.to_source(ax + d[2] * s, ay + d[3] * s);
            Candidate {
                bbox: BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
                score: scores[i],
            }
        })
        .collect()
}

/// Greedy non-maximum suppression. Output is sorted by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates {
        if kept.iter().all(|k| iou(&k.bbox, &c.bbox) <= iou_threshold) {
            kept.push(c);
        }
    }
    kept
}

pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = w * h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
