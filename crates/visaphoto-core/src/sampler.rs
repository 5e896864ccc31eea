//! Pixel-region sampling and brightness statistics.
//!
//! The compliance rules for hair and shadows read raw pixels here; every
//! other rule works from landmark coordinates only.

use crate::types::{BoundingBox, Point};
use image::{Rgb, RgbImage};
use serde::Serialize;

/// Rec. 601 luma of one pixel.
pub fn brightness(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

/// Crossing-number point-in-polygon test. The polygon is implicitly closed.
pub fn point_in_polygon(x: f32, y: f32, polygon: &[Point]) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);
    for (i, pi) in polygon.iter().enumerate() {
        let pj = polygon[j];
        if (pi.y > y) != (pj.y > y) && x < (pj.x - pi.x) * (y - pi.y) / (pj.y - pi.y) + pi.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Collect the pixels inside `polygon` on a grid of `step` pixels.
///
/// Only the polygon's bounding box (clipped to the image) is scanned; grid
/// coordinates stay multiples of `step` so the result matches a full-image scan.
pub fn sample_polygon(polygon: &[Point], image: &RgbImage, step: u32) -> Vec<Rgb<u8>> {
    if polygon.len() < 3 || image.width() == 0 || image.height() == 0 {
        return Vec::new();
    }
    let step = step.max(1);

    let (min_x, max_x, min_y, max_y) = polygon.iter().fold(
        (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
        |(a, b, c, d), p| (a.min(p.x), b.max(p.x), c.min(p.y), d.max(p.y)),
    );
    let clamp_x = |v: f32| v.clamp(0.0, (image.width() - 1) as f32) as u32;
    let clamp_y = |v: f32| v.clamp(0.0, (image.height() - 1) as f32) as u32;
    let x0 = clamp_x(min_x.floor()) / step * step;
    let y0 = clamp_y(min_y.floor()) / step * step;
    let x1 = clamp_x(max_x.ceil());
    let y1 = clamp_y(max_y.ceil());

    let mut samples = Vec::new();
    for y in (y0..=y1).step_by(step as usize) {
        for x in (x0..=x1).step_by(step as usize) {
            if point_in_polygon(x as f32, y as f32, polygon) {
                samples.push(*image.get_pixel(x, y));
            }
        }
    }
    samples
}

/// Collect pixels from a border strip of the image, skipping anything inside `exclude`.
///
/// `strip_fraction` is the strip width as a fraction of each dimension. This
/// is the "background" region: disjoint from the face by construction.
pub fn sample_border(
    image: &RgbImage,
    strip_fraction: f32,
    exclude: &BoundingBox,
    step: u32,
) -> Vec<Rgb<u8>> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let strip_x = ((w as f32 * strip_fraction).ceil() as u32).max(1);
    let strip_y = ((h as f32 * strip_fraction).ceil() as u32).max(1);

    let mut samples = Vec::new();
    for y in (0..h).step_by(step.max(1) as usize) {
        for x in (0..w).step_by(step.max(1) as usize) {
            let in_strip = x < strip_x || x >= w.saturating_sub(strip_x) || y < strip_y || y >= h.saturating_sub(strip_y);
            if in_strip && !exclude.contains(x as f32, y as f32) {
                samples.push(*image.get_pixel(x, y));
            }
        }
    }
    samples
}

/// Mean and population standard deviation of sampled brightness values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BrightnessStats {
    pub count: usize,
    pub mean: f32,
    pub std_dev: f32,
}

impl BrightnessStats {
    pub fn from_samples(samples: &[Rgb<u8>]) -> Self {
        if samples.is_empty() {
            return Self { count: 0, mean: 0.0, std_dev: 0.0 };
        }
        let n = samples.len() as f64;
        let values: Vec<f64> = samples.iter().map(|p| brightness(p) as f64).collect();
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            count: samples.len(),
            mean: mean as f32,
            std_dev: variance.sqrt() as f32,
        }
    }

    /// Whether enough pixels were sampled for the deviation to mean anything.
    pub fn is_reliable(&self, min_samples: usize) -> bool {
        self.count >= min_samples
    }
}
