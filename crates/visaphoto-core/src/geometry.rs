//! Pure numeric helpers shared by framing and compliance scoring.

use crate::types::Point;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum GeometryError {
    #[error("degenerate measurement: length {0} must be positive")]
    DegenerateMeasurement(f32),
}

/// Euclidean distance between two points.
pub fn distance(a: Point, b: Point) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Resize-then-crop plan that covers a target rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FitRect {
    pub resize_width: u32,
    pub resize_height: u32,
    pub crop_left: u32,
    pub crop_top: u32,
}

/// "Cover" fit: scale the source so it fully covers `target_w × target_h`,
/// then center the crop window.
///
/// The comparison is done on integer cross-products so a source that already
/// has the target aspect ratio maps to exactly the target size with zero offsets.
pub fn fit_rect(source_w: u32, source_h: u32, target_w: u32, target_h: u32) -> FitRect {
    let source_w = source_w.max(1);
    let source_h = source_h.max(1);
    let wider = source_w as u64 * target_h as u64 > target_w as u64 * source_h as u64;

    let (resize_width, resize_height) = if wider {
        // Height is the binding dimension.
        let w = (target_h as f64 * source_w as f64 / source_h as f64).round() as u32;
        (w.max(target_w), target_h)
    } else {
        let h = (target_w as f64 * source_h as f64 / source_w as f64).round() as u32;
        (target_w, h.max(target_h))
    };

    FitRect {
        resize_width,
        resize_height,
        crop_left: (resize_width - target_w) / 2,
        crop_top: (resize_height - target_h) / 2,
    }
}

/// Linear scale that maps a measured length onto a desired length.
pub fn scale_factor_from_lengths(measured: f32, desired: f32) -> Result<f32, GeometryError> {
    if !measured.is_finite() || measured <= 0.0 {
        return Err(GeometryError::DegenerateMeasurement(measured));
    }
    Ok(desired / measured)
}

/// Angle of the segment `a → b` against the horizontal axis, in degrees.
pub fn horizontal_angle_deg(a: Point, b: Point) -> f32 {
    (b.y - a.y).atan2(b.x - a.x).to_degrees()
}

/// Angle of the segment `a → b` against the vertical axis, in degrees.
/// Zero when `b` sits straight below `a`.
pub fn vertical_angle_deg(a: Point, b: Point) -> f32 {
    (b.x - a.x).atan2(b.y - a.y).to_degrees()
}

/// Largest `target_w : target_h` window that fits inside the source.
pub fn largest_window(source_w: u32, source_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let source_w = source_w.max(1);
    let source_h = source_h.max(1);
    let target_w = target_w.max(1);
    let target_h = target_h.max(1);
    if source_w as u64 * target_h as u64 >= target_w as u64 * source_h as u64 {
        let w = (source_h as f64 * target_w as f64 / target_h as f64).round() as u32;
        (w.clamp(1, source_w), source_h)
    } else {
        let h = (source_w as f64 * target_h as f64 / target_w as f64).round() as u32;
        (source_w, h.clamp(1, source_h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use image::RgbImage;

    #[test]
    fn test_distance() {
        assert!((distance(Point::new(0.0, 0.0), Point::new(3.0, 4.0)) - 5.0).abs() < 1e-6);
        assert_eq!(distance(Point::new(2.0, 2.0), Point::new(2.0, 2.0)), 0.0);
    }

    #[test]
    fn test_fit_rect_wide_source() {
        // 1000x500 into 350x450: height binds → 900x450, centered horizontally.
        let fit = fit_rect(1000, 500, 350, 450);
        assert_eq!(fit.resize_height, 450);
        assert_eq!(fit.resize_width, 900);
        assert_eq!(fit.crop_left, 275);
        assert_eq!(fit.crop_top, 0);
    }

    #[test]
    fn test_fit_rect_tall_source() {
        let fit = fit_rect(400, 1000, 350, 450);
        assert_eq!(fit.resize_width, 350);
        assert_eq!(fit.resize_height, 875);
        assert_eq!(fit.crop_left, 0);
        assert_eq!(fit.crop_top, 212);
    }

    #[test]
    fn test_fit_rect_exact_aspect_has_no_offsets() {
        let fit = fit_rect(826, 1062, 413, 531);
        assert_eq!(fit, FitRect { resize_width: 413, resize_height: 531, crop_left: 0, crop_top: 0 });
    }

    #[test]
    fn test_fit_rect_idempotent_on_own_output() {
        for (w, h) in [(960, 540), (600, 1200), (826, 1062), (1001, 997)] {
            let fit = fit_rect(w, h, 413, 531);
            let resized = codec::resize(&RgbImage::new(w, h), fit.resize_width, fit.resize_height);
            let cropped = codec::crop(&resized, fit.crop_left, fit.crop_top, 413, 531).unwrap();
            let (out_w, out_h) = cropped.dimensions();

            let again = fit_rect(out_w, out_h, 413, 531);
            assert_eq!((again.crop_left, again.crop_top), (0, 0), "source {w}x{h}");
            assert_eq!((again.resize_width, again.resize_height), (out_w, out_h), "source {w}x{h}");
        }
    }

    #[test]
    fn test_scale_factor() {
        assert!((scale_factor_from_lengths(200.0, 300.0).unwrap() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_scale_factor_rejects_degenerate() {
        assert_eq!(
            scale_factor_from_lengths(0.0, 10.0),
            Err(GeometryError::DegenerateMeasurement(0.0))
        );
        assert!(scale_factor_from_lengths(-3.0, 10.0).is_err());
        assert!(scale_factor_from_lengths(f32::NAN, 10.0).is_err());
    }

    #[test]
    fn test_angles() {
        let a = Point::new(0.0, 0.0);
        assert!(horizontal_angle_deg(a, Point::new(10.0, 0.0)).abs() < 1e-6);
        assert!((horizontal_angle_deg(a, Point::new(10.0, 10.0)) - 45.0).abs() < 1e-4);
        assert!(vertical_angle_deg(a, Point::new(0.0, 10.0)).abs() < 1e-6);
        assert!((vertical_angle_deg(a, Point::new(10.0, 10.0)) - 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_largest_window_keeps_aspect() {
        let (w, h) = largest_window(1000, 500, 35, 45);
        assert_eq!(h, 500);
        assert!((w as f32 / h as f32 - 35.0 / 45.0).abs() < 0.01);
        let (w, h) = largest_window(400, 2000, 35, 45);
        assert_eq!(w, 400);
        assert!(h <= 2000);
    }
}
