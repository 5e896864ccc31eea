//! Framing engine: scale and crop a photo so the head lands at a fixed size
//! and position inside a fixed-aspect canvas.
//!
//! Framing never fails. A missing face or an unusable landmark measurement
//! falls back to a centered cover crop.

use crate::codec::{self, CodecError};
use crate::config::FramingPolicy;
use crate::geometry::{distance, fit_rect, scale_factor_from_lengths, GeometryError};
use crate::types::{FaceDetection, Point};
use image::RgbImage;
use serde::Serialize;

/// Which path produced a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingStrategy {
    /// Scaled from the chin-to-brow measurement, face placed by policy.
    HeadFit,
    /// No usable face: cover-fit and center.
    CenterCrop,
}

/// Scale the source by `scale` to `scaled_width × scaled_height`, then cut
/// `output_width × output_height` at (`crop_left`, `crop_top`).
///
/// The crop window always lies inside the scaled image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameTransform {
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub crop_left: u32,
    pub crop_top: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub strategy: FramingStrategy,
}

impl FrameTransform {
    /// Where a source-image point ends up in the output.
    pub fn map_point(&self, p: Point) -> Point {
        Point::new(
            p.x * self.scale - self.crop_left as f32,
            p.y * self.scale - self.crop_top as f32,
        )
    }
}

/// Cover-fit the source and center the crop.
pub fn center_crop_transform(source_w: u32, source_h: u32, output_w: u32, output_h: u32) -> FrameTransform {
    let fit = fit_rect(source_w, source_h, output_w, output_h);
    FrameTransform {
        scale: fit.resize_width as f32 / source_w.max(1) as f32,
        scaled_width: fit.resize_width,
        scaled_height: fit.resize_height,
        crop_left: fit.crop_left,
        crop_top: fit.crop_top,
        output_width: output_w,
        output_height: output_h,
        strategy: FramingStrategy::CenterCrop,
    }
}

/// Scale so the estimated full head height becomes `target_head_fraction` of
/// the canvas, then place the face-box center at `face_center_from_top`.
///
/// If that scale would leave the image smaller than the canvas, the minimum
/// cover scale is used instead (the head then comes out larger than targeted).
pub fn head_fit_transform(
    source_w: u32,
    source_h: u32,
    face: &FaceDetection,
    output_w: u32,
    output_h: u32,
    policy: &FramingPolicy,
) -> Result<FrameTransform, GeometryError> {
    let lm = &face.landmarks;
    let face_height = distance(lm.chin_tip(), lm.brow_reference());
    let estimated_head = face_height * policy.head_height_multiplier;
    let desired_head = output_h as f32 * policy.target_head_fraction;
    let fitted = scale_factor_from_lengths(estimated_head, desired_head)?;

    let cover = (output_w as f32 / source_w.max(1) as f32).max(output_h as f32 / source_h.max(1) as f32);
    let scale = if fitted < cover {
        tracing::debug!(fitted, cover, "head-fit scale too small to cover canvas; using cover scale");
        cover
    } else {
        fitted
    };

    let scaled_width = ((source_w as f32 * scale).round() as u32).max(output_w);
    let scaled_height = ((source_h as f32 * scale).round() as u32).max(output_h);

    let center = face.bounding_box.center().scaled(scale);
    let place = |ideal: f32, max: u32| ideal.round().clamp(0.0, max as f32) as u32;
    let crop_left = place(center.x - output_w as f32 / 2.0, scaled_width - output_w);
    let crop_top = place(
        center.y - output_h as f32 * policy.face_center_from_top,
        scaled_height - output_h,
    );

    Ok(FrameTransform {
        scale,
        scaled_width,
        scaled_height,
        crop_left,
        crop_top,
        output_width: output_w,
        output_height: output_h,
        strategy: FramingStrategy::HeadFit,
    })
}

/// Pick a transform for this image. Always succeeds.
pub fn plan_frame(
    source_w: u32,
    source_h: u32,
    face: Option<&FaceDetection>,
    output_w: u32,
    output_h: u32,
    policy: &FramingPolicy,
) -> FrameTransform {
    let Some(face) = face else {
        tracing::debug!("no face: center crop");
        return center_crop_transform(source_w, source_h, output_w, output_h);
    };
    match head_fit_transform(source_w, source_h, face, output_w, output_h, policy) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "landmark measurement unusable; falling back to center crop");
            center_crop_transform(source_w, source_h, output_w, output_h)
        }
    }
}

/// Materialize a transform.
///
/// Downscales resize the whole image then crop. Upscales cut the matching
/// source window first so no oversized intermediate is allocated.
pub fn apply_transform(image: &RgbImage, t: &FrameTransform) -> Result<RgbImage, CodecError> {
    if t.scale <= 1.0 {
        let scaled = codec::resize(image, t.scaled_width, t.scaled_height);
        return codec::crop(&scaled, t.crop_left, t.crop_top, t.output_width, t.output_height);
    }

    let (w, h) = image.dimensions();
    let sx = w as f32 / t.scaled_width as f32;
    let sy = h as f32 / t.scaled_height as f32;
    let left = ((t.crop_left as f32 * sx).floor() as u32).min(w.saturating_sub(1));
    let top = ((t.crop_top as f32 * sy).floor() as u32).min(h.saturating_sub(1));
    let width = ((t.output_width as f32 * sx).round() as u32).clamp(1, w - left);
    let height = ((t.output_height as f32 * sy).round() as u32).clamp(1, h - top);
    let window = codec::crop(image, left, top, width, height)?;
    Ok(codec::resize(&window, t.output_width, t.output_height))
}

/// A framed image together with the transform that produced it.
pub struct Framed {
    pub image: RgbImage,
    pub transform: FrameTransform,
}

/// Plan and apply framing in one step.
pub fn frame(
    image: &RgbImage,
    face: Option<&FaceDetection>,
    output_w: u32,
    output_h: u32,
    policy: &FramingPolicy,
) -> Result<Framed, CodecError> {
    let transform = plan_frame(image.width(), image.height(), face, output_w, output_h, policy);
    tracing::info!(
        strategy = ?transform.strategy,
        scale = transform.scale,
        crop_left = transform.crop_left,
        crop_top = transform.crop_top,
        "framing planned"
    );
    let image = apply_transform(image, &transform)?;
    Ok(Framed { image, transform })
}
