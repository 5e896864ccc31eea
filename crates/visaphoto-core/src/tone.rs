//! Tone adjustments applied to the framed photo before encoding.

use crate::sampler::brightness;
use image::{imageops, Rgb, RgbImage};

/// Multiplier for brightness and saturation when contrast adjustment is requested.
pub const CONTRAST_BOOST: f32 = 1.05;
const SHARPEN_SIGMA: f32 = 0.5;
const SHARPEN_THRESHOLD: i32 = 2;

/// Scale brightness and saturation in place.
///
/// Saturation is scaled around each pixel's own luma, so greys stay grey.
pub fn modulate(image: &mut RgbImage, brightness_factor: f32, saturation_factor: f32) {
    for px in image.pixels_mut() {
        let luma = brightness(px);
        let adjust = |c: u8| {
            let saturated = luma + (c as f32 - luma) * saturation_factor;
            (saturated * brightness_factor).round().clamp(0.0, 255.0) as u8
        };
        *px = Rgb([adjust(px[0]), adjust(px[1]), adjust(px[2])]);
    }
}

/// Very light unsharp mask to recover detail lost in resampling.
pub fn sharpen(image: &RgbImage) -> RgbImage {
    imageops::unsharpen(image, SHARPEN_SIGMA, SHARPEN_THRESHOLD)
}
