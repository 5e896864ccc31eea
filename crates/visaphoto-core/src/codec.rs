//! Image codec adapter: decode, resize, crop, flatten, encode.
//!
//! Thin layer over the `image` crate so the rest of the core works on plain
//! `RgbImage` buffers and never touches container formats.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ImageEncoder, ImageError, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Background used when flattening transparency: the light grey of the print layouts.
pub const LIGHT_GREY: Rgb<u8> = Rgb([240, 240, 240]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot decode image: {0}")]
    Decode(#[source] ImageError),
    #[error("cannot encode image: {0}")]
    Encode(#[source] ImageError),
    #[error("image has zero width or height")]
    Empty,
    #[error("crop {width}x{height}+{left}+{top} exceeds {image_width}x{image_height} image")]
    CropOutOfBounds {
        left: u32,
        top: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },
}

/// Encoded output container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Decode any supported container into RGB. Transparent pixels are flattened onto white.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, CodecError> {
    let dynamic = image::load_from_memory(bytes).map_err(CodecError::Decode)?;
    if dynamic.width() == 0 || dynamic.height() == 0 {
        return Err(CodecError::Empty);
    }
    Ok(if dynamic.color().has_alpha() {
        flatten(&dynamic.to_rgba8(), WHITE)
    } else {
        dynamic.to_rgb8()
    })
}

/// Decode keeping the alpha channel (background-removal cutouts).
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, CodecError> {
    let dynamic = image::load_from_memory(bytes).map_err(CodecError::Decode)?;
    Ok(dynamic.to_rgba8())
}

/// Resample to exactly `width × height` (Lanczos3), ignoring aspect ratio.
pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width.max(1), height.max(1), FilterType::Lanczos3)
}

/// Copy out a rectangle. The rectangle must lie inside the image.
pub fn crop(image: &RgbImage, left: u32, top: u32, width: u32, height: u32) -> Result<RgbImage, CodecError> {
    let fits = left.checked_add(width).is_some_and(|r| r <= image.width())
        && top.checked_add(height).is_some_and(|b| b <= image.height());
    if !fits || width == 0 || height == 0 {
        return Err(CodecError::CropOutOfBounds {
            left,
            top,
            width,
            height,
            image_width: image.width(),
            image_height: image.height(),
        });
    }
    Ok(imageops::crop_imm(image, left, top, width, height).to_image())
}

/// Alpha-composite an RGBA image over a solid background.
pub fn flatten(image: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let alpha = px[3] as f32 / 255.0;
        let mix = |c: u8, bg: u8| (c as f32 * alpha + bg as f32 * (1.0 - alpha)).round() as u8;
        Rgb([mix(px[0], background[0]), mix(px[1], background[1]), mix(px[2], background[2])])
    })
}

/// Encode to the requested container. `jpeg_quality` is clamped to 1..=100.
pub fn encode(image: &RgbImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>, CodecError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CodecError::Empty);
    }
    let mut out = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut out, jpeg_quality.clamp(1, 100))
                .encode_image(image)
                .map_err(CodecError::Encode)?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut out)
                .write_image(image.as_raw(), image.width(), image.height(), image::ExtendedColorType::Rgb8)
                .map_err(CodecError::Encode)?;
        }
    }
    Ok(out)
}
