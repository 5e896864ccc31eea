//! Background-removal collaborator.
//!
//! The segmentation service itself lives outside this crate; the pipeline
//! only needs an RGBA cutout of the photo with the background transparent.

use image::{RgbImage, RgbaImage};
use std::path::Path;
use thiserror::Error;
use visaphoto_core::codec::{self, CodecError};

#[derive(Error, Debug)]
pub enum BackgroundError {
    #[error("segmentation service failed: {0}")]
    Service(String),
    #[error("cutout is {actual:?} but the photo is {expected:?}")]
    SizeMismatch { expected: (u32, u32), actual: (u32, u32) },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Produces a transparent-background cutout of a photo.
///
/// Called from a blocking thread; implementations may do network I/O.
pub trait BackgroundRemover: Send + Sync {
    fn remove_background(&self, image: &RgbImage, api_key: Option<&str>) -> Result<RgbaImage, BackgroundError>;
}

/// A cutout made ahead of time for one specific input photo.
#[derive(Debug)]
pub struct PrecomputedCutout {
    cutout: RgbaImage,
}

impl PrecomputedCutout {
    pub fn new(cutout: RgbaImage) -> Self {
        Self { cutout }
    }

    pub fn load(path: &Path) -> Result<Self, BackgroundError> {
        let bytes = std::fs::read(path).map_err(|e| BackgroundError::Service(format!("{}: {e}", path.display())))?;
        Ok(Self::new(codec::decode_rgba(&bytes)?))
    }
}

impl BackgroundRemover for PrecomputedCutout {
    fn remove_background(&self, image: &RgbImage, _api_key: Option<&str>) -> Result<RgbaImage, BackgroundError> {
        check_size(image, &self.cutout)?;
        Ok(self.cutout.clone())
    }
}

/// A cutout only lines up with its photo when both have the same size.
pub fn check_size(image: &RgbImage, cutout: &RgbaImage) -> Result<(), BackgroundError> {
    if image.dimensions() != cutout.dimensions() {
        return Err(BackgroundError::SizeMismatch {
            expected: image.dimensions(),
            actual: cutout.dimensions(),
        });
    }
    Ok(())
}

/// Composite the cutout over the light-grey print background.
pub fn replace_background(cutout: &RgbaImage) -> RgbImage {
    codec::flatten(cutout, codec::LIGHT_GREY)
}
