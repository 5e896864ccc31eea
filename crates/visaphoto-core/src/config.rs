//! Calibration constants for framing and compliance scoring.
//!
//! Every value here is product policy rather than a law of geometry, so all
//! of them are tunable from a TOML file. The defaults are the canonical set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MM_PER_INCH: f32 = 25.4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid calibration TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid calibration: {0}")]
    Invalid(String),
}

/// Physical print size of the finished photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoSpec {
    pub width_mm: f32,
    pub height_mm: f32,
    pub dpi: u32,
}

impl Default for PhotoSpec {
    fn default() -> Self {
        // Schengen visa photo: 35 x 45 mm.
        Self {
            width_mm: 35.0,
            height_mm: 45.0,
            dpi: 300,
        }
    }
}

impl PhotoSpec {
    /// Output size in pixels at the configured DPI (413 x 531 by default).
    pub fn pixel_size(&self) -> (u32, u32) {
        let px = |mm: f32| ((mm * self.dpi as f32 / MM_PER_INCH).round() as u32).max(1);
        (px(self.width_mm), px(self.height_mm))
    }
}

/// Where the head goes inside the output canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingPolicy {
    /// Full head height (crown to chin) as a multiple of the chin to brow distance.
    pub head_height_multiplier: f32,
    /// Desired head height as a fraction of canvas height.
    pub target_head_fraction: f32,
    /// Vertical position of the face center, as a fraction of canvas height from the top.
    pub face_center_from_top: f32,
    /// Eye-line angles below this are left alone when leveling the head.
    pub min_tilt_correction_deg: f32,
    /// Eye-line angles above this are treated as a bad detection and left alone.
    pub max_tilt_correction_deg: f32,
}

impl Default for FramingPolicy {
    fn default() -> Self {
        Self {
            head_height_multiplier: 1.5,
            target_head_fraction: 0.70,
            face_center_from_top: 0.45,
            min_tilt_correction_deg: 1.0,
            max_tilt_correction_deg: 20.0,
        }
    }
}

/// Thresholds for the ten compliance rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceThresholds {
    pub head_ratio_min: f32,
    pub head_ratio_max: f32,
    /// Ratios in `[head_ratio_floor, head_ratio_min)` are uncertain, below are not met.
    pub head_ratio_floor: f32,
    /// Average eye aspect ratio at or below this means eyes are closed.
    pub eye_aspect_ratio_min: f32,
    /// Mouth aspect ratio at or above this means the mouth is open.
    pub mouth_aspect_ratio_max: f32,
    /// Face-center offsets in percent of half the image dimension.
    pub center_offset_pass_pct: f32,
    pub center_offset_fail_pct: f32,
    pub eye_roll_pass_deg: f32,
    pub eye_roll_fail_deg: f32,
    pub nose_angle_pass_deg: f32,
    pub nose_angle_fail_deg: f32,
    pub hair_eye_std_max: f32,
    pub hair_face_std_max: f32,
    pub shadow_face_std_max: f32,
    pub shadow_background_std_max: f32,
    /// Regions covering fewer pixels than this are too small to judge.
    /// Each grid sample stands for `sample_step²` pixels.
    pub min_region_pixels: usize,
    /// Grid step used when sampling pixels inside a region.
    pub sample_step: u32,
    /// Width of the border strip sampled as background, as a fraction of each dimension.
    pub background_strip_fraction: f32,
    pub neutral_score_min: f32,
}

impl Default for ComplianceThresholds {
    fn default() -> Self {
        Self {
            head_ratio_min: 0.60,
            head_ratio_max: 0.80,
            head_ratio_floor: 0.50,
            eye_aspect_ratio_min: 0.2,
            mouth_aspect_ratio_max: 0.4,
            center_offset_pass_pct: 20.0,
            center_offset_fail_pct: 40.0,
            eye_roll_pass_deg: 5.0,
            eye_roll_fail_deg: 15.0,
            nose_angle_pass_deg: 10.0,
            nose_angle_fail_deg: 25.0,
            hair_eye_std_max: 5.0,
            hair_face_std_max: 10.0,
            shadow_face_std_max: 40.0,
            shadow_background_std_max: 25.0,
            min_region_pixels: 100,
            sample_step: 2,
            background_strip_fraction: 0.10,
            neutral_score_min: 0.7,
        }
    }
}

/// The full calibration set, one TOML section per concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub photo: PhotoSpec,
    pub framing: FramingPolicy,
    pub compliance: ComplianceThresholds,
}

impl Calibration {
    /// Parse a calibration from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let calibration: Calibration = toml::from_str(src)?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.photo.width_mm <= 0.0 || self.photo.height_mm <= 0.0 || self.photo.dpi == 0 {
            return invalid("photo size and dpi must be positive");
        }
        if self.framing.head_height_multiplier <= 0.0 {
            return invalid("framing.head_height_multiplier must be positive");
        }
        if !(0.0..=1.0).contains(&self.framing.target_head_fraction)
            || !(0.0..=1.0).contains(&self.framing.face_center_from_top)
        {
            return invalid("framing fractions must lie in [0, 1]");
        }
        let c = &self.compliance;
        if c.head_ratio_floor > c.head_ratio_min || c.head_ratio_min > c.head_ratio_max {
            return invalid("compliance head ratios must satisfy floor <= min <= max");
        }
        if c.sample_step == 0 {
            return invalid("compliance.sample_step must be at least 1");
        }
        Ok(())
    }
}
