use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use visaphoto_core::codec::OutputFormat;
use visaphoto_core::config::ConfigError;
use visaphoto_core::{default_model_dir, Calibration};

const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum PipelineConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Calibration(#[from] ConfigError),
}

/// The `[pipeline]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub model_dir: Option<PathBuf>,
    pub step_timeout_secs: u64,
    pub jpeg_quality: u8,
    pub output_format: OutputFormat,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            model_dir: None,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            output_format: OutputFormat::Jpeg,
        }
    }
}

/// Whole config file: calibration sections plus `[pipeline]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub calibration: Calibration,
    pub pipeline: PipelineSection,
}

impl ConfigFile {
    pub fn from_toml_str(src: &str) -> Result<Self, PipelineConfigError> {
        let file: ConfigFile = toml::from_str(src)?;
        file.calibration.validate()?;
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| PipelineConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub calibration: Calibration,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Upper bound on each external step (model load, inference, background removal).
    pub step_timeout: Duration,
    pub jpeg_quality: u8,
    pub output_format: OutputFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_file(ConfigFile::default(), &|_| None)
    }
}

impl PipelineConfig {
    /// Load from `VISAPHOTO_*` environment variables, reading the TOML file
    /// named by `VISAPHOTO_CONFIG` first when set. Variables override the file.
    pub fn from_env() -> Result<Self, PipelineConfigError> {
        Self::from_vars(&env_var)
    }

    /// Like [`from_env`](Self::from_env), but reads `path` instead of `VISAPHOTO_CONFIG`.
    pub fn from_path(path: &Path) -> Result<Self, PipelineConfigError> {
        Ok(Self::from_file(ConfigFile::load(path)?, &env_var))
    }

    fn from_vars(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, PipelineConfigError> {
        let file = match var("VISAPHOTO_CONFIG") {
            Some(path) => ConfigFile::load(Path::new(&path))?,
            None => ConfigFile::default(),
        };
        Ok(Self::from_file(file, var))
    }

    fn from_file(file: ConfigFile, var: &dyn Fn(&str) -> Option<String>) -> Self {
        let section = file.pipeline;
        let model_dir = var("VISAPHOTO_MODEL_DIR")
            .map(PathBuf::from)
            .or(section.model_dir)
            .unwrap_or_else(default_model_dir);

        Self {
            calibration: file.calibration,
            model_dir,
            step_timeout: Duration::from_secs(parse_var(var, "VISAPHOTO_STEP_TIMEOUT_SECS", section.step_timeout_secs)),
            jpeg_quality: parse_var(var, "VISAPHOTO_JPEG_QUALITY", section.jpeg_quality),
            output_format: section.output_format,
        }
    }

    /// The config as a file, for `visaphoto config`.
    pub fn to_file(&self) -> ConfigFile {
        ConfigFile {
            calibration: self.calibration.clone(),
            pipeline: PipelineSection {
                model_dir: Some(self.model_dir.clone()),
                step_timeout_secs: self.step_timeout.as_secs(),
                jpeg_quality: self.jpeg_quality,
                output_format: self.output_format,
            },
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_var<T: std::str::FromStr>(var: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Per-request processing flags.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Resample to the print pixel size. Otherwise keep native resolution.
    pub resize: bool,
    pub remove_background: bool,
    /// Landmark-driven framing. Otherwise center crop.
    pub fit_head: bool,
    /// Level the eye line before framing.
    pub fix_head_tilt: bool,
    pub adjust_contrast: bool,
    /// Fail the request instead of falling back when no face is found.
    pub require_face: bool,
    /// Credential for the background-removal service.
    #[serde(skip_serializing)]
    pub background_api_key: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            resize: true,
            remove_background: false,
            fit_head: true,
            fix_head_tilt: true,
            adjust_contrast: true,
            require_face: false,
            background_api_key: None,
        }
    }
}

impl fmt::Debug for ProcessingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfig")
            .field("resize", &self.resize)
            .field("remove_background", &self.remove_background)
            .field("fit_head", &self.fit_head)
            .field("fix_head_tilt", &self.fix_head_tilt)
            .field("adjust_contrast", &self.adjust_contrast)
            .field("require_face", &self.require_face)
            .field("background_api_key", &self.background_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
