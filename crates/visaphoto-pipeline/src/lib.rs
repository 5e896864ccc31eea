//! visaphoto-pipeline: runs one photo through decoding, face detection,
//! background replacement, framing, tone and compliance scoring.
//!
//! The landmark models are loaded once per process and shared by all
//! requests. External steps are bounded by a timeout and degrade the result
//! instead of failing it.

pub mod background;
pub mod config;
pub mod extractor;
pub mod pipeline;

pub use background::{BackgroundError, BackgroundRemover, PrecomputedCutout};
pub use config::{ConfigFile, PipelineConfig, PipelineConfigError, ProcessingConfig};
pub use extractor::SharedExtractor;
pub use pipeline::{Pipeline, PipelineError, ProcessedPhoto, Step, StepError, StepFailure};
