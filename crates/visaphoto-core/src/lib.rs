//! visaphoto-core: passport-photo framing and compliance scoring.
//!
//! Landmarks come from a [`LandmarkExtractor`] (SCRFD box plus a 68-point
//! regressor via ONNX Runtime by default). Framing turns them into a
//! scale-and-crop onto the print canvas; the compliance evaluator scores the
//! finished photo against ten rules.

pub mod alignment;
pub mod codec;
pub mod compliance;
pub mod config;
pub mod detector;
pub mod extractor;
pub mod framing;
pub mod geometry;
pub mod landmarker;
pub mod sampler;
#[cfg(any(test, feature = "synthetic"))]
pub mod synthetic;
pub mod tone;
pub mod types;

pub use compliance::{ComplianceEvaluator, ComplianceReport, FaceAnalysis, Requirement, RequirementVerdict, VerdictStatus};
pub use config::Calibration;
pub use extractor::{default_model_dir, ExtractorError, LandmarkExtractor, OnnxLandmarkExtractor};
pub use framing::{FrameTransform, FramingStrategy};
pub use types::{BoundingBox, FaceDetection, LandmarkSet, Point};
