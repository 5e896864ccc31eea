//! One photo in, one framed photo plus compliance report out.
//!
//! Only undecodable input (and, when the caller asks for it, a missing face)
//! fails a request. Extractor and background-removal problems are recorded
//! as step failures and the photo is produced without that feature.

use chrono::{DateTime, Utc};
use image::{RgbImage, RgbaImage};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;
use visaphoto_core::alignment::level_head;
use visaphoto_core::codec::{self, CodecError, OutputFormat};
use visaphoto_core::framing::frame;
use visaphoto_core::geometry::largest_window;
use visaphoto_core::tone::{self, CONTRAST_BOOST};
use visaphoto_core::{
    ComplianceEvaluator, ComplianceReport, ExtractorError, FaceAnalysis, FaceDetection, FrameTransform,
};

use crate::background::{check_size, replace_background, BackgroundError, BackgroundRemover};
use crate::config::{PipelineConfig, ProcessingConfig};
use crate::extractor::SharedExtractor;

/// Errors that abort a request.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read the photo: {0}")]
    Decode(#[source] CodecError),
    #[error("a face is required but none was found")]
    FaceRequired,
    #[error("cannot frame the photo: {0}")]
    Frame(#[source] CodecError),
    #[error("cannot encode the result: {0}")]
    Encode(#[source] CodecError),
    #[error("image worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors of a single external step. These degrade the result instead of failing it.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error(transparent)]
    Background(#[from] BackgroundError),
    #[error("background removal requested but no remover is configured")]
    NoRemover,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DetectFace,
    RemoveBackground,
    DetectFinalFace,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub step: Step,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedPhoto {
    pub request_id: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub transform: FrameTransform,
    /// Roll removed before framing, when tilt correction ran.
    pub tilt_corrected_deg: Option<f32>,
    pub background_replaced: bool,
    pub report: ComplianceReport,
    pub step_failures: Vec<StepFailure>,
    pub processed_at: DateTime<Utc>,
}

struct Rendered {
    image: RgbImage,
    transform: FrameTransform,
    tilt_corrected_deg: Option<f32>,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    extractor: SharedExtractor,
    remover: Option<Arc<dyn BackgroundRemover>>,
    evaluator: Arc<ComplianceEvaluator>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, extractor: SharedExtractor) -> Self {
        let evaluator = Arc::new(ComplianceEvaluator::new(&config.calibration));
        Self {
            config: Arc::new(config),
            extractor,
            remover: None,
            evaluator,
        }
    }

    pub fn with_background_remover(mut self, remover: Arc<dyn BackgroundRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn process(&self, bytes: &[u8], request: &ProcessingConfig) -> Result<ProcessedPhoto, PipelineError> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("process", request_id = %request_id);
        self.run(request_id, bytes.to_vec(), request.clone()).instrument(span).await
    }

    /// Score a photo as-is, without framing it.
    pub async fn check(&self, bytes: &[u8]) -> Result<ComplianceReport, PipelineError> {
        let span = tracing::info_span!("check", request_id = %Uuid::new_v4());
        async {
            let image = Arc::new(decode(bytes.to_vec()).await?);
            let analysis = match self.detect(image.clone()).await {
                Ok(face) => FaceAnalysis::from_detection(face),
                Err(e) => {
                    tracing::warn!(error = %e, "face detection unavailable");
                    FaceAnalysis::Unavailable(e.to_string())
                }
            };
            let evaluator = self.evaluator.clone();
            Ok::<_, PipelineError>(tokio::task::spawn_blocking(move || evaluator.evaluate(&image, &analysis, false)).await?)
        }
        .instrument(span)
        .await
    }

    async fn run(&self, request_id: String, bytes: Vec<u8>, request: ProcessingConfig) -> Result<ProcessedPhoto, PipelineError> {
        tracing::info!(bytes = bytes.len(), ?request, "processing photo");
        let mut failures = Vec::new();

        let image = Arc::new(decode(bytes).await?);
        tracing::info!(width = image.width(), height = image.height(), "decoded input");

        // Detection and segmentation are independent; run them side by side.
        let (detected, cutout) = tokio::join!(
            self.detect(image.clone()),
            self.cutout(image.clone(), &request)
        );

        let face = match detected {
            Ok(face) => face,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed; framing without landmarks");
                failures.push(StepFailure { step: Step::DetectFace, reason: e.to_string() });
                None
            }
        };
        if face.is_none() {
            if request.require_face {
                return Err(PipelineError::FaceRequired);
            }
            tracing::info!("no face in input; using center crop");
        }

        let cutout = match cutout {
            Some(Ok(cutout)) => Some(cutout),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "background removal failed; keeping original background");
                failures.push(StepFailure { step: Step::RemoveBackground, reason: e.to_string() });
                None
            }
            None => None,
        };
        let background_replaced = cutout.is_some();

        let config = self.config.clone();
        let render_request = request.clone();
        let rendered = tokio::task::spawn_blocking(move || render(&image, cutout, face, &render_request, &config)).await??;

        let final_image = Arc::new(rendered.image);
        let analysis = match self.detect(final_image.clone()).await {
            Ok(face) => FaceAnalysis::from_detection(face),
            Err(e) => {
                tracing::warn!(error = %e, "final face detection failed; geometry rules will be uncertain");
                failures.push(StepFailure { step: Step::DetectFinalFace, reason: e.to_string() });
                FaceAnalysis::Unavailable(e.to_string())
            }
        };

        let evaluator = self.evaluator.clone();
        let format = self.config.output_format;
        let quality = self.config.jpeg_quality;
        let (report, encoded) = tokio::task::spawn_blocking(move || {
            let report = evaluator.evaluate(&final_image, &analysis, background_replaced);
            (report, codec::encode(&final_image, format, quality))
        })
        .await?;
        let bytes = encoded.map_err(PipelineError::Encode)?;

        tracing::info!(
            output_bytes = bytes.len(),
            background_replaced,
            failed_steps = failures.len(),
            "photo processed"
        );

        Ok(ProcessedPhoto {
            request_id,
            bytes,
            format,
            width: rendered.transform.output_width,
            height: rendered.transform.output_height,
            transform: rendered.transform,
            tilt_corrected_deg: rendered.tilt_corrected_deg,
            background_replaced,
            report,
            step_failures: failures,
            processed_at: Utc::now(),
        })
    }

    /// Model load and inference share one deadline.
    async fn detect(&self, image: Arc<RgbImage>) -> Result<Option<FaceDetection>, StepError> {
        // A timed-out blocking task keeps running in the background; its result is dropped.
        bounded(self.config.step_timeout, async move {
            let extractor = self.extractor.get().await?;
            let found = tokio::task::spawn_blocking(move || extractor.detect_primary_face(&image)).await??;
            Ok::<_, StepError>(found)
        })
        .await
    }

    /// `None` when background removal was not requested.
    async fn cutout(&self, image: Arc<RgbImage>, request: &ProcessingConfig) -> Option<Result<RgbaImage, StepError>> {
        if !request.remove_background {
            return None;
        }
        let Some(remover) = self.remover.clone() else {
            return Some(Err(StepError::NoRemover));
        };
        let api_key = request.background_api_key.clone();
        let limit = self.config.step_timeout;
        Some(
            bounded(limit, async move {
                let cutout = tokio::task::spawn_blocking(move || {
                    let cutout = remover.remove_background(&image, api_key.as_deref())?;
                    check_size(&image, &cutout)?;
                    Ok::<_, BackgroundError>(cutout)
                })
                .await??;
                Ok::<_, StepError>(cutout)
            })
            .await,
        )
    }
}

async fn decode(bytes: Vec<u8>) -> Result<RgbImage, PipelineError> {
    tokio::task::spawn_blocking(move || codec::decode(&bytes))
        .await?
        .map_err(PipelineError::Decode)
}

async fn bounded<T>(limit: Duration, step: impl Future<Output = Result<T, StepError>>) -> Result<T, StepError> {
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| StepError::Timeout(limit))?
}

/// Background, tilt, framing and tone, in that order.
fn render(
    source: &RgbImage,
    cutout: Option<RgbaImage>,
    face: Option<FaceDetection>,
    request: &ProcessingConfig,
    config: &PipelineConfig,
) -> Result<Rendered, PipelineError> {
    let mut image = match cutout {
        Some(cutout) => replace_background(&cutout),
        None => source.clone(),
    };
    let mut face = face;
    let policy = &config.calibration.framing;

    let mut tilt_corrected_deg = None;
    if request.fix_head_tilt {
        if let Some(leveled) = face.as_ref().and_then(|f| level_head(&image, f, policy)) {
            tracing::info!(degrees = leveled.corrected_deg, "head tilt corrected");
            tilt_corrected_deg = Some(leveled.corrected_deg);
            image = leveled.image;
            face = Some(leveled.face);
        }
    }

    let (target_w, target_h) = config.calibration.photo.pixel_size();
    let (canvas_w, canvas_h) = if request.resize {
        (target_w, target_h)
    } else {
        largest_window(image.width(), image.height(), target_w, target_h)
    };

    let framing_face = if request.fit_head { face.as_ref() } else { None };
    let framed = frame(&image, framing_face, canvas_w, canvas_h, policy).map_err(PipelineError::Frame)?;

    let mut image = framed.image;
    if request.adjust_contrast {
        tone::modulate(&mut image, CONTRAST_BOOST, CONTRAST_BOOST);
    }
    let image = tone::sharpen(&image);

    Ok(Rendered {
        image,
        transform: framed.transform,
        tilt_corrected_deg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::PrecomputedCutout;
    use image::{Rgb, Rgba};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use visaphoto_core::codec::LIGHT_GREY;
    use visaphoto_core::compliance::NO_FACE_MESSAGE;
    use visaphoto_core::synthetic::SyntheticFace;
    use visaphoto_core::{FramingStrategy, LandmarkExtractor, Requirement, VerdictStatus};

    const W: u32 = 413;
    const H: u32 = 531;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 200) as u8 + 30, (y % 150) as u8 + 50, 120]));
        codec::encode(&img, OutputFormat::Png, 95).unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            step_timeout: Duration::from_secs(5),
            ..PipelineConfig::default()
        }
    }

    /// Fake extractor: places the face from `face_for(width, height)`.
    fn fake<F>(face_for: F) -> SharedExtractor
    where
        F: Fn(u32, u32) -> Option<FaceDetection> + Send + Sync + 'static,
    {
        let extractor = move |image: &RgbImage| -> Result<Option<FaceDetection>, ExtractorError> {
            Ok(face_for(image.width(), image.height()))
        };
        SharedExtractor::ready(Arc::new(extractor))
    }

    /// A face sized for `ratio` of whatever canvas it is asked about.
    fn face_with(ratio: f32, build: fn(SyntheticFace) -> SyntheticFace) -> SharedExtractor {
        fake(move |w, h| Some(build(SyntheticFace::centered_in(w, h, ratio, 1.5, 0.45)).detection()))
    }

    fn plain() -> ProcessingConfig {
        ProcessingConfig {
            adjust_contrast: false,
            fix_head_tilt: false,
            ..ProcessingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_no_face_centers_and_reports_missing_face() {
        let pipeline = Pipeline::new(config(), fake(|_, _| None));
        let photo = pipeline.process(&png(1200, 800), &plain()).await.unwrap();

        assert_eq!((photo.width, photo.height), (W, H));
        assert_eq!(photo.transform.strategy, FramingStrategy::CenterCrop);
        for entry in &photo.report.entries {
            if entry.requirement.needs_face() {
                assert_eq!(entry.verdict.status, VerdictStatus::NotMet);
                assert_eq!(entry.verdict.message.as_deref(), Some(NO_FACE_MESSAGE));
            }
        }
        let decoded = image::load_from_memory(&photo.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (W, H));
    }

    #[tokio::test]
    async fn test_frontal_face_meets_geometry_rules() {
        let extractor = face_with(0.65, |f| f.with_eye_aspect_ratio(0.35).with_mouth_aspect_ratio(0.1));
        let pipeline = Pipeline::new(config(), extractor);
        let photo = pipeline.process(&png(900, 1200), &plain()).await.unwrap();

        assert_eq!(photo.transform.strategy, FramingStrategy::HeadFit);
        assert_eq!(photo.report.status(Requirement::EyesOpen), Some(VerdictStatus::Met));
        assert_eq!(photo.report.status(Requirement::MouthClosed), Some(VerdictStatus::Met));
        assert_eq!(photo.report.status(Requirement::HeadHeight), Some(VerdictStatus::Met));
        assert!(photo.step_failures.is_empty());
    }

    #[tokio::test]
    async fn test_closed_eyes_reported() {
        let pipeline = Pipeline::new(config(), face_with(0.65, |f| f.with_eye_aspect_ratio(0.05)));
        let photo = pipeline.process(&png(900, 1200), &plain()).await.unwrap();
        let eyes = photo.report.get(Requirement::EyesOpen).unwrap();
        assert_eq!(eyes.status, VerdictStatus::NotMet);
        assert!(eyes.message.as_deref().unwrap().contains("closed"));
    }

    #[tokio::test]
    async fn test_background_replacement_marks_plain_background() {
        let source = png(600, 800);
        let cutout = RgbaImage::from_pixel(600, 800, Rgba([0, 0, 0, 0]));
        let pipeline = Pipeline::new(config(), fake(|_, _| None))
            .with_background_remover(Arc::new(PrecomputedCutout::new(cutout)));

        let request = ProcessingConfig { remove_background: true, ..plain() };
        let photo = pipeline.process(&source, &request).await.unwrap();
        assert!(photo.background_replaced);
        assert_eq!(photo.report.status(Requirement::PlainBackground), Some(VerdictStatus::Met));

        let png_pipeline = Pipeline::new(PipelineConfig { output_format: OutputFormat::Png, ..config() }, fake(|_, _| None))
            .with_background_remover(Arc::new(PrecomputedCutout::new(RgbaImage::from_pixel(600, 800, Rgba([0, 0, 0, 0])))));
        let photo = png_pipeline.process(&source, &request).await.unwrap();
        let out = image::load_from_memory(&photo.bytes).unwrap().to_rgb8();
        // Sharpening leaves a uniform field alone.
        assert_eq!(*out.get_pixel(10, 10), LIGHT_GREY);

        let not_requested = pipeline.process(&source, &plain()).await.unwrap();
        assert!(!not_requested.background_replaced);
        assert_eq!(not_requested.report.status(Requirement::PlainBackground), Some(VerdictStatus::Uncertain));
    }

    struct SlowRemover;

    impl BackgroundRemover for SlowRemover {
        fn remove_background(&self, image: &RgbImage, _: Option<&str>) -> Result<RgbaImage, BackgroundError> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(RgbaImage::new(image.width(), image.height()))
        }
    }

    #[tokio::test]
    async fn test_slow_background_removal_degrades() {
        let cfg = PipelineConfig { step_timeout: Duration::from_millis(100), ..config() };
        let pipeline = Pipeline::new(cfg, fake(|_, _| None)).with_background_remover(Arc::new(SlowRemover));
        let request = ProcessingConfig { remove_background: true, ..plain() };

        let photo = pipeline.process(&png(500, 600), &request).await.unwrap();
        assert!(!photo.background_replaced);
        assert_eq!(photo.step_failures.len(), 1);
        assert_eq!(photo.step_failures[0].step, Step::RemoveBackground);
        assert!(photo.step_failures[0].reason.contains("timed out"));
        assert_eq!((photo.width, photo.height), (W, H));
    }

    #[tokio::test]
    async fn test_missing_remover_degrades() {
        let pipeline = Pipeline::new(config(), fake(|_, _| None));
        let request = ProcessingConfig { remove_background: true, ..plain() };
        let photo = pipeline.process(&png(500, 600), &request).await.unwrap();
        assert!(!photo.background_replaced);
        assert_eq!(photo.step_failures[0].step, Step::RemoveBackground);
    }

    #[tokio::test]
    async fn test_undecodable_input_is_fatal() {
        let pipeline = Pipeline::new(config(), fake(|_, _| None));
        let err = pipeline.process(b"definitely not an image", &plain()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[tokio::test]
    async fn test_require_face() {
        let pipeline = Pipeline::new(config(), fake(|_, _| None));
        let request = ProcessingConfig { require_face: true, ..plain() };
        let err = pipeline.process(&png(500, 600), &request).await.unwrap_err();
        assert!(matches!(err, PipelineError::FaceRequired));
    }

    #[tokio::test]
    async fn test_degenerate_landmarks_fall_back_to_center_crop() {
        let extractor = fake(|w, h| {
            let mut face = SyntheticFace::centered_in(w, h, 0.65, 1.5, 0.45).detection();
            let chin = face.landmarks.chin_tip();
            face.landmarks = face.landmarks.map(|_| chin);
            Some(face)
        });
        let pipeline = Pipeline::new(config(), extractor);
        let photo = pipeline.process(&png(800, 1000), &plain()).await.unwrap();
        assert_eq!(photo.transform.strategy, FramingStrategy::CenterCrop);
        assert_eq!((photo.width, photo.height), (W, H));
    }

    #[tokio::test]
    async fn test_unavailable_extractor_degrades() {
        let shared = SharedExtractor::new(|| Err(ExtractorError::Poisoned));
        let pipeline = Pipeline::new(config(), shared);
        let photo = pipeline.process(&png(500, 600), &plain()).await.unwrap();

        let steps: Vec<Step> = photo.step_failures.iter().map(|f| f.step).collect();
        assert_eq!(steps, vec![Step::DetectFace, Step::DetectFinalFace]);
        assert_eq!(photo.report.status(Requirement::EyesOpen), Some(VerdictStatus::Uncertain));
    }

    #[tokio::test]
    async fn test_slow_model_load_is_kept_after_timeouts() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let shared = SharedExtractor::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            let no_face = |_: &RgbImage| -> Result<Option<FaceDetection>, ExtractorError> { Ok(None) };
            Ok(Arc::new(no_face) as Arc<dyn LandmarkExtractor>)
        });
        let cfg = PipelineConfig { step_timeout: Duration::from_millis(200), ..config() };
        let pipeline = Pipeline::new(cfg, shared.clone());

        let first = pipeline.process(&png(500, 600), &plain()).await.unwrap();
        assert_eq!(first.step_failures[0].step, Step::DetectFace);
        assert!(first.step_failures[0].reason.contains("timed out"));
        for _ in 0..2 {
            pipeline.process(&png(500, 600), &plain()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(shared.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let photo = pipeline.process(&png(500, 600), &plain()).await.unwrap();
        assert!(photo.step_failures.is_empty());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_native_resolution_keeps_aspect() {
        let pipeline = Pipeline::new(config(), fake(|_, _| None));
        let request = ProcessingConfig { resize: false, ..plain() };
        let photo = pipeline.process(&png(1400, 1000), &request).await.unwrap();
        assert_eq!((photo.width, photo.height), largest_window(1400, 1000, W, H));
        assert!(photo.height == 1000);
    }

    #[tokio::test]
    async fn test_tilt_correction_is_reported() {
        let extractor = fake(|w, h| {
            // Tilt only the input; the leveled output is found upright.
            let roll = if (w, h) == (900, 1200) { 8.0 } else { 0.0 };
            Some(SyntheticFace::centered_in(w, h, 0.65, 1.5, 0.45).with_roll(roll).detection())
        });
        let pipeline = Pipeline::new(config(), extractor);
        let request = ProcessingConfig { fix_head_tilt: true, ..plain() };
        let photo = pipeline.process(&png(900, 1200), &request).await.unwrap();
        let corrected = photo.tilt_corrected_deg.unwrap();
        assert!((corrected - 8.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_check_scores_without_framing() {
        let pipeline = Pipeline::new(config(), face_with(0.7, |f| f));
        let report = pipeline.check(&png(W, H)).await.unwrap();
        assert_eq!(report.entries.len(), 10);
        assert_eq!(report.status(Requirement::HeadHeight), Some(VerdictStatus::Met));
    }

    #[tokio::test]
    async fn test_result_serializes_without_bytes() {
        let pipeline = Pipeline::new(config(), fake(|_, _| None));
        let photo = pipeline.process(&png(500, 600), &plain()).await.unwrap();
        let json = serde_json::to_value(&photo).unwrap();
        assert!(json.get("bytes").is_none());
        assert_eq!(json["format"], "jpeg");
        assert_eq!(json["report"]["entries"].as_array().unwrap().len(), 10);
    }
}
