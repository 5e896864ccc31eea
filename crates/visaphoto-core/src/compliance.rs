//! Compliance evaluator: ten visa-photo rules scored from landmarks and pixels.
//!
//! Every evaluation yields exactly one verdict per [`Requirement`], in
//! [`Requirement::ALL`] order. Rules that need a face degrade to `not_met`
//! when none was found and to `uncertain` when the detector itself failed.

use crate::config::{Calibration, ComplianceThresholds};
use crate::geometry::{distance, horizontal_angle_deg, vertical_angle_deg};
use crate::sampler::{sample_border, sample_polygon, BrightnessStats};
use crate::types::{FaceDetection, LandmarkSet, Point};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub const NO_FACE_MESSAGE: &str = "No face detected in the photo";

/// The ten canonical photo rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    HeadHeight,
    NeutralExpression,
    EyesOpen,
    FaceCentered,
    MouthClosed,
    NoShadows,
    NoHairAcrossFace,
    NoHeadCovering,
    NoGlassesGlare,
    PlainBackground,
}

impl Requirement {
    pub const ALL: [Requirement; 10] = [
        Requirement::HeadHeight,
        Requirement::NeutralExpression,
        Requirement::EyesOpen,
        Requirement::FaceCentered,
        Requirement::MouthClosed,
        Requirement::NoShadows,
        Requirement::NoHairAcrossFace,
        Requirement::NoHeadCovering,
        Requirement::NoGlassesGlare,
        Requirement::PlainBackground,
    ];

    /// Human-readable rule name shown to the user.
    pub fn title(&self) -> &'static str {
        match self {
            Requirement::HeadHeight => "Head height within the required share of photo height",
            Requirement::NeutralExpression => "Neutral facial expression",
            Requirement::EyesOpen => "Eyes open and clearly visible",
            Requirement::FaceCentered => "Face centered and looking straight at the camera",
            Requirement::MouthClosed => "Mouth closed",
            Requirement::NoShadows => "No shadows on face or background",
            Requirement::NoHairAcrossFace => "No hair across eyes and the face",
            Requirement::NoHeadCovering => "No head covering (unless for religious reasons)",
            Requirement::NoGlassesGlare => "No glare on glasses, or preferably, no glasses",
            Requirement::PlainBackground => "Plain light-colored background",
        }
    }

    /// Whether the rule is scored from the detected face.
    pub fn needs_face(&self) -> bool {
        !matches!(
            self,
            Requirement::NoHeadCovering | Requirement::NoGlassesGlare | Requirement::PlainBackground
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Met,
    NotMet,
    Uncertain,
}

/// Outcome of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementVerdict {
    pub status: VerdictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The signal the rule was decided on (ratio, percentage, std-dev), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<f32>,
}

impl RequirementVerdict {
    pub fn met() -> Self {
        Self { status: VerdictStatus::Met, message: None, measured: None }
    }

    pub fn not_met(message: impl Into<String>) -> Self {
        Self { status: VerdictStatus::NotMet, message: Some(message.into()), measured: None }
    }

    pub fn uncertain(message: impl Into<String>) -> Self {
        Self { status: VerdictStatus::Uncertain, message: Some(message.into()), measured: None }
    }

    pub fn with_measured(mut self, value: f32) -> Self {
        self.measured = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub requirement: Requirement,
    pub title: String,
    #[serde(flatten)]
    pub verdict: RequirementVerdict,
}

/// All ten verdicts for one photo, in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub entries: Vec<ReportEntry>,
}

impl ComplianceReport {
    fn from_fn(mut verdict: impl FnMut(Requirement) -> RequirementVerdict) -> Self {
        Self {
            entries: Requirement::ALL
                .iter()
                .map(|&requirement| ReportEntry {
                    requirement,
                    title: requirement.title().to_string(),
                    verdict: verdict(requirement),
                })
                .collect(),
        }
    }

    pub fn get(&self, requirement: Requirement) -> Option<&RequirementVerdict> {
        self.entries
            .iter()
            .find(|e| e.requirement == requirement)
            .map(|e| &e.verdict)
    }

    pub fn status(&self, requirement: Requirement) -> Option<VerdictStatus> {
        self.get(requirement).map(|v| v.status)
    }

    pub fn count(&self, status: VerdictStatus) -> usize {
        self.entries.iter().filter(|e| e.verdict.status == status).count()
    }

    pub fn all_met(&self) -> bool {
        self.count(VerdictStatus::Met) == self.entries.len()
    }
}

/// What the landmark extractor said about the final image.
#[derive(Debug, Clone)]
pub enum FaceAnalysis {
    Detected(FaceDetection),
    NotDetected,
    /// The extractor could not run (model missing, timeout, inference error).
    Unavailable(String),
}

impl FaceAnalysis {
    pub fn from_detection(detection: Option<FaceDetection>) -> Self {
        match detection {
            Some(face) => FaceAnalysis::Detected(face),
            None => FaceAnalysis::NotDetected,
        }
    }
}

/// Eye aspect ratio of one six-point eye contour:
/// `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`. `None` for a zero-width eye.
pub fn eye_aspect_ratio(eye: &[Point]) -> Option<f32> {
    let [p1, p2, p3, p4, p5, p6] = <[Point; 6]>::try_from(eye).ok()?;
    let width = distance(p1, p4);
    if width <= f32::EPSILON {
        return None;
    }
    Some((distance(p2, p6) + distance(p3, p5)) / (2.0 * width))
}

/// Mean eye aspect ratio over both eyes.
pub fn average_eye_aspect_ratio(landmarks: &LandmarkSet) -> Option<f32> {
    let left = eye_aspect_ratio(landmarks.left_eye())?;
    let right = eye_aspect_ratio(landmarks.right_eye())?;
    Some((left + right) / 2.0)
}

/// Mean inner-lip opening divided by the mouth width. `None` for a zero-width mouth.
pub fn mouth_aspect_ratio(landmarks: &LandmarkSet) -> Option<f32> {
    let (left, right) = landmarks.mouth_corners();
    let width = distance(left, right);
    if width <= f32::EPSILON {
        return None;
    }
    let pairs = landmarks.inner_lip_pairs();
    let opening = pairs.iter().map(|(u, l)| distance(*u, *l)).sum::<f32>() / pairs.len() as f32;
    Some(opening / width)
}

/// Estimated full head height as a share of the image height.
pub fn head_height_ratio(landmarks: &LandmarkSet, multiplier: f32, image_height: u32) -> f32 {
    distance(landmarks.chin_tip(), landmarks.brow_reference()) * multiplier / image_height.max(1) as f32
}

/// Scores photos against the ten rules.
#[derive(Debug, Clone)]
pub struct ComplianceEvaluator {
    thresholds: ComplianceThresholds,
    head_height_multiplier: f32,
}

impl ComplianceEvaluator {
    pub fn new(calibration: &Calibration) -> Self {
        Self {
            thresholds: calibration.compliance.clone(),
            head_height_multiplier: calibration.framing.head_height_multiplier,
        }
    }

    /// Score the final photo. `background_replaced` reports whether background
    /// removal was requested and succeeded for this photo.
    pub fn evaluate(&self, image: &RgbImage, analysis: &FaceAnalysis, background_replaced: bool) -> ComplianceReport {
        let report = ComplianceReport::from_fn(|req| match (req.needs_face(), analysis) {
            (false, _) => self.face_independent(req, background_replaced),
            (true, FaceAnalysis::Detected(face)) => self.face_rule(req, image, face),
            (true, FaceAnalysis::NotDetected) => RequirementVerdict::not_met(NO_FACE_MESSAGE),
            (true, FaceAnalysis::Unavailable(reason)) => {
                RequirementVerdict::uncertain(format!("Face analysis unavailable: {reason}"))
            }
        });

        tracing::info!(
            met = report.count(VerdictStatus::Met),
            not_met = report.count(VerdictStatus::NotMet),
            uncertain = report.count(VerdictStatus::Uncertain),
            "compliance evaluated"
        );
        report
    }

    /// Verdicts that do not depend on the face. Face rules land on the
    /// generic no-face verdict, which `evaluate` never asks for.
    fn face_independent(&self, req: Requirement, background_replaced: bool) -> RequirementVerdict {
        match req {
            Requirement::NoHeadCovering => RequirementVerdict::uncertain(
                "Cannot be determined automatically; check that no head covering is worn",
            ),
            Requirement::NoGlassesGlare => RequirementVerdict::uncertain(
                "Cannot be determined automatically; remove glasses or make sure they show no glare",
            ),
            Requirement::PlainBackground if background_replaced => RequirementVerdict::met(),
            Requirement::PlainBackground => RequirementVerdict::uncertain(
                "Background was not replaced; make sure it is plain and light-colored",
            ),
            _ => RequirementVerdict::not_met(NO_FACE_MESSAGE),
        }
    }

    fn face_rule(&self, req: Requirement, image: &RgbImage, face: &FaceDetection) -> RequirementVerdict {
        match req {
            Requirement::HeadHeight => self.head_height(image, face),
            Requirement::NeutralExpression => self.neutral_expression(face),
            Requirement::EyesOpen => self.eyes_open(face),
            Requirement::FaceCentered => self.face_centered(image, face),
            Requirement::MouthClosed => self.mouth_closed(face),
            Requirement::NoShadows => self.no_shadows(image, face),
            Requirement::NoHairAcrossFace => self.no_hair(image, face),
            other => self.face_independent(other, false),
        }
    }

    fn head_height(&self, image: &RgbImage, face: &FaceDetection) -> RequirementVerdict {
        let t = &self.thresholds;
        let ratio = head_height_ratio(&face.landmarks, self.head_height_multiplier, image.height());
        let pct = |v: f32| v * 100.0;
        let verdict = if ratio > t.head_ratio_max {
            RequirementVerdict::not_met(format!(
                "Head is too large: {:.0}% of photo height (maximum {:.0}%)",
                pct(ratio),
                pct(t.head_ratio_max)
            ))
        } else if ratio >= t.head_ratio_min {
            RequirementVerdict::met()
        } else if ratio >= t.head_ratio_floor {
            RequirementVerdict::uncertain(format!(
                "Head is slightly small: {:.0}% of photo height (recommended at least {:.0}%)",
                pct(ratio),
                pct(t.head_ratio_min)
            ))
        } else {
            RequirementVerdict::not_met(format!(
                "Head is too small: {:.0}% of photo height (minimum {:.0}%)",
                pct(ratio),
                pct(t.head_ratio_floor)
            ))
        };
        verdict.with_measured(ratio)
    }

    fn neutral_expression(&self, face: &FaceDetection) -> RequirementVerdict {
        match face.neutral_score {
            None => RequirementVerdict::uncertain("Expression could not be assessed automatically"),
            Some(score) if score > self.thresholds.neutral_score_min => {
                RequirementVerdict::met().with_measured(score)
            }
            Some(score) => {
                RequirementVerdict::not_met("Expression does not appear neutral").with_measured(score)
            }
        }
    }

    fn eyes_open(&self, face: &FaceDetection) -> RequirementVerdict {
        let Some(ear) = average_eye_aspect_ratio(&face.landmarks) else {
            return RequirementVerdict::uncertain("Eye landmarks are degenerate; could not measure eye opening");
        };
        if ear > self.thresholds.eye_aspect_ratio_min {
            RequirementVerdict::met().with_measured(ear)
        } else {
            RequirementVerdict::not_met(format!("Eyes appear closed (eye aspect ratio {ear:.2})")).with_measured(ear)
        }
    }

    fn mouth_closed(&self, face: &FaceDetection) -> RequirementVerdict {
        let Some(mar) = mouth_aspect_ratio(&face.landmarks) else {
            return RequirementVerdict::uncertain("Mouth landmarks are degenerate; could not measure mouth opening");
        };
        if mar < self.thresholds.mouth_aspect_ratio_max {
            RequirementVerdict::met().with_measured(mar)
        } else {
            RequirementVerdict::not_met(format!("Mouth appears open (mouth aspect ratio {mar:.2})")).with_measured(mar)
        }
    }

    fn face_centered(&self, image: &RgbImage, face: &FaceDetection) -> RequirementVerdict {
        let t = &self.thresholds;
        let lm = &face.landmarks;
        let half_w = image.width().max(1) as f32 / 2.0;
        let half_h = image.height().max(1) as f32 / 2.0;
        let center = face.bounding_box.center();

        let eye_mid = lm.left_eye_center().midpoint(&lm.right_eye_center());
        let checks = [
            AlignmentCheck {
                name: "horizontal offset",
                value: (center.x - half_w).abs() / half_w * 100.0,
                unit: "%",
                pass: t.center_offset_pass_pct,
                fail: t.center_offset_fail_pct,
            },
            AlignmentCheck {
                name: "vertical offset",
                value: (center.y - half_h).abs() / half_h * 100.0,
                unit: "%",
                pass: t.center_offset_pass_pct,
                fail: t.center_offset_fail_pct,
            },
            AlignmentCheck {
                name: "head roll",
                value: horizontal_angle_deg(lm.left_eye_center(), lm.right_eye_center()).abs(),
                unit: "°",
                pass: t.eye_roll_pass_deg,
                fail: t.eye_roll_fail_deg,
            },
            AlignmentCheck {
                name: "head turn",
                value: vertical_angle_deg(eye_mid, lm.nose_tip()).abs(),
                unit: "°",
                pass: t.nose_angle_pass_deg,
                fail: t.nose_angle_fail_deg,
            },
        ];

        let failing: Vec<String> = checks.iter().filter(|c| c.value > c.fail).map(AlignmentCheck::describe).collect();
        let warnings: Vec<String> = checks.iter().filter(|c| c.value > c.pass).map(AlignmentCheck::describe).collect();
        let worst_offset = checks[0].value.max(checks[1].value);

        let verdict = if !failing.is_empty() {
            RequirementVerdict::not_met(format!("Face is not centered or straight: {}", failing.join(", ")))
        } else if !warnings.is_empty() {
            RequirementVerdict::uncertain(format!("Face is slightly off: {}", warnings.join(", ")))
        } else {
            RequirementVerdict::met()
        };
        verdict.with_measured(worst_offset)
    }

    /// Sample count equivalent to `min_region_pixels` on the sampling grid.
    fn min_region_samples(&self) -> usize {
        let step = self.thresholds.sample_step.max(1) as usize;
        self.thresholds.min_region_pixels.div_ceil(step * step)
    }

    fn region_stats(&self, polygon: &[Point], image: &RgbImage) -> BrightnessStats {
        BrightnessStats::from_samples(&sample_polygon(polygon, image, self.thresholds.sample_step))
    }

    fn no_hair(&self, image: &RgbImage, face: &FaceDetection) -> RequirementVerdict {
        let t = &self.thresholds;
        let lm = &face.landmarks;
        let regions = [
            ("left eye", self.region_stats(lm.left_eye(), image), t.hair_eye_std_max),
            ("right eye", self.region_stats(lm.right_eye(), image), t.hair_eye_std_max),
            ("face", self.region_stats(&lm.face_contour(), image), t.hair_face_std_max),
        ];
        judge_regions(&regions, self.min_region_samples(), "Possible hair or occlusion over the")
    }

    fn no_shadows(&self, image: &RgbImage, face: &FaceDetection) -> RequirementVerdict {
        let t = &self.thresholds;
        let face_stats = self.region_stats(&face.landmarks.face_contour(), image);
        let background = BrightnessStats::from_samples(&sample_border(
            image,
            t.background_strip_fraction,
            &face.bounding_box,
            t.sample_step,
        ));
        let regions = [
            ("face", face_stats, t.shadow_face_std_max),
            ("background", background, t.shadow_background_std_max),
        ];
        judge_regions(&regions, self.min_region_samples(), "Uneven lighting or shadows on the")
    }
}

struct AlignmentCheck {
    name: &'static str,
    value: f32,
    unit: &'static str,
    pass: f32,
    fail: f32,
}

impl AlignmentCheck {
    fn describe(&self) -> String {
        format!("{} {:.1}{}", self.name, self.value, self.unit)
    }
}

/// Shared decision for the brightness-variance rules.
///
/// Any reliable region above its limit fails the rule; all regions reliable
/// and below their limits pass it; otherwise the verdict names the regions
/// that were too small to judge.
fn judge_regions(regions: &[(&str, BrightnessStats, f32)], min_samples: usize, failure_prefix: &str) -> RequirementVerdict {
    let reliable: Vec<_> = regions.iter().filter(|r| r.1.is_reliable(min_samples)).collect();
    let worst = reliable.iter().map(|r| r.1.std_dev).fold(0.0f32, f32::max);

    let over: Vec<String> = reliable
        .iter()
        .filter(|(_, stats, limit)| stats.std_dev > *limit)
        .map(|(name, stats, _)| format!("{name} (brightness deviation {:.1})", stats.std_dev))
        .collect();
    if !over.is_empty() {
        return RequirementVerdict::not_met(format!("{failure_prefix} {}", over.join(", "))).with_measured(worst);
    }

    let skipped: Vec<&str> = regions
        .iter()
        .filter(|r| !r.1.is_reliable(min_samples))
        .map(|r| r.0)
        .collect();
    if reliable.is_empty() {
        return RequirementVerdict::uncertain(format!("Regions too small to assess: {}", skipped.join(", ")));
    }
    if skipped.is_empty() {
        RequirementVerdict::met().with_measured(worst)
    } else {
        RequirementVerdict::uncertain(format!("Could not assess: {}", skipped.join(", "))).with_measured(worst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticFace;
    use image::Rgb;

    const W: u32 = 413;
    const H: u32 = 531;

    fn evaluator() -> ComplianceEvaluator {
        ComplianceEvaluator::new(&Calibration::default())
    }

    fn grey() -> RgbImage {
        RgbImage::from_pixel(W, H, Rgb([180, 170, 160]))
    }

    fn face(ratio: f32) -> SyntheticFace {
        SyntheticFace::centered_in(W, H, ratio, 1.5, 0.45)
    }

    #[test]
    fn test_report_has_ten_rules_in_order() {
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::NotDetected, false);
        let order: Vec<_> = report.entries.iter().map(|e| e.requirement).collect();
        assert_eq!(order, Requirement::ALL.to_vec());
    }

    #[test]
    fn test_no_face_marks_face_rules_not_met() {
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::NotDetected, false);
        for entry in &report.entries {
            if entry.requirement.needs_face() {
                assert_eq!(entry.verdict.status, VerdictStatus::NotMet, "{:?}", entry.requirement);
                assert_eq!(entry.verdict.message.as_deref(), Some(NO_FACE_MESSAGE));
            } else {
                assert_eq!(entry.verdict.status, VerdictStatus::Uncertain);
            }
        }
    }

    #[test]
    fn test_unavailable_analysis_is_uncertain() {
        let analysis = FaceAnalysis::Unavailable("model not loaded".into());
        let report = evaluator().evaluate(&grey(), &analysis, false);
        let eyes = report.get(Requirement::EyesOpen).unwrap();
        assert_eq!(eyes.status, VerdictStatus::Uncertain);
        assert!(eyes.message.as_deref().unwrap().contains("model not loaded"));
    }

    #[test]
    fn test_frontal_face_passes_geometry_rules() {
        let det = face(0.65).with_eye_aspect_ratio(0.35).with_mouth_aspect_ratio(0.1).detection();
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::Detected(det), false);
        assert_eq!(report.status(Requirement::EyesOpen), Some(VerdictStatus::Met));
        assert_eq!(report.status(Requirement::MouthClosed), Some(VerdictStatus::Met));
        assert_eq!(report.status(Requirement::HeadHeight), Some(VerdictStatus::Met));
        assert_eq!(report.status(Requirement::FaceCentered), Some(VerdictStatus::Met));
        let head = report.get(Requirement::HeadHeight).unwrap();
        assert!((head.measured.unwrap() - 0.65).abs() < 1e-3);
        let ear = report.get(Requirement::EyesOpen).unwrap().measured.unwrap();
        assert!((ear - 0.35).abs() < 1e-4);
    }

    #[test]
    fn test_closed_eyes_not_met() {
        let det = face(0.65).with_eye_aspect_ratio(0.05).detection();
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::Detected(det), false);
        let eyes = report.get(Requirement::EyesOpen).unwrap();
        assert_eq!(eyes.status, VerdictStatus::NotMet);
        assert!(eyes.message.as_deref().unwrap().contains("closed"));
    }

    #[test]
    fn test_open_mouth_not_met() {
        let det = face(0.65).with_mouth_aspect_ratio(0.6).detection();
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::Detected(det), false);
        assert_eq!(report.status(Requirement::MouthClosed), Some(VerdictStatus::NotMet));
    }

    #[test]
    fn test_head_height_bands() {
        let e = evaluator();
        let status = |ratio: f32| {
            let det = face(ratio).detection();
            e.evaluate(&grey(), &FaceAnalysis::Detected(det), false).status(Requirement::HeadHeight)
        };
        assert_eq!(status(0.70), Some(VerdictStatus::Met));
        assert_eq!(status(0.55), Some(VerdictStatus::Uncertain));
        assert_eq!(status(0.40), Some(VerdictStatus::NotMet));
        assert_eq!(status(0.90), Some(VerdictStatus::NotMet));
    }

    #[test]
    fn test_aspect_ratios_are_scale_invariant() {
        let lm = face(0.65).with_eye_aspect_ratio(0.27).with_mouth_aspect_ratio(0.18).landmarks();
        let scaled = lm.map(|p| p.scaled(3.7));
        let ear = average_eye_aspect_ratio(&lm).unwrap();
        let mar = mouth_aspect_ratio(&lm).unwrap();
        assert!((average_eye_aspect_ratio(&scaled).unwrap() - ear).abs() < 1e-5);
        assert!((mouth_aspect_ratio(&scaled).unwrap() - mar).abs() < 1e-5);
        assert!((ear - 0.27).abs() < 1e-4);
        assert!((mar - 0.18).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_eye_is_none() {
        assert_eq!(eye_aspect_ratio(&[Point::new(1.0, 1.0); 6]), None);
        assert_eq!(eye_aspect_ratio(&[Point::new(1.0, 1.0); 3]), None);
    }

    #[test]
    fn test_off_center_face_not_met() {
        let mut det = face(0.65).detection();
        det.bounding_box.x += 150.0;
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::Detected(det), false);
        let centered = report.get(Requirement::FaceCentered).unwrap();
        assert_eq!(centered.status, VerdictStatus::NotMet);
        assert!(centered.message.as_deref().unwrap().contains("horizontal offset"));
    }

    #[test]
    fn test_slight_roll_is_uncertain() {
        let det = face(0.65).with_roll(9.0).detection();
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::Detected(det), false);
        let centered = report.get(Requirement::FaceCentered).unwrap();
        assert_eq!(centered.status, VerdictStatus::Uncertain);
        assert!(centered.message.as_deref().unwrap().contains("head roll"));
    }

    #[test]
    fn test_uniform_image_has_no_shadows() {
        let det = face(0.65).detection();
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::Detected(det), false);
        assert_eq!(report.status(Requirement::NoShadows), Some(VerdictStatus::Met));
    }

    #[test]
    fn test_patchy_face_reports_face_region() {
        let det = face(0.65).detection();
        let bbox = det.bounding_box;
        // Stripes inside the face box only; the border stays flat.
        let img = RgbImage::from_fn(W, H, |x, y| {
            if bbox.contains(x as f32, y as f32) && (y / 6) % 2 == 0 {
                Rgb([20, 20, 20])
            } else {
                Rgb([180, 170, 160])
            }
        });
        let report = evaluator().evaluate(&img, &FaceAnalysis::Detected(det), false);
        let shadows = report.get(Requirement::NoShadows).unwrap();
        assert_eq!(shadows.status, VerdictStatus::NotMet);
        let msg = shadows.message.as_deref().unwrap();
        assert!(msg.contains("face") && !msg.contains("background"), "{msg}");
        assert_eq!(report.status(Requirement::NoHairAcrossFace), Some(VerdictStatus::NotMet));
    }

    #[test]
    fn test_neutral_score() {
        let e = evaluator();
        let with = |score: Option<f32>| {
            let synthetic = match score {
                Some(score) => face(0.65).with_neutral_score(score),
                None => face(0.65),
            };
            let det = synthetic.detection();
            e.evaluate(&grey(), &FaceAnalysis::Detected(det), false).status(Requirement::NeutralExpression)
        };
        assert_eq!(with(None), Some(VerdictStatus::Uncertain));
        assert_eq!(with(Some(0.9)), Some(VerdictStatus::Met));
        assert_eq!(with(Some(0.3)), Some(VerdictStatus::NotMet));
    }

    #[test]
    fn test_plain_background_follows_replacement() {
        let e = evaluator();
        let replaced = e.evaluate(&grey(), &FaceAnalysis::NotDetected, true);
        assert_eq!(replaced.status(Requirement::PlainBackground), Some(VerdictStatus::Met));
        let kept = e.evaluate(&grey(), &FaceAnalysis::NotDetected, false);
        assert_eq!(kept.status(Requirement::PlainBackground), Some(VerdictStatus::Uncertain));
        assert_eq!(kept.status(Requirement::NoHeadCovering), Some(VerdictStatus::Uncertain));
        assert_eq!(kept.status(Requirement::NoGlassesGlare), Some(VerdictStatus::Uncertain));
    }

    #[test]
    fn test_clean_face_has_no_hair_or_shadows() {
        let e = evaluator();
        for ratio in [0.55, 0.65, 0.75] {
            let det = face(ratio).detection();
            let report = e.evaluate(&grey(), &FaceAnalysis::Detected(det), false);
            assert_eq!(report.status(Requirement::NoHairAcrossFace), Some(VerdictStatus::Met), "ratio {ratio}");
            assert_eq!(report.status(Requirement::NoShadows), Some(VerdictStatus::Met), "ratio {ratio}");
        }
    }

    #[test]
    fn test_region_floor_counts_pixels_not_samples() {
        assert_eq!(evaluator().min_region_samples(), 25);
        let mut calibration = Calibration::default();
        calibration.compliance.sample_step = 1;
        assert_eq!(ComplianceEvaluator::new(&calibration).min_region_samples(), 100);
        calibration.compliance.sample_step = 3;
        assert_eq!(ComplianceEvaluator::new(&calibration).min_region_samples(), 12);
    }

    #[test]
    fn test_small_regions_are_skipped() {
        let stats = |count: usize, std_dev: f32| BrightnessStats { count, mean: 100.0, std_dev };
        let verdict = judge_regions(&[("eye", stats(10, 50.0), 5.0)], 100, "Hair over the");
        assert_eq!(verdict.status, VerdictStatus::Uncertain);
        let verdict = judge_regions(&[("eye", stats(10, 50.0), 5.0), ("face", stats(500, 2.0), 10.0)], 100, "Hair over the");
        assert_eq!(verdict.status, VerdictStatus::Uncertain);
        assert!(verdict.message.unwrap().contains("eye"));
        let verdict = judge_regions(&[("face", stats(500, 2.0), 10.0)], 100, "Hair over the");
        assert_eq!(verdict.status, VerdictStatus::Met);
    }

    #[test]
    fn test_report_serializes_snake_case() {
        let report = evaluator().evaluate(&grey(), &FaceAnalysis::NotDetected, true);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entries"][0]["requirement"], "head_height");
        assert_eq!(json["entries"][0]["status"], "not_met");
        assert_eq!(json["entries"][9]["status"], "met");
        assert!(json["entries"][9].get("message").is_none());
    }
}
