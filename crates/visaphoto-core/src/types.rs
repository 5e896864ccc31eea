use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in the canonical (iBUG / dlib) landmark layout.
pub const LANDMARK_COUNT: usize = 68;

// --- Landmark index table (68-point convention, image-side naming) ---
const JAW: std::ops::Range<usize> = 0..17;
const LEFT_BROW: std::ops::Range<usize> = 17..22;
const RIGHT_BROW: std::ops::Range<usize> = 22..27;
const LEFT_EYE: std::ops::Range<usize> = 36..42;
const RIGHT_EYE: std::ops::Range<usize> = 42..48;
const CHIN_TIP: usize = 8;
const BROW_REFERENCE: usize = 24;
const NOSE_TIP: usize = 30;
const MOUTH_LEFT_CORNER: usize = 48;
const MOUTH_RIGHT_CORNER: usize = 54;
/// Inner-lip vertical pairs (upper, lower).
const INNER_LIP_PAIRS: [(usize, usize); 3] = [(61, 67), (62, 66), (63, 65)];

/// A 2-D point in pixel coordinates of one specific image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn scaled(&self, factor: f32) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }
}

/// Axis-aligned face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum LandmarkError {
    #[error("expected {LANDMARK_COUNT} landmarks, got {0}")]
    WrongPointCount(usize),
}

/// The 68 canonical facial landmarks of one detection.
///
/// Indices follow the iBUG 300-W convention. Consumers go through the named
/// accessors below; raw indices live only in the table at the top of this file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Point>", into = "Vec<Point>")]
pub struct LandmarkSet {
    points: Vec<Point>,
}

impl TryFrom<Vec<Point>> for LandmarkSet {
    type Error = LandmarkError;

    fn try_from(points: Vec<Point>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<LandmarkSet> for Vec<Point> {
    fn from(set: LandmarkSet) -> Self {
        set.points
    }
}

impl LandmarkSet {
    pub fn new(points: Vec<Point>) -> Result<Self, LandmarkError> {
        if points.len() != LANDMARK_COUNT {
            return Err(LandmarkError::WrongPointCount(points.len()));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Apply `f` to every point, preserving index order.
    pub fn map(&self, f: impl Fn(Point) -> Point) -> LandmarkSet {
        LandmarkSet {
            points: self.points.iter().copied().map(f).collect(),
        }
    }

    /// Bottom of the chin.
    pub fn chin_tip(&self) -> Point {
        self.points[CHIN_TIP]
    }

    /// Upper reference on the brow line, used as the measurable proxy for the crown.
    pub fn brow_reference(&self) -> Point {
        self.points[BROW_REFERENCE]
    }

    pub fn nose_tip(&self) -> Point {
        self.points[NOSE_TIP]
    }

    /// Six-point contour of the eye on the left side of the image.
    pub fn left_eye(&self) -> &[Point] {
        &self.points[LEFT_EYE]
    }

    /// Six-point contour of the eye on the right side of the image.
    pub fn right_eye(&self) -> &[Point] {
        &self.points[RIGHT_EYE]
    }

    pub fn left_eye_center(&self) -> Point {
        centroid(self.left_eye())
    }

    pub fn right_eye_center(&self) -> Point {
        centroid(self.right_eye())
    }

    pub fn left_brow(&self) -> &[Point] {
        &self.points[LEFT_BROW]
    }

    pub fn right_brow(&self) -> &[Point] {
        &self.points[RIGHT_BROW]
    }

    pub fn jaw(&self) -> &[Point] {
        &self.points[JAW]
    }

    /// Left and right outer mouth corners.
    pub fn mouth_corners(&self) -> (Point, Point) {
        (self.points[MOUTH_LEFT_CORNER], self.points[MOUTH_RIGHT_CORNER])
    }

    /// Upper/lower inner-lip point pairs, left to right.
    pub fn inner_lip_pairs(&self) -> [(Point, Point); 3] {
        INNER_LIP_PAIRS.map(|(upper, lower)| (self.points[upper], self.points[lower]))
    }

    /// Closed face outline: jaw from left temple to right temple, then the
    /// brows back from right to left.
    pub fn face_contour(&self) -> Vec<Point> {
        let mut contour: Vec<Point> = self.jaw().to_vec();
        contour.extend(self.right_brow().iter().rev());
        contour.extend(self.left_brow().iter().rev());
        contour
    }
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len().max(1) as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// One detected face: its box, its landmarks and, when the extractor has an
/// expression head, the probability that the expression is neutral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bounding_box: BoundingBox,
    pub landmarks: LandmarkSet,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neutral_score: Option<f32>,
}

impl FaceDetection {
    /// Map the detection into another coordinate space. The box is rebuilt
    /// around its transformed center and keeps its size scaled by `scale`.
    pub fn transformed(&self, scale: f32, f: impl Fn(Point) -> Point) -> FaceDetection {
        let center = f(self.bounding_box.center());
        let width = self.bounding_box.width * scale;
        let height = self.bounding_box.height * scale;
        FaceDetection {
            bounding_box: BoundingBox::new(
                center.x - width / 2.0,
                center.y - height / 2.0,
                width,
                height,
            ),
            landmarks: self.landmarks.map(f),
            confidence: self.confidence,
            neutral_score: self.neutral_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed_points() -> Vec<Point> {
        (0..LANDMARK_COUNT).map(|i| Point::new(i as f32, 0.0)).collect()
    }

    #[test]
    fn test_landmark_set_rejects_wrong_count() {
        let err = LandmarkSet::new(vec![Point::new(0.0, 0.0); 5]).unwrap_err();
        assert_eq!(err, LandmarkError::WrongPointCount(5));
    }

    #[test]
    fn test_named_accessors_follow_index_table() {
        let set = LandmarkSet::new(indexed_points()).unwrap();
        assert_eq!(set.chin_tip().x, 8.0);
        assert_eq!(set.brow_reference().x, 24.0);
        assert_eq!(set.nose_tip().x, 30.0);
        assert_eq!(set.left_eye().len(), 6);
        assert_eq!(set.left_eye()[0].x, 36.0);
        assert_eq!(set.right_eye()[0].x, 42.0);
        assert_eq!(set.mouth_corners().0.x, 48.0);
        assert_eq!(set.mouth_corners().1.x, 54.0);
        assert_eq!(set.inner_lip_pairs()[1].0.x, 62.0);
        assert_eq!(set.inner_lip_pairs()[1].1.x, 66.0);
    }

    #[test]
    fn test_face_contour_closes_over_brows() {
        let set = LandmarkSet::new(indexed_points()).unwrap();
        let contour = set.face_contour();
        assert_eq!(contour.len(), 17 + 10);
        assert_eq!(contour[16].x, 16.0);
        assert_eq!(contour[17].x, 26.0);
        assert_eq!(contour.last().unwrap().x, 17.0);
    }

    #[test]
    fn test_landmark_set_serde_validates_length() {
        let json = serde_json::to_string(&vec![Point::new(1.0, 2.0); 3]).unwrap();
        assert!(serde_json::from_str::<LandmarkSet>(&json).is_err());

        let set = LandmarkSet::new(indexed_points()).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let back: LandmarkSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_transformed_moves_box_with_center() {
        let det = FaceDetection {
            bounding_box: BoundingBox::new(10.0, 20.0, 40.0, 60.0),
            landmarks: LandmarkSet::new(indexed_points()).unwrap(),
            confidence: 0.9,
            neutral_score: None,
        };
        let moved = det.transformed(2.0, |p| p.scaled(2.0));
        assert_eq!(moved.bounding_box.center(), Point::new(60.0, 100.0));
        assert_eq!(moved.bounding_box.width, 80.0);
        assert_eq!(moved.landmarks.chin_tip().x, 16.0);
    }
}
