//! Parametric 68-point faces with known measurements.
//!
//! Used by tests and for calibrating thresholds without a detector: every
//! quantity the compliance rules measure (chin-to-brow length, eye and mouth
//! aspect ratios, roll) is an input here.

use crate::types::{BoundingBox, FaceDetection, LandmarkSet, Point};
use std::f32::consts::PI;

/// Horizontal offset of the brow reference point, as a fraction of half face width.
const BROW_REFERENCE_DX: f32 = 0.45;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticFace {
    pub center_x: f32,
    pub chin_y: f32,
    /// Exact distance between the chin tip and the brow reference point.
    pub chin_to_brow: f32,
    pub half_width: f32,
    pub eye_aspect_ratio: f32,
    pub mouth_aspect_ratio: f32,
    /// Clockwise rotation (image coordinates) about the face center.
    pub roll_deg: f32,
    pub neutral_score: Option<f32>,
}

impl SyntheticFace {
    pub fn new(center_x: f32, chin_y: f32, chin_to_brow: f32) -> Self {
        Self {
            center_x,
            chin_y,
            chin_to_brow,
            half_width: chin_to_brow * 0.55,
            eye_aspect_ratio: 0.30,
            mouth_aspect_ratio: 0.10,
            roll_deg: 0.0,
            neutral_score: None,
        }
    }

    /// Face centered horizontally whose `chin_to_brow × multiplier / height`
    /// equals `head_ratio`, with the face box centered at `center_from_top × height`.
    pub fn centered_in(width: u32, height: u32, head_ratio: f32, multiplier: f32, center_from_top: f32) -> Self {
        let chin_to_brow = head_ratio * height as f32 / multiplier;
        let probe = Self::new(0.0, 0.0, chin_to_brow);
        let span = probe.vertical_span();
        // Box center sits 0.375 of the span below the brow line.
        let chin_y = center_from_top * height as f32 + 0.625 * span;
        Self::new(width as f32 / 2.0, chin_y, chin_to_brow)
    }

    pub fn with_eye_aspect_ratio(mut self, ear: f32) -> Self {
        self.eye_aspect_ratio = ear;
        self
    }

    pub fn with_mouth_aspect_ratio(mut self, mar: f32) -> Self {
        self.mouth_aspect_ratio = mar;
        self
    }

    pub fn with_roll(mut self, degrees: f32) -> Self {
        self.roll_deg = degrees;
        self
    }

    pub fn with_neutral_score(mut self, score: f32) -> Self {
        self.neutral_score = Some(score);
        self
    }

    fn vertical_span(&self) -> f32 {
        let dx = BROW_REFERENCE_DX * self.half_width;
        (self.chin_to_brow.powi(2) - dx * dx).max(0.0).sqrt()
    }

    fn brow_y(&self) -> f32 {
        self.chin_y - self.vertical_span()
    }

    fn rotation_center(&self) -> Point {
        Point::new(self.center_x, (self.brow_y() + self.chin_y) / 2.0)
    }

    fn rotate(&self, p: Point) -> Point {
        if self.roll_deg == 0.0 {
            return p;
        }
        let c = self.rotation_center();
        let (sin, cos) = self.roll_deg.to_radians().sin_cos();
        let (vx, vy) = (p.x - c.x, p.y - c.y);
        Point::new(c.x + vx * cos - vy * sin, c.y + vx * sin + vy * cos)
    }

    pub fn landmarks(&self) -> LandmarkSet {
        let cx = self.center_x;
        let hw = self.half_width;
        let span = self.vertical_span();
        let brow_y = self.brow_y();
        let eye_y = brow_y + 0.2 * span;
        let nose_y = brow_y + 0.55 * span;
        let mouth_y = brow_y + 0.78 * span;

        let mut pts = Vec::with_capacity(68);

        // Jaw 0..17: half ellipse from temple to temple through the chin.
        for i in 0..17 {
            let t = PI * i as f32 / 16.0;
            pts.push(Point::new(cx - hw * t.cos(), eye_y + (self.chin_y - eye_y) * t.sin()));
        }
        pts[8] = Point::new(cx, self.chin_y);

        // Brows 17..27.
        for dx in [-0.85, -0.65, -0.45, -0.30, -0.15, 0.15, 0.30, BROW_REFERENCE_DX, 0.65, 0.85] {
            pts.push(Point::new(cx + dx * hw, brow_y));
        }

        // Nose bridge 27..31, nostrils 31..36.
        for k in 0..4 {
            pts.push(Point::new(cx, eye_y + (nose_y - eye_y) * k as f32 / 3.0));
        }
        for dx in [-0.16, -0.08, 0.0, 0.08, 0.16] {
            pts.push(Point::new(cx + dx * hw, nose_y + 0.05 * span));
        }

        // Eyes 36..48: p1 outer corner, p2/p3 upper lid, p4 corner, p5/p6 lower lid.
        let eye_w = 0.35 * hw;
        let lid = self.eye_aspect_ratio * eye_w / 2.0;
        for ex in [cx - 0.4 * hw, cx + 0.4 * hw] {
            pts.push(Point::new(ex - eye_w / 2.0, eye_y));
            pts.push(Point::new(ex - eye_w / 6.0, eye_y - lid));
            pts.push(Point::new(ex + eye_w / 6.0, eye_y - lid));
            pts.push(Point::new(ex + eye_w / 2.0, eye_y));
            pts.push(Point::new(ex + eye_w / 6.0, eye_y + lid));
            pts.push(Point::new(ex - eye_w / 6.0, eye_y + lid));
        }

        // Outer lips 48..60: corner, upper arc, corner, lower arc.
        let mouth_w = 0.8 * hw;
        let gap = self.mouth_aspect_ratio * mouth_w;
        let lip = 0.12 * span + gap / 2.0;
        for k in 0..=6 {
            let t = PI * k as f32 / 6.0;
            pts.push(Point::new(cx - mouth_w / 2.0 * t.cos(), mouth_y - lip * t.sin()));
        }
        for k in 1..6 {
            let t = PI * k as f32 / 6.0;
            pts.push(Point::new(cx + mouth_w / 2.0 * t.cos(), mouth_y + lip * t.sin()));
        }
        pts[48] = Point::new(cx - mouth_w / 2.0, mouth_y);
        pts[54] = Point::new(cx + mouth_w / 2.0, mouth_y);

        // Inner lips 60..68.
        let half_gap = gap / 2.0;
        pts.extend([
            Point::new(cx - 0.4 * mouth_w, mouth_y),
            Point::new(cx - 0.2 * mouth_w, mouth_y - half_gap),
            Point::new(cx, mouth_y - half_gap),
            Point::new(cx + 0.2 * mouth_w, mouth_y - half_gap),
            Point::new(cx + 0.4 * mouth_w, mouth_y),
            Point::new(cx + 0.2 * mouth_w, mouth_y + half_gap),
            Point::new(cx, mouth_y + half_gap),
            Point::new(cx - 0.2 * mouth_w, mouth_y + half_gap),
        ]);

        let pts = pts.into_iter().map(|p| self.rotate(p)).collect();
        // 68 points by construction.
        match LandmarkSet::new(pts) {
            Ok(set) => set,
            Err(e) => unreachable!("synthetic face layout broken: {e}"),
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let span = self.vertical_span();
        let top = self.brow_y() - 0.25 * span;
        let height = self.chin_y - top;
        let center = self.rotate(Point::new(self.center_x, top + height / 2.0));
        BoundingBox::new(center.x - self.half_width, center.y - height / 2.0, 2.0 * self.half_width, height)
    }

    pub fn detection(&self) -> FaceDetection {
        FaceDetection {
            bounding_box: self.bounding_box(),
            landmarks: self.landmarks(),
            confidence: 0.99,
            neutral_score: self.neutral_score,
        }
    }
}
