//! Head-tilt correction: rotate the photo so the eye line is level.
//!
//! The rotation pivots on the midpoint between the eyes, keeps the canvas
//! size, and carries the detection along so framing can reuse it without a
//! second detector pass.

use crate::config::FramingPolicy;
use crate::geometry::horizontal_angle_deg;
use crate::types::{FaceDetection, Point};
use image::{Rgb, RgbImage};

/// Rotation about a pivot, in image coordinates (y down, positive = clockwise).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation {
    pub pivot: Point,
    pub degrees: f32,
}

impl Rotation {
    pub fn apply(&self, p: Point) -> Point {
        let (sin, cos) = self.degrees.to_radians().sin_cos();
        let (vx, vy) = (p.x - self.pivot.x, p.y - self.pivot.y);
        Point::new(
            self.pivot.x + vx * cos - vy * sin,
            self.pivot.y + vx * sin + vy * cos,
        )
    }

    pub fn inverse(&self) -> Rotation {
        Rotation {
            pivot: self.pivot,
            degrees: -self.degrees,
        }
    }
}

/// Roll of the eye line in degrees; positive when the right-hand eye sits lower.
pub fn eye_line_angle(face: &FaceDetection) -> f32 {
    let lm = &face.landmarks;
    horizontal_angle_deg(lm.left_eye_center(), lm.right_eye_center())
}

/// Result of leveling a tilted head.
pub struct LeveledHead {
    pub image: RgbImage,
    pub face: FaceDetection,
    /// Roll that was removed, in degrees.
    pub corrected_deg: f32,
}

/// Level the eye line when its roll lies within the policy's correction window.
///
/// Returns `None` when the head is already level enough, or when the roll is
/// so large that the detection is more likely wrong than the head tilted.
pub fn level_head(image: &RgbImage, face: &FaceDetection, policy: &FramingPolicy) -> Option<LeveledHead> {
    let roll = eye_line_angle(face);
    if roll.abs() < policy.min_tilt_correction_deg || roll.abs() > policy.max_tilt_correction_deg {
        return None;
    }

    let lm = &face.landmarks;
    let forward = Rotation {
        pivot: lm.left_eye_center().midpoint(&lm.right_eye_center()),
        degrees: -roll,
    };

    tracing::debug!(roll, pivot = ?forward.pivot, "leveling head");

    Some(LeveledHead {
        image: rotate_image(image, &forward),
        face: face.transformed(1.0, |p| forward.apply(p)),
        corrected_deg: roll,
    })
}

/// Rotate an RGB image with bilinear sampling. Samples outside the source
/// repeat the nearest edge pixel so no black wedges appear in the corners.
pub fn rotate_image(image: &RgbImage, rotation: &Rotation) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    // Map each output pixel back into the source.
    let back = rotation.inverse();
    let max_x = (w - 1) as i64;
    let max_y = (h - 1) as i64;
    let fetch = |x: i64, y: i64| image.get_pixel(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32);

    RgbImage::from_fn(w, h, |ox, oy| {
        let src = back.apply(Point::new(ox as f32, oy as f32));
        let x0 = src.x.floor() as i64;
        let y0 = src.y.floor() as i64;
        let fx = src.x - x0 as f32;
        let fy = src.y - y0 as f32;

        let (tl, tr) = (fetch(x0, y0), fetch(x0 + 1, y0));
        let (bl, br) = (fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1));

        let channel = |c: usize| {
            let val = tl[c] as f32 * (1.0 - fx) * (1.0 - fy)
                + tr[c] as f32 * fx * (1.0 - fy)
                + bl[c] as f32 * (1.0 - fx) * fy
                + br[c] as f32 * fx * fy;
            val.round().clamp(0.0, 255.0) as u8
        };
        Rgb([channel(0), channel(1), channel(2)])
    })
}
