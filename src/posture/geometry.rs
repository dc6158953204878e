//! Planar helpers over normalized image coordinates (origin top-left, y down).

use crate::pose::{Landmark, LandmarkFrame, LandmarkIndex};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl From<&Landmark> for Point {
    fn from(lm: &Landmark) -> Self {
        Self {
            x: lm.x as f64,
            y: lm.y as f64,
        }
    }
}

pub fn midpoint(a: Point, b: Point) -> Point {
    Point {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
    }
}

pub fn distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Signed angle in degrees between the line bottom→top and the vertical.
/// 0 is upright, positive leans toward +x.
pub fn angle_from_vertical(top: Point, bottom: Point) -> f64 {
    let dx = top.x - bottom.x;
    let dy = top.y - bottom.y;
    dx.atan2(-dy).to_degrees()
}

/// Named points of the six tracked landmarks.
#[derive(Debug, Clone, Copy)]
pub struct Torso {
    pub left_ear: Point,
    pub right_ear: Point,
    pub left_shoulder: Point,
    pub right_shoulder: Point,
    pub left_hip: Point,
    pub right_hip: Point,
}

impl Torso {
    pub fn from_frame(frame: &LandmarkFrame) -> Self {
        let point = |index| Point::from(frame.get(index));
        Self {
            left_ear: point(LandmarkIndex::LeftEar),
            right_ear: point(LandmarkIndex::RightEar),
            left_shoulder: point(LandmarkIndex::LeftShoulder),
            right_shoulder: point(LandmarkIndex::RightShoulder),
            left_hip: point(LandmarkIndex::LeftHip),
            right_hip: point(LandmarkIndex::RightHip),
        }
    }

    pub fn ear_mid(&self) -> Point {
        midpoint(self.left_ear, self.right_ear)
    }

    pub fn shoulder_mid(&self) -> Point {
        midpoint(self.left_shoulder, self.right_shoulder)
    }

    pub fn hip_mid(&self) -> Point {
        midpoint(self.left_hip, self.right_hip)
    }

    pub fn shoulder_width(&self) -> f64 {
        distance(self.left_shoulder, self.right_shoulder)
    }

    pub fn hip_width(&self) -> f64 {
        distance(self.left_hip, self.right_hip)
    }

    /// Shoulder line tilt as |Δy|.
    pub fn shoulder_tilt(&self) -> f64 {
        (self.left_shoulder.y - self.right_shoulder.y).abs()
    }

    /// Lean of the shoulder-midpoint over the hip-midpoint, in degrees.
    pub fn spine_angle(&self) -> f64 {
        angle_from_vertical(self.shoulder_mid(), self.hip_mid()).abs()
    }
}
