use serde::{Deserialize, Serialize};

/// BlazePose 33-point skeleton topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum LandmarkIndex {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkIndex {
    pub const COUNT: usize = 33;

    /// The six landmarks posture scoring reads.
    pub const TRACKED: [LandmarkIndex; 6] = [
        Self::LeftEar,
        Self::RightEar,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftHip,
        Self::RightHip,
    ];
}

/// A single body keypoint in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// 0.0..1.0, left to right
    pub x: f32,
    /// 0.0..1.0, top to bottom
    pub y: f32,
    /// depth relative to the hips, same scale as x
    pub z: f32,
    /// detection confidence 0.0..1.0
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility >= threshold
    }
}

impl Default for Landmark {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            visibility: 0.0,
        }
    }
}

/// One frame's worth of landmarks, always exactly [`LandmarkIndex::COUNT`] long.
///
/// Serialized as a plain JSON array; deserializing an array of any other
/// length fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct LandmarkFrame {
    landmarks: [Landmark; LandmarkIndex::COUNT],
}

impl LandmarkFrame {
    pub fn new(landmarks: [Landmark; LandmarkIndex::COUNT]) -> Self {
        Self { landmarks }
    }

    /// Builds a frame from an extractor's output, `None` unless it holds
    /// exactly 33 landmarks.
    pub fn from_slice(landmarks: &[Landmark]) -> Option<Self> {
        let landmarks: [Landmark; LandmarkIndex::COUNT] = landmarks.try_into().ok()?;
        Some(Self { landmarks })
    }

    pub fn get(&self, index: LandmarkIndex) -> &Landmark {
        &self.landmarks[index as usize]
    }

    pub fn set(&mut self, index: LandmarkIndex, landmark: Landmark) {
        self.landmarks[index as usize] = landmark;
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    /// First tracked landmark whose visibility is below `threshold`.
    pub fn first_hidden(&self, threshold: f32) -> Option<LandmarkIndex> {
        LandmarkIndex::TRACKED
            .into_iter()
            .find(|&index| !self.get(index).is_visible(threshold))
    }
}

impl Default for LandmarkFrame {
    fn default() -> Self {
        Self {
            landmarks: [Landmark::default(); LandmarkIndex::COUNT],
        }
    }
}

impl TryFrom<Vec<Landmark>> for LandmarkFrame {
    type Error = String;

    fn try_from(landmarks: Vec<Landmark>) -> Result<Self, Self::Error> {
        let len = landmarks.len();
        Self::from_slice(&landmarks).ok_or_else(|| {
            format!("expected {} landmarks, got {}", LandmarkIndex::COUNT, len)
        })
    }
}

impl From<LandmarkFrame> for Vec<Landmark> {
    fn from(frame: LandmarkFrame) -> Self {
        frame.landmarks.to_vec()
    }
}

/// Overlay coordinate sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayPoint {
    pub x: f64,
    pub y: f64,
}

impl OverlayPoint {
    fn from_landmark(landmark: &Landmark) -> Self {
        Self {
            x: round_to(landmark.x as f64, 4),
            y: round_to(landmark.y as f64, 4),
        }
    }
}

/// The six tracked landmarks reduced to image coordinates for the skeleton
/// overlay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostureLandmarks {
    pub left_ear: OverlayPoint,
    pub right_ear: OverlayPoint,
    pub left_shoulder: OverlayPoint,
    pub right_shoulder: OverlayPoint,
    pub left_hip: OverlayPoint,
    pub right_hip: OverlayPoint,
}

impl PostureLandmarks {
    pub fn from_frame(frame: &LandmarkFrame) -> Self {
        let point = |index| OverlayPoint::from_landmark(frame.get(index));
        Self {
            left_ear: point(LandmarkIndex::LeftEar),
            right_ear: point(LandmarkIndex::RightEar),
            left_shoulder: point(LandmarkIndex::LeftShoulder),
            right_shoulder: point(LandmarkIndex::RightShoulder),
            left_hip: point(LandmarkIndex::LeftHip),
            right_hip: point(LandmarkIndex::RightHip),
        }
    }
}

/// Rounds the exact stored value to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    // rounds the exact binary value, so 0.15 (stored just below) goes to 0.1
    let places = decimals.max(0) as usize;
    format!("{value:.places$}").parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landmark_index_count() {
        assert_eq!(LandmarkIndex::COUNT, 33);
        assert_eq!(LandmarkIndex::RightFootIndex as usize, 32);
    }


    #[test]
    fn test_landmark_is_visible() {
        let lm = Landmark::new(0.5, 0.5, 0.0, 0.5);
        assert!(lm.is_visible(0.5));
        assert!(!lm.is_visible(0.51));
    }

    #[test]
    fn test_frame_from_slice_requires_33() {
        assert!(LandmarkFrame::from_slice(&[Landmark::default(); 33]).is_some());
        assert!(LandmarkFrame::from_slice(&[Landmark::default(); 32]).is_none());
        assert!(LandmarkFrame::from_slice(&[Landmark::default(); 39]).is_none());
    }

    #[test]
    fn test_frame_first_hidden() {
        let mut frame = LandmarkFrame::new([Landmark::new(0.5, 0.5, 0.0, 0.9); 33]);
        assert_eq!(frame.first_hidden(0.5), None);

        frame.set(LandmarkIndex::RightHip, Landmark::new(0.5, 0.5, 0.0, 0.2));
        assert_eq!(frame.first_hidden(0.5), Some(LandmarkIndex::RightHip));

        // untracked landmarks never block scoring
        let mut frame = LandmarkFrame::new([Landmark::new(0.5, 0.5, 0.0, 0.9); 33]);
        frame.set(LandmarkIndex::Nose, Landmark::default());
        assert_eq!(frame.first_hidden(0.5), None);
    }

    #[test]
    fn test_frame_json_rejects_wrong_length() {
        let frame = LandmarkFrame::default();
        let json = serde_json::to_string(&frame).unwrap();
        let back: LandmarkFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.landmarks().len(), 33);

        let short = serde_json::to_string(&vec![Landmark::default(); 5]).unwrap();
        assert!(serde_json::from_str::<LandmarkFrame>(&short).is_err());
    }

    #[test]
    fn test_posture_landmarks_rounded() {
        let mut frame = LandmarkFrame::default();
        frame.set(LandmarkIndex::LeftEar, Landmark::new(0.123456, 0.654321, 0.0, 1.0));
        let overlay = PostureLandmarks::from_frame(&frame);
        assert!((overlay.left_ear.x - 0.1235).abs() < 1e-9);
        assert!((overlay.left_ear.y - 0.6543).abs() < 1e-9);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(84.96, 1), 85.0);
        assert_eq!(round_to(0.444, 2), 0.44);
        assert_eq!(round_to(66.666_666, 1), 66.7);
    }

    #[test]
    fn test_round_to_uses_exact_binary_value() {
        assert_eq!(round_to(0.15, 1), 0.1);
        assert_eq!(round_to(2.675, 2), 2.67);
        assert_eq!(round_to(0.35, 1), 0.3);
        assert!(round_to(f64::NAN, 1).is_nan());
    }
}
