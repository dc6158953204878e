use crate::pose::{Landmark, LandmarkFrame, LandmarkIndex};

/// Frames averaged into a baseline (~3 s at 15 fps)
pub const DEFAULT_CALIBRATION_FRAMES: usize = 45;

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationStep {
    Collecting { progress: f64 },
    Complete { baseline: LandmarkFrame },
}

/// Collects a fixed window of frames and reduces them to an averaged baseline.
///
/// The buffer only grows. The push that fills the window returns
/// [`CalibrationStep::Complete`] and empties the buffer.
#[derive(Debug, Clone)]
pub struct CalibrationAccumulator {
    window: usize,
    frames: Vec<LandmarkFrame>,
}

impl Default for CalibrationAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_CALIBRATION_FRAMES)
    }
}

impl CalibrationAccumulator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            frames: Vec::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Fraction of the window collected, capped at 1.0.
    pub fn progress(&self) -> f64 {
        (self.frames.len() as f64 / self.window as f64).min(1.0)
    }

    pub fn push(&mut self, frame: LandmarkFrame) -> CalibrationStep {
        self.frames.push(frame);
        if self.frames.len() < self.window {
            return CalibrationStep::Collecting {
                progress: self.progress(),
            };
        }

        let frames = std::mem::take(&mut self.frames);
        match average_frames(&frames) {
            Some(baseline) => CalibrationStep::Complete { baseline },
            // window >= 1, so at least one frame was just pushed
            None => CalibrationStep::Collecting { progress: 0.0 },
        }
    }
}

/// Unweighted per-landmark, per-coordinate mean. `None` for an empty slice.
pub fn average_frames(frames: &[LandmarkFrame]) -> Option<LandmarkFrame> {
    if frames.is_empty() {
        return None;
    }

    let mut sums = [[0.0f64; 4]; LandmarkIndex::COUNT];
    for frame in frames {
        for (sum, lm) in sums.iter_mut().zip(frame.landmarks()) {
            sum[0] += lm.x as f64;
            sum[1] += lm.y as f64;
            sum[2] += lm.z as f64;
            sum[3] += lm.visibility as f64;
        }
    }

    let n = frames.len() as f64;
    let mut landmarks = [Landmark::default(); LandmarkIndex::COUNT];
    for (lm, sum) in landmarks.iter_mut().zip(sums) {
        *lm = Landmark::new(
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
            (sum[3] / n) as f32,
        );
    }
    Some(LandmarkFrame::new(landmarks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::upright_frame;

    fn uniform(x: f32, y: f32, z: f32, v: f32) -> LandmarkFrame {
        LandmarkFrame::new([Landmark::new(x, y, z, v); LandmarkIndex::COUNT])
    }

    #[test]
    fn test_completes_once_at_window() {
        let mut acc = CalibrationAccumulator::default();
        for i in 1..DEFAULT_CALIBRATION_FRAMES {
            match acc.push(upright_frame()) {
                CalibrationStep::Collecting { progress } => {
                    let expected = i as f64 / DEFAULT_CALIBRATION_FRAMES as f64;
                    assert!((progress - expected).abs() < 1e-12);
                }
                CalibrationStep::Complete { .. } => panic!("completed early at frame {i}"),
            }
        }
        assert_eq!(acc.len(), DEFAULT_CALIBRATION_FRAMES - 1);

        match acc.push(upright_frame()) {
            CalibrationStep::Complete { baseline } => {
                assert_eq!(baseline.landmarks().len(), LandmarkIndex::COUNT);
                assert_eq!(baseline, upright_frame());
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(acc.is_empty());
    }

    #[test]
    fn test_second_window_completes_again() {
        let mut acc = CalibrationAccumulator::new(3);
        let completions = (0..7)
            .map(|_| acc.push(upright_frame()))
            .filter(|step| matches!(step, CalibrationStep::Complete { .. }))
            .count();
        assert_eq!(completions, 2);
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_average_is_per_coordinate_mean() {
        let frames = [uniform(0.2, 0.4, -0.1, 0.6), uniform(0.4, 0.8, 0.3, 1.0)];
        let avg = average_frames(&frames).unwrap();
        for lm in avg.landmarks() {
            assert!((lm.x - 0.3).abs() < 1e-6);
            assert!((lm.y - 0.6).abs() < 1e-6);
            assert!((lm.z - 0.1).abs() < 1e-6);
            assert!((lm.visibility - 0.8).abs() < 1e-6);
        }
    }

    #[test]
    fn test_average_keeps_indexing() {
        let mut a = LandmarkFrame::default();
        let mut b = LandmarkFrame::default();
        a.set(LandmarkIndex::LeftHip, Landmark::new(0.4, 0.8, 0.0, 1.0));
        b.set(LandmarkIndex::LeftHip, Landmark::new(0.6, 0.8, 0.0, 1.0));

        let avg = average_frames(&[a, b]).unwrap();
        assert!((avg.get(LandmarkIndex::LeftHip).x - 0.5).abs() < 1e-6);
        assert_eq!(avg.get(LandmarkIndex::RightHip).x, 0.0);
    }

    #[test]
    fn test_average_empty() {
        assert!(average_frames(&[]).is_none());
    }

    #[test]
    fn test_zero_window_clamped() {
        let mut acc = CalibrationAccumulator::new(0);
        assert_eq!(acc.window(), 1);
        assert!(matches!(acc.push(upright_frame()), CalibrationStep::Complete { .. }));
    }
}
