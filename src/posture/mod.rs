pub mod calibration;
pub mod geometry;
pub mod scorer;

pub use calibration::{average_frames, CalibrationAccumulator, CalibrationStep};
pub use scorer::{
    Component, ComponentScores, Issue, PostureScore, PostureScorer, ScoreError, ScoreLabel,
};
