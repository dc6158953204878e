//! Posture scoring from the six tracked landmarks.
//!
//! Four components are scored independently in [0, 100] and combined with
//! fixed weights. Without a calibration baseline each component compares
//! against a generic upright posture; with one, against the user's own
//! averaged pose.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::geometry::Torso;
use crate::pose::landmark::round_to;
use crate::pose::{LandmarkFrame, LandmarkIndex};

/// Tracked landmarks below this visibility make a frame unscorable.
pub const MIN_VISIBILITY: f32 = 0.5;

/// Components scoring below this emit an issue.
pub const ISSUE_THRESHOLD: f64 = 70.0;

const HEAD_MAX_DEVIATION: f64 = 0.15;
/// Minimum ear-above-shoulder height before the head counts as dropped.
const HEAD_MIN_RISE: f64 = 0.15;
const LEVEL_MAX_DEVIATION: f64 = 0.05;
const ROUNDING_MAX_DEVIATION: f64 = 0.3;
const ROUNDING_IDEAL_RATIO: f64 = 1.2;
/// Hip widths below this make the shoulder/hip ratio meaningless.
const MIN_HIP_WIDTH: f64 = 0.01;
const ROUNDING_NEUTRAL_SCORE: f64 = 50.0;
const SPINE_MAX_DEVIATION_DEG: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    HeadPosition,
    ShoulderLevelness,
    ShoulderRounding,
    SpineAlignment,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Self::HeadPosition,
        Self::ShoulderLevelness,
        Self::ShoulderRounding,
        Self::SpineAlignment,
    ];

    pub fn weight(self) -> f64 {
        match self {
            Self::HeadPosition => 0.30,
            Self::ShoulderLevelness => 0.25,
            Self::ShoulderRounding => 0.25,
            Self::SpineAlignment => 0.20,
        }
    }
}

/// Shared score → label table, used for the overall label and issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLabel {
    Excellent,
    Good,
    Fair,
    NeedsWork,
    Poor,
}

impl ScoreLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 55.0 {
            Self::Fair
        } else if score >= 40.0 {
            Self::NeedsWork
        } else {
            Self::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::NeedsWork => "needs_work",
            Self::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub component: Component,
    pub severity: ScoreLabel,
    pub message: String,
}

/// Per-component scores, each rounded to one decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub head_position: f64,
    pub shoulder_levelness: f64,
    pub shoulder_rounding: f64,
    pub spine_alignment: f64,
}

impl ComponentScores {
    pub fn get(&self, component: Component) -> f64 {
        match component {
            Component::HeadPosition => self.head_position,
            Component::ShoulderLevelness => self.shoulder_levelness,
            Component::ShoulderRounding => self.shoulder_rounding,
            Component::SpineAlignment => self.spine_alignment,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostureScore {
    pub overall: f64,
    pub label: ScoreLabel,
    pub components: ComponentScores,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("landmark {landmark:?} is not visible enough to score")]
    InsufficientVisibility { landmark: LandmarkIndex },
}

struct ComponentResult {
    score: f64,
    issue: Option<Issue>,
}

impl ComponentResult {
    fn new(component: Component, score: f64, message: impl FnOnce() -> String) -> Self {
        let score = score.clamp(0.0, 100.0);
        let issue = (score < ISSUE_THRESHOLD).then(|| Issue {
            component,
            severity: ScoreLabel::from_score(score),
            message: message(),
        });
        Self { score, issue }
    }

    fn neutral(score: f64) -> Self {
        Self { score, issue: None }
    }
}

/// `100 * max(0, 1 - deviation / max_deviation)`
fn linear_score(deviation: f64, max_deviation: f64) -> f64 {
    100.0 * (1.0 - deviation / max_deviation).max(0.0)
}

#[derive(Debug, Clone)]
pub struct PostureScorer {
    baseline: Option<LandmarkFrame>,
    min_visibility: f32,
}

impl Default for PostureScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl PostureScorer {
    pub fn new() -> Self {
        Self {
            baseline: None,
            min_visibility: MIN_VISIBILITY,
        }
    }

    pub fn with_baseline(baseline: LandmarkFrame) -> Self {
        Self {
            baseline: Some(baseline),
            ..Self::new()
        }
    }

    pub fn with_min_visibility(mut self, min_visibility: f32) -> Self {
        self.min_visibility = min_visibility;
        self
    }

    /// Replaces any previous baseline.
    pub fn set_baseline(&mut self, baseline: LandmarkFrame) {
        self.baseline = Some(baseline);
    }

    pub fn baseline(&self) -> Option<&LandmarkFrame> {
        self.baseline.as_ref()
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn score(&self, frame: &LandmarkFrame) -> Result<PostureScore, ScoreError> {
        if let Some(landmark) = frame.first_hidden(self.min_visibility) {
            return Err(ScoreError::InsufficientVisibility { landmark });
        }

        let current = Torso::from_frame(frame);
        let ideal = self.baseline.as_ref().map(Torso::from_frame);

        let head = score_head_position(&current, ideal.as_ref());
        let level = score_shoulder_levelness(&current, ideal.as_ref());
        let rounding = score_shoulder_rounding(&current, ideal.as_ref());
        let spine = score_spine_alignment(&current, ideal.as_ref());

        let weighted = head.score * Component::HeadPosition.weight()
            + level.score * Component::ShoulderLevelness.weight()
            + rounding.score * Component::ShoulderRounding.weight()
            + spine.score * Component::SpineAlignment.weight();
        let overall = round_to(weighted.clamp(0.0, 100.0), 1);

        let components = ComponentScores {
            head_position: round_to(head.score, 1),
            shoulder_levelness: round_to(level.score, 1),
            shoulder_rounding: round_to(rounding.score, 1),
            spine_alignment: round_to(spine.score, 1),
        };
        let issues = [head, level, rounding, spine]
            .into_iter()
            .filter_map(|c| c.issue)
            .collect();

        Ok(PostureScore {
            overall,
            label: ScoreLabel::from_score(overall),
            components,
            issues,
        })
    }
}

/// Forward head: ear midpoint drifting off the shoulder midpoint.
fn score_head_position(current: &Torso, ideal: Option<&Torso>) -> ComponentResult {
    let ear = current.ear_mid();
    let shoulder = current.shoulder_mid();

    let deviation = match ideal {
        Some(ideal) => {
            let (ideal_ear, ideal_shoulder) = (ideal.ear_mid(), ideal.shoulder_mid());
            let dy = (ear.y - shoulder.y) - (ideal_ear.y - ideal_shoulder.y);
            let dx = (ear.x - shoulder.x).abs() - (ideal_ear.x - ideal_shoulder.x).abs();
            dy.hypot(dx)
        }
        None => {
            let rise = (ear.y - shoulder.y).abs();
            let drift = (ear.x - shoulder.x).abs();
            drift + (HEAD_MIN_RISE - rise).max(0.0)
        }
    };

    ComponentResult::new(
        Component::HeadPosition,
        linear_score(deviation, HEAD_MAX_DEVIATION),
        || "Head is forward of ideal position — try tucking your chin back.".to_string(),
    )
}

fn score_shoulder_levelness(current: &Torso, ideal: Option<&Torso>) -> ComponentResult {
    let tilt = current.shoulder_tilt();
    let deviation = match ideal {
        Some(ideal) => (tilt - ideal.shoulder_tilt()).abs(),
        None => tilt,
    };

    ComponentResult::new(
        Component::ShoulderLevelness,
        linear_score(deviation, LEVEL_MAX_DEVIATION),
        || {
            let higher = if current.left_shoulder.y < current.right_shoulder.y {
                "left"
            } else {
                "right"
            };
            format!("Your {higher} shoulder is higher — try to relax and level your shoulders.")
        },
    )
}

/// Rounded shoulders narrow the apparent shoulder width relative to the hips.
/// Only a ratio below the ideal is penalized.
fn score_shoulder_rounding(current: &Torso, ideal: Option<&Torso>) -> ComponentResult {
    let hip_width = current.hip_width();
    if hip_width < MIN_HIP_WIDTH {
        return ComponentResult::neutral(ROUNDING_NEUTRAL_SCORE);
    }
    let ratio = current.shoulder_width() / hip_width;

    let ideal_ratio = match ideal {
        Some(ideal) if ideal.hip_width() > MIN_HIP_WIDTH => ideal.shoulder_width() / ideal.hip_width(),
        Some(_) => 1.0,
        None => ROUNDING_IDEAL_RATIO,
    };
    let deviation = (ideal_ratio - ratio).max(0.0);

    ComponentResult::new(
        Component::ShoulderRounding,
        linear_score(deviation, ROUNDING_MAX_DEVIATION),
        || "Shoulders appear rounded — pull your shoulder blades back and together.".to_string(),
    )
}

fn score_spine_alignment(current: &Torso, ideal: Option<&Torso>) -> ComponentResult {
    let angle = current.spine_angle();
    let ideal_angle = ideal.map_or(0.0, Torso::spine_angle);
    let deviation = (angle - ideal_angle).abs();

    ComponentResult::new(
        Component::SpineAlignment,
        linear_score(deviation, SPINE_MAX_DEVIATION_DEG),
        || "Your torso is leaning to one side — sit or stand upright.".to_string(),
    )
}
