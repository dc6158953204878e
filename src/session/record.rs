use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pose::LandmarkFrame;
use crate::posture::{Issue, PostureScore};

pub type SessionId = u64;

/// Persisted posture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub user_id: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub average_score: Option<f64>,
    pub calibration: Option<LandmarkFrame>,
    pub is_active: bool,
}

/// Point-in-time score persisted every Nth analyzed frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub overall_score: f64,
    pub head_position_score: f64,
    pub shoulder_levelness_score: f64,
    pub shoulder_rounding_score: f64,
    pub spine_alignment_score: f64,
    pub issues: Vec<Issue>,
}

impl ScoreSnapshot {
    pub fn from_score(session_id: SessionId, timestamp: DateTime<Utc>, score: &PostureScore) -> Self {
        Self {
            session_id,
            timestamp,
            overall_score: score.overall,
            head_position_score: score.components.head_position,
            shoulder_levelness_score: score.components.shoulder_levelness,
            shoulder_rounding_score: score.components.shoulder_rounding,
            spine_alignment_score: score.components.spine_alignment,
            issues: score.issues.clone(),
        }
    }
}

/// Returned to the client when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub duration_seconds: f64,
    pub average_score: Option<f64>,
    pub total_frames_analyzed: u64,
    pub scores_recorded: u64,
}
