//! JSON protocol between the browser client and the posture server.
//!
//! Client messages are tagged by `action`, server messages by `type`.

use serde::{Deserialize, Serialize};

use crate::pose::PostureLandmarks;
use crate::posture::{ComponentScores, Issue, PostureScore, ScoreLabel};
use crate::session::error::SessionError;
use crate::session::record::{SessionId, SessionSummary};

pub const NO_POSE_MESSAGE: &str = "No pose detected — make sure your upper body is visible.";
pub const INSUFFICIENT_VISIBILITY_MESSAGE: &str = "Insufficient landmark visibility for scoring.";

// --- Client → server ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    StartSession,
    Calibrate,
    Frame {
        /// base64 JPEG/PNG, optionally as a data URI
        #[serde(default)]
        frame: String,
    },
    EndSession,
    /// Any action this server does not know.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Parses one text message. Unknown actions come back as
    /// [`SessionError::UnknownAction`] naming the action.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| SessionError::MalformedMessage(e.to_string()))?;
        let action = match value.get("action") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => return Err(SessionError::UnknownAction(other.to_string())),
            None => return Err(SessionError::UnknownAction("None".to_string())),
        };

        match serde_json::from_value::<ClientMessage>(value) {
            Ok(ClientMessage::Unknown) => Err(SessionError::UnknownAction(action)),
            Ok(message) => Ok(message),
            Err(e) => Err(SessionError::MalformedMessage(e.to_string())),
        }
    }
}

// --- Server → client ---

/// Per-frame analysis result. Every field but `landmarks_detected` is
/// omitted when absent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PostureResult {
    pub landmarks_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<ScoreLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ComponentScores>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<Issue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<PostureLandmarks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal_landmarks: Option<PostureLandmarks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PostureResult {
    pub fn no_pose() -> Self {
        Self {
            landmarks_detected: false,
            message: Some(NO_POSE_MESSAGE.to_string()),
            ..Self::default()
        }
    }

    pub fn insufficient_visibility() -> Self {
        Self {
            landmarks_detected: true,
            message: Some(INSUFFICIENT_VISIBILITY_MESSAGE.to_string()),
            ..Self::default()
        }
    }

    pub fn scored(
        score: PostureScore,
        landmarks: PostureLandmarks,
        ideal_landmarks: Option<PostureLandmarks>,
    ) -> Self {
        Self {
            landmarks_detected: true,
            score: Some(score.overall),
            label: Some(score.label),
            details: Some(score.components),
            issues: Some(score.issues),
            landmarks: Some(landmarks),
            ideal_landmarks,
            message: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStarted {
        session_id: SessionId,
    },
    CalibrationStarted,
    CalibrationProgress {
        progress: f64,
        landmarks: PostureLandmarks,
    },
    CalibrationComplete {
        ideal_landmarks: PostureLandmarks,
    },
    PostureResult(PostureResult),
    SessionEnded {
        summary: SessionSummary,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&SessionError> for ServerMessage {
    fn from(err: &SessionError) -> Self {
        Self::error(err.to_string())
    }
}
