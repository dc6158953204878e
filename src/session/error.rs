use thiserror::Error;

use crate::pose::DecodeError;
use crate::worker::WorkerError;

/// Anything that can go wrong while handling one client message.
///
/// None of these end the session; the connection loop turns them into an
/// `error` reply.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session already active. End it first.")]
    AlreadyActive,
    #[error("No active session. Send start_session first.")]
    NoActiveSession,
    #[error("Session is closed.")]
    Closed,
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    /// `ClientMessage::Unknown` handed in directly, so the name is gone.
    #[error("Unknown action.")]
    UnrecognizedAction,
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Could not decode frame: {0}")]
    Decode(#[from] DecodeError),
    #[error("Pose extraction failed: {0:#}")]
    Extraction(anyhow::Error),
    #[error("Frame processing failed: {0}")]
    Worker(#[from] WorkerError),
    #[error("Could not save session: {0:#}")]
    Persistence(anyhow::Error),
}

impl SessionError {
    /// Misuse of the protocol rather than a processing fault.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::AlreadyActive
                | Self::NoActiveSession
                | Self::Closed
                | Self::UnknownAction(_)
                | Self::UnrecognizedAction
                | Self::MalformedMessage(_)
        )
    }
}
