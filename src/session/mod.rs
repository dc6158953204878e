pub mod context;
pub mod error;
pub mod record;

pub use context::{SessionContext, SessionPhase, SessionServices};
pub use error::SessionError;
pub use record::{ScoreSnapshot, SessionId, SessionRecord, SessionSummary};
