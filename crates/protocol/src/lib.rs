//! claudeport protocol
//!
//! Shared types between the agent connector, the session engine and
//! whatever front end subscribes to session snapshots. Everything here is
//! plain data with serde derives; no I/O.

use uuid::Uuid;

pub mod event;
pub mod session;
pub mod types;

pub use event::{
    ErrorInfo, ErrorType, EventKind, StreamEvent, SUBTYPE_COMPLETE, SUBTYPE_INIT, SUBTYPE_RESULT,
};
pub use session::{
    ErrorEntry, ProjectInfo, QueuedPrompt, SessionInfo, SessionMetrics, SessionPhase,
    SessionSnapshot, SessionSummary,
};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
