//! Session state types published to subscribers

use serde::{Deserialize, Serialize};

use crate::event::StreamEvent;

/// Identity of the agent session the engine is attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub project_id: Option<String>,
    pub start_time: String,
    pub model: Option<String>,
}

/// Running counters for the current session.
///
/// Only ever incremented; reset by starting a new session and recomputed
/// from scratch when a session is resumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub tools_executed: u64,
    pub tools_failed: u64,
    pub files_created: u64,
    pub files_modified: u64,
    pub files_deleted: u64,
    /// Approximate: backtick count / 6 per text block.
    pub code_blocks_generated: u64,
    pub errors_encountered: u64,
    pub prompts_sent: u64,
    pub was_resumed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedPrompt {
    pub id: String,
    pub prompt: String,
    pub model: Option<String>,
}

/// What the engine is doing right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: String,
    pub error_type: String,
    pub message: String,
}

/// Immutable view of the engine state handed to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub revision: u64,
    pub project_path: String,
    pub phase: SessionPhase,
    pub is_loading: bool,
    pub session: Option<SessionInfo>,
    pub messages: Vec<StreamEvent>,
    pub metrics: SessionMetrics,
    pub queue: Vec<QueuedPrompt>,
    pub errors: Vec<ErrorEntry>,
}

impl SessionSnapshot {
    pub fn empty(project_path: impl Into<String>) -> Self {
        Self {
            revision: 0,
            project_path: project_path.into(),
            phase: SessionPhase::Idle,
            is_loading: false,
            session: None,
            messages: Vec::new(),
            metrics: SessionMetrics::default(),
            queue: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }
}

/// Lightweight description of one on-disk session log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub project_dir: String,
    pub preview: Option<String>,
    pub message_count: usize,
    pub modified_at: Option<String>,
    pub size_bytes: u64,
}

/// A directory under the agent's projects root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub dir_name: String,
    /// Best-effort reverse of the directory encoding; may be wrong for
    /// paths that contained `-` or `.`.
    pub project_path: String,
    pub session_count: usize,
    pub last_modified: Option<String>,
}
