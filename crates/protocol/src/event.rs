//! Stream events decoded from the agent's JSONL output

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

pub const SUBTYPE_INIT: &str = "init";
pub const SUBTYPE_COMPLETE: &str = "complete";
pub const SUBTYPE_RESULT: &str = "result";

/// Top-level kind of a stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    User,
    Assistant,
    System,
    Error,
}

/// Error categories surfaced as Error-kind events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    ProcessStartError,
    ProcessExitError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ProcessStartError => "PROCESS_START_ERROR",
            ErrorType::ProcessExitError => "PROCESS_EXIT_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: ErrorType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// One decoded unit of agent output.
///
/// User and Assistant events carry `message`; Error events carry `error`;
/// System events carry neither and are identified by `subtype`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    /// Wire-level `type` string exactly as received.
    pub raw_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// ISO-8601; empty when the line carried no timestamp.
    pub timestamp: String,
    pub is_meta: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl StreamEvent {
    fn bare(kind: EventKind, raw_type: &str) -> Self {
        Self {
            kind,
            raw_type: raw_type.to_string(),
            subtype: None,
            session_id: None,
            project_id: None,
            uuid: None,
            model: None,
            timestamp: String::new(),
            is_meta: false,
            message: None,
            error: None,
        }
    }

    /// A User or Assistant event wrapping `message`.
    pub fn from_message(message: Message) -> Self {
        let (kind, raw_type) = match message.role {
            Role::User => (EventKind::User, "user"),
            Role::Assistant => (EventKind::Assistant, "assistant"),
        };
        let mut event = Self::bare(kind, raw_type);
        event.message = Some(message);
        event
    }

    pub fn system(subtype: &str) -> Self {
        let mut event = Self::bare(EventKind::System, "system");
        event.subtype = Some(subtype.to_string());
        event
    }

    /// Synthetic terminal signal emitted when the agent exits cleanly.
    pub fn completed() -> Self {
        Self::system(SUBTYPE_COMPLETE)
    }

    pub fn error(error_type: ErrorType, message: impl Into<String>, exit_code: Option<i32>) -> Self {
        let mut event = Self::bare(EventKind::Error, "error");
        event.error = Some(ErrorInfo {
            error_type,
            message: message.into(),
            exit_code,
        });
        event
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    pub fn is_subtype(&self, subtype: &str) -> bool {
        self.subtype.as_deref() == Some(subtype)
    }

    /// System/"init" carrying a session id.
    pub fn is_session_init(&self) -> bool {
        self.kind == EventKind::System && self.is_subtype(SUBTYPE_INIT) && self.session_id.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.kind == EventKind::System && self.is_subtype(SUBTYPE_COMPLETE)
    }

    /// Errors that end the request: the agent failed to start or exited non-zero.
    pub fn is_process_failure(&self) -> bool {
        matches!(
            self.error.as_ref().map(|e| e.error_type),
            Some(ErrorType::ProcessStartError | ErrorType::ProcessExitError)
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_process_failure()
    }

    pub fn text(&self) -> String {
        match (&self.message, &self.error) {
            (Some(message), _) => message.text_content(),
            (None, Some(error)) => error.message.clone(),
            (None, None) => String::new(),
        }
    }
}
