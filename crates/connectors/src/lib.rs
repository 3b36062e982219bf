//! claudeport connectors
//!
//! Everything that touches the `claude` process directly: locating the
//! binary, building its argument list, supervising the subprocess, decoding
//! its stream-json output, and running tool guard hooks.

pub mod binary;
pub mod decoder;
pub mod hooks;
pub mod invocation;
pub mod supervisor;

pub use binary::{extended_path, resolve_agent_binary, AGENT_COMMAND};
pub use decoder::{decode_line, decode_value, encode_message, DecodeError};
pub use hooks::{pre_tool_use_payload, run_hook, HookCommand, HookError, HookOutcome};
pub use invocation::{AgentInvocation, ResumeMode};
pub use supervisor::{ProcessEvent, ProcessId, ProcessInfo, ProcessSupervisor, SpawnRequest};

use thiserror::Error;

/// Errors that can occur while starting a process
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Process started without a {0} pipe")]
    MissingPipe(&'static str),
}
