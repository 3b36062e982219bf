//! Guard commands run before the agent uses a tool.
//!
//! A hook is a shell command run via `sh -c` with a JSON payload on stdin.
//! Exit code 2 blocks, any other non-zero exit is reported but does not block.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code a guard uses to veto the tool call.
pub const BLOCKING_EXIT_CODE: i32 = 2;

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookCommand {
    /// Tool name, `|`-separated alternatives, or `*` / empty for every tool.
    #[serde(default)]
    pub matcher: String,
    pub command: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl HookCommand {
    pub fn matches(&self, tool_name: &str) -> bool {
        let matcher = self.matcher.trim();
        if matcher.is_empty() || matcher == "*" {
            return true;
        }
        matcher.split('|').any(|alt| alt.trim() == tool_name)
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook `{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("hook `{command}` blocked the tool call: {reason}")]
    Blocked { command: String, reason: String },

    #[error("failed to start hook: {0}")]
    Spawn(std::io::Error),

    #[error("hook i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A hook that ran to completion without blocking
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// PreToolUse payload written to the hook's stdin.
pub fn pre_tool_use_payload(
    session_id: Option<&str>,
    cwd: &Path,
    tool_name: &str,
    tool_input: &Value,
) -> Value {
    serde_json::json!({
        "hook_event_name": "PreToolUse",
        "session_id": session_id,
        "cwd": cwd.to_string_lossy(),
        "tool_name": tool_name,
        "tool_input": tool_input,
    })
}

pub async fn run_hook(
    hook: &HookCommand,
    payload: &Value,
    cwd: &Path,
) -> Result<HookOutcome, HookError> {
    let start = Instant::now();
    let input = serde_json::to_vec(payload).map_err(std::io::Error::from)?;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&hook.command)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(HookError::Spawn)?;

    // Stdin is fed while output is collected; both run under the timeout.
    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            match stdin.write_all(&input).await {
                Ok(()) => {}
                // A hook that ignores stdin may exit before we finish writing.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    };
    let run = async move {
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        fed?;
        output
    };

    // On timeout the future is dropped with the child, which kills it.
    let output = match tokio::time::timeout(Duration::from_secs(hook.timeout_secs), run).await {
        Ok(output) => output?,
        Err(_) => {
            warn!(
                component = "hooks",
                event = "hooks.timeout",
                command = %hook.command,
                timeout_secs = hook.timeout_secs,
                "Hook timed out"
            );
            return Err(HookError::Timeout {
                command: hook.command.clone(),
                timeout_secs: hook.timeout_secs,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code();
    let duration_ms = start.elapsed().as_millis() as u64;

    if exit_code == Some(BLOCKING_EXIT_CODE) {
        let reason = match stderr.trim() {
            "" => "no reason given".to_string(),
            reason => reason.to_string(),
        };
        return Err(HookError::Blocked {
            command: hook.command.clone(),
            reason,
        });
    }

    if output.status.success() {
        debug!(
            component = "hooks",
            event = "hooks.passed",
            command = %hook.command,
            duration_ms,
            "Hook passed"
        );
    } else {
        warn!(
            component = "hooks",
            event = "hooks.failed_non_blocking",
            command = %hook.command,
            exit_code = ?exit_code,
            stderr = %stderr.trim(),
            "Hook failed without blocking"
        );
    }

    Ok(HookOutcome {
        exit_code,
        stdout,
        stderr,
        duration_ms,
    })
}
