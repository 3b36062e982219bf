//! Pure state transition function
//!
//! All session business logic lives here as a pure, synchronous function:
//! `transition(state, input, now) -> (state, effects)`. The actor executes
//! the returned effects (spawn, stop, load, persist, watch, hooks) and feeds
//! their outcomes back in as new inputs.

use std::collections::{HashSet, VecDeque};

use claudeport_connectors::{HookCommand, ProcessEvent, ProcessId, ResumeMode};
use claudeport_protocol::{
    new_id, ContentBlock, ErrorEntry, ErrorType, EventKind, Message, QueuedPrompt, Role,
    SessionInfo, SessionMetrics, SessionPhase, SessionSnapshot, StreamEvent,
};
use serde_json::Value;

use crate::filter::{is_displayable, retain_displayable};

/// How many recent user messages a reloaded prompt is compared against.
const ECHO_WINDOW: usize = 5;

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

/// Fixed per-engine behaviour, taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct TransitionSettings {
    pub continue_last_session: bool,
    pub pre_tool_use: Vec<HookCommand>,
    pub block_on_failure: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub project_path: String,
    pub revision: u64,
    pub phase: SessionPhase,
    pub session: Option<SessionInfo>,
    pub messages: Vec<StreamEvent>,
    pub metrics: SessionMetrics,
    pub queue: VecDeque<QueuedPrompt>,
    pub errors: Vec<ErrorEntry>,
    /// The only process whose events are merged.
    pub active_process: Option<ProcessId>,
    /// Bumped by new/resume so late history loads can be discarded.
    pub epoch: u64,
    pub settings: TransitionSettings,
}

impl EngineState {
    pub fn new(project_path: impl Into<String>, settings: TransitionSettings) -> Self {
        Self {
            project_path: project_path.into(),
            settings,
            ..Self::default()
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            revision: self.revision,
            project_path: self.project_path.clone(),
            phase: self.phase,
            is_loading: self.phase != SessionPhase::Idle,
            session: self.session.clone(),
            messages: self.messages.clone(),
            metrics: self.metrics.clone(),
            queue: self.queue.iter().cloned().collect(),
            errors: self.errors.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPurpose {
    /// Replace history wholesale.
    Resume,
    /// Append what the file has that memory does not.
    Reconcile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookVerdict {
    Passed,
    Blocked { reason: String },
    TimedOut { timeout_secs: u64 },
    Failed { message: String },
}

#[derive(Debug, Clone)]
pub enum Input {
    SendPrompt {
        prompt: String,
        model: Option<String>,
    },
    StopCurrentRequest,
    StartNewSession,
    ResumeSession {
        session_id: String,
    },
    SpawnSucceeded {
        process_id: ProcessId,
    },
    SpawnFailed {
        message: String,
    },
    Process(ProcessEvent),
    HistoryLoaded {
        epoch: u64,
        purpose: LoadPurpose,
        session_id: String,
        /// `Err` carries the load error for logging; it is treated as empty.
        result: Result<Vec<StreamEvent>, String>,
    },
    SessionFileChanged {
        session_id: String,
    },
    SessionFileDeleted {
        session_id: String,
    },
    HookFinished {
        process_id: ProcessId,
        tool_name: String,
        verdict: HookVerdict,
    },
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Spawn {
        prompt: String,
        model: Option<String>,
        resume: ResumeMode,
        session_id: Option<String>,
    },
    Stop {
        process_id: ProcessId,
    },
    PersistSessionId {
        session_id: String,
    },
    LoadHistory {
        session_id: String,
        epoch: u64,
        purpose: LoadPurpose,
    },
    /// Follow this session's log file; `None` stops following.
    WatchSession {
        session_id: Option<String>,
    },
    RunHook {
        hook: HookCommand,
        process_id: ProcessId,
        tool_name: String,
        tool_input: Value,
        session_id: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// transition
// ---------------------------------------------------------------------------

pub fn transition(mut state: EngineState, input: Input, now: &str) -> (EngineState, Vec<Effect>) {
    let mut effects = Vec::new();
    if apply(&mut state, input, now, &mut effects) {
        state.revision += 1;
    }
    (state, effects)
}

/// Returns whether anything a subscriber can see changed.
fn apply(state: &mut EngineState, input: Input, now: &str, effects: &mut Vec<Effect>) -> bool {
    match input {
        Input::SendPrompt { prompt, model } => {
            if state.phase != SessionPhase::Idle {
                state.queue.push_back(QueuedPrompt {
                    id: new_id(),
                    prompt,
                    model,
                });
            } else if let Some(next) = state.queue.pop_front() {
                // A stop can leave Idle with prompts still waiting; they go first.
                state.queue.push_back(QueuedPrompt {
                    id: new_id(),
                    prompt,
                    model,
                });
                begin_prompt(state, next.prompt, next.model, now, effects);
            } else {
                begin_prompt(state, prompt, model, now, effects);
            }
            true
        }

        Input::SpawnSucceeded { process_id } => {
            if state.phase == SessionPhase::Sending && state.active_process.is_none() {
                state.active_process = Some(process_id);
            } else {
                // Nothing is waiting for this process any more.
                effects.push(Effect::Stop { process_id });
            }
            false
        }

        Input::SpawnFailed { message } => {
            let event = StreamEvent::error(ErrorType::ProcessStartError, message, None);
            push_error_event(state, event, now);
            finish_request(state, now, effects);
            true
        }

        Input::Process(ProcessEvent::Diagnostic { .. }) => false,

        Input::Process(ProcessEvent::Stream { process_id, event }) => {
            if state.active_process != Some(process_id) {
                return false;
            }
            if state.phase == SessionPhase::Sending {
                state.phase = SessionPhase::Streaming;
            }
            merge_stream_event(state, process_id, event, now, effects);
            true
        }

        Input::StopCurrentRequest => {
            let stopped = state.active_process.take();
            if let Some(process_id) = stopped {
                effects.push(Effect::Stop { process_id });
            }
            if stopped.is_none() && state.phase == SessionPhase::Idle {
                return false;
            }
            state.phase = SessionPhase::Idle;
            true
        }

        Input::StartNewSession => {
            if let Some(process_id) = state.active_process.take() {
                effects.push(Effect::Stop { process_id });
            }
            state.phase = SessionPhase::Idle;
            state.session = None;
            state.messages.clear();
            state.metrics = SessionMetrics::default();
            state.queue.clear();
            state.errors.clear();
            state.epoch += 1;
            effects.push(Effect::WatchSession { session_id: None });
            true
        }

        Input::ResumeSession { session_id } => {
            if let Some(process_id) = state.active_process.take() {
                effects.push(Effect::Stop { process_id });
            }
            state.queue.clear();
            state.phase = SessionPhase::Sending;
            state.session = Some(SessionInfo {
                session_id: session_id.clone(),
                project_id: None,
                start_time: now.to_string(),
                model: None,
            });
            state.epoch += 1;
            effects.push(Effect::LoadHistory {
                session_id: session_id.clone(),
                epoch: state.epoch,
                purpose: LoadPurpose::Resume,
            });
            effects.push(Effect::WatchSession {
                session_id: Some(session_id.clone()),
            });
            effects.push(Effect::PersistSessionId { session_id });
            true
        }

        Input::HistoryLoaded {
            epoch,
            purpose,
            session_id,
            result,
        } => {
            if epoch != state.epoch || state.session_id() != Some(session_id.as_str()) {
                return false;
            }
            match purpose {
                LoadPurpose::Resume => {
                    apply_resumed_history(state, result.unwrap_or_default(), now, effects);
                    true
                }
                LoadPurpose::Reconcile => match result {
                    Ok(loaded) if state.phase == SessionPhase::Idle => {
                        reconcile(state, loaded, now) > 0
                    }
                    _ => false,
                },
            }
        }

        Input::SessionFileChanged { session_id } => {
            if state.phase == SessionPhase::Idle && state.session_id() == Some(session_id.as_str()) {
                effects.push(Effect::LoadHistory {
                    session_id,
                    epoch: state.epoch,
                    purpose: LoadPurpose::Reconcile,
                });
            }
            false
        }

        // The session stays attached; the next prompt resumes or recreates it.
        // Following it again picks the log back up once it is recreated.
        Input::SessionFileDeleted { session_id } => {
            if state.session_id() == Some(session_id.as_str()) {
                effects.push(Effect::WatchSession {
                    session_id: Some(session_id),
                });
            }
            false
        }

        Input::HookFinished {
            process_id,
            tool_name,
            verdict,
        } => {
            let (error_type, message, blocks) = match verdict {
                HookVerdict::Passed => return false,
                HookVerdict::Blocked { reason } => {
                    ("HOOK_BLOCKED", format!("{tool_name}: {reason}"), true)
                }
                HookVerdict::TimedOut { timeout_secs } => (
                    "HOOK_TIMEOUT",
                    format!("{tool_name}: guard timed out after {timeout_secs}s"),
                    true,
                ),
                HookVerdict::Failed { message } => {
                    ("HOOK_ERROR", format!("{tool_name}: {message}"), false)
                }
            };
            push_error_entry(state, now, error_type, message);
            if blocks
                && state.settings.block_on_failure
                && state.active_process == Some(process_id)
            {
                state.active_process = None;
                state.phase = SessionPhase::Idle;
                effects.push(Effect::Stop { process_id });
            }
            true
        }
    }
}

fn begin_prompt(
    state: &mut EngineState,
    prompt: String,
    model: Option<String>,
    now: &str,
    effects: &mut Vec<Effect>,
) {
    state.phase = SessionPhase::Sending;
    state
        .messages
        .push(StreamEvent::from_message(Message::text(Role::User, prompt.clone())).with_timestamp(now));
    state.metrics.prompts_sent += 1;

    let resume = match &state.session {
        Some(info) => ResumeMode::Resume(info.session_id.clone()),
        None if state.settings.continue_last_session => ResumeMode::Continue,
        None => ResumeMode::Fresh,
    };
    effects.push(Effect::Spawn {
        prompt,
        model,
        resume,
        session_id: state.session_id().map(str::to_string),
    });
}

/// Back to Idle, then start the next queued prompt if there is one.
fn finish_request(state: &mut EngineState, now: &str, effects: &mut Vec<Effect>) {
    state.active_process = None;
    state.phase = SessionPhase::Idle;
    if let Some(next) = state.queue.pop_front() {
        begin_prompt(state, next.prompt, next.model, now, effects);
    }
}

fn merge_stream_event(
    state: &mut EngineState,
    process_id: ProcessId,
    event: StreamEvent,
    now: &str,
    effects: &mut Vec<Effect>,
) {
    if event.is_session_init() {
        establish_session(state, &event, now, effects);
        return;
    }
    if event.is_complete() {
        finish_request(state, now, effects);
        return;
    }
    if event.kind == EventKind::Error {
        let terminal = event.is_process_failure();
        push_error_event(state, event, now);
        if terminal {
            finish_request(state, now, effects);
        }
        return;
    }
    if !is_displayable(&event) {
        return;
    }

    let event = stamp(event, now);
    aggregate_metrics(&mut state.metrics, &event);
    queue_hooks(state, process_id, &event, effects);
    state.messages.push(event);
}

fn establish_session(
    state: &mut EngineState,
    event: &StreamEvent,
    now: &str,
    effects: &mut Vec<Effect>,
) {
    let Some(session_id) = event.session_id.clone() else {
        return;
    };
    let changed = state.session_id() != Some(session_id.as_str());
    if changed {
        state.session = Some(SessionInfo {
            session_id: session_id.clone(),
            project_id: event.project_id.clone(),
            start_time: if event.timestamp.is_empty() {
                now.to_string()
            } else {
                event.timestamp.clone()
            },
            model: event.model.clone(),
        });
    } else if let Some(info) = state.session.as_mut() {
        if event.project_id.is_some() {
            info.project_id = event.project_id.clone();
        }
        if event.model.is_some() {
            info.model = event.model.clone();
        }
    }

    if changed {
        effects.push(Effect::WatchSession {
            session_id: Some(session_id.clone()),
        });
    }
    effects.push(Effect::PersistSessionId { session_id });
}

fn apply_resumed_history(
    state: &mut EngineState,
    loaded: Vec<StreamEvent>,
    now: &str,
    effects: &mut Vec<Effect>,
) {
    let loaded = retain_displayable(loaded);
    state.messages = loaded;
    state.metrics = replay_metrics(&state.messages);
    state.metrics.was_resumed = true;
    finish_request(state, now, effects);
}

/// Append loaded events that memory does not have yet. Returns how many.
///
/// With uuids on both sides, events are matched by uuid and reloaded user
/// prompts are matched against recent local echoes. Otherwise everything past
/// the current message count is treated as new.
fn reconcile(state: &mut EngineState, loaded: Vec<StreamEvent>, now: &str) -> usize {
    let loaded = retain_displayable(loaded);
    let uuid_mode = loaded.iter().any(|e| e.uuid.is_some())
        && state
            .messages
            .iter()
            .filter(|m| m.kind == EventKind::Assistant)
            .all(|m| m.uuid.is_some());

    let mut appended = 0;
    if uuid_mode {
        let mut known: HashSet<String> = state
            .messages
            .iter()
            .filter_map(|m| m.uuid.clone())
            .collect();
        for event in loaded {
            if let Some(uuid) = &event.uuid {
                if known.contains(uuid) {
                    continue;
                }
                known.insert(uuid.clone());
            }
            if event.kind == EventKind::User && adopt_echo(state, &event) {
                continue;
            }
            push_merged(state, event, now);
            appended += 1;
        }
    } else {
        let existing = state
            .messages
            .iter()
            .filter(|m| m.kind != EventKind::Error)
            .count();
        for event in loaded.into_iter().skip(existing) {
            push_merged(state, event, now);
            appended += 1;
        }
    }
    appended
}

/// Match a reloaded user prompt to the local echo appended when it was sent.
fn adopt_echo(state: &mut EngineState, event: &StreamEvent) -> bool {
    let Some(message) = &event.message else {
        return false;
    };
    let text = message.text_content();
    if text.is_empty() {
        return false;
    }
    let echo = state
        .messages
        .iter_mut()
        .rev()
        .filter(|m| m.kind == EventKind::User)
        .take(ECHO_WINDOW)
        .find(|m| m.uuid.is_none() && m.text() == text);
    match echo {
        Some(local) => {
            local.uuid = event.uuid.clone();
            true
        }
        None => false,
    }
}

fn push_merged(state: &mut EngineState, event: StreamEvent, now: &str) {
    let event = stamp(event, now);
    aggregate_metrics(&mut state.metrics, &event);
    state.messages.push(event);
}

fn push_error_event(state: &mut EngineState, event: StreamEvent, now: &str) {
    let event = stamp(event, now);
    if let Some(error) = &event.error {
        state.errors.push(ErrorEntry {
            timestamp: event.timestamp.clone(),
            error_type: error.error_type.as_str().to_string(),
            message: error.message.clone(),
        });
    }
    state.metrics.errors_encountered += 1;
    state.messages.push(event);
}

fn push_error_entry(state: &mut EngineState, now: &str, error_type: &str, message: String) {
    state.errors.push(ErrorEntry {
        timestamp: now.to_string(),
        error_type: error_type.to_string(),
        message,
    });
    state.metrics.errors_encountered += 1;
}

fn queue_hooks(
    state: &EngineState,
    process_id: ProcessId,
    event: &StreamEvent,
    effects: &mut Vec<Effect>,
) {
    if state.settings.pre_tool_use.is_empty() {
        return;
    }
    let Some(message) = &event.message else {
        return;
    };
    for block in &message.content {
        let ContentBlock::ToolUse { name, input, .. } = block else {
            continue;
        };
        for hook in state.settings.pre_tool_use.iter().filter(|h| h.matches(name)) {
            effects.push(Effect::RunHook {
                hook: hook.clone(),
                process_id,
                tool_name: name.clone(),
                tool_input: input.clone(),
                session_id: state.session_id().map(str::to_string),
            });
        }
    }
}

fn stamp(mut event: StreamEvent, now: &str) -> StreamEvent {
    if event.timestamp.is_empty() {
        event.timestamp = now.to_string();
    }
    event
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Created,
    Modified,
    Deleted,
}

/// Case-insensitive substring match on the tool name; first category wins.
pub fn classify_tool(name: &str) -> Option<FileOperation> {
    let name = name.to_lowercase();
    if name.contains("create") || name.contains("write") {
        Some(FileOperation::Created)
    } else if name.contains("edit") || name.contains("modify") {
        Some(FileOperation::Modified)
    } else if name.contains("delete") || name.contains("remove") {
        Some(FileOperation::Deleted)
    } else {
        None
    }
}

/// Per-message counters. Approximate: file operations come from
/// tool names and code blocks from backtick counts.
pub fn aggregate_metrics(metrics: &mut SessionMetrics, event: &StreamEvent) {
    let Some(message) = &event.message else {
        return;
    };
    if let Some(usage) = message.usage {
        metrics.tokens_in += usage.input_tokens;
        metrics.tokens_out += usage.output_tokens;
        metrics.cache_creation_tokens += usage.cache_creation_input_tokens;
        metrics.cache_read_tokens += usage.cache_read_input_tokens;
    }
    for block in &message.content {
        match block {
            ContentBlock::ToolUse { name, .. } => {
                metrics.tools_executed += 1;
                match classify_tool(name) {
                    Some(FileOperation::Created) => metrics.files_created += 1,
                    Some(FileOperation::Modified) => metrics.files_modified += 1,
                    Some(FileOperation::Deleted) => metrics.files_deleted += 1,
                    None => {}
                }
            }
            ContentBlock::ToolResult { is_error: true, .. } => metrics.tools_failed += 1,
            ContentBlock::ToolResult { .. } => {}
            ContentBlock::Text { text } => {
                metrics.code_blocks_generated += (text.matches('`').count() / 6) as u64;
            }
        }
    }
}

/// Metrics recomputed from a loaded history.
pub fn replay_metrics(events: &[StreamEvent]) -> SessionMetrics {
    let mut metrics = SessionMetrics::default();
    for event in events {
        if event.kind == EventKind::Error {
            metrics.errors_encountered += 1;
        } else {
            aggregate_metrics(&mut metrics, event);
        }
    }
    metrics
}
