//! Session actor: owns the `EngineState` and processes inputs sequentially.
//!
//! The engine runs as one tokio task. Callers talk to it through
//! `SessionEngine`, which sends `SessionCommand`s over an mpsc channel.
//! Reads are lock-free through `ArcSwap`; subscribers get every published
//! snapshot through a `watch` channel.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use claudeport_connectors::{
    pre_tool_use_payload, resolve_agent_binary, run_hook, AgentInvocation, HookError,
    ProcessEvent, ProcessSupervisor, SpawnRequest,
};
use claudeport_protocol::{
    ErrorEntry, QueuedPrompt, SessionInfo, SessionMetrics, SessionSnapshot, SessionSummary,
    StreamEvent,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::history::{HistoryError, HistoryStore};
use crate::resume_store::ResumeStore;
use crate::session_command::SessionCommand;
use crate::transition::{transition, Effect, EngineState, HookVerdict, Input, TransitionSettings};
use crate::watcher::{SessionFileEvent, SessionFileWatcher};

const COMMAND_CHANNEL_CAPACITY: usize = 256;
const PROCESS_CHANNEL_CAPACITY: usize = 1024;

/// Everything an engine needs to start.
pub struct EngineOptions {
    /// Working directory for the agent and key for its session logs.
    pub project_path: PathBuf,
    pub config: EngineConfig,
    pub resume_store: Arc<dyn ResumeStore>,
    /// Shared watcher over the projects root; `None` disables reconciliation.
    pub watcher: Option<Arc<SessionFileWatcher>>,
}

/// Handle to a running session engine (cheap to Clone).
#[derive(Clone)]
pub struct SessionEngine {
    project_path: PathBuf,
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    updates: watch::Receiver<Arc<SessionSnapshot>>,
    history: HistoryStore,
}

impl SessionEngine {
    /// Spawn the actor task. Must be called from within a tokio runtime.
    pub fn spawn(options: EngineOptions) -> Self {
        let EngineOptions {
            project_path,
            config,
            resume_store,
            watcher,
        } = options;

        let project_label = project_path.to_string_lossy().into_owned();
        let initial = Arc::new(SessionSnapshot::empty(project_label.clone()));
        let snapshot = Arc::new(ArcSwap::from(initial.clone()));
        let (snapshot_tx, updates) = watch::channel(initial);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (process_tx, process_rx) = mpsc::channel(PROCESS_CHANNEL_CAPACITY);
        let (file_tx, file_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let history = HistoryStore::new(config.projects_root());
        let settings = TransitionSettings {
            continue_last_session: config.continue_last_session,
            pre_tool_use: config.hooks.pre_tool_use.clone(),
            block_on_failure: config.hooks.block_on_failure,
        };

        let startup = if config.auto_resume {
            resume_store
                .load(&project_path)
                .map(|session_id| Input::ResumeSession { session_id })
        } else {
            None
        };
        if let Some(watcher) = &watcher {
            watcher.set_project(Some(&project_path));
        }

        let actor = SessionActor {
            state: EngineState::new(project_label, settings),
            project_path: project_path.clone(),
            config,
            supervisor: ProcessSupervisor::new(),
            history: history.clone(),
            resume_store,
            watcher,
            watched_session: None,
            process_tx,
            file_tx,
            internal_tx,
            snapshot: snapshot.clone(),
            snapshot_tx,
        };

        tokio::spawn(actor.run(command_rx, process_rx, file_rx, internal_rx, startup));

        SessionEngine {
            project_path,
            command_tx,
            snapshot,
            updates,
            history,
        }
    }

    async fn send(&self, cmd: SessionCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "session_engine",
                event = "session_engine.command_dropped",
                project_path = %self.project_path.display(),
                "Actor channel closed, command dropped"
            );
        }
    }

    /// Send a prompt now, or queue it behind the running request.
    pub async fn send_prompt(&self, prompt: impl Into<String>, model: Option<String>) {
        self.send(SessionCommand::SendPrompt {
            prompt: prompt.into(),
            model,
        })
        .await;
    }

    /// Kill the running request. Queued prompts stay queued.
    pub async fn stop_current_request(&self) {
        self.send(SessionCommand::StopCurrentRequest).await;
    }

    pub async fn start_new_session(&self) {
        self.send(SessionCommand::StartNewSession).await;
    }

    pub async fn resume_session(&self, session_id: impl Into<String>) {
        self.send(SessionCommand::ResumeSession {
            session_id: session_id.into(),
        })
        .await;
    }

    /// Most recently modified sessions for this project. Blocking file I/O.
    pub fn recent_sessions_with_details(
        &self,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, HistoryError> {
        self.history.recent_sessions(&self.project_path, limit)
    }

    /// Stop every process and end the actor. Later commands are dropped.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        self.send(SessionCommand::Shutdown { reply }).await;
        let _ = done.await;
    }

    // -- Reads (lock-free) --

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.updates.clone()
    }

    pub fn messages(&self) -> Vec<StreamEvent> {
        self.snapshot().messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().is_loading
    }

    pub fn session_info(&self) -> Option<SessionInfo> {
        self.snapshot().session.clone()
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.snapshot().metrics.clone()
    }

    pub fn queued_prompts(&self) -> Vec<QueuedPrompt> {
        self.snapshot().queue.clone()
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.snapshot().errors.clone()
    }
}

struct SessionActor {
    state: EngineState,
    project_path: PathBuf,
    config: EngineConfig,
    supervisor: ProcessSupervisor,
    history: HistoryStore,
    resume_store: Arc<dyn ResumeStore>,
    watcher: Option<Arc<SessionFileWatcher>>,
    watched_session: Option<String>,
    process_tx: mpsc::Sender<ProcessEvent>,
    file_tx: mpsc::UnboundedSender<SessionFileEvent>,
    internal_tx: mpsc::UnboundedSender<Input>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
    snapshot_tx: watch::Sender<Arc<SessionSnapshot>>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SessionCommand>,
        mut process_rx: mpsc::Receiver<ProcessEvent>,
        mut file_rx: mpsc::UnboundedReceiver<SessionFileEvent>,
        mut internal_rx: mpsc::UnboundedReceiver<Input>,
        startup: Option<Input>,
    ) {
        if let Some(input) = startup {
            info!(
                component = "session_engine",
                event = "session_engine.auto_resume",
                project_path = %self.project_path.display(),
                "Resuming last session for project"
            );
            self.dispatch(input);
        }

        // The actor holds a sender for every channel but commands, so only
        // the command channel can close.
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        return;
                    }
                    Some(cmd) => {
                        if let Ok(input) = cmd.into_input() {
                            self.dispatch(input);
                        }
                    }
                    None => {
                        self.shutdown();
                        return;
                    }
                },
                Some(event) = process_rx.recv() => self.on_process_event(event),
                Some(event) = file_rx.recv() => self.on_file_event(event),
                Some(input) = internal_rx.recv() => self.dispatch(input),
            }
        }
    }

    fn on_process_event(&mut self, event: ProcessEvent) {
        if let ProcessEvent::Diagnostic { process_id, line } = &event {
            debug!(
                component = "session_engine",
                event = "session_engine.stderr",
                process_id = *process_id,
                line = %line,
                "Agent stderr"
            );
        }
        self.dispatch(Input::Process(event));
    }

    fn on_file_event(&mut self, event: SessionFileEvent) {
        match event {
            SessionFileEvent::Changed { session_id, .. } => {
                self.dispatch(Input::SessionFileChanged { session_id });
            }
            SessionFileEvent::Deleted { session_id, path } => {
                info!(
                    component = "session_engine",
                    event = "session_engine.session_file_deleted",
                    session_id = %session_id,
                    path = %path.display(),
                    "Session log removed externally"
                );
                self.dispatch(Input::SessionFileDeleted { session_id });
            }
        }
    }

    /// Run `input` and every follow-up input its effects produce, then
    /// publish once if anything visible changed.
    fn dispatch(&mut self, input: Input) {
        let before = self.state.revision;
        let mut pending = VecDeque::from([input]);
        while let Some(input) = pending.pop_front() {
            let now = chrono::Utc::now().to_rfc3339();
            let state = std::mem::take(&mut self.state);
            let (state, effects) = transition(state, input, &now);
            self.state = state;
            for effect in effects {
                if let Some(follow_up) = self.execute(effect) {
                    pending.push_back(follow_up);
                }
            }
        }
        if self.state.revision != before {
            self.publish();
        }
    }

    fn publish(&self) {
        let snapshot = Arc::new(self.state.snapshot());
        self.snapshot.store(snapshot.clone());
        self.snapshot_tx.send_replace(snapshot);
    }

    fn execute(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::Spawn {
                prompt,
                model,
                resume,
                session_id,
            } => Some(self.spawn_agent(prompt, model, resume, session_id)),

            Effect::Stop { process_id } => {
                if self.supervisor.stop(process_id) {
                    info!(
                        component = "session_engine",
                        event = "session_engine.process_stopped",
                        process_id,
                        "Stopped agent process"
                    );
                }
                None
            }

            Effect::PersistSessionId { session_id } => {
                let store = self.resume_store.clone();
                let project_path = self.project_path.clone();
                tokio::task::spawn_blocking(move || {
                    if let Err(e) = store.save(&project_path, &session_id) {
                        warn!(
                            component = "session_engine",
                            event = "session_engine.persist_failed",
                            session_id = %session_id,
                            error = %e,
                            "Failed to persist session id"
                        );
                    }
                });
                None
            }

            Effect::LoadHistory {
                session_id,
                epoch,
                purpose,
            } => {
                let history = self.history.clone();
                let project_path = self.project_path.clone();
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let id = session_id.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        history.load_session(&project_path, &id)
                    })
                    .await;
                    let result = match result {
                        Ok(Ok(events)) => Ok(events),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    if let Err(message) = &result {
                        warn!(
                            component = "session_engine",
                            event = "session_engine.history_load_failed",
                            session_id = %session_id,
                            error = %message,
                            "Failed to load session history, treating as empty"
                        );
                    }
                    let _ = internal_tx.send(Input::HistoryLoaded {
                        epoch,
                        purpose,
                        session_id,
                        result,
                    });
                });
                None
            }

            Effect::WatchSession { session_id } => {
                if let Some(watcher) = &self.watcher {
                    if let Some(previous) = self.watched_session.take() {
                        watcher.unsubscribe(&previous, &self.file_tx);
                    }
                    if let Some(session_id) = &session_id {
                        watcher.subscribe(session_id, self.file_tx.clone());
                    }
                }
                self.watched_session = session_id;
                None
            }

            Effect::RunHook {
                hook,
                process_id,
                tool_name,
                tool_input,
                session_id,
            } => {
                let cwd = self.project_path.clone();
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let payload =
                        pre_tool_use_payload(session_id.as_deref(), &cwd, &tool_name, &tool_input);
                    let verdict = match run_hook(&hook, &payload, &cwd).await {
                        Ok(outcome) => {
                            debug!(
                                component = "session_engine",
                                event = "session_engine.hook_passed",
                                tool_name = %tool_name,
                                duration_ms = outcome.duration_ms,
                                "Guard passed"
                            );
                            HookVerdict::Passed
                        }
                        Err(HookError::Blocked { reason, .. }) => HookVerdict::Blocked { reason },
                        Err(HookError::Timeout { timeout_secs, .. }) => {
                            HookVerdict::TimedOut { timeout_secs }
                        }
                        Err(e) => HookVerdict::Failed {
                            message: e.to_string(),
                        },
                    };
                    let _ = internal_tx.send(Input::HookFinished {
                        process_id,
                        tool_name,
                        verdict,
                    });
                });
                None
            }
        }
    }

    fn spawn_agent(
        &self,
        prompt: String,
        model: Option<String>,
        resume: claudeport_connectors::ResumeMode,
        session_id: Option<String>,
    ) -> Input {
        let model = model.or_else(|| self.config.default_model.clone());
        let args = AgentInvocation::new(prompt)
            .model(model.as_deref())
            .resume(resume)
            .skip_permissions(self.config.skip_permissions)
            .passthrough(&self.config.passthrough_args)
            .to_args();
        let program = resolve_agent_binary(
            self.config.binary_path.as_deref(),
            &self.config.extra_bin_dirs,
        );
        let request = SpawnRequest {
            program,
            args,
            working_dir: self.project_path.clone(),
            extra_bin_dirs: self.config.extra_bin_dirs.clone(),
            env: self
                .config
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            session_id,
        };

        match self.supervisor.spawn(request, self.process_tx.clone()) {
            Ok(process) => {
                info!(
                    component = "session_engine",
                    event = "session_engine.process_spawned",
                    process_id = process.process_id,
                    pid = ?process.pid,
                    "Agent process started"
                );
                Input::SpawnSucceeded {
                    process_id: process.process_id,
                }
            }
            Err(e) => Input::SpawnFailed {
                message: e.to_string(),
            },
        }
    }

    fn shutdown(&mut self) {
        let stopped = self.supervisor.stop_all();
        if let (Some(watcher), Some(session_id)) = (&self.watcher, self.watched_session.take()) {
            watcher.unsubscribe(&session_id, &self.file_tx);
        }
        info!(
            component = "session_engine",
            event = "session_engine.shutdown",
            project_path = %self.project_path.display(),
            stopped,
            "Session engine stopped"
        );
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::resume_store::MemoryResumeStore;
    use claudeport_protocol::{EventKind, SessionPhase};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        project: PathBuf,
        projects_root: PathBuf,
        argv_file: PathBuf,
        bin_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("work");
        let projects_root = dir.path().join("projects");
        let bin_dir = dir.path().join("bin");
        for d in [&project, &projects_root, &bin_dir] {
            fs::create_dir_all(d).unwrap();
        }
        Fixture {
            argv_file: dir.path().join("argv.txt"),
            project,
            projects_root,
            bin_dir,
            _dir: dir,
        }
    }

    fn write_agent(fx: &Fixture, body: &str) -> PathBuf {
        let path = fx.bin_dir.join("fake-claude");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(fx: &Fixture, binary: PathBuf) -> EngineConfig {
        let mut config = EngineConfig {
            binary_path: Some(binary),
            projects_root: Some(fx.projects_root.clone()),
            ..EngineConfig::default()
        };
        config.env.insert(
            "ARGV_FILE".to_string(),
            fx.argv_file.to_string_lossy().into_owned(),
        );
        config
    }

    fn engine(fx: &Fixture, config: EngineConfig, store: Arc<MemoryResumeStore>) -> SessionEngine {
        SessionEngine::spawn(EngineOptions {
            project_path: fx.project.clone(),
            config,
            resume_store: store,
            watcher: None,
        })
    }

    async fn wait_for(
        engine: &SessionEngine,
        predicate: impl Fn(&SessionSnapshot) -> bool,
    ) -> Arc<SessionSnapshot> {
        let mut rx = engine.subscribe();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if predicate(&snapshot) {
                    return snapshot;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out waiting for engine state")
    }

    const REPLY: &str = r#"printf '%s\n' "$@" > "$ARGV_FILE"
echo '{"type":"system","subtype":"init","session_id":"abc123"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}'
echo '{"type":"result","subtype":"success"}'"#;

    #[tokio::test]
    async fn resumed_session_passes_resume_flag() {
        let fx = fixture();
        let agent = write_agent(&fx, REPLY);
        let engine = engine(&fx, config(&fx, agent), Arc::new(MemoryResumeStore::default()));

        engine.resume_session("abc123").await;
        engine.send_prompt("continue", None).await;

        let snapshot = wait_for(&engine, |s| {
            s.phase == SessionPhase::Idle && s.messages.iter().any(|m| m.kind == EventKind::Assistant)
        })
        .await;

        let assistant: Vec<_> = snapshot
            .messages
            .iter()
            .filter(|m| m.kind == EventKind::Assistant)
            .collect();
        assert_eq!(assistant.len(), 1);
        assert_eq!(assistant[0].text(), "hi");
        assert_eq!(snapshot.session_id(), Some("abc123"));
        assert!(!engine.is_loading());

        let argv: Vec<String> = fs::read_to_string(&fx.argv_file)
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        let resume_at = argv.iter().position(|a| a == "--resume").unwrap();
        assert_eq!(argv[resume_at + 1], "abc123");
        assert!(argv.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(argv.contains(&"continue".to_string()));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn unstartable_binary_surfaces_start_error() {
        let fx = fixture();
        let not_executable = fx.bin_dir.join("claude");
        fs::write(&not_executable, "not a program").unwrap();
        fs::set_permissions(&not_executable, fs::Permissions::from_mode(0o644)).unwrap();
        let engine = engine(
            &fx,
            config(&fx, not_executable),
            Arc::new(MemoryResumeStore::default()),
        );

        engine.send_prompt("hello", None).await;
        let snapshot = wait_for(&engine, |s| !s.errors.is_empty()).await;

        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].error_type, "PROCESS_START_ERROR");
        assert_eq!(snapshot.metrics.errors_encountered, 1);
        assert!(!snapshot.is_loading);
        assert_eq!(
            snapshot
                .messages
                .iter()
                .filter(|m| m.kind == EventKind::Error)
                .count(),
            1
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn prompts_run_one_at_a_time_in_order() {
        let fx = fixture();
        let agent = write_agent(
            &fx,
            r#"sleep 0.2
echo '{"type":"system","subtype":"init","session_id":"s1"}'
echo '{"type":"assistant","message":{"content":"ok"}}'"#,
        );
        let engine = engine(&fx, config(&fx, agent), Arc::new(MemoryResumeStore::default()));

        engine.send_prompt("a", None).await;
        engine.send_prompt("b", None).await;
        let queued = wait_for(&engine, |s| !s.queue.is_empty()).await;
        assert_eq!(queued.queue[0].prompt, "b");

        let snapshot = wait_for(&engine, |s| {
            s.phase == SessionPhase::Idle && s.metrics.prompts_sent == 2 && s.queue.is_empty()
        })
        .await;
        let users: Vec<String> = snapshot
            .messages
            .iter()
            .filter(|m| m.kind == EventKind::User)
            .map(StreamEvent::text)
            .collect();
        assert_eq!(users, vec!["a", "b"]);
        let kinds: Vec<EventKind> = snapshot.messages.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::User,
                EventKind::Assistant,
                EventKind::User,
                EventKind::Assistant
            ]
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn stop_returns_to_idle_without_error() {
        let fx = fixture();
        let agent = write_agent(&fx, "exec sleep 30");
        let engine = engine(&fx, config(&fx, agent), Arc::new(MemoryResumeStore::default()));

        engine.send_prompt("long", None).await;
        wait_for(&engine, |s| s.is_loading).await;
        engine.stop_current_request().await;

        let snapshot = wait_for(&engine, |s| !s.is_loading).await;
        assert!(snapshot.errors.is_empty());

        // The killed process must not produce a late error or completion.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = engine.snapshot();
        assert!(after.errors.is_empty());
        assert_eq!(after.messages.len(), 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn session_id_is_persisted_and_auto_resumed() {
        let fx = fixture();
        let agent = write_agent(&fx, REPLY);
        let store = Arc::new(MemoryResumeStore::default());
        let first = engine(&fx, config(&fx, agent.clone()), store.clone());
        first.send_prompt("hi", None).await;
        wait_for(&first, |s| {
            s.phase == SessionPhase::Idle && s.session_id() == Some("abc123")
        })
        .await;
        first.shutdown().await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.load(&fx.project).is_none() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(store.load(&fx.project).as_deref(), Some("abc123"));

        let log = crate::paths::session_file_path(&fx.projects_root, &fx.project, "abc123");
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(
            &log,
            concat!(
                r#"{"type":"user","uuid":"u1","message":{"content":"hi"}}"#,
                "\n",
                r#"{"type":"assistant","uuid":"a1","message":{"content":[{"type":"tool_use","id":"t","name":"Edit","input":{}}]}}"#,
                "\n"
            ),
        )
        .unwrap();

        let mut config = config(&fx, agent);
        config.auto_resume = true;
        let second = engine(&fx, config, store);
        let snapshot = wait_for(&second, |s| s.metrics.was_resumed && !s.is_loading).await;
        assert_eq!(snapshot.session_id(), Some("abc123"));
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.metrics.files_modified, 1);

        let recent = second.recent_sessions_with_details(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].session_id, "abc123");
        assert_eq!(recent[0].preview.as_deref(), Some("hi"));
        second.shutdown().await;
    }

    #[tokio::test]
    async fn external_appends_reconcile_across_delete_and_recreate() {
        use std::io::Write;

        let fx = fixture();
        let agent = write_agent(&fx, REPLY);
        let log = crate::paths::session_file_path(&fx.projects_root, &fx.project, "s1");
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        let u1 = r#"{"type":"user","uuid":"u1","message":{"content":"hi"}}"#;
        let a1 = r#"{"type":"assistant","uuid":"a1","message":{"content":"first"}}"#;
        let a2 = r#"{"type":"assistant","uuid":"a2","message":{"content":"second"}}"#;
        fs::write(&log, format!("{u1}\n")).unwrap();

        let watcher = Arc::new(SessionFileWatcher::start(&fx.projects_root).unwrap());
        let mut project_rx = watcher.watch_project();
        let engine = SessionEngine::spawn(EngineOptions {
            project_path: fx.project.clone(),
            config: config(&fx, agent),
            resume_store: Arc::new(MemoryResumeStore::default()),
            watcher: Some(watcher.clone()),
        });

        engine.resume_session("s1").await;
        wait_for(&engine, |s| s.metrics.was_resumed && !s.is_loading && s.messages.len() == 1).await;
        assert_eq!(watcher.listener_count("s1"), 1);

        let mut file = fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "{a1}").unwrap();
        drop(file);
        let snapshot = wait_for(&engine, |s| s.messages.len() == 2).await;
        assert_eq!(snapshot.messages[1].text(), "first");

        fs::remove_file(&log).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match project_rx.recv().await {
                    Some(SessionFileEvent::Deleted { .. }) => break,
                    Some(_) => continue,
                    None => panic!("watcher closed"),
                }
            }
            while watcher.listener_count("s1") == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("engine did not follow the session again");

        fs::write(&log, format!("{u1}\n{a1}\n{a2}\n")).unwrap();
        let snapshot = wait_for(&engine, |s| s.messages.len() == 3).await;
        assert_eq!(snapshot.messages[2].text(), "second");
        assert_eq!(snapshot.session_id(), Some("s1"));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn new_session_clears_state() {
        let fx = fixture();
        let agent = write_agent(&fx, REPLY);
        let engine = engine(&fx, config(&fx, agent), Arc::new(MemoryResumeStore::default()));

        engine.send_prompt("hi", None).await;
        wait_for(&engine, |s| s.phase == SessionPhase::Idle && s.session.is_some()).await;
        engine.start_new_session().await;
        let snapshot = wait_for(&engine, |s| s.session.is_none()).await;
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.metrics, SessionMetrics::default());
        assert!(engine.queued_prompts().is_empty());
        engine.shutdown().await;
    }
}
