//! Agent subprocess supervision
//!
//! Spawns one `claude` process per request and attaches three isolated tasks
//! to it: a stdout reader that decodes stream-json lines, a stderr reader for
//! diagnostics, and an exit waiter that emits the terminal event. Everything
//! flows to the caller through a single `mpsc` channel, tagged with the
//! process id so stale output can be told apart from the active request.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use claudeport_protocol::{ErrorType, StreamEvent};
use dashmap::DashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::binary::extended_path;
use crate::decoder::decode_line;
use crate::ConnectorError;

/// How long the exit waiter waits for stdout to drain after the process is gone.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub type ProcessId = u64;

/// Everything needed to start one agent process
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Prepended to the inherited `PATH`.
    pub extra_bin_dirs: Vec<PathBuf>,
    pub env: Vec<(String, String)>,
    pub session_id: Option<String>,
}

/// Output of a supervised process
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A decoded stdout line, or the synthetic terminal event.
    Stream {
        process_id: ProcessId,
        event: StreamEvent,
    },
    /// A non-blank stderr line. Never protocol data.
    Diagnostic { process_id: ProcessId, line: String },
}

impl ProcessEvent {
    pub fn process_id(&self) -> ProcessId {
        match self {
            ProcessEvent::Stream { process_id, .. } | ProcessEvent::Diagnostic { process_id, .. } => {
                *process_id
            }
        }
    }
}

/// Entry in the process table
struct ProcessHandle {
    info: ProcessInfo,
    kill_tx: oneshot::Sender<()>,
}

/// Public view of a tracked process
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub process_id: ProcessId,
    pub pid: Option<u32>,
    pub session_id: Option<String>,
    pub project_path: PathBuf,
    pub started_at: Instant,
}

/// Owns the process table. Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct ProcessSupervisor {
    table: Arc<DashMap<ProcessId, ProcessHandle>>,
    next_id: Arc<AtomicU64>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a process and wire its output into `events`.
    ///
    /// stdin is closed immediately. On failure nothing is registered.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        &self,
        request: SpawnRequest,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<ProcessInfo, ConnectorError> {
        let mut command = tokio::process::Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = extended_path(&request.extra_bin_dirs, std::env::var_os("PATH")) {
            command.env("PATH", path);
        }
        for (key, value) in &request.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            warn!(
                component = "supervisor",
                event = "supervisor.spawn_failed",
                program = %request.program.display(),
                error = %e,
                "Failed to spawn agent process"
            );
            ConnectorError::SpawnFailed(e.to_string())
        })?;

        // Dropping `child` on these paths kills it (kill_on_drop).
        let stdout = child
            .stdout
            .take()
            .ok_or(ConnectorError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ConnectorError::MissingPipe("stderr"))?;

        let process_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let info = ProcessInfo {
            process_id,
            pid: child.id(),
            session_id: request.session_id.clone(),
            project_path: request.working_dir.clone(),
            started_at: Instant::now(),
        };
        let (kill_tx, kill_rx) = oneshot::channel();
        self.table.insert(
            process_id,
            ProcessHandle {
                info: info.clone(),
                kill_tx,
            },
        );

        info!(
            component = "supervisor",
            event = "supervisor.spawned",
            process_id,
            pid = ?info.pid,
            program = %request.program.display(),
            cwd = %request.working_dir.display(),
            session_id = ?request.session_id,
            "Spawned agent process"
        );

        let stdout_task = tokio::spawn(read_stdout(
            BufReader::new(stdout),
            events.clone(),
            process_id,
        ));
        let stderr_task = tokio::spawn(read_stderr(
            BufReader::new(stderr),
            events.clone(),
            process_id,
        ));
        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            Readers {
                stdout: stdout_task,
                stderr: stderr_task,
            },
            self.table.clone(),
            events,
            process_id,
        ));

        Ok(info)
    }

    /// Forcibly terminate a process. Stopping an unknown id is a no-op.
    ///
    /// Returns whether a tracked process was stopped. Never waits on the
    /// reader tasks; the handle is gone from the table when this returns.
    pub fn stop(&self, process_id: ProcessId) -> bool {
        let Some((_, handle)) = self.table.remove(&process_id) else {
            return false;
        };
        // The waiter may already be past its select; the kill is best-effort.
        let _ = handle.kill_tx.send(());
        info!(
            component = "supervisor",
            event = "supervisor.stopped",
            process_id,
            pid = ?handle.info.pid,
            "Stopped agent process"
        );
        true
    }

    pub fn stop_all(&self) -> usize {
        let ids: Vec<ProcessId> = self.table.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.stop(*id)).count()
    }

    pub fn is_running(&self, process_id: ProcessId) -> bool {
        self.table.contains_key(&process_id)
    }

    pub fn running(&self) -> Vec<ProcessInfo> {
        self.table
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

async fn read_stdout<R>(mut reader: R, events: mpsc::Sender<ProcessEvent>, process_id: ProcessId)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!(
                    component = "supervisor",
                    event = "supervisor.stdout.eof",
                    process_id,
                    "Agent stdout EOF"
                );
                return;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let event = match decode_line(&line) {
                    Ok(event) => event,
                    Err(err) if err.is_expected() => {
                        debug!(
                            component = "supervisor",
                            event = "supervisor.stdout.skipped",
                            process_id,
                            reason = %err,
                            "Skipped stdout line"
                        );
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            component = "supervisor",
                            event = "supervisor.stdout.parse_error",
                            process_id,
                            error = %err,
                            line_preview = %preview(&line),
                            "Failed to parse stdout JSON"
                        );
                        continue;
                    }
                };
                if events
                    .send(ProcessEvent::Stream { process_id, event })
                    .await
                    .is_err()
                {
                    info!(
                        component = "supervisor",
                        event = "supervisor.stdout.channel_closed",
                        process_id,
                        "Event channel closed, stopping reader"
                    );
                    return;
                }
            }
            Err(e) => {
                error!(
                    component = "supervisor",
                    event = "supervisor.stdout.read_error",
                    process_id,
                    error = %e,
                    "Error reading agent stdout"
                );
                return;
            }
        }
    }
}

async fn read_stderr<R>(reader: R, events: mpsc::Sender<ProcessEvent>, process_id: ProcessId)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if line.trim().is_empty() {
                    continue;
                }
                debug!(
                    component = "supervisor",
                    event = "supervisor.stderr",
                    process_id,
                    line = %line,
                    "Agent stderr"
                );
                // Diagnostics are best-effort; a closed channel only ends forwarding.
                let _ = events
                    .send(ProcessEvent::Diagnostic {
                        process_id,
                        line: line.to_string(),
                    })
                    .await;
            }
            Ok(None) => return,
            Err(e) => {
                debug!(
                    component = "supervisor",
                    event = "supervisor.stderr.read_error",
                    process_id,
                    error = %e,
                    "Stopped reading agent stderr"
                );
                return;
            }
        }
    }
}

/// Reader tasks attached to one process.
struct Readers {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    readers: Readers,
    table: Arc<DashMap<ProcessId, ProcessHandle>>,
    events: mpsc::Sender<ProcessEvent>,
    process_id: ProcessId,
) {
    let (status, stopped) = tokio::select! {
        status = child.wait() => (status, false),
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                debug!(
                    component = "supervisor",
                    event = "supervisor.kill_failed",
                    process_id,
                    error = %e,
                    "Kill failed, process likely already exited"
                );
            }
            (child.wait().await, true)
        }
    };

    // Descendants of a killed agent can hold its pipes open; the readers go
    // with it so their senders are released.
    let Readers { stdout, stderr } = readers;
    if stopped {
        stdout.abort();
        stderr.abort();
    }

    // Drain stdout first so the terminal event is always the last one.
    let abort = stdout.abort_handle();
    if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, stdout)
        .await
        .is_err()
    {
        warn!(
            component = "supervisor",
            event = "supervisor.stdout.drain_timeout",
            process_id,
            "stdout still open after exit, abandoning reader"
        );
        abort.abort();
    }
    stderr.abort();

    if table.remove(&process_id).is_none() {
        // Explicitly stopped: the caller already moved on.
        debug!(
            component = "supervisor",
            event = "supervisor.exit_after_stop",
            process_id,
            "Stopped process exited"
        );
        return;
    }

    let event = match status {
        Ok(status) if status.success() => StreamEvent::completed(),
        Ok(status) => {
            let message = match status.code() {
                Some(code) => format!("Agent process exited with code {code}"),
                None => "Agent process terminated by signal".to_string(),
            };
            StreamEvent::error(ErrorType::ProcessExitError, message, status.code())
        }
        Err(e) => StreamEvent::error(
            ErrorType::ProcessExitError,
            format!("Failed waiting for agent process: {e}"),
            None,
        ),
    };

    info!(
        component = "supervisor",
        event = "supervisor.exited",
        process_id,
        success = event.is_complete(),
        "Agent process exited"
    );

    let _ = events.send(ProcessEvent::Stream { process_id, event }).await;
}

fn preview(line: &str) -> String {
    line.trim_end().chars().take(200).collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use claudeport_protocol::EventKind;
    use std::path::Path;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request(program: PathBuf, dir: &Path) -> SpawnRequest {
        SpawnRequest {
            program,
            args: Vec::new(),
            working_dir: dir.to_path_buf(),
            extra_bin_dirs: Vec::new(),
            env: Vec::new(),
            session_id: None,
        }
    }

    async fn collect_until_terminal(rx: &mut mpsc::Receiver<ProcessEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for process events")
                .expect("channel closed");
            if let ProcessEvent::Stream { event, .. } = next {
                let terminal = event.is_terminal();
                out.push(event);
                if terminal {
                    return out;
                }
            }
        }
    }

    #[tokio::test]
    async fn streams_lines_in_order_then_completes() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"echo '{"type":"system","subtype":"init","session_id":"abc123"}'
echo ''
echo 'garbage'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}]}}'
echo 'diagnostic noise' >&2
exit 0"#,
        );
        let supervisor = ProcessSupervisor::new();
        let (tx, mut rx) = mpsc::channel(64);

        let info = supervisor.spawn(request(script, dir.path()), tx).unwrap();
        assert!(supervisor.is_running(info.process_id) || supervisor.is_empty());

        let events = collect_until_terminal(&mut rx).await;
        assert_eq!(events.len(), 3);
        assert!(events[0].is_session_init());
        assert_eq!(events[1].kind, EventKind::Assistant);
        assert_eq!(events[1].text(), "hi");
        assert!(events[2].is_complete());
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_emits_process_exit_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exit 3");
        let supervisor = ProcessSupervisor::new();
        let (tx, mut rx) = mpsc::channel(16);

        supervisor.spawn(request(script, dir.path()), tx).unwrap();
        let events = collect_until_terminal(&mut rx).await;
        let error = events.last().unwrap().error.clone().unwrap();
        assert_eq!(error.error_type, ErrorType::ProcessExitError);
        assert_eq!(error.exit_code, Some(3));
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn missing_binary_fails_without_registering() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new();
        let (tx, _rx) = mpsc::channel(16);

        let err = supervisor
            .spawn(request(dir.path().join("does-not-exist"), dir.path()), tx)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::SpawnFailed(_)));
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_suppresses_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "exec sleep 30");
        let supervisor = ProcessSupervisor::new();
        let (tx, mut rx) = mpsc::channel(16);

        let info = supervisor.spawn(request(script, dir.path()), tx).unwrap();
        assert!(supervisor.stop(info.process_id));
        assert!(!supervisor.stop(info.process_id));
        assert!(!supervisor.stop(9999));
        assert!(supervisor.is_empty());

        // All senders drop once the tasks wind down; no terminal event arrives.
        let drained = tokio::time::timeout(Duration::from_secs(10), async {
            let mut seen = Vec::new();
            while let Some(event) = rx.recv().await {
                seen.push(event);
            }
            seen
        })
        .await
        .expect("tasks did not finish after stop");
        assert!(drained
            .iter()
            .all(|e| !matches!(e, ProcessEvent::Stream { event, .. } if event.is_terminal())));
    }

    #[tokio::test]
    async fn stop_releases_readers_held_open_by_descendants() {
        let dir = tempfile::tempdir().unwrap();
        // The background sleep inherits stdout and stderr and outlives the kill.
        let script = write_script(dir.path(), "echo 'starting' >&2\nsleep 30 &\nwait");
        let supervisor = ProcessSupervisor::new();
        let (tx, mut rx) = mpsc::channel(16);

        let info = supervisor.spawn(request(script, dir.path()), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(supervisor.stop(info.process_id));

        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.is_some() {}
        })
        .await
        .expect("event channel still open after stop");
    }

    #[tokio::test]
    async fn stdin_is_closed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        // `read` blocks forever on an open pipe; with stdin closed it fails at once.
        let script = write_script(
            dir.path(),
            r#"if read line; then echo '{"type":"assistant","message":{"content":"got input"}}'; fi
echo '{"type":"assistant","message":{"content":"no input"}}'"#,
        );
        let supervisor = ProcessSupervisor::new();
        let (tx, mut rx) = mpsc::channel(16);

        supervisor.spawn(request(script, dir.path()), tx).unwrap();
        let events = collect_until_terminal(&mut rx).await;
        assert_eq!(events[0].text(), "no input");
    }

    #[tokio::test]
    async fn extra_bin_dirs_are_prepended_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            r#"printf '{"type":"assistant","message":{"content":"%s"}}\n' "$PATH""#,
        );
        let supervisor = ProcessSupervisor::new();
        let (tx, mut rx) = mpsc::channel(16);
        let mut req = request(script, dir.path());
        req.extra_bin_dirs = vec![PathBuf::from("/opt/claudeport-test/bin")];
        req.env = vec![("CLAUDEPORT_TEST".into(), "1".into())];

        supervisor.spawn(req, tx).unwrap();
        let events = collect_until_terminal(&mut rx).await;
        assert!(events[0].text().starts_with("/opt/claudeport-test/bin"));
    }

    #[tokio::test]
    async fn stop_all_clears_table() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 30");
        let supervisor = ProcessSupervisor::new();
        let (tx, _rx) = mpsc::channel(16);

        supervisor
            .spawn(request(script.clone(), dir.path()), tx.clone())
            .unwrap();
        supervisor.spawn(request(script, dir.path()), tx).unwrap();
        assert_eq!(supervisor.len(), 2);
        assert_eq!(supervisor.stop_all(), 2);
        assert!(supervisor.is_empty());
        assert!(supervisor.running().is_empty());
    }
}
