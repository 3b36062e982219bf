//! Watches the agent's projects root for session log changes.
//!
//! One `notify` watcher covers the whole root recursively. Events for
//! `*.jsonl` files in the active project are debounced (150ms) into
//! `Changed` notifications; removals are delivered immediately as `Deleted`.
//! Project matching compares the file's parent directory name with the
//! forward encoding of the active project path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::paths::{encode_project_path, is_session_file, session_file_parts};

const DEBOUNCE_MS: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFileEvent {
    Changed { session_id: String, path: PathBuf },
    Deleted { session_id: String, path: PathBuf },
}

impl SessionFileEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionFileEvent::Changed { session_id, .. }
            | SessionFileEvent::Deleted { session_id, .. } => session_id,
        }
    }
}

pub type FileListener = mpsc::UnboundedSender<SessionFileEvent>;
type DeleteCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Modified,
    Removed,
}

enum WatcherMessage {
    Fs(Event),
    Fire(PathBuf),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Listener table shared between the handle and the event loop.
#[derive(Default)]
struct Registry {
    listeners: DashMap<String, Vec<FileListener>>,
    project_listener: Mutex<Option<FileListener>>,
    active_project: Mutex<Option<String>>,
    on_delete: Mutex<Option<DeleteCallback>>,
}

impl Registry {
    fn matches_project(&self, dir_name: &str) -> bool {
        match lock(&self.active_project).as_deref() {
            Some(encoded) => encoded == dir_name,
            None => true,
        }
    }

    fn dispatch(&self, path: &Path, change: Change) {
        let Some((session_id, dir_name)) = session_file_parts(path) else {
            return;
        };
        if !self.matches_project(&dir_name) {
            return;
        }

        let event = match change {
            Change::Modified => SessionFileEvent::Changed {
                session_id: session_id.clone(),
                path: path.to_path_buf(),
            },
            Change::Removed => SessionFileEvent::Deleted {
                session_id: session_id.clone(),
                path: path.to_path_buf(),
            },
        };

        if change == Change::Removed {
            let callback = lock(&self.on_delete).clone();
            if let Some(callback) = callback {
                callback(&session_id);
            }
        }

        if change == Change::Removed {
            // Unregistered before sending so a listener can subscribe again
            // as soon as it hears about the delete.
            if let Some((_, listeners)) = self.listeners.remove(&session_id) {
                for listener in listeners {
                    let _ = listener.send(event.clone());
                }
            }
        } else if let Some(mut listeners) = self.listeners.get_mut(&session_id) {
            listeners.retain(|listener| listener.send(event.clone()).is_ok());
        }

        {
            let mut project = lock(&self.project_listener);
            if let Some(listener) = project.as_ref() {
                if listener.send(event.clone()).is_err() {
                    *project = None;
                }
            }
        }

        debug!(
            component = "watcher",
            event = "watcher.dispatched",
            session_id = %session_id,
            change = ?change,
            "Session file notification"
        );
    }
}

pub struct SessionFileWatcher {
    root: PathBuf,
    registry: Arc<Registry>,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl SessionFileWatcher {
    /// Start watching `projects_root`, creating it if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(projects_root: &Path) -> Result<Self, notify::Error> {
        std::fs::create_dir_all(projects_root).map_err(notify::Error::io)?;

        let (tx, rx) = mpsc::unbounded_channel::<WatcherMessage>();
        let fs_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    let _ = fs_tx.send(WatcherMessage::Fs(event));
                }
                Err(err) => {
                    warn!(
                        component = "watcher",
                        event = "watcher.fs_event_error",
                        error = %err,
                        "Session watcher event error"
                    );
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(projects_root, RecursiveMode::Recursive)?;

        info!(
            component = "watcher",
            event = "watcher.started",
            path = %projects_root.display(),
            "Session watcher started"
        );

        let registry = Arc::new(Registry::default());
        let task = tokio::spawn(run_loop(registry.clone(), tx, rx));

        Ok(Self {
            root: projects_root.to_path_buf(),
            registry,
            _watcher: watcher,
            task,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Restrict notifications to one project. `None` lets every project through.
    pub fn set_project(&self, project_path: Option<&Path>) {
        *lock(&self.registry.active_project) = project_path.map(encode_project_path);
    }

    pub fn subscribe(&self, session_id: &str, listener: FileListener) {
        self.registry
            .listeners
            .entry(session_id.to_string())
            .or_default()
            .push(listener);
    }

    pub fn subscribe_channel(&self, session_id: &str) -> mpsc::UnboundedReceiver<SessionFileEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribe(session_id, tx);
        rx
    }

    /// Remove one listener; the session entry goes away with its last listener.
    pub fn unsubscribe(&self, session_id: &str, listener: &FileListener) {
        let now_empty = match self.registry.listeners.get_mut(session_id) {
            Some(mut listeners) => {
                listeners.retain(|l| !l.same_channel(listener));
                listeners.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.registry.listeners.remove(session_id);
        }
    }

    /// Replace the wildcard listener that sees every session in the project.
    pub fn watch_project(&self) -> mpsc::UnboundedReceiver<SessionFileEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.registry.project_listener) = Some(tx);
        rx
    }

    pub fn on_delete(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *lock(&self.registry.on_delete) = Some(Arc::new(callback));
    }

    pub fn listener_count(&self, session_id: &str) -> usize {
        self.registry
            .listeners
            .get(session_id)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

impl Drop for SessionFileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_loop(
    registry: Arc<Registry>,
    tx: mpsc::UnboundedSender<WatcherMessage>,
    mut rx: mpsc::UnboundedReceiver<WatcherMessage>,
) {
    let mut pending: HashMap<PathBuf, JoinHandle<()>> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            WatcherMessage::Fs(event) => {
                for (path, change) in classify(&event) {
                    match change {
                        Change::Modified => {
                            if let Some(handle) = pending.remove(&path) {
                                handle.abort();
                            }
                            let tx = tx.clone();
                            let fire_path = path.clone();
                            let handle = tokio::spawn(async move {
                                tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
                                let _ = tx.send(WatcherMessage::Fire(fire_path));
                            });
                            pending.insert(path, handle);
                        }
                        Change::Removed => {
                            if let Some(handle) = pending.remove(&path) {
                                handle.abort();
                            }
                            registry.dispatch(&path, Change::Removed);
                        }
                    }
                }
            }
            WatcherMessage::Fire(path) => {
                pending.remove(&path);
                if path.exists() {
                    registry.dispatch(&path, Change::Modified);
                }
            }
        }
    }
}

fn classify(event: &Event) -> Vec<(PathBuf, Change)> {
    let mut out = Vec::new();
    match &event.kind {
        EventKind::Create(_) => {
            out.extend(event.paths.iter().map(|p| (p.clone(), Change::Modified)));
        }
        EventKind::Remove(_) => {
            out.extend(event.paths.iter().map(|p| (p.clone(), Change::Removed)));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            out.extend(event.paths.iter().map(|p| (p.clone(), Change::Removed)));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            out.extend(event.paths.iter().map(|p| (p.clone(), Change::Modified)));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                out.push((from.clone(), Change::Removed));
                out.push((to.clone(), Change::Modified));
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // Backends that cannot tell the direction of a rename.
            out.extend(event.paths.iter().map(|p| {
                let change = if p.exists() {
                    Change::Modified
                } else {
                    Change::Removed
                };
                (p.clone(), change)
            }));
        }
        EventKind::Modify(_) | EventKind::Any => {
            out.extend(event.paths.iter().map(|p| (p.clone(), Change::Modified)));
        }
        EventKind::Access(_) | EventKind::Other => {}
    }
    out.retain(|(path, _)| is_session_file(path));
    out
}
