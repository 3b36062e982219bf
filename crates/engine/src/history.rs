//! Read-only access to the agent's on-disk session logs.
//!
//! Layout: `<projects-root>/<encoded-project-path>/<session-id>.jsonl`, one
//! JSON object per line, appended by the agent. Nothing here writes.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use claudeport_connectors::decode_line;
use claudeport_protocol::{EventKind, ProjectInfo, SessionSummary, StreamEvent};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::filter::is_displayable;
use crate::paths;

pub use crate::paths::{decode_project_dir, encode_project_path};

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HistoryError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Stateless reader over a projects root. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: PathBuf,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_path(&self, project_path: &Path, session_id: &str) -> PathBuf {
        paths::session_file_path(&self.root, project_path, session_id)
    }

    /// Every project directory under the root, most recently active first.
    pub fn list_projects(&self) -> Result<Vec<ProjectInfo>, HistoryError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryError::io(&self.root, e)),
        };

        let mut projects: Vec<(Option<SystemTime>, ProjectInfo)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let files = session_files(&path);
            let last_modified = files.iter().filter_map(|f| modified_time(f)).max();
            projects.push((
                last_modified,
                ProjectInfo {
                    dir_name: dir_name.to_string(),
                    project_path: decode_project_dir(dir_name),
                    session_count: files.len(),
                    last_modified: last_modified.map(format_time),
                },
            ));
        }

        projects.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(projects.into_iter().map(|(_, info)| info).collect())
    }

    /// Sessions in one project directory, newest first.
    pub fn list_project_sessions(&self, dir_name: &str) -> Result<Vec<SessionSummary>, HistoryError> {
        let dir = self.root.join(dir_name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut sessions: Vec<(Option<SystemTime>, SessionSummary)> = Vec::new();
        for path in session_files(&dir) {
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    debug!(
                        component = "history",
                        event = "history.metadata_failed",
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable session file"
                    );
                    continue;
                }
            };
            let scan = match scan_session_file(&path) {
                Ok(scan) => scan,
                Err(e) => {
                    warn!(
                        component = "history",
                        event = "history.scan_failed",
                        path = %path.display(),
                        error = %e,
                        "Failed to scan session file"
                    );
                    SessionScan::default()
                }
            };
            let modified = metadata.modified().ok();
            sessions.push((
                modified,
                SessionSummary {
                    session_id: session_id.to_string(),
                    project_dir: dir_name.to_string(),
                    preview: scan.preview,
                    message_count: scan.message_count,
                    modified_at: modified.map(format_time),
                    size_bytes: metadata.len(),
                },
            ));
        }

        sessions.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(sessions.into_iter().map(|(_, summary)| summary).collect())
    }

    /// The `limit` most recently modified sessions for a project path.
    pub fn recent_sessions(
        &self,
        project_path: &Path,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, HistoryError> {
        let mut sessions = self.list_project_sessions(&encode_project_path(project_path))?;
        sessions.truncate(limit);
        Ok(sessions)
    }

    /// Displayable events of a session, in file order.
    ///
    /// A missing file is an empty history, not an error.
    pub fn load_session(
        &self,
        project_path: &Path,
        session_id: &str,
    ) -> Result<Vec<StreamEvent>, HistoryError> {
        load_session_file(&self.session_path(project_path, session_id))
    }
}

pub fn load_session_file(path: &Path) -> Result<Vec<StreamEvent>, HistoryError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(
                component = "history",
                event = "history.session_missing",
                path = %path.display(),
                "Session file does not exist"
            );
            return Ok(Vec::new());
        }
        Err(e) => return Err(HistoryError::io(path, e)),
    };

    let mut events = Vec::new();
    let mut skipped = 0usize;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| HistoryError::io(path, e))?;
        if read == 0 {
            break;
        }
        match decode_line(&String::from_utf8_lossy(&buf)) {
            Ok(event) if is_displayable(&event) => events.push(event),
            Ok(_) => {}
            Err(e) if e.is_expected() => {}
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        // Usually a partial trailing line while the agent is still writing.
        debug!(
            component = "history",
            event = "history.malformed_lines",
            path = %path.display(),
            skipped,
            "Skipped malformed session lines"
        );
    }
    Ok(events)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionScan {
    pub preview: Option<String>,
    pub message_count: usize,
}

/// One streaming pass: counts user/assistant lines and takes the first
/// non-meta user text as the preview. Only the preview line is fully decoded.
pub fn scan_session_file(path: &Path) -> Result<SessionScan, HistoryError> {
    let file = File::open(path).map_err(|e| HistoryError::io(path, e))?;
    scan_lines(BufReader::new(file)).map_err(|e| HistoryError::io(path, e))
}

/// Just the line's `type`; every other field is skipped unparsed.
#[derive(Deserialize)]
struct LineHead {
    #[serde(rename = "type")]
    line_type: Option<String>,
}

fn scan_lines(mut reader: impl BufRead) -> io::Result<SessionScan> {
    let mut scan = SessionScan::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let Ok(head) = serde_json::from_slice::<LineHead>(&buf) else {
            continue;
        };
        let is_user = match head.line_type.as_deref() {
            Some("user") => true,
            Some("assistant") => false,
            _ => continue,
        };
        scan.message_count += 1;

        if scan.preview.is_none() && is_user {
            scan.preview = preview_from(&buf);
        }
    }
    Ok(scan)
}

fn preview_from(line: &[u8]) -> Option<String> {
    let event = decode_line(&String::from_utf8_lossy(line)).ok()?;
    if event.is_meta || event.kind != EventKind::User {
        return None;
    }
    let text = event.text();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(PREVIEW_CHARS).collect())
}

fn session_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && paths::is_session_file(path))
        .collect()
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}
