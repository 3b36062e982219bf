//! Path resolution for claudeport data files and the agent's session logs.
//!
//! Data dir priority: CLI `--data-dir` > `CLAUDEPORT_DATA_DIR` env > `~/.claudeport`.
//! Session logs live under `~/.claude/projects/<encoded-project-path>/<session>.jsonl`.

use std::io;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "CLAUDEPORT_DATA_DIR";

/// Resolve the data directory without touching the filesystem.
pub fn resolve_data_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_data_dir_with(explicit, std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
}

fn resolve_data_dir_with(explicit: Option<&Path>, from_env: Option<PathBuf>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Some(p) = from_env.filter(|p| !p.as_os_str().is_empty()) {
        return p;
    }
    home_or_cwd().join(".claudeport")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

pub fn resume_store_path(data_dir: &Path) -> PathBuf {
    data_dir.join("last-sessions.json")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs(data_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(log_dir(data_dir))?;
    Ok(())
}

/// `~/.claude/projects`, where the agent writes its session logs.
pub fn default_projects_root() -> PathBuf {
    home_or_cwd().join(".claude").join("projects")
}

fn home_or_cwd() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Directory name the agent uses for a project: every `/` and `.` becomes `-`.
///
/// Lossy: `/a/b-c` and `/a/b/c` encode identically. Project matching always
/// compares forward encodings for this reason.
pub fn encode_project_path(project_path: &Path) -> String {
    let raw = project_path.to_string_lossy();
    let trimmed = match raw.trim_end_matches('/') {
        "" => raw.as_ref(),
        t => t,
    };
    trimmed.replace(['/', '.'], "-")
}

/// Best-effort reverse of [`encode_project_path`] for display only.
///
/// Every `-` is read back as `/`, so paths that contained `-` or `.` come back wrong.
pub fn decode_project_dir(dir_name: &str) -> String {
    dir_name.replace('-', "/")
}

pub fn project_dir(projects_root: &Path, project_path: &Path) -> PathBuf {
    projects_root.join(encode_project_path(project_path))
}

pub fn session_file_path(projects_root: &Path, project_path: &Path, session_id: &str) -> PathBuf {
    project_dir(projects_root, project_path).join(format!("{session_id}.jsonl"))
}

pub fn is_session_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("jsonl")
}

/// Session id and encoded project dir name for a `<root>/<dir>/<id>.jsonl` path.
pub fn session_file_parts(path: &Path) -> Option<(String, String)> {
    if !is_session_file(path) {
        return None;
    }
    let session_id = path.file_stem()?.to_str()?.to_string();
    let dir_name = path.parent()?.file_name()?.to_str()?.to_string();
    Some((session_id, dir_name))
}
