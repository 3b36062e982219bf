//! `claudeport sessions` and `claudeport projects`: list on-disk session logs.

use std::path::Path;

use claudeport_engine::{EngineConfig, HistoryStore};

use crate::output;

pub fn run_sessions(config: &EngineConfig, project_path: &Path, limit: usize) -> anyhow::Result<()> {
    let store = HistoryStore::new(config.projects_root());
    let sessions = store.recent_sessions(project_path, limit)?;
    if sessions.is_empty() {
        println!("  No sessions for {}", project_path.display());
        return Ok(());
    }
    println!("{}", output::sessions_table(&sessions));
    Ok(())
}

pub fn run_projects(config: &EngineConfig) -> anyhow::Result<()> {
    let store = HistoryStore::new(config.projects_root());
    let projects = store.list_projects()?;
    if projects.is_empty() {
        println!("  No projects under {}", store.root().display());
        return Ok(());
    }
    println!("{}", output::projects_table(&projects));
    Ok(())
}
