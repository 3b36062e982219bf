//! `claudeport show`: print a stored session and its replayed metrics.

use std::path::Path;

use claudeport_engine::{replay_metrics, EngineConfig, HistoryStore};

use crate::output;

/// Returns false when the session has no visible history.
pub fn run(config: &EngineConfig, project_path: &Path, session_id: &str) -> anyhow::Result<bool> {
    let store = HistoryStore::new(config.projects_root());
    let events = store.load_session(project_path, session_id)?;
    if events.is_empty() {
        println!(
            "  No history for session {session_id} at {}",
            store.session_path(project_path, session_id).display()
        );
        return Ok(false);
    }

    for event in &events {
        for line in output::render_event(event) {
            println!("{line}");
        }
    }
    println!();
    println!("{}", output::metrics_table(&replay_metrics(&events)));
    Ok(true)
}
