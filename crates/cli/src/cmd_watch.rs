//! `claudeport watch`: follow a project's session logs.

use std::path::Path;

use claudeport_engine::{EngineConfig, SessionFileEvent, SessionFileWatcher};
use console::style;
use tracing::info;

pub async fn run(config: &EngineConfig, project_path: &Path) -> anyhow::Result<()> {
    let watcher = SessionFileWatcher::start(&config.projects_root())?;
    watcher.set_project(Some(project_path));
    let mut events = watcher.watch_project();

    println!(
        "  Watching sessions for {} (Ctrl-C to stop)",
        project_path.display()
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionFileEvent::Changed { session_id, path }) => {
                    println!("{} {session_id}  {}", style("changed").green(), path.display());
                }
                Some(SessionFileEvent::Deleted { session_id, path }) => {
                    println!("{} {session_id}  {}", style("deleted").red(), path.display());
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!(
        component = "cli",
        event = "cli.watch_stopped",
        project_path = %project_path.display(),
        "Stopped watching"
    );
    Ok(())
}
