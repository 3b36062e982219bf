//! `claudeport prompt`: run one prompt through a session engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use claudeport_engine::{paths, EngineConfig, EngineOptions, FileResumeStore, SessionEngine};
use claudeport_protocol::{EventKind, SessionSnapshot};
use console::style;
use tracing::info;

use crate::output;

/// Returns false when the request ended with an error or was interrupted.
pub async fn run(
    config: EngineConfig,
    data_dir: &Path,
    project_path: PathBuf,
    prompt: String,
    model: Option<String>,
    resume: Option<String>,
) -> anyhow::Result<bool> {
    let store = FileResumeStore::new(paths::resume_store_path(data_dir));
    let engine = SessionEngine::spawn(EngineOptions {
        project_path,
        config,
        resume_store: Arc::new(store),
        watcher: None,
    });
    let mut updates = engine.subscribe();

    if let Some(session_id) = resume {
        engine.resume_session(session_id).await;
    }
    engine.send_prompt(prompt.clone(), model).await;

    let mut printer = Printer::new(prompt);
    let interrupted = loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break false;
                }
                let snapshot = updates.borrow_and_update().clone();
                printer.print_new(&snapshot);
                if snapshot.metrics.prompts_sent > 0 && !snapshot.is_loading {
                    break false;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(
                    component = "cli",
                    event = "cli.prompt_interrupted",
                    "Interrupted, stopping request"
                );
                engine.stop_current_request().await;
                break true;
            }
        }
    };

    let snapshot = engine.snapshot();
    engine.shutdown().await;

    println!();
    println!("{}", output::metrics_table(&snapshot.metrics));
    if let Some(session_id) = snapshot.session_id() {
        println!("  Session: {}", style(session_id).bold());
    }
    for error in &snapshot.errors {
        eprintln!(
            "{} {}",
            style(format!("[{}]", error.error_type)).red().bold(),
            error.message
        );
    }

    Ok(!interrupted && snapshot.errors.is_empty())
}

/// Prints messages that follow this run's prompt echo, once each.
struct Printer {
    prompt: String,
    next: Option<usize>,
}

impl Printer {
    fn new(prompt: String) -> Self {
        Self { prompt, next: None }
    }

    fn print_new(&mut self, snapshot: &SessionSnapshot) {
        for line in self.take_new(snapshot) {
            println!("{line}");
        }
    }

    fn take_new(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        if self.next.is_none() {
            // Resumed history precedes the echo and is not reprinted.
            self.next = snapshot
                .messages
                .iter()
                .rposition(|m| m.kind == EventKind::User && m.text() == self.prompt)
                .map(|echo| echo + 1);
        }
        let Some(start) = self.next else {
            return Vec::new();
        };
        let lines = snapshot
            .messages
            .iter()
            .skip(start)
            .flat_map(output::render_event)
            .collect();
        self.next = Some(start.max(snapshot.messages.len()));
        lines
    }
}
