//! Terminal rendering for events, metrics, and listings.

use claudeport_protocol::{
    ContentBlock, EventKind, ProjectInfo, SessionMetrics, SessionSummary, StreamEvent,
};
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, ContentArrangement, Table};
use console::style;

const TOOL_RESULT_PREVIEW_CHARS: usize = 200;

/// Lines to print for one visible event.
pub fn render_event(event: &StreamEvent) -> Vec<String> {
    if event.kind == EventKind::Error {
        let (error_type, message) = event
            .error
            .as_ref()
            .map(|e| (e.error_type.as_str(), e.message.as_str()))
            .unwrap_or(("ERROR", ""));
        return vec![format!("{} {message}", style(format!("[{error_type}]")).red().bold())];
    }

    let Some(message) = &event.message else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    for block in &message.content {
        match block {
            ContentBlock::Text { text } if event.kind == EventKind::User => {
                lines.push(format!("{} {text}", style(">").cyan().bold()));
            }
            ContentBlock::Text { text } => lines.push(text.clone()),
            ContentBlock::ToolUse { name, input, .. } => {
                lines.push(format!(
                    "{} {}",
                    style(format!("[tool] {name}")).yellow(),
                    style(tool_summary(input)).dim()
                ));
            }
            ContentBlock::ToolResult {
                content, is_error, ..
            } => {
                let preview = truncate(content, TOOL_RESULT_PREVIEW_CHARS);
                if *is_error {
                    lines.push(format!("{} {preview}", style("[tool error]").red()));
                } else {
                    lines.push(format!("{}", style(format!("  {preview}")).dim()));
                }
            }
        }
    }
    lines
}

/// The most telling field of a tool input, or nothing.
fn tool_summary(input: &serde_json::Value) -> String {
    ["command", "file_path", "path", "pattern", "url"]
        .iter()
        .find_map(|key| input.get(key).and_then(|v| v.as_str()))
        .map(|v| truncate(v, 80))
        .unwrap_or_default()
}

fn truncate(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= max_chars && !text.contains('\n') {
        return first_line.to_string();
    }
    let cut: String = first_line.chars().take(max_chars).collect();
    format!("{cut}...")
}

pub fn metrics_table(metrics: &SessionMetrics) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Metric", "Value"]);
    let rows: [(&str, String); 13] = [
        ("Tokens in", metrics.tokens_in.to_string()),
        ("Tokens out", metrics.tokens_out.to_string()),
        ("Cache write tokens", metrics.cache_creation_tokens.to_string()),
        ("Cache read tokens", metrics.cache_read_tokens.to_string()),
        ("Tools executed", metrics.tools_executed.to_string()),
        ("Tools failed", metrics.tools_failed.to_string()),
        ("Files created", metrics.files_created.to_string()),
        ("Files modified", metrics.files_modified.to_string()),
        ("Files deleted", metrics.files_deleted.to_string()),
        ("Code blocks", metrics.code_blocks_generated.to_string()),
        ("Errors", metrics.errors_encountered.to_string()),
        ("Prompts sent", metrics.prompts_sent.to_string()),
        ("Resumed", metrics.was_resumed.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    table
}

pub fn sessions_table(sessions: &[SessionSummary]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Session", "Modified", "Messages", "Size", "Preview"]);
    for session in sessions {
        table.add_row(vec![
            Cell::new(&session.session_id),
            Cell::new(session.modified_at.as_deref().unwrap_or("-")),
            Cell::new(session.message_count),
            Cell::new(format_size(session.size_bytes)),
            Cell::new(session.preview.as_deref().unwrap_or("")),
        ]);
    }
    table
}

pub fn projects_table(projects: &[ProjectInfo]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Project", "Sessions", "Last active", "Directory"]);
    for project in projects {
        table.add_row(vec![
            Cell::new(&project.project_path),
            Cell::new(project.session_count),
            Cell::new(project.last_modified.as_deref().unwrap_or("-")),
            Cell::new(&project.dir_name),
        ]);
    }
    table
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
