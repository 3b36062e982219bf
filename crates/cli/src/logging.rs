//! File logging for the CLI.
//!
//! Stdout carries command output, so every log line goes to
//! `<data-dir>/logs/claudeport.log`. Settings come from the environment:
//! `CLAUDEPORT_LOG_FILTER` (then `RUST_LOG`), `CLAUDEPORT_LOG_FORMAT`
//! (`json` or `pretty`) and `CLAUDEPORT_RUN_ID`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,notify=warn";
const LOG_FILE: &str = "claudeport.log";

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    /// Directive string that parsed; the same text is logged at startup.
    filter: String,
    format: LogFormat,
    run_id: Option<String>,
}

impl LogSettings {
    fn from_env() -> Self {
        Self::resolve(|key| std::env::var(key).ok())
    }

    fn resolve(var: impl Fn(&str) -> Option<String>) -> Self {
        let filter = ["CLAUDEPORT_LOG_FILTER", "RUST_LOG"]
            .into_iter()
            .filter_map(|key| var(key))
            .find(|value| EnvFilter::try_new(value).is_ok())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = match var("CLAUDEPORT_LOG_FORMAT") {
            Some(value) if value.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
        Self {
            filter,
            format,
            run_id: var("CLAUDEPORT_RUN_ID").filter(|id| !id.is_empty()),
        }
    }
}

fn generated_run_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("pid-{}-{}", std::process::id(), now)
}

pub fn init_logging(data_dir: &Path) -> anyhow::Result<LoggingHandle> {
    let log_dir = claudeport_engine::paths::log_dir(data_dir);
    std::fs::create_dir_all(&log_dir)?;

    let settings = LogSettings::from_env();
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, LOG_FILE));
    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&settings.filter)?);

    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    let run_id = settings.run_id.clone().unwrap_or_else(generated_run_id);
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_dir.join(LOG_FILE).display(),
        format = ?settings.format,
        filter = %settings.filter,
    );

    Ok(LoggingHandle { run_id, guard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(vars: &[(&str, &str)]) -> LogSettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::resolve(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_json_at_info() {
        let settings = resolve(&[]);
        assert_eq!(settings.filter, DEFAULT_FILTER);
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.run_id, None);
    }

    #[test]
    fn own_filter_wins_over_rust_log() {
        let settings = resolve(&[
            ("CLAUDEPORT_LOG_FILTER", "debug"),
            ("RUST_LOG", "warn"),
            ("CLAUDEPORT_LOG_FORMAT", "Pretty"),
            ("CLAUDEPORT_RUN_ID", "run-7"),
        ]);
        assert_eq!(settings.filter, "debug");
        assert_eq!(settings.format, LogFormat::Pretty);
        assert_eq!(settings.run_id.as_deref(), Some("run-7"));
    }

    #[test]
    fn unparsable_filter_falls_through() {
        let settings = resolve(&[("CLAUDEPORT_LOG_FILTER", "claudeport=loud"), ("RUST_LOG", "trace")]);
        assert_eq!(settings.filter, "trace");
        let settings = resolve(&[("CLAUDEPORT_LOG_FILTER", "claudeport=loud")]);
        assert_eq!(settings.filter, DEFAULT_FILTER);
    }
}
