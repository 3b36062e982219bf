//! claudeport
//!
//! Drive Claude CLI sessions from the terminal: run prompts, browse and
//! replay the agent's on-disk session logs, and follow external changes.

mod cmd_prompt;
mod cmd_sessions;
mod cmd_show;
mod cmd_watch;
mod logging;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use claudeport_engine::{paths, EngineConfig};
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "claudeport", version, about = "Drive Claude CLI sessions from the terminal")]
struct Cli {
    /// Config file (default: <data-dir>/config.toml)
    #[arg(long, global = true, env = "CLAUDEPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (default: ~/.claudeport)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one prompt and stream the reply
    Prompt {
        text: String,
        #[arg(long)]
        model: Option<String>,
        /// Resume this session before sending
        #[arg(long)]
        resume: Option<String>,
        /// Project directory (default: current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// List recent sessions for a project
    Sessions {
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List every project with session logs
    Projects,
    /// Print a session's history and its metrics
    Show {
        session_id: String,
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Print session log changes for a project until Ctrl-C
    Watch {
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions { shell: clap_complete::Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "claudeport",
            &mut std::io::stdout(),
        );
        return Ok(ExitCode::SUCCESS);
    }

    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref());
    paths::ensure_dirs(&data_dir)?;
    let log_handle = logging::init_logging(&data_dir)?;
    let config = EngineConfig::load(cli.config.as_deref(), &data_dir)?;

    info!(
        component = "cli",
        event = "cli.start",
        version = VERSION,
        run_id = %log_handle.run_id,
        data_dir = %data_dir.display(),
        "claudeport starting"
    );

    let ok = match cli.command {
        Command::Prompt {
            text,
            model,
            resume,
            cwd,
        } => {
            let project = project_path(cwd.as_deref())?;
            cmd_prompt::run(config, &data_dir, project, text, model, resume).await?
        }
        Command::Sessions { cwd, limit } => {
            let project = project_path(cwd.as_deref())?;
            cmd_sessions::run_sessions(&config, &project, limit)?;
            true
        }
        Command::Projects => {
            cmd_sessions::run_projects(&config)?;
            true
        }
        Command::Show { session_id, cwd } => {
            let project = project_path(cwd.as_deref())?;
            cmd_show::run(&config, &project, &session_id)?
        }
        Command::Watch { cwd } => {
            let project = project_path(cwd.as_deref())?;
            cmd_watch::run(&config, &project).await?;
            true
        }
        Command::Completions { .. } => true,
    };

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `--cwd` or the current directory, canonicalized when possible.
fn project_path(cwd: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = match cwd {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir()?,
    };
    Ok(std::fs::canonicalize(&path).unwrap_or(path))
}
