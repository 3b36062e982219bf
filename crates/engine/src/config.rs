//! Engine configuration: `config.toml` plus environment overrides.
//!
//! ```toml
//! binary_path = "/opt/claude/bin/claude"
//! extra_bin_dirs = ["/opt/homebrew/bin"]
//! skip_permissions = true
//! default_model = "sonnet"
//! passthrough_args = ["--max-turns", "20"]
//! auto_resume = true
//!
//! [env]
//! ANTHROPIC_LOG = "error"
//!
//! [hooks]
//! block_on_failure = true
//!
//! [[hooks.pre_tool_use]]
//! matcher = "Bash"
//! command = "./scripts/guard.sh"
//! timeout_secs = 10
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use claudeport_connectors::HookCommand;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub pre_tool_use: Vec<HookCommand>,
    /// Stop the running request when a guard blocks or times out.
    pub block_on_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub binary_path: Option<PathBuf>,
    pub extra_bin_dirs: Vec<PathBuf>,
    pub skip_permissions: bool,
    /// Pass `-c` when no session is attached yet.
    pub continue_last_session: bool,
    pub passthrough_args: Vec<String>,
    pub default_model: Option<String>,
    pub env: BTreeMap<String, String>,
    pub projects_root: Option<PathBuf>,
    /// Resume the last session for the project when the engine starts.
    pub auto_resume: bool,
    pub hooks: HooksConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary_path: None,
            extra_bin_dirs: Vec::new(),
            skip_permissions: true,
            continue_last_session: false,
            passthrough_args: Vec::new(),
            default_model: None,
            env: BTreeMap::new(),
            projects_root: None,
            auto_resume: false,
            hooks: HooksConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load `explicit`, else `<data-dir>/config.toml`, then apply env overrides.
    ///
    /// A missing file yields defaults. A file that exists but cannot be read
    /// or parsed is an error.
    pub fn load(explicit: Option<&Path>, data_dir: &Path) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .unwrap_or_else(|| paths::config_path(data_dir));
        let mut config = Self::from_file(&path)?.unwrap_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            debug!(
                component = "config",
                event = "config.file_missing",
                path = %path.display(),
                "No config file, using defaults"
            );
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path).map(Some)
    }

    fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment wins over the file. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bin) = lookup("CLAUDE_BIN").filter(|v| !v.is_empty()) {
            self.binary_path = Some(PathBuf::from(bin));
        }
        if let Some(dirs) = lookup("CLAUDEPORT_EXTRA_BIN_DIRS") {
            self.extra_bin_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(raw) = lookup("CLAUDEPORT_SKIP_PERMISSIONS") {
            match parse_bool(&raw) {
                Some(value) => self.skip_permissions = value,
                None => warn!(
                    component = "config",
                    event = "config.invalid_bool",
                    key = "CLAUDEPORT_SKIP_PERMISSIONS",
                    value = %raw,
                    "Ignoring unparseable boolean override"
                ),
            }
        }
        if let Some(model) = lookup("CLAUDEPORT_MODEL") {
            let model = model.trim();
            self.default_model = (!model.is_empty()).then(|| model.to_string());
        }
        if let Some(root) = lookup("CLAUDEPORT_PROJECTS_ROOT").filter(|v| !v.is_empty()) {
            self.projects_root = Some(PathBuf::from(root));
        }
    }

    pub fn projects_root(&self) -> PathBuf {
        self.projects_root
            .clone()
            .unwrap_or_else(paths::default_projects_root)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
