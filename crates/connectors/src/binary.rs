//! Locating the `claude` executable and building its environment.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub const AGENT_COMMAND: &str = "claude";

/// Resolve the agent binary.
///
/// 1. explicit path (config)
/// 2. `CLAUDE_BIN` env var
/// 3. `PATH`
/// 4. conventional install locations and the extra bin dirs
/// 5. the bare command name
///
/// Never fails: a missing binary surfaces as a spawn error, which is the
/// authoritative check.
pub fn resolve_agent_binary(explicit: Option<&Path>, extra_bin_dirs: &[PathBuf]) -> PathBuf {
    if let Some(path) = explicit {
        if path.exists() {
            return path.to_path_buf();
        }
        warn!(
            component = "binary",
            event = "binary.explicit_not_found",
            path = %path.display(),
            "Configured agent binary does not exist, trying fallbacks"
        );
    }

    if let Some(path) = std::env::var_os("CLAUDE_BIN").map(PathBuf::from) {
        if path.exists() {
            return path;
        }
        warn!(
            component = "binary",
            event = "binary.env_not_found",
            path = %path.display(),
            "CLAUDE_BIN path does not exist, trying fallbacks"
        );
    }

    if let Some(path) = search_path(AGENT_COMMAND, std::env::var_os("PATH")) {
        return path;
    }

    if let Some(path) = conventional_locations(extra_bin_dirs)
        .into_iter()
        .find(|candidate| is_executable(candidate))
    {
        return path;
    }

    debug!(
        component = "binary",
        event = "binary.fallback_bare_name",
        "Agent binary not found, falling back to bare command name"
    );
    PathBuf::from(AGENT_COMMAND)
}

fn search_path(command: &str, path_var: Option<OsString>) -> Option<PathBuf> {
    let path_var = path_var?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

fn conventional_locations(extra_bin_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".claude/local").join(AGENT_COMMAND));
        candidates.push(home.join(".local/bin").join(AGENT_COMMAND));
        candidates.push(home.join(".npm-global/bin").join(AGENT_COMMAND));
    }
    candidates.push(PathBuf::from("/usr/local/bin").join(AGENT_COMMAND));
    candidates.push(PathBuf::from("/opt/homebrew/bin").join(AGENT_COMMAND));
    candidates.extend(extra_bin_dirs.iter().map(|dir| dir.join(AGENT_COMMAND)));
    candidates
}

/// `PATH` with `extra_bin_dirs` prepended, in order.
pub fn extended_path(extra_bin_dirs: &[PathBuf], current: Option<OsString>) -> Option<OsString> {
    if extra_bin_dirs.is_empty() {
        return current;
    }
    let mut dirs: Vec<PathBuf> = extra_bin_dirs.to_vec();
    if let Some(current) = current.as_ref() {
        dirs.extend(std::env::split_paths(current));
    }
    match std::env::join_paths(dirs) {
        Ok(joined) => Some(joined),
        Err(err) => {
            warn!(
                component = "binary",
                event = "binary.path_join_failed",
                error = %err,
                "Extra bin dir contains a path separator, leaving PATH unchanged"
            );
            current
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn explicit_existing_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("my-claude");
        std::fs::write(&bin, "").unwrap();
        assert_eq!(resolve_agent_binary(Some(&bin), &[]), bin);
    }

    #[cfg(unix)]
    #[test]
    fn search_path_finds_executables_only() {
        let dir = tempfile::tempdir().unwrap();
        let exe = make_executable(dir.path(), "claude");
        let other = tempfile::tempdir().unwrap();
        std::fs::write(other.path().join("claude"), "not executable").unwrap();

        let path_var = std::env::join_paths([other.path(), dir.path()]).unwrap();
        assert_eq!(search_path("claude", Some(path_var)), Some(exe));
        assert_eq!(search_path("claude", None), None);
    }

    #[test]
    fn extended_path_prepends_in_order() {
        let extra = vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")];
        let joined = extended_path(&extra, Some(OsString::from("/usr/bin"))).unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(
            parts,
            vec![
                PathBuf::from("/opt/a"),
                PathBuf::from("/opt/b"),
                PathBuf::from("/usr/bin")
            ]
        );
    }

    #[test]
    fn extended_path_without_extras_is_unchanged() {
        let current = Some(OsString::from("/usr/bin:/bin"));
        assert_eq!(extended_path(&[], current.clone()), current);
    }

    #[test]
    fn conventional_locations_include_extra_dirs() {
        let extra = vec![PathBuf::from("/custom/bin")];
        let candidates = conventional_locations(&extra);
        assert!(candidates.contains(&PathBuf::from("/custom/bin/claude")));
        assert!(candidates.contains(&PathBuf::from("/usr/local/bin/claude")));
    }
}
