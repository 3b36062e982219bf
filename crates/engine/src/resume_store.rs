//! Last session id per project, so a restart can resume where it left off.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub trait ResumeStore: Send + Sync {
    fn load(&self, project_path: &Path) -> Option<String>;
    fn save(&self, project_path: &Path, session_id: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PersistedSessions {
    version: u32,
    sessions: BTreeMap<String, String>,
}

/// JSON file store. Writes go through a temp file and a rename.
#[derive(Debug)]
pub struct FileResumeStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> PersistedSessions {
        let Ok(data) = fs::read(&self.path) else {
            return PersistedSessions::default();
        };
        match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    component = "resume_store",
                    event = "resume_store.corrupt",
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable resume store"
                );
                PersistedSessions::default()
            }
        }
    }

    fn write(&self, state: &PersistedSessions) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)
    }
}

impl ResumeStore for FileResumeStore {
    fn load(&self, project_path: &Path) -> Option<String> {
        self.read()
            .sessions
            .get(project_path.to_string_lossy().as_ref())
            .cloned()
    }

    fn save(&self, project_path: &Path, session_id: &str) -> io::Result<()> {
        // Serializes read-modify-write between engines sharing a store.
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut state = self.read();
        state.version = 1;
        state.sessions.insert(
            project_path.to_string_lossy().into_owned(),
            session_id.to_string(),
        );
        self.write(&state)
    }
}

#[derive(Debug, Default)]
pub struct MemoryResumeStore {
    sessions: Mutex<BTreeMap<PathBuf, String>>,
}

impl ResumeStore for MemoryResumeStore {
    fn load(&self, project_path: &Path) -> Option<String> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(project_path)
            .cloned()
    }

    fn save(&self, project_path: &Path, session_id: &str) -> io::Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(project_path.to_path_buf(), session_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_per_project() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResumeStore::new(dir.path().join("nested/last-sessions.json"));
        assert_eq!(store.load(Path::new("/a")), None);

        store.save(Path::new("/a"), "s1").unwrap();
        store.save(Path::new("/b"), "s2").unwrap();
        store.save(Path::new("/a"), "s3").unwrap();

        let reopened = FileResumeStore::new(dir.path().join("nested/last-sessions.json"));
        assert_eq!(reopened.load(Path::new("/a")).as_deref(), Some("s3"));
        assert_eq!(reopened.load(Path::new("/b")).as_deref(), Some("s2"));
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last-sessions.json");
        fs::write(&path, "{not json").unwrap();
        let store = FileResumeStore::new(&path);
        assert_eq!(store.load(Path::new("/a")), None);
        store.save(Path::new("/a"), "s1").unwrap();
        assert_eq!(store.load(Path::new("/a")).as_deref(), Some("s1"));
    }

    #[test]
    fn memory_store() {
        let store = MemoryResumeStore::default();
        store.save(Path::new("/p"), "x").unwrap();
        assert_eq!(store.load(Path::new("/p")).as_deref(), Some("x"));
        assert_eq!(store.load(Path::new("/q")), None);
    }
}
