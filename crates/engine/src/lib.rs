//! claudeport engine
//!
//! Owns one agent session per project: prompt queueing, cancellation,
//! resumption from the agent's on-disk logs, and reconciliation with
//! changes other clients append to those logs.

pub mod config;
pub mod filter;
pub mod history;
pub mod paths;
pub mod resume_store;
pub mod session_actor;
pub mod session_command;
pub mod transition;
pub mod watcher;

pub use config::{ConfigError, EngineConfig, HooksConfig};
pub use history::{HistoryError, HistoryStore};
pub use resume_store::{FileResumeStore, MemoryResumeStore, ResumeStore};
pub use session_actor::{EngineOptions, SessionEngine};
pub use transition::{replay_metrics, EngineState};
pub use watcher::{FileListener, SessionFileEvent, SessionFileWatcher};
