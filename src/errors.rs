//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Element storage failure (create/read/update).
    Storage(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// An agent already has a non-terminated session.
    SessionExists(String),
    /// No prior session is available to resume.
    NoResumableSession(String),
    /// Candidate ranking produced no eligible agent.
    NoEligibleAgents(String),
    /// Agent process spawning or control failure.
    Spawn(String),
    /// Worktree creation, removal, or inspection failure.
    Worktree(String),
    /// Notification channel failure.
    Notify(String),
    /// Steward registration or execution failure.
    Scheduler(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Storage(msg) => write!(f, "storage: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::SessionExists(msg) => write!(f, "session exists: {msg}"),
            Self::NoResumableSession(msg) => write!(f, "no resumable session: {msg}"),
            Self::NoEligibleAgents(msg) => write!(f, "no eligible agents: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Worktree(msg) => write!(f, "worktree: {msg}"),
            Self::Notify(msg) => write!(f, "notify: {msg}"),
            Self::Scheduler(msg) => write!(f, "scheduler: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
