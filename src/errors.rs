//! Error types shared across the orchestrator.

use std::fmt::{Display, Formatter};

/// Shared orchestrator result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Orchestrator error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Message-log persistence failure when interacting with `SQLite`.
    Db(String),
    /// Execution backend rejected a call or reported an unrecoverable error.
    Backend(String),
    /// Requested session does not exist.
    NotFound(String),
    /// Operation is not valid in the session's current state.
    Precondition(String),
    /// Another call is still draining an event stream for the session.
    SessionBusy(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            Self::SessionBusy(msg) => write!(f, "session busy: {msg}"),
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

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("invalid json: {err}"))
    }
}
