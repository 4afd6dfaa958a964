//! Orchestrator configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::models::session::SessionMode;
use crate::{AppError, Result};

fn default_model() -> String {
    "sonnet".into()
}

fn default_build_permission_mode() -> String {
    "bypassPermissions".into()
}

fn default_plan_permission_mode() -> String {
    "plan".into()
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_rejection_message() -> String {
    "I don't approve this plan. Please revise it.".into()
}

/// Orchestrator configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// `SQLite` database file backing the message log.
    pub db_path: PathBuf,
    /// Model used when a start request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Backend permission mode for sessions in `Build` mode.
    #[serde(default = "default_build_permission_mode")]
    pub build_permission_mode: String,
    /// Backend permission mode for sessions in `Plan` mode.
    #[serde(default = "default_plan_permission_mode")]
    pub plan_permission_mode: String,
    /// Capacity of the status broadcast channel.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Message sent when a plan is rejected without feedback and no
    /// backend session exists to resolve the rejection natively.
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("homespun.db"),
            default_model: default_model(),
            build_permission_mode: default_build_permission_mode(),
            plan_permission_mode: default_plan_permission_mode(),
            broadcast_capacity: default_broadcast_capacity(),
            rejection_message: default_rejection_message(),
        }
    }
}

impl OrchestratorConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Backend permission mode matching a session mode.
    #[must_use]
    pub fn permission_mode_for(&self, mode: SessionMode) -> &str {
        match mode {
            SessionMode::Plan => &self.plan_permission_mode,
            SessionMode::Build => &self.build_permission_mode,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.broadcast_capacity == 0 {
            return Err(AppError::Config(
                "broadcast_capacity must be greater than zero".into(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(AppError::Config("default_model must not be empty".into()));
        }

        if self.db_path.as_os_str().is_empty() {
            return Err(AppError::Config("db_path must not be empty".into()));
        }

        Ok(())
    }
}
