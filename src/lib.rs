#![forbid(unsafe_code)]

//! Session orchestration engine for AI coding-agent sessions.

pub mod backend;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod persistence;

pub use config::OrchestratorConfig;
pub use errors::{AppError, Result};
