#![forbid(unsafe_code)]

//! `homespun-orchestrator`: inspection CLI over the durable message log.
//!
//! Opens the configured `SQLite` database and prints session summaries or
//! stored transcripts as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use homespun_orchestrator::config::OrchestratorConfig;
use homespun_orchestrator::persistence::db;
use homespun_orchestrator::persistence::message_log::{MessageLog, SqliteMessageLog};
use homespun_orchestrator::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "homespun-orchestrator",
    about = "Inspect orchestrated agent sessions",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List logged sessions for a project, most recently active first.
    Sessions {
        /// Project identifier.
        #[arg(long)]
        project: String,
    },

    /// Print the stored transcript of a session.
    Messages {
        /// Session identifier.
        session_id: String,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = OrchestratorConfig::load_from_path(&args.config)?;
    info!(db_path = %config.db_path.display(), "configuration loaded");

    // ── Open message log ────────────────────────────────
    let pool = Arc::new(db::connect(&config.db_path).await?);
    let log = SqliteMessageLog::new(pool);

    match args.command {
        Command::Sessions { project } => {
            let summaries = log.list_sessions(&project).await?;
            info!(project_id = %project, count = summaries.len(), "sessions listed");
            for summary in &summaries {
                println!("{}", serde_json::to_string(summary)?);
            }
        }
        Command::Messages { session_id } => {
            if log.get_summary(&session_id).await?.is_none() {
                return Err(AppError::NotFound(format!(
                    "no logged session '{session_id}'"
                )));
            }
            let messages = log.get_messages(&session_id).await?;
            info!(session_id, count = messages.len(), "transcript loaded");
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
    }

    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
