//! Durable per-session message log.
//!
//! The orchestrator keeps transcripts in memory; the [`MessageLog`] is the
//! durable copy that outlives the process. [`SqliteMessageLog`] stores one
//! summary row per session plus one row per message. Counts and
//! last-message times are computed from the rows themselves, so concurrent
//! appends cannot lose writes or skew the count, and reopening the same
//! database file restores every session.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::models::message::{ContentBlock, Message, MessageRole};
use crate::models::session::SessionMode;
use crate::{AppError, Result};

use super::db::Database;

/// Boxed future returned by message-log operations.
pub type LogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Per-session summary derived from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    /// Session identifier.
    pub session_id: String,
    /// Owning entity.
    pub entity_id: String,
    /// Owning project.
    pub project_id: String,
    /// Mode at initialisation.
    pub mode: SessionMode,
    /// Model at initialisation.
    pub model: String,
    /// Number of stored messages.
    pub message_count: u64,
    /// Time of the newest stored message.
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Durable message-log contract.
pub trait MessageLog: Send + Sync {
    /// Register a session. Re-initialising keeps existing messages.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    fn initialize(
        &self,
        session_id: &str,
        entity_id: &str,
        project_id: &str,
        mode: SessionMode,
        model: &str,
    ) -> LogFuture<'_, ()>;

    /// Append one message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session was never initialised,
    /// or `AppError::Db` if the write fails.
    fn append(&self, session_id: &str, message: &Message) -> LogFuture<'_, ()>;

    /// All messages for a session in append order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is corrupt.
    fn get_messages(&self, session_id: &str) -> LogFuture<'_, Vec<Message>>;

    /// Summary for one session, `None` if never initialised.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is corrupt.
    fn get_summary(&self, session_id: &str) -> LogFuture<'_, Option<LogSummary>>;

    /// Summaries for a project, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or a row is corrupt.
    fn list_sessions(&self, project_id: &str) -> LogFuture<'_, Vec<LogSummary>>;
}

/// `SQLite`-backed [`MessageLog`].
#[derive(Clone)]
pub struct SqliteMessageLog {
    db: Arc<Database>,
}

impl SqliteMessageLog {
    /// Create a log over an existing pool.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

/// Internal row struct for message deserialization.
#[derive(sqlx::FromRow)]
struct MessageRow {
    role: String,
    content: String,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let role = parse_role(&self.role)?;
        let content: Vec<ContentBlock> = serde_json::from_str(&self.content)?;
        Ok(Message {
            role,
            created_at: parse_timestamp(&self.created_at)?,
            content,
        })
    }
}

/// Internal row struct for summary deserialization.
#[derive(sqlx::FromRow)]
struct SummaryRow {
    session_id: String,
    entity_id: String,
    project_id: String,
    mode: String,
    model: String,
    message_count: i64,
    last_message_at: Option<String>,
}

impl SummaryRow {
    fn into_summary(self) -> Result<LogSummary> {
        let mode = SessionMode::parse(&self.mode)
            .ok_or_else(|| AppError::Db(format!("invalid session mode: {}", self.mode)))?;
        let last_message_at = self
            .last_message_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        Ok(LogSummary {
            session_id: self.session_id,
            entity_id: self.entity_id,
            project_id: self.project_id,
            mode,
            model: self.model,
            message_count: u64::try_from(self.message_count).unwrap_or_default(),
            last_message_at,
        })
    }
}

const SUMMARY_SELECT: &str = "
SELECT s.session_id, s.entity_id, s.project_id, s.mode, s.model,
       COUNT(m.id) AS message_count,
       MAX(m.created_at) AS last_message_at
FROM session_log s
LEFT JOIN log_message m ON m.session_id = s.session_id";

impl MessageLog for SqliteMessageLog {
    fn initialize(
        &self,
        session_id: &str,
        entity_id: &str,
        project_id: &str,
        mode: SessionMode,
        model: &str,
    ) -> LogFuture<'_, ()> {
        let session_id = session_id.to_owned();
        let entity_id = entity_id.to_owned();
        let project_id = project_id.to_owned();
        let model = model.to_owned();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO session_log (session_id, entity_id, project_id, mode, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(session_id) DO UPDATE SET mode = excluded.mode, model = excluded.model",
            )
            .bind(&session_id)
            .bind(&entity_id)
            .bind(&project_id)
            .bind(mode.as_str())
            .bind(&model)
            .bind(format_timestamp(Utc::now()))
            .execute(self.db.as_ref())
            .await?;
            Ok(())
        })
    }

    fn append(&self, session_id: &str, message: &Message) -> LogFuture<'_, ()> {
        let session_id = session_id.to_owned();
        let message = message.clone();
        Box::pin(async move {
            let known: Option<(String,)> =
                sqlx::query_as("SELECT session_id FROM session_log WHERE session_id = ?1")
                    .bind(&session_id)
                    .fetch_optional(self.db.as_ref())
                    .await?;
            if known.is_none() {
                return Err(AppError::NotFound(format!(
                    "message log not initialized for session '{session_id}'"
                )));
            }

            let content = serde_json::to_string(&message.content)?;
            sqlx::query(
                "INSERT INTO log_message (session_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&session_id)
            .bind(role_str(message.role))
            .bind(&content)
            .bind(format_timestamp(message.created_at))
            .execute(self.db.as_ref())
            .await?;
            Ok(())
        })
    }

    fn get_messages(&self, session_id: &str) -> LogFuture<'_, Vec<Message>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            let rows: Vec<MessageRow> = sqlx::query_as(
                "SELECT role, content, created_at FROM log_message
                 WHERE session_id = ?1 ORDER BY id ASC",
            )
            .bind(&session_id)
            .fetch_all(self.db.as_ref())
            .await?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    fn get_summary(&self, session_id: &str) -> LogFuture<'_, Option<LogSummary>> {
        let session_id = session_id.to_owned();
        Box::pin(async move {
            let sql = format!("{SUMMARY_SELECT} WHERE s.session_id = ?1 GROUP BY s.session_id");
            let row: Option<SummaryRow> = sqlx::query_as(&sql)
                .bind(&session_id)
                .fetch_optional(self.db.as_ref())
                .await?;
            row.map(SummaryRow::into_summary).transpose()
        })
    }

    fn list_sessions(&self, project_id: &str) -> LogFuture<'_, Vec<LogSummary>> {
        let project_id = project_id.to_owned();
        Box::pin(async move {
            let sql = format!(
                "{SUMMARY_SELECT} WHERE s.project_id = ?1 GROUP BY s.session_id
                 ORDER BY COALESCE(MAX(m.created_at), s.created_at) DESC"
            );
            let rows: Vec<SummaryRow> = sqlx::query_as(&sql)
                .bind(&project_id)
                .fetch_all(self.db.as_ref())
                .await?;
            rows.into_iter().map(SummaryRow::into_summary).collect()
        })
    }
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn parse_role(raw: &str) -> Result<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        other => Err(AppError::Db(format!("invalid message role: {other}"))),
    }
}

/// Fixed-width UTC timestamps so lexical order matches time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid timestamp: {e}")))
}
