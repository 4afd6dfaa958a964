//! Execution backend abstraction.
//!
//! The [`ExecutionBackend`] trait decouples the orchestration core from the
//! environment that actually runs the agent (a local process, a container,
//! or a managed cloud session pool). Every backend translates its native
//! streaming shape into the uniform [`BackendEvent`] vocabulary; the core
//! never sees backend-specific types.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use futures_util::stream::BoxStream;

use crate::models::clone_state::CloneContainerState;
use crate::models::message::{ContentBlock, MessageRole};
use crate::models::session::SessionMode;
use crate::Result;

/// Boxed future returned by backend capabilities.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Ordered, finite stream of events produced by one start/send call.
pub type EventStream = BoxStream<'static, Result<BackendEvent>>;

/// Error code a backend reports when it no longer knows the session.
pub const SESSION_NOT_FOUND: &str = "session_not_found";

/// Events emitted by backend implementations while a call is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Backend acknowledged the session.
    SessionStarted {
        /// Backend session identifier.
        session_id: String,
        /// Resumable conversation handle, when known at start.
        conversation_id: Option<String>,
    },
    /// A transcript message (possibly containing tool blocks).
    Message {
        /// Message author.
        role: MessageRole,
        /// Content blocks.
        content: Vec<ContentBlock>,
    },
    /// The turn completed; always the last event of a stream.
    Result {
        /// Resumable conversation handle for the next turn.
        conversation_id: Option<String>,
        /// Wall-clock duration of the turn.
        duration_ms: u64,
        /// Cost of the turn in USD, when reported.
        cost_usd: Option<f64>,
    },
    /// Backend-reported error.
    Error {
        /// Machine-readable code (e.g. [`SESSION_NOT_FOUND`]).
        code: String,
        /// Human-readable description.
        message: String,
        /// Whether the stream may continue.
        recoverable: bool,
    },
    /// Explicit question-pending control payload (JSON body).
    QuestionPending {
        /// Raw JSON payload.
        payload: String,
    },
    /// Explicit plan-pending control payload (JSON body).
    PlanPending {
        /// Raw JSON payload.
        payload: String,
    },
}

/// Parameters for starting a backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSessionRequest {
    /// Agent working directory.
    pub working_directory: String,
    /// Execution mode.
    pub mode: SessionMode,
    /// Model identifier.
    pub model: String,
    /// First user message.
    pub prompt: String,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// Conversation to resume; `None` starts fresh.
    pub resume_id: Option<String>,
    /// Backend permission mode.
    pub permission_mode: Option<String>,
    /// Owning issue/entity.
    pub issue_id: Option<String>,
    /// Owning project.
    pub project_id: Option<String>,
    /// Human-readable project name.
    pub project_name: Option<String>,
}

/// Parameters for sending a follow-up message to a linked backend session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageRequest {
    /// Backend session identifier.
    pub backend_session_id: String,
    /// Message text.
    pub message: String,
    /// Model override.
    pub model: Option<String>,
    /// Permission mode override.
    pub permission_mode: Option<String>,
}

/// Capability interface every execution environment implements.
pub trait ExecutionBackend: Send + Sync {
    /// Start a backend session and stream its first turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if the
    /// backend refuses to start.
    fn start_session(&self, request: StartSessionRequest) -> BackendFuture<'_, EventStream>;

    /// Send a message to a linked backend session and stream the turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if the
    /// backend refuses the message.
    fn send_message(&self, request: SendMessageRequest) -> BackendFuture<'_, EventStream>;

    /// Interrupt the current turn. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on transport failure.
    fn interrupt_session(&self, backend_session_id: &str) -> BackendFuture<'_, ()>;

    /// Stop the backend session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on transport failure.
    fn stop_session(&self, backend_session_id: &str) -> BackendFuture<'_, ()>;

    /// Resolve a pending question natively. Answers are keyed by question text.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on transport failure.
    fn answer_question(
        &self,
        backend_session_id: &str,
        answers: HashMap<String, String>,
    ) -> BackendFuture<'_, bool>;

    /// Accept or reject a pending plan natively.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on transport failure.
    fn approve_plan(
        &self,
        backend_session_id: &str,
        approved: bool,
        keep_context: bool,
        feedback: Option<String>,
    ) -> BackendFuture<'_, bool>;

    /// Read a file out of the running agent's environment.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if the file
    /// cannot be read.
    fn read_file_from_agent(&self, backend_session_id: &str, path: &str)
        -> BackendFuture<'_, String>;

    /// Report the reusable container bound to a working directory, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on transport failure.
    fn get_clone_container_state(
        &self,
        working_directory: &str,
    ) -> BackendFuture<'_, Option<CloneContainerState>>;

    /// Terminate the container bound to a working directory.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on transport failure.
    fn terminate_clone_session(&self, working_directory: &str) -> BackendFuture<'_, ()>;

    /// Remove containers no longer bound to any session; returns how many.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) on transport failure.
    fn cleanup_orphaned_containers(&self) -> BackendFuture<'_, usize>;
}
