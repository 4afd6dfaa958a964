//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::Message;
use crate::models::question::PendingQuestion;

/// Lifecycle status for an orchestrated session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created; no backend call accepted yet.
    Starting,
    /// A backend call is in flight.
    Running,
    /// Agent finished its turn.
    WaitingForInput,
    /// Agent asked a question and is blocked on the answer.
    WaitingForQuestionAnswer,
    /// Agent produced a plan and is blocked on approval.
    WaitingForPlanExecution,
    /// Session stopped.
    Stopped,
    /// Start failed or the backend reported a fatal error.
    Error,
}

impl SessionStatus {
    /// Whether the status is one of the blocked-on-caller states raised
    /// mid-stream by a control signal.
    #[must_use]
    pub fn is_special(self) -> bool {
        matches!(
            self,
            Self::WaitingForQuestionAnswer | Self::WaitingForPlanExecution
        )
    }
}

/// Agent execution mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Read-only planning.
    Plan,
    /// Full implementation.
    Build,
}

impl SessionMode {
    /// Stable lowercase name used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Build => "build",
        }
    }

    /// Parse the persistence name back into a mode.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "plan" => Some(Self::Plan),
            "build" => Some(Self::Build),
            _ => None,
        }
    }
}

/// Boundary recording when the backend conversation was reset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextClearMarker {
    /// Time the context was cleared.
    pub cleared_at: DateTime<Utc>,
    /// Transcript length at the moment of the clear; messages at or after
    /// this index belong to the new context.
    pub message_index: usize,
}

/// Session domain entity held by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning entity (issue, pull request, ...).
    pub entity_id: String,
    /// Owning project.
    pub project_id: String,
    /// Human-readable project name forwarded to the backend on start.
    pub project_name: Option<String>,
    /// Agent working directory.
    pub working_directory: String,
    /// Model identifier.
    pub model: String,
    /// Execution mode.
    pub mode: SessionMode,
    /// Optional system prompt passed on backend start.
    pub system_prompt: Option<String>,
    /// Backend session id; `None` until the backend acknowledges a start.
    pub backend_session_id: Option<String>,
    /// Resumable backend conversation handle; `None` after a context clear.
    pub conversation_id: Option<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Append-only transcript.
    pub messages: Vec<Message>,
    /// Captured plan text.
    pub plan_content: Option<String>,
    /// Backend-relative path the plan was written to.
    pub plan_file_path: Option<String>,
    /// Unresolved question set.
    pub pending_question: Option<PendingQuestion>,
    /// Context-clear boundaries, oldest first.
    pub context_clears: Vec<ContextClearMarker>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new session in `Starting` with a generated identifier.
    #[must_use]
    pub fn new(
        entity_id: String,
        project_id: String,
        working_directory: String,
        model: String,
        mode: SessionMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id,
            project_id,
            project_name: None,
            working_directory,
            model,
            mode,
            system_prompt: None,
            backend_session_id: None,
            conversation_id: None,
            status: SessionStatus::Starting,
            messages: Vec::new(),
            plan_content: None,
            plan_file_path: None,
            pending_question: None,
            context_clears: Vec::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Whether the backend has ever acknowledged this session.
    #[must_use]
    pub fn has_backend_linkage(&self) -> bool {
        self.backend_session_id.is_some()
    }

    /// Record a context-clear boundary and drop the resumable handle.
    ///
    /// The transcript and plan state are left untouched.
    pub fn clear_context(&mut self) {
        self.context_clears.push(ContextClearMarker {
            cleared_at: Utc::now(),
            message_index: self.messages.len(),
        });
        self.conversation_id = None;
        self.touch();
    }

    /// Append a transcript message.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.touch();
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}
