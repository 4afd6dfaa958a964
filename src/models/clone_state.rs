//! Clone-container state reported by the backend and the reuse decision
//! derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Container lifecycle as reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Agent is working.
    Active,
    /// Agent finished its turn and is waiting for input.
    Idle,
    /// Container exists but its agent is not running.
    Stopped,
}

/// Backend snapshot of the container bound to a working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloneContainerState {
    /// Working directory the container serves.
    pub working_directory: String,
    /// Backend container identifier.
    pub container_id: String,
    /// Backend session running in the container, if any.
    pub backend_session_id: Option<String>,
    /// Current container status.
    pub status: ContainerStatus,
    /// Time of the last observed agent activity.
    pub last_activity_at: DateTime<Utc>,
    /// Whether the agent is blocked on a question.
    pub has_pending_question: bool,
    /// Whether the agent is blocked on plan approval.
    pub has_pending_plan_approval: bool,
}

/// What the caller should do before starting a session in a working directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CloneAction {
    /// No container exists; start normally.
    StartNew,
    /// A container is mid-work; tell the caller instead of starting.
    NotifyActive,
    /// An idle container exists; ask before reclaiming it.
    ConfirmTerminate,
    /// A stopped container exists; reuse it silently.
    ReuseContainer,
}

/// Result of [`check_clone_state`](crate::orchestrator::service::SessionOrchestrator::check_clone_state).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CloneStateCheck {
    /// Recommended action.
    pub action: CloneAction,
    /// Caller-facing explanation, absent for silent actions.
    pub message: Option<String>,
    /// Backend snapshot the decision was made from.
    pub container: Option<CloneContainerState>,
}
