//! Container reuse decisions for a working directory.

use tracing::{info, info_span, Instrument};

use crate::models::clone_state::{
    CloneAction, CloneContainerState, CloneStateCheck, ContainerStatus,
};
use crate::models::session::Session;
use crate::orchestrator::service::{NewSessionOptions, SessionOrchestrator};
use crate::Result;

const PENDING_QUESTION_MESSAGE: &str =
    "The agent in this workspace is waiting for an answer to its question. Answer it before starting a new session.";
const PENDING_PLAN_MESSAGE: &str =
    "The agent in this workspace has a plan waiting for approval. Review the plan before starting a new session.";
const WORKING_MESSAGE: &str =
    "An agent is currently working in this workspace. Wait for it to finish or stop it before starting a new session.";
const IDLE_MESSAGE: &str =
    "An idle agent container already exists for this workspace. Terminate it to start a new session?";

/// Map a backend container snapshot to the caller's next step.
#[must_use]
pub fn decide_clone_action(container: Option<CloneContainerState>) -> CloneStateCheck {
    let Some(container) = container else {
        return CloneStateCheck {
            action: CloneAction::StartNew,
            message: None,
            container: None,
        };
    };

    let (action, message) = match container.status {
        ContainerStatus::Active if container.has_pending_question => {
            (CloneAction::NotifyActive, Some(PENDING_QUESTION_MESSAGE))
        }
        ContainerStatus::Active if container.has_pending_plan_approval => {
            (CloneAction::NotifyActive, Some(PENDING_PLAN_MESSAGE))
        }
        ContainerStatus::Active => (CloneAction::NotifyActive, Some(WORKING_MESSAGE)),
        ContainerStatus::Idle => (CloneAction::ConfirmTerminate, Some(IDLE_MESSAGE)),
        ContainerStatus::Stopped => (CloneAction::ReuseContainer, None),
    };

    CloneStateCheck {
        action,
        message: message.map(str::to_owned),
        container: Some(container),
    }
}

impl SessionOrchestrator {
    /// Decide whether a new session may start in `working_directory`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if the
    /// container state cannot be queried.
    pub async fn check_clone_state(&self, working_directory: &str) -> Result<CloneStateCheck> {
        let container = self
            .backend
            .get_clone_container_state(working_directory)
            .await?;
        let check = decide_clone_action(container);
        info!(working_directory, action = ?check.action, "clone state checked");
        Ok(check)
    }

    /// Start a session, first terminating the container bound to its
    /// working directory when `terminate_existing` is set.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`](crate::AppError::Backend) if
    /// termination fails, plus every error of
    /// [`start_session`](Self::start_session).
    pub async fn start_session_with_termination(
        &self,
        options: NewSessionOptions,
        terminate_existing: bool,
    ) -> Result<Session> {
        if terminate_existing {
            let span = info_span!(
                "terminate_clone_session",
                working_directory = %options.working_directory
            );
            self.backend
                .terminate_clone_session(&options.working_directory)
                .instrument(span)
                .await?;
            info!(
                working_directory = %options.working_directory,
                "existing container terminated"
            );
        }
        self.start_session(options).await
    }
}
