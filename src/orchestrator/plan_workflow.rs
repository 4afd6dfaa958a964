//! Plan execution, approval, and context clearing.
//!
//! A captured plan is executed by sending its content verbatim as the next
//! user turn. The plan file's name and location never reach the agent.

use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::session::{Session, SessionMode, SessionStatus};
use crate::orchestrator::service::SessionOrchestrator;
use crate::orchestrator::stream_processor::set_status;
use crate::{AppError, Result};

impl SessionOrchestrator {
    /// Switch to `Build` and send the captured plan as the next turn.
    ///
    /// A session without plan content is returned unchanged. With
    /// `clear_context`, a context-clear boundary is recorded first so the
    /// backend starts a fresh conversation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session,
    /// [`AppError::SessionBusy`] while another turn is draining, or
    /// [`AppError::Backend`] if the turn fails.
    pub async fn execute_plan(&self, session_id: &str, clear_context: bool) -> Result<Session> {
        let span = info_span!("execute_plan", session_id, clear_context);
        async move {
            let handle = self.handle(session_id)?;
            let run = self.begin_run(session_id)?;

            let plan = {
                let mut session = handle.lock().await;
                let Some(plan) = session.plan_content.clone() else {
                    debug!("no plan captured; nothing to execute");
                    return Ok(session.clone());
                };
                if clear_context {
                    session.clear_context();
                }
                session.mode = SessionMode::Build;
                plan
            };

            info!("executing plan");
            self.drive(&handle, &run, plan).await?;
            let snapshot = handle.lock().await.clone();
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }

    /// Accept or reject the pending plan.
    ///
    /// A linked session resolves the pending turn natively through the
    /// backend. Otherwise approval executes the plan and rejection sends the
    /// feedback, or the configured rejection message, as an ordinary turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Precondition`] unless the session is
    /// `WaitingForPlanExecution`; the backend is not contacted in that case.
    /// Returns [`AppError::Backend`] if the backend declines the approval.
    pub async fn approve_plan(
        &self,
        session_id: &str,
        approved: bool,
        keep_context: bool,
        feedback: Option<String>,
    ) -> Result<Session> {
        let span = info_span!("approve_plan", session_id, approved, keep_context);
        async move {
            let handle = self.handle(session_id)?;

            let backend_session_id = {
                let session = handle.lock().await;
                if session.status != SessionStatus::WaitingForPlanExecution {
                    return Err(AppError::Precondition(format!(
                        "session '{session_id}' is {:?}, not waiting for plan execution",
                        session.status
                    )));
                }
                session.backend_session_id.clone()
            };

            let Some(backend_id) = backend_session_id else {
                return if approved {
                    debug!("no backend linkage; executing plan directly");
                    self.execute_plan(session_id, !keep_context).await
                } else {
                    let message = feedback.unwrap_or_else(|| self.config.rejection_message.clone());
                    debug!("no backend linkage; sending rejection as a message");
                    self.send_message(session_id, &message).await
                };
            };

            let resolved = self
                .backend
                .approve_plan(&backend_id, approved, keep_context, feedback)
                .await?;
            if !resolved {
                warn!("backend declined plan approval");
                return Err(AppError::Backend(format!(
                    "backend did not resolve the plan for session '{session_id}'"
                )));
            }

            let mut session = handle.lock().await;
            if approved {
                session.mode = SessionMode::Build;
                if !keep_context {
                    session.clear_context();
                }
            }
            set_status(&self.hub, &mut session, SessionStatus::Running);
            info!("plan resolved by backend");
            Ok(session.clone())
        }
        .instrument(span)
        .await
    }

    /// Record a context-clear boundary without sending anything.
    ///
    /// The transcript, plan content, and plan file path are retained.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session.
    pub async fn clear_context(&self, session_id: &str) -> Result<Session> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock().await;
        session.clear_context();
        info!(
            session_id,
            boundaries = session.context_clears.len(),
            "context cleared"
        );
        Ok(session.clone())
    }
}
