//! Public orchestration surface.
//!
//! [`SessionOrchestrator`] owns the session store, the status hub, and the
//! set of in-flight runs. Every operation that drives a backend stream
//! first claims the session's run slot; a second caller gets
//! [`AppError::SessionBusy`] instead of a second concurrent stream.
//!
//! The plan, question, and clone-reuse workflows extend this type from
//! their own modules.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::{ExecutionBackend, SendMessageRequest, StartSessionRequest};
use crate::config::OrchestratorConfig;
use crate::models::message::{Message, MessageRole};
use crate::models::session::{Session, SessionMode, SessionStatus};
use crate::orchestrator::broadcast::{StatusBroadcast, StatusHub};
use crate::orchestrator::session_store::{SessionHandle, SessionStore};
use crate::orchestrator::stream_processor::{set_status, DrainOutcome, StreamProcessor};
use crate::persistence::message_log::MessageLog;
use crate::{AppError, Result};

/// Parameters for [`SessionOrchestrator::start_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionOptions {
    /// Owning entity (issue, pull request, ...).
    pub entity_id: String,
    /// Owning project.
    pub project_id: String,
    /// Human-readable project name forwarded to the backend.
    pub project_name: Option<String>,
    /// Agent working directory.
    pub working_directory: String,
    /// Initial execution mode.
    pub mode: SessionMode,
    /// Model override; the configured default is used when `None`.
    pub model: Option<String>,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
    /// First user message. Without one the session waits for input.
    pub initial_prompt: Option<String>,
}

/// Parameters for [`SessionOrchestrator::resume_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeSessionOptions {
    /// Identifier of the session being resumed.
    pub session_id: String,
    /// Owning entity.
    pub entity_id: String,
    /// Owning project.
    pub project_id: String,
    /// Agent working directory.
    pub working_directory: String,
    /// Execution mode.
    pub mode: SessionMode,
    /// Model override; the configured default is used when `None`.
    pub model: Option<String>,
    /// Backend conversation to continue.
    pub conversation_id: String,
    /// Optional system prompt.
    pub system_prompt: Option<String>,
}

/// Session orchestration engine.
pub struct SessionOrchestrator {
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) backend: Arc<dyn ExecutionBackend>,
    pub(crate) log: Arc<dyn MessageLog>,
    pub(crate) store: SessionStore,
    pub(crate) hub: StatusHub,
    active_runs: DashMap<String, CancellationToken>,
}

/// Claim on a session's single run slot; released on drop.
pub(crate) struct RunGuard<'a> {
    runs: &'a DashMap<String, CancellationToken>,
    session_id: String,
    token: CancellationToken,
}

impl RunGuard<'_> {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.runs.remove(&self.session_id);
    }
}

enum TurnCall {
    Start(StartSessionRequest),
    Send(SendMessageRequest),
}

impl SessionOrchestrator {
    /// Create an orchestrator over a backend and a message log.
    #[must_use]
    pub fn new(
        config: Arc<OrchestratorConfig>,
        backend: Arc<dyn ExecutionBackend>,
        log: Arc<dyn MessageLog>,
    ) -> Self {
        let hub = StatusHub::new(config.broadcast_capacity);
        Self {
            config,
            backend,
            log,
            store: SessionStore::new(),
            hub,
            active_runs: DashMap::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────

    /// Snapshot of one session.
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        let handle = self.store.get(session_id)?;
        let snapshot = handle.lock().await.clone();
        Some(snapshot)
    }

    /// Snapshots of every session owned by an entity.
    pub async fn sessions_for_entity(&self, entity_id: &str) -> Vec<Session> {
        snapshots(self.store.by_entity(entity_id)).await
    }

    /// Snapshots of every session in a project.
    pub async fn sessions_for_project(&self, project_id: &str) -> Vec<Session> {
        snapshots(self.store.by_project(project_id)).await
    }

    /// Subscribe to status broadcasts for all sessions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StatusBroadcast> {
        self.hub.subscribe()
    }

    /// Whether a backend stream is currently being drained for a session.
    #[must_use]
    pub fn is_running(&self, session_id: &str) -> bool {
        self.active_runs.contains_key(session_id)
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Create a session and, when an initial prompt is given, run its
    /// first turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] if the backend refuses the start or the
    /// first turn fails; the session stays registered in `Error`.
    pub async fn start_session(&self, options: NewSessionOptions) -> Result<Session> {
        let model = options
            .model
            .unwrap_or_else(|| self.config.default_model.clone());
        let mut session = Session::new(
            options.entity_id,
            options.project_id,
            options.working_directory,
            model,
            options.mode,
        );
        session.project_name = options.project_name;
        session.system_prompt = options.system_prompt;
        let mode = options.mode;
        let initial_prompt = options.initial_prompt;

        let span = info_span!("start_session", session_id = %session.id);
        async move {
            let session_id = session.id.clone();
            if let Err(err) = self
                .log
                .initialize(
                    &session.id,
                    &session.entity_id,
                    &session.project_id,
                    session.mode,
                    &session.model,
                )
                .await
            {
                warn!(%err, "failed to initialize message log");
            }

            let handle = self.store.insert(session);
            self.hub.broadcast_status(&session_id, SessionStatus::Starting);
            info!(?mode, sessions = self.store.session_count(), "session created");

            if let Some(prompt) = initial_prompt {
                let run = self.begin_run(&session_id)?;
                self.drive(&handle, &run, prompt).await?;
            } else {
                let mut session = handle.lock().await;
                set_status(&self.hub, &mut session, SessionStatus::WaitingForInput);
            }

            let snapshot = handle.lock().await.clone();
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }

    /// Send a user message and drain the resulting turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session,
    /// [`AppError::SessionBusy`] while another turn is draining, or
    /// [`AppError::Backend`] if the turn fails.
    pub async fn send_message(&self, session_id: &str, message: &str) -> Result<Session> {
        let span = info_span!("send_message", session_id);
        async move {
            let handle = self.handle(session_id)?;
            let run = self.begin_run(session_id)?;
            self.drive(&handle, &run, message.to_owned()).await?;
            let snapshot = handle.lock().await.clone();
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }

    /// Interrupt the in-flight turn, if any, and return the session to
    /// `WaitingForInput`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session.
    pub async fn interrupt_session(&self, session_id: &str) -> Result<Session> {
        let span = info_span!("interrupt_session", session_id);
        async move {
            let handle = self.handle(session_id)?;
            self.cancel_run(session_id);

            let backend_session_id = handle.lock().await.backend_session_id.clone();
            if let Some(backend_id) = backend_session_id {
                if let Err(err) = self.backend.interrupt_session(&backend_id).await {
                    warn!(%err, "backend interrupt failed");
                }
            }

            let mut session = handle.lock().await;
            session.pending_question = None;
            set_status(&self.hub, &mut session, SessionStatus::WaitingForInput);
            info!("session interrupted");
            Ok(session.clone())
        }
        .instrument(span)
        .await
    }

    /// Stop a session and remove it from the store. Stopping an unknown
    /// session is a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; backend stop failures are logged.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        let span = info_span!("stop_session", session_id);
        async move {
            let Some(handle) = self.store.remove(session_id).await else {
                debug!("stop requested for unknown session");
                return Ok(());
            };
            self.cancel_run(session_id);

            let backend_session_id = handle.lock().await.backend_session_id.clone();
            if let Some(backend_id) = backend_session_id {
                if let Err(err) = self.backend.stop_session(&backend_id).await {
                    warn!(%err, "backend stop failed");
                }
            }

            let mut session = handle.lock().await;
            set_status(&self.hub, &mut session, SessionStatus::Stopped);
            info!("session stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Re-attach a session to a known backend conversation.
    ///
    /// A session that is still registered is updated in place: its plan,
    /// context-clear markers, pending question, and transcript are kept, and
    /// the backend linkage survives only when the conversation is unchanged.
    /// Otherwise the session is rebuilt under its original identifier with
    /// the transcript hydrated from the message log.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionBusy`] if the session is registered and
    /// currently draining a turn.
    pub async fn resume_session(&self, options: ResumeSessionOptions) -> Result<Session> {
        let span = info_span!("resume_session", session_id = %options.session_id);
        async move {
            let _run = self.begin_run(&options.session_id)?;

            if let Some(handle) = self.store.get(&options.session_id) {
                let mut session = handle.lock().await;
                if session.conversation_id.as_deref() != Some(options.conversation_id.as_str()) {
                    session.backend_session_id = None;
                }
                session.conversation_id = Some(options.conversation_id);
                session.mode = options.mode;
                if let Some(model) = options.model {
                    session.model = model;
                }
                if options.system_prompt.is_some() {
                    session.system_prompt = options.system_prompt;
                }
                let status = if session.status.is_special() {
                    session.status
                } else {
                    SessionStatus::WaitingForInput
                };
                set_status(&self.hub, &mut session, status);
                info!(?status, "registered session resumed in place");
                return Ok(session.clone());
            }

            let model = options
                .model
                .unwrap_or_else(|| self.config.default_model.clone());
            let mut session = Session::new(
                options.entity_id,
                options.project_id,
                options.working_directory,
                model,
                options.mode,
            );
            session.id = options.session_id;
            session.system_prompt = options.system_prompt;
            session.conversation_id = Some(options.conversation_id);
            session.status = SessionStatus::WaitingForInput;

            match self.log.get_messages(&session.id).await {
                Ok(messages) => session.messages = messages,
                Err(err) => warn!(%err, "failed to load transcript; resuming empty"),
            }
            if let Err(err) = self
                .log
                .initialize(
                    &session.id,
                    &session.entity_id,
                    &session.project_id,
                    session.mode,
                    &session.model,
                )
                .await
            {
                warn!(%err, "failed to initialize message log");
            }

            let snapshot = session.clone();
            self.store.insert(session);
            self.hub
                .broadcast_status(&snapshot.id, SessionStatus::WaitingForInput);
            info!(messages = snapshot.messages.len(), "session resumed");
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }

    /// Ask the backend to remove containers no longer bound to a session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] on transport failure.
    pub async fn cleanup_orphaned_containers(&self) -> Result<usize> {
        let removed = self.backend.cleanup_orphaned_containers().await?;
        info!(removed, "orphaned containers cleaned up");
        Ok(removed)
    }

    // ── Internals ────────────────────────────────────────────

    pub(crate) fn handle(&self, session_id: &str) -> Result<SessionHandle> {
        self.store
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("session '{session_id}' not found")))
    }

    pub(crate) fn begin_run(&self, session_id: &str) -> Result<RunGuard<'_>> {
        match self.active_runs.entry(session_id.to_owned()) {
            Entry::Occupied(_) => Err(AppError::SessionBusy(format!(
                "session '{session_id}' is already running"
            ))),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Ok(RunGuard {
                    runs: &self.active_runs,
                    session_id: session_id.to_owned(),
                    token,
                })
            }
        }
    }

    fn cancel_run(&self, session_id: &str) {
        let token = self
            .active_runs
            .get(session_id)
            .map(|entry| entry.value().clone());
        if let Some(token) = token {
            debug!(session_id, "cancelling in-flight run");
            token.cancel();
        }
    }

    /// Record a user turn, route it to the backend, and drain the stream.
    ///
    /// A session with both a backend session and a conversation handle gets
    /// a follow-up message; anything else starts (or resumes) a backend
    /// session.
    pub(crate) async fn drive(
        &self,
        handle: &SessionHandle,
        run: &RunGuard<'_>,
        message: String,
    ) -> Result<DrainOutcome> {
        let (session_id, user_turn, call) = {
            let mut session = handle.lock().await;
            let user_turn = Message::text(MessageRole::User, message.clone());
            session.push_message(user_turn.clone());
            let call = self.route(&session, message);
            (session.id.clone(), user_turn, call)
        };

        if let Err(err) = self.log.append(&session_id, &user_turn).await {
            warn!(session_id, %err, "failed to append message to log");
        }

        let opened = match call {
            TurnCall::Start(request) => {
                debug!(
                    session_id,
                    resume = request.resume_id.is_some(),
                    "starting backend session"
                );
                self.backend.start_session(request).await
            }
            TurnCall::Send(request) => {
                debug!(session_id, "sending to backend session");
                self.backend.send_message(request).await
            }
        };

        let events = match opened {
            Ok(events) => events,
            Err(err) => {
                let mut session = handle.lock().await;
                if !run.token().is_cancelled() {
                    warn!(session_id, %err, "backend call failed");
                    set_status(&self.hub, &mut session, SessionStatus::Error);
                }
                return Err(err);
            }
        };

        StreamProcessor::new(self.backend.as_ref(), &self.hub, self.log.as_ref())
            .drain(handle, events, run.token())
            .await
    }

    fn route(&self, session: &Session, message: String) -> TurnCall {
        let permission_mode = Some(self.config.permission_mode_for(session.mode).to_owned());
        if let (Some(backend_id), Some(_)) =
            (&session.backend_session_id, &session.conversation_id)
        {
            TurnCall::Send(SendMessageRequest {
                backend_session_id: backend_id.clone(),
                message,
                model: Some(session.model.clone()),
                permission_mode,
            })
        } else {
            TurnCall::Start(StartSessionRequest {
                working_directory: session.working_directory.clone(),
                mode: session.mode,
                model: session.model.clone(),
                prompt: message,
                system_prompt: session.system_prompt.clone(),
                resume_id: session.conversation_id.clone(),
                permission_mode,
                issue_id: Some(session.entity_id.clone()),
                project_id: Some(session.project_id.clone()),
                project_name: session.project_name.clone(),
            })
        }
    }
}

async fn snapshots(handles: Vec<SessionHandle>) -> Vec<Session> {
    let mut sessions = Vec::with_capacity(handles.len());
    for handle in handles {
        sessions.push(handle.lock().await.clone());
    }
    sessions.sort_by_key(|session| session.created_at);
    sessions
}
