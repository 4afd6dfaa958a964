//! Backend event-stream processor.
//!
//! Drains one [`EventStream`] to completion against exactly one session:
//! transcript appends, tool-result heuristics, and status transitions.
//!
//! # Status sequence
//!
//! `Running` is broadcast before the first event is awaited. A question or
//! plan signal raises its special status mid-stream. When the stream ends
//! without a special status, `WaitingForInput` is broadcast.
//!
//! # Cancellation
//!
//! Each mutation re-checks the run's [`CancellationToken`] after taking the
//! session lock. An interrupt cancels the token before it takes the lock,
//! so once it has written its status no later event can overwrite it.

use futures_util::StreamExt;
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendEvent, EventStream, ExecutionBackend, SESSION_NOT_FOUND};
use crate::models::message::{ContentKind, Message, MessageRole};
use crate::models::question::PendingQuestion;
use crate::models::session::{Session, SessionMode, SessionStatus};
use crate::orchestrator::broadcast::StatusHub;
use crate::orchestrator::heuristics::{self, ToolSignal};
use crate::orchestrator::session_store::SessionHandle;
use crate::persistence::message_log::MessageLog;
use crate::{AppError, Result};

/// How a drain finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Session status when the drain returned.
    pub status: SessionStatus,
    /// Whether the drain stopped because the run was cancelled.
    pub interrupted: bool,
}

/// Where a question or plan signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalSource {
    /// Inferred from a tool block.
    Heuristic,
    /// Explicit control payload.
    Explicit,
}

/// Freshness of the stored plan body relative to this stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum PlanBody {
    /// Untouched by this stream.
    #[default]
    Unchanged,
    /// Captured during this stream.
    Captured,
    /// The plan file was rewritten without its body; the stored body is stale.
    Stale,
}

/// Signals raised while draining one stream.
#[derive(Debug, Default)]
struct DrainState {
    /// Linkage was (re)bound by this stream's first `SessionStarted`.
    linked: bool,
    question: Option<SignalSource>,
    plan: Option<SignalSource>,
    plan_body: PlanBody,
    /// Status set by an error mapping; suppresses the final transition.
    terminal: Option<SessionStatus>,
}

impl DrainState {
    fn explicit_plan(&self) -> bool {
        self.plan == Some(SignalSource::Explicit)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Applies backend events to a session.
pub struct StreamProcessor<'a> {
    backend: &'a dyn ExecutionBackend,
    hub: &'a StatusHub,
    log: &'a dyn MessageLog,
}

impl<'a> StreamProcessor<'a> {
    /// Create a processor over shared collaborators.
    #[must_use]
    pub fn new(
        backend: &'a dyn ExecutionBackend,
        hub: &'a StatusHub,
        log: &'a dyn MessageLog,
    ) -> Self {
        Self { backend, hub, log }
    }

    /// Drain `events` into the session behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Backend`] when the stream yields a transport error
    /// or an unrecoverable backend error; the session is left in `Error`.
    pub async fn drain(
        &self,
        handle: &SessionHandle,
        mut events: EventStream,
        cancel: &CancellationToken,
    ) -> Result<DrainOutcome> {
        if let Some(mut session) = lock_live(handle, cancel).await {
            self.set_status(&mut session, SessionStatus::Running);
        }

        let mut state = DrainState::default();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                item = events.next() => item,
            };
            let Some(item) = next else {
                break;
            };

            let event = match item {
                Ok(event) => event,
                Err(err) => {
                    self.fail(handle, cancel, &err).await;
                    return Err(err);
                }
            };

            if let Flow::Stop = self.apply(handle, event, &mut state, cancel).await? {
                break;
            }
        }

        Ok(self.finish(handle, &state, cancel).await)
    }

    async fn apply(
        &self,
        handle: &SessionHandle,
        event: BackendEvent,
        state: &mut DrainState,
        cancel: &CancellationToken,
    ) -> Result<Flow> {
        match event {
            BackendEvent::SessionStarted {
                session_id,
                conversation_id,
            } => {
                let Some(mut session) = lock_live(handle, cancel).await else {
                    return Ok(Flow::Stop);
                };
                if !state.linked {
                    debug!(
                        session_id = %session.id,
                        backend_session_id = %session_id,
                        "backend session linked"
                    );
                    session.backend_session_id = Some(session_id);
                    state.linked = true;
                }
                if conversation_id.is_some() {
                    session.conversation_id = conversation_id;
                }
                Ok(Flow::Continue)
            }

            BackendEvent::Message { role, content } => {
                self.apply_message(handle, Message::new(role, content), state, cancel)
                    .await;
                Ok(Flow::Continue)
            }

            BackendEvent::Result {
                conversation_id,
                duration_ms,
                cost_usd,
            } => {
                let Some(mut session) = lock_live(handle, cancel).await else {
                    return Ok(Flow::Stop);
                };
                if conversation_id.is_some() {
                    session.conversation_id = conversation_id;
                }
                session.touch();
                info!(session_id = %session.id, duration_ms, ?cost_usd, "backend turn completed");
                Ok(Flow::Stop)
            }

            BackendEvent::Error {
                code,
                message,
                recoverable,
            } => self.apply_error(handle, &code, &message, recoverable, state, cancel).await,

            BackendEvent::QuestionPending { payload } => {
                if let Some(question) = heuristics::parse_question_payload(&payload) {
                    self.raise_question(handle, question, SignalSource::Explicit, state, cancel)
                        .await;
                } else {
                    warn!(%payload, "malformed question-pending payload ignored");
                }
                Ok(Flow::Continue)
            }

            BackendEvent::PlanPending { payload } => {
                let Some(plan) = heuristics::parse_plan_payload(&payload) else {
                    warn!(%payload, "malformed plan-pending payload ignored");
                    return Ok(Flow::Continue);
                };
                let Some(mut session) = lock_live(handle, cancel).await else {
                    return Ok(Flow::Stop);
                };
                session.plan_content = Some(plan.content.clone());
                if plan.file_path.is_some() {
                    session.plan_file_path = plan.file_path;
                }
                state.plan_body = PlanBody::Captured;
                drop(session);
                self.raise_plan(
                    handle,
                    Some(plan.content),
                    SignalSource::Explicit,
                    state,
                    cancel,
                )
                .await;
                Ok(Flow::Continue)
            }
        }
    }

    async fn apply_message(
        &self,
        handle: &SessionHandle,
        message: Message,
        state: &mut DrainState,
        cancel: &CancellationToken,
    ) {
        let (session_id, signals) = {
            let Some(mut session) = lock_live(handle, cancel).await else {
                return;
            };
            let signals = collect_signals(&session, &message);
            session.push_message(message.clone());
            (session.id.clone(), signals)
        };

        self.persist(&session_id, &message).await;

        for signal in signals {
            self.apply_signal(handle, signal, state, cancel).await;
        }
    }

    async fn apply_signal(
        &self,
        handle: &SessionHandle,
        signal: ToolSignal,
        state: &mut DrainState,
        cancel: &CancellationToken,
    ) {
        match signal {
            ToolSignal::PlanFileWritten { path, content } => {
                let Some(mut session) = lock_live(handle, cancel).await else {
                    return;
                };
                debug!(session_id = %session.id, plan_file_path = %path, "plan file written");
                session.plan_file_path = Some(path);
                if state.explicit_plan() {
                    return;
                }
                if let Some(content) = content {
                    session.plan_content = Some(content);
                    state.plan_body = PlanBody::Captured;
                } else if session.plan_content.is_some() && state.plan_body != PlanBody::Captured {
                    state.plan_body = PlanBody::Stale;
                }
            }

            ToolSignal::ExitPlanMode { plan } => {
                self.apply_exit_plan_mode(handle, plan, state, cancel).await;
            }

            ToolSignal::QuestionAsked(question) => {
                self.raise_question(handle, question, SignalSource::Heuristic, state, cancel)
                    .await;
            }
        }
    }

    async fn apply_exit_plan_mode(
        &self,
        handle: &SessionHandle,
        plan_argument: Option<String>,
        state: &mut DrainState,
        cancel: &CancellationToken,
    ) {
        if state.explicit_plan() {
            return;
        }

        let fetch_target = {
            let Some(mut session) = lock_live(handle, cancel).await else {
                return;
            };
            if session.mode != SessionMode::Plan {
                debug!(session_id = %session.id, "ExitPlanMode outside plan mode ignored");
                return;
            }
            if let Some(plan) = plan_argument {
                session.plan_content = Some(plan);
                state.plan_body = PlanBody::Captured;
            }
            let needs_fetch = session.plan_content.is_none() || state.plan_body == PlanBody::Stale;
            match (&session.backend_session_id, &session.plan_file_path) {
                (Some(backend_id), Some(path)) if needs_fetch => {
                    Some((session.id.clone(), backend_id.clone(), path.clone()))
                }
                _ => None,
            }
        };

        if let Some((session_id, backend_id, path)) = fetch_target {
            match self.backend.read_file_from_agent(&backend_id, &path).await {
                Ok(content) if !content.trim().is_empty() => {
                    if let Some(mut session) = lock_live(handle, cancel).await {
                        session.plan_content = Some(content);
                        state.plan_body = PlanBody::Captured;
                    }
                }
                Ok(_) => warn!(session_id, plan_file_path = %path, "plan file is empty"),
                Err(err) => {
                    warn!(session_id, plan_file_path = %path, %err, "failed to fetch plan file");
                }
            }
        }

        let content = handle.lock().await.plan_content.clone();
        self.raise_plan(handle, content, SignalSource::Heuristic, state, cancel)
            .await;
    }

    async fn apply_error(
        &self,
        handle: &SessionHandle,
        code: &str,
        message: &str,
        recoverable: bool,
        state: &mut DrainState,
        cancel: &CancellationToken,
    ) -> Result<Flow> {
        if code == SESSION_NOT_FOUND {
            let Some(mut session) = lock_live(handle, cancel).await else {
                return Ok(Flow::Stop);
            };
            warn!(session_id = %session.id, message, "backend lost the session; dropping linkage");
            session.backend_session_id = None;
            self.set_status(&mut session, SessionStatus::Error);
            state.terminal = Some(SessionStatus::Error);
            return Ok(Flow::Stop);
        }

        if recoverable {
            warn!(code, message, "recoverable backend error");
            return Ok(Flow::Continue);
        }

        let err = AppError::Backend(format!("{code}: {message}"));
        self.fail(handle, cancel, &err).await;
        Err(err)
    }

    async fn raise_question(
        &self,
        handle: &SessionHandle,
        question: PendingQuestion,
        source: SignalSource,
        state: &mut DrainState,
        cancel: &CancellationToken,
    ) {
        if state.question == Some(SignalSource::Explicit) && source == SignalSource::Heuristic {
            return;
        }
        let Some(mut session) = lock_live(handle, cancel).await else {
            return;
        };
        let duplicate = source == SignalSource::Heuristic
            && session
                .pending_question
                .as_ref()
                .is_some_and(|pending| pending.tool_use_id == question.tool_use_id);
        if duplicate {
            return;
        }

        info!(session_id = %session.id, question_id = %question.id, "question pending");
        session.pending_question = Some(question);
        if state.question != Some(SignalSource::Explicit) {
            state.question = Some(source);
        }
        self.set_status(&mut session, SessionStatus::WaitingForQuestionAnswer);
    }

    async fn raise_plan(
        &self,
        handle: &SessionHandle,
        content: Option<String>,
        source: SignalSource,
        state: &mut DrainState,
        cancel: &CancellationToken,
    ) {
        if state.plan.is_some() {
            return;
        }
        let (session_id, synthetic) = {
            let Some(mut session) = lock_live(handle, cancel).await else {
                return;
            };
            state.plan = Some(source);
            info!(session_id = %session.id, has_content = content.is_some(), "plan pending");
            if state.question.is_none() {
                self.set_status(&mut session, SessionStatus::WaitingForPlanExecution);
            }
            let synthetic = content.map(|plan| Message::text(MessageRole::Assistant, plan));
            if let Some(message) = &synthetic {
                session.push_message(message.clone());
            }
            (session.id.clone(), synthetic)
        };

        if let Some(message) = synthetic {
            self.persist(&session_id, &message).await;
        }
    }

    async fn finish(
        &self,
        handle: &SessionHandle,
        state: &DrainState,
        cancel: &CancellationToken,
    ) -> DrainOutcome {
        let mut session = handle.lock().await;
        if cancel.is_cancelled() {
            return DrainOutcome {
                status: session.status,
                interrupted: true,
            };
        }

        if state.terminal.is_none() && !session.status.is_special() {
            self.set_status(&mut session, SessionStatus::WaitingForInput);
        }

        DrainOutcome {
            status: session.status,
            interrupted: false,
        }
    }

    async fn fail(&self, handle: &SessionHandle, cancel: &CancellationToken, err: &AppError) {
        if let Some(mut session) = lock_live(handle, cancel).await {
            warn!(session_id = %session.id, %err, "event stream failed");
            self.set_status(&mut session, SessionStatus::Error);
        }
    }

    fn set_status(&self, session: &mut Session, status: SessionStatus) {
        set_status(self.hub, session, status);
    }

    async fn persist(&self, session_id: &str, message: &Message) {
        if let Err(err) = self.log.append(session_id, message).await {
            warn!(session_id, %err, "failed to append message to log");
        }
    }
}

/// Set and broadcast a status while the session lock is held, so broadcasts
/// for one session are emitted in the order the transitions happened.
pub(crate) fn set_status(hub: &StatusHub, session: &mut Session, status: SessionStatus) {
    session.status = status;
    session.touch();
    hub.broadcast_status(&session.id, status);
}

/// Lock the session unless the run was cancelled.
async fn lock_live<'h>(
    handle: &'h SessionHandle,
    cancel: &CancellationToken,
) -> Option<MutexGuard<'h, Session>> {
    let guard = handle.lock().await;
    if cancel.is_cancelled() {
        None
    } else {
        Some(guard)
    }
}

/// Run the heuristics over every tool block in `message`.
///
/// A `ToolResult` without a tool name or arguments borrows them from the
/// matching `ToolUse` earlier in this message or in the transcript. An
/// `AskUserQuestion` result whose `ToolUse` was already seen raises nothing:
/// the question came from the `ToolUse` and the result only reports that it
/// was answered.
fn collect_signals(session: &Session, message: &Message) -> Vec<ToolSignal> {
    let mut signals = Vec::new();

    for block in &message.content {
        match &block.kind {
            ContentKind::ToolUse {
                tool_use_id,
                tool_name,
                input,
            } if tool_name == heuristics::ASK_USER_QUESTION_TOOL => {
                if let Some(question) = heuristics::question_from_tool_input(tool_use_id, input) {
                    signals.push(ToolSignal::QuestionAsked(question));
                }
            }
            ContentKind::ToolResult {
                tool_use_id,
                tool_name,
                tool_input,
                content,
                ..
            } => {
                let paired = find_tool_use(session, message, tool_use_id);
                let name = tool_name
                    .as_deref()
                    .or_else(|| paired.map(|(name, _)| name));
                let input = tool_input.as_ref().or_else(|| paired.map(|(_, input)| input));
                let Some(name) = name else {
                    continue;
                };
                if name == heuristics::ASK_USER_QUESTION_TOOL && paired.is_some() {
                    continue;
                }
                if let Some(signal) =
                    heuristics::classify_tool_result(name, tool_use_id, content, input)
                {
                    signals.push(signal);
                }
            }
            _ => {}
        }
    }

    signals
}

fn find_tool_use<'m>(
    session: &'m Session,
    message: &'m Message,
    wanted: &str,
) -> Option<(&'m str, &'m serde_json::Value)> {
    std::iter::once(message)
        .chain(session.messages.iter().rev())
        .flat_map(|m| m.content.iter())
        .find_map(|block| match &block.kind {
            ContentKind::ToolUse {
                tool_use_id,
                tool_name,
                input,
            } if tool_use_id == wanted => Some((tool_name.as_str(), input)),
            _ => None,
        })
}
