//! Answering a pending agent question.

use std::collections::HashMap;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::message::{Message, MessageRole};
use crate::models::question::PendingQuestion;
use crate::models::session::{Session, SessionStatus};
use crate::orchestrator::service::SessionOrchestrator;
use crate::orchestrator::stream_processor::set_status;
use crate::{AppError, Result};

const ANSWER_PREAMBLE: &str = "Here are my answers to your questions:";

impl SessionOrchestrator {
    /// Resolve the pending question with answers keyed by question text.
    ///
    /// A linked session hands the answers to the backend, which resumes the
    /// blocked turn. Without linkage the answers are formatted as a plain
    /// message and sent as the next turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for an unknown session,
    /// [`AppError::Precondition`] when no question is pending, or
    /// [`AppError::Backend`] if the backend declines the answers.
    pub async fn answer_question(
        &self,
        session_id: &str,
        answers: HashMap<String, String>,
    ) -> Result<Session> {
        let span = info_span!("answer_question", session_id, answers = answers.len());
        async move {
            let handle = self.handle(session_id)?;

            let (pending, backend_session_id) = {
                let session = handle.lock().await;
                let Some(pending) = session.pending_question.clone() else {
                    return Err(AppError::Precondition(format!(
                        "session '{session_id}' has no pending question"
                    )));
                };
                (pending, session.backend_session_id.clone())
            };
            let formatted = format_answers(&pending, &answers);

            let Some(backend_id) = backend_session_id else {
                let run = self.begin_run(session_id)?;
                handle.lock().await.pending_question = None;
                debug!(
                    question_id = %pending.id,
                    "no backend linkage; sending answers as a message"
                );
                self.drive(&handle, &run, formatted).await?;
                let snapshot = handle.lock().await.clone();
                return Ok(snapshot);
            };

            let resolved = self.backend.answer_question(&backend_id, answers).await?;
            if !resolved {
                warn!(question_id = %pending.id, "backend declined answers");
                return Err(AppError::Backend(format!(
                    "backend did not accept answers for session '{session_id}'"
                )));
            }

            let user_turn = Message::text(MessageRole::User, formatted);
            let snapshot = {
                let mut session = handle.lock().await;
                session.pending_question = None;
                session.push_message(user_turn.clone());
                set_status(&self.hub, &mut session, SessionStatus::Running);
                session.clone()
            };
            if let Err(err) = self.log.append(session_id, &user_turn).await {
                warn!(%err, "failed to append message to log");
            }
            info!(question_id = %pending.id, "question answered");
            Ok(snapshot)
        }
        .instrument(span)
        .await
    }
}

/// Render answers as the user turn sent in place of a native answer.
///
/// Questions appear in the order they were asked; unanswered questions are
/// skipped and answers to unknown questions follow in key order.
#[must_use]
pub fn format_answers(pending: &PendingQuestion, answers: &HashMap<String, String>) -> String {
    let mut out = String::from(ANSWER_PREAMBLE);
    out.push('\n');

    for question in &pending.questions {
        if let Some(answer) = answers.get(&question.question) {
            out.push_str(&format!("\n**{}**\n{answer}\n", question.question));
        }
    }

    let mut extra: Vec<(&String, &String)> = answers
        .iter()
        .filter(|(key, _)| !pending.questions.iter().any(|q| &q.question == *key))
        .collect();
    extra.sort();
    for (question, answer) in extra {
        out.push_str(&format!("\n**{question}**\n{answer}\n"));
    }

    out.trim_end().to_owned()
}
