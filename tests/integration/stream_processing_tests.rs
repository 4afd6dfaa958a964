//! End-to-end event-stream processing through the orchestrator.

use homespun_orchestrator::backend::BackendEvent;
use homespun_orchestrator::models::message::{ContentBlock, ContentKind, MessageRole};
use homespun_orchestrator::models::session::{SessionMode, SessionStatus};
use homespun_orchestrator::orchestrator::broadcast::{Audience, StatusBroadcast};
use homespun_orchestrator::persistence::message_log::MessageLog;
use homespun_orchestrator::AppError;
use serde_json::json;
use tokio::sync::broadcast::Receiver;

use super::test_helpers::{
    ask_question, assistant, assistant_text, exit_plan_mode, finished, options,
    options_with_prompt, orchestrator, started, write_file, Call, MockBackend, Script,
};

const PLAN_PATH: &str = "/work/issue-42/.claude/plans/auth-refactor.md";

fn unscoped_statuses(rx: &mut Receiver<StatusBroadcast>) -> Vec<SessionStatus> {
    let mut statuses = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        if signal.audience == Audience::All {
            statuses.push(signal.status);
        }
    }
    statuses
}

// ── Plan capture ──────────────────────────────────────────────

#[tokio::test]
async fn plan_write_then_exit_plan_mode_waits_for_execution() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        write_file(
            "tu-1",
            PLAN_PATH,
            json!({ "file_path": PLAN_PATH, "content": "# Plan\n1. Extract module" }),
        ),
        exit_plan_mode("tu-2", None),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Plan, "plan the refactor"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForPlanExecution);
    assert_eq!(session.plan_file_path.as_deref(), Some(PLAN_PATH));
    assert_eq!(session.plan_content.as_deref(), Some("# Plan\n1. Extract module"));
    assert_eq!(session.backend_session_id.as_deref(), Some("b-1"));
    assert_eq!(session.conversation_id.as_deref(), Some("conv-1"));

    // user turn, two tool messages, synthetic plan message
    assert_eq!(session.messages.len(), 4);
    let last = session.messages.last().expect("plan message");
    assert_eq!(last.role, MessageRole::Assistant);
    assert_eq!(last.text_content(), "# Plan\n1. Extract module");
}

#[tokio::test]
async fn plan_body_is_fetched_from_agent_when_not_streamed() {
    let backend = MockBackend::new();
    backend.put_file(PLAN_PATH, "# Fetched plan");
    backend.script(vec![
        started("b-1", None),
        write_file("tu-1", PLAN_PATH, json!({ "file_path": PLAN_PATH })),
        exit_plan_mode("tu-2", None),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Plan, "plan it"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForPlanExecution);
    assert_eq!(session.plan_content.as_deref(), Some("# Fetched plan"));
    assert!(backend
        .calls()
        .contains(&Call::ReadFile("b-1".into(), PLAN_PATH.into())));
}

#[tokio::test]
async fn exit_plan_mode_argument_supplies_plan() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        exit_plan_mode("tu-2", Some("1. inline plan")),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Plan, "plan it"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForPlanExecution);
    assert_eq!(session.plan_content.as_deref(), Some("1. inline plan"));
    assert!(session.plan_file_path.is_none());
}

#[tokio::test]
async fn exit_plan_mode_in_build_mode_is_ignored() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        exit_plan_mode("tu-2", Some("1. plan")),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "build it"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForInput);
    assert!(session.plan_content.is_none());
}

#[tokio::test]
async fn write_outside_plan_directory_does_not_set_plan_path() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        write_file(
            "tu-1",
            "/work/issue-42/src/lib.rs",
            json!({ "file_path": "/work/issue-42/src/lib.rs", "content": "fn main() {}" }),
        ),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Plan, "go"))
        .await
        .expect("start");

    assert!(session.plan_file_path.is_none());
    assert!(session.plan_content.is_none());
    assert_eq!(session.status, SessionStatus::WaitingForInput);
}

#[tokio::test]
async fn explicit_plan_payload_wins_over_heuristics() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        BackendEvent::PlanPending {
            payload: json!({ "plan": "explicit plan", "planFilePath": PLAN_PATH }).to_string(),
        },
        exit_plan_mode("tu-2", Some("heuristic plan")),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Plan, "plan it"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForPlanExecution);
    assert_eq!(session.plan_content.as_deref(), Some("explicit plan"));
    assert_eq!(session.plan_file_path.as_deref(), Some(PLAN_PATH));
}

// ── Questions ─────────────────────────────────────────────────

#[tokio::test]
async fn ask_user_question_waits_for_answer() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        ask_question("tu-q", "Which database?"),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "set up storage"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForQuestionAnswer);
    let pending = session.pending_question.expect("pending question");
    assert_eq!(pending.tool_use_id, "tu-q");
    assert_eq!(pending.questions[0].question, "Which database?");
}

#[tokio::test]
async fn question_is_inferred_from_a_lone_tool_result() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        assistant(vec![ContentBlock {
            index: 0,
            kind: ContentKind::ToolResult {
                tool_use_id: "tu-q".into(),
                tool_name: Some("AskUserQuestion".into()),
                tool_input: Some(json!({ "questions": [{ "question": "Which cache?" }] })),
                content: String::new(),
                success: true,
            },
        }]),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "go"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForQuestionAnswer);
    let pending = session.pending_question.expect("pending question");
    assert_eq!(pending.tool_use_id, "tu-q");
}

#[tokio::test]
async fn explicit_question_payload_is_not_replaced_by_heuristic() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        BackendEvent::QuestionPending {
            payload: json!({
                "id": "q-explicit",
                "toolUseId": "tu-explicit",
                "questions": [{ "question": "Ship it?" }]
            })
            .to_string(),
        },
        ask_question("tu-q", "Which database?"),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "go"))
        .await
        .expect("start");

    let pending = session.pending_question.expect("pending question");
    assert_eq!(pending.id, "q-explicit");
    assert_eq!(session.status, SessionStatus::WaitingForQuestionAnswer);
}

#[tokio::test]
async fn question_takes_priority_over_plan_in_same_turn() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        ask_question("tu-q", "Which approach?"),
        exit_plan_mode("tu-2", Some("1. plan")),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Plan, "plan"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForQuestionAnswer);
    assert_eq!(session.plan_content.as_deref(), Some("1. plan"));
    assert!(session.pending_question.is_some());
}

#[tokio::test]
async fn malformed_control_payloads_are_ignored() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        BackendEvent::QuestionPending {
            payload: "not json".into(),
        },
        BackendEvent::PlanPending {
            payload: "{}".into(),
        },
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Plan, "go"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForInput);
    assert!(session.pending_question.is_none());
    assert!(session.plan_content.is_none());
}

// ── Status broadcasts ─────────────────────────────────────────

#[tokio::test]
async fn running_is_broadcast_before_terminal_status() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        assistant_text("done"),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;
    let mut rx = orch.subscribe();

    orch.start_session(options_with_prompt(SessionMode::Build, "hello"))
        .await
        .expect("start");

    assert_eq!(
        unscoped_statuses(&mut rx),
        vec![
            SessionStatus::Starting,
            SessionStatus::Running,
            SessionStatus::WaitingForInput
        ]
    );
}

#[tokio::test]
async fn every_status_is_also_scoped_to_the_session() {
    let backend = MockBackend::new();
    backend.script(vec![started("b-1", None), finished("conv-1")]);
    let (orch, _) = orchestrator(&backend).await;
    let mut rx = orch.subscribe();

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "hello"))
        .await
        .expect("start");

    let mut unscoped = 0;
    let mut scoped = 0;
    while let Ok(signal) = rx.try_recv() {
        match signal.audience {
            Audience::All => unscoped += 1,
            Audience::Session(id) => {
                assert_eq!(id, session.id);
                scoped += 1;
            }
        }
    }
    assert_eq!(unscoped, scoped);
    assert!(unscoped >= 3);
}

// ── Routing ───────────────────────────────────────────────────

#[tokio::test]
async fn follow_up_message_reuses_backend_session() {
    let backend = MockBackend::new();
    backend.script(vec![started("b-1", None), finished("conv-1")]);
    backend.script(vec![assistant_text("second answer"), finished("conv-2")]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "first"))
        .await
        .expect("start");
    let session = orch
        .send_message(&session.id, "second")
        .await
        .expect("send");

    let sends = backend.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].backend_session_id, "b-1");
    assert_eq!(sends[0].message, "second");
    assert_eq!(sends[0].permission_mode.as_deref(), Some("bypassPermissions"));
    assert_eq!(session.conversation_id.as_deref(), Some("conv-2"));
    assert_eq!(session.status, SessionStatus::WaitingForInput);
}

#[tokio::test]
async fn first_message_without_prompt_starts_backend_session() {
    let backend = MockBackend::new();
    backend.script(vec![started("b-7", Some("conv-7")), finished("conv-7")]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options(SessionMode::Plan))
        .await
        .expect("start");
    assert!(backend.calls().is_empty());

    let session = orch
        .send_message(&session.id, "hello")
        .await
        .expect("send");

    let starts = backend.starts();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].prompt, "hello");
    assert_eq!(starts[0].resume_id, None);
    assert_eq!(starts[0].permission_mode.as_deref(), Some("plan"));
    assert_eq!(session.backend_session_id.as_deref(), Some("b-7"));
}

// ── Errors ────────────────────────────────────────────────────

#[tokio::test]
async fn session_not_found_drops_linkage_and_next_send_resumes() {
    let backend = MockBackend::new();
    backend.script(vec![started("b-1", None), finished("conv-1")]);
    backend.script(vec![BackendEvent::Error {
        code: "session_not_found".into(),
        message: "unknown session b-1".into(),
        recoverable: false,
    }]);
    backend.script(vec![started("b-2", None), finished("conv-3")]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "first"))
        .await
        .expect("start");
    let session = orch
        .send_message(&session.id, "second")
        .await
        .expect("send is handled");

    assert_eq!(session.status, SessionStatus::Error);
    assert!(session.backend_session_id.is_none());
    assert_eq!(session.conversation_id.as_deref(), Some("conv-1"));

    let session = orch
        .send_message(&session.id, "third")
        .await
        .expect("resend");
    let starts = backend.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].resume_id.as_deref(), Some("conv-1"));
    assert_eq!(session.backend_session_id.as_deref(), Some("b-2"));
    assert_eq!(session.status, SessionStatus::WaitingForInput);
}

#[tokio::test]
async fn fatal_backend_error_fails_the_turn() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        BackendEvent::Error {
            code: "overloaded".into(),
            message: "try later".into(),
            recoverable: false,
        },
        assistant_text("never applied"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let err = orch
        .start_session(options_with_prompt(SessionMode::Build, "go"))
        .await
        .expect_err("fatal error");
    assert!(matches!(err, AppError::Backend(msg) if msg.contains("overloaded")));

    let session = orch
        .sessions_for_entity("issue-42")
        .await
        .pop()
        .expect("session kept");
    assert_eq!(session.status, SessionStatus::Error);
    assert!(!session
        .messages
        .iter()
        .any(|m| m.text_content() == "never applied"));
}

#[tokio::test]
async fn recoverable_error_keeps_draining() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        BackendEvent::Error {
            code: "rate_limited".into(),
            message: "slow down".into(),
            recoverable: true,
        },
        assistant_text("still here"),
        finished("conv-1"),
    ]);
    let (orch, _) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "go"))
        .await
        .expect("start");

    assert_eq!(session.status, SessionStatus::WaitingForInput);
    assert_eq!(
        session.messages.last().expect("message").text_content(),
        "still here"
    );
}

#[tokio::test]
async fn transport_error_marks_session_failed() {
    let backend = MockBackend::new();
    backend.script_raw(Script::Events(vec![
        Ok(started("b-1", None)),
        Err(AppError::Backend("pipe closed".into())),
    ]));
    let (orch, _) = orchestrator(&backend).await;

    let err = orch
        .start_session(options_with_prompt(SessionMode::Build, "go"))
        .await
        .expect_err("transport error");
    assert!(matches!(err, AppError::Backend(_)));

    let session = orch
        .sessions_for_project("proj-1")
        .await
        .pop()
        .expect("session kept");
    assert_eq!(session.status, SessionStatus::Error);
}

#[tokio::test]
async fn refused_start_leaves_session_in_error() {
    let backend = MockBackend::new();
    backend.script_raw(Script::Fail("no capacity".into()));
    let (orch, _) = orchestrator(&backend).await;

    let err = orch
        .start_session(options_with_prompt(SessionMode::Build, "go"))
        .await
        .expect_err("start refused");
    assert!(matches!(err, AppError::Backend(msg) if msg == "no capacity"));

    let session = orch
        .sessions_for_entity("issue-42")
        .await
        .pop()
        .expect("session kept");
    assert_eq!(session.status, SessionStatus::Error);
    assert!(!orch.is_running(&session.id));
}

// ── Persistence ───────────────────────────────────────────────

#[tokio::test]
async fn transcript_is_mirrored_to_message_log() {
    let backend = MockBackend::new();
    backend.script(vec![
        started("b-1", None),
        assistant_text("one"),
        assistant_text("two"),
        finished("conv-1"),
    ]);
    let (orch, log) = orchestrator(&backend).await;

    let session = orch
        .start_session(options_with_prompt(SessionMode::Build, "go"))
        .await
        .expect("start");

    let stored = log.get_messages(&session.id).await.expect("read log");
    assert_eq!(stored.len(), session.messages.len());
    assert_eq!(stored[0].role, MessageRole::User);
    assert_eq!(stored[0].text_content(), "go");
    assert_eq!(stored[2].text_content(), "two");
}
