//! Tool-result heuristics.
//!
//! Some backends only surface the `ToolResult` half of a tool call in
//! streamed mode. These functions infer higher-level signals (a plan file
//! was written, plan mode was exited, a question was asked) from the tool
//! name, result text, and arguments alone.
//!
//! Every function here is total and side-effect free: malformed input means
//! "no signal", never an error.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::question::{PendingQuestion, Question};

/// Tool that writes a file.
pub const WRITE_TOOL: &str = "Write";
/// Tool the agent calls to leave plan mode with a finished plan.
pub const EXIT_PLAN_MODE_TOOL: &str = "ExitPlanMode";
/// Tool the agent calls to ask the caller structured questions.
pub const ASK_USER_QUESTION_TOOL: &str = "AskUserQuestion";

/// Signal inferred from a single tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSignal {
    /// A plan file was written.
    PlanFileWritten {
        /// Path reported by the tool.
        path: String,
        /// File body, when the tool arguments carried it.
        content: Option<String>,
    },
    /// The agent left plan mode.
    ExitPlanMode {
        /// Plan text, when the tool arguments carried it.
        plan: Option<String>,
    },
    /// The agent asked a question set.
    QuestionAsked(PendingQuestion),
}

/// Plan carried by an explicit plan-pending control payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSignal {
    /// Plan text.
    pub content: String,
    /// Plan file path, when reported.
    pub file_path: Option<String>,
}

/// Classify a tool invocation by name, result text, and (optional) arguments.
#[must_use]
pub fn classify_tool_result(
    tool_name: &str,
    tool_use_id: &str,
    result_text: &str,
    input: Option<&Value>,
) -> Option<ToolSignal> {
    match tool_name {
        WRITE_TOOL => {
            let path = written_file_path(result_text, input)?;
            if !is_plan_file_path(&path) {
                return None;
            }
            let content = input.and_then(|value| string_field(value, "content"));
            Some(ToolSignal::PlanFileWritten { path, content })
        }
        EXIT_PLAN_MODE_TOOL => Some(ToolSignal::ExitPlanMode {
            plan: input.and_then(|value| string_field(value, "plan")),
        }),
        ASK_USER_QUESTION_TOOL => {
            question_from_tool_input(tool_use_id, input?).map(ToolSignal::QuestionAsked)
        }
        _ => None,
    }
}

/// Whether a path names the agent's plan document.
///
/// Matches any path with a `/plans/` segment, or a path under a directory
/// named exactly `.claude` ending in `plan.md`. Case-insensitive; both
/// separator styles are accepted.
#[must_use]
pub fn is_plan_file_path(path: &str) -> bool {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return false;
    }

    let normalized = format!("/{}", trimmed.replace('\\', "/").to_lowercase());
    if normalized.contains("/plans/") {
        return true;
    }

    if !normalized.ends_with("plan.md") {
        return false;
    }

    normalized
        .split('/')
        .rev()
        .skip(1)
        .any(|segment| segment == ".claude")
}

/// Extract the target path from a file-creation confirmation.
///
/// Returns `None` when the text is not a confirmation.
#[must_use]
pub fn extract_written_path(result_text: &str) -> Option<String> {
    confirmation_patterns().iter().find_map(|pattern| {
        pattern
            .captures(result_text)
            .and_then(|caps| caps.name("path"))
            .map(|m| clean_path(m.as_str()))
            .filter(|path| !path.is_empty())
    })
}

/// Whether a result text confirms a file write at all.
#[must_use]
pub fn is_write_confirmation(result_text: &str) -> bool {
    confirmation_patterns()
        .iter()
        .any(|pattern| pattern.is_match(result_text))
}

/// Resolve the written path from the confirmation text, falling back to the
/// tool's `file_path` argument when the text confirms a write but does not
/// name the path in a recognisable shape.
#[must_use]
pub fn written_file_path(result_text: &str, input: Option<&Value>) -> Option<String> {
    if let Some(path) = extract_written_path(result_text) {
        return Some(path);
    }
    if is_write_confirmation(result_text) {
        return input.and_then(|value| string_field(value, "file_path"));
    }
    None
}

/// Build a pending question from `AskUserQuestion` tool arguments.
#[must_use]
pub fn question_from_tool_input(tool_use_id: &str, input: &Value) -> Option<PendingQuestion> {
    let payload: QuestionPayload = serde_json::from_value(input.clone()).ok()?;
    payload.into_pending(Some(tool_use_id))
}

/// Parse an explicit question-pending control payload.
#[must_use]
pub fn parse_question_payload(payload: &str) -> Option<PendingQuestion> {
    let parsed: QuestionPayload = serde_json::from_str(payload).ok()?;
    parsed.into_pending(None)
}

/// Parse an explicit plan-pending control payload.
#[must_use]
pub fn parse_plan_payload(payload: &str) -> Option<PlanSignal> {
    let parsed: PlanPayload = serde_json::from_str(payload).ok()?;
    if parsed.plan.trim().is_empty() {
        return None;
    }
    Some(PlanSignal {
        content: parsed.plan,
        file_path: parsed.plan_file_path.filter(|p| !p.trim().is_empty()),
    })
}

// ── Private helpers ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionPayload {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "tool_use_id")]
    tool_use_id: Option<String>,
    questions: Vec<Question>,
}

impl QuestionPayload {
    fn into_pending(self, tool_use_id: Option<&str>) -> Option<PendingQuestion> {
        if self.questions.is_empty()
            || self.questions.iter().any(|q| q.question.trim().is_empty())
        {
            return None;
        }
        let tool_use_id = tool_use_id
            .map(str::to_owned)
            .or(self.tool_use_id)
            .unwrap_or_default();
        Some(PendingQuestion {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            tool_use_id,
            questions: self.questions,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanPayload {
    #[serde(alias = "content")]
    plan: String,
    #[serde(default, alias = "plan_file_path")]
    plan_file_path: Option<String>,
}

fn confirmation_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)file (?:created|written) successfully at:?\s*(?P<path>[^\r\n]+)",
            r"(?i)the file (?P<path>\S+) has been (?:created|updated|written|overwritten)",
            r"(?i)successfully wrote (?:\d+ \w+ )?to (?P<path>\S+)",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

fn clean_path(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .trim_end_matches('.')
        .to_owned()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_owned)
}
