//! Pending-question model.
//!
//! Mirrors the `AskUserQuestion` tool payload: an ordered set of questions,
//! each with a short header, a multi-select flag, and labelled options.

use serde::{Deserialize, Serialize};

/// A selectable answer option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    /// Display label.
    pub label: String,
    /// Optional explanation shown beside the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single question asked by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Prompt text.
    pub question: String,
    /// Short header / chip label.
    #[serde(default)]
    pub header: String,
    /// Whether more than one option may be selected.
    #[serde(default)]
    pub multi_select: bool,
    /// Offered options, in display order.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
}

/// An unresolved question set awaiting caller answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuestion {
    /// Question-set identifier.
    pub id: String,
    /// Tool-use id of the `AskUserQuestion` call that raised it.
    pub tool_use_id: String,
    /// Questions in the order they were asked.
    pub questions: Vec<Question>,
}
