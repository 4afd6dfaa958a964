//! Transcript message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Caller-authored turn.
    User,
    /// Agent-authored turn.
    Assistant,
}

/// Type-specific payload of a content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentKind {
    /// Plain text.
    Text {
        /// Text body.
        text: String,
    },
    /// Model reasoning text.
    Thinking {
        /// Reasoning body.
        text: String,
    },
    /// Tool invocation issued by the agent.
    ToolUse {
        /// Correlation id shared with the matching [`ContentKind::ToolResult`].
        tool_use_id: String,
        /// Tool name (e.g. `Write`, `ExitPlanMode`).
        tool_name: String,
        /// Tool arguments.
        input: Value,
    },
    /// Outcome of a tool invocation.
    ToolResult {
        /// Correlation id of the originating tool use.
        tool_use_id: String,
        /// Name of the originating tool, when the backend reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        /// Arguments of the originating tool, when the backend reports them.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_input: Option<Value>,
        /// Result text.
        content: String,
        /// Whether the tool succeeded.
        success: bool,
    },
}

/// One content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentBlock {
    /// Position used to interleave blocks.
    pub index: u32,
    /// Block payload.
    pub kind: ContentKind,
}

impl ContentBlock {
    /// Build a text block.
    #[must_use]
    pub fn text(index: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            kind: ContentKind::Text { text: text.into() },
        }
    }

    /// Build a tool-use block.
    #[must_use]
    pub fn tool_use(
        index: u32,
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            index,
            kind: ContentKind::ToolUse {
                tool_use_id: tool_use_id.into(),
                tool_name: tool_name.into(),
                input,
            },
        }
    }

    /// Build a successful tool-result block carrying its originating tool name.
    #[must_use]
    pub fn tool_result(
        index: u32,
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            index,
            kind: ContentKind::ToolResult {
                tool_use_id: tool_use_id.into(),
                tool_name: Some(tool_name.into()),
                tool_input: None,
                content: content.into(),
                success: true,
            },
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Message author.
    pub role: MessageRole,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Content blocks ordered by [`ContentBlock::index`].
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Construct a message, sorting its blocks by index.
    #[must_use]
    pub fn new(role: MessageRole, mut content: Vec<ContentBlock>) -> Self {
        content.sort_by_key(|block| block.index);
        Self {
            role,
            created_at: Utc::now(),
            content,
        }
    }

    /// Construct a single-block text message.
    #[must_use]
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentBlock::text(0, text)])
    }

    /// Concatenated text of all `Text` blocks.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match &block.kind {
                ContentKind::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
