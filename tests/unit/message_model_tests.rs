//! Unit tests for transcript messages and content blocks.

use homespun_orchestrator::models::message::{ContentBlock, ContentKind, Message, MessageRole};
use serde_json::json;

#[test]
fn blocks_are_ordered_by_index() {
    let message = Message::new(
        MessageRole::Assistant,
        vec![
            ContentBlock::text(2, "third"),
            ContentBlock::text(0, "first"),
            ContentBlock::tool_use(1, "tu-1", "Write", json!({})),
        ],
    );
    let indexes: Vec<u32> = message.content.iter().map(|b| b.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
}

#[test]
fn text_content_joins_text_blocks_only() {
    let message = Message::new(
        MessageRole::Assistant,
        vec![
            ContentBlock::text(0, "one"),
            ContentBlock::tool_result(1, "tu-1", "Write", "ignored"),
            ContentBlock::text(2, "two"),
        ],
    );
    assert_eq!(message.text_content(), "one\ntwo");
}

#[test]
fn tool_result_constructor_marks_success() {
    let block = ContentBlock::tool_result(0, "tu-1", "Write", "done");
    let ContentKind::ToolResult {
        tool_name,
        tool_input,
        success,
        ..
    } = block.kind
    else {
        panic!("expected a tool result");
    };
    assert_eq!(tool_name.as_deref(), Some("Write"));
    assert!(tool_input.is_none());
    assert!(success);
}

#[test]
fn content_kind_is_tagged_by_type() {
    let value = serde_json::to_value(ContentBlock::text(0, "hi")).expect("serialize");
    assert_eq!(value["index"], 0);
    assert_eq!(value["kind"]["type"], "text");
    assert_eq!(value["kind"]["text"], "hi");
}
