//! Message and content block types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content.
///
/// Serialized with the same `type` tag and field names the agent uses on the
/// wire, so a decoded message re-encodes to an equivalent block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Token usage reported on a single message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

/// A user or assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    /// Build a message holding a single text block.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(text)],
            usage: None,
        }
    }

    /// Concatenate every text block, separated by newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, .. } => Some((id.as_str(), name.as_str())),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_blocks_serialize_with_wire_tags() {
        let blocks = vec![
            ContentBlock::text("hi"),
            ContentBlock::ToolUse {
                id: "t1".into(),
                name: "Write".into(),
                input: json!({"file_path": "/tmp/a"}),
            },
            ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "ok".into(),
                is_error: false,
            },
        ];

        let value = serde_json::to_value(&blocks).unwrap();
        assert_eq!(
            value,
            json!([
                {"type": "text", "text": "hi"},
                {"type": "tool_use", "id": "t1", "name": "Write", "input": {"file_path": "/tmp/a"}},
                {"type": "tool_result", "tool_use_id": "t1", "content": "ok", "is_error": false}
            ])
        );
    }

    #[test]
    fn text_content_skips_tool_blocks() {
        let message = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::text("one"),
                ContentBlock::ToolUse {
                    id: "t".into(),
                    name: "Bash".into(),
                    input: Value::Null,
                },
                ContentBlock::text("two"),
            ],
            usage: None,
        };
        assert_eq!(message.text_content(), "one\ntwo");
        assert_eq!(message.tool_uses().collect::<Vec<_>>(), vec![("t", "Bash")]);
    }
}
