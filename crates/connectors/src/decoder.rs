//! stream-json line decoder
//!
//! Turns one line of the agent's JSONL output into a [`StreamEvent`]. Pure:
//! no I/O, no clock, no state. Callers decide what to do with the
//! [`DecodeError`] variants; none of them are fatal to a stream.

use claudeport_protocol::{ContentBlock, Message, Role, StreamEvent, Usage};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("blank line")]
    Blank,

    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("skipped line of type `{type_name}`")]
    Skip { type_name: String },
}

impl DecodeError {
    fn skip(type_name: &str) -> Self {
        DecodeError::Skip {
            type_name: type_name.to_string(),
        }
    }

    /// Blank lines and skipped types are expected; malformed JSON is worth a warning.
    pub fn is_expected(&self) -> bool {
        !matches!(self, DecodeError::Malformed(_))
    }
}

/// Decode a single JSONL line.
pub fn decode_line(line: &str) -> Result<StreamEvent, DecodeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Blank);
    }
    let raw: Value = serde_json::from_str(trimmed)?;
    decode_value(&raw)
}

/// Decode an already-parsed JSON line.
pub fn decode_value(raw: &Value) -> Result<StreamEvent, DecodeError> {
    if !raw.is_object() {
        return Err(DecodeError::skip("<non-object>"));
    }
    let msg_type = raw.get("type").and_then(Value::as_str).unwrap_or("");

    let mut event = match msg_type {
        "user" => StreamEvent::from_message(decode_message(raw, Role::User)),
        "assistant" => StreamEvent::from_message(decode_message(raw, Role::Assistant)),
        "system" | "init" => {
            let subtype = str_field(raw, "subtype").or_else(|| {
                // A bare `{"type":"init"}` line is the init variant.
                (msg_type == "init").then(|| "init".to_string())
            });
            let mut event = StreamEvent::system("");
            event.subtype = subtype;
            event.model = str_field(raw, "model");
            event
        }
        "tool_use" => StreamEvent::from_message(Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: str_field(raw, "id")
                    .or_else(|| str_field(raw, "tool_use_id"))
                    .unwrap_or_default(),
                name: str_field(raw, "name")
                    .or_else(|| str_field(raw, "tool_name"))
                    .unwrap_or_default(),
                input: raw.get("input").cloned().unwrap_or(Value::Null),
            }],
            usage: None,
        }),
        "result" => StreamEvent::system(claudeport_protocol::event::SUBTYPE_RESULT),
        // Canonical tool results arrive nested inside user messages.
        "tool_result" => return Err(DecodeError::skip(msg_type)),
        other => return Err(DecodeError::skip(other)),
    };

    event.raw_type = msg_type.to_string();
    event.session_id = str_field(raw, "session_id").or_else(|| str_field(raw, "sessionId"));
    event.project_id = str_field(raw, "project_id").or_else(|| str_field(raw, "projectId"));
    event.uuid = str_field(raw, "uuid");
    event.timestamp = str_field(raw, "timestamp").unwrap_or_default();
    event.is_meta = raw
        .get("isMeta")
        .or_else(|| raw.get("is_meta"))
        .map(coerce_bool)
        .unwrap_or(false);

    Ok(event)
}

/// Re-encode a message into its wire shape (`{"role": .., "content": [..]}`).
pub fn encode_message(message: &Message) -> Value {
    let mut value = serde_json::json!({
        "role": message.role,
        "content": message.content,
    });
    if let Some(usage) = &message.usage {
        value["usage"] = serde_json::json!(usage);
    }
    value
}

fn decode_message(raw: &Value, role: Role) -> Message {
    let message = raw.get("message");
    let content = match message.and_then(|m| m.get("content")) {
        Some(Value::String(text)) => vec![ContentBlock::text(text.clone())],
        Some(Value::Array(blocks)) => blocks.iter().filter_map(decode_block).collect(),
        _ => Vec::new(),
    };
    let usage = message.and_then(|m| m.get("usage")).and_then(decode_usage);

    Message {
        role,
        content,
        usage,
    }
}

fn decode_block(block: &Value) -> Option<ContentBlock> {
    let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
    match block_type {
        "text" => Some(ContentBlock::Text {
            text: str_field(block, "text").unwrap_or_default(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: str_field(block, "id").unwrap_or_default(),
            name: str_field(block, "name").unwrap_or_default(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: str_field(block, "tool_use_id").unwrap_or_default(),
            content: tool_result_content(block.get("content")),
            is_error: block.get("is_error").map(coerce_bool).unwrap_or(false),
        }),
        // thinking, image, redacted blocks and anything newer
        _ => None,
    }
}

fn decode_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some(Usage {
        input_tokens: count("input_tokens"),
        output_tokens: count("output_tokens"),
        cache_creation_input_tokens: count("cache_creation_input_tokens"),
        cache_read_input_tokens: count("cache_read_input_tokens"),
    })
}

fn tool_result_content(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// The wire format sometimes encodes booleans as the string `"true"`.
fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use claudeport_protocol::event::{SUBTYPE_INIT, SUBTYPE_RESULT};
    use claudeport_protocol::EventKind;
    use serde_json::json;

    #[test]
    fn blank_lines_are_skipped() {
        assert!(matches!(decode_line(""), Err(DecodeError::Blank)));
        assert!(matches!(decode_line("   \t"), Err(DecodeError::Blank)));
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = decode_line("{not json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert!(!err.is_expected());
    }

    #[test]
    fn unknown_type_is_skip() {
        let err = decode_line(r#"{"type":"keep_alive"}"#).unwrap_err();
        match err {
            DecodeError::Skip { type_name } => assert_eq!(type_name, "keep_alive"),
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(decode_line("[1,2,3]").unwrap_err().is_expected());
    }

    #[test]
    fn assistant_text_blocks() {
        let event = decode_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello"}]}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::Assistant);
        let message = event.message.unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, vec![ContentBlock::text("Hello")]);
    }

    #[test]
    fn string_content_wraps_as_single_text_block() {
        let event = decode_line(r#"{"type":"user","message":{"role":"user","content":"fix it"}}"#)
            .unwrap();
        assert_eq!(event.kind, EventKind::User);
        assert_eq!(
            event.message.unwrap().content,
            vec![ContentBlock::text("fix it")]
        );
    }

    #[test]
    fn unknown_blocks_dropped_individually() {
        let event = decode_line(
            r#"{"type":"assistant","message":{"content":[
                {"type":"thinking","thinking":"hmm"},
                {"type":"text","text":"answer"},
                {"type":"image","source":{}}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(
            event.message.unwrap().content,
            vec![ContentBlock::text("answer")]
        );
    }

    #[test]
    fn init_line_carries_session_identity() {
        let event = decode_line(
            r#"{"type":"system","subtype":"init","session_id":"abc123","project_id":"proj1","model":"claude-sonnet"}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EventKind::System);
        assert!(event.is_subtype(SUBTYPE_INIT));
        assert!(event.is_session_init());
        assert_eq!(event.session_id.as_deref(), Some("abc123"));
        assert_eq!(event.project_id.as_deref(), Some("proj1"));
        assert_eq!(event.model.as_deref(), Some("claude-sonnet"));
    }

    #[test]
    fn non_init_system_lines_still_decode() {
        let event = decode_line(r#"{"type":"system","subtype":"compact_boundary"}"#).unwrap();
        assert_eq!(event.kind, EventKind::System);
        assert!(!event.is_session_init());
    }

    #[test]
    fn bare_init_type_defaults_subtype() {
        let event = decode_line(r#"{"type":"init","session_id":"s1"}"#).unwrap();
        assert!(event.is_session_init());
        assert_eq!(event.raw_type, "init");
    }

    #[test]
    fn legacy_tool_use_folds_into_assistant() {
        let event =
            decode_line(r#"{"type":"tool_use","id":"t9","name":"Bash","input":{"command":"ls"}}"#)
                .unwrap();
        assert_eq!(event.kind, EventKind::Assistant);
        assert_eq!(
            event.message.unwrap().content,
            vec![ContentBlock::ToolUse {
                id: "t9".into(),
                name: "Bash".into(),
                input: json!({"command": "ls"}),
            }]
        );
    }

    #[test]
    fn legacy_tool_result_yields_no_event() {
        let err = decode_line(r#"{"type":"tool_result","tool_use_id":"t1","content":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Skip { .. }));
    }

    #[test]
    fn result_lines_decode_as_result_subtype() {
        let event =
            decode_line(r#"{"type":"result","subtype":"success","is_error":false}"#).unwrap();
        assert_eq!(event.kind, EventKind::System);
        assert!(event.is_subtype(SUBTYPE_RESULT));
        assert_eq!(event.raw_type, "result");
    }

    #[test]
    fn is_error_string_coerces_to_bool() {
        let event = decode_line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"boom","is_error":"true"}]}}"#,
        )
        .unwrap();
        assert_eq!(
            event.message.unwrap().content,
            vec![ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "boom".into(),
                is_error: true,
            }]
        );

        let event = decode_line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"ok","is_error":"false"}]}}"#,
        )
        .unwrap();
        assert!(matches!(
            event.message.unwrap().content[0],
            ContentBlock::ToolResult { is_error: false, .. }
        ));
    }

    #[test]
    fn tool_result_array_content_is_joined() {
        let event = decode_line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t2","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}]}}"#,
        )
        .unwrap();
        match &event.message.unwrap().content[0] {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert_eq!(content, "a\nb");
                assert!(!is_error);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn usage_and_meta_fields() {
        let event = decode_line(
            r#"{"type":"assistant","isMeta":true,"uuid":"u-1","timestamp":"2025-01-01T00:00:00Z","message":{"content":[],"usage":{"input_tokens":10,"output_tokens":5,"cache_read_input_tokens":3}}}"#,
        )
        .unwrap();
        assert!(event.is_meta);
        assert_eq!(event.uuid.as_deref(), Some("u-1"));
        assert_eq!(event.timestamp, "2025-01-01T00:00:00Z");
        let usage = event.message.unwrap().usage.unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cache_read_input_tokens, 3);
        assert_eq!(usage.cache_creation_input_tokens, 0);
    }

    #[test]
    fn decoded_message_reencodes_to_same_blocks() {
        let wire = json!({
            "type": "assistant",
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "Writing the file"},
                    {"type": "tool_use", "id": "t1", "name": "Write", "input": {"file_path": "a.rs"}}
                ]
            }
        });
        let event = decode_value(&wire).unwrap();
        let encoded = encode_message(event.message.as_ref().unwrap());
        assert_eq!(encoded["content"], wire["message"]["content"]);

        let again = decode_value(&json!({"type": "assistant", "message": encoded})).unwrap();
        assert_eq!(again.message, event.message);
    }

    #[test]
    fn decode_is_total_over_documented_shapes() {
        let lines = [
            r#"{"type":"user","message":{"content":"x"}}"#,
            r#"{"type":"user"}"#,
            r#"{"type":"assistant","message":{"content":null}}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use"}]}}"#,
            r#"{"type":"system"}"#,
            r#"{"type":"init"}"#,
            r#"{"type":"tool_use"}"#,
            r#"{"type":"result"}"#,
        ];
        for line in lines {
            assert!(decode_line(line).is_ok(), "failed on {line}");
        }
    }
}
