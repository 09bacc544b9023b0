// Chat message model
//
// OpenAI-compatible message shapes as they travel through the relay.
// Content is either plain text or an ordered list of typed parts; the
// content filter and the output-stage builders match on those shapes
// exhaustively instead of poking at raw JSON. Fields the relay does not
// interpret (tool_calls, tool_call_id, name, ...) ride along in `extra`
// so forwarding a message never loses data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One typed element of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// `image_url` is kept as raw JSON (`{"url": ..., "detail": ...}`).
    ImageUrl { image_url: Value },
    FileUrl { file_url: Value },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// Message content: a plain string or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// `None` serializes as `null` (assistant turns that only carry tool calls).
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Create a plain-text message with no extra fields.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(MessageContent::Text(content.into())),
            extra: Map::new(),
        }
    }
}

/// True when the conversation continues after a tool result.
pub fn is_tool_follow_up(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| m.role == Role::Tool)
}

/// The inbound client payload.
///
/// `passthrough` keeps every other top-level field (temperature, tools,
/// tool_choice, ...) untouched for tool mode, where the client request is
/// forwarded with only `model`, `messages` and `stream` overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

impl GenerationRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Log summaries
// ---------------------------------------------------------------------------

/// Summarize message content for logs.
///
/// With `full` set, text is logged verbatim and part lists as JSON.
/// Otherwise text over 400 chars is cut to its first and last 200 chars,
/// and part lists are reduced to their count.
pub fn summarize_content(content: Option<&MessageContent>, full: bool) -> String {
    match content {
        None => "[empty]".to_string(),
        Some(MessageContent::Text(text)) => {
            let len = text.chars().count();
            if full || len <= 400 {
                text.clone()
            } else {
                let head: String = text.chars().take(200).collect();
                let tail: String = text.chars().skip(len - 200).collect();
                format!("{head}... (length: {len}) ...{tail}")
            }
        }
        Some(MessageContent::Parts(parts)) => {
            if full {
                serde_json::to_string(parts).unwrap_or_else(|_| "[unserializable parts]".into())
            } else {
                format!("[multi-part content, {} parts]", parts.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_round_trips_unknown_fields() {
        let raw = json!({
            "role": "tool",
            "content": "42",
            "tool_call_id": "call_1",
            "name": "calc"
        });
        let msg: ChatMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content, Some(MessageContent::Text("42".into())));
        assert_eq!(msg.extra["tool_call_id"], "call_1");
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn parts_deserialize_into_typed_variants() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "https://x/y.png", "detail": "low"}},
                {"type": "file_url", "file_url": {"url": "https://x/doc.pdf"}}
            ]
        }))
        .unwrap();

        let Some(MessageContent::Parts(parts)) = msg.content else {
            panic!("expected parts");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], ContentPart::text("what is this?"));
        assert!(matches!(&parts[1], ContentPart::ImageUrl { image_url } if image_url["detail"] == "low"));
        assert!(matches!(&parts[2], ContentPart::FileUrl { .. }));
    }

    #[test]
    fn null_content_accepted_for_tool_call_turns() {
        let msg: ChatMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{"id": "call_1", "type": "function",
                            "function": {"name": "f", "arguments": "{}"}}]
        }))
        .unwrap();
        assert!(msg.content.is_none());
        assert!(msg.extra.contains_key("tool_calls"));
    }

    #[test]
    fn unknown_role_rejected() {
        let result = serde_json::from_value::<ChatMessage>(json!({"role": "wizard", "content": "hi"}));
        assert!(result.is_err());
    }

    #[test]
    fn request_keeps_passthrough_fields() {
        let req: GenerationRequest = serde_json::from_value(json!({
            "model": "hybrid",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "temperature": 0.2,
            "tools": [{"type": "function", "function": {"name": "f"}}]
        }))
        .unwrap();

        assert!(req.is_stream());
        assert_eq!(req.passthrough["temperature"], 0.2);
        assert!(req.passthrough.contains_key("tools"));
        assert!(!req.passthrough.contains_key("messages"));
    }

    #[test]
    fn stream_defaults_to_false() {
        let req: GenerationRequest = serde_json::from_value(json!({
            "model": "hybrid",
            "messages": []
        }))
        .unwrap();
        assert!(!req.is_stream());
    }

    #[test]
    fn tool_follow_up_detected_by_tool_role() {
        let plain = vec![ChatMessage::text(Role::User, "hi")];
        assert!(!is_tool_follow_up(&plain));

        let follow_up = vec![
            ChatMessage::text(Role::User, "hi"),
            ChatMessage::text(Role::Tool, "result"),
        ];
        assert!(is_tool_follow_up(&follow_up));
    }

    #[test]
    fn long_text_summarized_unless_full() {
        let text = "a".repeat(300) + &"b".repeat(300);
        let content = MessageContent::Text(text.clone());

        let summary = summarize_content(Some(&content), false);
        assert!(summary.starts_with(&"a".repeat(200)));
        assert!(summary.contains("(length: 600)"));
        assert!(summary.ends_with(&"b".repeat(200)));

        assert_eq!(summarize_content(Some(&content), true), text);
    }

    #[test]
    fn parts_summarized_as_count() {
        let content = MessageContent::Parts(vec![ContentPart::text("a"), ContentPart::text("b")]);
        assert_eq!(
            summarize_content(Some(&content), false),
            "[multi-part content, 2 parts]"
        );
        assert_eq!(summarize_content(None, false), "[empty]");
    }
}
