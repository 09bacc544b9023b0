// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Logical events decoded from an upstream chat-completion event stream.

use serde_json::{Map, Value};

/// Payload that marks the end of an OpenAI-style event stream.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// One decoded `data:` line of an upstream event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chat-completion chunk.
    Delta(ChunkDelta),
    /// End of stream: a `[DONE]` payload, or end of body without one.
    Done,
    /// A `data:` payload that is not a chat-completion chunk object.
    Malformed { line: String },
}

/// The fields the relay reads from a chunk, plus the chunk itself so it can
/// be forwarded with everything else (tool call deltas, usage) intact.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDelta {
    /// `choices[0].delta.content`
    pub content: Option<String>,
    /// `choices[0].finish_reason`
    pub finish_reason: Option<String>,
    pub chunk: Map<String, Value>,
}

impl ChunkDelta {
    /// Build from a decoded chunk object.
    pub fn from_chunk(chunk: Map<String, Value>) -> Self {
        let choice = chunk.get("choices").and_then(|c| c.get(0));
        let content = choice
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            content,
            finish_reason,
            chunk,
        }
    }

    /// Non-empty delta content, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}
