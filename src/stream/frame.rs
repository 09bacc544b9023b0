// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Outgoing chunk framing
//
// Every chunk the client sees carries the virtual model identity, whichever
// upstream produced it. One framer lives per client response so all of its
// chunks share a completion id and creation time.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde_json::{json, Map, Value};

/// Event-stream terminator frame.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

static COMPLETION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a completion id of the form `{prefix}-{unix_millis}-{seq}`.
///
/// Ids are unique and increasing within the process.
pub fn next_completion_id(prefix: &str) -> String {
    let seq = COMPLETION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{seq}", chrono::Utc::now().timestamp_millis())
}

/// Serialize a chunk as one event-stream frame.
pub fn sse_frame(chunk: &Value) -> Bytes {
    Bytes::from(format!("data: {chunk}\n\n"))
}

/// Builds and rewrites chunks for one client response.
#[derive(Debug, Clone)]
pub struct ChunkFramer {
    model: String,
    id: String,
    created: i64,
}

impl ChunkFramer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: next_completion_id("chatcmpl"),
            created: chrono::Utc::now().timestamp(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Rewrite an upstream chunk to the virtual identity.
    ///
    /// `model` is always replaced. A non-empty upstream `id` and a numeric
    /// `created` are kept; missing or blank ones are filled from the framer.
    pub fn reframe(&self, mut chunk: Map<String, Value>) -> Map<String, Value> {
        let keep_id = chunk
            .get("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.trim().is_empty());
        if !keep_id {
            chunk.insert("id".into(), Value::String(self.id.clone()));
        }
        if !chunk.get("created").is_some_and(Value::is_number) {
            chunk.insert("created".into(), json!(self.created));
        }
        chunk.insert("object".into(), json!("chat.completion.chunk"));
        chunk.insert("model".into(), Value::String(self.model.clone()));
        chunk
    }

    /// A synthetic single-choice content chunk.
    pub fn content_chunk(&self, content: &str, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": { "content": content },
                "finish_reason": finish_reason,
            }]
        })
    }

    /// A terminal chunk carrying a visible error message.
    pub fn error_chunk(&self, message: &str) -> Value {
        let mut chunk = self.content_chunk(message, Some("error"));
        chunk["id"] = json!(next_completion_id("chatcmpl-err"));
        chunk
    }
}

/// Replace `choices[0].delta.content`, creating the path if it is missing.
pub fn set_delta_content(chunk: &mut Map<String, Value>, content: String) {
    let choices = chunk
        .entry("choices")
        .or_insert_with(|| json!([{ "index": 0, "delta": {}, "finish_reason": null }]));
    if !choices.is_array() || choices.as_array().is_some_and(Vec::is_empty) {
        *choices = json!([{ "index": 0, "delta": {}, "finish_reason": null }]);
    }
    let choice = &mut choices[0];
    if !choice.is_object() {
        *choice = json!({ "index": 0, "delta": {}, "finish_reason": null });
    }
    if !choice.get("delta").is_some_and(Value::is_object) {
        choice["delta"] = json!({});
    }
    choice["delta"]["content"] = Value::String(content);
}
