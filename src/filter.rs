// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Content filter
//
// Strips embedded image payloads from a conversation before it is sent to a
// model that cannot accept them. Inline base64 data URIs inside text are
// replaced by a marker; `image_url` parts become marker text parts. Pure:
// the input is never mutated.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::message::{ChatMessage, ContentPart, MessageContent};

/// Replaces an inline base64 image found inside text content.
pub const INLINE_IMAGE_MARKER: &str = "[image content filtered]";

/// Replaces an `image_url` content part.
pub const IMAGE_PART_MARKER: &str = "[image URL filtered]";

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data:image/[^;]+;base64,[^\s"]+"#).expect("data URI pattern compiles")
});

/// Filter image payloads out of `messages` unless `allow_binary` is set.
///
/// With `allow_binary` the input is handed back borrowed and untouched.
/// Filtering is idempotent: markers never match the patterns they replace.
pub fn filter_binary_content(messages: &[ChatMessage], allow_binary: bool) -> Cow<'_, [ChatMessage]> {
    if allow_binary {
        return Cow::Borrowed(messages);
    }
    Cow::Owned(messages.iter().map(filter_message).collect())
}

fn filter_message(message: &ChatMessage) -> ChatMessage {
    let content = match &message.content {
        None => None,
        Some(MessageContent::Text(text)) => Some(MessageContent::Text(redact_inline_images(text))),
        Some(MessageContent::Parts(parts)) => Some(MessageContent::Parts(
            parts.iter().map(filter_part).collect(),
        )),
    };

    ChatMessage {
        role: message.role,
        content,
        extra: message.extra.clone(),
    }
}

fn filter_part(part: &ContentPart) -> ContentPart {
    match part {
        ContentPart::ImageUrl { .. } => ContentPart::text(IMAGE_PART_MARKER),
        ContentPart::Text { .. } | ContentPart::FileUrl { .. } => part.clone(),
    }
}

fn redact_inline_images(text: &str) -> String {
    if !text.contains("data:image/") {
        return text.to_string();
    }
    DATA_URI.replace_all(text, INLINE_IMAGE_MARKER).into_owned()
}
