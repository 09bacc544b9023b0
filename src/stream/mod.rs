// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Stream reframer
//
// Responsibilities:
// - Reassemble event-stream lines across arbitrary chunk boundaries
// - Decode `data:` payloads into chat-completion chunk events
// - Surface undecodable payloads as `Malformed` instead of dropping them
// - Produce exactly one `Done` per stream
// - Rewrite forwarded chunks to the virtual model identity

mod decoder;
mod frame;
mod types;

pub use decoder::{decode_events, parse_line, SseDecoder};
pub use frame::{next_completion_id, set_delta_content, sse_frame, ChunkFramer, DONE_FRAME};
pub use types::{ChunkDelta, StreamEvent, DONE_PAYLOAD};
