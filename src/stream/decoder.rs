// Event-stream decoder
//
// Turns an upstream body, delivered in arbitrary byte chunks, into a lazy
// sequence of `StreamEvent`s. Lines are reassembled across chunk
// boundaries before parsing. The sequence ends after the first `Done` or
// `Malformed` event, or after a transport error; `Done` is produced at most
// once, including when the body ends without a `[DONE]` payload.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;

use super::types::{ChunkDelta, StreamEvent, DONE_PAYLOAD};

/// Incremental line decoder. Feed it chunks with [`push`](Self::push) and
/// call [`finish`](Self::finish) at end of body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    terminated: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `Done` or `Malformed` has been produced.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Append a chunk and decode every complete line in the buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if self.accept(&line, &mut events) {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Decode any trailing partial line and close the stream.
    ///
    /// Returns `Done` unless the stream already terminated. Calling it again
    /// returns nothing.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.terminated {
            return events;
        }
        let rest = std::mem::take(&mut self.buffer);
        if !self.accept(&rest, &mut events) {
            self.terminated = true;
            events.push(StreamEvent::Done);
        }
        events
    }

    /// Parse one line into `events`. Returns true if the line ended the stream.
    fn accept(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) -> bool {
        // A complete line cannot end inside a multi-byte character.
        let line = String::from_utf8_lossy(line);
        match parse_line(&line) {
            Some(event) => {
                let ends = !matches!(event, StreamEvent::Delta(_));
                events.push(event);
                if ends {
                    self.terminated = true;
                }
                ends
            }
            None => false,
        }
    }
}

/// Parse a single event-stream line.
///
/// Blank lines, comments (`:`) and non-`data` fields (`event:`, `id:`,
/// `retry:`) yield `None`.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let payload = trimmed.strip_prefix("data:")?.trim();
    if payload == DONE_PAYLOAD {
        return Some(StreamEvent::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(chunk)) => Some(StreamEvent::Delta(ChunkDelta::from_chunk(chunk))),
        _ => Some(StreamEvent::Malformed {
            line: trimmed.to_string(),
        }),
    }
}

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    exhausted: bool,
}

/// Decode an upstream body into a finite, non-restartable event sequence.
///
/// A transport error is yielded once and ends the sequence.
pub fn decode_events<S, E>(body: S) -> impl Stream<Item = Result<StreamEvent, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: Send,
{
    let state = DecodeState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.exhausted {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.exhausted = true;
                    return Some((Err(e), state));
                }
                None => {
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                    state.exhausted = true;
                }
            }

            if state.decoder.is_terminated() {
                state.exhausted = true;
            }
        }
    })
}
