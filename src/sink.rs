// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Client response sink
//
// The outgoing response is committed exactly once, either as a JSON body or
// as an event stream. The pipeline writes through the sink, and the task
// registry writes the supersession notice through the same sink, so every
// operation is synchronous and guarded by a short lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::stream::{sse_frame, DONE_FRAME};

type Frame = Result<Bytes, std::io::Error>;

/// What the HTTP handler returns once the pipeline commits the response.
pub enum ClientResponse {
    Stream(UnboundedReceiverStream<Frame>),
    Json { status: StatusCode, body: Value },
}

impl IntoResponse for ClientResponse {
    fn into_response(self) -> Response {
        match self {
            ClientResponse::Json { status, body } => (status, axum::Json(body)).into_response(),
            ClientResponse::Stream(frames) => {
                let mut response = Response::new(Body::from_stream(frames));
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
                headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
                response
            }
        }
    }
}

#[derive(Debug)]
struct SinkState {
    commit: Option<oneshot::Sender<ClientResponse>>,
    frames: Option<mpsc::UnboundedSender<Frame>>,
    headers_sent: bool,
    open: bool,
}

impl std::fmt::Debug for ClientResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientResponse::Stream(_) => f.write_str("ClientResponse::Stream"),
            ClientResponse::Json { status, .. } => write!(f, "ClientResponse::Json({status})"),
        }
    }
}

/// Commit-once writer for one client response.
#[derive(Debug)]
pub struct ClientSink {
    state: Mutex<SinkState>,
}

impl ClientSink {
    /// Create a sink and the receiver the HTTP handler awaits.
    ///
    /// If the sink is closed before anything is committed, the receiver
    /// resolves to an error.
    pub fn channel() -> (Self, oneshot::Receiver<ClientResponse>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            state: Mutex::new(SinkState {
                commit: Some(tx),
                frames: None,
                headers_sent: false,
                open: true,
            }),
        };
        (sink, rx)
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once a response (stream or JSON) has been committed.
    pub fn headers_sent(&self) -> bool {
        self.lock().headers_sent
    }

    /// True while the sink accepts writes and the client is still reading.
    pub fn is_open(&self) -> bool {
        let state = self.lock();
        state.open && state.frames.as_ref().map_or(true, |tx| !tx.is_closed())
    }

    /// Commit the response as an event stream. Idempotent.
    ///
    /// Returns false if the sink is closed or was committed as JSON.
    pub fn open_stream(&self) -> bool {
        let mut state = self.lock();
        if !state.open {
            return false;
        }
        if state.frames.is_some() {
            return true;
        }
        let Some(commit) = state.commit.take() else {
            return false;
        };

        let (tx, rx) = mpsc::unbounded_channel();
        state.headers_sent = true;
        if commit.send(ClientResponse::Stream(UnboundedReceiverStream::new(rx))).is_err() {
            state.open = false;
            return false;
        }
        state.frames = Some(tx);
        true
    }

    /// Commit a JSON response and close the sink. Ignored once committed.
    pub fn send_json(&self, status: StatusCode, body: Value) {
        let mut state = self.lock();
        if !state.open {
            return;
        }
        if let Some(commit) = state.commit.take() {
            state.headers_sent = true;
            let _ = commit.send(ClientResponse::Json { status, body });
            state.open = false;
        }
    }

    /// Write one chunk as an event-stream frame.
    pub fn write_chunk(&self, chunk: &Value) -> bool {
        self.write_raw(sse_frame(chunk))
    }

    /// Write pre-framed bytes. Returns false if nothing was written.
    pub fn write_raw(&self, bytes: Bytes) -> bool {
        let mut state = self.lock();
        Self::send_frame(&mut state, bytes)
    }

    /// Write the stream terminator once and close.
    ///
    /// A sink committed as a stream gets `data: [DONE]`; later calls are no-ops.
    pub fn finish(&self) {
        let mut state = self.lock();
        Self::send_frame(&mut state, Bytes::from_static(DONE_FRAME));
        Self::shut(&mut state);
    }

    /// Close without writing anything further.
    pub fn close(&self) {
        let mut state = self.lock();
        Self::shut(&mut state);
    }

    fn send_frame(state: &mut SinkState, bytes: Bytes) -> bool {
        if !state.open {
            return false;
        }
        let Some(tx) = state.frames.as_ref() else {
            return false;
        };
        if tx.send(Ok(bytes)).is_err() {
            // client went away
            Self::shut(state);
            return false;
        }
        true
    }

    fn shut(state: &mut SinkState) {
        state.open = false;
        state.frames = None;
        state.commit = None;
    }
}
