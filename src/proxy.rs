// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - Bearer-token check against the configured client key
// - Body read and request parsing
// - Hand generation requests to the engine and await the committed response
// - Health probe passthrough
// - 501 for file uploads, 404 for unknown paths

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, FromRequest, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::engine::{RelayEngine, RelayError};
use crate::message::GenerationRequest;
use crate::sink::ClientSink;

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RelayEngine>,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// True if `Authorization: Bearer <token>` carries the expected key.
pub fn is_authorized(headers: &HeaderMap, api_key: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == api_key)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /v1/chat/completions
pub async fn chat_completions(State(state): State<AppState>, request: Request<Body>) -> Response {
    let engine = &state.engine;
    if !is_authorized(request.headers(), &engine.config().api_key) {
        tracing::warn!("rejected request with missing or invalid API key");
        return RelayError::Unauthorized.into_response();
    }

    // The body is only read once the caller is authenticated.
    let body = match Bytes::from_request(request, &state).await {
        Ok(b) => b,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::warn!(limit = MAX_BODY_BYTES, "rejected oversized request body");
            return RelayError::PayloadTooLarge(MAX_BODY_BYTES).into_response();
        }
        Err(rejection) => return RelayError::UnreadableBody(rejection.body_text()).into_response(),
    };

    if body.is_empty() {
        return RelayError::EmptyBody.into_response();
    }
    let generation: GenerationRequest = match serde_json::from_slice(&body) {
        Ok(g) => g,
        Err(e) => return RelayError::MalformedJson(e.to_string()).into_response(),
    };

    if let Err(e) = engine.admit(&generation) {
        tracing::warn!(model = %generation.model, "rejected request for unsupported model");
        return e.into_response();
    }

    let (sink, committed) = ClientSink::channel();
    engine.dispatch(generation, sink);

    match committed.await {
        Ok(response) => response.into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": {
                    "message": "request ended without a response",
                    "type": "server_error",
                    "code": "no_response",
                }
            })),
        )
            .into_response(),
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let (status, body) = state.engine.health().await;
    (status, Json(body)).into_response()
}

/// POST /v1/files
pub async fn files(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !is_authorized(&headers, &state.engine.config().api_key) {
        return RelayError::Unauthorized.into_response();
    }
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({
            "error": "Not Implemented",
            "message": "file uploads are not supported",
        })),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "unknown path").into_response()
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router. The engine is injected; nothing here opens sockets.
pub fn build_router(engine: Arc<RelayEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/health", get(health))
        .route("/v1/files", post(files))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
