// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use crate::upstream::UpstreamError;

/// Errors surfaced to the client by the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("failed to read request body: {0}")]
    UnreadableBody(String),

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("upstream response has no choices")]
    MissingChoices,
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::MalformedJson(_)
            | RelayError::EmptyBody
            | RelayError::UnreadableBody(_)
            | RelayError::UnsupportedModel(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Upstream(e) => e.client_status(),
            RelayError::MissingChoices => StatusCode::BAD_GATEWAY,
        }
    }

    /// Upstream status code, when the upstream answered.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            RelayError::Upstream(e) => e.upstream_status(),
            _ => None,
        }
    }

    /// OpenAI-style error envelope.
    pub fn to_body(&self) -> Value {
        let (kind, code) = match self {
            RelayError::Unauthorized => ("invalid_request_error", "invalid_api_key"),
            RelayError::MalformedJson(_) => ("invalid_request_error", "invalid_json"),
            RelayError::EmptyBody => ("invalid_request_error", "empty_body"),
            RelayError::PayloadTooLarge(_) => ("invalid_request_error", "payload_too_large"),
            RelayError::UnreadableBody(_) => ("invalid_request_error", "unreadable_body"),
            RelayError::UnsupportedModel(_) => ("invalid_request_error", "model_not_found"),
            RelayError::Upstream(_) | RelayError::MissingChoices => {
                ("upstream_error", "MixLite_Upstream_Error")
            }
        };

        let mut error = json!({
            "message": self.to_string(),
            "type": kind,
            "code": code,
        });
        if matches!(self, RelayError::Upstream(_) | RelayError::MissingChoices) {
            error["message"] = json!(format!("MixLite upstream request failed: {self}"));
            let request_url = match self {
                RelayError::Upstream(e) => e.request_url(),
                _ => None,
            };
            error["details"] = json!({
                "upstream_status": self.upstream_status(),
                "request_url": request_url,
            });
        }
        json!({ "error": error })
    }

    /// Text of the terminal chunk used once the stream is already committed.
    pub fn stream_message(&self) -> String {
        let status = self
            .upstream_status()
            .map_or_else(|| "N/A".to_string(), |s| s.to_string());
        format!("\n\n[MixLite error: upstream request failed. details: {self} (status: {status})]")
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), axum::Json(self.to_body())).into_response()
    }
}
