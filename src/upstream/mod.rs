// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Upstream chat-completion transport
//
// Responsibilities:
// - HTTP seam (`HttpSender`) so tests can script upstream behaviour
// - Build `POST {base_url}/v1/chat/completions` calls per stage
// - Race every call against the task's cancellation token; losing the race
//   drops the in-flight future, which aborts the HTTP request
// - Map non-2xx responses to `UpstreamError::Status` with the upstream body

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::ChatMessage;
use crate::stream::{decode_events, StreamEvent};

/// Upper bound on how much of an upstream error body is kept.
const ERROR_BODY_LIMIT: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests to upstream providers.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Bounds the whole exchange, body included.
    pub timeout: Option<Duration>,
    pub stream: bool,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

pub enum HttpBody {
    Full(Bytes),
    Stream(ByteStream),
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub body: HttpBody,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

/// Failure of one upstream chat-completion call.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{source}")]
    Http {
        url: String,
        #[source]
        source: HttpError,
    },

    #[error("upstream returned {status}")]
    Status {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("upstream returned an unreadable body: {reason}")]
    InvalidBody { url: String, reason: String },

    #[error("upstream call cancelled")]
    Cancelled,
}

impl UpstreamError {
    /// Status reported to the client for this failure.
    pub fn client_status(&self) -> StatusCode {
        match self {
            UpstreamError::Status { status, .. } => *status,
            UpstreamError::Http {
                source: HttpError::Timeout(_),
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Http { .. } | UpstreamError::InvalidBody { .. } => {
                StatusCode::BAD_GATEWAY
            }
            UpstreamError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The upstream's own status, if it answered at all.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }

    pub fn request_url(&self) -> Option<&str> {
        match self {
            UpstreamError::Http { url, .. }
            | UpstreamError::Status { url, .. }
            | UpstreamError::InvalidBody { url, .. } => Some(url),
            UpstreamError::Cancelled => None,
        }
    }

    /// Upstream error body, if one was received.
    pub fn upstream_body(&self) -> Option<&str> {
        match self {
            UpstreamError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpstreamError::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// Call configuration
// ---------------------------------------------------------------------------

/// Everything needed for one upstream call. Built fresh per stage.
#[derive(Debug, Clone)]
pub struct UpstreamCallConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub tools: Option<Value>,
    /// Additional top-level body fields. Never overrides `model`,
    /// `messages` or `stream`.
    pub extra: Map<String, Value>,
    pub timeout: Duration,
}

impl UpstreamCallConfig {
    /// The JSON request body.
    pub fn to_body(&self) -> Value {
        let mut body = self.extra.clone();
        body.insert("model".into(), json!(self.model));
        body.insert("messages".into(), json!(self.messages));
        body.insert("stream".into(), json!(self.stream));
        if let Some(temperature) = self.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = self.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(tools) = &self.tools {
            body.insert("tools".into(), tools.clone());
        }
        Value::Object(body)
    }

    fn to_http_request(&self) -> Result<HttpRequest, UpstreamError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(|_| {
            UpstreamError::Http {
                url: self.endpoint_url.clone(),
                source: HttpError::Transport("api key is not a valid header value".into()),
            }
        })?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.stream {
            headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        let body = serde_json::to_vec(&self.to_body()).map_err(|e| UpstreamError::InvalidBody {
            url: self.endpoint_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(HttpRequest {
            method: Method::POST,
            url: self.endpoint_url.clone(),
            headers,
            body: Bytes::from(body),
            timeout: Some(self.timeout),
            stream: self.stream,
        })
    }
}

/// The web-search function declaration attached when a stage enables it.
pub fn web_search_tool() -> Value {
    json!([{
        "type": "function",
        "function": {
            "name": "googleSearch",
            "description": "Search the web for relevant information.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query."
                    }
                },
                "required": ["query"]
            }
        }
    }])
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

/// Decoded events of one streaming upstream call.
///
/// The call's timeout runs from when the request was sent until the last
/// event, so a body that stalls mid-stream still fails the call.
pub struct UpstreamStream {
    url: String,
    events: Pin<Box<dyn Stream<Item = Result<StreamEvent, HttpError>> + Send>>,
    deadline: Instant,
    limit: Duration,
}

impl UpstreamStream {
    /// Next event, or `None` once the sequence has ended.
    ///
    /// Resolves to `Cancelled` as soon as `cancel` fires; the body is
    /// dropped with the stream.
    pub async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<StreamEvent>, UpstreamError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpstreamError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(UpstreamError::Http {
                url: self.url.clone(),
                source: HttpError::Timeout(format!(
                    "stream from {} not finished within {:?}",
                    self.url, self.limit
                )),
            }),
            item = self.events.next() => match item {
                None => Ok(None),
                Some(Ok(event)) => Ok(Some(event)),
                Some(Err(source)) => Err(UpstreamError::Http { url: self.url.clone(), source }),
            },
        }
    }
}

/// Chat-completion calls over an injected `HttpSender`.
#[derive(Clone)]
pub struct ChatClient {
    http: Arc<dyn HttpSender>,
}

impl ChatClient {
    pub fn new(http: Arc<dyn HttpSender>) -> Self {
        Self { http }
    }

    /// Non-streaming call. Returns the decoded JSON body.
    pub async fn complete(
        &self,
        call: &UpstreamCallConfig,
        cancel: &CancellationToken,
    ) -> Result<Value, UpstreamError> {
        let response = self.send(call.to_http_request()?, cancel).await?;
        let url = &call.endpoint_url;
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            body = read_body(response.body, usize::MAX) => body.map_err(|source| UpstreamError::Http {
                url: url.clone(),
                source,
            })?,
        };

        serde_json::from_slice(&body).map_err(|e| UpstreamError::InvalidBody {
            url: url.clone(),
            reason: e.to_string(),
        })
    }

    /// Streaming call. Resolves once the upstream has answered 2xx.
    pub async fn open_stream(
        &self,
        call: &UpstreamCallConfig,
        cancel: &CancellationToken,
    ) -> Result<UpstreamStream, UpstreamError> {
        let deadline = Instant::now() + call.timeout;
        let response = self.send(call.to_http_request()?, cancel).await?;
        let bytes: ByteStream = match response.body {
            HttpBody::Stream(stream) => stream,
            HttpBody::Full(bytes) => Box::pin(futures_util::stream::once(async move { Ok(bytes) })),
        };
        Ok(UpstreamStream {
            url: call.endpoint_url.clone(),
            events: Box::pin(decode_events(bytes)),
            deadline,
            limit: call.timeout,
        })
    }

    /// `GET url`. The body is returned as JSON if it parses, else as a string.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<Value, UpstreamError> {
        let request = HttpRequest {
            method: Method::GET,
            url: url.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            timeout: Some(timeout),
            stream: false,
        };
        let response = self.send(request, &CancellationToken::new()).await?;
        let body = read_body(response.body, ERROR_BODY_LIMIT)
            .await
            .map_err(|source| UpstreamError::Http {
                url: url.to_string(),
                source,
            })?;

        Ok(serde_json::from_slice(&body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned())))
    }

    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, UpstreamError> {
        let url = request.url.clone();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            result = self.http.send(request) => result.map_err(|source| UpstreamError::Http {
                url: url.clone(),
                source,
            })?,
        };

        if response.status.is_success() {
            return Ok(response);
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
            body = read_body(response.body, ERROR_BODY_LIMIT) => body.unwrap_or_default(),
        };
        Err(UpstreamError::Status {
            status: response.status,
            url,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Collect a response body, keeping at most `limit` bytes.
async fn read_body(body: HttpBody, limit: usize) -> Result<Bytes, HttpError> {
    match body {
        HttpBody::Full(bytes) => Ok(bytes.slice(..bytes.len().min(limit))),
        HttpBody::Stream(mut stream) => {
            let mut buf = BytesMut::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                let room = limit.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if buf.len() >= limit {
                    break;
                }
            }
            Ok(buf.freeze())
        }
    }
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);
        if let Some(limit) = request.timeout {
            req = req.timeout(limit);
        }

        let resp = req.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        let body = if request.stream {
            HttpBody::Stream(Box::pin(resp.bytes_stream().map_err(map_reqwest_error)))
        } else {
            HttpBody::Full(resp.bytes().await.map_err(map_reqwest_error)?)
        };
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use std::sync::Mutex;

    /// Replays one canned response and records the request.
    struct CannedSender {
        status: StatusCode,
        body: &'static str,
        delay: Option<Duration>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl CannedSender {
        fn new(status: StatusCode, body: &'static str) -> Self {
            Self {
                status,
                body,
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpSender for CannedSender {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.seen.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(HttpResponse {
                status: self.status,
                body: HttpBody::Full(Bytes::from_static(self.body.as_bytes())),
            })
        }
    }

    fn call(stream: bool) -> UpstreamCallConfig {
        let mut extra = Map::new();
        extra.insert("top_p".into(), json!(0.9));
        extra.insert("model".into(), json!("sneaky"));
        UpstreamCallConfig {
            endpoint_url: "http://up/v1/chat/completions".into(),
            api_key: "k-1".into(),
            model: "m".into(),
            messages: vec![ChatMessage::text(Role::User, "hi")],
            temperature: Some(0.5),
            max_tokens: Some(128),
            stream,
            tools: None,
            extra,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn body_merges_extra_without_overriding_core_fields() {
        let body = call(true).to_body();
        assert_eq!(body["model"], "m");
        assert_eq!(body["stream"], true);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn optional_sampling_fields_are_omitted() {
        let mut c = call(false);
        c.temperature = None;
        c.max_tokens = None;
        c.tools = Some(web_search_tool());
        let body = c.to_body();
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["tools"][0]["function"]["name"], "googleSearch");
        assert_eq!(
            body["tools"][0]["function"]["parameters"]["required"][0],
            "query"
        );
    }

    #[tokio::test]
    async fn request_carries_auth_and_accept_headers() {
        let sender = Arc::new(CannedSender::new(StatusCode::OK, "data: [DONE]\n\n"));
        let client = ChatClient::new(sender.clone());
        let mut events = client
            .open_stream(&call(true), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            events.next(&CancellationToken::new()).await.unwrap(),
            Some(StreamEvent::Done)
        );

        let seen = sender.seen.lock().unwrap();
        let req = &seen[0];
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.headers[header::AUTHORIZATION], "Bearer k-1");
        assert_eq!(req.headers[header::ACCEPT], "text/event-stream");
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
        assert!(req.stream);
    }

    #[tokio::test]
    async fn non_success_status_carries_upstream_body() {
        let sender = Arc::new(CannedSender::new(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":"slow down"}"#,
        ));
        let err = ChatClient::new(sender)
            .complete(&call(false), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.client_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.upstream_status(), Some(429));
        assert_eq!(err.upstream_body(), Some(r#"{"error":"slow down"}"#));
        assert_eq!(err.request_url(), Some("http://up/v1/chat/completions"));
    }

    #[tokio::test]
    async fn invalid_json_body_is_reported() {
        let sender = Arc::new(CannedSender::new(StatusCode::OK, "<html>"));
        let err = ChatClient::new(sender)
            .complete(&call(false), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidBody { .. }));
        assert_eq!(err.client_status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn cancellation_aborts_pending_call() {
        let mut sender = CannedSender::new(StatusCode::OK, "{}");
        sender.delay = Some(Duration::from_secs(30));
        let client = ChatClient::new(Arc::new(sender));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = client.complete(&call(false), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = UpstreamError::Http {
            url: "u".into(),
            source: HttpError::Timeout("slow".into()),
        };
        assert_eq!(err.client_status(), StatusCode::GATEWAY_TIMEOUT);
        let err = UpstreamError::Http {
            url: "u".into(),
            source: HttpError::Transport("refused".into()),
        };
        assert_eq!(err.client_status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn probe_falls_back_to_text() {
        let client = ChatClient::new(Arc::new(CannedSender::new(StatusCode::OK, "healthy")));
        let body = client
            .probe("http://up/health", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(body, json!("healthy"));
    }

    #[tokio::test]
    async fn error_body_is_capped() {
        let stream: ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from(vec![b'a'; ERROR_BODY_LIMIT])),
            Ok(Bytes::from_static(b"overflow")),
        ]));
        let body = read_body(HttpBody::Stream(stream), ERROR_BODY_LIMIT)
            .await
            .unwrap();
        assert_eq!(body.len(), ERROR_BODY_LIMIT);
    }

    /// Body that yields `frames` and then never ends.
    struct StallingSender {
        frames: &'static str,
    }

    #[async_trait]
    impl HttpSender for StallingSender {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let frames = self.frames;
            let head =
                futures_util::stream::once(async move { Ok::<_, HttpError>(Bytes::from_static(frames.as_bytes())) });
            Ok(HttpResponse {
                status: StatusCode::OK,
                body: HttpBody::Stream(Box::pin(head.chain(futures_util::stream::pending()))),
            })
        }
    }

    #[tokio::test]
    async fn stalled_stream_times_out_after_call_limit() {
        let client = ChatClient::new(Arc::new(StallingSender {
            frames: "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"a\"}}]}\n\n",
        }));
        let mut c = call(true);
        c.timeout = Duration::from_millis(50);
        let cancel = CancellationToken::new();

        let mut events = client.open_stream(&c, &cancel).await.unwrap();
        assert!(matches!(
            events.next(&cancel).await.unwrap(),
            Some(StreamEvent::Delta(_))
        ));

        let err = tokio::time::timeout(Duration::from_secs(5), events.next(&cancel))
            .await
            .expect("deadline should fire")
            .unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Http {
                source: HttpError::Timeout(_),
                ..
            }
        ));
        assert_eq!(err.client_status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.request_url(), Some("http://up/v1/chat/completions"));
    }
}
