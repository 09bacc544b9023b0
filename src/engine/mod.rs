// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Request orchestrator
//
// Wires one generation request through the pipeline:
// - Model check against the virtual model name
// - Single-flight acquire, superseding any in-flight request
// - Content filtering
// - Thinking stage (skipped for tool follow-ups)
// - Output stage
// - Error translation: JSON error before commit, in-stream error after

mod error;
pub mod output;
pub mod thinking;

pub use error::RelayError;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::filter::filter_binary_content;
use crate::message::{is_tool_follow_up, summarize_content, GenerationRequest};
use crate::registry::{ActiveTask, Phase, TaskRegistry};
use crate::sink::ClientSink;
use crate::stream::ChunkFramer;
use crate::upstream::{ChatClient, HttpSender, ReqwestHttpSender};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Engine dependencies
// ---------------------------------------------------------------------------

pub struct EngineDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    pub registry: Arc<TaskRegistry>,
}

// ---------------------------------------------------------------------------
// RelayEngine
// ---------------------------------------------------------------------------

/// Runs the two-stage pipeline behind the virtual model.
pub struct RelayEngine {
    config: Arc<Config>,
    registry: Arc<TaskRegistry>,
    client: ChatClient,
}

impl RelayEngine {
    pub fn new_with(deps: EngineDeps) -> Self {
        Self {
            config: deps.config,
            registry: deps.registry,
            client: ChatClient::new(deps.http),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Reject requests for any model but the virtual one.
    pub fn admit(&self, request: &GenerationRequest) -> Result<(), RelayError> {
        if request.model != self.config.hybrid_model_name {
            return Err(RelayError::UnsupportedModel(request.model.clone()));
        }
        Ok(())
    }

    /// Register the request, supersede any in-flight one and start the
    /// pipeline in the background.
    ///
    /// Supersession completes before this returns, so the displaced client
    /// is terminated before the new pipeline makes any upstream call.
    pub fn dispatch(self: &Arc<Self>, request: GenerationRequest, sink: ClientSink) -> JoinHandle<Phase> {
        let request_id = Uuid::new_v4().to_string();
        let framer = ChunkFramer::new(self.config.hybrid_model_name.clone());
        let (task, previous) =
            self.registry
                .acquire(request_id, sink, CancellationToken::new(), framer);

        let superseded = previous.is_some();
        if let Some(previous) = previous {
            self.registry.supersede(&previous);
        }

        tracing::info!(
            request_id = %task.request_id,
            task_id = task.id,
            stream = request.is_stream(),
            message_count = request.messages.len(),
            superseded,
            "request accepted"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(task, request, superseded).await })
    }

    async fn run(&self, task: Arc<ActiveTask>, request: GenerationRequest, superseded: bool) -> Phase {
        if superseded && !self.config.supersede_grace.is_zero() {
            tokio::select! {
                _ = task.cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.supersede_grace) => {}
            }
        }

        let phase = if task.is_cancelled() {
            Phase::Superseded
        } else {
            match self.execute(&task, &request).await {
                Ok(()) => Phase::Done,
                Err(RelayError::Upstream(e)) if e.is_cancelled() => Phase::Superseded,
                Err(e) => {
                    self.fail(&task, &e);
                    Phase::Failed
                }
            }
        };

        task.set_phase(phase);
        task.sink.close();
        self.registry.release(&task);
        tracing::info!(
            request_id = %task.request_id,
            task_id = task.id,
            phase = %phase,
            "request finished"
        );
        phase
    }

    async fn execute(&self, task: &ActiveTask, request: &GenerationRequest) -> Result<(), RelayError> {
        let config = &self.config;

        enter(task, Phase::Filtering);
        let messages = filter_binary_content(&request.messages, config.output.upstream.allow_images);
        let tool_follow_up = is_tool_follow_up(&messages);
        task.set_tool_follow_up(tool_follow_up);
        for (index, message) in messages.iter().enumerate() {
            tracing::debug!(
                request_id = %task.request_id,
                index,
                role = ?message.role,
                content = %summarize_content(message.content.as_ref(), config.log_full_content),
                "inbound message"
            );
        }

        let outcome = if tool_follow_up {
            tracing::info!(
                request_id = %task.request_id,
                "tool follow-up, skipping thinking stage"
            );
            thinking::ThinkingOutcome::default()
        } else {
            enter(task, Phase::Thinking);
            thinking::run(&self.client, config, task, &messages, request.is_stream()).await?
        };

        enter(task, Phase::Outputting);
        output::run(&self.client, config, task, request, &messages, &outcome.reasoning).await
    }

    /// Report a failure on whichever channel is still available.
    fn fail(&self, task: &ActiveTask, error: &RelayError) {
        tracing::error!(
            request_id = %task.request_id,
            task_id = task.id,
            status = %error.status(),
            upstream_status = ?error.upstream_status(),
            error = %error,
            headers_sent = task.sink.headers_sent(),
            "request failed"
        );

        if task.sink.headers_sent() {
            task.sink
                .write_chunk(&task.framer.error_chunk(&error.stream_message()));
            task.sink.finish();
        } else {
            task.sink.send_json(error.status(), error.to_body());
        }
    }

    /// Probe the reasoning upstream's health endpoint.
    pub async fn health(&self) -> (StatusCode, Value) {
        let url = format!(
            "{}/health",
            self.config.thinking.upstream.base_url.trim_end_matches('/')
        );
        match self.client.probe(&url, HEALTH_TIMEOUT).await {
            Ok(upstream) => (
                StatusCode::OK,
                json!({ "status": "ok", "proxyStatus": upstream }),
            ),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "health probe failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "status": "error",
                        "message": "upstream health probe failed",
                        "error": e.to_string(),
                    }),
                )
            }
        }
    }
}

fn enter(task: &ActiveTask, phase: Phase) {
    task.set_phase(phase);
    tracing::debug!(request_id = %task.request_id, task_id = task.id, phase = %phase, "phase");
}

// ---------------------------------------------------------------------------
// Public factory for the default engine
// ---------------------------------------------------------------------------

pub fn build_engine(config: Arc<Config>) -> Arc<RelayEngine> {
    let deps = EngineDeps {
        config,
        http: Arc::new(ReqwestHttpSender::new(reqwest::Client::new())),
        registry: Arc::new(TaskRegistry::new()),
    };
    Arc::new(RelayEngine::new_with(deps))
}
