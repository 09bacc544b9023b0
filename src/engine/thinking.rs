// Thinking stage
//
// Asks the reasoning model to think aloud about the conversation and
// returns what it said. With chain-of-thought display on and a streaming
// client, reasoning deltas go to the client live inside `<think>` tags.
// Upstream failures here are absorbed: the stage degrades to empty
// reasoning. Only cancellation propagates.

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::filter::filter_binary_content;
use crate::message::{ChatMessage, Role};
use crate::registry::ActiveTask;
use crate::stream::StreamEvent;
use crate::upstream::{web_search_tool, ChatClient, UpstreamCallConfig, UpstreamError};

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>\n\n";

/// Result of the thinking stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThinkingOutcome {
    /// Accumulated reasoning text. Empty when the stage failed.
    pub reasoning: String,
    /// Reasoning was already forwarded to the client.
    pub emitted: bool,
}

/// Build the reasoning-model call for `messages`.
pub fn build_call(config: &Config, messages: &[ChatMessage], stream: bool) -> UpstreamCallConfig {
    let upstream = &config.thinking.upstream;
    let mut messages = filter_binary_content(messages, upstream.allow_images).into_owned();
    messages.push(ChatMessage::text(Role::User, config.thinking.prompt.clone()));

    UpstreamCallConfig {
        endpoint_url: upstream.chat_completions_url(),
        api_key: upstream.api_key.clone(),
        model: upstream.model.clone(),
        messages,
        temperature: Some(upstream.temperature),
        max_tokens: Some(upstream.max_tokens),
        stream,
        tools: upstream.web_search.then(web_search_tool),
        extra: upstream.extra_body.clone(),
        timeout: config.thinking.timeout,
    }
}

/// Run the thinking stage for `task`.
pub async fn run(
    client: &ChatClient,
    config: &Config,
    task: &ActiveTask,
    messages: &[ChatMessage],
    stream: bool,
) -> Result<ThinkingOutcome, UpstreamError> {
    let call = build_call(config, messages, stream);
    tracing::info!(
        request_id = %task.request_id,
        task_id = task.id,
        model = %call.model,
        stream,
        message_count = call.messages.len(),
        "thinking stage started"
    );

    let result = if stream {
        stream_reasoning(client, config.show_cot, task, &call).await
    } else {
        complete_reasoning(client, &call, &task.cancel).await
    };

    match result {
        Ok(outcome) => {
            if config.log_full_content {
                tracing::info!(
                    request_id = %task.request_id,
                    reasoning = %outcome.reasoning,
                    "thinking stage output"
                );
            }
            tracing::info!(
                request_id = %task.request_id,
                task_id = task.id,
                reasoning_len = outcome.reasoning.chars().count(),
                emitted = outcome.emitted,
                "thinking stage finished"
            );
            Ok(outcome)
        }
        Err(UpstreamError::Cancelled) => Err(UpstreamError::Cancelled),
        Err(e) => {
            tracing::warn!(
                request_id = %task.request_id,
                task_id = task.id,
                url = e.request_url().unwrap_or_default(),
                model = %call.model,
                upstream_status = ?e.upstream_status(),
                upstream_body = e.upstream_body().unwrap_or_default(),
                error = %e,
                "thinking stage failed, continuing without reasoning"
            );
            Ok(ThinkingOutcome::default())
        }
    }
}

async fn complete_reasoning(
    client: &ChatClient,
    call: &UpstreamCallConfig,
    cancel: &CancellationToken,
) -> Result<ThinkingOutcome, UpstreamError> {
    let body = client.complete(call, cancel).await?;
    let reasoning = body
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(ThinkingOutcome {
        reasoning,
        emitted: false,
    })
}

async fn stream_reasoning(
    client: &ChatClient,
    show_cot: bool,
    task: &ActiveTask,
    call: &UpstreamCallConfig,
) -> Result<ThinkingOutcome, UpstreamError> {
    let mut outcome = ThinkingOutcome::default();
    let result = drain_reasoning(client, show_cot, task, call, &mut outcome).await;

    // Close the delimiter whenever it was opened, even if the stream broke.
    if outcome.emitted && !task.is_cancelled() {
        task.sink
            .write_chunk(&task.framer.content_chunk(THINK_CLOSE, None));
    }
    result.map(|()| outcome)
}

async fn drain_reasoning(
    client: &ChatClient,
    show_cot: bool,
    task: &ActiveTask,
    call: &UpstreamCallConfig,
    outcome: &mut ThinkingOutcome,
) -> Result<(), UpstreamError> {
    let mut events = client.open_stream(call, &task.cancel).await?;
    if show_cot {
        task.sink.open_stream();
    }

    while let Some(event) = events.next(&task.cancel).await? {
        match event {
            StreamEvent::Delta(delta) => {
                let Some(text) = delta.text() else {
                    continue;
                };
                outcome.reasoning.push_str(text);
                if !show_cot {
                    continue;
                }

                let content = if outcome.emitted {
                    text.to_string()
                } else {
                    outcome.emitted = true;
                    task.mark_reasoning_emitted();
                    format!("{THINK_OPEN}{text}")
                };
                task.sink
                    .write_chunk(&task.framer.content_chunk(&content, None));
            }
            StreamEvent::Done => break,
            StreamEvent::Malformed { line } => {
                tracing::warn!(
                    request_id = %task.request_id,
                    line = %line,
                    "malformed reasoning chunk, ending thinking stage early"
                );
                break;
            }
        }
    }
    Ok(())
}

/// Wrap reasoning in the chain-of-thought delimiters.
pub fn wrap_reasoning(reasoning: &str) -> String {
    format!("{THINK_OPEN}{reasoning}{THINK_CLOSE}")
}

