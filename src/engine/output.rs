// Output stage
//
// Builds the output-model conversation, calls the output model and relays
// its answer to the client under the virtual model identity.
//
// Tool mode forwards the client's request with only model/messages/stream
// overridden. Plain mode builds a minimal request from configured sampling
// parameters and prefixes the answer with the wrapped reasoning when
// chain-of-thought display is on and the reasoning was not already shown.

use axum::http::StatusCode;
use serde_json::{json, Map, Value};

use crate::config::{Config, ReasoningRole};
use crate::message::{summarize_content, ChatMessage, GenerationRequest, Role};
use crate::registry::ActiveTask;
use crate::stream::{set_delta_content, ChunkDelta, StreamEvent};
use crate::upstream::{web_search_tool, ChatClient, UpstreamCallConfig};

use super::thinking::wrap_reasoning;
use super::RelayError;

/// Shown to the client when the output stream carries undecodable data.
pub const MALFORMED_CHUNK_MESSAGE: &str =
    "\n\n[MixLite error: the output model sent a malformed stream chunk]";

/// Assemble the output-model conversation.
///
/// A tool follow-up is forwarded unchanged. Otherwise the relay prompt goes
/// first and the reasoning, when present, last.
pub fn build_messages(
    config: &Config,
    messages: &[ChatMessage],
    reasoning: &str,
    tool_follow_up: bool,
) -> Vec<ChatMessage> {
    if tool_follow_up {
        return messages.to_vec();
    }

    let mut out = Vec::with_capacity(messages.len() + 2);
    out.push(ChatMessage::text(Role::System, config.output.relay_prompt.clone()));
    out.extend_from_slice(messages);
    if !reasoning.is_empty() {
        let role = match config.reasoning_role {
            ReasoningRole::User => Role::User,
            ReasoningRole::Assistant => Role::Assistant,
        };
        out.push(ChatMessage::text(role, reasoning));
    }
    out
}

/// Build the output-model call.
pub fn build_call(
    config: &Config,
    request: &GenerationRequest,
    messages: Vec<ChatMessage>,
    stream: bool,
) -> UpstreamCallConfig {
    let output = &config.output;
    let upstream = &output.upstream;
    let timeout = if stream {
        output.stream_timeout
    } else {
        output.timeout
    };

    let mut call = UpstreamCallConfig {
        endpoint_url: upstream.chat_completions_url(),
        api_key: upstream.api_key.clone(),
        model: upstream.model.clone(),
        messages,
        temperature: None,
        max_tokens: None,
        stream,
        tools: None,
        extra: Map::new(),
        timeout,
    };

    if output.tool_passthrough {
        call.extra = request.passthrough.clone();
    } else {
        call.temperature = Some(upstream.temperature);
        call.max_tokens = Some(upstream.max_tokens);
        call.tools = upstream.web_search.then(web_search_tool);
        call.extra = upstream.extra_body.clone();
    }
    call
}

/// Run the output stage for `task`.
pub async fn run(
    client: &ChatClient,
    config: &Config,
    task: &ActiveTask,
    request: &GenerationRequest,
    messages: &[ChatMessage],
    reasoning: &str,
) -> Result<(), RelayError> {
    let stream = request.is_stream();
    let outgoing = build_messages(config, messages, reasoning, task.is_tool_follow_up());
    for (index, message) in outgoing.iter().enumerate() {
        tracing::debug!(
            request_id = %task.request_id,
            index,
            role = ?message.role,
            content = %summarize_content(message.content.as_ref(), config.log_full_content),
            "output message"
        );
    }

    let call = build_call(config, request, outgoing, stream);
    tracing::info!(
        request_id = %task.request_id,
        task_id = task.id,
        model = %call.model,
        stream,
        tool_passthrough = config.output.tool_passthrough,
        message_count = call.messages.len(),
        "output stage started"
    );

    // The reasoning prefix is plain-mode only when streaming.
    let prefix = (config.show_cot && !reasoning.is_empty()).then(|| wrap_reasoning(reasoning));

    if stream {
        let prefix = prefix.filter(|_| !config.output.tool_passthrough);
        relay_stream(client, config, task, &call, prefix).await
    } else {
        relay_complete(client, config, task, &call, prefix).await
    }
}

async fn relay_stream(
    client: &ChatClient,
    config: &Config,
    task: &ActiveTask,
    call: &UpstreamCallConfig,
    prefix: Option<String>,
) -> Result<(), RelayError> {
    let mut events = client.open_stream(call, &task.cancel).await?;
    task.sink.open_stream();

    let mut accumulated = String::new();
    while let Some(event) = events.next(&task.cancel).await? {
        match event {
            StreamEvent::Delta(ChunkDelta {
                content,
                finish_reason,
                chunk,
            }) => {
                let has_text = content.as_deref().is_some_and(|c| !c.is_empty());
                if config.log_full_content {
                    if let Some(text) = content.as_deref() {
                        accumulated.push_str(text);
                    }
                }

                let mut chunk = task.framer.reframe(chunk);
                let claim = has_text || finish_reason.is_some();
                if let Some(prefix) = prefix.as_deref() {
                    if claim && task.mark_reasoning_emitted() {
                        let body = content.unwrap_or_default();
                        set_delta_content(&mut chunk, format!("{prefix}{body}"));
                    }
                }
                task.sink.write_chunk(&Value::Object(chunk));
            }
            StreamEvent::Done => break,
            StreamEvent::Malformed { line } => {
                tracing::error!(
                    request_id = %task.request_id,
                    task_id = task.id,
                    line = %line,
                    "malformed output chunk"
                );
                task.sink
                    .write_chunk(&task.framer.error_chunk(MALFORMED_CHUNK_MESSAGE));
                break;
            }
        }
    }
    task.sink.finish();

    if config.log_full_content {
        tracing::info!(
            request_id = %task.request_id,
            content = %accumulated,
            "output stream content"
        );
    }
    tracing::info!(request_id = %task.request_id, task_id = task.id, "output stream finished");
    Ok(())
}

async fn relay_complete(
    client: &ChatClient,
    config: &Config,
    task: &ActiveTask,
    call: &UpstreamCallConfig,
    prefix: Option<String>,
) -> Result<(), RelayError> {
    let mut body = client.complete(call, &task.cancel).await?;
    let model = Value::String(config.hybrid_model_name.clone());

    if config.output.tool_passthrough {
        if let Some(map) = body.as_object_mut() {
            map.insert("model".into(), model);
        }
        if let Some(prefix) = prefix {
            if let Some(Value::String(content)) = body.pointer_mut("/choices/0/message/content") {
                if task.mark_reasoning_emitted() {
                    content.insert_str(0, &prefix);
                }
            }
        }
    } else {
        let map = body.as_object_mut().ok_or(RelayError::MissingChoices)?;
        let mut choice = map
            .get("choices")
            .and_then(|c| c.get(0))
            .filter(|c| c.is_object())
            .cloned()
            .ok_or(RelayError::MissingChoices)?;

        if !choice.get("message").is_some_and(Value::is_object) {
            choice["message"] = json!({ "role": "assistant" });
        }
        let mut content = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if let Some(prefix) = prefix {
            if task.mark_reasoning_emitted() {
                content.insert_str(0, &prefix);
            }
        }
        choice["message"]["content"] = Value::String(content);

        map.insert("choices".into(), json!([choice]));
        map.insert("model".into(), model);
    }

    let usage = body.get("usage").cloned().unwrap_or(Value::Null);
    tracing::info!(
        request_id = %task.request_id,
        task_id = task.id,
        usage = %usage,
        "output response relayed"
    );
    task.sink.send_json(StatusCode::OK, body);
    Ok(())
}
