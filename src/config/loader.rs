// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate the relay config from the given source.
///
/// Steps:
/// 1. Read raw YAML from the source
/// 2. Parse into raw deserialization types
/// 3. Check the contract version
/// 4. Resolve `${VAR}` references in every string field
/// 5. Apply defaults and validate values
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.mixlite != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.mixlite
        )));
    }

    let api_key = resolve_variables(&raw.api_key)?;
    require_non_empty("api_key", &api_key)?;

    let hybrid_model_name = resolve_variables(&raw.hybrid_model_name)?;
    require_non_empty("hybrid_model_name", &hybrid_model_name)?;

    let reasoning_role = match raw.reasoning_role.as_deref() {
        None | Some("user") => ReasoningRole::User,
        Some("assistant") => ReasoningRole::Assistant,
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "unknown reasoning_role \"{other}\", expected \"user\" or \"assistant\""
            )));
        }
    };

    let thinking = ThinkingConfig {
        upstream: build_upstream("thinking", raw.thinking.upstream())?,
        prompt: resolve_or(raw.thinking.prompt.as_deref(), DEFAULT_THINK_PROMPT)?,
        timeout: Duration::from_millis(
            raw.thinking
                .timeout_ms
                .unwrap_or(DEFAULT_THINKING_TIMEOUT_MS),
        ),
    };

    let output = OutputConfig {
        upstream: build_upstream("output", raw.output.upstream())?,
        tool_passthrough: raw.output.tool_passthrough.unwrap_or(false),
        relay_prompt: resolve_or(raw.output.relay_prompt.as_deref(), DEFAULT_RELAY_PROMPT)?,
        stream_timeout: Duration::from_millis(
            raw.output
                .stream_timeout_ms
                .unwrap_or(DEFAULT_OUTPUT_STREAM_TIMEOUT_MS),
        ),
        timeout: Duration::from_millis(raw.output.timeout_ms.unwrap_or(DEFAULT_OUTPUT_TIMEOUT_MS)),
    };

    Ok(Config {
        version: raw.mixlite,
        listen_port: raw.listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
        api_key,
        hybrid_model_name,
        show_cot: raw.show_cot.unwrap_or(false),
        log_full_content: raw.log_full_content.unwrap_or(false),
        reasoning_role,
        supersede_grace: Duration::from_millis(
            raw.supersede_grace_ms.unwrap_or(DEFAULT_SUPERSEDE_GRACE_MS),
        ),
        thinking,
        output,
    })
}

fn build_upstream(stage: &str, raw: raw::RawUpstream<'_>) -> Result<UpstreamSettings, ConfigError> {
    let base_url = resolve_variables(raw.base_url)?;
    require_non_empty(&format!("{stage}.base_url"), &base_url)?;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "{stage}.base_url must start with http:// or https://, got \"{base_url}\""
        )));
    }

    let model = resolve_variables(raw.model)?;
    require_non_empty(&format!("{stage}.model"), &model)?;

    let temperature = raw.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ConfigError::Validation(format!(
            "{stage}.temperature must be within 0..=2, got {temperature}"
        )));
    }

    let mut extra_body = raw.extra_body.cloned().unwrap_or_default();
    for reserved in ["model", "messages", "stream"] {
        if extra_body.remove(reserved).is_some() {
            tracing::warn!(stage, field = reserved, "ignoring reserved field in extra_body");
        }
    }

    Ok(UpstreamSettings {
        base_url,
        api_key: resolve_variables(raw.api_key)?,
        model,
        temperature,
        max_tokens: raw.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        web_search: raw.web_search.unwrap_or(false),
        allow_images: raw.allow_images.unwrap_or(false),
        extra_body,
    })
}

fn resolve_or(value: Option<&str>, default: &str) -> Result<String, ConfigError> {
    match value {
        Some(v) => resolve_variables(v),
        None => Ok(default.to_string()),
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "missing required field \"{field}\""
        )));
    }
    Ok(())
}
