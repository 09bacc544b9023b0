// Raw YAML deserialization types (internal)
//
// Kept apart from the public Config structs: every string here may still
// carry `${VAR}` references, and numeric/enum fields are validated and
// defaulted by the loader before the typed Config exists.

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub mixlite: String,
    pub listen_port: Option<u16>,
    pub api_key: String,
    pub hybrid_model_name: String,
    pub show_cot: Option<bool>,
    pub log_full_content: Option<bool>,
    pub reasoning_role: Option<String>,
    pub supersede_grace_ms: Option<u64>,
    pub thinking: RawThinkingConfig,
    pub output: RawOutputConfig,
}

/// `thinking:` block. Both stage blocks reject unknown keys.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawThinkingConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub web_search: Option<bool>,
    pub allow_images: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub extra_body: Option<Map<String, Value>>,
    pub prompt: Option<String>,
}

/// `output:` block.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawOutputConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub web_search: Option<bool>,
    pub allow_images: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub extra_body: Option<Map<String, Value>>,
    pub tool_passthrough: Option<bool>,
    pub relay_prompt: Option<String>,
    pub stream_timeout_ms: Option<u64>,
}

/// Fields shared by both stage blocks.
pub struct RawUpstream<'a> {
    pub base_url: &'a str,
    pub api_key: &'a str,
    pub model: &'a str,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub web_search: Option<bool>,
    pub allow_images: Option<bool>,
    pub extra_body: Option<&'a Map<String, Value>>,
}

impl RawThinkingConfig {
    pub fn upstream(&self) -> RawUpstream<'_> {
        RawUpstream {
            base_url: &self.base_url,
            api_key: &self.api_key,
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            web_search: self.web_search,
            allow_images: self.allow_images,
            extra_body: self.extra_body.as_ref(),
        }
    }
}

impl RawOutputConfig {
    pub fn upstream(&self) -> RawUpstream<'_> {
        RawUpstream {
            base_url: &self.base_url,
            api_key: &self.api_key,
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            web_search: self.web_search,
            allow_images: self.allow_images,
            extra_body: self.extra_body.as_ref(),
        }
    }
}
