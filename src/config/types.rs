use std::time::Duration;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Contract version. Always "v1".
    pub version: String,
    /// Port the binary listens on unless overridden on the command line.
    pub listen_port: u16,
    /// Bearer token clients must present.
    pub api_key: String,
    /// The single model name advertised to clients.
    pub hybrid_model_name: String,
    /// Surface chain-of-thought to the client wrapped in `<think>` tags.
    pub show_cot: bool,
    /// Log full message and stream contents instead of summaries.
    pub log_full_content: bool,
    /// Role used for the reasoning message handed to the output model.
    pub reasoning_role: ReasoningRole,
    /// Pause after superseding an older task, before the first upstream call.
    pub supersede_grace: Duration,
    pub thinking: ThinkingConfig,
    pub output: OutputConfig,
}

/// Where the reasoning text lands in the output-stage conversation.
///
/// `User` places it as a second consecutive user message, which most
/// providers tolerate; `Assistant` is for providers that reject
/// consecutive same-role turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasoningRole {
    #[default]
    User,
    Assistant,
}

// ---------------------------------------------------------------------------
// Stage configs
// ---------------------------------------------------------------------------

/// Connection and sampling settings for one upstream provider.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Base URL; `/v1/chat/completions` is appended per call.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Attach the `googleSearch` function declaration to requests.
    pub web_search: bool,
    /// Let image payloads through the content filter for this stage.
    pub allow_images: bool,
    /// Extra top-level fields merged into every request body.
    pub extra_body: serde_json::Map<String, serde_json::Value>,
}

impl UpstreamSettings {
    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct ThinkingConfig {
    pub upstream: UpstreamSettings,
    /// Instruction appended to the conversation asking the model to reason aloud.
    pub prompt: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub upstream: UpstreamSettings,
    /// Forward the client's request verbatim (tool mode) instead of
    /// building a minimal one from configured sampling parameters.
    pub tool_passthrough: bool,
    /// System prompt prepended to the output-stage conversation.
    pub relay_prompt: String,
    pub stream_timeout: Duration,
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_LISTEN_PORT: u16 = 3000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_SUPERSEDE_GRACE_MS: u64 = 100;
pub const DEFAULT_THINKING_TIMEOUT_MS: u64 = 90_000;
pub const DEFAULT_OUTPUT_STREAM_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_OUTPUT_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_THINK_PROMPT: &str = "Before anyone answers, think through the \
conversation above step by step. Write out your reasoning in full; do not give a \
final answer.";

pub const DEFAULT_RELAY_PROMPT: &str = "You are the final responder. The last user \
message may contain a reasoning draft prepared for you. Use it to inform your answer, \
but reply to the conversation directly and do not mention the draft.";
