// Relay configuration
//
// Loads mixlite.yaml, resolves `${VAR}` references from the environment,
// applies defaults and validates the two upstream stage definitions.

mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::load_config;
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const EXAMPLE_YAML: &str = r#"mixlite: v1
listen_port: 3456
api_key: "client-secret"
hybrid_model_name: hybrid
show_cot: true
reasoning_role: assistant
supersede_grace_ms: 50

thinking:
  base_url: "http://reasoner.local/"
  api_key: "think-key"
  model: deepseek-reasoner
  temperature: 0.6
  max_tokens: 8192
  web_search: true
  prompt: "think hard"
  timeout_ms: 45000
  extra_body:
    config:
      thinkingConfig:
        thinkingBudget: 24576

output:
  base_url: "https://writer.local"
  api_key: "output-key"
  model: gpt-4o
  allow_images: true
  tool_passthrough: true
  relay_prompt: "relay"
  stream_timeout_ms: 20000
  timeout_ms: 10000
"#;

    const MINIMAL_YAML: &str = r#"mixlite: v1
api_key: "k"
hybrid_model_name: hybrid
thinking:
  base_url: "http://a"
  model: r1
output:
  base_url: "http://b"
  model: v3
"#;

    fn make_source(yaml: &str) -> StringSource {
        StringSource {
            content: yaml.to_string(),
        }
    }

    #[test]
    fn full_config_parses_all_fields() {
        let config = load_config(&make_source(EXAMPLE_YAML)).unwrap();

        assert_eq!(config.version, "v1");
        assert_eq!(config.listen_port, 3456);
        assert_eq!(config.api_key, "client-secret");
        assert_eq!(config.hybrid_model_name, "hybrid");
        assert!(config.show_cot);
        assert_eq!(config.reasoning_role, ReasoningRole::Assistant);
        assert_eq!(config.supersede_grace, Duration::from_millis(50));

        let thinking = &config.thinking;
        assert_eq!(thinking.upstream.model, "deepseek-reasoner");
        assert_eq!(thinking.upstream.api_key, "think-key");
        assert_eq!(thinking.upstream.temperature, 0.6);
        assert_eq!(thinking.upstream.max_tokens, 8192);
        assert!(thinking.upstream.web_search);
        assert!(!thinking.upstream.allow_images);
        assert_eq!(thinking.prompt, "think hard");
        assert_eq!(thinking.timeout, Duration::from_millis(45000));
        assert_eq!(
            thinking.upstream.extra_body["config"]["thinkingConfig"]["thinkingBudget"],
            24576
        );

        let output = &config.output;
        assert!(output.tool_passthrough);
        assert!(output.upstream.allow_images);
        assert_eq!(output.relay_prompt, "relay");
        assert_eq!(output.stream_timeout, Duration::from_millis(20000));
        assert_eq!(output.timeout, Duration::from_millis(10000));
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = load_config(&make_source(MINIMAL_YAML)).unwrap();

        assert_eq!(config.listen_port, DEFAULT_LISTEN_PORT);
        assert!(!config.show_cot);
        assert!(!config.log_full_content);
        assert_eq!(config.reasoning_role, ReasoningRole::User);
        assert_eq!(config.supersede_grace, Duration::from_millis(100));
        assert_eq!(config.thinking.timeout, Duration::from_secs(90));
        assert_eq!(config.output.stream_timeout, Duration::from_secs(60));
        assert_eq!(config.output.timeout, Duration::from_secs(30));
        assert_eq!(config.thinking.prompt, DEFAULT_THINK_PROMPT);
        assert_eq!(config.output.relay_prompt, DEFAULT_RELAY_PROMPT);
        assert_eq!(config.output.upstream.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(config.output.upstream.max_tokens, DEFAULT_MAX_TOKENS);
        assert!(!config.output.tool_passthrough);
        assert!(config.output.upstream.extra_body.is_empty());
        assert_eq!(config.thinking.upstream.api_key, "");
    }

    #[test]
    fn chat_completions_url_trims_trailing_slash() {
        let config = load_config(&make_source(EXAMPLE_YAML)).unwrap();
        assert_eq!(
            config.thinking.upstream.chat_completions_url(),
            "http://reasoner.local/v1/chat/completions"
        );
        assert_eq!(
            config.output.upstream.chat_completions_url(),
            "https://writer.local/v1/chat/completions"
        );
    }

    #[test]
    fn wrong_version_rejected() {
        let yaml = MINIMAL_YAML.replace("mixlite: v1", "mixlite: v2");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("unsupported config version"), "got: {err}");
    }

    #[test]
    fn missing_output_section_is_yaml_error() {
        let yaml = r#"mixlite: v1
api_key: "k"
hybrid_model_name: hybrid
thinking:
  base_url: "http://a"
  model: r1
"#;
        let err = load_config(&make_source(yaml)).unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)), "got: {err}");
    }

    #[test]
    fn empty_api_key_rejected() {
        let yaml = MINIMAL_YAML.replace("api_key: \"k\"", "api_key: \"\"");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("api_key"), "got: {err}");
    }

    #[test]
    fn base_url_without_scheme_rejected() {
        let yaml = MINIMAL_YAML.replace("\"http://b\"", "\"writer.local\"");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("output.base_url"), "got: {err}");
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let yaml = MINIMAL_YAML.replace("model: r1", "model: r1\n  temperature: 3.5");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("thinking.temperature"), "got: {err}");
    }

    #[test]
    fn unknown_reasoning_role_rejected() {
        let yaml = format!("{MINIMAL_YAML}reasoning_role: system\n");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("reasoning_role"), "got: {err}");
    }

    #[test]
    fn misspelled_stage_key_rejected() {
        let yaml = MINIMAL_YAML.replace("model: r1", "model: r1\n  timout_ms: 100");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)), "got: {err}");
        assert!(err.to_string().contains("timout_ms"), "got: {err}");

        let yaml = MINIMAL_YAML.replace("model: v3", "model: v3\n  allow_image: true");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("allow_image"), "got: {err}");
    }

    #[test]
    fn stage_keys_belong_to_their_stage() {
        let yaml = MINIMAL_YAML.replace("model: r1", "model: r1\n  tool_passthrough: true");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("tool_passthrough"), "got: {err}");

        let yaml = MINIMAL_YAML.replace("model: v3", "model: v3\n  prompt: \"think\"");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(err.to_string().contains("prompt"), "got: {err}");
    }

    #[test]
    fn reserved_extra_body_fields_dropped() {
        let yaml = MINIMAL_YAML.replace(
            "model: v3",
            "model: v3\n  extra_body:\n    model: sneaky\n    top_p: 0.9",
        );
        let config = load_config(&make_source(&yaml)).unwrap();
        let extra = &config.output.upstream.extra_body;
        assert!(extra.get("model").is_none());
        assert_eq!(extra["top_p"], 0.9);
    }

    #[test]
    fn variables_resolved_from_environment() {
        std::env::set_var("MIXLITE_TEST_OUTPUT_KEY", "from-env");
        let yaml = MINIMAL_YAML.replace(
            "model: v3",
            "model: v3\n  api_key: \"${MIXLITE_TEST_OUTPUT_KEY}\"",
        );
        let config = load_config(&make_source(&yaml)).unwrap();
        assert_eq!(config.output.upstream.api_key, "from-env");
    }

    #[test]
    fn undefined_variable_fails_load() {
        std::env::remove_var("MIXLITE_TEST_MISSING_URL");
        let yaml = MINIMAL_YAML.replace("\"http://a\"", "\"${MIXLITE_TEST_MISSING_URL}\"");
        let err = load_config(&make_source(&yaml)).unwrap_err();
        assert!(matches!(err, ConfigError::UndefinedVariable { .. }), "got: {err}");
    }

    #[test]
    fn file_source_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixlite.yaml");
        std::fs::write(&path, MINIMAL_YAML).unwrap();

        let config = load_config(&FileSource { path }).unwrap();
        assert_eq!(config.hybrid_model_name, "hybrid");
    }

    #[test]
    fn file_source_missing_file_names_origin() {
        let source = FileSource {
            path: "/definitely/not/here/mixlite.yaml".into(),
        };
        assert_eq!(source.origin(), "/definitely/not/here/mixlite.yaml");
        let err = load_config(&source).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"), "got: {err}");
        assert_eq!(make_source(MINIMAL_YAML).origin(), "<inline>");
    }
}
