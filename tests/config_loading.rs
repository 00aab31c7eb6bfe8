use std::io::Write;

use weft_core::config::WeftConfig;
use weft_core::error::WeftError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_loop_iterations = 25
strict_templates = true
event_capacity = 64

[script]
timeout_ms = 250
max_operations = 5000
max_output_bytes = 2048

[output]
base_dir = "/tmp/weft-out"
webhook_timeout_secs = 5

[llm]
base_url = "http://localhost:11434/v1"
model = "llama3"
api_key = "sk-test-key"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = WeftConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_loop_iterations, 25);
    assert!(config.engine.strict_templates);
    assert_eq!(config.engine.event_capacity, 64);
    assert_eq!(config.script.timeout_ms, 250);
    assert_eq!(config.script.max_operations, 5000);
    assert_eq!(config.script.max_output_bytes, 2048);
    assert_eq!(config.output.base_dir, "/tmp/weft-out");
    assert_eq!(config.output.webhook_timeout_secs, 5);

    let llm = config.llm.expect("llm section");
    assert_eq!(llm.base_url, "http://localhost:11434/v1");
    assert_eq!(llm.model, "llama3");
    assert_eq!(llm.api_key.as_deref(), Some("sk-test-key"));
    assert_eq!(llm.max_tokens, 4096);
}

#[test]
fn test_empty_config_uses_defaults() {
    let tmp = tempfile::NamedTempFile::new().expect("create temp file");
    let config = WeftConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_loop_iterations, 100);
    assert!(!config.engine.strict_templates);
    assert_eq!(config.engine.event_capacity, 256);
    assert_eq!(config.script.timeout_ms, 1000);
    assert_eq!(config.script.max_operations, 100_000);
    assert_eq!(config.script.max_output_bytes, 1024 * 1024);
    assert_eq!(config.output.base_dir, ".");
    assert_eq!(config.output.webhook_timeout_secs, 30);
    assert!(config.llm.is_none());
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("WEFT_TEST_CONFIG_KEY", "sk-from-env");
    let config = WeftConfig::parse(
        r#"
[llm]
model = "gpt-4o-mini"
api_key = "${WEFT_TEST_CONFIG_KEY}"
"#,
    )
    .expect("parse config");
    std::env::remove_var("WEFT_TEST_CONFIG_KEY");

    let llm = config.llm.expect("llm section");
    assert_eq!(llm.api_key.as_deref(), Some("sk-from-env"));
    assert_eq!(llm.base_url, "https://api.openai.com/v1");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = WeftConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, WeftError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let err = WeftConfig::parse("[engine\nmax_loop_iterations = ").unwrap_err();
    assert!(matches!(err, WeftError::Config(_)));
}

#[test]
fn test_relative_output_paths_resolve_against_base_dir() {
    let config = WeftConfig::parse("[output]\nbase_dir = \"/srv/weft\"\n").expect("parse config");
    assert_eq!(
        config.output.resolve_path("reports/a.txt"),
        std::path::PathBuf::from("/srv/weft/reports/a.txt")
    );
    assert_eq!(
        config.output.resolve_path("/abs/b.txt"),
        std::path::PathBuf::from("/abs/b.txt")
    );
}
