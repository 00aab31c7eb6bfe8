use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Top-level weft configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeftConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub output: OutputSinkConfig,
    /// Model endpoint used by the CLI's agent nodes.
    #[serde(default)]
    pub llm: Option<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default `maxIterations` for loop nodes that don't set one.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,
    /// Render every template in strict mode.
    #[serde(default)]
    pub strict_templates: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: default_max_loop_iterations(),
            strict_templates: false,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_max_loop_iterations() -> u32 { 100 }
fn default_event_capacity() -> usize { 256 }

/// Budgets for the sandboxed script and expression evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "default_script_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_script_timeout_ms(),
            max_operations: default_max_operations(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl ScriptConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_script_timeout_ms() -> u64 { 1_000 }
fn default_max_operations() -> u64 { 100_000 }
fn default_max_output_bytes() -> usize { 1024 * 1024 }

/// Settings for the `output` node's file and webhook destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSinkConfig {
    /// Relative file-destination paths resolve against this directory.
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

impl Default for OutputSinkConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

impl OutputSinkConfig {
    /// Resolve a rendered file path against `base_dir` (expanding `~/`).
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            return p;
        }
        let base = &self.base_dir;
        if let Some(rest) = base.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest).join(p);
            }
        }
        PathBuf::from(base).join(p)
    }
}

fn default_base_dir() -> String { ".".to_string() }
fn default_webhook_timeout() -> u64 { 30 }

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_request_timeout() -> u64 { 120 }

impl WeftConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| WeftError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_WEFT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_WEFT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_WEFT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_WEFT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_WEFT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = WeftConfig::parse("").unwrap();
        assert_eq!(config.engine.max_loop_iterations, 100);
        assert!(!config.engine.strict_templates);
        assert_eq!(config.script.timeout_ms, 1_000);
        assert_eq!(config.script.max_output_bytes, 1024 * 1024);
        assert_eq!(config.output.webhook_timeout_secs, 30);
        assert!(config.llm.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = WeftConfig::parse(
            r#"
[engine]
strict_templates = true

[llm]
model = "gpt-4o-mini"
"#,
        )
        .unwrap();
        assert!(config.engine.strict_templates);
        assert_eq!(config.engine.event_capacity, 256);
        let llm = config.llm.unwrap();
        assert_eq!(llm.base_url, "https://api.openai.com/v1");
        assert_eq!(llm.max_tokens, 4096);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = WeftConfig::parse("[engine\nmax_loop_iterations = 1").unwrap_err();
        assert!(matches!(err, WeftError::Config(_)));
    }

    #[test]
    fn test_resolve_relative_output_path() {
        let sink = OutputSinkConfig {
            base_dir: "/srv/out".into(),
            webhook_timeout_secs: 30,
        };
        assert_eq!(sink.resolve_path("a/b.txt"), PathBuf::from("/srv/out/a/b.txt"));
        assert_eq!(sink.resolve_path("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
