use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::definition::HumanChoice;
use crate::error::Result;

/// Callback receiving streamed text deltas.
pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call options for an LLM invocation.
#[derive(Clone, Default)]
pub struct LlmOptions {
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub streaming: bool,
    pub on_stream: Option<StreamCallback>,
}

impl std::fmt::Debug for LlmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmOptions")
            .field("system_prompt", &self.system_prompt)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("streaming", &self.streaming)
            .field("on_stream", &self.on_stream.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Result of an LLM invocation. A provider-level failure is reported with
/// `success = false` and `error` set rather than as an `Err`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<LlmToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LlmResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// LLM executor. The engine reaches model providers only through this trait.
pub trait LlmExecutor: Send + Sync + 'static {
    fn invoke(&self, prompt: String, options: LlmOptions) -> BoxFuture<'_, Result<LlmResponse>>;
}

/// A human's answer to a pending request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanResponse {
    pub choice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_text: Option<String>,
}

impl HumanResponse {
    pub fn new(choice: impl Into<String>) -> Self {
        Self {
            choice: choice.into(),
            free_text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.free_text = Some(text.into());
        self
    }
}

/// Optional provider that answers human-in-the-loop requests directly.
/// Without one, requests wait until the engine's `respond_human` is called.
pub trait HumanInputProvider: Send + Sync + 'static {
    fn request(
        &self,
        prompt: String,
        choices: Vec<HumanChoice>,
    ) -> BoxFuture<'_, Result<HumanResponse>>;
}
