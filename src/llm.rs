//! OpenAI-compatible chat completions client used for agent nodes.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{LlmExecutor, LlmOptions, LlmResponse, LlmUsage};

/// Works with OpenAI, Ollama, vLLM, Groq, OpenRouter and other endpoints that
/// speak the chat completions protocol.
pub struct OpenAiExecutor {
    http: Client,
    config: ModelConfig,
}

impl OpenAiExecutor {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WeftError::Llm(e.to_string()))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<Usage> for LlmUsage {
    fn from(u: Usage) -> Self {
        Self {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }
    }
}

impl LlmExecutor for OpenAiExecutor {
    fn invoke(&self, prompt: String, options: LlmOptions) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async move {
            let mut messages = Vec::new();
            if let Some(system) = options.system_prompt.as_deref() {
                messages.push(ChatMessage {
                    role: "system",
                    content: system,
                });
            }
            messages.push(ChatMessage {
                role: "user",
                content: &prompt,
            });
            let body = ChatRequest {
                model: &self.config.model,
                messages,
                max_tokens: options.max_tokens.unwrap_or(self.config.max_tokens),
                temperature: options.temperature,
                stream: options.streaming,
                stream_options: options.streaming.then_some(StreamOptions { include_usage: true }),
            };

            let mut req = self.http.post(self.endpoint()).json(&body);
            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
            let response = req.send().await.map_err(|e| WeftError::Llm(e.to_string()))?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Ok(LlmResponse::failed(format!("HTTP {}: {}", status, body)));
            }

            if !options.streaming {
                let completion: Completion = response
                    .json()
                    .await
                    .map_err(|e| WeftError::Llm(e.to_string()))?;
                let content = completion
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                let mut result = LlmResponse::ok(content);
                result.usage = completion.usage.map(Into::into);
                return Ok(result);
            }

            let mut parser = SseParser::default();
            let mut content = String::new();
            let mut usage = None;
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| WeftError::Llm(e.to_string()))?;
                for data in parser.feed(&String::from_utf8_lossy(&chunk)) {
                    if data.trim() == "[DONE]" {
                        continue;
                    }
                    let parsed: StreamChunk = match serde_json::from_str(&data) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(data = %data, error = %e, "Failed to parse SSE chunk");
                            continue;
                        }
                    };
                    if let Some(u) = parsed.usage {
                        usage = Some(u.into());
                    }
                    let delta = parsed.choices.into_iter().next().and_then(|c| c.delta.content);
                    if let Some(text) = delta.filter(|t| !t.is_empty()) {
                        if let Some(cb) = &options.on_stream {
                            cb(&text);
                        }
                        content.push_str(&text);
                    }
                }
            }
            debug!(chars = content.len(), "Streamed completion finished");
            let mut result = LlmResponse::ok(content);
            result.usage = usage;
            Ok(result)
        })
    }
}

/// Splits a server-sent-events byte stream into `data:` payloads.
#[derive(Default)]
struct SseParser {
    buffer: String,
}

impl SseParser {
    fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();
            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }
        events
    }
}
