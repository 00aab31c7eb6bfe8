use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use weft_core::definition::{NodeConfig, NodeType};
use weft_core::error::Result;
use weft_core::event::WorkflowEvent;
use weft_core::traits::{LlmOptions, StreamCallback};
use weft_transform::value::display;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::config_mismatch;

/// Renders a prompt and invokes the engine's LLM executor.
pub struct AgentExecutor;

impl NodeExecutor for AgentExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Agent
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Agent(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Agent));
            };

            let prompt = match &config.input_template {
                Some(template) => ctx.render(template).await?,
                None => display(&ctx.primary_input()),
            };

            let on_stream: Option<StreamCallback> = if config.streaming {
                let bus = ctx.event_bus();
                let node_id = ctx.node.id.clone();
                Some(Arc::new(move |delta: &str| {
                    bus.publish(WorkflowEvent::NodeProgress {
                        node_id: node_id.clone(),
                        delta: delta.to_string(),
                    })
                }))
            } else {
                None
            };

            let options = LlmOptions {
                system_prompt: config.system_prompt.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                streaming: config.streaming,
                on_stream,
            };

            debug!(node_id = %ctx.node.id, prompt_len = prompt.len(), "Invoking LLM");
            let response = ctx.llm().invoke(prompt, options).await?;
            if !response.success {
                let reason = response.error.unwrap_or_else(|| "unknown error".to_string());
                return Ok(NodeOutcome::failed(format!("LLM invocation failed: {}", reason)));
            }

            let output = if config.output_schema.is_some() {
                parse_structured(&ctx.node.id, &response.content)
            } else {
                Value::String(response.content)
            };
            Ok(NodeOutcome::new(output))
        })
    }
}

/// Parse a JSON reply, tolerating a surrounding markdown fence. Anything
/// unparseable is kept as the raw string.
fn parse_structured(node_id: &str, content: &str) -> Value {
    match serde_json::from_str(strip_fences(content)) {
        Ok(value) => value,
        Err(e) => {
            warn!(node_id, error = %e, "Agent output is not valid JSON, keeping raw text");
            Value::String(content.to_string())
        }
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WorkflowEngine;
    use crate::executors::test_support::node;
    use serde_json::{json, Map};
    use weft_test_utils::MockLlm;

    fn engine(llm: Arc<MockLlm>) -> WorkflowEngine {
        WorkflowEngine::builder().llm(llm).build()
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn renders_template_and_passes_options() {
        let llm = Arc::new(MockLlm::new().with_response("summary"));
        let agent = node(
            "a",
            NodeType::Agent,
            json!({
                "systemPrompt": "be brief",
                "temperature": 0.2,
                "maxTokens": 64,
                "inputTemplate": "Summarize: {{text}}"
            }),
        );
        let out = engine(llm.clone())
            .run_node(agent, json!({"text": "long story"}), Map::new())
            .await
            .unwrap();
        assert_eq!(out.output, json!("summary"));

        let calls = llm.calls();
        assert_eq!(calls[0].prompt, "Summarize: long story");
        assert_eq!(calls[0].system_prompt.as_deref(), Some("be brief"));
        assert_eq!(calls[0].temperature, Some(0.2));
        assert_eq!(calls[0].max_tokens, Some(64));
    }

    #[tokio::test]
    async fn stringifies_input_without_template() {
        let llm = Arc::new(MockLlm::new());
        let out = engine(llm.clone())
            .run_node(node("a", NodeType::Agent, json!({})), json!({"q": 1}), Map::new())
            .await
            .unwrap();
        assert_eq!(llm.calls()[0].prompt, r#"{"q":1}"#);
        assert_eq!(out.output, json!(r#"{"q":1}"#));
    }

    #[tokio::test]
    async fn output_schema_parses_json_opportunistically() {
        let llm = Arc::new(
            MockLlm::new()
                .with_response("```json\n{\"score\": 7}\n```")
                .with_response("not json"),
        );
        let engine = engine(llm);
        let agent = node("a", NodeType::Agent, json!({"outputSchema": {"type": "object"}}));

        let parsed = engine.run_node(agent.clone(), json!("x"), Map::new()).await.unwrap();
        assert_eq!(parsed.output, json!({"score": 7}));

        let raw = engine.run_node(agent, json!("x"), Map::new()).await.unwrap();
        assert_eq!(raw.output, json!("not json"));
        assert!(raw.error.is_none());
    }

    #[tokio::test]
    async fn llm_failure_fails_node() {
        let llm = Arc::new(MockLlm::new().with_failure("rate limited"));
        let out = engine(llm)
            .run_node(node("a", NodeType::Agent, json!({})), json!("x"), Map::new())
            .await
            .unwrap();
        assert_eq!(out.error.as_deref(), Some("LLM invocation failed: rate limited"));
    }

    #[tokio::test]
    async fn streaming_emits_progress_events() {
        let llm = Arc::new(MockLlm::new().with_chunks(&["Hel", "lo"]));
        let engine = engine(llm);
        let mut rx = engine.subscribe();
        let out = engine
            .run_node(node("a", NodeType::Agent, json!({"streaming": true})), json!("hi"), Map::new())
            .await
            .unwrap();
        assert_eq!(out.output, json!("Hello"));

        let mut deltas = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::NodeProgress { node_id, delta } = event {
                assert_eq!(node_id, "a");
                deltas.push(delta);
            }
        }
        assert_eq!(deltas, vec!["Hel", "lo"]);
    }
}
