use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, info};

use weft_core::definition::{NodeConfig, NodeType, OutputConfig};
use weft_core::error::{Result, WeftError};
use weft_core::event::WorkflowEvent;
use weft_transform::value::display;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::config_mismatch;

/// Routes the node's input to a sink: chat, file, webhook, variable or log.
pub struct OutputExecutor;

impl NodeExecutor for OutputExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Output
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Output(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Output));
            };
            let input = ctx.primary_input();

            let output = match config {
                OutputConfig::Chat { message_template } => {
                    let content = message(ctx, message_template.as_deref(), &input).await?;
                    ctx.emit(WorkflowEvent::OutputMessage {
                        node_id: ctx.node.id.clone(),
                        content: content.clone(),
                    });
                    Value::String(content)
                }
                OutputConfig::Log { message_template } => {
                    let content = message(ctx, message_template.as_deref(), &input).await?;
                    info!(node_id = %ctx.node.id, message = %content, "Workflow output");
                    Value::String(content)
                }
                OutputConfig::File {
                    file_path,
                    content_template,
                } => write_file(ctx, file_path, content_template.as_deref(), &input).await?,
                OutputConfig::Webhook {
                    webhook_url,
                    webhook_headers,
                } => post_webhook(ctx, webhook_url, webhook_headers, &input).await?,
                OutputConfig::Variable { variable_name } => {
                    ctx.set_variable(variable_name.clone(), input.clone()).await;
                    debug!(node_id = %ctx.node.id, variable = %variable_name, "Variable written");
                    input
                }
            };
            Ok(NodeOutcome::new(output))
        })
    }
}

async fn message(ctx: &NodeExecutionContext, template: Option<&str>, input: &Value) -> Result<String> {
    match template {
        Some(t) => ctx.render(t).await,
        None => Ok(display(input)),
    }
}

async fn write_file(
    ctx: &NodeExecutionContext,
    file_path: &str,
    content_template: Option<&str>,
    input: &Value,
) -> Result<Value> {
    let rendered = ctx.render(file_path).await?;
    let path = ctx.config().output.resolve_path(&rendered);
    let content = match content_template {
        Some(t) => ctx.render(t).await?,
        None => match input {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other)?,
        },
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, &content).await?;
    info!(node_id = %ctx.node.id, path = %path.display(), bytes = content.len(), "Wrote output file");
    Ok(json!({
        "path": path.display().to_string(),
        "bytes": content.len(),
    }))
}

async fn post_webhook(
    ctx: &NodeExecutionContext,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: &Value,
) -> Result<Value> {
    let timeout = Duration::from_secs(ctx.config().output.webhook_timeout_secs);
    let mut request = ctx
        .http()
        .post(url)
        .timeout(timeout)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .json(body);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request
        .send()
        .await
        .map_err(|e| WeftError::Webhook(format!("{}: {}", url, e)))?;
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| WeftError::Webhook(format!("{}: {}", url, e)))?;
    if !status.is_success() {
        return Err(WeftError::Webhook(format!(
            "{} returned HTTP {}",
            url,
            status.as_u16()
        )));
    }
    debug!(node_id = %ctx.node.id, url, status = status.as_u16(), "Webhook delivered");

    let parsed = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Ok(json!({
        "status": status.as_u16(),
        "response": parsed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WorkflowEngine;
    use crate::executors::test_support::{node, run};
    use serde_json::Map;
    use weft_core::config::WeftConfig;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_emits_message() {
        let engine = WorkflowEngine::builder().build();
        let mut rx = engine.subscribe();
        let out = engine
            .run_node(
                node("o", NodeType::Output, json!({"destination": "chat", "messageTemplate": "Done: {{n}}"})),
                json!({"n": 3}),
                Map::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.output, json!("Done: 3"));

        let mut seen = None;
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::OutputMessage { content, .. } = event {
                seen = Some(content);
            }
        }
        assert_eq!(seen.as_deref(), Some("Done: 3"));
    }

    #[tokio::test]
    async fn log_defaults_to_stringified_input() {
        let out = run(node("o", NodeType::Output, json!({"destination": "log"})), json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(out.output, json!(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn file_renders_path_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WeftConfig::default();
        config.output.base_dir = dir.path().display().to_string();
        let engine = WorkflowEngine::builder().config(config).build();

        let out = engine
            .run_node(
                node(
                    "o",
                    NodeType::Output,
                    json!({
                        "destination": "file",
                        "filePath": "reports/{{name}}.txt",
                        "contentTemplate": "score={{score}}"
                    }),
                ),
                json!({"name": "weekly", "score": 9}),
                Map::new(),
            )
            .await
            .unwrap();

        let written = dir.path().join("reports/weekly.txt");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "score=9");
        assert_eq!(out.output["bytes"], json!(7));
    }

    #[tokio::test]
    async fn webhook_posts_json_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-token", "abc"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"event": "done"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let out = run(
            node(
                "o",
                NodeType::Output,
                json!({"destination": "webhook", "webhookUrl": url, "webhookHeaders": {"X-Token": "abc"}}),
            ),
            json!({"event": "done"}),
        )
        .await
        .unwrap();
        assert_eq!(out.output, json!({"status": 200, "response": {"ok": true}}));
    }

    #[tokio::test]
    async fn webhook_non_2xx_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        let err = run(
            node("o", NodeType::Output, json!({"destination": "webhook", "webhookUrl": url})),
            json!({}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WeftError::Webhook(ref m) if m.contains("HTTP 500")));
    }

    #[tokio::test]
    async fn variable_is_stored() {
        let engine = WorkflowEngine::builder().build();
        let def = weft_core::definition::WorkflowDefinition::new("v")
            .with_node(node("t", NodeType::Trigger, Value::Null))
            .with_node(node("o", NodeType::Output, json!({"destination": "variable", "variableName": "result"})))
            .with_edge(weft_core::definition::WorkflowEdge::new("t", "o"));
        let instance = engine.execute(&def, json!([1, 2])).await;
        assert_eq!(instance.data["result"], json!([1, 2]));
        assert_eq!(instance.output, Some(json!([1, 2])));
    }
}
