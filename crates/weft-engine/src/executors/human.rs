use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::warn;

use weft_core::definition::{HumanChoice, NodeConfig, NodeType};
use weft_core::error::Result;
use weft_transform::path::lookup;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::config_mismatch;

/// Suspends the branch until a human picks one of the configured choices.
/// The chosen id becomes the output port.
pub struct HumanExecutor;

impl NodeExecutor for HumanExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Human
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Human(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Human));
            };
            let input = ctx.primary_input();
            let context = if config.context_fields.is_empty() {
                input
            } else {
                let mut fields = Map::new();
                for field in &config.context_fields {
                    fields.insert(field.clone(), lookup(&input, field).unwrap_or(Value::Null));
                }
                Value::Object(fields)
            };
            let prompt = ctx.render(&config.prompt).await?;

            let response = ctx
                .request_human(prompt, config.choices.clone(), context.clone())
                .await?;
            let choice = resolve_choice(&config.choices, &response.choice);
            if config.choices.iter().all(|c| c.id != choice) && !config.choices.is_empty() {
                warn!(node_id = %ctx.node.id, choice = %choice, "Human chose an unlisted option");
            }

            let output = json!({
                "choice": choice,
                "freeText": response.free_text,
                "context": context,
            });
            Ok(NodeOutcome::new(output).with_port(choice))
        })
    }
}

/// Map an answer onto a choice id, accepting the label (case-insensitive)
/// as well as the id. Unknown answers pass through unchanged.
fn resolve_choice(choices: &[HumanChoice], answer: &str) -> String {
    let answer = answer.trim();
    if let Some(c) = choices.iter().find(|c| c.id == answer) {
        return c.id.clone();
    }
    choices
        .iter()
        .find(|c| c.id.eq_ignore_ascii_case(answer) || c.label.eq_ignore_ascii_case(answer))
        .map(|c| c.id.clone())
        .unwrap_or_else(|| answer.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::engine::WorkflowEngine;
    use crate::executors::test_support::node;
    use weft_test_utils::ScriptedHuman;

    fn review() -> weft_core::definition::WorkflowNode {
        node(
            "h",
            NodeType::Human,
            json!({
                "prompt": "Approve {{title}}?",
                "choices": [{"id": "approve", "label": "Approve"}, "reject"],
                "contextFields": ["title", "meta.owner"]
            }),
        )
    }

    #[test]
    fn choice_resolution() {
        let choices = vec![HumanChoice::new("approve", "Looks good"), HumanChoice::new("reject", "Reject")];
        assert_eq!(resolve_choice(&choices, "approve"), "approve");
        assert_eq!(resolve_choice(&choices, "looks GOOD"), "approve");
        assert_eq!(resolve_choice(&choices, " REJECT "), "reject");
        assert_eq!(resolve_choice(&choices, "other"), "other");
    }

    #[tokio::test]
    async fn provider_answer_selects_port() {
        let human = Arc::new(ScriptedHuman::new().answer_with_text("Approve", "ship it"));
        let engine = WorkflowEngine::builder().human_provider(human.clone()).build();
        let out = engine
            .run_node(
                review(),
                json!({"title": "Release 2", "meta": {"owner": "kim"}, "body": "..."}),
                Map::new(),
            )
            .await
            .unwrap();

        assert_eq!(out.output_port.as_deref(), Some("approve"));
        assert_eq!(out.output["freeText"], json!("ship it"));
        assert_eq!(out.output["context"], json!({"title": "Release 2", "meta.owner": "kim"}));
        assert_eq!(human.prompts(), vec!["Approve Release 2?"]);
        assert_eq!(human.last_choices()[1], HumanChoice::new("reject", "reject"));
    }

    #[tokio::test]
    async fn waits_for_respond_human_without_provider() {
        let engine = Arc::new(WorkflowEngine::builder().build());
        let runner = engine.clone();
        let task = tokio::spawn(async move {
            runner
                .run_node(review(), json!({"title": "T"}), Map::new())
                .await
        });

        let mut pending = Vec::new();
        for _ in 0..100 {
            pending = engine.pending_human().await;
            if !pending.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "h#1");
        assert_eq!(pending[0].prompt, "Approve T?");

        let id = engine.respond_human("reject", None).await.unwrap();
        assert_eq!(id, "h#1");
        let out = task.await.unwrap().unwrap();
        assert_eq!(out.output_port.as_deref(), Some("reject"));
    }
}
