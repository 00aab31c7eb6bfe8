use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use weft_core::definition::{LoopKind, NodeConfig, NodeType};
use weft_core::error::{Result, WeftError};
use weft_transform::path::lookup;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::condition::evaluate_rule;
use crate::executors::config_mismatch;

/// Loop controller. `for_each` returns the array to iterate; `while` and
/// `times` leave through `"continue"` or `"done"` and rely on a graph edge
/// from `"continue"` back upstream to re-invoke them. The node's execution
/// count is the iteration number.
pub struct LoopExecutor;

impl NodeExecutor for LoopExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Loop
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Loop(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Loop));
            };
            let input = ctx.primary_input();

            let keep_going = match &config.kind {
                LoopKind::ForEach { array_field } => {
                    let items = match array_field {
                        Some(field) => lookup(&input, field),
                        None => Some(input),
                    };
                    return Ok(match items {
                        Some(items @ Value::Array(_)) => NodeOutcome::new(items),
                        _ => NodeOutcome::failed(format!(
                            "for_each loop expects an array at '{}'",
                            array_field.as_deref().unwrap_or("input")
                        )),
                    });
                }
                LoopKind::While { condition } => {
                    let variables = Value::Object(ctx.variables().await);
                    evaluate_rule(condition, &input, &variables, &ctx.config().script)?
                }
                LoopKind::Times { count } => ctx.execution_count <= *count,
            };

            let iteration = ctx.execution_count;
            let max = config
                .max_iterations
                .unwrap_or(ctx.config().engine.max_loop_iterations);
            if keep_going && iteration > max {
                return Err(WeftError::MaxIterationsExceeded {
                    node_id: ctx.node.id.clone(),
                    max,
                });
            }

            let port = if keep_going { "continue" } else { "done" };
            debug!(node_id = %ctx.node.id, iteration, port, "Loop step");
            Ok(NodeOutcome::new(input).with_port(port))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::test_support::{node, run};
    use serde_json::json;

    #[tokio::test]
    async fn for_each_returns_items() {
        let out = run(
            node("l", NodeType::Loop, json!({"loopType": "for_each", "arrayField": "rows"})),
            json!({"rows": [1, 2]}),
        )
        .await
        .unwrap();
        assert_eq!(out.output, json!([1, 2]));
        assert!(out.output_port.is_none());

        let bare = run(node("l", NodeType::Loop, json!({"loopType": "for_each"})), json!(["a"]))
            .await
            .unwrap();
        assert_eq!(bare.output, json!(["a"]));

        let bad = run(node("l", NodeType::Loop, json!({"loopType": "for_each"})), json!({"a": 1}))
            .await
            .unwrap();
        assert!(bad.error.is_some());
    }

    #[tokio::test]
    async fn first_times_iteration_continues() {
        let out = run(node("l", NodeType::Loop, json!({"loopType": "times", "count": 3})), json!("x"))
            .await
            .unwrap();
        assert_eq!(out.output_port.as_deref(), Some("continue"));
        assert_eq!(out.output, json!("x"));

        let zero = run(node("l", NodeType::Loop, json!({"loopType": "times", "count": 0})), json!("x"))
            .await
            .unwrap();
        assert_eq!(zero.output_port.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn while_evaluates_condition() {
        let looping = node(
            "l",
            NodeType::Loop,
            json!({"loopType": "while", "condition": {"field": "pending", "operator": "greater_than", "value": 0}}),
        );
        let more = run(looping.clone(), json!({"pending": 2})).await.unwrap();
        assert_eq!(more.output_port.as_deref(), Some("continue"));
        let done = run(looping, json!({"pending": 0})).await.unwrap();
        assert_eq!(done.output_port.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn zero_max_iterations_fails_immediately() {
        let err = run(
            node("l", NodeType::Loop, json!({"loopType": "times", "count": 5, "maxIterations": 0})),
            json!(null),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WeftError::MaxIterationsExceeded { max: 0, .. }));
        assert!(err.to_string().contains("exceeded maximum iterations"));
    }
}
