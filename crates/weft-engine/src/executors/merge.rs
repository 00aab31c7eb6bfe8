use futures::future::BoxFuture;
use serde_json::{Map, Value};

use weft_core::definition::{MergeStrategy, NodeConfig, NodeType};
use weft_core::error::Result;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::config_mismatch;

/// Combines the inputs delivered by every incoming branch. The dispatcher
/// only invokes it once all branches have resolved.
pub struct MergeExecutor;

impl NodeExecutor for MergeExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Merge
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Merge(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Merge));
            };
            let output = match config.strategy {
                MergeStrategy::Concatenate => concatenate(&ctx.inputs),
                MergeStrategy::Object => {
                    let mut out = Map::new();
                    for (port, value) in &ctx.inputs {
                        let key = config.key_mapping.get(port).unwrap_or(port);
                        out.insert(key.clone(), value.clone());
                    }
                    Value::Object(out)
                }
                MergeStrategy::WaitAll | MergeStrategy::WaitAny => Value::Object(ctx.inputs.clone()),
            };
            Ok(NodeOutcome::new(output))
        })
    }
}

/// Flatten port values into one array, ordered by port name.
fn concatenate(inputs: &Map<String, Value>) -> Value {
    let mut ports: Vec<&String> = inputs.keys().collect();
    ports.sort();
    let mut out = Vec::new();
    for port in ports {
        match &inputs[port.as_str()] {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Value::Array(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::WorkflowEngine;
    use crate::executors::test_support::node;
    use serde_json::json;
    use weft_core::definition::{WorkflowDefinition, WorkflowEdge, WorkflowNode};

    fn inputs(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn concatenate_flattens_in_port_order() {
        let out = concatenate(&inputs(json!({"b": [3, 4], "a": 1, "c": "x"})));
        assert_eq!(out, json!([1, 3, 4, "x"]));
    }

    /// trigger feeds two ports of the merge directly.
    async fn merged(config: Value) -> Value {
        let def = WorkflowDefinition::new("m")
            .with_node(node("t", NodeType::Trigger, Value::Null))
            .with_node(WorkflowNode::new(
                "m",
                NodeConfig::from_parts(NodeType::Merge, config).unwrap(),
            ))
            .with_edge(WorkflowEdge::new("t", "m").to_port("left"))
            .with_edge(WorkflowEdge::new("t", "m").to_port("right"));
        let instance = WorkflowEngine::builder().build().execute(&def, json!([1])).await;
        instance.node_state("m").unwrap().output.clone().unwrap()
    }

    #[tokio::test]
    async fn strategies() {
        assert_eq!(
            merged(json!({"strategy": "object", "keyMapping": {"left": "a"}})).await,
            json!({"a": [1], "right": [1]})
        );
        assert_eq!(merged(json!({"strategy": "concatenate"})).await, json!([1, 1]));
        assert_eq!(
            merged(json!({"strategy": "wait_all"})).await,
            json!({"left": [1], "right": [1]})
        );
        assert_eq!(
            merged(json!({"strategy": "wait_any"})).await,
            json!({"left": [1], "right": [1]})
        );
    }
}
