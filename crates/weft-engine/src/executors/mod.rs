//! Built-in node executors, one per node type.

pub mod agent;
pub mod condition;
pub mod human;
pub mod loop_node;
pub mod merge;
pub mod output;
pub mod split;
pub mod transform;
pub mod trigger;
pub mod vote;

use weft_core::definition::NodeType;
use weft_core::error::WeftError;

use crate::context::NodeExecutionContext;

/// The node's config variant does not belong to the executor it was routed to.
pub(crate) fn config_mismatch(ctx: &NodeExecutionContext, expected: NodeType) -> WeftError {
    WeftError::Definition(format!(
        "node '{}' has {} config, expected {}",
        ctx.node.id,
        ctx.node.node_type(),
        expected
    ))
}

#[cfg(test)]
pub(crate) mod test_support {
    use serde_json::{Map, Value};

    use weft_core::definition::{NodeConfig, NodeType, WorkflowNode};
    use weft_core::error::Result;

    use crate::context::NodeOutcome;
    use crate::engine::WorkflowEngine;

    pub fn node(id: &str, node_type: NodeType, config: Value) -> WorkflowNode {
        WorkflowNode::new(id, NodeConfig::from_parts(node_type, config).unwrap())
    }

    /// Run one node standalone on a default engine.
    pub async fn run(node: WorkflowNode, input: Value) -> Result<NodeOutcome> {
        WorkflowEngine::builder()
            .build()
            .run_node(node, input, Map::new())
            .await
    }
}
