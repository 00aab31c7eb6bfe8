use futures::future::BoxFuture;

use weft_core::definition::NodeType;
use weft_core::error::Result;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};

/// Passthrough. The dispatcher fans out concurrently after split nodes.
pub struct SplitExecutor;

impl NodeExecutor for SplitExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Split
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move { Ok(NodeOutcome::new(ctx.primary_input())) })
    }
}
