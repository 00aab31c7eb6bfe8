use futures::future::BoxFuture;

use weft_core::definition::NodeType;
use weft_core::error::Result;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};

/// Entry point: hands the trigger payload to its successors unchanged.
pub struct TriggerExecutor;

impl NodeExecutor for TriggerExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Trigger
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move { Ok(NodeOutcome::new(ctx.primary_input())) })
    }
}
