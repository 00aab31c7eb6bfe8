//! Terse builders for definitions in tests.

use serde_json::Value;

use weft_core::definition::{NodeConfig, NodeType, WorkflowDefinition, WorkflowEdge, WorkflowNode};

/// Build a node from its type and raw JSON config. Panics on invalid config.
pub fn node(id: &str, node_type: NodeType, config: Value) -> WorkflowNode {
    let config = NodeConfig::from_parts(node_type, config)
        .unwrap_or_else(|e| panic!("invalid {} config for '{}': {}", node_type, id, e));
    WorkflowNode::new(id, config)
}

pub fn trigger(id: &str) -> WorkflowNode {
    node(id, NodeType::Trigger, Value::Null)
}

pub fn edge(from: &str, to: &str) -> WorkflowEdge {
    WorkflowEdge::new(from, to)
}

/// Edge leaving `from` through `port`.
pub fn port_edge(from: &str, port: &str, to: &str) -> WorkflowEdge {
    WorkflowEdge::new(from, to).from_port(port)
}

pub fn definition(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> WorkflowDefinition {
    let mut def = WorkflowDefinition::new("test-workflow");
    def.nodes = nodes;
    def.edges = edges;
    def
}
