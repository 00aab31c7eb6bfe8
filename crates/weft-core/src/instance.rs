use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::definition::WorkflowDefinition;

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Idle,
    Running,
    WaitingHuman,
    Completed,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Idle,
    Running,
    Success,
    Error,
    Skipped,
}

impl NodeStatus {
    /// Whether a merge may treat this source as settled.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

/// Per-node execution state. Re-used across loop iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub node_id: String,
    pub status: NodeStatus,
    pub inputs: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeState {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Idle,
            inputs: Map::new(),
            output: None,
            error: None,
            execution_count: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Started,
    Completed,
    Failed,
    Skipped,
}

/// Immutable audit record appended to an instance's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: String,
    pub node_id: String,
    pub node_label: String,
    pub action: StepAction,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl ExecutionStep {
    pub fn new(node_id: impl Into<String>, node_label: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            node_label: node_label.into(),
            action,
            timestamp: Utc::now(),
            output: None,
            error: None,
            duration_ms: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}

/// One execution run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: String,
    pub status: InstanceStatus,
    pub node_states: HashMap<String, NodeState>,
    /// Variable store shared by every node of the run.
    pub data: Map<String, Value>,
    pub history: Vec<ExecutionStep>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl WorkflowInstance {
    /// Create an idle instance with one `NodeState` per node and the
    /// definition's variables as the initial data.
    pub fn new(definition: &WorkflowDefinition) -> Self {
        let node_states = definition
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeState::new(n.id.clone())))
            .collect();
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: definition.id.clone(),
            status: InstanceStatus::Idle,
            node_states,
            data: definition.variables.clone(),
            history: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            output: None,
        }
    }

    pub fn node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }

    pub fn node_state_mut(&mut self, node_id: &str) -> Option<&mut NodeState> {
        self.node_states.get_mut(node_id)
    }

    /// Append to the audit log. History is never rewritten.
    pub fn record(&mut self, step: ExecutionStep) {
        self.history.push(step);
    }

    /// History entries for one node, oldest first.
    pub fn steps_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a ExecutionStep> {
        self.history.iter().filter(move |s| s.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{NodeConfig, SplitConfig, TriggerConfig, WorkflowNode};
    use serde_json::json;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new("wf")
            .with_node(WorkflowNode::new("t", NodeConfig::Trigger(TriggerConfig {})))
            .with_node(WorkflowNode::new("s", NodeConfig::Split(SplitConfig {})))
            .with_variable("seed", json!(1))
    }

    #[test]
    fn new_instance_has_state_per_node() {
        let instance = WorkflowInstance::new(&definition());
        assert_eq!(instance.status, InstanceStatus::Idle);
        assert_eq!(instance.node_states.len(), 2);
        assert!(instance
            .node_states
            .values()
            .all(|s| s.status == NodeStatus::Idle && s.execution_count == 0));
        assert_eq!(instance.data["seed"], json!(1));
        assert!(instance.history.is_empty());
    }

    #[test]
    fn history_filters_by_node() {
        let mut instance = WorkflowInstance::new(&definition());
        instance.record(ExecutionStep::new("t", "t", StepAction::Started));
        instance.record(ExecutionStep::new("s", "s", StepAction::Skipped));
        instance.record(
            ExecutionStep::new("t", "t", StepAction::Completed)
                .with_output(json!("ok"))
                .with_duration(3),
        );
        let steps: Vec<_> = instance.steps_for("t").map(|s| s.action).collect();
        assert_eq!(steps, vec![StepAction::Started, StepAction::Completed]);
    }

    #[test]
    fn status_serialization() {
        assert_eq!(
            serde_json::to_value(InstanceStatus::WaitingHuman).unwrap(),
            json!("waiting_human")
        );
        assert!(InstanceStatus::Cancelled.is_terminal());
        assert!(!InstanceStatus::WaitingHuman.is_terminal());
        assert!(NodeStatus::Skipped.is_settled());
        assert!(!NodeStatus::Running.is_settled());
    }
}
