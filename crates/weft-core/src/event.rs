use serde::Serialize;
use serde_json::{Map, Value};

use crate::definition::HumanChoice;

/// Event emitted while a workflow runs. Serialized with a `type` tag such as
/// `"node:completed"`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    #[serde(rename = "workflow:started")]
    WorkflowStarted {
        instance_id: String,
        workflow_id: String,
    },
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted {
        instance_id: String,
        output: Option<Value>,
    },
    #[serde(rename = "workflow:failed")]
    WorkflowFailed { instance_id: String, error: String },
    #[serde(rename = "workflow:cancelled")]
    WorkflowCancelled { instance_id: String },

    #[serde(rename = "node:started")]
    NodeStarted {
        node_id: String,
        label: String,
        inputs: Map<String, Value>,
    },
    #[serde(rename = "node:completed")]
    NodeCompleted {
        node_id: String,
        output: Value,
        output_port: Option<String>,
        duration_ms: u64,
    },
    #[serde(rename = "node:failed")]
    NodeFailed { node_id: String, error: String },
    #[serde(rename = "node:skipped")]
    NodeSkipped { node_id: String },
    /// Streaming text from an agent node.
    #[serde(rename = "node:progress")]
    NodeProgress { node_id: String, delta: String },

    #[serde(rename = "human:requested")]
    HumanRequested {
        request_id: String,
        node_id: String,
        prompt: String,
        choices: Vec<HumanChoice>,
        context: Value,
    },
    #[serde(rename = "human:responded")]
    HumanResponded {
        request_id: String,
        node_id: String,
        choice: String,
        free_text: Option<String>,
    },

    #[serde(rename = "vote:cast")]
    VoteCast {
        node_id: String,
        voter: Option<String>,
        vote: String,
        reason: Option<String>,
    },
    #[serde(rename = "vote:tallied")]
    VoteTallied {
        node_id: String,
        outcome: String,
        tally: Map<String, Value>,
        total: usize,
    },

    /// Content routed to the `chat` output destination.
    #[serde(rename = "output:message")]
    OutputMessage { node_id: String, content: String },
}

impl WorkflowEvent {
    /// The `type` tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow:started",
            Self::WorkflowCompleted { .. } => "workflow:completed",
            Self::WorkflowFailed { .. } => "workflow:failed",
            Self::WorkflowCancelled { .. } => "workflow:cancelled",
            Self::NodeStarted { .. } => "node:started",
            Self::NodeCompleted { .. } => "node:completed",
            Self::NodeFailed { .. } => "node:failed",
            Self::NodeSkipped { .. } => "node:skipped",
            Self::NodeProgress { .. } => "node:progress",
            Self::HumanRequested { .. } => "human:requested",
            Self::HumanResponded { .. } => "human:responded",
            Self::VoteCast { .. } => "vote:cast",
            Self::VoteTallied { .. } => "vote:tallied",
            Self::OutputMessage { .. } => "output:message",
        }
    }

    /// The node this event concerns, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id }
            | Self::NodeProgress { node_id, .. }
            | Self::HumanRequested { node_id, .. }
            | Self::HumanResponded { node_id, .. }
            | Self::VoteCast { node_id, .. }
            | Self::VoteTallied { node_id, .. }
            | Self::OutputMessage { node_id, .. } => Some(node_id.as_str()),
            _ => None,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: WorkflowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
