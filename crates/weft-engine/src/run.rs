//! Shared state of one workflow execution.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use weft_core::config::WeftConfig;
use weft_core::definition::{HumanChoice, WorkflowDefinition, WorkflowNode};
use weft_core::error::{Result, WeftError};
use weft_core::event::{EventBus, WorkflowEvent};
use weft_core::instance::{ExecutionStep, InstanceStatus, NodeStatus, StepAction, WorkflowInstance};
use weft_core::traits::{HumanInputProvider, HumanResponse, LlmExecutor};

use crate::context::NodeOutcome;
use crate::human::{HumanBroker, HumanRequest};
use crate::registry::NodeRegistry;

/// Collaborators fixed at engine construction, shared by every run.
pub(crate) struct Services {
    pub registry: NodeRegistry,
    pub llm: Arc<dyn LlmExecutor>,
    pub human_provider: Option<Arc<dyn HumanInputProvider>>,
    pub broker: Arc<HumanBroker>,
    pub event_bus: Arc<EventBus>,
    pub config: WeftConfig,
    pub http: reqwest::Client,
}

pub(crate) struct RunState {
    pub instance: WorkflowInstance,
    /// Merge node id -> indexes of incoming edges resolved since it last
    /// fired (delivered a value, or deactivated by a port choice).
    pub merge_arrivals: HashMap<String, HashSet<usize>>,
    pub human_waits: usize,
}

pub(crate) struct Run {
    pub instance_id: String,
    pub definition: Arc<WorkflowDefinition>,
    pub state: Mutex<RunState>,
    pub cancel: CancellationToken,
    pub services: Arc<Services>,
}

impl Run {
    pub fn new(definition: Arc<WorkflowDefinition>, services: Arc<Services>) -> Arc<Self> {
        let instance = WorkflowInstance::new(&definition);
        Arc::new(Self {
            instance_id: instance.id.clone(),
            definition,
            state: Mutex::new(RunState {
                instance,
                merge_arrivals: HashMap::new(),
                human_waits: 0,
            }),
            cancel: CancellationToken::new(),
            services,
        })
    }

    pub fn emit(&self, event: WorkflowEvent) {
        self.services.event_bus.publish(event);
    }

    pub async fn snapshot(&self) -> WorkflowInstance {
        self.state.lock().await.instance.clone()
    }

    pub async fn set_status(&self, status: InstanceStatus) {
        self.state.lock().await.instance.status = status;
    }

    // ── Node lifecycle ──────────────────────────────────────────

    /// Mark `node` running and return its new execution count.
    pub(crate) async fn begin_node(&self, node: &WorkflowNode, inputs: &Map<String, Value>) -> u32 {
        let execution_count = {
            let mut state = self.state.lock().await;
            let count = match state.instance.node_state_mut(&node.id) {
                Some(ns) => {
                    ns.status = NodeStatus::Running;
                    ns.inputs = inputs.clone();
                    ns.output = None;
                    ns.error = None;
                    ns.execution_count += 1;
                    ns.started_at = Some(Utc::now());
                    ns.completed_at = None;
                    ns.execution_count
                }
                None => 1,
            };
            state
                .instance
                .record(ExecutionStep::new(&node.id, &node.label, StepAction::Started));
            count
        };
        info!(
            instance_id = %self.instance_id,
            node_id = %node.id,
            node_type = %node.node_type(),
            execution_count,
            "Node started"
        );
        self.emit(WorkflowEvent::NodeStarted {
            node_id: node.id.clone(),
            label: node.label.clone(),
            inputs: inputs.clone(),
        });
        execution_count
    }

    pub(crate) async fn complete_node(&self, node: &WorkflowNode, outcome: &NodeOutcome, elapsed_ms: u64) {
        {
            let mut state = self.state.lock().await;
            if let Some(ns) = state.instance.node_state_mut(&node.id) {
                ns.status = NodeStatus::Success;
                ns.output = Some(outcome.output.clone());
                ns.completed_at = Some(Utc::now());
            }
            state.instance.record(
                ExecutionStep::new(&node.id, &node.label, StepAction::Completed)
                    .with_output(outcome.output.clone())
                    .with_duration(elapsed_ms),
            );
        }
        info!(
            node_id = %node.id,
            elapsed_ms,
            port = outcome.output_port.as_deref().unwrap_or("-"),
            "Node completed"
        );
        self.emit(WorkflowEvent::NodeCompleted {
            node_id: node.id.clone(),
            output: outcome.output.clone(),
            output_port: outcome.output_port.clone(),
            duration_ms: elapsed_ms,
        });
    }

    pub(crate) async fn fail_node(&self, node: &WorkflowNode, message: &str, elapsed_ms: u64) {
        {
            let mut state = self.state.lock().await;
            if let Some(ns) = state.instance.node_state_mut(&node.id) {
                ns.status = NodeStatus::Error;
                ns.error = Some(message.to_string());
                ns.completed_at = Some(Utc::now());
            }
            state.instance.record(
                ExecutionStep::new(&node.id, &node.label, StepAction::Failed)
                    .with_error(message)
                    .with_duration(elapsed_ms),
            );
        }
        error!(node_id = %node.id, error = %message, elapsed_ms, "Node failed");
        self.emit(WorkflowEvent::NodeFailed {
            node_id: node.id.clone(),
            error: message.to_string(),
        });
    }

    /// Mark a not-yet-run node skipped. Returns false when the node has
    /// already run (or been skipped) in this instance.
    pub(crate) async fn skip_node(&self, node_id: &str) -> bool {
        let label = self
            .definition
            .node(node_id)
            .map(|n| n.label.clone())
            .unwrap_or_else(|| node_id.to_string());
        {
            let mut state = self.state.lock().await;
            match state.instance.node_state_mut(node_id) {
                Some(ns) if ns.status == NodeStatus::Idle => ns.status = NodeStatus::Skipped,
                _ => return false,
            }
            state
                .instance
                .record(ExecutionStep::new(node_id, label, StepAction::Skipped));
        }
        tracing::debug!(node_id, "Node skipped");
        self.emit(WorkflowEvent::NodeSkipped {
            node_id: node_id.to_string(),
        });
        true
    }

    // ── Human waits ─────────────────────────────────────────────

    pub(crate) async fn request_human(
        &self,
        node_id: &str,
        execution_count: u32,
        prompt: String,
        choices: Vec<HumanChoice>,
        context: Value,
    ) -> Result<HumanResponse> {
        let request = HumanRequest::new(node_id, execution_count, prompt, choices, context);
        info!(request_id = %request.id, "Waiting for human input");
        self.enter_human_wait().await;

        let answer = match &self.services.human_provider {
            Some(provider) => {
                self.emit(request.requested_event());
                let answer = tokio::select! {
                    r = provider.request(request.prompt.clone(), request.choices.clone()) => r,
                    _ = self.cancel.cancelled() => Err(WeftError::Cancelled),
                };
                if let Ok(response) = &answer {
                    self.emit(request.responded_event(response));
                }
                answer
            }
            None => {
                let id = request.id.clone();
                let rx = self.services.broker.request(request).await;
                let answer = tokio::select! {
                    r = rx => r.unwrap_or_else(|_| Err(WeftError::HumanInput("request dropped".into()))),
                    _ = self.cancel.cancelled() => Err(WeftError::Cancelled),
                };
                if answer.is_err() {
                    self.services.broker.withdraw(&id).await;
                }
                answer
            }
        };

        self.leave_human_wait().await;
        answer
    }

    async fn enter_human_wait(&self) {
        let mut state = self.state.lock().await;
        state.human_waits += 1;
        if state.instance.status == InstanceStatus::Running {
            state.instance.status = InstanceStatus::WaitingHuman;
        }
    }

    async fn leave_human_wait(&self) {
        let mut state = self.state.lock().await;
        state.human_waits = state.human_waits.saturating_sub(1);
        if state.human_waits == 0 && state.instance.status == InstanceStatus::WaitingHuman {
            state.instance.status = InstanceStatus::Running;
        }
    }
}
