use std::sync::Arc;

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use weft_core::config::{EngineConfig, WeftConfig};
use weft_core::definition::{NodeType, WorkflowDefinition, WorkflowNode};
use weft_core::error::{Result, WeftError};
use weft_core::event::{EventBus, WorkflowEvent};
use weft_core::instance::{InstanceStatus, StepAction, WorkflowInstance};
use weft_core::traits::{HumanInputProvider, HumanResponse, LlmExecutor, LlmOptions, LlmResponse};

use crate::context::{NodeExecutionContext, NodeOutcome};
use crate::human::{HumanBroker, HumanRequest};
use crate::registry::NodeRegistry;
use crate::run::{Run, Services};

/// Runs workflow definitions to completion.
///
/// One engine runs one instance at a time; `cancel` and the human-response
/// methods act on the current run and may be called from other tasks while
/// `execute` is in flight.
pub struct WorkflowEngine {
    services: Arc<Services>,
    current: RwLock<Option<Arc<Run>>>,
}

impl WorkflowEngine {
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.services.event_bus.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.services.event_bus.subscribe()
    }

    pub fn config(&self) -> &WeftConfig {
        &self.services.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.services.registry
    }

    /// Execute `definition` with `payload` delivered to every trigger node.
    /// Failures are reported through the returned instance's status.
    pub async fn execute(&self, definition: &WorkflowDefinition, payload: Value) -> WorkflowInstance {
        let definition = Arc::new(definition.clone());
        let run = Run::new(definition.clone(), self.services.clone());
        *self.current.write().await = Some(run.clone());

        if let Err(e) = definition.validate() {
            return self.finish(&run, Err(e)).await;
        }

        {
            let mut state = run.state.lock().await;
            state.instance.status = InstanceStatus::Running;
            state.instance.started_at = Utc::now();
        }
        info!(
            instance_id = %run.instance_id,
            workflow_id = %definition.id,
            nodes = definition.nodes.len(),
            "Workflow started"
        );
        run.emit(WorkflowEvent::WorkflowStarted {
            instance_id: run.instance_id.clone(),
            workflow_id: definition.id.clone(),
        });

        let mut inputs = Map::new();
        inputs.insert("input".to_string(), payload);
        let triggers: Vec<String> = definition.triggers().map(|n| n.id.clone()).collect();
        let results = join_all(
            triggers
                .into_iter()
                .map(|id| run.execute_node(id, inputs.clone())),
        )
        .await;
        let result = results.into_iter().collect::<Result<Vec<()>>>().map(|_| ());

        self.finish(&run, result).await
    }

    async fn finish(&self, run: &Arc<Run>, result: Result<()>) -> WorkflowInstance {
        let (snapshot, event) = {
            let mut state = run.state.lock().await;
            let instance = &mut state.instance;
            instance.completed_at = Some(Utc::now());
            let event = if run.cancel.is_cancelled() {
                instance.status = InstanceStatus::Cancelled;
                instance.error = Some(WeftError::Cancelled.to_string());
                WorkflowEvent::WorkflowCancelled {
                    instance_id: instance.id.clone(),
                }
            } else {
                match result {
                    Ok(()) => {
                        instance.status = InstanceStatus::Completed;
                        instance.output = collect_output(&run.definition, instance);
                        WorkflowEvent::WorkflowCompleted {
                            instance_id: instance.id.clone(),
                            output: instance.output.clone(),
                        }
                    }
                    Err(e) => {
                        instance.status = InstanceStatus::Failed;
                        instance.error = Some(e.to_string());
                        WorkflowEvent::WorkflowFailed {
                            instance_id: instance.id.clone(),
                            error: e.to_string(),
                        }
                    }
                }
            };
            (instance.clone(), event)
        };

        let elapsed_ms = snapshot
            .completed_at
            .map(|end| (end - snapshot.started_at).num_milliseconds().max(0))
            .unwrap_or(0);
        match snapshot.status {
            InstanceStatus::Failed => error!(
                instance_id = %snapshot.id,
                elapsed_ms,
                error = snapshot.error.as_deref().unwrap_or(""),
                "Workflow failed"
            ),
            status => info!(instance_id = %snapshot.id, elapsed_ms, ?status, "Workflow finished"),
        }
        run.emit(event);
        snapshot
    }

    /// Cancel the current run: pending human waits are rejected and no
    /// further nodes are dispatched. In-flight executors are dropped at
    /// their next suspension point.
    pub async fn cancel(&self) {
        let run = self.current.read().await.clone();
        if let Some(run) = run {
            let mut state = run.state.lock().await;
            if !state.instance.status.is_terminal() {
                state.instance.status = InstanceStatus::Cancelled;
                drop(state);
                run.cancel.cancel();
                info!(instance_id = %run.instance_id, "Workflow cancellation requested");
            }
        }
        let rejected = self.services.broker.reject_all().await;
        if rejected > 0 {
            info!(rejected, "Rejected pending human requests");
        }
    }

    /// Answer the oldest pending human request. Returns its id.
    pub async fn respond_human(&self, choice: impl Into<String>, free_text: Option<String>) -> Result<String> {
        let response = HumanResponse {
            choice: choice.into(),
            free_text,
        };
        self.services.broker.respond_oldest(response).await
    }

    /// Answer one specific pending human request.
    pub async fn respond_human_to(&self, request_id: &str, response: HumanResponse) -> Result<()> {
        self.services.broker.respond(request_id, response).await
    }

    pub async fn pending_human(&self) -> Vec<HumanRequest> {
        self.services.broker.pending_requests().await
    }

    /// The current (or most recent) run's instance.
    pub async fn snapshot(&self) -> Option<WorkflowInstance> {
        let run = self.current.read().await.clone();
        match run {
            Some(run) => Some(run.snapshot().await),
            None => None,
        }
    }

    /// Invoke a single node's executor outside any graph, with `input` as its
    /// primary input. Downstream dispatch does not happen.
    pub async fn run_node(
        &self,
        node: WorkflowNode,
        input: Value,
        variables: Map<String, Value>,
    ) -> Result<NodeOutcome> {
        let executor = self
            .services
            .registry
            .get(node.node_type())
            .ok_or_else(|| WeftError::NoExecutor(node.node_type().to_string()))?;
        let mut definition = WorkflowDefinition::new(format!("single:{}", node.id)).with_node(node.clone());
        definition.variables = variables;
        let run = Run::new(Arc::new(definition), self.services.clone());
        run.set_status(InstanceStatus::Running).await;

        let mut inputs = Map::new();
        inputs.insert("input".to_string(), input);
        let execution_count = run.begin_node(&node, &inputs).await;
        let ctx = NodeExecutionContext::new(node, inputs, execution_count, run);
        executor.execute(&ctx).await
    }
}

/// Output-type nodes' final outputs in the order they first completed:
/// the single value when there is one, else an array.
fn collect_output(definition: &WorkflowDefinition, instance: &WorkflowInstance) -> Option<Value> {
    let mut order: Vec<&str> = Vec::new();
    for step in &instance.history {
        let is_output = definition
            .node(&step.node_id)
            .is_some_and(|n| n.node_type() == NodeType::Output);
        if step.action == StepAction::Completed && is_output && !order.contains(&step.node_id.as_str()) {
            order.push(&step.node_id);
        }
    }
    let mut values: Vec<Value> = order
        .into_iter()
        .filter_map(|id| instance.node_state(id).and_then(|s| s.output.clone()))
        .collect();
    match values.len() {
        0 => None,
        1 => values.pop(),
        _ => Some(Value::Array(values)),
    }
}

/// Stand-in used when no LLM executor is configured: agent nodes fail
/// cleanly instead of the engine refusing to build.
struct UnconfiguredLlm;

impl LlmExecutor for UnconfiguredLlm {
    fn invoke(&self, _prompt: String, _options: LlmOptions) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async { Ok(LlmResponse::failed("no LLM executor configured")) })
    }
}

#[derive(Default)]
pub struct WorkflowEngineBuilder {
    llm: Option<Arc<dyn LlmExecutor>>,
    human_provider: Option<Arc<dyn HumanInputProvider>>,
    registry: Option<NodeRegistry>,
    config: WeftConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl WorkflowEngineBuilder {
    pub fn llm(mut self, llm: Arc<dyn LlmExecutor>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Answer human requests through `provider` instead of waiting for
    /// `respond_human`.
    pub fn human_provider(mut self, provider: Arc<dyn HumanInputProvider>) -> Self {
        self.human_provider = Some(provider);
        self
    }

    /// Replace the built-in executor registry.
    pub fn registry(mut self, registry: NodeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: WeftConfig) -> Self {
        self.config = config;
        self
    }

    pub fn engine_config(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(EventBus::new(self.config.engine.event_capacity)));
        let llm = self.llm.unwrap_or_else(|| {
            warn!("No LLM executor configured; agent nodes will fail");
            Arc::new(UnconfiguredLlm)
        });
        let services = Services {
            registry: self.registry.unwrap_or_else(NodeRegistry::with_builtins),
            llm,
            human_provider: self.human_provider,
            broker: Arc::new(HumanBroker::new(event_bus.clone())),
            event_bus,
            config: self.config,
            http: reqwest::Client::new(),
        };
        WorkflowEngine {
            services: Arc::new(services),
            current: RwLock::new(None),
        }
    }
}
