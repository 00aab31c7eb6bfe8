use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use weft_core::config::WeftConfig;
use weft_core::definition::{HumanChoice, NodeType, WorkflowNode};
use weft_core::error::Result;
use weft_core::event::{EventBus, WorkflowEvent};
use weft_core::instance::WorkflowInstance;
use weft_core::traits::{HumanResponse, LlmExecutor};
use weft_transform::template::{render_template_with, TemplateOptions};

use crate::run::Run;

/// What an executor produced. An outcome with `error` set fails the node
/// exactly like returning `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub output: Value,
    /// Selects which outgoing edges stay active for branching node types.
    pub output_port: Option<String>,
    pub error: Option<String>,
}

impl NodeOutcome {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            output_port: None,
            error: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.output_port = Some(port.into());
        self
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            output: Value::Null,
            output_port: None,
            error: Some(error.into()),
        }
    }
}

/// A node type's behavior. One executor is registered per `NodeType`.
pub trait NodeExecutor: Send + Sync + 'static {
    fn node_type(&self) -> NodeType;

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>>;
}

/// Everything an executor may see or touch during one invocation.
pub struct NodeExecutionContext {
    pub node: WorkflowNode,
    /// Values delivered by incoming edges, keyed by target port (`"input"`
    /// when the edge names none).
    pub inputs: Map<String, Value>,
    /// This invocation's 1-based count for the node.
    pub execution_count: u32,
    run: Arc<Run>,
}

impl NodeExecutionContext {
    pub(crate) fn new(
        node: WorkflowNode,
        inputs: Map<String, Value>,
        execution_count: u32,
        run: Arc<Run>,
    ) -> Self {
        Self {
            node,
            inputs,
            execution_count,
            run,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    pub fn instance_id(&self) -> &str {
        &self.run.instance_id
    }

    /// The `"input"` entry if present, else the only entry, else the whole
    /// input map.
    pub fn primary_input(&self) -> Value {
        primary_input(&self.inputs)
    }

    pub fn llm(&self) -> Arc<dyn LlmExecutor> {
        self.run.services.llm.clone()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.run.services.event_bus.clone()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        self.run.services.event_bus.publish(event);
    }

    pub fn config(&self) -> &WeftConfig {
        &self.run.services.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.run.services.http
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.run.cancel.clone()
    }

    /// Snapshot of the shared variable store.
    pub async fn variables(&self) -> Map<String, Value> {
        self.run.state.lock().await.instance.data.clone()
    }

    /// Write one variable. Concurrent branches race; the last write wins.
    pub async fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.run.state.lock().await.instance.data.insert(name.into(), value);
    }

    /// Snapshot of the live instance.
    pub async fn instance(&self) -> WorkflowInstance {
        self.run.state.lock().await.instance.clone()
    }

    /// Suspend until a human answers, or the run is cancelled.
    pub async fn request_human(
        &self,
        prompt: String,
        choices: Vec<HumanChoice>,
        context: Value,
    ) -> Result<HumanResponse> {
        self.run
            .request_human(&self.node.id, self.execution_count, prompt, choices, context)
            .await
    }

    /// Data templates render against: the primary input's fields at top
    /// level plus `input` and `variables`.
    pub async fn template_data(&self) -> Value {
        let input = self.primary_input();
        let mut data = match &input {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        data.insert("input".into(), input);
        data.insert("variables".into(), Value::Object(self.variables().await));
        Value::Object(data)
    }

    pub fn template_options(&self) -> TemplateOptions {
        TemplateOptions {
            strict: self.config().engine.strict_templates,
        }
    }

    /// Render `template` against [`template_data`](Self::template_data).
    pub async fn render(&self, template: &str) -> Result<String> {
        let data = self.template_data().await;
        render_template_with(template, &data, self.template_options())
    }
}

pub(crate) fn primary_input(inputs: &Map<String, Value>) -> Value {
    if let Some(v) = inputs.get("input") {
        return v.clone();
    }
    if inputs.len() == 1 {
        if let Some(v) = inputs.values().next() {
            return v.clone();
        }
    }
    Value::Object(inputs.clone())
}
