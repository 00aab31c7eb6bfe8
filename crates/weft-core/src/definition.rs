//! Workflow graph model.
//!
//! A `WorkflowDefinition` is plain data: nodes, the edges between their ports,
//! and an initial variable seed. Node configuration is a sum type keyed by the
//! node's `type` tag, so every executor matches on exactly the fields its node
//! type declares.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WeftError};

/// Closed set of node type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Trigger,
    Agent,
    Condition,
    Transform,
    Merge,
    Split,
    Loop,
    Vote,
    Human,
    Output,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        NodeType::Trigger,
        NodeType::Agent,
        NodeType::Condition,
        NodeType::Transform,
        NodeType::Merge,
        NodeType::Split,
        NodeType::Loop,
        NodeType::Vote,
        NodeType::Human,
        NodeType::Output,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Agent => "agent",
            Self::Condition => "condition",
            Self::Transform => "transform",
            Self::Merge => "merge",
            Self::Split => "split",
            Self::Loop => "loop",
            Self::Vote => "vote",
            Self::Human => "human",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| WeftError::NoExecutor(s.to_string()))
    }
}

// ── Per-type configuration ──────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Prompt template; when absent the raw input is stringified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_template: Option<String>,
    /// When set, the LLM result is opportunistically parsed as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
    MatchesRegex,
    Custom,
}

/// A single predicate over a dot-path field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRule {
    #[serde(default)]
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Expression for the `custom` operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl ConditionRule {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value),
            expression: None,
        }
    }

    pub fn custom(expression: impl Into<String>) -> Self {
        Self {
            field: String::new(),
            operator: ConditionOperator::Custom,
            value: None,
            expression: Some(expression.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    #[serde(default)]
    pub rules: Vec<ConditionRule>,
}

/// Value transform applied by a field mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingTransform {
    String,
    Number,
    Boolean,
    Json,
    Uppercase,
    Lowercase,
    Trim,
}

/// Declarative `{from, to, transform?, default?}` extraction rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<MappingTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldMapping {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: None,
            default: None,
        }
    }

    pub fn with_transform(mut self, transform: MappingTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "transformType",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum TransformConfig {
    Template {
        template: String,
    },
    Jq {
        jq_expression: String,
    },
    Extract {
        fields: Vec<String>,
    },
    Map {
        map_expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        array_field: Option<String>,
    },
    Javascript {
        code: String,
    },
    Expression {
        expression: String,
    },
    Mapping {
        mappings: Vec<FieldMapping>,
    },
}

impl TransformConfig {
    pub fn transform_type(&self) -> &'static str {
        match self {
            Self::Template { .. } => "template",
            Self::Jq { .. } => "jq",
            Self::Extract { .. } => "extract",
            Self::Map { .. } => "map",
            Self::Javascript { .. } => "javascript",
            Self::Expression { .. } => "expression",
            Self::Mapping { .. } => "mapping",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Concatenate,
    Object,
    #[default]
    WaitAll,
    WaitAny,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConfig {
    #[serde(default)]
    pub strategy: MergeStrategy,
    /// Port id -> output key, used by the `object` strategy.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub key_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "loopType", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LoopKind {
    ForEach {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        array_field: Option<String>,
    },
    While {
        condition: ConditionRule,
    },
    Times {
        count: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(flatten)]
    pub kind: LoopKind,
    /// Falls back to the engine's configured limit (default 100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteConfig {
    pub vote_options: Vec<String>,
    pub threshold: f64,
    #[serde(default = "default_vote_field")]
    pub vote_field: String,
    #[serde(default = "default_voter_field")]
    pub voter_field: String,
    #[serde(default = "default_reason_field")]
    pub reason_field: String,
    /// Outcome when no option clears the threshold.
    #[serde(default = "default_vote_outcome")]
    pub default_outcome: String,
}

fn default_vote_field() -> String {
    "vote".to_string()
}

fn default_voter_field() -> String {
    "voter".to_string()
}

fn default_reason_field() -> String {
    "reason".to_string()
}

fn default_vote_outcome() -> String {
    "queue".to_string()
}

impl VoteConfig {
    pub fn new(options: &[&str], threshold: f64) -> Self {
        Self {
            vote_options: options.iter().map(|s| s.to_string()).collect(),
            threshold,
            vote_field: default_vote_field(),
            voter_field: default_voter_field(),
            reason_field: default_reason_field(),
            default_outcome: default_vote_outcome(),
        }
    }
}

/// A selectable answer offered to a human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawChoice")]
pub struct HumanChoice {
    pub id: String,
    pub label: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChoice {
    Id(String),
    Full {
        id: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl From<RawChoice> for HumanChoice {
    fn from(raw: RawChoice) -> Self {
        match raw {
            RawChoice::Id(id) => Self {
                label: id.clone(),
                id,
            },
            RawChoice::Full { id, label } => Self {
                label: label.unwrap_or_else(|| id.clone()),
                id,
            },
        }
    }
}

impl HumanChoice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanConfig {
    pub prompt: String,
    #[serde(default)]
    pub choices: Vec<HumanChoice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "destination",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum OutputConfig {
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_template: Option<String>,
    },
    File {
        file_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_template: Option<String>,
    },
    Webhook {
        webhook_url: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        webhook_headers: BTreeMap<String, String>,
    },
    Variable {
        variable_name: String,
    },
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_template: Option<String>,
    },
}

impl OutputConfig {
    pub fn destination(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::File { .. } => "file",
            Self::Webhook { .. } => "webhook",
            Self::Variable { .. } => "variable",
            Self::Log { .. } => "log",
        }
    }
}

/// Node configuration, one variant per node type.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    Trigger(TriggerConfig),
    Agent(AgentConfig),
    Condition(ConditionConfig),
    Transform(TransformConfig),
    Merge(MergeConfig),
    Split(SplitConfig),
    Loop(LoopConfig),
    Vote(VoteConfig),
    Human(HumanConfig),
    Output(OutputConfig),
}

impl NodeConfig {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Trigger(_) => NodeType::Trigger,
            Self::Agent(_) => NodeType::Agent,
            Self::Condition(_) => NodeType::Condition,
            Self::Transform(_) => NodeType::Transform,
            Self::Merge(_) => NodeType::Merge,
            Self::Split(_) => NodeType::Split,
            Self::Loop(_) => NodeType::Loop,
            Self::Vote(_) => NodeType::Vote,
            Self::Human(_) => NodeType::Human,
            Self::Output(_) => NodeType::Output,
        }
    }

    /// Build a typed config from a type tag and its raw JSON config object.
    pub fn from_parts(node_type: NodeType, config: Value) -> serde_json::Result<Self> {
        let config = if config.is_null() {
            Value::Object(Map::new())
        } else {
            config
        };
        Ok(match node_type {
            NodeType::Trigger => Self::Trigger(serde_json::from_value(config)?),
            NodeType::Agent => Self::Agent(serde_json::from_value(config)?),
            NodeType::Condition => Self::Condition(serde_json::from_value(config)?),
            NodeType::Transform => Self::Transform(serde_json::from_value(config)?),
            NodeType::Merge => Self::Merge(serde_json::from_value(config)?),
            NodeType::Split => Self::Split(serde_json::from_value(config)?),
            NodeType::Loop => Self::Loop(serde_json::from_value(config)?),
            NodeType::Vote => Self::Vote(serde_json::from_value(config)?),
            NodeType::Human => Self::Human(serde_json::from_value(config)?),
            NodeType::Output => Self::Output(serde_json::from_value(config)?),
        })
    }

    fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            Self::Trigger(c) => serde_json::to_value(c),
            Self::Agent(c) => serde_json::to_value(c),
            Self::Condition(c) => serde_json::to_value(c),
            Self::Transform(c) => serde_json::to_value(c),
            Self::Merge(c) => serde_json::to_value(c),
            Self::Split(c) => serde_json::to_value(c),
            Self::Loop(c) => serde_json::to_value(c),
            Self::Vote(c) => serde_json::to_value(c),
            Self::Human(c) => serde_json::to_value(c),
            Self::Output(c) => serde_json::to_value(c),
        }
    }
}

// ── Nodes and edges ─────────────────────────────────────────────

/// A typed step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct WorkflowNode {
    pub id: String,
    pub label: String,
    pub config: NodeConfig,
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    label: String,
    #[serde(default)]
    config: Value,
}

impl TryFrom<RawNode> for WorkflowNode {
    type Error = WeftError;

    fn try_from(raw: RawNode) -> Result<Self> {
        let config = NodeConfig::from_parts(raw.node_type, raw.config).map_err(|e| {
            WeftError::Definition(format!(
                "node '{}' ({}) has invalid config: {}",
                raw.id, raw.node_type, e
            ))
        })?;
        let label = if raw.label.is_empty() {
            raw.id.clone()
        } else {
            raw.label
        };
        Ok(Self {
            id: raw.id,
            label,
            config,
        })
    }
}

impl From<WorkflowNode> for RawNode {
    fn from(node: WorkflowNode) -> Self {
        Self {
            node_type: node.node_type(),
            config: node.config.to_json().unwrap_or(Value::Null),
            id: node.id,
            label: node.label,
        }
    }
}

impl WorkflowNode {
    /// Create a node whose label defaults to its id.
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            config,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.config.node_type()
    }
}

/// A connection from a source node's output port to a target node's input port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source_node_id: String,
    #[serde(default)]
    pub source_port_id: Option<String>,
    pub target_node_id: String,
    #[serde(default)]
    pub target_port_id: Option<String>,
    /// Alternative port match for branching node types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source_node_id: source.into(),
            source_port_id: None,
            target_node_id: target.into(),
            target_port_id: None,
            label: None,
        }
    }

    pub fn from_port(mut self, port: impl Into<String>) -> Self {
        self.source_port_id = Some(port.into());
        self
    }

    pub fn to_port(mut self, port: impl Into<String>) -> Self {
        self.target_port_id = Some(port.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether this edge leaves through `port` (by port id or label).
    pub fn matches_port(&self, port: &str) -> bool {
        self.source_port_id.as_deref() == Some(port) || self.label.as_deref() == Some(port)
    }

    /// Input key the edge delivers into on its target.
    pub fn input_key(&self) -> &str {
        self.target_port_id.as_deref().unwrap_or("input")
    }

    /// Input key the edge delivers into on a merge. Unported edges are keyed
    /// by their source so sibling branches land side by side.
    pub fn merge_input_key(&self) -> &str {
        self.target_port_id.as_deref().unwrap_or(&self.source_node_id)
    }
}

/// Immutable workflow graph plus its initial variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            nodes: vec![],
            edges: vec![],
            variables: Map::new(),
        }
    }

    pub fn with_node(mut self, node: WorkflowNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: WorkflowEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Parse a definition from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a definition from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All trigger-type nodes, in definition order.
    pub fn triggers(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes
            .iter()
            .filter(|n| n.node_type() == NodeType::Trigger)
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.source_node_id == node_id)
    }

    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> {
        self.edges.iter().filter(move |e| e.target_node_id == node_id)
    }

    /// Check structural integrity: unique node ids, edges referencing known
    /// nodes, and at least one trigger.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(WeftError::Definition("node with empty id".into()));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(WeftError::Definition(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            for end in [&edge.source_node_id, &edge.target_node_id] {
                if !seen.contains(end.as_str()) {
                    return Err(WeftError::Definition(format!(
                        "edge {} -> {} references unknown node '{}'",
                        edge.source_node_id, edge.target_node_id, end
                    )));
                }
            }
        }

        if self.triggers().next().is_none() {
            return Err(WeftError::Definition(
                "workflow has no trigger node".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_definition_from_json() {
        let def = WorkflowDefinition::from_json(
            r#"{
                "id": "wf-1",
                "nodes": [
                    { "id": "start", "type": "trigger" },
                    { "id": "pick", "type": "condition", "label": "Pick",
                      "config": { "rules": [ { "field": "score", "operator": "greater_than", "value": 5 } ] } },
                    { "id": "shape", "type": "transform",
                      "config": { "transformType": "jq", "jqExpression": ".items[]" } },
                    { "id": "again", "type": "loop",
                      "config": { "loopType": "times", "count": 3, "maxIterations": 10 } },
                    { "id": "send", "type": "output",
                      "config": { "destination": "webhook", "webhookUrl": "http://x", "webhookHeaders": { "X-Key": "1" } } }
                ],
                "edges": [
                    { "sourceNodeId": "start", "sourcePortId": null, "targetNodeId": "pick", "targetPortId": null },
                    { "sourceNodeId": "pick", "sourcePortId": "true", "targetNodeId": "shape", "targetPortId": null }
                ],
                "variables": { "region": "eu" }
            }"#,
        )
        .unwrap();

        assert_eq!(def.nodes.len(), 5);
        assert_eq!(def.node("start").unwrap().label, "start");
        assert_eq!(def.node("pick").unwrap().label, "Pick");
        assert!(matches!(
            &def.node("shape").unwrap().config,
            NodeConfig::Transform(TransformConfig::Jq { jq_expression }) if jq_expression == ".items[]"
        ));
        match &def.node("again").unwrap().config {
            NodeConfig::Loop(cfg) => {
                assert_eq!(cfg.kind, LoopKind::Times { count: 3 });
                assert_eq!(cfg.max_iterations, Some(10));
            }
            other => panic!("expected loop, got {:?}", other),
        }
        match &def.node("send").unwrap().config {
            NodeConfig::Output(OutputConfig::Webhook { webhook_headers, .. }) => {
                assert_eq!(webhook_headers.get("X-Key").map(String::as_str), Some("1"));
            }
            other => panic!("expected webhook output, got {:?}", other),
        }
        assert_eq!(def.variables["region"], json!("eu"));
        assert!(def.validate().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = WorkflowDefinition::from_json(
            r#"{ "id": "wf", "nodes": [ { "id": "v", "type": "vote", "config": {} } ] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("vote"));
    }

    #[test]
    fn node_roundtrip_keeps_type_and_config() {
        let node = WorkflowNode::new(
            "m",
            NodeConfig::Merge(MergeConfig {
                strategy: MergeStrategy::Object,
                key_mapping: [("a".to_string(), "left".to_string())].into(),
            }),
        );
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "merge");
        assert_eq!(json["config"]["strategy"], "object");
        let back: WorkflowNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn human_choices_accept_plain_strings() {
        let cfg: HumanConfig = serde_json::from_value(json!({
            "prompt": "Ship it?",
            "choices": ["approve", { "id": "reject", "label": "Reject" }]
        }))
        .unwrap();
        assert_eq!(cfg.choices[0], HumanChoice::new("approve", "approve"));
        assert_eq!(cfg.choices[1].label, "Reject");
    }

    #[test]
    fn edge_port_matching() {
        let by_port = WorkflowEdge::new("c", "a").from_port("true");
        let by_label = WorkflowEdge::new("c", "b").with_label("false");
        assert!(by_port.matches_port("true"));
        assert!(!by_port.matches_port("false"));
        assert!(by_label.matches_port("false"));
        assert_eq!(by_port.input_key(), "input");
        assert_eq!(by_port.clone().to_port("left").input_key(), "left");
        assert_eq!(by_port.merge_input_key(), "c");
        assert_eq!(by_label.to_port("right").merge_input_key(), "right");
    }

    #[test]
    fn validate_rejects_broken_graphs() {
        let trigger = WorkflowNode::new("t", NodeConfig::Trigger(TriggerConfig {}));

        let dup = WorkflowDefinition::new("wf")
            .with_node(trigger.clone())
            .with_node(trigger.clone());
        assert!(dup.validate().is_err());

        let dangling = WorkflowDefinition::new("wf")
            .with_node(trigger.clone())
            .with_edge(WorkflowEdge::new("t", "ghost"));
        assert!(dangling.validate().unwrap_err().to_string().contains("ghost"));

        let no_trigger = WorkflowDefinition::new("wf")
            .with_node(WorkflowNode::new("s", NodeConfig::Split(SplitConfig {})));
        assert!(no_trigger.validate().is_err());
    }

    #[test]
    fn node_type_parse() {
        assert_eq!("Agent".parse::<NodeType>().unwrap(), NodeType::Agent);
        assert!("webhook".parse::<NodeType>().is_err());
        assert_eq!(NodeType::Loop.to_string(), "loop");
    }
}
