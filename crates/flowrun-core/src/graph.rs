//! Workflow graph model.
//!
//! A workflow is a set of typed `Node`s connected by `Edge`s. On the wire a node is
//! `{id, type, props, position}` with a dot-namespaced `type` string; here the type
//! string is parsed once into a closed [`NodeKind`] carrying typed props, so the
//! dispatcher matches on variants instead of string prefixes.

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowError, Result};

/// Canvas position. Cosmetic only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawNode", into = "RawNode")]
pub struct Node {
    /// Unique within the graph.
    pub id: String,
    /// The original dot-namespaced type string, e.g. `action.email.send`.
    pub node_type: String,
    pub kind: NodeKind,
    pub position: Option<Position>,
}

/// Node category with its typed configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// `trigger.*`: passes the trigger payload through.
    Trigger { props: Value },
    /// `action.*`: props are interpolated and handed to a tool.
    Action { props: Value },
    /// `condition`: evaluates a boolean expression.
    Condition(ConditionProps),
    /// `transform`: runs the declarative transform pipeline.
    Transform(TransformProps),
    /// `external.*`: triggers an external workflow.
    External(ExternalProps),
    /// Anything else. Kept so that the failure is recorded at run time.
    Unknown { props: Value },
    /// A known type whose props did not decode. Also fails at run time.
    Invalid { props: Value, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionProps {
    #[serde(default)]
    pub expr: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformProps {
    #[serde(default)]
    pub steps: Vec<TransformStep>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalProps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One declarative data-cleaning operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTransformStep", into = "RawTransformStep")]
pub enum TransformStep {
    Trim { fields: Vec<String> },
    TitleCase { fields: Vec<String> },
    NormalizePhone { field: String, country: Option<String> },
    DropInvalid { rules: Vec<String> },
    /// Unrecognized op names pass data through untouched.
    Unsupported { op: String, extra: Map<String, Value> },
}

impl TransformStep {
    pub fn op_name(&self) -> &str {
        match self {
            TransformStep::Trim { .. } => "trim",
            TransformStep::TitleCase { .. } => "titleCase",
            TransformStep::NormalizePhone { .. } => "normalizePhone",
            TransformStep::DropInvalid { .. } => "dropInvalid",
            TransformStep::Unsupported { op, .. } => op,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawTransformStep {
    op: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    rules: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawTransformStep> for TransformStep {
    fn from(raw: RawTransformStep) -> Self {
        match raw.op.as_str() {
            "trim" => TransformStep::Trim { fields: raw.fields },
            "titleCase" => TransformStep::TitleCase { fields: raw.fields },
            "normalizePhone" => TransformStep::NormalizePhone {
                field: raw.field.unwrap_or_default(),
                country: raw.country,
            },
            "dropInvalid" => TransformStep::DropInvalid { rules: raw.rules },
            _ => TransformStep::Unsupported {
                op: raw.op,
                extra: raw.extra,
            },
        }
    }
}

impl From<TransformStep> for RawTransformStep {
    fn from(step: TransformStep) -> Self {
        let op = step.op_name().to_string();
        match step {
            TransformStep::Trim { fields } | TransformStep::TitleCase { fields } => Self {
                op,
                fields,
                ..Default::default()
            },
            TransformStep::NormalizePhone { field, country } => Self {
                op,
                field: Some(field),
                country,
                ..Default::default()
            },
            TransformStep::DropInvalid { rules } => Self {
                op,
                rules,
                ..Default::default()
            },
            TransformStep::Unsupported { extra, .. } => Self {
                op,
                extra,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    props: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

impl NodeKind {
    /// Parse a node type string and its props into a typed kind.
    ///
    /// Props that do not fit the type yield [`NodeKind::Invalid`] rather than an
    /// error, so a bad node fails its own step instead of the whole load.
    pub fn parse(node_type: &str, props: Value) -> Self {
        if node_type.starts_with("trigger.") {
            NodeKind::Trigger { props }
        } else if node_type.starts_with("action.") {
            NodeKind::Action { props }
        } else if node_type == "condition" {
            typed(props, NodeKind::Condition)
        } else if node_type == "transform" {
            typed(props, NodeKind::Transform)
        } else if node_type.starts_with("external.") {
            typed(props, NodeKind::External)
        } else {
            NodeKind::Unknown { props }
        }
    }

    /// Props in their wire shape.
    pub fn props(&self) -> Value {
        match self {
            NodeKind::Trigger { props }
            | NodeKind::Action { props }
            | NodeKind::Unknown { props }
            | NodeKind::Invalid { props, .. } => props.clone(),
            NodeKind::Condition(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            NodeKind::Transform(p) => serde_json::to_value(p).unwrap_or(Value::Null),
            NodeKind::External(p) => serde_json::to_value(p).unwrap_or(Value::Null),
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, NodeKind::Trigger { .. })
    }
}

fn typed<P: DeserializeOwned>(props: Value, wrap: impl FnOnce(P) -> NodeKind) -> NodeKind {
    let decoded = if props.is_null() {
        serde_json::from_value(Value::Object(Map::new()))
    } else {
        serde_json::from_value(props.clone())
    };
    match decoded {
        Ok(p) => wrap(p),
        Err(e) => NodeKind::Invalid {
            props,
            reason: e.to_string(),
        },
    }
}

impl From<RawNode> for Node {
    fn from(raw: RawNode) -> Self {
        Self {
            kind: NodeKind::parse(&raw.node_type, raw.props),
            id: raw.id,
            node_type: raw.node_type,
            position: raw.position,
        }
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        Self {
            props: node.kind.props(),
            id: node.id,
            node_type: node.node_type,
            position: node.position,
        }
    }
}

impl Node {
    /// Create a node from a type string and raw props.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, props: Value) -> Self {
        let node_type = node_type.into();
        Self {
            kind: NodeKind::parse(&node_type, props),
            id: id.into(),
            node_type,
            position: None,
        }
    }

    /// A `trigger.manual` node.
    pub fn trigger(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: "trigger.manual".into(),
            kind: NodeKind::Trigger {
                props: Value::Object(Map::new()),
            },
            position: None,
        }
    }

    /// A `condition` node.
    pub fn condition(id: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: "condition".into(),
            kind: NodeKind::Condition(ConditionProps {
                expr: expr.into(),
                extra: Map::new(),
            }),
            position: None,
        }
    }

    /// A `transform` node.
    pub fn transform(id: impl Into<String>, steps: Vec<TransformStep>) -> Self {
        Self {
            id: id.into(),
            node_type: "transform".into(),
            kind: NodeKind::Transform(TransformProps {
                steps,
                extra: Map::new(),
            }),
            position: None,
        }
    }

    /// Set the canvas position.
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position { x, y });
        self
    }
}

/// A directed link between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
    /// Guard compared against a condition node's boolean result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            when: None,
        }
    }

    /// Guard this edge on a condition result (`"true"` or `"false"`).
    pub fn when(mut self, guard: impl Into<String>) -> Self {
        self.when = Some(guard.into());
        self
    }

    /// The guard, if any. An empty guard string counts as no guard.
    pub fn guard(&self) -> Option<&str> {
        self.when.as_deref().filter(|w| !w.is_empty())
    }

    /// Whether this edge fires given the source node's output.
    ///
    /// Unguarded edges always fire. Guarded edges fire only when the output carries a
    /// boolean `conditionResult` equal to `when == "true"`; any guard other than
    /// `"true"` therefore matches a `false` result.
    pub fn fires(&self, output: &Value) -> bool {
        match self.guard() {
            None => true,
            Some(guard) => output
                .get("conditionResult")
                .and_then(Value::as_bool)
                .is_some_and(|result| result == (guard == "true")),
        }
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: vec![],
            edges: vec![],
            version: default_version(),
        }
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Parse a workflow from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FlowError::InvalidWorkflow(e.to_string()))
    }

    /// Load a workflow JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The first node whose type is in the `trigger.` namespace.
    pub fn trigger(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind.is_trigger())
    }

    /// Edges leaving `node_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Structural problems that would make a run fail or misbehave.
    ///
    /// Cycles are not reported.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                problems.push(format!("Duplicate node id: {}", node.id));
            }
            match &node.kind {
                NodeKind::Unknown { .. } => {
                    problems.push(format!("Node '{}' has unknown type: {}", node.id, node.node_type));
                }
                NodeKind::Invalid { reason, .. } => {
                    problems.push(format!("Node '{}' has invalid props: {}", node.id, reason));
                }
                _ => {}
            }
            if let NodeKind::Condition(ref props) = node.kind {
                if props.expr.trim().is_empty() {
                    problems.push(format!("Condition node '{}' has no expression", node.id));
                }
            }
        }

        match self.nodes.iter().filter(|n| n.kind.is_trigger()).count() {
            0 => problems.push("No trigger node found in workflow".to_string()),
            1 => {}
            n => problems.push(format!("{} trigger nodes found; only the first one runs", n)),
        }

        for edge in &self.edges {
            if self.node(&edge.source).is_none() {
                problems.push(format!("Edge '{}' references missing source: {}", edge.id, edge.source));
            }
            if self.node(&edge.target).is_none() {
                problems.push(format!("Edge '{}' references missing target: {}", edge.id, edge.target));
            }
            if let Some(guard) = edge.guard() {
                if guard != "true" && guard != "false" {
                    problems.push(format!(
                        "Edge '{}' guard '{}' is neither \"true\" nor \"false\" and matches a false result",
                        edge.id, guard
                    ));
                }
            }
        }

        problems
    }
}
