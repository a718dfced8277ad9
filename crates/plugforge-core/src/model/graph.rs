//! The command pipeline graph: typed nodes, directed edges, and the
//! [`Command`] aggregate that owns them.
//!
//! Nodes are a sum type ([`NodeKind`]) so every consumer that matches on a
//! node gets an exhaustiveness check when a new node type is added. On the
//! wire a node is `{ "id", "type", "position", "data" }`. The data payload
//! is decoded field by field: a field of the wrong shape reads as absent
//! and the rest of the payload is kept.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Node type tag
// ---------------------------------------------------------------------------

/// Discriminant of a [`NodeKind`], as it appears in serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    End,
    Step,
    Shell,
    Agent,
    Skill,
    Mcp,
    Branch,
    Condition,
    Loop,
    Parallel,
    Notify,
    Prompt,
    Variable,
    Template,
}

impl NodeType {
    pub const ALL: [NodeType; 15] = [
        Self::Start,
        Self::End,
        Self::Step,
        Self::Shell,
        Self::Agent,
        Self::Skill,
        Self::Mcp,
        Self::Branch,
        Self::Condition,
        Self::Loop,
        Self::Parallel,
        Self::Notify,
        Self::Prompt,
        Self::Variable,
        Self::Template,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Step => "step",
            Self::Shell => "shell",
            Self::Agent => "agent",
            Self::Skill => "skill",
            Self::Mcp => "mcp",
            Self::Branch => "branch",
            Self::Condition => "condition",
            Self::Loop => "loop",
            Self::Parallel => "parallel",
            Self::Notify => "notify",
            Self::Prompt => "prompt",
            Self::Variable => "variable",
            Self::Template => "template",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = NodeTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| NodeTypeParseError(s.to_owned()))
    }
}

/// Error returned when parsing an unknown node type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node type: {0:?}")]
pub struct NodeTypeParseError(pub String);

// ---------------------------------------------------------------------------
// Per-type payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub command_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
}

/// Payload shared by `step` and `shell` nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub skill_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub mcp_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub tool_name: Option<String>,
    #[serde(
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "lenient_args"
    )]
    pub args: BTreeMap<String, String>,
}

/// Payload shared by `branch` and `condition` nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoopData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub collection: Option<String>,
    /// Kept as text so template values such as `${N}` survive. A JSON
    /// number is accepted on input.
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_text"
    )]
    pub max_iterations: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifyData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VariableData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateData {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub template: Option<String>,
}

/// Decode one payload field. A value of the wrong shape reads as the
/// field's default.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring malformed node field");
        T::default()
    }))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Null => None,
        other => {
            warn!(value = %other, "ignoring malformed node field");
            None
        }
    })
}

/// String-valued entries only; anything else is dropped.
fn lenient_args<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let serde_json::Value::Object(map) = serde_json::Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(s) => Some((key, s)),
            other => {
                warn!(arg = %key, value = %other, "ignoring non-string MCP argument");
                None
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// A node's type together with its type-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Start(StartData),
    End(EndData),
    Step(ShellData),
    Shell(ShellData),
    Agent(AgentData),
    Skill(SkillData),
    Mcp(McpData),
    Branch(ConditionData),
    Condition(ConditionData),
    Loop(LoopData),
    Parallel(ParallelData),
    Notify(NotifyData),
    Prompt(PromptData),
    Variable(VariableData),
    Template(TemplateData),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Start(_) => NodeType::Start,
            Self::End(_) => NodeType::End,
            Self::Step(_) => NodeType::Step,
            Self::Shell(_) => NodeType::Shell,
            Self::Agent(_) => NodeType::Agent,
            Self::Skill(_) => NodeType::Skill,
            Self::Mcp(_) => NodeType::Mcp,
            Self::Branch(_) => NodeType::Branch,
            Self::Condition(_) => NodeType::Condition,
            Self::Loop(_) => NodeType::Loop,
            Self::Parallel(_) => NodeType::Parallel,
            Self::Notify(_) => NodeType::Notify,
            Self::Prompt(_) => NodeType::Prompt,
            Self::Variable(_) => NodeType::Variable,
            Self::Template(_) => NodeType::Template,
        }
    }

    /// The optional display label every payload carries.
    pub fn label(&self) -> Option<&str> {
        let label = match self {
            Self::Start(d) => &d.label,
            Self::End(d) => &d.label,
            Self::Step(d) | Self::Shell(d) => &d.label,
            Self::Agent(d) => &d.label,
            Self::Skill(d) => &d.label,
            Self::Mcp(d) => &d.label,
            Self::Branch(d) | Self::Condition(d) => &d.label,
            Self::Loop(d) => &d.label,
            Self::Parallel(d) => &d.label,
            Self::Notify(d) => &d.label,
            Self::Prompt(d) => &d.label,
            Self::Variable(d) => &d.label,
            Self::Template(d) => &d.label,
        };
        label.as_deref().filter(|l| !l.trim().is_empty())
    }

    /// Build a node kind from its type tag and a loosely-typed payload.
    ///
    /// `null` yields the default payload, as does a payload that is not an
    /// object. Inside an object, malformed fields are dropped one by one.
    pub fn from_parts(node_type: NodeType, data: &serde_json::Value) -> Self {
        match node_type {
            NodeType::Start => Self::Start(decode(node_type, data)),
            NodeType::End => Self::End(decode(node_type, data)),
            NodeType::Step => Self::Step(decode(node_type, data)),
            NodeType::Shell => Self::Shell(decode(node_type, data)),
            NodeType::Agent => Self::Agent(decode(node_type, data)),
            NodeType::Skill => Self::Skill(decode(node_type, data)),
            NodeType::Mcp => Self::Mcp(decode(node_type, data)),
            NodeType::Branch => Self::Branch(decode(node_type, data)),
            NodeType::Condition => Self::Condition(decode(node_type, data)),
            NodeType::Loop => Self::Loop(decode(node_type, data)),
            NodeType::Parallel => Self::Parallel(decode(node_type, data)),
            NodeType::Notify => Self::Notify(decode(node_type, data)),
            NodeType::Prompt => Self::Prompt(decode(node_type, data)),
            NodeType::Variable => Self::Variable(decode(node_type, data)),
            NodeType::Template => Self::Template(decode(node_type, data)),
        }
    }

    /// The payload as a JSON object.
    pub fn data_value(&self) -> serde_json::Value {
        let value = match self {
            Self::Start(d) => serde_json::to_value(d),
            Self::End(d) => serde_json::to_value(d),
            Self::Step(d) | Self::Shell(d) => serde_json::to_value(d),
            Self::Agent(d) => serde_json::to_value(d),
            Self::Skill(d) => serde_json::to_value(d),
            Self::Mcp(d) => serde_json::to_value(d),
            Self::Branch(d) | Self::Condition(d) => serde_json::to_value(d),
            Self::Loop(d) => serde_json::to_value(d),
            Self::Parallel(d) => serde_json::to_value(d),
            Self::Notify(d) => serde_json::to_value(d),
            Self::Prompt(d) => serde_json::to_value(d),
            Self::Variable(d) => serde_json::to_value(d),
            Self::Template(d) => serde_json::to_value(d),
        };
        // Payloads are plain structs of strings and maps; serialization cannot fail.
        value.unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

fn decode<T: DeserializeOwned + Default>(node_type: NodeType, data: &serde_json::Value) -> T {
    if !data.is_object() {
        if !data.is_null() {
            warn!(node_type = %node_type, "discarding node data that is not an object");
        }
        return T::default();
    }
    serde_json::from_value(data.clone()).unwrap_or_else(|e| {
        warn!(node_type = %node_type, error = %e, "discarding malformed node data");
        T::default()
    })
}

// ---------------------------------------------------------------------------
// FlowNode / FlowEdge / Command
// ---------------------------------------------------------------------------

/// Canvas position of a node. Presentational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One step of a command's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct FlowNode {
    /// Unique within the owning command.
    pub id: String,
    pub position: Position,
    pub kind: NodeKind,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            position: Position::default(),
            kind,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Label if set, otherwise the type name.
    pub fn display_name(&self) -> &str {
        self.kind.label().unwrap_or(self.node_type().as_str())
    }
}

/// Wire form of a [`FlowNode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    data: serde_json::Value,
}

impl TryFrom<RawNode> for FlowNode {
    type Error = NodeTypeParseError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let node_type: NodeType = raw.node_type.parse()?;
        Ok(Self {
            id: raw.id,
            position: raw.position,
            kind: NodeKind::from_parts(node_type, &raw.data),
        })
    }
}

impl From<FlowNode> for RawNode {
    fn from(node: FlowNode) -> Self {
        Self {
            node_type: node.node_type().as_str().to_owned(),
            data: node.kind.data_value(),
            id: node.id,
            position: node.position,
        }
    }
}

/// Well-known `sourceHandle` values of multi-output nodes.
pub mod handles {
    pub const PASS: &str = "pass";
    pub const FAIL: &str = "fail";
    pub const TRUE: &str = "true";
    pub const FALSE: &str = "false";
    pub const BODY: &str = "body";
    pub const DONE: &str = "done";
}

/// Directed link between two nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Output port of a multi-output source node (`pass`, `true`, `body`, `out-2`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FlowEdge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            label: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A slash command: a named pipeline graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Command {
    pub id: String,
    /// By convention starts with `/`.
    pub name: String,
    pub description: String,
    /// Nodes of unknown type are skipped on input.
    #[serde(deserialize_with = "lenient_nodes")]
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

fn lenient_nodes<'de, D>(deserializer: D) -> Result<Vec<FlowNode>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<FlowNode>(value) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(error = %e, "skipping unreadable node");
                None
            }
        })
        .collect())
}

impl Command {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_start(&self) -> bool {
        self.nodes.iter().any(|n| n.node_type() == NodeType::Start)
    }

    /// Edges leaving `node_id`, in edge-list order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// First edge leaving `node_id` through any of the given handles.
    pub fn edge_from_handle<'a>(
        &'a self,
        node_id: &'a str,
        any_of: &[&str],
    ) -> Option<&'a FlowEdge> {
        self.outgoing(node_id).find(|e| {
            e.source_handle
                .as_deref()
                .is_some_and(|h| any_of.contains(&h))
        })
    }
}
