use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub mod changes;
pub mod decision;
pub mod integrity;
pub mod node_type;

pub use changes::{
    ChangeOperation, EdgeChange, NodeChange, apply_changes, has_removal, is_drag_end,
    is_drag_in_progress, is_selection_only, parse_changes, removed_ids,
};
pub use integrity::{
    EDGE_DATA_KEYS, NODE_DATA_KEYS, collect_cascade, dangling_edges, dedupe_edges,
    remove_dangling_edges, retain_allowed_keys, sanitize_edge, validate_edges, visible_count,
};
pub use node_type::{EdgeType, NodeType};

/// Free-form key/value payload carried by nodes and edges.
pub type ElementData = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Builds an id of the form `<prefix>-<uuid v4>`.
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Edge {edge} references missing node {node}")]
    DanglingEdge { edge: EdgeId, node: NodeId },
    #[error("Cannot connect {from} to {to}: node {missing} does not exist")]
    MissingEndpoint {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type", default)]
    pub kind: NodeType,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: ElementData,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub hidden: bool,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeType, position: Position) -> Self {
        Self {
            id: NodeId(id.into()),
            kind,
            position,
            ..Default::default()
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.data.get("label").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    #[serde(rename = "type", default)]
    pub kind: EdgeType,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub data: ElementData,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub hidden: bool,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: EdgeId(id.into()),
            source: NodeId(source.into()),
            target: NodeId(target.into()),
            ..Default::default()
        }
    }

    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }
}

/// Common surface the change reducer needs from nodes and edges.
pub trait GraphElement: Clone {
    fn element_id(&self) -> &str;
    fn set_selected(&mut self, selected: bool);
    /// Shallow merge: keys in `patch` overwrite, other keys are kept.
    fn merge_data(&mut self, patch: &ElementData);
    /// Returns false when the element has no position.
    fn set_position(&mut self, _position: Position) -> bool {
        false
    }
    fn is_hidden(&self) -> bool;
}

impl GraphElement for Node {
    fn element_id(&self) -> &str {
        &self.id.0
    }

    fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    fn merge_data(&mut self, patch: &ElementData) {
        for (key, value) in patch {
            self.data.insert(key.clone(), value.clone());
        }
    }

    fn set_position(&mut self, position: Position) -> bool {
        self.position = position;
        true
    }

    fn is_hidden(&self) -> bool {
        self.hidden
    }
}

impl GraphElement for Edge {
    fn element_id(&self) -> &str {
        &self.id.0
    }

    fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    fn merge_data(&mut self, patch: &ElementData) {
        for (key, value) in patch {
            self.data.insert(key.clone(), value.clone());
        }
    }

    fn is_hidden(&self) -> bool {
        self.hidden
    }
}

/// Immutable capture of the full graph at a point in time.
///
/// This is both the history entry and the persisted document: the JSON shape
/// is `{nodes, edges, viewport, timestamp}` with `timestamp` in milliseconds
/// since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub timestamp: i64,
}

impl FlowSnapshot {
    pub fn capture(nodes: &[Node], edges: &[Edge], viewport: Viewport) -> Self {
        Self {
            nodes: nodes.to_vec(),
            edges: edges.to_vec(),
            viewport,
            timestamp: now_millis(),
        }
    }

    /// Equality that ignores the capture time.
    pub fn same_graph(&self, other: &FlowSnapshot) -> bool {
        self.nodes == other.nodes && self.edges == other.edges && self.viewport == other.viewport
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
