use plubot_core::{Edge, FlowSnapshot, Node, Viewport, visible_count};
use serde::{Deserialize, Serialize};

pub const UNTITLED_FLOW: &str = "Untitled flow";

/// Everything the editor shows for one flow.
///
/// Mutators consume the state and hand back the next one; the editor swaps
/// it in whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub project_id: Option<String>,
    pub flow_name: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub viewport: Viewport,
    /// Visible (non-hidden) nodes.
    pub node_count: usize,
    /// Visible (non-hidden) edges.
    pub edge_count: usize,
    pub has_changes: bool,
    pub is_backup_loaded: bool,
    /// Timestamp of the last confirmed save, in milliseconds.
    pub last_saved: Option<i64>,
}

impl Default for FlowState {
    fn default() -> Self {
        Self {
            project_id: None,
            flow_name: UNTITLED_FLOW.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            viewport: Viewport::default(),
            node_count: 0,
            edge_count: 0,
            has_changes: false,
            is_backup_loaded: false,
            last_saved: None,
        }
    }
}

impl FlowState {
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<Node>) -> Self {
        self.node_count = visible_count(&nodes);
        self.nodes = nodes;
        self
    }

    pub fn with_edges(mut self, edges: Vec<Edge>) -> Self {
        self.edge_count = visible_count(&edges);
        self.edges = edges;
        self
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_flow_name(mut self, name: impl Into<String>) -> Self {
        self.flow_name = name.into();
        self
    }

    pub fn changed(mut self) -> Self {
        self.has_changes = true;
        self
    }

    pub fn saved_at(mut self, timestamp: i64) -> Self {
        self.has_changes = false;
        self.last_saved = Some(timestamp);
        self
    }

    /// Replace the graph and viewport with the snapshot's.
    pub fn restore(self, snapshot: &FlowSnapshot) -> Self {
        self.with_nodes(snapshot.nodes.clone())
            .with_edges(snapshot.edges.clone())
            .with_viewport(snapshot.viewport)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot::capture(&self.nodes, &self.edges, self.viewport)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id.as_str() == id)
    }
}
