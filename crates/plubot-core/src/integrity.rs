use crate::{CoreError, Edge, EdgeId, EdgeType, ElementData, GraphElement, Node, NodeId, NodeType};
use std::collections::{HashMap, HashSet, VecDeque};

/// Node data keys the editor accepts from callers.
pub const NODE_DATA_KEYS: &[&str] = &[
    "label",
    "nodeType",
    "metadata",
    "message",
    "variables",
    "isEditing",
    "id",
    // decision
    "conditions",
    "question",
    // option
    "sourceNode",
    "conditionId",
    "text",
    "instruction",
    "isUltraPerformanceMode",
    "parentNode",
    "color",
    "lastUpdated",
    // ai
    "prompt",
    "promptTemplate",
    "temperature",
    "maxTokens",
    "systemMessage",
    "lastResponse",
    "lastPrompt",
    // media
    "type",
    "url",
    "caption",
    "altText",
    "description",
    "config",
    // wait
    "duration",
    "unit",
    "isCollapsed",
];

/// Edge data keys the editor accepts from callers.
pub const EDGE_DATA_KEYS: &[&str] = &[
    "animated",
    "style",
    "label",
    "sourceX",
    "sourceY",
    "targetX",
    "targetY",
    "labelStyle",
    "labelBgStyle",
    "markerEnd",
    "markerStart",
];

/// Copy of `data` restricted to `allowed` keys.
pub fn retain_allowed_keys(data: &ElementData, allowed: &[&str]) -> ElementData {
    let mut clean = ElementData::new();
    for (key, value) in data {
        if allowed.contains(&key.as_str()) {
            clean.insert(key.clone(), value.clone());
        } else {
            tracing::debug!("Dropping unsupported data key {:?}", key);
        }
    }
    clean
}

fn node_ids(nodes: &[Node]) -> HashSet<&NodeId> {
    nodes.iter().map(|n| &n.id).collect()
}

/// Edges whose source or target is not among `nodes`.
pub fn dangling_edges<'a>(nodes: &[Node], edges: &'a [Edge]) -> Vec<&'a Edge> {
    let ids = node_ids(nodes);
    edges
        .iter()
        .filter(|e| !ids.contains(&e.source) || !ids.contains(&e.target))
        .collect()
}

pub fn remove_dangling_edges(nodes: &[Node], edges: &[Edge]) -> Vec<Edge> {
    let ids = node_ids(nodes);
    edges
        .iter()
        .filter(|e| ids.contains(&e.source) && ids.contains(&e.target))
        .cloned()
        .collect()
}

pub fn validate_edges(nodes: &[Node], edges: &[Edge]) -> Result<(), CoreError> {
    let ids = node_ids(nodes);
    for edge in edges {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint) {
                return Err(CoreError::DanglingEdge {
                    edge: edge.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Deduplicate by id. The last occurrence supplies the value, the first
/// occurrence fixes the position in the output.
pub fn dedupe_edges(edges: &[Edge]) -> Vec<Edge> {
    let mut slots: HashMap<&EdgeId, usize> = HashMap::new();
    let mut out: Vec<Edge> = Vec::with_capacity(edges.len());
    for edge in edges {
        if edge.id.0.is_empty() {
            continue;
        }
        match slots.get(&edge.id) {
            Some(&slot) => out[slot] = edge.clone(),
            None => {
                slots.insert(&edge.id, out.len());
                out.push(edge.clone());
            }
        }
    }
    out
}

fn is_blank_handle(handle: Option<&str>) -> bool {
    matches!(handle, Some("" | "null" | "undefined"))
}

/// Drop placeholder handles and force elite edges on decision/option wiring.
pub fn sanitize_edge(edge: &Edge, node_types: &HashMap<NodeId, NodeType>) -> Edge {
    let mut clean = edge.clone();
    if is_blank_handle(clean.source_handle.as_deref()) {
        clean.source_handle = None;
    }
    if is_blank_handle(clean.target_handle.as_deref()) {
        clean.target_handle = None;
    }

    let needs_elite = [&edge.source, &edge.target]
        .into_iter()
        .filter_map(|id| node_types.get(id))
        .any(NodeType::requires_elite_edge);
    if needs_elite {
        clean.kind = EdgeType::Elite;
    }
    clean
}

/// Breadth-first walk along outgoing edges from `root`.
///
/// Returns every reachable node, `root` included.
pub fn collect_cascade(root: &NodeId, edges: &[Edge]) -> HashSet<NodeId> {
    let mut nodes = HashSet::new();
    let mut queue = VecDeque::from([root.clone()]);

    while let Some(current) = queue.pop_front() {
        if !nodes.insert(current.clone()) {
            continue;
        }
        for edge in edges.iter().filter(|e| e.source == current) {
            if !nodes.contains(&edge.target) {
                queue.push_back(edge.target.clone());
            }
        }
    }

    nodes
}

pub fn visible_count<E: GraphElement>(elements: &[E]) -> usize {
    elements.iter().filter(|e| !e.is_hidden()).count()
}
