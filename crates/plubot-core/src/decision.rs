//! Decision nodes and the option nodes generated from their conditions.
//!
//! A decision node keeps its branches as `data.conditions`, an array of
//! `{id, text, condition, color}` objects. Each condition owns one option
//! node (`option-<decision>-<condition>`) wired from the decision node by an
//! elite edge (`edge-<decision>-<condition>`). Option nodes point back at
//! their branch through `data.sourceNode` and `data.conditionId`.

use crate::{Edge, EdgeType, ElementData, Node, NodeId, NodeType, Position, generate_id};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;

/// Upper bound on branches per decision node.
pub const MAX_CONDITIONS: usize = 8;

pub const NEW_CONDITION_TEXT: &str = "New condition";

const TRUE_COLOR: &str = "#22c55e";
const FALSE_COLOR: &str = "#ef4444";
const DEFAULT_CONDITION_PALETTE: [&str; 8] = [
    "#3b82f6", "#FF69B4", "#FFA500", "#ADFF2F", "#00CED1", "#DA70D6", "#FFD700", "#8A2BE2",
];

/// Horizontal spacing between sibling option nodes.
const OPTION_SPACING: f64 = 250.0;
const OPTION_DROP: f64 = 200.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub color: String,
}

impl Condition {
    /// A fresh branch; `index` is its slot among the node's conditions.
    pub fn new(text: &str, condition: &str, index: usize) -> Self {
        Self {
            id: generate_id("condition"),
            text: text.to_string(),
            condition: condition.to_string(),
            color: connector_color(text, index).to_string(),
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "text": self.text,
            "condition": self.condition,
            "color": self.color,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Affirmative,
    Negative,
    Other,
}

impl ConditionKind {
    /// Yes-like text is affirmative, no-like text negative.
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        if ["sí", "si", "yes", "true"].iter().any(|w| text.contains(w)) {
            ConditionKind::Affirmative
        } else if ["no", "not", "false"].iter().any(|w| text.contains(w)) {
            ConditionKind::Negative
        } else {
            ConditionKind::Other
        }
    }
}

/// Handle color for a branch: green for yes, red for no, otherwise a palette
/// entry picked by position.
pub fn connector_color(text: &str, index: usize) -> &'static str {
    match ConditionKind::classify(text) {
        ConditionKind::Affirmative => TRUE_COLOR,
        ConditionKind::Negative => FALSE_COLOR,
        ConditionKind::Other => DEFAULT_CONDITION_PALETTE[index % DEFAULT_CONDITION_PALETTE.len()],
    }
}

/// The yes/no pair a new decision node starts with.
pub fn default_conditions() -> Vec<Condition> {
    vec![Condition::new("Yes", "true", 0), Condition::new("No", "false", 1)]
}

/// Conditions stored on `node`. Malformed entries are skipped.
pub fn conditions(node: &Node) -> Vec<Condition> {
    match node.data.get("conditions") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(condition) => Some(condition),
                Err(e) => {
                    tracing::debug!("Skipping malformed condition on {}: {}", node.id, e);
                    None
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub fn set_conditions(node: &mut Node, conditions: &[Condition]) {
    node.data.insert(
        "conditions".to_string(),
        Value::Array(conditions.iter().map(Condition::to_value).collect()),
    );
}

pub fn option_node_id(decision: &NodeId, condition_id: &str) -> String {
    format!("option-{decision}-{condition_id}")
}

pub fn option_edge_id(decision: &NodeId, condition_id: &str) -> String {
    format!("edge-{decision}-{condition_id}")
}

/// The decision node and condition an option node was generated for.
pub fn option_source(node: &Node) -> Option<(NodeId, &str)> {
    if node.kind != NodeType::Option {
        return None;
    }
    let source = node.data.get("sourceNode")?.as_str()?;
    let condition_id = node.data.get("conditionId")?.as_str()?;
    Some((NodeId::from(source), condition_id))
}

fn is_ultra(decision: &Node) -> bool {
    decision
        .data
        .get("isUltraPerformanceMode")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn option_node(decision: &Node, condition: &Condition, index: usize, count: usize) -> Node {
    let ultra = is_ultra(decision);
    let offset = (index as f64 - (count as f64 - 1.0) / 2.0) * OPTION_SPACING;
    let position = Position::new(decision.position.x + offset, decision.position.y + OPTION_DROP);
    Node::new(option_node_id(&decision.id, &condition.id), NodeType::Option, position)
        .with_data("sourceNode", decision.id.as_str())
        .with_data("conditionId", condition.id.as_str())
        .with_data("text", condition.text.as_str())
        .with_data("instruction", condition.text.as_str())
        .with_data("isUltraPerformanceMode", ultra)
        .with_data("color", condition.color.as_str())
}

fn option_edge(decision: &Node, condition: &Condition) -> Edge {
    let mut edge = Edge::new(
        option_edge_id(&decision.id, &condition.id),
        decision.id.as_str(),
        option_node_id(&decision.id, &condition.id),
    );
    edge.kind = EdgeType::Elite;
    edge.source_handle = Some(format!("output-{}", condition.id));
    edge.target_handle = Some("target".to_string());
    let mut data = ElementData::new();
    data.insert("animated".to_string(), Value::Bool(!is_ultra(decision)));
    data.insert(
        "style".to_string(),
        json!({ "stroke": condition.color, "strokeWidth": 2 }),
    );
    edge.data = data;
    edge
}

/// Rebuild the option nodes and edges of `decision_id` from its conditions.
///
/// Option nodes generated for this decision and every edge leaving it are
/// replaced. An option node that survives keeps the position the user gave
/// it. Returns `None` when `decision_id` is not a decision node.
pub fn regenerate_options(
    nodes: &[Node],
    edges: &[Edge],
    decision_id: &NodeId,
) -> Option<(Vec<Node>, Vec<Edge>)> {
    let decision = nodes
        .iter()
        .find(|n| &n.id == decision_id && n.kind == NodeType::Decision)?;
    let branches = conditions(decision);

    let targets: HashSet<&NodeId> = edges
        .iter()
        .filter(|e| &e.source == decision_id)
        .map(|e| &e.target)
        .collect();
    let is_old_option = |node: &Node| {
        option_source(node).is_some_and(|(source, _)| &source == decision_id)
            || (node.kind == NodeType::Option && targets.contains(&node.id))
    };

    let mut next_nodes: Vec<Node> = nodes.iter().filter(|&n| !is_old_option(n)).cloned().collect();
    let mut next_edges: Vec<Edge> = edges
        .iter()
        .filter(|e| &e.source != decision_id)
        .cloned()
        .collect();

    for (index, condition) in branches.iter().enumerate() {
        let mut option = option_node(decision, condition, index, branches.len());
        if let Some(existing) = nodes.iter().find(|n| n.id == option.id) {
            option.position = existing.position;
            option.selected = existing.selected;
        }
        next_nodes.push(option);
        next_edges.push(option_edge(decision, condition));
    }

    // Edges from other nodes into a dropped option node go with it.
    let present: HashSet<&NodeId> = next_nodes.iter().map(|n| &n.id).collect();
    next_edges.retain(|e| present.contains(&e.source) && present.contains(&e.target));
    Some((next_nodes, next_edges))
}

/// Remove the branches whose option nodes are in `removed` from the decision
/// nodes still in `nodes`. Returns how many branches were removed.
pub fn detach_removed_options(removed: &[&Node], nodes: &mut [Node]) -> usize {
    let mut detached = 0;
    for option in removed {
        let Some((source, condition_id)) = option_source(option) else {
            continue;
        };
        let Some(decision) = nodes
            .iter_mut()
            .find(|n| n.id == source && n.kind == NodeType::Decision)
        else {
            continue;
        };
        let mut branches = conditions(decision);
        let before = branches.len();
        branches.retain(|c| c.id != condition_id);
        if branches.len() != before {
            set_conditions(decision, &branches);
            detached += 1;
        }
    }
    detached
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(id: &str, texts: &[&str]) -> Node {
        let mut node = Node::new(id, NodeType::Decision, Position::new(400.0, 100.0));
        let branches: Vec<Condition> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Condition {
                id: format!("c{i}"),
                text: text.to_string(),
                condition: String::new(),
                color: connector_color(text, i).to_string(),
            })
            .collect();
        set_conditions(&mut node, &branches);
        node
    }

    #[test]
    fn colors_follow_condition_kind() {
        assert_eq!(connector_color("Yes", 3), TRUE_COLOR);
        assert_eq!(connector_color("Sí", 0), TRUE_COLOR);
        assert_eq!(connector_color("No", 0), FALSE_COLOR);
        assert_eq!(connector_color("Maybe", 1), "#FF69B4");
        assert_eq!(connector_color("Maybe", 9), "#FF69B4");
    }

    #[test]
    fn regenerate_builds_one_option_per_condition() {
        let nodes = vec![decision("d", &["Yes", "No", "Maybe"])];
        let (nodes, edges) = regenerate_options(&nodes, &[], &NodeId::from("d")).unwrap();

        assert_eq!(nodes.len(), 4);
        assert_eq!(edges.len(), 3);
        let first = &nodes[1];
        assert_eq!(first.id.as_str(), "option-d-c0");
        assert_eq!(first.position, Position::new(150.0, 300.0));
        assert_eq!(option_source(first), Some((NodeId::from("d"), "c0")));
        assert_eq!(edges[2].source_handle.as_deref(), Some("output-c2"));
        assert_eq!(edges[2].kind, EdgeType::Elite);
        assert_eq!(nodes[3].position, Position::new(650.0, 300.0));
    }

    #[test]
    fn regenerate_keeps_moved_options_and_drops_stale_ones() {
        let nodes = vec![decision("d", &["Yes", "No"])];
        let (mut nodes, edges) = regenerate_options(&nodes, &[], &NodeId::from("d")).unwrap();
        nodes[1].position = Position::new(-5.0, -5.0);
        let kept = conditions(&nodes[0]);
        set_conditions(&mut nodes[0], &kept[..1]);

        let (nodes, edges) = regenerate_options(&nodes, &edges, &NodeId::from("d")).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].position, Position::new(-5.0, -5.0));
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn regenerate_ignores_non_decision_nodes() {
        let nodes = vec![Node::new("m", NodeType::Message, Position::default())];
        assert!(regenerate_options(&nodes, &[], &NodeId::from("m")).is_none());
    }

    #[test]
    fn removed_option_detaches_its_condition() {
        let nodes = vec![decision("d", &["Yes", "No"])];
        let (nodes, _) = regenerate_options(&nodes, &[], &NodeId::from("d")).unwrap();
        let removed = nodes[2].clone();
        let mut survivors: Vec<Node> = nodes[..2].to_vec();

        assert_eq!(detach_removed_options(&[&removed], &mut survivors), 1);
        let left = conditions(&survivors[0]);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "c0");
        assert_eq!(detach_removed_options(&[&removed], &mut survivors), 0);
    }

    #[test]
    fn malformed_conditions_are_skipped() {
        let node = Node::new("d", NodeType::Decision, Position::default()).with_data(
            "conditions",
            json!([{"id": "c1", "text": "Yes"}, {"text": "no id"}, 42]),
        );
        let parsed = conditions(&node);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "c1");
    }
}
