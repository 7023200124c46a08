//! Pure change reducer for node and edge collections.
//!
//! A batch of [`ChangeOperation`]s is applied against one collection at a
//! time. Removals are filtered first, then at most one select/update/position
//! operation per id is merged into the surviving element, then additions are
//! appended in batch order. When a batch names the same id more than once,
//! the first operation wins.

use crate::{Edge, ElementData, GraphElement, Node, Position};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeOperation<E> {
    Select {
        id: String,
        selected: bool,
    },
    Remove {
        id: String,
    },
    Update {
        id: String,
        #[serde(default)]
        data: ElementData,
    },
    /// Only meaningful for nodes; edges ignore it.
    #[serde(rename = "position")]
    Move {
        id: String,
        #[serde(default)]
        position: Option<Position>,
        #[serde(default)]
        dragging: bool,
    },
    Add {
        item: E,
    },
}

pub type NodeChange = ChangeOperation<Node>;
pub type EdgeChange = ChangeOperation<Edge>;

impl<E: GraphElement> ChangeOperation<E> {
    pub fn select(id: impl Into<String>, selected: bool) -> Self {
        Self::Select {
            id: id.into(),
            selected,
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Self::Remove { id: id.into() }
    }

    pub fn update(id: impl Into<String>, data: ElementData) -> Self {
        Self::Update {
            id: id.into(),
            data,
        }
    }

    pub fn moved(id: impl Into<String>, position: Position, dragging: bool) -> Self {
        Self::Move {
            id: id.into(),
            position: Some(position),
            dragging,
        }
    }

    pub fn add(item: E) -> Self {
        Self::Add { item }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Select { id, .. }
            | Self::Remove { id }
            | Self::Update { id, .. }
            | Self::Move { id, .. } => id,
            Self::Add { item } => item.element_id(),
        }
    }

    fn merge_into(&self, element: &mut E) {
        match self {
            Self::Select { selected, .. } => element.set_selected(*selected),
            Self::Update { data, .. } => element.merge_data(data),
            Self::Move {
                position: Some(position),
                ..
            } => {
                element.set_position(*position);
            }
            Self::Move { position: None, .. } | Self::Remove { .. } | Self::Add { .. } => {}
        }
    }
}

/// Apply `changes` to `elements`, returning the new ordered collection.
///
/// Operations with an empty id are skipped.
pub fn apply_changes<E: GraphElement>(changes: &[ChangeOperation<E>], elements: &[E]) -> Vec<E> {
    let mut removed: HashSet<&str> = HashSet::new();
    let mut merges: HashMap<&str, &ChangeOperation<E>> = HashMap::new();
    let mut additions: Vec<&E> = Vec::new();

    for change in changes {
        let id = change.id();
        if id.is_empty() {
            tracing::debug!("Ignoring change operation without id");
            continue;
        }
        match change {
            ChangeOperation::Remove { .. } => {
                removed.insert(id);
            }
            ChangeOperation::Add { item } => additions.push(item),
            _ => {
                merges.entry(id).or_insert(change);
            }
        }
    }

    let mut next = Vec::with_capacity(elements.len() + additions.len());
    for element in elements {
        let id = element.element_id();
        if removed.contains(id) {
            continue;
        }
        match merges.get(id) {
            Some(change) => {
                let mut updated = element.clone();
                change.merge_into(&mut updated);
                next.push(updated);
            }
            None => next.push(element.clone()),
        }
    }

    let mut present: HashSet<String> = next.iter().map(|e| e.element_id().to_string()).collect();
    for item in additions {
        let id = item.element_id();
        if removed.contains(id) || !present.insert(id.to_string()) {
            continue;
        }
        next.push(item.clone());
    }

    next
}

/// Decode raw JSON operations, dropping the ones that do not parse.
pub fn parse_changes<E: DeserializeOwned>(raw: &[Value]) -> Vec<ChangeOperation<E>> {
    raw.iter()
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(change) => Some(change),
            Err(e) => {
                tracing::debug!("Dropping malformed change operation: {}", e);
                None
            }
        })
        .collect()
}

pub fn is_selection_only<E>(changes: &[ChangeOperation<E>]) -> bool {
    !changes.is_empty()
        && changes
            .iter()
            .all(|c| matches!(c, ChangeOperation::Select { .. }))
}

pub fn has_removal<E>(changes: &[ChangeOperation<E>]) -> bool {
    changes
        .iter()
        .any(|c| matches!(c, ChangeOperation::Remove { .. }))
}

pub fn is_drag_in_progress<E>(changes: &[ChangeOperation<E>]) -> bool {
    changes
        .iter()
        .any(|c| matches!(c, ChangeOperation::Move { dragging: true, .. }))
}

/// A position change that reports the pointer was released, with or
/// without a final position.
pub fn is_drag_end<E>(changes: &[ChangeOperation<E>]) -> bool {
    changes
        .iter()
        .any(|c| matches!(c, ChangeOperation::Move { dragging: false, .. }))
}

pub fn removed_ids<E>(changes: &[ChangeOperation<E>]) -> Vec<String> {
    changes
        .iter()
        .filter_map(|c| match c {
            ChangeOperation::Remove { id } if !id.is_empty() => Some(id.clone()),
            _ => None,
        })
        .collect()
}
