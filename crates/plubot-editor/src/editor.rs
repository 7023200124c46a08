//! The flow editor's state container and change dispatch.
//!
//! Every UI gesture lands here as a method call. The method computes the next
//! [`FlowState`] with the pure reducer, decides whether the transition is an
//! undo step, and swaps the state in.
//!
//! History keeps the last committed snapshot as its present. Edits that do
//! not commit (selection, in-progress drags, viewport panning) are folded into
//! that present right before the next commit or undo, so undo always returns
//! to the graph as it looked just before the last undoable edit.

use crate::autosave::AutoSaver;
use crate::persistence::{ManualBackup, Persistence, RecoveryOffer};
use crate::settings::EditorSettings;
use crate::shortcuts::{Intent, KeyEvent, ShortcutDispatcher, ShortcutListener, ShortcutOutcome};
use crate::state::FlowState;
use crate::EditorError;
use plubot_core::decision::{
    Condition, MAX_CONDITIONS, NEW_CONDITION_TEXT, conditions, default_conditions,
    detach_removed_options, regenerate_options, set_conditions,
};
use plubot_core::{
    CoreError, EDGE_DATA_KEYS, Edge, EdgeChange, EdgeId, ElementData, FlowSnapshot, NODE_DATA_KEYS,
    Node, NodeChange, NodeId, NodeType, Position, Viewport, apply_changes, collect_cascade,
    dangling_edges, dedupe_edges, generate_id, has_removal, is_drag_end, is_drag_in_progress,
    is_selection_only, parse_changes, remove_dangling_edges, removed_ids, retain_allowed_keys,
    sanitize_edge,
};
use plubot_events::telemetry::{
    OP_RESTORE_MANUAL_BACKUP, new_correlation_id, operation_failure, operation_start,
    operation_success,
};
use plubot_events::{Event, EventBus, Notification};
use plubot_history::HistoryStore;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What a dispatched change did to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The graph is unchanged.
    Ignored,
    /// State changed without recording an undo step.
    Applied,
    /// State changed and an undo step was recorded.
    Committed,
}

impl ChangeOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, ChangeOutcome::Ignored)
    }
}

/// A user-drawn connection between two handles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub source: String,
    pub target: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    pub fn with_handles(mut self, source: Option<&str>, target: Option<&str>) -> Self {
        self.source_handle = source.map(str::to_string);
        self.target_handle = target.map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    /// Selection flags only: no undo step, not an unsaved change.
    Selection,
    /// Unsaved change without an undo step.
    Transient,
    /// Undo step.
    Structural,
    /// Undo step plus backup.
    Destructive,
}

pub struct FlowEditor {
    state: FlowState,
    history: HistoryStore<FlowSnapshot>,
    persistence: Persistence,
    events: EventBus,
    settings: EditorSettings,
    shortcuts: ShortcutDispatcher,
    pending_recovery: Option<RecoveryOffer>,
    /// Graph as it was when the current drag began.
    drag_origin: Option<FlowSnapshot>,
    autosaver: Option<AutoSaver>,
}

impl FlowEditor {
    pub fn new(
        persistence: Persistence,
        events: EventBus,
        settings: EditorSettings,
    ) -> Result<Self, EditorError> {
        let shortcuts = ShortcutDispatcher::from_bindings(&settings.shortcuts)?;
        let state = FlowState::default();
        let history = HistoryStore::new(state.snapshot(), settings.history_capacity)
            .with_events(events.clone());
        Ok(Self {
            state,
            history,
            persistence,
            events,
            settings,
            shortcuts,
            pending_recovery: None,
            drag_origin: None,
            autosaver: None,
        })
    }

    /// Schedule a debounced write after every change.
    pub fn with_autosaver(mut self, autosaver: AutoSaver) -> Self {
        self.autosaver = Some(autosaver);
        self
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn history(&self) -> &HistoryStore<FlowSnapshot> {
        &self.history
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn shortcuts(&self) -> &ShortcutDispatcher {
        &self.shortcuts
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn pending_recovery(&self) -> Option<&RecoveryOffer> {
        self.pending_recovery.as_ref()
    }

    /// Open a project: load its saved flow (or start empty), drop dangling
    /// edges, reset history and look for a newer backup.
    pub fn load(&mut self, project_id: &str) -> Result<(), EditorError> {
        // Pending auto-saves belong to the project being closed.
        self.flush_autosave();
        let saved = match self.persistence.load_saved(project_id) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!("Saved flow for {} unreadable, starting empty: {}", project_id, e);
                self.events.publish(Event::notify(Notification::warning(
                    "The saved flow could not be read, starting from an empty canvas",
                )));
                None
            }
        };

        let mut state = FlowState::for_project(project_id);
        if let Some(snapshot) = &saved {
            let edges = remove_dangling_edges(&snapshot.nodes, &snapshot.edges);
            if edges.len() != snapshot.edges.len() {
                tracing::info!(
                    "Dropped {} dangling edges while loading {}",
                    snapshot.edges.len() - edges.len(),
                    project_id
                );
            }
            state = state
                .with_nodes(snapshot.nodes.clone())
                .with_edges(edges)
                .with_viewport(snapshot.viewport);
            state.last_saved = Some(snapshot.timestamp);
        }

        self.state = state;
        self.reset_history();
        self.drag_origin = None;
        self.pending_recovery = self.persistence.check_recovery(project_id);
        tracing::info!(
            "Loaded project {} with {} nodes and {} edges",
            project_id,
            self.state.nodes.len(),
            self.state.edges.len()
        );
        self.publish_flow_data();
        Ok(())
    }

    /// Removing an option node also removes its branch from the decision
    /// node it came from. A drag release commits the whole drag as one undo
    /// step even when the release itself moves nothing.
    pub fn on_nodes_change(&mut self, changes: &[NodeChange]) -> ChangeOutcome {
        if changes.is_empty() {
            return ChangeOutcome::Ignored;
        }
        let mut nodes = apply_changes(changes, &self.state.nodes);
        let drag_released =
            self.drag_origin.is_some() && is_drag_end(changes) && !is_drag_in_progress(changes);
        let record = if has_removal(changes) {
            Record::Destructive
        } else if is_selection_only(changes) {
            Record::Selection
        } else if is_drag_in_progress(changes) {
            if self.drag_origin.is_none() {
                self.drag_origin = Some(self.state.snapshot());
            }
            Record::Transient
        } else {
            Record::Structural
        };

        if record == Record::Destructive {
            let gone: HashSet<String> = removed_ids(changes).into_iter().collect();
            let removed: Vec<&Node> = self
                .state
                .nodes
                .iter()
                .filter(|n| gone.contains(n.id.as_str()))
                .collect();
            let detached = detach_removed_options(&removed, &mut nodes);
            if detached > 0 {
                tracing::debug!("Removed {} decision branches with their option nodes", detached);
            }
        }

        let edges = remove_dangling_edges(&nodes, &self.state.edges);
        let next = self.state.clone().with_nodes(nodes).with_edges(edges);
        let outcome = self.transition(next, record);
        if drag_released && outcome == ChangeOutcome::Ignored {
            return self.finish_drag();
        }
        outcome
    }

    pub fn on_edges_change(&mut self, changes: &[EdgeChange]) -> ChangeOutcome {
        if changes.is_empty() {
            return ChangeOutcome::Ignored;
        }
        let record = if has_removal(changes) {
            Record::Destructive
        } else if is_selection_only(changes) {
            Record::Selection
        } else {
            Record::Structural
        };
        let types = self.node_types();
        let edges: Vec<Edge> = apply_changes(changes, &self.state.edges)
            .iter()
            .map(|edge| sanitize_edge(edge, &types))
            .collect();
        let edges = remove_dangling_edges(&self.state.nodes, &edges);
        let next = self.state.clone().with_edges(edges);
        self.transition(next, record)
    }

    /// Decode raw JSON node operations and dispatch the well-formed ones.
    pub fn on_raw_node_changes(&mut self, raw: &[Value]) -> ChangeOutcome {
        let changes: Vec<NodeChange> = parse_changes(raw);
        self.on_nodes_change(&changes)
    }

    pub fn on_raw_edge_changes(&mut self, raw: &[Value]) -> ChangeOutcome {
        let changes: Vec<EdgeChange> = parse_changes(raw);
        self.on_edges_change(&changes)
    }

    /// Returns the new edge id, or `None` for self-connections and duplicates.
    pub fn on_connect(&mut self, connection: Connection) -> Result<Option<EdgeId>, EditorError> {
        let types = self.node_types();
        for endpoint in [&connection.source, &connection.target] {
            if !types.contains_key(&NodeId(endpoint.clone())) {
                return Err(CoreError::MissingEndpoint {
                    from: NodeId(connection.source.clone()),
                    to: NodeId(connection.target.clone()),
                    missing: NodeId(endpoint.clone()),
                }
                .into());
            }
        }
        if connection.source == connection.target {
            tracing::debug!("Rejected self-connection on {}", connection.source);
            return Ok(None);
        }

        let mut edge = Edge::new(generate_id("edge"), &*connection.source, &*connection.target);
        edge.source_handle = connection.source_handle;
        edge.target_handle = connection.target_handle;
        let edge = sanitize_edge(&edge, &types);

        let duplicate = self.state.edges.iter().any(|e| {
            e.source == edge.source
                && e.target == edge.target
                && e.source_handle == edge.source_handle
                && e.target_handle == edge.target_handle
        });
        if duplicate {
            tracing::debug!("Rejected duplicate connection {} -> {}", edge.source, edge.target);
            return Ok(None);
        }

        let id = edge.id.clone();
        let mut edges = self.state.edges.clone();
        edges.push(edge);
        let next = self.state.clone().with_edges(edges);
        self.transition(next, Record::Structural);
        Ok(Some(id))
    }

    /// Add a node of `kind`. Without a position the node goes on a three
    /// column grid. A decision node starts with a yes/no pair of branches
    /// and their option nodes, all in one undo step.
    pub fn add_node(
        &mut self,
        kind: NodeType,
        position: Option<Position>,
        label: Option<&str>,
    ) -> NodeId {
        let count = self.state.nodes.len();
        let position = position.unwrap_or_else(|| {
            Position::new(
                100.0 + (count % 3) as f64 * 200.0,
                100.0 + (count / 3) as f64 * 150.0,
            )
        });
        let id = generate_id(kind.as_str());
        let label = label.unwrap_or(kind.default_label()).to_string();
        let tag = kind.as_str().to_string();
        let is_decision = kind == NodeType::Decision;
        let mut node = Node::new(id.clone(), kind, position)
            .with_data("id", id.clone())
            .with_data("label", label)
            .with_data("nodeType", tag);

        if is_decision {
            set_conditions(&mut node, &default_conditions());
            let mut nodes = self.state.nodes.clone();
            nodes.push(node);
            if let Some((nodes, edges)) =
                regenerate_options(&nodes, &self.state.edges, &NodeId(id.clone()))
            {
                self.replace_graph(nodes, edges);
            }
        } else {
            self.insert_node(node);
        }
        NodeId(id)
    }

    /// Insert a fully built node. Ids already present are ignored; data keys
    /// outside [`NODE_DATA_KEYS`] are dropped.
    pub fn insert_node(&mut self, mut node: Node) -> ChangeOutcome {
        node.data = retain_allowed_keys(&node.data, NODE_DATA_KEYS);
        self.on_nodes_change(&[NodeChange::add(node)])
    }

    /// Shallow-merge `data` into a node. Keys outside [`NODE_DATA_KEYS`] are
    /// dropped.
    pub fn update_node_data(&mut self, id: &str, data: ElementData) -> ChangeOutcome {
        let data = retain_allowed_keys(&data, NODE_DATA_KEYS);
        if data.is_empty() {
            return ChangeOutcome::Ignored;
        }
        self.on_nodes_change(&[NodeChange::update(id, data)])
    }

    /// Shallow-merge `data` into an edge. Keys outside [`EDGE_DATA_KEYS`] are
    /// dropped.
    pub fn update_edge_data(&mut self, id: &str, data: ElementData) -> ChangeOutcome {
        let data = retain_allowed_keys(&data, EDGE_DATA_KEYS);
        if data.is_empty() {
            return ChangeOutcome::Ignored;
        }
        self.on_edges_change(&[EdgeChange::update(id, data)])
    }

    pub fn update_decision_question(&mut self, id: &str, question: &str) -> ChangeOutcome {
        let mut data = ElementData::new();
        data.insert("question".to_string(), Value::from(question));
        self.update_node_data(id, data)
    }

    /// Append a branch to a decision node and generate its option node.
    /// Returns the new condition id, or `None` when `id` is not a decision
    /// node or it already has [`MAX_CONDITIONS`] branches.
    pub fn add_decision_condition(&mut self, id: &str) -> Option<String> {
        let decision = self.decision_node(id)?;
        let mut branches = conditions(decision);
        if branches.len() >= MAX_CONDITIONS {
            tracing::warn!("Decision node {} already has {} conditions", id, MAX_CONDITIONS);
            return None;
        }
        let condition = Condition::new(NEW_CONDITION_TEXT, "", branches.len());
        let condition_id = condition.id.clone();
        branches.push(condition);
        self.rewrite_conditions(id, &branches);
        Some(condition_id)
    }

    pub fn update_decision_condition_text(
        &mut self,
        id: &str,
        condition_id: &str,
        text: &str,
    ) -> ChangeOutcome {
        let Some(decision) = self.decision_node(id) else {
            return ChangeOutcome::Ignored;
        };
        let mut branches = conditions(decision);
        let Some(branch) = branches.iter_mut().find(|c| c.id == condition_id) else {
            return ChangeOutcome::Ignored;
        };
        branch.text = text.to_string();
        self.rewrite_conditions(id, &branches)
    }

    /// Drop a branch together with its option node.
    pub fn delete_decision_condition(&mut self, id: &str, condition_id: &str) -> ChangeOutcome {
        let Some(decision) = self.decision_node(id) else {
            return ChangeOutcome::Ignored;
        };
        let mut branches = conditions(decision);
        let before = branches.len();
        branches.retain(|c| c.id != condition_id);
        if branches.len() == before {
            return ChangeOutcome::Ignored;
        }
        self.rewrite_conditions(id, &branches)
    }

    /// Rebuild a decision node's option nodes from its current conditions.
    pub fn generate_option_nodes(&mut self, id: &str) -> ChangeOutcome {
        match regenerate_options(&self.state.nodes, &self.state.edges, &NodeId::from(id)) {
            Some((nodes, edges)) => self.replace_graph(nodes, edges),
            None => ChangeOutcome::Ignored,
        }
    }

    pub fn move_node(&mut self, id: &str, position: Position, dragging: bool) -> ChangeOutcome {
        self.on_nodes_change(&[NodeChange::moved(id, position, dragging)])
    }

    /// Copy a node with a fresh id, offset down and right, label marked as a copy.
    pub fn duplicate_node(&mut self, id: &str) -> Option<NodeId> {
        let Some(original) = self.state.node(id) else {
            tracing::warn!("Node {} not found for duplication", id);
            return None;
        };
        let new_id = generate_id(original.kind.as_str());
        let label = original
            .label()
            .unwrap_or(original.kind.default_label())
            .to_string();
        let mut copy = original.clone();
        copy.id = NodeId(new_id.clone());
        copy.position = original.position.offset(50.0, 50.0);
        copy.selected = false;
        copy.data.insert("id".to_string(), Value::from(new_id.clone()));
        copy.data
            .insert("label".to_string(), Value::from(format!("{label} (Copy)")));
        self.insert_node(copy);
        Some(NodeId(new_id))
    }

    /// Remove a node and everything reachable from it along outgoing edges.
    pub fn delete_node(&mut self, id: &str) -> ChangeOutcome {
        if self.state.node(id).is_none() {
            tracing::warn!("Node {} not found for deletion", id);
            return ChangeOutcome::Ignored;
        }
        let nodes = collect_cascade(&NodeId::from(id), &self.state.edges);
        let changes: Vec<NodeChange> = self
            .state
            .nodes
            .iter()
            .filter(|n| nodes.contains(&n.id))
            .map(|n| NodeChange::remove(n.id.as_str()))
            .collect();
        tracing::debug!("Deleting {} nodes starting at {}", changes.len(), id);
        self.on_nodes_change(&changes)
    }

    pub fn remove_edge(&mut self, id: &str) -> ChangeOutcome {
        self.on_edges_change(&[EdgeChange::remove(id)])
    }

    /// Replace every edge. Duplicate ids keep their first slot with the last
    /// value; blank handles are dropped and dangling edges discarded.
    pub fn set_edges(&mut self, edges: Vec<Edge>) -> ChangeOutcome {
        let types = self.node_types();
        let edges: Vec<Edge> = dedupe_edges(&edges)
            .iter()
            .map(|edge| sanitize_edge(edge, &types))
            .collect();
        let edges = remove_dangling_edges(&self.state.nodes, &edges);
        self.replace_graph(self.state.nodes.clone(), edges)
    }

    /// Drop edges whose endpoints are gone. Returns how many were removed.
    pub fn clean_up_edges(&mut self) -> usize {
        let dangling: Vec<String> = dangling_edges(&self.state.nodes, &self.state.edges)
            .iter()
            .map(|e| e.id.to_string())
            .collect();
        if dangling.is_empty() {
            return 0;
        }
        tracing::info!("Removing dangling edges: {}", dangling.join(", "));
        let edges = remove_dangling_edges(&self.state.nodes, &self.state.edges);
        self.replace_graph(self.state.nodes.clone(), edges);
        dangling.len()
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> ChangeOutcome {
        let next = self.state.clone().with_viewport(viewport);
        self.transition(next, Record::Transient)
    }

    pub fn set_flow_name(&mut self, name: &str) {
        if self.state.flow_name == name {
            return;
        }
        self.state = std::mem::take(&mut self.state)
            .with_flow_name(name)
            .changed();
    }

    /// Record the current graph as an undo step if it differs from the last one.
    pub fn checkpoint(&mut self) -> bool {
        let current = self.state.snapshot();
        if self.history.present().same_graph(&current) {
            return false;
        }
        self.drag_origin = None;
        self.history.commit(current);
        true
    }

    pub fn undo(&mut self) -> bool {
        self.history.replace_present(self.state.snapshot());
        self.drag_origin = None;
        let Some(snapshot) = self.history.undo().cloned() else {
            return false;
        };
        self.restore_snapshot(&snapshot);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.history.redo().cloned() else {
            return false;
        };
        self.drag_origin = None;
        self.restore_snapshot(&snapshot);
        true
    }

    /// Persist the current graph. On failure the in-memory state is left as is.
    pub fn save(&mut self) -> Result<i64, EditorError> {
        let project_id = self.state.project_id.clone().ok_or(EditorError::NoProject)?;
        let snapshot = self.state.snapshot();
        let timestamp = self.persistence.save(&project_id, &snapshot)?;
        self.state = std::mem::take(&mut self.state).saved_at(timestamp);
        Ok(timestamp)
    }

    /// Re-run the backup check for the open project.
    pub fn check_recovery(&mut self) -> Option<&RecoveryOffer> {
        let project_id = self.state.project_id.clone()?;
        self.pending_recovery = self.persistence.check_recovery(&project_id);
        self.pending_recovery.as_ref()
    }

    /// Replace the current work with the offered backup. History restarts at
    /// the backup; the backup itself stays in storage until the next save.
    pub fn accept_recovery(&mut self) -> bool {
        let Some(offer) = self.pending_recovery.take() else {
            return false;
        };
        let edges = remove_dangling_edges(&offer.backup.nodes, &offer.backup.edges);
        let mut state = FlowState::for_project(offer.project_id.clone())
            .with_flow_name(self.state.flow_name.clone())
            .restore(&offer.backup)
            .with_edges(edges)
            .changed();
        state.is_backup_loaded = true;
        state.last_saved = offer.saved_timestamp;
        self.state = state;
        self.reset_history();
        self.drag_origin = None;
        tracing::info!(
            "Recovered backup for {} from {}",
            offer.project_id,
            offer.backup_timestamp
        );
        self.events.publish(Event::RecoveryAccepted {
            project_id: offer.project_id,
        });
        self.publish_flow_data();
        true
    }

    /// Keep the current work and delete the offered backup.
    pub fn dismiss_recovery(&mut self) -> Result<bool, EditorError> {
        let Some(offer) = self.pending_recovery.take() else {
            return Ok(false);
        };
        self.persistence.discard_backup(&offer.project_id)?;
        self.events.publish(Event::RecoveryDismissed {
            project_id: offer.project_id,
        });
        Ok(true)
    }

    pub fn create_manual_backup(&self, name: &str, reason: &str) -> Result<ManualBackup, EditorError> {
        let project_id = self.project_id()?;
        self.persistence
            .create_manual_backup(project_id, &self.state.snapshot(), name, reason)
    }

    pub fn list_manual_backups(&self) -> Vec<ManualBackup> {
        match &self.state.project_id {
            Some(project_id) => self.persistence.list_manual_backups(project_id),
            None => Vec::new(),
        }
    }

    /// Load a manual backup as an undoable edit.
    pub fn restore_manual_backup(&mut self, backup_id: &str) -> Result<ChangeOutcome, EditorError> {
        let project_id = self.project_id()?.to_string();
        let correlation_id = new_correlation_id();
        operation_start(OP_RESTORE_MANUAL_BACKUP, &correlation_id, Some(&project_id));
        let backup = match self.persistence.find_manual_backup(&project_id, backup_id) {
            Ok(backup) => backup,
            Err(e) => {
                operation_failure(
                    OP_RESTORE_MANUAL_BACKUP,
                    &correlation_id,
                    Some(&project_id),
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };
        let snapshot = &backup.snapshot;
        let edges = remove_dangling_edges(&snapshot.nodes, &snapshot.edges);
        let next = self
            .state
            .clone()
            .with_nodes(snapshot.nodes.clone())
            .with_edges(edges)
            .with_viewport(snapshot.viewport);
        let outcome = self.transition(next, Record::Structural);
        operation_success(OP_RESTORE_MANUAL_BACKUP, &correlation_id, Some(&project_id), None);
        Ok(outcome)
    }

    pub fn delete_manual_backup(&self, backup_id: &str) -> Result<(), EditorError> {
        self.persistence
            .delete_manual_backup(self.project_id()?, backup_id)
    }

    pub fn export_manual_backup(&self, backup_id: &str) -> Result<String, EditorError> {
        self.persistence
            .export_manual_backup(self.project_id()?, backup_id)
    }

    pub fn import_manual_backup(&self, raw: &str) -> Result<ManualBackup, EditorError> {
        self.persistence
            .import_manual_backup(self.project_id()?, raw)
    }

    /// Returns whether the intent did anything.
    pub fn apply_intent(&mut self, intent: Intent) -> Result<bool, EditorError> {
        match intent {
            Intent::Undo => Ok(self.undo()),
            Intent::Redo => Ok(self.redo()),
            Intent::Save => self.save().map(|_| true),
        }
    }

    /// Route a key press through the shortcut table. Save failures have
    /// already been reported as notifications and are only logged here.
    pub fn handle_key(&mut self, event: &KeyEvent) -> Option<ShortcutOutcome> {
        let outcome = self.shortcuts.dispatch(event)?;
        if let Err(e) = self.apply_intent(outcome.intent) {
            tracing::warn!("Shortcut {:?} failed: {}", outcome.intent, e);
        }
        Some(outcome)
    }

    /// Apply the intents a mounted [`ShortcutListener`] has queued. Returns
    /// how many were applied.
    pub fn apply_shortcuts(&mut self, listener: &ShortcutListener) -> usize {
        let pending = listener.take_pending();
        for intent in &pending {
            if let Err(e) = self.apply_intent(*intent) {
                tracing::warn!("Shortcut {:?} failed: {}", intent, e);
            }
        }
        pending.len()
    }

    /// Write any pending auto-save now.
    pub fn flush_autosave(&self) {
        if let Some(autosaver) = &self.autosaver {
            autosaver.flush();
        }
    }

    fn project_id(&self) -> Result<&str, EditorError> {
        self.state.project_id.as_deref().ok_or(EditorError::NoProject)
    }

    fn node_types(&self) -> HashMap<NodeId, NodeType> {
        self.state
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.kind.clone()))
            .collect()
    }

    fn decision_node(&self, id: &str) -> Option<&Node> {
        self.state.node(id).filter(|n| n.kind == NodeType::Decision)
    }

    fn rewrite_conditions(&mut self, id: &str, branches: &[Condition]) -> ChangeOutcome {
        let mut nodes = self.state.nodes.clone();
        if let Some(decision) = nodes.iter_mut().find(|n| n.id.as_str() == id) {
            set_conditions(decision, branches);
        }
        match regenerate_options(&nodes, &self.state.edges, &NodeId::from(id)) {
            Some((nodes, edges)) => self.replace_graph(nodes, edges),
            None => ChangeOutcome::Ignored,
        }
    }

    /// Swap in a new graph as one undo step. Losing any node or edge id
    /// makes it destructive.
    fn replace_graph(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) -> ChangeOutcome {
        let node_ids: HashSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();
        let edge_ids: HashSet<&EdgeId> = edges.iter().map(|e| &e.id).collect();
        let drops = self.state.nodes.iter().any(|n| !node_ids.contains(&n.id))
            || self.state.edges.iter().any(|e| !edge_ids.contains(&e.id));
        let record = if drops {
            Record::Destructive
        } else {
            Record::Structural
        };
        let next = self.state.clone().with_nodes(nodes).with_edges(edges);
        self.transition(next, record)
    }

    /// Commit a drag whose release carried no new position.
    fn finish_drag(&mut self) -> ChangeOutcome {
        let Some(origin) = self.drag_origin.take() else {
            return ChangeOutcome::Ignored;
        };
        let current = self.state.snapshot();
        if origin.same_graph(&current) {
            return ChangeOutcome::Ignored;
        }
        self.history.replace_present(origin);
        self.history.commit(current);
        ChangeOutcome::Committed
    }

    fn reset_history(&mut self) {
        self.history = HistoryStore::new(self.state.snapshot(), self.settings.history_capacity)
            .with_events(self.events.clone());
        self.history.clear();
    }

    fn restore_snapshot(&mut self, snapshot: &FlowSnapshot) {
        self.state = std::mem::take(&mut self.state).restore(snapshot).changed();
        self.schedule_autosave();
        self.publish_flow_data();
    }

    fn transition(&mut self, next: FlowState, record: Record) -> ChangeOutcome {
        let before = self.state.snapshot();
        let after = next.snapshot();
        if before.same_graph(&after) {
            return ChangeOutcome::Ignored;
        }

        let commits = matches!(record, Record::Structural | Record::Destructive);
        if commits {
            let origin = self.drag_origin.take().unwrap_or(before);
            self.history.replace_present(origin);
            self.history.commit(after.clone());
        }

        self.state = match record {
            Record::Selection => next,
            _ => next.changed(),
        };

        if record == Record::Destructive
            && self.settings.backup_on_destructive_change
            && let Some(project_id) = &self.state.project_id
        {
            self.persistence.backup(project_id, &after);
        }

        if record != Record::Selection {
            self.schedule_autosave();
        }
        self.publish_flow_data();

        if commits {
            ChangeOutcome::Committed
        } else {
            ChangeOutcome::Applied
        }
    }

    fn schedule_autosave(&self) {
        if let Some(autosaver) = &self.autosaver
            && let Some(project_id) = &self.state.project_id
        {
            autosaver.schedule(project_id, self.state.snapshot());
        }
    }

    fn publish_flow_data(&self) {
        self.events.publish(Event::FlowDataUpdated {
            project_id: self.state.project_id.clone(),
            node_count: self.state.node_count,
            edge_count: self.state.edge_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::tests::FailingStore;
    use crate::persistence::{backup_key, flow_key};
    use crate::shortcuts::FocusTarget;
    use parking_lot::Mutex;
    use plubot_events::Severity;
    use plubot_storage::{KeyValueStore, Storage};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn editor_with(store: Box<dyn KeyValueStore + Send>) -> (FlowEditor, EventBus) {
        let events = EventBus::new();
        let persistence = Persistence::new(store, events.clone());
        let editor = FlowEditor::new(persistence, events.clone(), EditorSettings::default())
            .expect("default settings are valid");
        (editor, events)
    }

    fn loaded_editor() -> (FlowEditor, EventBus) {
        let (mut editor, events) = editor_with(Box::new(Storage::new_in_memory().unwrap()));
        editor.load("p1").unwrap();
        (editor, events)
    }

    fn node(id: &str, kind: NodeType) -> Node {
        Node::new(id, kind, Position::default())
    }

    fn ids(editor: &FlowEditor) -> Vec<&str> {
        editor.state().nodes.iter().map(|n| n.id.as_str()).collect()
    }

    fn seed_abc(editor: &mut FlowEditor) {
        for id in ["a", "b", "c"] {
            editor.insert_node(node(id, NodeType::Message));
        }
    }

    #[test]
    fn removal_commits_and_undo_restores() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);

        let outcome = editor.on_nodes_change(&[NodeChange::remove("b")]);
        assert_eq!(outcome, ChangeOutcome::Committed);
        assert_eq!(ids(&editor), vec!["a", "c"]);

        assert!(editor.undo());
        assert_eq!(ids(&editor), vec!["a", "b", "c"]);
        assert!(editor.redo());
        assert_eq!(ids(&editor), vec!["a", "c"]);
    }

    #[test]
    fn selection_never_commits() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        let depth = editor.history().undo_depth();
        let saved_flag = editor.state().has_changes;

        let outcome = editor.on_nodes_change(&[NodeChange::select("a", true)]);
        assert_eq!(outcome, ChangeOutcome::Applied);
        assert_eq!(editor.history().undo_depth(), depth);
        assert!(editor.state().node("a").unwrap().selected);
        assert_eq!(editor.state().has_changes, saved_flag);
    }

    #[test]
    fn drag_commits_once_at_drag_end() {
        let (mut editor, _events) = loaded_editor();
        editor.insert_node(node("a", NodeType::Start));
        let depth = editor.history().undo_depth();

        editor.move_node("a", Position::new(10.0, 0.0), true);
        editor.move_node("a", Position::new(20.0, 0.0), true);
        assert_eq!(editor.history().undo_depth(), depth);
        assert_eq!(
            editor.move_node("a", Position::new(30.0, 0.0), false),
            ChangeOutcome::Committed
        );
        assert_eq!(editor.history().undo_depth(), depth + 1);

        assert!(editor.undo());
        assert_eq!(editor.state().node("a").unwrap().position, Position::default());
    }

    #[test]
    fn undo_and_redo_on_empty_history_are_noops() {
        let (mut editor, _events) = loaded_editor();
        assert!(!editor.undo());
        assert!(!editor.redo());
        assert!(editor.state().nodes.is_empty());
    }

    #[test]
    fn commit_after_undo_discards_redo() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        editor.on_nodes_change(&[NodeChange::remove("a")]);
        editor.undo();
        assert!(editor.can_redo());

        editor.on_nodes_change(&[NodeChange::remove("c")]);
        assert!(!editor.can_redo());
    }

    #[test]
    fn removing_missing_node_is_ignored() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        let depth = editor.history().undo_depth();
        assert_eq!(
            editor.on_nodes_change(&[NodeChange::remove("zzz")]),
            ChangeOutcome::Ignored
        );
        assert_eq!(editor.history().undo_depth(), depth);
    }

    #[test]
    fn node_removal_cascades_to_touching_edges_and_writes_backup() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        editor.on_connect(Connection::new("a", "b")).unwrap();
        editor.on_connect(Connection::new("b", "c")).unwrap();

        editor.on_nodes_change(&[NodeChange::remove("b")]);
        assert!(editor.state().edges.is_empty());
        assert_eq!(editor.state().edge_count, 0);

        let backup = editor.persistence().load_backup("p1").unwrap().unwrap();
        assert_eq!(backup.nodes.len(), 2);
        assert!(backup.edges.is_empty());
    }

    #[test]
    fn delete_node_removes_descendants() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        editor.insert_node(node("d", NodeType::End));
        editor.on_connect(Connection::new("a", "b")).unwrap();
        editor.on_connect(Connection::new("b", "c")).unwrap();
        editor.on_connect(Connection::new("d", "c")).unwrap();

        assert_eq!(editor.delete_node("b"), ChangeOutcome::Committed);
        assert_eq!(ids(&editor), vec!["a", "d"]);
        assert!(editor.state().edges.is_empty());
        assert_eq!(editor.delete_node("b"), ChangeOutcome::Ignored);
    }

    #[test]
    fn on_connect_validates_and_types_edges() {
        let (mut editor, _events) = loaded_editor();
        editor.insert_node(node("q", NodeType::Decision));
        editor.insert_node(node("o", NodeType::Option));
        editor.insert_node(node("m", NodeType::Message));

        let id = editor
            .on_connect(Connection::new("q", "o").with_handles(Some("output-1"), Some("null")))
            .unwrap()
            .expect("edge created");
        let edge = editor.state().edge(id.as_str()).unwrap();
        assert_eq!(edge.kind, plubot_core::EdgeType::Elite);
        assert_eq!(edge.target_handle, None);

        assert!(
            editor
                .on_connect(Connection::new("q", "o").with_handles(Some("output-1"), None))
                .unwrap()
                .is_none()
        );
        assert!(editor.on_connect(Connection::new("m", "m")).unwrap().is_none());
        match editor.on_connect(Connection::new("m", "ghost")) {
            Err(EditorError::Core(CoreError::MissingEndpoint { from, to, missing })) => {
                assert_eq!(from, NodeId::from("m"));
                assert_eq!(to, NodeId::from("ghost"));
                assert_eq!(missing, NodeId::from("ghost"));
            }
            other => panic!("expected missing endpoint error, got {other:?}"),
        }
        let message = editor
            .on_connect(Connection::new("ghost", "m"))
            .unwrap_err()
            .to_string();
        assert!(message.contains("Cannot connect ghost to m"), "{message}");
        assert_eq!(editor.state().edges.len(), 1);
    }

    #[test]
    fn add_node_lays_out_on_grid() {
        let (mut editor, _events) = loaded_editor();
        let ids: Vec<NodeId> = (0..4)
            .map(|_| editor.add_node(NodeType::Message, None, None))
            .collect();
        let positions: Vec<Position> = ids
            .iter()
            .map(|id| editor.state().node(id.as_str()).unwrap().position)
            .collect();
        assert_eq!(positions[0], Position::new(100.0, 100.0));
        assert_eq!(positions[2], Position::new(500.0, 100.0));
        assert_eq!(positions[3], Position::new(100.0, 250.0));

        let first = editor.state().node(ids[0].as_str()).unwrap();
        assert!(ids[0].as_str().starts_with("message-"));
        assert_eq!(first.data["nodeType"], json!("message"));
        assert_eq!(first.data["id"], json!(ids[0].as_str()));
    }

    #[test]
    fn duplicate_node_offsets_and_relabels() {
        let (mut editor, _events) = loaded_editor();
        editor.insert_node(
            Node::new("m", NodeType::Message, Position::new(10.0, 20.0)).with_data("label", "Hi"),
        );
        let copy_id = editor.duplicate_node("m").unwrap();
        let copy = editor.state().node(copy_id.as_str()).unwrap();
        assert_eq!(copy.position, Position::new(60.0, 70.0));
        assert_eq!(copy.label(), Some("Hi (Copy)"));
        assert!(editor.duplicate_node("missing").is_none());
    }

    #[test]
    fn set_edges_dedupes_and_drops_dangling() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        let mut replaced = Edge::new("e1", "a", "c");
        replaced.source_handle = Some("undefined".to_string());
        editor.set_edges(vec![
            Edge::new("e1", "a", "b"),
            Edge::new("e2", "b", "c"),
            replaced,
            Edge::new("e3", "a", "ghost"),
        ]);

        let edges = &editor.state().edges;
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].id.as_str(), "e1");
        assert_eq!(edges[0].target.as_str(), "c");
        assert_eq!(edges[0].source_handle, None);
    }

    #[test]
    fn load_drops_dangling_edges_from_saved_flow() {
        let store = Storage::new_in_memory().unwrap();
        let saved = FlowSnapshot {
            nodes: vec![node("a", NodeType::Start)],
            edges: vec![Edge::new("e", "a", "gone")],
            timestamp: 10,
            ..Default::default()
        };
        store.put(&flow_key("p1"), &saved.to_json().unwrap()).unwrap();
        let (mut editor, _events) = editor_with(Box::new(store));

        editor.load("p1").unwrap();
        assert!(editor.state().edges.is_empty());
        assert_eq!(editor.state().last_saved, Some(10));
        assert!(!editor.can_undo());
        assert_eq!(editor.clean_up_edges(), 0);
    }

    #[test]
    fn ctrl_z_in_text_input_does_not_undo() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        editor.on_nodes_change(&[NodeChange::remove("b")]);

        let typing = KeyEvent::new("z").ctrl().in_target(FocusTarget::TextInput);
        assert!(editor.handle_key(&typing).is_none());
        assert_eq!(ids(&editor), vec!["a", "c"]);

        let outcome = editor.handle_key(&KeyEvent::new("z").ctrl()).unwrap();
        assert_eq!(outcome.intent, Intent::Undo);
        assert!(outcome.prevent_default);
        assert_eq!(ids(&editor), vec!["a", "b", "c"]);
    }

    #[test]
    fn failed_save_keeps_state_and_reports() {
        let (mut editor, events) = editor_with(Box::new(FailingStore));
        editor.load("p1").unwrap();
        seed_abc(&mut editor);
        let sub = events.subscribe();
        let before = editor.state().clone();

        assert!(editor.save().is_err());
        assert_eq!(editor.state(), &before);
        assert!(editor.state().has_changes);
        match sub.latest() {
            Some(Event::Notify(notice)) => assert_eq!(notice.level, Severity::Error),
            other => panic!("expected error notice, got {other:?}"),
        }

        assert_eq!(editor.on_nodes_change(&[NodeChange::remove("a")]), ChangeOutcome::Committed);
        assert_eq!(ids(&editor), vec!["b", "c"]);
    }

    #[test]
    fn save_clears_change_flag() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        let timestamp = editor.save().unwrap();
        assert!(!editor.state().has_changes);
        assert_eq!(editor.state().last_saved, Some(timestamp));
    }

    #[test]
    fn save_without_project_fails() {
        let (mut editor, _events) = editor_with(Box::new(Storage::new_in_memory().unwrap()));
        assert!(matches!(editor.save(), Err(EditorError::NoProject)));
    }

    #[test]
    fn recovery_accept_restores_backup() {
        let store = Storage::new_in_memory().unwrap();
        let backup = FlowSnapshot {
            nodes: vec![node("a", NodeType::Start), node("b", NodeType::End)],
            timestamp: 200,
            ..Default::default()
        };
        let saved = FlowSnapshot {
            nodes: vec![node("a", NodeType::Start)],
            timestamp: 100,
            ..Default::default()
        };
        store.put(&flow_key("p1"), &saved.to_json().unwrap()).unwrap();
        store.put(&backup_key("p1"), &backup.to_json().unwrap()).unwrap();
        let (mut editor, _events) = editor_with(Box::new(store));

        editor.load("p1").unwrap();
        assert_eq!(editor.pending_recovery().map(|o| o.backup_timestamp), Some(200));
        assert!(editor.accept_recovery());
        assert_eq!(ids(&editor), vec!["a", "b"]);
        assert!(editor.state().is_backup_loaded);
        assert!(!editor.can_undo());
        assert!(editor.pending_recovery().is_none());
        assert!(!editor.accept_recovery());
    }

    #[test]
    fn recovery_dismiss_deletes_backup() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        editor.on_nodes_change(&[NodeChange::remove("a")]);
        assert!(editor.check_recovery().is_some());

        assert!(editor.dismiss_recovery().unwrap());
        assert_eq!(ids(&editor), vec!["b", "c"]);
        assert!(editor.persistence().load_backup("p1").unwrap().is_none());
    }

    #[test]
    fn manual_backup_restore_is_undoable() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        let backup = editor.create_manual_backup("three nodes", "test").unwrap();
        editor.on_nodes_change(&[NodeChange::remove("a"), NodeChange::remove("b")]);

        assert_eq!(
            editor.restore_manual_backup(&backup.id).unwrap(),
            ChangeOutcome::Committed
        );
        assert_eq!(ids(&editor), vec!["a", "b", "c"]);
        assert!(editor.undo());
        assert_eq!(ids(&editor), vec!["c"]);
        assert_eq!(editor.list_manual_backups().len(), 1);
    }

    #[test]
    fn raw_changes_skip_malformed_entries() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        let outcome = editor.on_raw_node_changes(&[
            json!({"type": "remove", "id": "a"}),
            json!({"type": "explode", "id": "b"}),
            json!({"type": "remove"}),
        ]);
        assert_eq!(outcome, ChangeOutcome::Committed);
        assert_eq!(ids(&editor), vec!["b", "c"]);
    }

    #[test]
    fn mutations_publish_flow_data() {
        let (mut editor, events) = loaded_editor();
        let sub = events.subscribe();
        editor.insert_node(node("a", NodeType::Start));
        assert_eq!(
            sub.latest(),
            Some(Event::FlowDataUpdated {
                project_id: Some("p1".to_string()),
                node_count: 1,
                edge_count: 0,
            })
        );
    }

    #[test]
    fn history_capacity_comes_from_settings() {
        let events = EventBus::new();
        let persistence =
            Persistence::new(Box::new(Storage::new_in_memory().unwrap()), events.clone());
        let settings = EditorSettings {
            history_capacity: 2,
            ..Default::default()
        };
        let mut editor = FlowEditor::new(persistence, events, settings).unwrap();
        editor.load("p1").unwrap();
        for id in ["a", "b", "c", "d"] {
            editor.insert_node(node(id, NodeType::Message));
        }
        assert_eq!(editor.history().undo_depth(), 2);
    }

    #[test]
    fn viewport_changes_wait_for_checkpoint() {
        let (mut editor, _events) = loaded_editor();
        let depth = editor.history().undo_depth();
        let viewport = Viewport {
            x: 40.0,
            y: -10.0,
            zoom: 0.5,
        };

        assert_eq!(editor.set_viewport(viewport), ChangeOutcome::Applied);
        assert_eq!(editor.history().undo_depth(), depth);
        assert!(editor.checkpoint());
        assert!(!editor.checkpoint());

        assert!(editor.undo());
        assert_eq!(editor.state().viewport, Viewport::default());
    }

    #[test]
    fn edge_data_updates_and_removal() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        let id = editor.on_connect(Connection::new("a", "b")).unwrap().unwrap();

        let mut data = ElementData::new();
        data.insert("label".to_string(), json!("yes"));
        assert_eq!(editor.update_edge_data(id.as_str(), data), ChangeOutcome::Committed);
        assert_eq!(editor.state().edge(id.as_str()).unwrap().data["label"], json!("yes"));

        assert_eq!(editor.remove_edge(id.as_str()), ChangeOutcome::Committed);
        assert_eq!(editor.state().edge_count, 0);
        assert_eq!(editor.remove_edge(id.as_str()), ChangeOutcome::Ignored);
    }

    #[test]
    fn renaming_marks_unsaved_without_undo_step() {
        let (mut editor, _events) = loaded_editor();
        let depth = editor.history().undo_depth();
        editor.set_flow_name("Support bot");
        assert_eq!(editor.state().flow_name, "Support bot");
        assert!(editor.state().has_changes);
        assert_eq!(editor.history().undo_depth(), depth);
    }

    #[test]
    fn autosaver_receives_changes() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let autosaver = AutoSaver::spawn(Duration::from_secs(60), move |project_id, s| {
            sink.lock().push((project_id.to_string(), s))
        });
        let (editor, _events) = loaded_editor();
        let mut editor = editor.with_autosaver(autosaver);

        editor.insert_node(node("a", NodeType::Start));
        editor.insert_node(node("b", NodeType::End));
        editor.flush_autosave();
        let written = written.lock();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0, "p1");
        assert_eq!(written[0].1.nodes.len(), 2);
    }

    #[test]
    fn drag_release_at_the_last_position_commits_the_drag() {
        let (mut editor, _events) = loaded_editor();
        editor.insert_node(node("a", NodeType::Start));
        let depth = editor.history().undo_depth();

        editor.move_node("a", Position::new(10.0, 0.0), true);
        assert_eq!(
            editor.move_node("a", Position::new(10.0, 0.0), false),
            ChangeOutcome::Committed
        );
        assert_eq!(editor.history().undo_depth(), depth + 1);

        assert!(editor.undo());
        assert_eq!(ids(&editor), vec!["a"]);
        assert_eq!(editor.state().node("a").unwrap().position, Position::default());
        assert!(editor.redo());
        assert_eq!(
            editor.state().node("a").unwrap().position,
            Position::new(10.0, 0.0)
        );
    }

    #[test]
    fn drag_release_without_position_commits_the_drag() {
        let (mut editor, _events) = loaded_editor();
        editor.insert_node(node("a", NodeType::Start));

        editor.on_raw_node_changes(&[
            json!({"type": "position", "id": "a", "position": {"x": 5.0, "y": 5.0}, "dragging": true}),
        ]);
        editor.on_raw_node_changes(&[
            json!({"type": "position", "id": "a", "position": {"x": 40.0, "y": 8.0}, "dragging": true}),
        ]);
        let outcome =
            editor.on_raw_node_changes(&[json!({"type": "position", "id": "a", "dragging": false})]);
        assert_eq!(outcome, ChangeOutcome::Committed);

        assert!(editor.undo());
        assert_eq!(ids(&editor), vec!["a"]);
        assert_eq!(editor.state().node("a").unwrap().position, Position::default());
    }

    #[test]
    fn drag_back_to_the_start_records_nothing() {
        let (mut editor, _events) = loaded_editor();
        editor.insert_node(node("a", NodeType::Start));
        let depth = editor.history().undo_depth();

        editor.move_node("a", Position::new(10.0, 0.0), true);
        editor.move_node("a", Position::default(), true);
        assert_eq!(
            editor.move_node("a", Position::default(), false),
            ChangeOutcome::Ignored
        );
        assert_eq!(editor.history().undo_depth(), depth);
        assert!(editor.drag_origin.is_none());
    }

    #[test]
    fn replacing_an_edge_in_set_edges_writes_backup() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        editor.set_edges(vec![Edge::new("e1", "a", "b")]);
        assert!(editor.persistence().load_backup("p1").unwrap().is_none());

        assert_eq!(
            editor.set_edges(vec![Edge::new("e9", "b", "c")]),
            ChangeOutcome::Committed
        );
        let backup = editor.persistence().load_backup("p1").unwrap().expect("backup");
        assert_eq!(backup.edges.len(), 1);
        assert_eq!(backup.edges[0].id.as_str(), "e9");
    }

    #[test]
    fn clean_up_edges_writes_backup() {
        let (mut editor, _events) = loaded_editor();
        seed_abc(&mut editor);
        editor.on_connect(Connection::new("a", "b")).unwrap();
        let mut edges = editor.state.edges.clone();
        edges.push(Edge::new("stale", "a", "gone"));
        editor.state = editor.state.clone().with_edges(edges);

        assert_eq!(editor.clean_up_edges(), 1);
        assert_eq!(editor.state().edges.len(), 1);
        let backup = editor.persistence().load_backup("p1").unwrap().expect("backup");
        assert_eq!(backup.edges.len(), 1);
        assert!(editor.undo());
    }

    #[test]
    fn unsupported_data_keys_are_dropped() {
        let (mut editor, _events) = loaded_editor();
        editor.insert_node(
            node("a", NodeType::Message)
                .with_data("message", "Hello")
                .with_data("onClick", "alert(1)"),
        );
        assert!(!editor.state().node("a").unwrap().data.contains_key("onClick"));

        let mut patch = ElementData::new();
        patch.insert("label".to_string(), json!("Greeting"));
        patch.insert("__proto__".to_string(), json!({"admin": true}));
        assert_eq!(editor.update_node_data("a", patch), ChangeOutcome::Committed);
        let data = &editor.state().node("a").unwrap().data;
        assert_eq!(data["label"], json!("Greeting"));
        assert!(!data.contains_key("__proto__"));

        let mut only_unknown = ElementData::new();
        only_unknown.insert("script".to_string(), json!("x"));
        assert_eq!(editor.update_node_data("a", only_unknown), ChangeOutcome::Ignored);

        editor.insert_node(node("b", NodeType::End));
        let id = editor.on_connect(Connection::new("a", "b")).unwrap().unwrap();
        let mut edge_patch = ElementData::new();
        edge_patch.insert("animated".to_string(), json!(true));
        edge_patch.insert("question".to_string(), json!("not an edge key"));
        editor.update_edge_data(id.as_str(), edge_patch);
        let edge = editor.state().edge(id.as_str()).unwrap();
        assert_eq!(edge.data["animated"], json!(true));
        assert!(!edge.data.contains_key("question"));
    }

    #[test]
    fn new_decision_node_starts_with_yes_and_no_options() {
        let (mut editor, _events) = loaded_editor();
        let depth = editor.history().undo_depth();
        let id = editor.add_node(NodeType::Decision, Some(Position::new(300.0, 0.0)), None);

        assert_eq!(editor.history().undo_depth(), depth + 1);
        let decision = editor.state().node(id.as_str()).unwrap();
        let branches = conditions(decision);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].text, "Yes");
        assert_eq!(editor.state().nodes.len(), 3);
        assert_eq!(editor.state().edges.len(), 2);
        assert!(
            editor
                .state()
                .edges
                .iter()
                .all(|e| e.source == id && e.kind == plubot_core::EdgeType::Elite)
        );

        assert!(editor.undo());
        assert!(editor.state().nodes.is_empty());
    }

    #[test]
    fn decision_conditions_drive_option_nodes() {
        let (mut editor, _events) = loaded_editor();
        let id = editor.add_node(NodeType::Decision, None, None);
        let options = |editor: &FlowEditor| {
            editor
                .state()
                .nodes
                .iter()
                .filter(|n| n.kind == NodeType::Option)
                .count()
        };

        let added = editor.add_decision_condition(id.as_str()).unwrap();
        assert_eq!(options(&editor), 3);

        assert_eq!(
            editor.update_decision_condition_text(id.as_str(), &added, "Maybe"),
            ChangeOutcome::Committed
        );
        let option_id = plubot_core::decision::option_node_id(&id, &added);
        assert_eq!(
            editor.state().node(&option_id).unwrap().data["text"],
            json!("Maybe")
        );
        assert_eq!(
            editor.update_decision_condition_text(id.as_str(), "missing", "x"),
            ChangeOutcome::Ignored
        );

        assert_eq!(
            editor.delete_decision_condition(id.as_str(), &added),
            ChangeOutcome::Committed
        );
        assert_eq!(options(&editor), 2);
        assert!(editor.state().node(&option_id).is_none());
        assert!(editor.persistence().load_backup("p1").unwrap().is_some());

        assert_eq!(
            editor.update_decision_question(id.as_str(), "Ready?"),
            ChangeOutcome::Committed
        );
        assert_eq!(
            editor.state().node(id.as_str()).unwrap().data["question"],
            json!("Ready?")
        );
        assert!(editor.add_decision_condition("missing").is_none());
    }

    #[test]
    fn decision_conditions_are_capped() {
        let (mut editor, _events) = loaded_editor();
        let id = editor.add_node(NodeType::Decision, None, None);
        while editor.add_decision_condition(id.as_str()).is_some() {}
        let decision = editor.state().node(id.as_str()).unwrap();
        assert_eq!(conditions(decision).len(), MAX_CONDITIONS);
    }

    #[test]
    fn deleting_option_node_removes_its_condition_in_one_step() {
        let (mut editor, _events) = loaded_editor();
        let id = editor.add_node(NodeType::Decision, None, None);
        let depth = editor.history().undo_depth();
        let decision = editor.state().node(id.as_str()).unwrap();
        let no = conditions(decision)[1].id.clone();
        let option_id = plubot_core::decision::option_node_id(&id, &no);

        assert_eq!(editor.delete_node(&option_id), ChangeOutcome::Committed);
        assert_eq!(editor.history().undo_depth(), depth + 1);
        let decision = editor.state().node(id.as_str()).unwrap();
        let left = conditions(decision);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].text, "Yes");
        assert_eq!(editor.state().edges.len(), 1);

        assert!(editor.undo());
        let decision = editor.state().node(id.as_str()).unwrap();
        assert_eq!(conditions(decision).len(), 2);
        assert!(editor.state().node(&option_id).is_some());
    }

    #[test]
    fn load_flushes_pending_autosave_to_the_old_project() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();
        let autosaver = AutoSaver::spawn(Duration::from_secs(60), move |project_id, s| {
            sink.lock().push((project_id.to_string(), s))
        });
        let (editor, _events) = loaded_editor();
        let mut editor = editor.with_autosaver(autosaver);

        editor.insert_node(node("a", NodeType::Start));
        editor.load("p2").unwrap();
        editor.insert_node(node("x", NodeType::End));
        editor.flush_autosave();

        let written = written.lock();
        let projects: Vec<&str> = written.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(projects, vec!["p1", "p2"]);
        assert_eq!(written[1].1.nodes[0].id.as_str(), "x");
    }
}
