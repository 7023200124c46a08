//! Saved flows, automatic backups and named manual backups for a project.

use crate::EditorError;
use plubot_core::{FlowSnapshot, generate_id, now_millis, validate_edges};
use plubot_events::telemetry::{
    OP_IMPORT_MANUAL_BACKUP, OP_RECOVER_BACKUP, OP_SAVE_FLOW, OP_WRITE_BACKUP, new_correlation_id,
    operation_failure, operation_start, operation_success,
};
use plubot_events::{Event, EventBus, Notification};
use plubot_storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

pub const DEFAULT_MAX_MANUAL_BACKUPS: usize = 10;

pub fn flow_key(project_id: &str) -> String {
    format!("plubot:flow:{project_id}")
}

pub fn backup_key(project_id: &str) -> String {
    format!("plubot:backup:{project_id}")
}

pub fn manual_backups_key(project_id: &str) -> String {
    format!("plubot:manual_backups:{project_id}")
}

/// A backup newer than the last confirmed save.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOffer {
    pub project_id: String,
    pub backup: FlowSnapshot,
    pub backup_timestamp: i64,
    /// `None` when the project was never saved.
    pub saved_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualBackup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub reason: String,
    pub timestamp: i64,
    pub node_count: usize,
    pub edge_count: usize,
    /// Serialized size of the snapshot in bytes.
    pub size: usize,
    pub snapshot: FlowSnapshot,
}

pub struct Persistence {
    store: Box<dyn KeyValueStore + Send>,
    events: EventBus,
    max_manual_backups: usize,
}

impl Persistence {
    pub fn new(store: Box<dyn KeyValueStore + Send>, events: EventBus) -> Self {
        Self {
            store,
            events,
            max_manual_backups: DEFAULT_MAX_MANUAL_BACKUPS,
        }
    }

    pub fn with_max_manual_backups(mut self, max: usize) -> Self {
        self.max_manual_backups = max.max(1);
        self
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Write the explicit save. On failure the error is published as a
    /// notification and returned; nothing in memory is touched here.
    ///
    /// A graph with an edge pointing at a missing node is refused.
    pub fn save(&self, project_id: &str, snapshot: &FlowSnapshot) -> Result<i64, EditorError> {
        let correlation_id = new_correlation_id();
        let started = Instant::now();
        operation_start(OP_SAVE_FLOW, &correlation_id, Some(project_id));

        let written = validate_edges(&snapshot.nodes, &snapshot.edges)
            .map_err(EditorError::from)
            .and_then(|()| self.write_snapshot(&flow_key(project_id), snapshot));
        match written {
            Ok(()) => {
                operation_success(
                    OP_SAVE_FLOW,
                    &correlation_id,
                    Some(project_id),
                    Some(started.elapsed().as_millis()),
                );
                self.events.publish(Event::FlowSaved {
                    project_id: project_id.to_string(),
                    timestamp: snapshot.timestamp,
                });
                self.events
                    .publish(Event::notify(Notification::success("Flow saved")));
                Ok(snapshot.timestamp)
            }
            Err(e) => {
                operation_failure(
                    OP_SAVE_FLOW,
                    &correlation_id,
                    Some(project_id),
                    Some(e.to_string()),
                );
                self.events.publish(Event::notify(Notification::error(format!(
                    "Could not save the flow: {e}"
                ))));
                Err(e)
            }
        }
    }

    /// Write the automatic backup. Failures are logged and swallowed.
    pub fn backup(&self, project_id: &str, snapshot: &FlowSnapshot) -> bool {
        let correlation_id = new_correlation_id();
        operation_start(OP_WRITE_BACKUP, &correlation_id, Some(project_id));
        match self.write_snapshot(&backup_key(project_id), snapshot) {
            Ok(()) => {
                operation_success(OP_WRITE_BACKUP, &correlation_id, Some(project_id), None);
                self.events.publish(Event::BackupWritten {
                    project_id: project_id.to_string(),
                    timestamp: snapshot.timestamp,
                });
                true
            }
            Err(e) => {
                operation_failure(
                    OP_WRITE_BACKUP,
                    &correlation_id,
                    Some(project_id),
                    Some(e.to_string()),
                );
                tracing::warn!("Backup for {} not written: {}", project_id, e);
                false
            }
        }
    }

    pub fn load_saved(&self, project_id: &str) -> Result<Option<FlowSnapshot>, EditorError> {
        self.read_snapshot(&flow_key(project_id))
    }

    pub fn load_backup(&self, project_id: &str) -> Result<Option<FlowSnapshot>, EditorError> {
        self.read_snapshot(&backup_key(project_id))
    }

    /// Offer the backup when it is strictly newer than the saved flow.
    /// Unreadable entries mean no offer.
    ///
    /// Every check closes its telemetry record: finding nothing to offer is
    /// a success, an unreadable entry a failure.
    pub fn check_recovery(&self, project_id: &str) -> Option<RecoveryOffer> {
        let correlation_id = new_correlation_id();
        operation_start(OP_RECOVER_BACKUP, &correlation_id, Some(project_id));

        match self.find_recovery(project_id) {
            Ok(offer) => {
                operation_success(OP_RECOVER_BACKUP, &correlation_id, Some(project_id), None);
                if let Some(offer) = &offer {
                    self.events.publish(Event::RecoveryAvailable {
                        project_id: project_id.to_string(),
                        backup_timestamp: offer.backup_timestamp,
                    });
                }
                offer
            }
            Err(e) => {
                operation_failure(
                    OP_RECOVER_BACKUP,
                    &correlation_id,
                    Some(project_id),
                    Some(e.to_string()),
                );
                None
            }
        }
    }

    fn find_recovery(&self, project_id: &str) -> Result<Option<RecoveryOffer>, EditorError> {
        let Some(backup) = self.load_backup(project_id)? else {
            return Ok(None);
        };
        let saved_timestamp = self.load_saved(project_id)?.map(|s| s.timestamp);
        if saved_timestamp.is_some_and(|saved| backup.timestamp <= saved) {
            tracing::debug!("Backup for {} is not newer than the saved flow", project_id);
            return Ok(None);
        }
        Ok(Some(RecoveryOffer {
            project_id: project_id.to_string(),
            backup_timestamp: backup.timestamp,
            backup,
            saved_timestamp,
        }))
    }

    pub fn discard_backup(&self, project_id: &str) -> Result<bool, EditorError> {
        Ok(self.store.remove(&backup_key(project_id))?)
    }

    /// Projects with a saved flow or an automatic backup, sorted by id.
    pub fn list_projects(&self) -> Result<Vec<String>, EditorError> {
        let mut projects = BTreeSet::new();
        for prefix in [flow_key(""), backup_key("")] {
            for key in self.store.keys_with_prefix(&prefix)? {
                if let Some(project_id) = key.strip_prefix(&prefix)
                    && !project_id.is_empty()
                {
                    projects.insert(project_id.to_string());
                }
            }
        }
        Ok(projects.into_iter().collect())
    }

    pub fn create_manual_backup(
        &self,
        project_id: &str,
        snapshot: &FlowSnapshot,
        name: &str,
        reason: &str,
    ) -> Result<ManualBackup, EditorError> {
        let size = snapshot.to_json()?.len();
        let timestamp = now_millis();
        let name = if name.trim().is_empty() {
            format!("Backup {timestamp}")
        } else {
            name.to_string()
        };
        let backup = ManualBackup {
            id: generate_id("backup"),
            name,
            reason: reason.to_string(),
            timestamp,
            node_count: snapshot.nodes.len(),
            edge_count: snapshot.edges.len(),
            size,
            snapshot: snapshot.clone(),
        };
        self.insert_manual_backup(project_id, backup.clone())?;
        tracing::info!("Created manual backup {} for {}", backup.id, project_id);
        Ok(backup)
    }

    /// Newest first. Unreadable storage yields an empty list.
    pub fn list_manual_backups(&self, project_id: &str) -> Vec<ManualBackup> {
        match self.read_manual_backups(project_id) {
            Ok(backups) => backups,
            Err(e) => {
                tracing::warn!("Could not read manual backups for {}: {}", project_id, e);
                Vec::new()
            }
        }
    }

    pub fn find_manual_backup(
        &self,
        project_id: &str,
        backup_id: &str,
    ) -> Result<ManualBackup, EditorError> {
        self.read_manual_backups(project_id)?
            .into_iter()
            .find(|b| b.id == backup_id)
            .ok_or_else(|| EditorError::BackupNotFound(backup_id.to_string()))
    }

    pub fn delete_manual_backup(&self, project_id: &str, backup_id: &str) -> Result<(), EditorError> {
        let mut backups = self.read_manual_backups(project_id)?;
        let before = backups.len();
        backups.retain(|b| b.id != backup_id);
        if backups.len() == before {
            return Err(EditorError::BackupNotFound(backup_id.to_string()));
        }
        self.write_manual_backups(project_id, &backups)
    }

    pub fn export_manual_backup(
        &self,
        project_id: &str,
        backup_id: &str,
    ) -> Result<String, EditorError> {
        let backup = self.find_manual_backup(project_id, backup_id)?;
        Ok(serde_json::to_string_pretty(&backup)?)
    }

    /// Store an exported backup under a fresh id.
    pub fn import_manual_backup(
        &self,
        project_id: &str,
        raw: &str,
    ) -> Result<ManualBackup, EditorError> {
        let correlation_id = new_correlation_id();
        operation_start(OP_IMPORT_MANUAL_BACKUP, &correlation_id, Some(project_id));
        let result = serde_json::from_str::<ManualBackup>(raw)
            .map_err(EditorError::from)
            .and_then(|mut backup| {
                backup.id = generate_id("backup");
                backup.node_count = backup.snapshot.nodes.len();
                backup.edge_count = backup.snapshot.edges.len();
                self.insert_manual_backup(project_id, backup.clone())?;
                Ok(backup)
            });
        match &result {
            Ok(_) => {
                operation_success(OP_IMPORT_MANUAL_BACKUP, &correlation_id, Some(project_id), None)
            }
            Err(e) => operation_failure(
                OP_IMPORT_MANUAL_BACKUP,
                &correlation_id,
                Some(project_id),
                Some(e.to_string()),
            ),
        };
        result
    }

    fn insert_manual_backup(&self, project_id: &str, backup: ManualBackup) -> Result<(), EditorError> {
        let mut backups = self.read_manual_backups(project_id)?;
        backups.insert(0, backup);
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        backups.truncate(self.max_manual_backups);
        self.write_manual_backups(project_id, &backups)
    }

    fn read_manual_backups(&self, project_id: &str) -> Result<Vec<ManualBackup>, EditorError> {
        match self.store.get(&manual_backups_key(project_id))? {
            Some(entry) => Ok(serde_json::from_str(&entry.value)?),
            None => Ok(Vec::new()),
        }
    }

    fn write_manual_backups(
        &self,
        project_id: &str,
        backups: &[ManualBackup],
    ) -> Result<(), EditorError> {
        let raw = serde_json::to_string(backups)?;
        self.store.put(&manual_backups_key(project_id), &raw)?;
        Ok(())
    }

    fn write_snapshot(&self, key: &str, snapshot: &FlowSnapshot) -> Result<(), EditorError> {
        let raw = snapshot.to_json()?;
        self.store.put(key, &raw)?;
        Ok(())
    }

    fn read_snapshot(&self, key: &str) -> Result<Option<FlowSnapshot>, EditorError> {
        match self.store.get(key)? {
            Some(entry) => Ok(Some(FlowSnapshot::from_json(&entry.value)?)),
            None => Ok(None),
        }
    }
}
