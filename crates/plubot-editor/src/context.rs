use crate::autosave::AutoSaver;
use crate::editor::FlowEditor;
use crate::persistence::Persistence;
use crate::settings::EditorSettings;
use crate::shortcuts::{KeyListenerRegistry, ShortcutListener};
use crate::EditorError;
use plubot_events::EventBus;
use plubot_storage::{KeyValueStore, Storage};

/// Top-level owner of the shared editor services.
///
/// Editors opened through a context share its event bus and key listener
/// registry. Dropping the context shuts the bus down and detaches every key
/// listener.
pub struct EditorContext {
    events: EventBus,
    settings: EditorSettings,
    key_listeners: KeyListenerRegistry,
}

impl EditorContext {
    pub fn new(settings: EditorSettings) -> Self {
        Self {
            events: EventBus::new(),
            settings,
            key_listeners: KeyListenerRegistry::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn key_listeners(&self) -> &KeyListenerRegistry {
        &self.key_listeners
    }

    pub fn persistence(&self, store: Box<dyn KeyValueStore + Send>) -> Persistence {
        Persistence::new(store, self.events.clone())
            .with_max_manual_backups(self.settings.max_manual_backups)
    }

    /// Open the SQLite database the settings point at.
    pub fn open_storage(&self) -> Result<Storage, EditorError> {
        let path = self.settings.resolved_storage_path().ok_or_else(|| {
            EditorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no data directory for the flow database",
            ))
        })?;
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Storage::open(&path)?)
    }

    /// Build an editor over `store` and load `project_id` into it.
    pub fn open_editor(
        &self,
        project_id: &str,
        store: Box<dyn KeyValueStore + Send>,
    ) -> Result<FlowEditor, EditorError> {
        let mut editor =
            FlowEditor::new(self.persistence(store), self.events.clone(), self.settings.clone())?;
        editor.load(project_id)?;
        Ok(editor)
    }

    /// Debounced backup writer with its own store. Each scheduled snapshot
    /// is written under the project it was scheduled for.
    pub fn autosaver(&self, store: Box<dyn KeyValueStore + Send>) -> AutoSaver {
        AutoSaver::persisting(self.settings.autosave_debounce(), self.persistence(store))
    }

    /// Keep the editor's shortcut table active until the listener is dropped.
    /// Key presses routed through [`EditorContext::key_listeners`] queue on
    /// the listener; hand it to [`FlowEditor::apply_shortcuts`] to run them.
    pub fn mount_shortcuts(&self, editor: &FlowEditor) -> ShortcutListener {
        self.key_listeners.attach(editor.shortcuts().clone())
    }
}

impl Default for EditorContext {
    fn default() -> Self {
        Self::new(EditorSettings::default())
    }
}

impl Drop for EditorContext {
    fn drop(&mut self) {
        self.key_listeners.detach_all();
        self.events.shutdown();
    }
}
