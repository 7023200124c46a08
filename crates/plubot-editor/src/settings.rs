use crate::EditorError;
use crate::shortcuts::ShortcutBinding;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "plubot";
const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "plubot.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    /// Maximum number of undo steps kept per editor.
    pub history_capacity: usize,
    pub autosave_debounce_ms: u64,
    pub backup_on_destructive_change: bool,
    pub max_manual_backups: usize,
    /// Database location; `None` means the platform data directory.
    pub storage_path: Option<PathBuf>,
    /// Replaces the default key bindings when non-empty.
    pub shortcuts: Vec<ShortcutBinding>,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            history_capacity: plubot_history::DEFAULT_CAPACITY,
            autosave_debounce_ms: 2_000,
            backup_on_destructive_change: true,
            max_manual_backups: 10,
            storage_path: None,
            shortcuts: Vec::new(),
        }
    }
}

impl EditorSettings {
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
    }

    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::warn!("No config directory on this platform, using default settings");
                Self::default()
            }
        }
    }

    /// Read settings from `path`, falling back to defaults on any failure.
    pub fn load_from(path: &Path) -> Self {
        tracing::info!("Loading settings from {:?}", path);
        if !path.exists() {
            tracing::info!("Settings file not found, using defaults");
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    tracing::debug!("Settings loaded: {:?}", settings);
                    settings
                }
                Err(e) => {
                    tracing::error!("Failed to parse settings: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::error!("Failed to read settings file: {}", e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), EditorError> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Err(EditorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no config directory",
            ))),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), EditorError> {
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    /// Configured database path, or `<data_dir>/plubot/plubot.db`.
    pub fn resolved_storage_path(&self) -> Option<PathBuf> {
        self.storage_path
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR).join(DATABASE_FILE)))
    }
}
