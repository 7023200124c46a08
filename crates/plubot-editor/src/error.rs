use plubot_core::CoreError;
use plubot_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Graph error: {0}")]
    Core(#[from] CoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No project is open")]
    NoProject,
    #[error("Invalid shortcut pattern: {0:?}")]
    InvalidShortcut(String),
    #[error("Backup not found: {0}")]
    BackupNotFound(String),
}
