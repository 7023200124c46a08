//! Headless flow editor: state container, change dispatch, undo history
//! wiring, persistence with crash recovery, and keyboard shortcuts.

pub mod autosave;
pub mod context;
pub mod editor;
mod error;
pub mod persistence;
pub mod settings;
pub mod shortcuts;
pub mod state;

pub use autosave::AutoSaver;
pub use context::EditorContext;
pub use editor::{ChangeOutcome, Connection, FlowEditor};
pub use error::EditorError;
pub use persistence::{
    ManualBackup, Persistence, RecoveryOffer, backup_key, flow_key, manual_backups_key,
};
pub use settings::EditorSettings;
pub use shortcuts::{
    FocusTarget, Intent, KeyEvent, KeyListenerRegistry, Shortcut, ShortcutBinding,
    ShortcutDispatcher, ShortcutListener, ShortcutOutcome,
};
pub use state::FlowState;
