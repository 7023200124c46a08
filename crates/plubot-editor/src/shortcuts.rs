//! Keyboard shortcut dispatch for the editor surface.
//!
//! Patterns look like `mod+shift+z`. `mod`, `ctrl`, `cmd` and `meta` all mean
//! "the platform command modifier" and match either Ctrl or Meta on the
//! event. Modifier matching is exact: `mod+z` does not fire for
//! Ctrl+Shift+Z.

use crate::EditorError;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Undo,
    Redo,
    Save,
}

/// Where keyboard focus was when the key went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusTarget {
    #[default]
    Canvas,
    TextInput,
    TextArea,
    ContentEditable,
    Other,
}

impl FocusTarget {
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            FocusTarget::TextInput | FocusTarget::TextArea | FocusTarget::ContentEditable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyEvent {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
    pub target: FocusTarget,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    pub fn alt(mut self) -> Self {
        self.alt = true;
        self
    }

    pub fn in_target(mut self, target: FocusTarget) -> Self {
        self.target = target;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    key: String,
    requires_mod: bool,
    requires_shift: bool,
    requires_alt: bool,
}

impl Shortcut {
    pub fn parse(pattern: &str) -> Result<Self, EditorError> {
        let lowered = pattern.trim().to_lowercase();
        let mut parts: Vec<&str> = lowered.split('+').map(str::trim).collect();
        let key = parts.pop().unwrap_or_default().to_string();
        if key.is_empty() {
            return Err(EditorError::InvalidShortcut(pattern.to_string()));
        }
        let has = |names: &[&str]| parts.iter().any(|p| names.contains(p));
        Ok(Self {
            requires_mod: has(&["mod", "ctrl", "cmd", "meta"]),
            requires_shift: has(&["shift"]),
            requires_alt: has(&["alt", "option"]),
            key,
        })
    }

    pub fn matches(&self, event: &KeyEvent) -> bool {
        event.key.to_lowercase() == self.key
            && self.requires_mod == (event.ctrl || event.meta)
            && self.requires_shift == event.shift
            && self.requires_alt == event.alt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortcutOutcome {
    pub intent: Intent,
    pub prevent_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShortcutBinding {
    pub pattern: String,
    pub intent: Intent,
}

impl ShortcutBinding {
    pub fn new(pattern: &str, intent: Intent) -> Self {
        Self {
            pattern: pattern.to_string(),
            intent,
        }
    }
}

pub fn default_bindings() -> Vec<ShortcutBinding> {
    vec![
        ShortcutBinding::new("mod+z", Intent::Undo),
        ShortcutBinding::new("mod+shift+z", Intent::Redo),
        ShortcutBinding::new("mod+y", Intent::Redo),
        ShortcutBinding::new("mod+s", Intent::Save),
    ]
}

#[derive(Debug, Clone)]
pub struct ShortcutDispatcher {
    bindings: Vec<(Shortcut, Intent)>,
}

impl Default for ShortcutDispatcher {
    fn default() -> Self {
        let bindings = default_bindings()
            .iter()
            .filter_map(|b| Shortcut::parse(&b.pattern).ok().map(|s| (s, b.intent)))
            .collect();
        Self { bindings }
    }
}

impl ShortcutDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from explicit bindings; an empty list means the defaults.
    pub fn from_bindings(bindings: &[ShortcutBinding]) -> Result<Self, EditorError> {
        if bindings.is_empty() {
            return Ok(Self::default());
        }
        let parsed = bindings
            .iter()
            .map(|b| Ok((Shortcut::parse(&b.pattern)?, b.intent)))
            .collect::<Result<Vec<_>, EditorError>>()?;
        Ok(Self { bindings: parsed })
    }

    /// First matching binding wins. Events from editable targets never match.
    pub fn dispatch(&self, event: &KeyEvent) -> Option<ShortcutOutcome> {
        if event.target.is_editable() {
            return None;
        }
        self.bindings
            .iter()
            .find(|(shortcut, _)| shortcut.matches(event))
            .map(|(_, intent)| ShortcutOutcome {
                intent: *intent,
                prevent_default: true,
            })
    }
}

struct Attached {
    id: u64,
    dispatcher: ShortcutDispatcher,
    intents: Sender<Intent>,
}

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    listeners: Vec<Attached>,
}

/// Global key listener surface. Dispatchers are attached for as long as the
/// returned [`ShortcutListener`] lives.
///
/// A matched key press is queued on the listener that matched it. The editor
/// that owns the listener applies the queue with
/// [`FlowEditor::apply_shortcuts`](crate::FlowEditor::apply_shortcuts).
#[derive(Clone, Default)]
pub struct KeyListenerRegistry {
    table: Arc<Mutex<ListenerTable>>,
}

impl KeyListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, dispatcher: ShortcutDispatcher) -> ShortcutListener {
        let (tx, rx) = unbounded();
        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.listeners.push(Attached {
            id,
            dispatcher,
            intents: tx,
        });
        ShortcutListener {
            id,
            table: Arc::downgrade(&self.table),
            intents: rx,
        }
    }

    /// Route a key event through attached listeners, newest first. The
    /// matching listener receives the intent.
    pub fn dispatch(&self, event: &KeyEvent) -> Option<ShortcutOutcome> {
        let table = self.table.lock();
        table.listeners.iter().rev().find_map(|attached| {
            let outcome = attached.dispatcher.dispatch(event)?;
            let _ = attached.intents.send(outcome.intent);
            Some(outcome)
        })
    }

    pub fn listener_count(&self) -> usize {
        self.table.lock().listeners.len()
    }

    pub fn detach_all(&self) {
        self.table.lock().listeners.clear();
    }
}

pub struct ShortcutListener {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
    intents: Receiver<Intent>,
}

impl ShortcutListener {
    /// Intents matched since the last call, oldest first.
    pub fn take_pending(&self) -> Vec<Intent> {
        self.intents.try_iter().collect()
    }
}

impl Drop for ShortcutListener {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().listeners.retain(|attached| attached.id != self.id);
        }
    }
}
