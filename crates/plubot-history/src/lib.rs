//! Linear undo/redo history over immutable snapshots.
//!
//! The store is a `past* -> present -> future*` state machine. Committing a
//! new entry after an undo discards the future; there is no branching. The
//! past is capped and sheds its oldest entries first.

use plubot_events::{Event, EventBus};
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 50;

pub struct HistoryStore<S> {
    past: VecDeque<S>,
    present: S,
    future: VecDeque<S>,
    capacity: usize,
    events: Option<EventBus>,
}

impl<S: Clone> HistoryStore<S> {
    /// A capacity of zero is clamped to one.
    pub fn new(present: S, capacity: usize) -> Self {
        Self {
            past: VecDeque::new(),
            present,
            future: VecDeque::new(),
            capacity: capacity.max(1),
            events: None,
        }
    }

    /// Publish `UndoStackChanged` on every transition.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn present(&self) -> &S {
        &self.present
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.future.len()
    }

    /// Oldest first.
    pub fn past(&self) -> impl Iterator<Item = &S> {
        self.past.iter()
    }

    /// Next redo target first.
    pub fn future(&self) -> impl Iterator<Item = &S> {
        self.future.iter()
    }

    pub fn commit(&mut self, entry: S) {
        let previous = std::mem::replace(&mut self.present, entry);
        self.past.push_back(previous);
        while self.past.len() > self.capacity {
            self.past.pop_front();
        }
        if !self.future.is_empty() {
            tracing::debug!("Commit discarded {} redo entries", self.future.len());
            self.future.clear();
        }
        self.notify_change();
    }

    /// Returns the new present, or `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<&S> {
        let restored = self.past.pop_back()?;
        let previous = std::mem::replace(&mut self.present, restored);
        self.future.push_front(previous);
        self.notify_change();
        Some(&self.present)
    }

    /// Returns the new present, or `None` when there is nothing to redo.
    pub fn redo(&mut self) -> Option<&S> {
        let restored = self.future.pop_front()?;
        let previous = std::mem::replace(&mut self.present, restored);
        self.past.push_back(previous);
        self.notify_change();
        Some(&self.present)
    }

    /// Overwrite the present without touching past or future.
    pub fn replace_present(&mut self, entry: S) {
        self.present = entry;
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
        self.notify_change();
    }

    fn notify_change(&self) {
        if let Some(events) = &self.events {
            events.publish(Event::UndoStackChanged {
                can_undo: self.can_undo(),
                can_redo: self.can_redo(),
            });
        }
    }
}
