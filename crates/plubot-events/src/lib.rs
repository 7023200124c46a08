use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub mod telemetry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub level: Severity,
}

impl Notification {
    pub fn new(level: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Severity::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    // Notifications
    Notify(Notification),

    // Flow data
    FlowDataUpdated {
        project_id: Option<String>,
        node_count: usize,
        edge_count: usize,
    },

    // ========================================================================
    // Undo/Redo Events
    // ========================================================================
    UndoStackChanged {
        can_undo: bool,
        can_redo: bool,
    },

    // ========================================================================
    // Persistence Events
    // ========================================================================
    FlowSaved {
        project_id: String,
        timestamp: i64,
    },
    BackupWritten {
        project_id: String,
        timestamp: i64,
    },
    RecoveryAvailable {
        project_id: String,
        backup_timestamp: i64,
    },
    RecoveryAccepted {
        project_id: String,
    },
    RecoveryDismissed {
        project_id: String,
    },
}

impl Event {
    pub fn notify(notification: Notification) -> Self {
        Event::Notify(notification)
    }
}

type Callback = Box<dyn FnMut(&Event) + Send>;

enum Observer {
    /// Capacity-one mailbox; `drain` is the publisher's handle for evicting
    /// the stale event before writing the new one.
    Latest {
        tx: Sender<Event>,
        drain: Receiver<Event>,
    },
    Callback(Callback),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(u64, Observer)>,
    shut_down: bool,
}

impl Registry {
    fn register(&mut self, observer: Observer) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    fn unregister(&mut self, id: u64) {
        self.observers.retain(|(observer_id, _)| *observer_id != id);
    }
}

fn unregister(registry: &Weak<Mutex<Registry>>, id: u64) {
    if let Some(registry) = registry.upgrade() {
        registry.lock().unregister(id);
    }
}

/// Publish/subscribe registry owned by the editor context.
///
/// Mailbox subscribers only ever hold the most recent event; nothing queues
/// up behind a slow reader. Callback observers run synchronously on the
/// publishing thread while the registry lock is held, so they must not
/// publish back into the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: Event) {
        let mut registry = self.registry.lock();
        if registry.shut_down {
            tracing::trace!("Dropping event published after shutdown: {:?}", event);
            return;
        }
        for (_, observer) in registry.observers.iter_mut() {
            match observer {
                Observer::Latest { tx, drain } => {
                    let _ = drain.try_recv();
                    let _ = tx.try_send(event.clone());
                }
                Observer::Callback(callback) => callback(&event),
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = bounded(1);
        let mut registry = self.registry.lock();
        let id = if registry.shut_down {
            // Dropping the sender right away leaves the subscription closed.
            drop(tx);
            u64::MAX
        } else {
            registry.register(Observer::Latest {
                tx,
                drain: rx.clone(),
            })
        };
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn observe<F>(&self, callback: F) -> ObserverHandle
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let mut registry = self.registry.lock();
        let id = if registry.shut_down {
            u64::MAX
        } else {
            registry.register(Observer::Callback(Box::new(callback)))
        };
        ObserverHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.registry.lock().observers.len()
    }

    /// Drop every registration. Later publishes are discarded and open
    /// subscriptions report [`Subscription::is_closed`].
    pub fn shutdown(&self) {
        let mut registry = self.registry.lock();
        registry.shut_down = true;
        let dropped = registry.observers.len();
        registry.observers.clear();
        tracing::debug!("Event bus shut down, dropped {} observers", dropped);
    }

    pub fn is_shut_down(&self) -> bool {
        self.registry.lock().shut_down
    }
}

/// Mailbox registration; unregisters itself on drop.
pub struct Subscription {
    id: u64,
    rx: Receiver<Event>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Take the most recent event, if one arrived since the last call.
    pub fn latest(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn wait(&self, timeout: Duration) -> Option<Event> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// True once the bus has shut down or this registration is gone.
    pub fn is_closed(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => {
                let registry = registry.lock();
                registry.shut_down || !registry.observers.iter().any(|(id, _)| *id == self.id)
            }
            None => true,
        }
    }

    /// Deliver the pending event, if any, to a listener.
    pub fn dispatch_to<L: EventListener>(&self, listener: &mut L) {
        if let Some(event) = self.latest() {
            listener.handle_event(&event);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        unregister(&self.registry, self.id);
    }
}

/// Callback registration; unregisters itself on drop.
pub struct ObserverHandle {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        unregister(&self.registry, self.id);
    }
}

/// Trait for components that respond to events.
pub trait EventListener {
    fn handle_event(&mut self, event: &Event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscriber_sees_only_most_recent_event() {
        let bus = EventBus::new();
        let sub = bus.subscribe();

        bus.publish(Event::notify(Notification::info("first")));
        bus.publish(Event::notify(Notification::warning("second")));

        assert_eq!(
            sub.latest(),
            Some(Event::Notify(Notification::warning("second")))
        );
        assert_eq!(sub.latest(), None);
    }

    #[test]
    fn every_subscriber_gets_the_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(Event::UndoStackChanged {
            can_undo: true,
            can_redo: false,
        });

        assert!(matches!(a.latest(), Some(Event::UndoStackChanged { can_undo: true, .. })));
        assert!(matches!(b.latest(), Some(Event::UndoStackChanged { can_undo: true, .. })));
    }

    #[test]
    fn dropping_registrations_unregisters_them() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let handle = bus.observe(|_| {});
        assert_eq!(bus.observer_count(), 2);

        drop(sub);
        drop(handle);
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn callbacks_run_on_publish() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let _handle = bus.observe(move |event| {
            if matches!(event, Event::FlowDataUpdated { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..3 {
            bus.publish(Event::FlowDataUpdated {
                project_id: None,
                node_count: 1,
                edge_count: 0,
            });
        }
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shutdown_closes_subscriptions_and_drops_events() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.shutdown();

        bus.publish(Event::notify(Notification::error("late")));
        assert!(sub.is_closed());
        assert_eq!(sub.latest(), None);
        assert!(bus.subscribe().is_closed());
        assert_eq!(bus.observer_count(), 0);
    }

    struct Recorder(Vec<Event>);

    impl EventListener for Recorder {
        fn handle_event(&mut self, event: &Event) {
            self.0.push(event.clone());
        }
    }

    #[test]
    fn dispatch_delivers_pending_event() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        let mut recorder = Recorder(Vec::new());

        sub.dispatch_to(&mut recorder);
        assert!(recorder.0.is_empty());

        bus.publish(Event::RecoveryDismissed {
            project_id: "p1".to_string(),
        });
        sub.dispatch_to(&mut recorder);
        assert_eq!(recorder.0.len(), 1);
    }

    #[test]
    fn events_serialize_for_logging() {
        let json = serde_json::to_string(&Event::FlowSaved {
            project_id: "p1".to_string(),
            timestamp: 42,
        })
        .unwrap();
        assert!(json.contains("FlowSaved"));
    }
}
