//! Per-engine event bus for `WorkflowEvent`.
//!
//! Handlers are registered by event name (or `*` for every event) and invoked
//! synchronously over a snapshot of the handler list, so a handler may
//! register or remove handlers without deadlocking. Every published event is
//! also sent on a `tokio::sync::broadcast` channel for async consumers.
//! Publishing with no handlers and no subscribers is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use conductor_types::event::WorkflowEvent;
use tokio::sync::broadcast;

/// Name that matches every event.
pub const ANY_EVENT: &str = "*";

type Handler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Handle returned by `EventBus::on`, used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner {
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    sender: broadcast::Sender<WorkflowEvent>,
    next_id: AtomicU64,
}

/// Publish/subscribe hub owned by one engine instance.
///
/// Cloning the bus shares the handler table and the broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a new event bus whose broadcast channel holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(HashMap::new()),
                sender,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler for events named `name` (e.g. `step:completed`).
    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Register a handler for every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkflowEvent) + Send + Sync + 'static,
    {
        self.on(ANY_EVENT, handler)
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for list in handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Create a broadcast receiver that will get all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.sender.subscribe()
    }

    /// Dispatch an event to named handlers, then `*` handlers, then
    /// broadcast subscribers.
    pub fn publish(&self, event: WorkflowEvent) {
        let snapshot: Vec<Handler> = {
            let handlers = self
                .inner
                .handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            [event.name(), ANY_EVENT]
                .iter()
                .filter_map(|name| handlers.get(*name))
                .flatten()
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in snapshot {
            handler(&event);
        }

        let _ = self.inner.sender.send(event);
    }

    /// Number of registered handlers across all event names.
    pub fn handler_count(&self) -> usize {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handler_count", &self.handler_count())
            .field("receiver_count", &self.inner.sender.receiver_count())
            .finish()
    }
}
