//! Input event subscription
//!
//! Hosts expose their native input notifications through [`InputSource`]. Every
//! registration returns a [`Subscription`] handle; dropping it (or calling
//! [`Subscription::unsubscribe`]) removes the listener.

use super::event::{EventKind, HostEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Callback receiving events of one kind
pub type EventSink = Arc<dyn Fn(HostEvent) + Send + Sync>;

/// A host runtime that can deliver input events
pub trait InputSource: Send + Sync {
    /// Register `sink` for every future event of `kind`
    fn subscribe(&self, kind: EventKind, sink: EventSink) -> Subscription;
}

/// Unsubscribe handle. The listener is removed when this is dropped.
#[must_use = "dropping a subscription removes the listener"]
pub struct Subscription {
    kind: EventKind,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(kind: EventKind, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    sinks: HashMap<EventKind, Vec<(u64, EventSink)>>,
}

/// In-process input source: the host (or a replay, or a test) pushes events with [`emit`].
///
/// [`emit`]: LocalInputSource::emit
#[derive(Clone, Default)]
pub struct LocalInputSource {
    registry: Arc<Mutex<Registry>>,
}

impl LocalInputSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every listener of its kind. Returns the number of listeners.
    pub fn emit(&self, event: HostEvent) -> usize {
        let sinks: Vec<EventSink> = lock(&self.registry)
            .sinks
            .get(&event.kind)
            .map(|entries| entries.iter().map(|(_, sink)| Arc::clone(sink)).collect())
            .unwrap_or_default();

        // Listeners run outside the lock so they may subscribe or unsubscribe.
        for sink in &sinks {
            sink(event.clone());
        }
        sinks.len()
    }

    /// Number of live listeners across all kinds
    pub fn listener_count(&self) -> usize {
        lock(&self.registry).sinks.values().map(Vec::len).sum()
    }
}

impl InputSource for LocalInputSource {
    fn subscribe(&self, kind: EventKind, sink: EventSink) -> Subscription {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.sinks.entry(kind).or_default().push((id, sink));
            id
        };

        let registry = Arc::clone(&self.registry);
        Subscription::new(kind, move || {
            if let Some(entries) = lock(&registry).sinks.get_mut(&kind) {
                entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
