//! Named publish/subscribe channel for signals.
//!
//! Listeners run synchronously on the emitting task, in registration order.
//! A panicking listener is logged and skipped; the others still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

type Listener<E> = Arc<dyn Fn(E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: HashMap<String, Vec<(u64, Listener<E>)>>,
}

/// Fan-out of events to registered listeners.
pub struct EventChannel<E> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E> Clone for EventChannel<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E> Default for EventChannel<E> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }
}

impl<E> std::fmt::Debug for EventChannel<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventChannel")
            .field("names", &registry.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<E: Clone + 'static> EventChannel<E> {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `name`.
    pub fn on<F>(&self, name: &str, listener: F) -> Subscription
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .listeners
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        drop(registry);

        let weak = Arc::downgrade(&self.registry);
        let name = name.to_string();
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(list) = registry.listeners.get_mut(&name) {
                        list.retain(|(entry, _)| *entry != id);
                        if list.is_empty() {
                            registry.listeners.remove(&name);
                        }
                    }
                }
            })),
        }
    }

    /// Deliver `event` to every listener for `name`.
    ///
    /// Returns how many listeners ran to completion.
    pub fn emit(&self, name: &str, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            match registry.listeners.get(name) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for listener in snapshot {
            let event = event.clone();
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(event = name, "Event listener panicked"),
            }
        }
        delivered
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.listeners.get(name).map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventChannel::on`].
///
/// Dropping it keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "dropping a Subscription keeps the listener registered forever"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
