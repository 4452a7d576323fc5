//! Listener registries for conversation state
//!
//! Each registry hands out a [`Subscription`] on registration. Calling
//! [`Subscription::unsubscribe`] removes the listener; dropping the handle
//! leaves it registered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
}

/// A set of listeners notified with a shared value
pub struct Observers<T> {
    registry: Arc<Registry<T>>,
}

impl<T: 'static> Observers<T> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.registry.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }

        let registry: Arc<dyn Unsubscribe> = self.registry.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&registry),
        }
    }

    /// Notify every registered listener in registration order
    pub fn notify(&self, value: &T) {
        // Snapshot so listeners may subscribe or unsubscribe while being notified
        let snapshot: Vec<Listener<T>> = self
            .registry
            .listeners
            .lock()
            .map(|l| l.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of registered listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.listeners.lock().map_or(0, |l| l.len())
    }

    /// Whether no listeners are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.registry.listeners.lock().map_or(0, |l| l.len());
        f.debug_struct("Observers").field("listeners", &count).finish()
    }
}

trait Unsubscribe: Send + Sync {
    fn remove(&self, id: u64);
}

impl<T> Unsubscribe for Registry<T> {
    fn remove(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }
}

/// Handle returned by [`Observers::subscribe`]
#[must_use = "keep the subscription to be able to unsubscribe later"]
pub struct Subscription {
    id: u64,
    registry: Weak<dyn Unsubscribe>,
}

impl Subscription {
    /// Remove the listener from its registry
    ///
    /// A no-op when the registry has already been dropped
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
