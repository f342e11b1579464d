//! Callback registry with unsubscribe handles.
//!
//! Used for connectivity transitions and auth-state changes. A
//! [`Subscription`] removes its callback when unsubscribed or dropped,
//! and [`Listeners::close`] tears the whole registry down once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    callbacks: HashMap<u64, Callback<T>>,
    closed: bool,
}

/// A set of callbacks notified with values of type `T`
pub struct Listeners<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                callbacks: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Register a callback. Registering on a closed registry returns an
    /// inert subscription.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if registry.closed {
                return Subscription::inert();
            }
            let id = registry.next_id;
            registry.next_id += 1;
            registry.callbacks.insert(id, Arc::new(callback));
            id
        };

        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut registry = inner.lock().unwrap_or_else(PoisonError::into_inner);
                    registry.callbacks.remove(&id);
                }
            })),
        }
    }

    /// Call every registered callback with `value`.
    ///
    /// Callbacks run outside the registry lock so they may unsubscribe.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            registry.callbacks.values().cloned().collect()
        };
        for callback in callbacks {
            callback(value);
        }
    }

    /// Number of live callbacks
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every callback and refuse new ones. Returns `true` only for
    /// the call that actually closed the registry.
    pub fn close(&self) -> bool {
        let mut registry = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.closed {
            return false;
        }
        registry.closed = true;
        registry.callbacks.clear();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { cancel: None }
    }

    /// Remove the callback now
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
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
            .field("active", &self.is_active())
            .finish()
    }
}
