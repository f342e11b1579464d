//! Online/offline tracking.
//!
//! The monitor does not probe the network. The platform feeds it
//! reachability transitions through [`ConnectivityMonitor::set_online`]
//! and the sync engine treats the result as advisory.

use std::sync::Arc;

use tokio::sync::watch;

use crate::listeners::{Listeners, Subscription};

/// Platform reachability source read once at construction.
pub trait NetworkSignal: Send + Sync {
    fn is_reachable(&self) -> bool;
}

struct Inner {
    state: watch::Sender<bool>,
    listeners: Listeners<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.listeners.close() {
            tracing::debug!("Connectivity monitor dropped, listeners released");
        }
    }
}

/// Shared connectivity state. Clones observe the same status.
///
/// Listeners are torn down once: on the first [`shutdown`](Self::shutdown)
/// or when the last clone is dropped.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    /// Create a monitor with a known initial status
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Listeners::new(),
            }),
        }
    }

    /// Create a monitor initialized from the platform signal
    pub fn from_signal(signal: &dyn NetworkSignal) -> Self {
        Self::new(signal.is_reachable())
    }

    /// Current advisory status
    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Record a platform online/offline event.
    ///
    /// Returns `true` if this was a transition. Subscribers are only
    /// notified on transitions.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("Connectivity: online");
            } else {
                tracing::warn!("Connectivity: offline");
            }
            self.inner.listeners.notify(&online);
        }
        changed
    }

    /// Register a callback invoked with the new status on every transition
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(move |online: &bool| callback(*online))
    }

    /// Register a callback invoked only on offline -> online transitions
    pub fn on_reconnect<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(move |online| {
            if online {
                callback();
            }
        })
    }

    /// Receiver for async consumers
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Tear down all callbacks. Only the first call has an effect.
    pub fn shutdown(&self) {
        if self.inner.listeners.close() {
            tracing::debug!("Connectivity monitor shut down");
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
