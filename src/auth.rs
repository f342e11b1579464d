//! Authentication boundary.
//!
//! Sign-in flows live outside this crate. The sync core only needs the
//! current identity and to hear when it changes.

use std::sync::{Arc, Mutex, PoisonError};

use crate::listeners::{Listeners, Subscription};
use crate::sync_engine::SyncEngine;

/// Identity reported by the authentication provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            uid: uid.into(),
            email: email.map(String::from),
        }
    }
}

/// Callback receiving the new identity (`None` after sign-out)
pub type AuthCallback = Box<dyn Fn(Option<&AuthUser>) + Send + Sync>;

/// Source of the signed-in identity.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    /// Register for sign-in and sign-out events
    fn subscribe(&self, callback: AuthCallback) -> Subscription;
}

/// In-process provider whose identity is set directly.
#[derive(Default)]
pub struct StaticAuth {
    user: Mutex<Option<AuthUser>>,
    listeners: Listeners<Option<AuthUser>>,
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Self {
        let auth = Self::new();
        *auth.user.lock().unwrap_or_else(PoisonError::into_inner) = Some(user);
        auth
    }

    pub fn sign_in(&self, user: AuthUser) {
        self.set(Some(user));
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    fn set(&self, user: Option<AuthUser>) {
        *self.user.lock().unwrap_or_else(PoisonError::into_inner) = user.clone();
        self.listeners.notify(&user);
    }
}

impl AuthProvider for StaticAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self, callback: AuthCallback) -> Subscription {
        self.listeners
            .subscribe(move |user: &Option<AuthUser>| callback(user.as_ref()))
    }
}

/// Mirrors sign-ins into the local user record.
///
/// The record is left in place on sign-out. Dropping the tracker stops
/// listening.
pub struct UserTracker {
    _subscription: Subscription,
}

impl UserTracker {
    pub fn start(provider: &dyn AuthProvider, engine: Arc<SyncEngine>) -> Self {
        if let Some(user) = provider.current_user() {
            record(&engine, &user);
        }

        let subscription = provider.subscribe(Box::new(move |user| match user {
            Some(user) => record(&engine, user),
            None => tracing::info!("Signed out, keeping last user record"),
        }));

        Self {
            _subscription: subscription,
        }
    }
}

fn record(engine: &SyncEngine, user: &AuthUser) {
    if let Err(e) = engine.record_sign_in(&user.uid, user.email.as_deref()) {
        tracing::warn!("Failed to record sign-in of {}: {}", user.uid, e);
    }
}
