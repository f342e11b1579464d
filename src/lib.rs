//! NoteSync - offline synchronization core for a cloud-backed notes client.
//!
//! This library provides:
//! - Data models (Note, PendingChange, UserRecord)
//! - Local store (SQLite) with a durable pending-change queue
//! - Connectivity tracking
//! - Sync engine routing reads and writes between local and remote stores
//! - Per-note editing session
//! - Configuration management
//!
//! The remote document store and the authentication provider are
//! abstract; [`remote::HttpRemoteStore`] and [`remote::InMemoryRemoteStore`]
//! are the bundled implementations.
//!
//! # Feature Flags
//!
//! - `desktop`: Include desktop-specific features (config dir detection).

pub mod auth;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod listeners;
pub mod local_store;
pub mod models;
pub mod remote;
pub mod session;
pub mod sync_engine;
pub mod validation;

// Re-export commonly used types
pub use auth::{AuthProvider, AuthUser, StaticAuth, UserTracker};
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, NetworkSignal};
pub use error::{NoteError, NoteResult};
pub use listeners::Subscription;
pub use local_store::{Collection, LocalStore, SharedStore};
pub use models::{NewNote, Note, NoteChanges, NotePatch, PendingChange, UserRecord};
pub use remote::{HttpRemoteStore, InMemoryRemoteStore, RemoteStore};
pub use session::NoteSession;
pub use sync_engine::{AutoDrain, DrainReport, SyncEngine, SyncSettings};
