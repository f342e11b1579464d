//! Sync engine: routes note reads and writes between the local store and
//! the remote store, and drains the pending-change queue.
//!
//! Offline edits are written to the local store together with a
//! pending change in one transaction. When connectivity returns the
//! queue is replayed oldest first; entries that fail stay queued for the
//! next drain, entries the remote rejects are dropped and reported.

use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{NoteError, NoteResult};
use crate::local_store::{Collection, LocalStore, SharedStore};
use crate::models::{NewNote, Note, NoteChanges, NotePatch, PendingChange, UserRecord, CURRENT_USER_ID};
use crate::remote::RemoteStore;
use crate::validation::{validate_content, validate_note_id, validate_owner_id, validate_title};

/// Tunables for remote calls and queue draining
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Upper bound for a single remote call
    pub request_timeout: Duration,
    /// Attempts per queued change within one drain pass
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Title given to newly created notes
    pub default_note_title: String,
    /// Whether sessions drain automatically on reconnect
    pub auto_drain: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            default_note_title: String::new(),
            auto_drain: true,
        }
    }
}

impl SyncSettings {
    /// Delay before retry number `retry` (1-based): doubles each time,
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Outcome of one drain pass, as note ids in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Applied remotely and removed from the queue
    pub applied: Vec<String>,
    /// Failed and left in the queue
    pub failed: Vec<String>,
    /// Rejected by the remote and removed from the queue
    pub rejected: Vec<String>,
}

impl DrainReport {
    /// Number of entries processed
    pub fn total(&self) -> usize {
        self.applied.len() + self.failed.len() + self.rejected.len()
    }

    /// True if every processed entry was applied
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.rejected.is_empty()
    }
}

/// Coordinates the local store, the remote store and connectivity.
pub struct SyncEngine {
    store: SharedStore,
    remote: Arc<dyn RemoteStore>,
    connectivity: ConnectivityMonitor,
    settings: SyncSettings,
    drain_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: SharedStore,
        remote: Arc<dyn RemoteStore>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            settings: SyncSettings::default(),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Run a synchronous local store operation under the store lock.
    fn with_store<T>(&self, f: impl FnOnce(&LocalStore) -> NoteResult<T>) -> NoteResult<T> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&store)
    }

    /// Bound a remote call by the request timeout
    async fn remote_call<T>(&self, call: impl Future<Output = NoteResult<T>>) -> NoteResult<T> {
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(NoteError::unreachable(format!(
                "remote call timed out after {:?}",
                self.settings.request_timeout
            ))),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Load the owner's notes.
    ///
    /// Online, the remote list is authoritative and overwrites the cache.
    /// Offline (or when the remote call fails) the whole cache is
    /// returned without owner filtering. Never fails: callers must not
    /// assume the result is fresh.
    pub async fn load_notes(&self, owner_id: &str) -> Vec<Note> {
        if let Err(e) = validate_owner_id(owner_id) {
            tracing::warn!("load_notes: {}", e);
            return Vec::new();
        }

        if self.is_online() {
            match self.remote_call(self.remote.list(owner_id)).await {
                Ok(notes) => {
                    if let Err(e) = self.with_store(|s| s.put_all(&notes)) {
                        tracing::warn!("Failed to refresh note cache: {}", e);
                    }
                    tracing::debug!("Loaded {} notes from remote", notes.len());
                    return notes;
                }
                Err(e) => {
                    tracing::warn!("Remote list failed, using cached notes: {}", e);
                }
            }
        }

        match self.with_store(|s| s.get_all::<Note>()) {
            Ok(notes) => notes,
            Err(e) => {
                tracing::error!("Failed to read cached notes: {}", e);
                Vec::new()
            }
        }
    }

    /// Cached copy of a note, if any
    pub fn cached_note(&self, note_id: &str) -> NoteResult<Option<Note>> {
        self.with_store(|s| s.get::<Note>(note_id))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create an empty note on the remote store.
    ///
    /// Requires connectivity: ids are assigned remotely and there is no
    /// offline creation path.
    pub async fn create_note(&self, owner_id: &str) -> NoteResult<Note> {
        validate_owner_id(owner_id)?;
        if !self.is_online() {
            return Err(NoteError::Offline(
                "creating a note requires connectivity".to_string(),
            ));
        }

        let draft = NewNote::empty(self.settings.default_note_title.clone(), Utc::now());
        let note = self.remote_call(self.remote.create(owner_id, &draft)).await?;

        if let Err(e) = self.with_store(|s| s.put(&note)) {
            tracing::warn!("Failed to cache new note {}: {}", note.id, e);
        }
        tracing::info!("Created note {}", note.id);
        Ok(note)
    }

    /// Apply partial fields to a note, starting from its cached snapshot.
    pub async fn update_note(
        &self,
        owner_id: &str,
        note_id: &str,
        changes: &NoteChanges,
    ) -> NoteResult<Note> {
        validate_note_id(note_id)?;
        let base = self
            .cached_note(note_id)?
            .ok_or_else(|| NoteError::NotFound(format!("note {}", note_id)))?;
        self.apply_update(owner_id, &base, changes).await
    }

    /// Apply partial fields to the caller's last-known snapshot.
    ///
    /// If the note has a queued change, the changes are merged onto the
    /// queued snapshot instead, since it holds edits the remote store has
    /// not seen and `base` may be a fresher remote copy without them.
    ///
    /// The merged note always reaches the local cache. Offline it is also
    /// queued. Online it is written to the remote store; a transport
    /// failure queues it instead of failing. Only a remote rejection is
    /// returned as an error, with the cache already holding the edit.
    pub async fn apply_update(
        &self,
        owner_id: &str,
        base: &Note,
        changes: &NoteChanges,
    ) -> NoteResult<Note> {
        validate_owner_id(owner_id)?;
        validate_note_id(&base.id)?;
        if let Some(title) = &changes.title {
            validate_title(title)?;
        }
        if let Some(content) = &changes.content {
            validate_content(content)?;
        }

        let now = Utc::now();
        let queued = match self.with_store(|s| s.get::<PendingChange>(&base.id)) {
            Ok(queued) => queued,
            Err(e) if self.is_online() => {
                tracing::warn!("Failed to read pending queue: {}", e);
                None
            }
            Err(e) => return Err(e),
        };
        let merged = match &queued {
            Some(change) => change.data.merged(changes, now),
            None => base.merged(changes, now),
        };

        if !self.is_online() {
            let change = self.queue_locally(&merged)?;
            tracing::debug!("Queued offline edit of note {} at {}", merged.id, change.timestamp);
            return Ok(merged);
        }

        // Earlier unsent edits ride along as a full snapshot
        let queued_at = queued.map(|c| c.timestamp);
        if let Err(e) = self.with_store(|s| s.put(&merged)) {
            tracing::warn!("Failed to cache note {}: {}", merged.id, e);
        }

        let patch = match queued_at {
            Some(_) => NotePatch::from_snapshot(&merged),
            None => NotePatch::from_changes(changes, now),
        };

        match self
            .remote_call(self.remote.update(owner_id, &merged.id, &patch))
            .await
        {
            Ok(()) => {
                if let Some(timestamp) = queued_at {
                    if let Err(e) = self.with_store(|s| s.remove_pending(&merged.id, timestamp)) {
                        tracing::warn!("Failed to clear pending change for {}: {}", merged.id, e);
                    }
                }
                Ok(merged)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("Remote update of {} failed, queueing: {}", merged.id, e);
                self.queue_locally(&merged)?;
                Ok(merged)
            }
            Err(e) => {
                tracing::error!("Remote rejected update of {}: {}", merged.id, e);
                Err(e)
            }
        }
    }

    fn queue_locally(&self, note: &Note) -> NoteResult<PendingChange> {
        let now_ms = Utc::now().timestamp_millis();
        self.with_store(|s| s.put_note_with_pending(note, now_ms))
    }

    // =========================================================================
    // Pending queue
    // =========================================================================

    /// Queued changes, oldest first
    pub fn pending_changes(&self) -> NoteResult<Vec<PendingChange>> {
        let mut pending = self.with_store(|s| s.get_all::<PendingChange>())?;
        pending.sort_by_key(|c| c.timestamp);
        Ok(pending)
    }

    pub fn pending_count(&self) -> NoteResult<usize> {
        self.with_store(|s| s.count(Collection::PendingChanges))
    }

    /// Whether a note has edits the remote store has not confirmed
    pub fn is_dirty(&self, note_id: &str) -> NoteResult<bool> {
        Ok(self
            .with_store(|s| s.get::<PendingChange>(note_id))?
            .is_some())
    }

    /// Replay the pending queue through `apply`, oldest first.
    ///
    /// Entries are processed one at a time. An applied entry is removed;
    /// a failed one stays queued with its attempt count bumped and the
    /// pass moves on. A `RemoteRejected` failure is terminal and removes
    /// the entry. Concurrent drains run one after the other, so calling
    /// this redundantly is safe.
    pub async fn drain<F, Fut>(&self, owner_id: &str, mut apply: F) -> DrainReport
    where
        F: FnMut(String, Note) -> Fut,
        Fut: Future<Output = NoteResult<()>>,
    {
        let _guard = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        let pending = match self.pending_changes() {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("Cannot read pending queue: {}", e);
                return report;
            }
        };
        if pending.is_empty() {
            return report;
        }
        tracing::info!("Draining {} pending changes for {}", pending.len(), owner_id);

        for change in pending {
            match apply(change.id.clone(), change.data.clone()).await {
                Ok(()) => {
                    if let Err(e) = self.with_store(|s| s.remove_pending(&change.id, change.timestamp)) {
                        tracing::warn!("Applied {} but could not dequeue it: {}", change.id, e);
                    }
                    report.applied.push(change.id);
                }
                Err(e @ NoteError::RemoteRejected { .. }) => {
                    tracing::error!("Dropping pending change for {}: {}", change.id, e);
                    if let Err(e) = self.with_store(|s| s.remove_pending(&change.id, change.timestamp)) {
                        tracing::warn!("Could not dequeue rejected {}: {}", change.id, e);
                    }
                    report.rejected.push(change.id);
                }
                Err(e) => {
                    let failure = NoteError::DrainEntryFailed {
                        note_id: change.id.clone(),
                        message: e.to_string(),
                    };
                    tracing::warn!("{}", failure);
                    if let Err(e) = self.with_store(|s| {
                        s.record_pending_failure(&change.id, change.timestamp, &failure.to_string())
                    }) {
                        tracing::warn!("Could not record failure for {}: {}", change.id, e);
                    }
                    report.failed.push(change.id);
                }
            }
        }

        tracing::info!(
            "Drain finished: {} applied, {} failed, {} rejected",
            report.applied.len(),
            report.failed.len(),
            report.rejected.len()
        );
        report
    }

    /// Drain the queue against the remote store.
    ///
    /// Each entry is pushed as a full snapshot with bounded retry and
    /// exponential backoff for transient failures.
    pub async fn sync_pending(&self, owner_id: &str) -> DrainReport {
        if let Err(e) = validate_owner_id(owner_id) {
            tracing::warn!("sync_pending: {}", e);
            return DrainReport::default();
        }
        if !self.is_online() {
            tracing::debug!("Offline, leaving pending changes queued");
            return DrainReport::default();
        }
        self.drain(owner_id, move |note_id, note| async move {
            self.push_with_retry(owner_id, &note_id, &note).await
        })
        .await
    }

    async fn push_with_retry(&self, owner_id: &str, note_id: &str, note: &Note) -> NoteResult<()> {
        let patch = NotePatch::from_snapshot(note);
        let mut attempt = 1;
        loop {
            match self
                .remote_call(self.remote.update(owner_id, note_id, &patch))
                .await
            {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempt < self.settings.max_attempts => {
                    let delay = self.settings.backoff_for(attempt);
                    tracing::debug!(
                        "Retrying {} in {:?} (attempt {} failed: {})",
                        note_id,
                        delay,
                        attempt,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        // Keep the cache in line with what the remote now holds
        let newer_cached = self
            .cached_note(note_id)?
            .is_some_and(|cached| cached.updated_at > note.updated_at);
        if !newer_cached {
            self.with_store(|s| s.put(note))?;
        }
        Ok(())
    }

    /// Drain automatically on every offline -> online transition.
    ///
    /// If the monitor already reports online, any queued changes are
    /// drained right away. The task stops when the handle is dropped.
    pub fn spawn_auto_drain(self: &Arc<Self>, owner_id: impl Into<String>) -> AutoDrain {
        let engine = Arc::clone(self);
        let owner_id = owner_id.into();
        let mut changes = self.connectivity.watch();

        let handle = tokio::spawn(async move {
            let mut was_online = *changes.borrow_and_update();
            if was_online && engine.pending_count().unwrap_or(0) > 0 {
                engine.sync_pending(&owner_id).await;
            }

            while changes.changed().await.is_ok() {
                let online = *changes.borrow_and_update();
                if online && !was_online {
                    engine.sync_pending(&owner_id).await;
                }
                was_online = online;
            }
        });

        AutoDrain { handle }
    }

    // =========================================================================
    // Current user
    // =========================================================================

    /// Mirror the signed-in identity for offline reference
    pub fn record_sign_in(&self, uid: &str, email: Option<&str>) -> NoteResult<()> {
        validate_owner_id(uid)?;
        let record = UserRecord::current(uid, email.map(String::from));
        self.with_store(|s| s.put(&record))?;
        tracing::info!("Recorded sign-in of {}", uid);
        Ok(())
    }

    /// Last recorded identity (may be stale after sign-out)
    pub fn current_user(&self) -> NoteResult<Option<UserRecord>> {
        self.with_store(|s| s.get::<UserRecord>(CURRENT_USER_ID))
    }
}

/// Handle of a background auto-drain task. Dropping it stops the task.
#[derive(Debug)]
pub struct AutoDrain {
    handle: JoinHandle<()>,
}

impl AutoDrain {
    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for AutoDrain {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemoryRemoteStore, RemoteCall};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    const OWNER: &str = "uid-1";

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            request_timeout: Duration::from_secs(5),
            max_attempts: 2,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            default_note_title: String::new(),
            auto_drain: true,
        }
    }

    fn setup(online: bool) -> (Arc<SyncEngine>, Arc<InMemoryRemoteStore>, ConnectivityMonitor) {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let connectivity = ConnectivityMonitor::new(online);
        let store = LocalStore::open_in_memory().unwrap().into_shared();
        let engine = SyncEngine::new(store, remote.clone(), connectivity.clone())
            .with_settings(fast_settings());
        (Arc::new(engine), remote, connectivity)
    }

    fn seeded_note(remote: &InMemoryRemoteStore, id: &str, title: &str) -> Note {
        let note = NewNote::empty(title, Utc::now()).with_id(id);
        remote.seed(OWNER, note.clone());
        note
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let settings = SyncSettings {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            ..SyncSettings::default()
        };
        assert_eq!(settings.backoff_for(1), Duration::from_millis(100));
        assert_eq!(settings.backoff_for(2), Duration::from_millis(200));
        assert_eq!(settings.backoff_for(3), Duration::from_millis(350));
        assert_eq!(settings.backoff_for(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_load_notes_online_overwrites_cache() {
        let (engine, remote, _) = setup(true);
        let fresh = seeded_note(&remote, "n1", "fresh");
        let mut stale = fresh.clone();
        stale.title = "stale".to_string();
        engine.with_store(|s| s.put(&stale)).unwrap();

        let notes = engine.load_notes(OWNER).await;

        assert_eq!(notes, vec![fresh.clone()]);
        assert_eq!(engine.cached_note("n1").unwrap().unwrap().title, "fresh");
    }

    #[tokio::test]
    async fn test_load_notes_offline_reads_cache_only() {
        let (engine, remote, _) = setup(false);
        seeded_note(&remote, "remote-only", "remote");
        let cached = NewNote::empty("cached", Utc::now()).with_id("n1");
        engine.with_store(|s| s.put(&cached)).unwrap();

        let notes = engine.load_notes(OWNER).await;

        assert_eq!(notes, vec![cached]);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_notes_falls_back_when_remote_fails() {
        let (engine, remote, _) = setup(true);
        let cached = NewNote::empty("cached", Utc::now()).with_id("n1");
        engine.with_store(|s| s.put(&cached)).unwrap();
        remote.set_unreachable(true);

        let notes = engine.load_notes(OWNER).await;
        assert_eq!(notes, vec![cached]);
    }

    #[tokio::test]
    async fn test_create_note_online() {
        let (engine, remote, _) = setup(true);

        let note = engine.create_note(OWNER).await.unwrap();

        assert!(!note.id.is_empty());
        assert_eq!(note.title, "");
        assert_eq!(note.content, "");
        assert_eq!(note.created_at, note.updated_at);
        assert_eq!(remote.note(OWNER, &note.id), Some(note.clone()));
        assert_eq!(engine.cached_note(&note.id).unwrap(), Some(note));
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_note_uses_default_title() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let store = LocalStore::open_in_memory().unwrap().into_shared();
        let engine = SyncEngine::new(store, remote, ConnectivityMonitor::new(true)).with_settings(
            SyncSettings {
                default_note_title: "Nueva Nota".to_string(),
                ..fast_settings()
            },
        );

        let note = engine.create_note(OWNER).await.unwrap();
        assert_eq!(note.title, "Nueva Nota");
    }

    #[tokio::test]
    async fn test_create_note_offline_is_refused() {
        let (engine, remote, _) = setup(false);

        let result = engine.create_note(OWNER).await;

        assert!(matches!(result, Err(NoteError::Offline(_))));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_online_writes_remote() {
        let (engine, remote, _) = setup(true);
        let note = seeded_note(&remote, "n1", "old");

        let updated = engine
            .apply_update(OWNER, &note, &NoteChanges::title("new"))
            .await
            .unwrap();

        assert_eq!(updated.title, "new");
        assert!(updated.updated_at >= note.updated_at);
        assert_eq!(remote.note(OWNER, "n1").unwrap().title, "new");
        assert_eq!(engine.cached_note("n1").unwrap().unwrap().title, "new");
        assert_eq!(engine.pending_count().unwrap(), 0);

        match remote.calls().last().unwrap() {
            RemoteCall::Update { patch, .. } => {
                assert_eq!(patch.title.as_deref(), Some("new"));
                assert!(patch.content.is_none());
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_offline_edits_coalesce() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "start");
        connectivity.set_online(false);

        let first = engine
            .apply_update(OWNER, &note, &NoteChanges::title("A"))
            .await
            .unwrap();
        engine
            .apply_update(OWNER, &first, &NoteChanges::content("body"))
            .await
            .unwrap();

        let pending = engine.pending_changes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data.title, "A");
        assert_eq!(pending[0].data.content, "body");
        assert!(engine.is_dirty("n1").unwrap());
        assert!(remote.updated_ids().is_empty());
    }

    #[tokio::test]
    async fn test_offline_title_edits_then_drain() {
        let (engine, remote, connectivity) = setup(true);
        let created = engine.create_note(OWNER).await.unwrap();
        connectivity.set_online(false);

        let mut current = created;
        for title in ["A", "B", "C"] {
            current = engine
                .apply_update(OWNER, &current, &NoteChanges::title(title))
                .await
                .unwrap();
        }

        let pending = engine.pending_changes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, current.id);
        assert_eq!(pending[0].data.title, "C");

        connectivity.set_online(true);
        let report = engine.sync_pending(OWNER).await;

        assert_eq!(report.applied, vec![current.id.clone()]);
        assert_eq!(engine.pending_count().unwrap(), 0);
        assert_eq!(remote.note(OWNER, &current.id).unwrap().title, "C");
    }

    #[tokio::test]
    async fn test_update_note_uses_cached_snapshot() {
        let (engine, remote, connectivity) = setup(true);
        seeded_note(&remote, "n1", "title");
        engine.load_notes(OWNER).await;
        connectivity.set_online(false);

        engine
            .update_note(OWNER, "n1", &NoteChanges::content("first"))
            .await
            .unwrap();
        let second = engine
            .update_note(OWNER, "n1", &NoteChanges::title("second"))
            .await
            .unwrap();

        assert_eq!(second.title, "second");
        assert_eq!(second.content, "first");
    }

    #[tokio::test]
    async fn test_update_note_unknown_id() {
        let (engine, _, _) = setup(true);
        let result = engine
            .update_note(OWNER, "missing", &NoteChanges::title("x"))
            .await;
        assert!(matches!(result, Err(NoteError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unreachable_while_online_queues_edit() {
        let (engine, remote, _) = setup(true);
        let note = seeded_note(&remote, "n1", "old");
        remote.set_unreachable(true);

        let updated = engine
            .apply_update(OWNER, &note, &NoteChanges::title("new"))
            .await
            .unwrap();

        assert_eq!(updated.title, "new");
        let pending = engine.pending_changes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data, updated);
        assert_eq!(engine.cached_note("n1").unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_rejected_while_online_is_returned() {
        let (engine, remote, _) = setup(true);
        let note = seeded_note(&remote, "n1", "old");
        remote.reject_note("n1");

        let result = engine
            .apply_update(OWNER, &note, &NoteChanges::title("new"))
            .await;

        assert!(matches!(result, Err(NoteError::RemoteRejected { status: 403, .. })));
        assert_eq!(engine.pending_count().unwrap(), 0);
        assert_eq!(engine.cached_note("n1").unwrap().unwrap().title, "new");
    }

    #[tokio::test]
    async fn test_online_edit_flushes_earlier_offline_edit() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "old");
        connectivity.set_online(false);
        let offline = engine
            .apply_update(OWNER, &note, &NoteChanges::content("written offline"))
            .await
            .unwrap();

        connectivity.set_online(true);
        engine
            .apply_update(OWNER, &offline, &NoteChanges::title("online"))
            .await
            .unwrap();

        let stored = remote.note(OWNER, "n1").unwrap();
        assert_eq!(stored.title, "online");
        assert_eq!(stored.content, "written offline");
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_applies_oldest_first() {
        let (engine, remote, connectivity) = setup(true);
        let a = seeded_note(&remote, "a", "a");
        let b = seeded_note(&remote, "b", "b");
        connectivity.set_online(false);

        // "b" is edited first, so it must be replayed first
        engine.apply_update(OWNER, &b, &NoteChanges::title("b1")).await.unwrap();
        engine.apply_update(OWNER, &a, &NoteChanges::title("a1")).await.unwrap();

        let order = std::sync::Mutex::new(Vec::new());
        let report = engine
            .drain(OWNER, |note_id, _note| {
                order.lock().unwrap().push(note_id);
                async { Ok(()) }
            })
            .await;

        assert_eq!(*order.lock().unwrap(), vec!["b", "a"]);
        assert_eq!(report.applied, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_drain_twice_is_noop() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "x");
        connectivity.set_online(false);
        engine.apply_update(OWNER, &note, &NoteChanges::title("y")).await.unwrap();
        connectivity.set_online(true);

        let first = engine.sync_pending(OWNER).await;
        let calls_after_first = remote.calls().len();
        let second = engine.sync_pending(OWNER).await;

        assert_eq!(first.total(), 1);
        assert_eq!(second, DrainReport::default());
        assert_eq!(remote.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn test_drain_isolates_failures() {
        for failing_first in [true, false] {
            let (engine, remote, connectivity) = setup(true);
            let a = seeded_note(&remote, "a", "a");
            let b = seeded_note(&remote, "b", "b");
            connectivity.set_online(false);

            let (first, second) = if failing_first { (&a, &b) } else { (&b, &a) };
            engine.apply_update(OWNER, first, &NoteChanges::title("1")).await.unwrap();
            engine.apply_update(OWNER, second, &NoteChanges::title("2")).await.unwrap();

            connectivity.set_online(true);
            remote.fail_note("a");
            let report = engine.sync_pending(OWNER).await;

            assert_eq!(report.applied, vec!["b"]);
            assert_eq!(report.failed, vec!["a"]);
            let pending = engine.pending_changes().unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, "a");
            assert_eq!(pending[0].attempts, 1);
            assert!(pending[0].last_error.is_some());
            assert!(engine.is_dirty("a").unwrap());
            assert!(!engine.is_dirty("b").unwrap());
        }
    }

    #[tokio::test]
    async fn test_failed_entry_drains_on_next_pass() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "x");
        connectivity.set_online(false);
        engine.apply_update(OWNER, &note, &NoteChanges::title("y")).await.unwrap();
        connectivity.set_online(true);

        remote.fail_note("n1");
        assert_eq!(engine.sync_pending(OWNER).await.failed, vec!["n1"]);

        remote.heal_note("n1");
        assert_eq!(engine.sync_pending(OWNER).await.applied, vec!["n1"]);
        assert_eq!(remote.note(OWNER, "n1").unwrap().title, "y");
    }

    #[tokio::test]
    async fn test_rejected_entry_leaves_queue() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "x");
        connectivity.set_online(false);
        engine.apply_update(OWNER, &note, &NoteChanges::title("y")).await.unwrap();
        connectivity.set_online(true);
        remote.reject_note("n1");

        let report = engine.sync_pending(OWNER).await;

        assert_eq!(report.rejected, vec!["n1"]);
        assert!(!report.is_clean());
        assert_eq!(engine.pending_count().unwrap(), 0);
        // Rejections are not retried within the pass
        assert_eq!(remote.updated_ids(), vec!["n1"]);
    }

    #[tokio::test]
    async fn test_online_edit_after_reload_keeps_queued_edit() {
        let (engine, remote, connectivity) = setup(true);
        seeded_note(&remote, "n1", "old");
        engine.load_notes(OWNER).await;

        connectivity.set_online(false);
        engine
            .update_note(OWNER, "n1", &NoteChanges::title("C"))
            .await
            .unwrap();

        // Reloading overwrites the cache with the remote copy before any drain
        connectivity.set_online(true);
        engine.load_notes(OWNER).await;
        assert_eq!(engine.cached_note("n1").unwrap().unwrap().title, "old");

        let updated = engine
            .update_note(OWNER, "n1", &NoteChanges::content("x"))
            .await
            .unwrap();

        assert_eq!(updated.title, "C");
        assert_eq!(updated.content, "x");
        let stored = remote.note(OWNER, "n1").unwrap();
        assert_eq!(stored.title, "C");
        assert_eq!(stored.content, "x");
        assert!(!engine.is_dirty("n1").unwrap());
    }

    #[tokio::test]
    async fn test_offline_edit_after_reload_keeps_queued_edit() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "old");

        connectivity.set_online(false);
        engine.apply_update(OWNER, &note, &NoteChanges::title("C")).await.unwrap();
        connectivity.set_online(true);
        let reloaded = engine.load_notes(OWNER).await;
        connectivity.set_online(false);

        engine
            .apply_update(OWNER, &reloaded[0], &NoteChanges::content("x"))
            .await
            .unwrap();

        let pending = engine.pending_changes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].data.title, "C");
        assert_eq!(pending[0].data.content, "x");
    }

    #[tokio::test]
    async fn test_sync_pending_skips_remote_while_offline() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "x");
        connectivity.set_online(false);
        engine.apply_update(OWNER, &note, &NoteChanges::title("y")).await.unwrap();

        let report = engine.sync_pending(OWNER).await;

        assert_eq!(report, DrainReport::default());
        assert!(remote.updated_ids().is_empty());
        let pending = engine.pending_changes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);
        assert!(pending[0].last_error.is_none());
    }

    /// Fails the first `failures` updates, then delegates.
    struct FlakyRemote {
        inner: InMemoryRemoteStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl RemoteStore for FlakyRemote {
        async fn list(&self, owner_id: &str) -> NoteResult<Vec<Note>> {
            self.inner.list(owner_id).await
        }

        async fn create(&self, owner_id: &str, note: &NewNote) -> NoteResult<Note> {
            self.inner.create(owner_id, note).await
        }

        async fn update(&self, owner_id: &str, note_id: &str, patch: &NotePatch) -> NoteResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(NoteError::unreachable("flaky"));
            }
            self.inner.update(owner_id, note_id, patch).await
        }
    }

    #[tokio::test]
    async fn test_drain_retries_transient_failures() {
        let remote = Arc::new(FlakyRemote {
            inner: InMemoryRemoteStore::new(),
            failures: AtomicU32::new(0),
        });
        let note = NewNote::empty("x", Utc::now()).with_id("n1");
        remote.inner.seed(OWNER, note.clone());

        let connectivity = ConnectivityMonitor::new(false);
        let store = LocalStore::open_in_memory().unwrap().into_shared();
        let engine = SyncEngine::new(store, remote.clone(), connectivity.clone()).with_settings(
            SyncSettings {
                max_attempts: 3,
                ..fast_settings()
            },
        );

        engine.apply_update(OWNER, &note, &NoteChanges::title("y")).await.unwrap();
        connectivity.set_online(true);
        remote.failures.store(2, Ordering::SeqCst);

        let report = engine.sync_pending(OWNER).await;

        assert_eq!(report.applied, vec!["n1"]);
        assert_eq!(remote.inner.note(OWNER, "n1").unwrap().title, "y");
    }

    #[tokio::test]
    async fn test_offline_edits_survive_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.db");
        let remote = Arc::new(InMemoryRemoteStore::new());
        let a = NewNote::empty("a", Utc::now()).with_id("a");
        let b = NewNote::empty("b", Utc::now()).with_id("b");

        {
            let store = LocalStore::open(&path).unwrap().into_shared();
            let engine = SyncEngine::new(store, remote.clone(), ConnectivityMonitor::new(false));
            let a1 = engine.apply_update(OWNER, &a, &NoteChanges::title("a1")).await.unwrap();
            engine.apply_update(OWNER, &a1, &NoteChanges::title("a2")).await.unwrap();
            engine.apply_update(OWNER, &b, &NoteChanges::content("b1")).await.unwrap();
        }

        let store = LocalStore::open(&path).unwrap().into_shared();
        let engine = SyncEngine::new(store, remote, ConnectivityMonitor::new(false));

        let cached = engine.load_notes(OWNER).await;
        assert_eq!(cached.len(), 2);
        let pending = engine.pending_changes().unwrap();
        assert_eq!(pending.len(), 2);
        let a_pending = pending.iter().find(|c| c.id == "a").unwrap();
        assert_eq!(a_pending.data.title, "a2");
        assert_eq!(engine.cached_note("a").unwrap().unwrap(), a_pending.data);
    }

    #[tokio::test]
    async fn test_auto_drain_on_reconnect() {
        let (engine, remote, connectivity) = setup(true);
        let note = seeded_note(&remote, "n1", "x");
        connectivity.set_online(false);
        let auto = engine.spawn_auto_drain(OWNER);

        engine.apply_update(OWNER, &note, &NoteChanges::title("y")).await.unwrap();
        assert_eq!(engine.pending_count().unwrap(), 1);

        connectivity.set_online(true);
        for _ in 0..100 {
            if engine.pending_count().unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(engine.pending_count().unwrap(), 0);
        assert_eq!(remote.note(OWNER, "n1").unwrap().title, "y");
        assert!(auto.is_running());
        auto.stop();
    }

    #[tokio::test]
    async fn test_record_sign_in() {
        let (engine, _, _) = setup(true);
        assert!(engine.current_user().unwrap().is_none());

        engine.record_sign_in("uid-1", Some("a@example.com")).unwrap();
        engine.record_sign_in("uid-2", None).unwrap();

        let user = engine.current_user().unwrap().unwrap();
        assert_eq!(user.uid, "uid-2");
        assert!(user.email.is_none());
    }
}
