//! Per-note editing facade used by the UI layer.

use std::sync::Arc;

use crate::error::{NoteError, NoteResult};
use crate::models::{Note, NoteChanges};
use crate::sync_engine::{AutoDrain, SyncEngine};

/// The note list of one owner and the note currently open.
///
/// The session does not own the connectivity monitor: it reaches it
/// through the shared engine. Monitor listeners are torn down once, by
/// [`ConnectivityMonitor::shutdown`] or when the last monitor handle is
/// dropped. Dropping the session stops its auto-sync task.
///
/// [`ConnectivityMonitor::shutdown`]: crate::connectivity::ConnectivityMonitor::shutdown
pub struct NoteSession {
    engine: Arc<SyncEngine>,
    owner_id: String,
    notes: Vec<Note>,
    current: Option<Note>,
    auto_drain: Option<AutoDrain>,
}

impl NoteSession {
    pub fn new(engine: Arc<SyncEngine>, owner_id: impl Into<String>) -> Self {
        Self {
            engine,
            owner_id: owner_id.into(),
            notes: Vec::new(),
            current: None,
            auto_drain: None,
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Reload the note list. The open note follows the fresh copy if listed.
    ///
    /// Notes with queued changes show the queued snapshot, which holds
    /// edits the remote store has not seen yet.
    pub async fn refresh(&mut self) -> &[Note] {
        self.notes = self.engine.load_notes(&self.owner_id).await;
        match self.engine.pending_changes() {
            Ok(pending) => {
                for change in pending {
                    if let Some(listed) = self.notes.iter_mut().find(|n| n.id == change.id) {
                        *listed = change.data;
                    }
                }
            }
            Err(e) => tracing::warn!("Failed to read pending queue: {}", e),
        }
        let open_id = self.current.as_ref().map(|n| n.id.clone());
        if let Some(fresh) = open_id.and_then(|id| self.notes.iter().find(|n| n.id == id)) {
            self.current = Some(fresh.clone());
        }
        &self.notes
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// Open a note from the list, falling back to the local cache
    pub fn open(&mut self, note_id: &str) -> NoteResult<&Note> {
        let note = match self.notes.iter().find(|n| n.id == note_id) {
            Some(note) => note.clone(),
            None => self
                .engine
                .cached_note(note_id)?
                .ok_or_else(|| NoteError::NotFound(format!("note {}", note_id)))?,
        };
        Ok(self.current.insert(note))
    }

    /// Create a note remotely, list it and open it
    pub async fn create(&mut self) -> NoteResult<&Note> {
        let note = self.engine.create_note(&self.owner_id).await?;
        self.notes.push(note.clone());
        Ok(self.current.insert(note))
    }

    pub async fn set_title(&mut self, title: impl Into<String>) -> NoteResult<&Note> {
        self.update(NoteChanges::title(title)).await
    }

    pub async fn set_content(&mut self, content: impl Into<String>) -> NoteResult<&Note> {
        self.update(NoteChanges::content(content)).await
    }

    /// Apply changes to the open note.
    ///
    /// On a remote rejection the error is returned and the session keeps
    /// its previous snapshot.
    pub async fn update(&mut self, changes: NoteChanges) -> NoteResult<&Note> {
        let base = self
            .current
            .as_ref()
            .ok_or_else(|| NoteError::NotFound("no open note".to_string()))?;
        let updated = self
            .engine
            .apply_update(&self.owner_id, base, &changes)
            .await?;

        if let Some(listed) = self.notes.iter_mut().find(|n| n.id == updated.id) {
            *listed = updated.clone();
        }
        Ok(self.current.insert(updated))
    }

    pub fn current(&self) -> Option<&Note> {
        self.current.as_ref()
    }

    pub fn close(&mut self) {
        self.current = None;
    }

    /// Drain queued edits whenever connectivity returns, for as long as
    /// the session lives. Calling it again keeps the running task.
    ///
    /// Does nothing when auto drain is disabled in the engine settings.
    /// Returns whether auto sync is running afterwards.
    pub fn start_auto_sync(&mut self) -> bool {
        if !self.engine.settings().auto_drain {
            tracing::debug!("Auto drain disabled, not starting for {}", self.owner_id);
            return false;
        }
        if self.auto_drain.is_none() {
            self.auto_drain = Some(self.engine.spawn_auto_drain(self.owner_id.clone()));
        }
        true
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.auto_drain.as_ref().is_some_and(AutoDrain::is_running)
    }

    pub fn stop_auto_sync(&mut self) {
        if let Some(auto_drain) = self.auto_drain.take() {
            auto_drain.stop();
        }
    }
}
