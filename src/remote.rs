//! Remote document store collaborator.
//!
//! The core only needs list/create/update scoped by owner. Two
//! implementations are provided: an HTTP/JSON client and an in-memory
//! store with failure injection for tests and demos.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{NoteError, NoteResult};
use crate::models::{NewNote, Note, NotePatch};

/// Owner-scoped note documents reachable over the network.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All notes stored under `owner_id`
    async fn list(&self, owner_id: &str) -> NoteResult<Vec<Note>>;

    /// Store a new note and return it with its assigned id
    async fn create(&self, owner_id: &str, note: &NewNote) -> NoteResult<Note>;

    /// Apply partial fields to an existing note
    async fn update(&self, owner_id: &str, note_id: &str, patch: &NotePatch) -> NoteResult<()>;
}

/// Map an HTTP status to the error taxonomy.
///
/// Server-side and throttling statuses are transient; every other
/// non-success status is a business rejection that retrying won't fix.
pub fn classify_status(status: u16, message: impl Into<String>) -> NoteError {
    match status {
        408 | 429 | 500..=599 => {
            NoteError::unreachable(format!("HTTP {}: {}", status, message.into()))
        }
        _ => NoteError::rejected(status, message),
    }
}

/// Response body of a create call
#[derive(Debug, Deserialize)]
struct CreatedDocument {
    id: String,
}

/// REST client for the remote document store.
///
/// Layout: `{base}/users/{owner}/notes[/{id}]`.
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> NoteResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NoteError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the `remote` section of the configuration
    pub fn from_config(config: &Config) -> NoteResult<Self> {
        let base_url = config
            .remote_base_url()
            .ok_or_else(|| NoteError::Config("remote.base_url is not set".to_string()))?;
        Self::new(base_url, config.request_timeout())
    }

    fn notes_url(&self, owner_id: &str) -> String {
        format!(
            "{}/users/{}/notes",
            self.base_url,
            urlencoding::encode(owner_id)
        )
    }

    fn note_url(&self, owner_id: &str, note_id: &str) -> String {
        format!(
            "{}/{}",
            self.notes_url(owner_id),
            urlencoding::encode(note_id)
        )
    }

    async fn check(response: Response) -> NoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body
        };
        Err(classify_status(status.as_u16(), message))
    }
}

fn transport_error(e: reqwest::Error) -> NoteError {
    NoteError::unreachable(e.to_string())
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list(&self, owner_id: &str) -> NoteResult<Vec<Note>> {
        let response = self
            .client
            .get(self.notes_url(owner_id))
            .send()
            .await
            .map_err(transport_error)?;

        Self::check(response)
            .await?
            .json::<Vec<Note>>()
            .await
            .map_err(|e| NoteError::unreachable(format!("failed to parse note list: {}", e)))
    }

    async fn create(&self, owner_id: &str, note: &NewNote) -> NoteResult<Note> {
        let response = self
            .client
            .post(self.notes_url(owner_id))
            .json(note)
            .send()
            .await
            .map_err(transport_error)?;

        let created: CreatedDocument = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| NoteError::unreachable(format!("failed to parse create response: {}", e)))?;

        Ok(note.clone().with_id(created.id))
    }

    async fn update(&self, owner_id: &str, note_id: &str, patch: &NotePatch) -> NoteResult<()> {
        let response = self
            .client
            .patch(self.note_url(owner_id, note_id))
            .json(patch)
            .send()
            .await
            .map_err(transport_error)?;

        Self::check(response).await?;
        Ok(())
    }
}

/// A call observed by [`InMemoryRemoteStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    List { owner_id: String },
    Create { owner_id: String },
    Update {
        owner_id: String,
        note_id: String,
        patch: NotePatch,
    },
}

#[derive(Default)]
struct MemoryState {
    notes: HashMap<String, BTreeMap<String, Note>>,
    unreachable: bool,
    rejected_ids: HashSet<String>,
    failing_ids: HashSet<String>,
    calls: Vec<RemoteCall>,
}

/// Remote store kept in process memory.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make every call fail as if the network were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Make updates of one note fail with a permission error
    pub fn reject_note(&self, note_id: &str) {
        self.state().rejected_ids.insert(note_id.to_string());
    }

    /// Make updates of one note fail with a transient error
    pub fn fail_note(&self, note_id: &str) {
        self.state().failing_ids.insert(note_id.to_string());
    }

    /// Clear per-note failure injection
    pub fn heal_note(&self, note_id: &str) {
        let mut state = self.state();
        state.rejected_ids.remove(note_id);
        state.failing_ids.remove(note_id);
    }

    /// Insert a note directly, bypassing call recording
    pub fn seed(&self, owner_id: &str, note: Note) {
        self.state()
            .notes
            .entry(owner_id.to_string())
            .or_default()
            .insert(note.id.clone(), note);
    }

    pub fn note(&self, owner_id: &str, note_id: &str) -> Option<Note> {
        self.state()
            .notes
            .get(owner_id)
            .and_then(|notes| notes.get(note_id).cloned())
    }

    pub fn notes(&self, owner_id: &str) -> Vec<Note> {
        self.state()
            .notes
            .get(owner_id)
            .map(|notes| notes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    /// Note ids of update calls, in order
    pub fn updated_ids(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                RemoteCall::Update { note_id, .. } => Some(note_id.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn list(&self, owner_id: &str) -> NoteResult<Vec<Note>> {
        let mut state = self.state();
        state.calls.push(RemoteCall::List {
            owner_id: owner_id.to_string(),
        });
        if state.unreachable {
            return Err(NoteError::unreachable("in-memory store is offline"));
        }
        Ok(state
            .notes
            .get(owner_id)
            .map(|notes| notes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, owner_id: &str, note: &NewNote) -> NoteResult<Note> {
        let mut state = self.state();
        state.calls.push(RemoteCall::Create {
            owner_id: owner_id.to_string(),
        });
        if state.unreachable {
            return Err(NoteError::unreachable("in-memory store is offline"));
        }
        let created = note.clone().with_id(Uuid::now_v7().simple().to_string());
        state
            .notes
            .entry(owner_id.to_string())
            .or_default()
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update(&self, owner_id: &str, note_id: &str, patch: &NotePatch) -> NoteResult<()> {
        let mut state = self.state();
        state.calls.push(RemoteCall::Update {
            owner_id: owner_id.to_string(),
            note_id: note_id.to_string(),
            patch: patch.clone(),
        });
        if state.unreachable || state.failing_ids.contains(note_id) {
            return Err(NoteError::unreachable("in-memory store is offline"));
        }
        if state.rejected_ids.contains(note_id) {
            return Err(NoteError::rejected(403, "permission denied"));
        }

        let note = state
            .notes
            .get_mut(owner_id)
            .and_then(|notes| notes.get_mut(note_id))
            .ok_or_else(|| NoteError::rejected(404, format!("no note {}", note_id)))?;

        if let Some(title) = &patch.title {
            note.title = title.clone();
        }
        if let Some(content) = &patch.content {
            note.content = content.clone();
        }
        note.updated_at = patch.updated_at;
        Ok(())
    }
}
