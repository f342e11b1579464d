//! Data models for the sync core.
//!
//! Wire and storage names are camelCase so records round-trip unchanged
//! through the remote document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed key of the singleton user record.
pub const CURRENT_USER_ID: &str = "currentUser";

/// A note as cached locally and stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Identifier assigned by the remote store
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Refreshed on every mutation using the client clock
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Merge partial fields into this snapshot and stamp `updated_at`.
    pub fn merged(&self, changes: &NoteChanges, now: DateTime<Utc>) -> Note {
        Note {
            id: self.id.clone(),
            title: changes.title.clone().unwrap_or_else(|| self.title.clone()),
            content: changes
                .content
                .clone()
                .unwrap_or_else(|| self.content.clone()),
            created_at: self.created_at,
            updated_at: now,
        }
    }
}

/// A note that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewNote {
    /// Create an empty note body stamped with `now`
    pub fn empty(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            content: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the id assigned by the remote store
    pub fn with_id(self, id: impl Into<String>) -> Note {
        Note {
            id: id.into(),
            title: self.title,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Partial edit coming from the UI. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl NoteChanges {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: Some(content.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// Fields sent to the remote store on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NotePatch {
    /// Patch carrying only the edited fields
    pub fn from_changes(changes: &NoteChanges, updated_at: DateTime<Utc>) -> Self {
        Self {
            title: changes.title.clone(),
            content: changes.content.clone(),
            updated_at,
        }
    }

    /// Patch carrying the whole snapshot, used when replaying the queue
    pub fn from_snapshot(note: &Note) -> Self {
        Self {
            title: Some(note.title.clone()),
            content: Some(note.content.clone()),
            updated_at: note.updated_at,
        }
    }
}

/// Kind of queued mutation. Only updates are queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Update,
}

/// A locally applied edit not yet confirmed by the remote store.
///
/// Keyed by note id: a newer edit replaces the queued one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    /// Same as the note id
    pub id: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    /// Latest snapshot of the note
    pub data: Note,
    /// Milliseconds since the epoch, strictly increasing within a queue
    pub timestamp: i64,
    /// Failed drain attempts so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingChange {
    pub fn update(note: Note, timestamp: i64) -> Self {
        Self {
            id: note.id.clone(),
            change_type: ChangeType::Update,
            data: note,
            timestamp,
            attempts: 0,
            last_error: None,
        }
    }
}

/// Mirror of the signed-in identity for offline reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Always `currentUser`
    pub id: String,
    pub uid: String,
    pub email: Option<String>,
}

impl UserRecord {
    pub fn current(uid: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: CURRENT_USER_ID.to_string(),
            uid: uid.into(),
            email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_note() -> Note {
        NewNote::empty("Groceries", Utc::now()).with_id("n1")
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let note = sample_note();
        let later = note.updated_at + chrono::Duration::seconds(5);
        let merged = note.merged(&NoteChanges::content("milk"), later);

        assert_eq!(merged.id, "n1");
        assert_eq!(merged.title, "Groceries");
        assert_eq!(merged.content, "milk");
        assert_eq!(merged.created_at, note.created_at);
        assert_eq!(merged.updated_at, later);
    }

    #[test]
    fn test_note_wire_names() {
        let json = serde_json::to_value(sample_note()).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert!(json.get("created_at").is_none());
    }

    #[test]
    fn test_pending_change_shape() {
        let change = PendingChange::update(sample_note(), 42);
        let json = serde_json::to_value(&change).unwrap();

        assert_eq!(json["id"], "n1");
        assert_eq!(json["type"], "UPDATE");
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["data"]["title"], "Groceries");
        assert!(json.get("lastError").is_none());
    }

    #[test]
    fn test_pending_change_accepts_records_without_attempts() {
        let json = serde_json::json!({
            "id": "n1",
            "type": "UPDATE",
            "data": serde_json::to_value(sample_note()).unwrap(),
            "timestamp": 7
        });
        let change: PendingChange = serde_json::from_value(json).unwrap();
        assert_eq!(change.attempts, 0);
        assert!(change.last_error.is_none());
    }

    #[test]
    fn test_patch_from_changes_only_sends_edited_fields() {
        let patch = NotePatch::from_changes(&NoteChanges::title("New"), Utc::now());
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["title"], "New");
        assert!(json.get("content").is_none());
        assert!(json.get("updatedAt").is_some());
    }

    #[test]
    fn test_user_record_is_singleton_keyed() {
        let user = UserRecord::current("uid-1", Some("a@example.com".into()));
        assert_eq!(user.id, CURRENT_USER_ID);
    }
}
