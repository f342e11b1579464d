//! Error types for the sync core.
//!
//! Remote failures are split into retryable (`RemoteUnreachable`) and
//! terminal (`RemoteRejected`).

use thiserror::Error;

/// Result type alias for sync core operations
pub type NoteResult<T> = Result<T, NoteError>;

/// Main error type for sync core operations
#[derive(Error, Debug)]
pub enum NoteError {
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Remote store unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Remote store rejected request ({status}): {message}")]
    RemoteRejected { status: u16, message: String },

    #[error("Failed to apply pending change for note {note_id}: {message}")]
    DrainEntryFailed { note_id: String, message: String },

    #[error("Offline: {0}")]
    Offline(String),

    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NoteError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NoteError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new storage initialization error
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        NoteError::StorageUnavailable(message.into())
    }

    /// Create a new transport-level remote error
    pub fn unreachable(message: impl Into<String>) -> Self {
        NoteError::RemoteUnreachable(message.into())
    }

    /// Create a new remote business error
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        NoteError::RemoteRejected {
            status,
            message: message.into(),
        }
    }

    /// Whether a later attempt of the same remote call may succeed.
    ///
    /// Only transport failures qualify; everything else either needs a
    /// different request or a human.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NoteError::RemoteUnreachable(_))
    }
}
