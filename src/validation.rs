//! Input validation for the sync core.
//!
//! All validators return NoteError::Validation on failure.

use crate::error::{NoteError, NoteResult};

pub const MAX_ID_LENGTH: usize = 256;
pub const MAX_TITLE_LENGTH: usize = 1_000;
pub const MAX_NOTE_CONTENT_LENGTH: usize = 1_000_000;

fn validate_id(value: &str, field_name: &str) -> NoteResult<()> {
    if value.trim().is_empty() {
        return Err(NoteError::validation(field_name, "must not be empty"));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(NoteError::validation(
            field_name,
            format!("must be at most {} bytes", MAX_ID_LENGTH),
        ));
    }
    // Ids become path segments of remote document paths
    if value.contains('/') {
        return Err(NoteError::validation(field_name, "must not contain '/'"));
    }
    Ok(())
}

/// Validate an owner scope (authenticated user id)
pub fn validate_owner_id(owner_id: &str) -> NoteResult<()> {
    validate_id(owner_id, "owner_id")
}

/// Validate a note id
pub fn validate_note_id(note_id: &str) -> NoteResult<()> {
    validate_id(note_id, "note_id")
}

/// Validate a note title
pub fn validate_title(title: &str) -> NoteResult<()> {
    if title.len() > MAX_TITLE_LENGTH {
        return Err(NoteError::validation(
            "title",
            format!("must be at most {} bytes", MAX_TITLE_LENGTH),
        ));
    }
    Ok(())
}

/// Validate note content. Empty content is allowed.
pub fn validate_content(content: &str) -> NoteResult<()> {
    if content.len() > MAX_NOTE_CONTENT_LENGTH {
        return Err(NoteError::validation(
            "content",
            format!("must be at most {} bytes", MAX_NOTE_CONTENT_LENGTH),
        ));
    }
    Ok(())
}
