pub mod history;
pub mod rope;

use ropey::Rope;
use std::fmt;
use std::ops::Range;

use crate::error::EngineError;

pub use rope::RopeEngine;

/// Handle to a document owned by a [`TextEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub(crate) u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Sticky error state of the engine, checked after bulk operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineStatus {
    #[default]
    Ok,
    Failure,
    BadAlloc,
}

impl EngineStatus {
    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            EngineStatus::Ok => Ok(()),
            EngineStatus::Failure => Err(EngineError::Failure),
            EngineStatus::BadAlloc => Err(EngineError::BadAlloc),
        }
    }
}

/// The editing component that actually stores text.
///
/// Documents are reference counted: `create_document` returns a document with
/// one reference and `release` destroys it when the count reaches zero. Bulk
/// loading goes through the *current* document (`clear_all`, `allocate`,
/// `append`, read-only flag); everything else addresses a document directly.
/// Text is UTF-8; lengths are in bytes, edit positions in chars.
pub trait TextEngine {
    fn create_document(&mut self) -> DocumentId;
    /// Returns the new reference count
    fn add_ref(&mut self, doc: DocumentId) -> Result<usize, EngineError>;
    /// Returns the remaining reference count; zero means the document is gone
    fn release(&mut self, doc: DocumentId) -> Result<usize, EngineError>;
    /// Zero for unknown documents
    fn ref_count(&self, doc: DocumentId) -> usize;

    fn current(&self) -> Option<DocumentId>;
    fn set_current(&mut self, doc: DocumentId) -> Result<(), EngineError>;

    fn clear_all(&mut self) -> Result<(), EngineError>;
    /// Reserve room for `bytes` of text in the current document
    fn allocate(&mut self, bytes: usize) -> Result<(), EngineError>;
    fn append(&mut self, text: &str) -> Result<(), EngineError>;
    fn is_read_only(&self) -> bool;
    fn set_read_only(&mut self, read_only: bool);
    fn status(&self) -> EngineStatus;
    fn clear_status(&mut self);

    fn snapshot(&self, doc: DocumentId) -> Result<Rope, EngineError>;
    /// Length in bytes
    fn length(&self, doc: DocumentId) -> Result<usize, EngineError>;
    fn set_save_point(&mut self, doc: DocumentId) -> Result<(), EngineError>;
    /// True when the document differs from its save point
    fn is_modified(&self, doc: DocumentId) -> Result<bool, EngineError>;
    fn empty_undo_buffer(&mut self, doc: DocumentId) -> Result<(), EngineError>;
    /// Move the text of `from` into `into`, replacing it and clearing its
    /// history. `from` is left empty. The read-only flag of `into` is kept
    /// but does not block the move.
    fn transfer_text(&mut self, from: DocumentId, into: DocumentId) -> Result<(), EngineError>;

    fn insert(&mut self, doc: DocumentId, char_idx: usize, text: &str) -> Result<(), EngineError>;
    fn delete(&mut self, doc: DocumentId, chars: Range<usize>) -> Result<(), EngineError>;
    /// Returns false when there was nothing to undo
    fn undo(&mut self, doc: DocumentId) -> Result<bool, EngineError>;
    fn redo(&mut self, doc: DocumentId) -> Result<bool, EngineError>;
}
