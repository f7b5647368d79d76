use ropey::Rope;
use std::collections::HashMap;
use std::ops::Range;

use super::history::{Edit, History};
use super::{DocumentId, EngineStatus, TextEngine};
use crate::error::EngineError;

#[derive(Debug, Default)]
struct Document {
    text: Rope,
    refs: usize,
    read_only: bool,
    history: History,
}

/// In-memory [`TextEngine`] backed by `ropey`
#[derive(Debug, Default)]
pub struct RopeEngine {
    docs: HashMap<DocumentId, Document>,
    next_id: u64,
    current: Option<DocumentId>,
    status: EngineStatus,
    /// Appends allowed before the engine starts failing
    append_budget: Option<usize>,
    /// Largest allocation request that succeeds
    capacity_limit: Option<usize>,
}

impl RopeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append after the first `appends` fail
    pub fn fail_after_appends(&mut self, appends: usize) {
        self.append_budget = Some(appends);
    }

    /// Make allocations larger than `bytes` fail with `BadAlloc`
    pub fn limit_capacity(&mut self, bytes: usize) {
        self.capacity_limit = Some(bytes);
    }

    /// Number of live documents
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    fn doc(&self, doc: DocumentId) -> Result<&Document, EngineError> {
        self.docs.get(&doc).ok_or(EngineError::UnknownDocument)
    }

    fn doc_mut(&mut self, doc: DocumentId) -> Result<&mut Document, EngineError> {
        self.docs.get_mut(&doc).ok_or(EngineError::UnknownDocument)
    }

    fn writable(&mut self, doc: DocumentId) -> Result<&mut Document, EngineError> {
        let document = self.doc_mut(doc)?;
        if document.read_only {
            return Err(EngineError::ReadOnly);
        }
        Ok(document)
    }

    fn current_mut(&mut self) -> Result<&mut Document, EngineError> {
        let doc = self.current.ok_or(EngineError::UnknownDocument)?;
        self.doc_mut(doc)
    }
}

impl TextEngine for RopeEngine {
    fn create_document(&mut self) -> DocumentId {
        let id = DocumentId(self.next_id);
        self.next_id += 1;
        self.docs.insert(id, Document { refs: 1, ..Document::default() });
        id
    }

    fn add_ref(&mut self, doc: DocumentId) -> Result<usize, EngineError> {
        let document = self.doc_mut(doc)?;
        document.refs += 1;
        Ok(document.refs)
    }

    fn release(&mut self, doc: DocumentId) -> Result<usize, EngineError> {
        let document = self.doc_mut(doc)?;
        document.refs -= 1;
        let remaining = document.refs;
        if remaining == 0 {
            self.docs.remove(&doc);
            if self.current == Some(doc) {
                self.current = None;
            }
        }
        Ok(remaining)
    }

    fn ref_count(&self, doc: DocumentId) -> usize {
        self.docs.get(&doc).map_or(0, |d| d.refs)
    }

    fn current(&self) -> Option<DocumentId> {
        self.current
    }

    fn set_current(&mut self, doc: DocumentId) -> Result<(), EngineError> {
        self.doc(doc)?;
        self.current = Some(doc);
        Ok(())
    }

    fn clear_all(&mut self) -> Result<(), EngineError> {
        let document = self.current_mut()?;
        if document.read_only {
            return Err(EngineError::ReadOnly);
        }
        document.text = Rope::new();
        document.history.clear();
        Ok(())
    }

    fn allocate(&mut self, bytes: usize) -> Result<(), EngineError> {
        self.current_mut()?;
        if self.capacity_limit.is_some_and(|limit| bytes > limit) {
            self.status = EngineStatus::BadAlloc;
            return Err(EngineError::BadAlloc);
        }
        Ok(())
    }

    fn append(&mut self, text: &str) -> Result<(), EngineError> {
        self.status.into_result()?;
        if let Some(budget) = self.append_budget.as_mut() {
            if *budget == 0 {
                self.status = EngineStatus::Failure;
                return Err(EngineError::Failure);
            }
            *budget -= 1;
        }

        let document = self.current_mut()?;
        if document.read_only {
            return Err(EngineError::ReadOnly);
        }
        let end = document.text.len_chars();
        document.text.insert(end, text);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.current
            .and_then(|doc| self.docs.get(&doc))
            .is_some_and(|d| d.read_only)
    }

    fn set_read_only(&mut self, read_only: bool) {
        if let Ok(document) = self.current_mut() {
            document.read_only = read_only;
        }
    }

    fn status(&self) -> EngineStatus {
        self.status
    }

    fn clear_status(&mut self) {
        self.status = EngineStatus::Ok;
    }

    fn snapshot(&self, doc: DocumentId) -> Result<Rope, EngineError> {
        Ok(self.doc(doc)?.text.clone())
    }

    fn length(&self, doc: DocumentId) -> Result<usize, EngineError> {
        Ok(self.doc(doc)?.text.len_bytes())
    }

    fn set_save_point(&mut self, doc: DocumentId) -> Result<(), EngineError> {
        self.doc_mut(doc)?.history.set_save_point();
        Ok(())
    }

    fn is_modified(&self, doc: DocumentId) -> Result<bool, EngineError> {
        Ok(!self.doc(doc)?.history.is_at_save_point())
    }

    fn empty_undo_buffer(&mut self, doc: DocumentId) -> Result<(), EngineError> {
        self.doc_mut(doc)?.history.clear();
        Ok(())
    }

    fn transfer_text(&mut self, from: DocumentId, into: DocumentId) -> Result<(), EngineError> {
        self.doc(into)?;
        let text = std::mem::take(&mut self.doc_mut(from)?.text);
        let target = self.doc_mut(into)?;
        target.text = text;
        target.history.clear();
        Ok(())
    }

    fn insert(&mut self, doc: DocumentId, char_idx: usize, text: &str) -> Result<(), EngineError> {
        let document = self.writable(doc)?;
        let at = char_idx.min(document.text.len_chars());
        document.text.insert(at, text);
        document.history.push(Edit::insert(at, text));
        Ok(())
    }

    fn delete(&mut self, doc: DocumentId, chars: Range<usize>) -> Result<(), EngineError> {
        let document = self.writable(doc)?;
        let len = document.text.len_chars();
        let start = chars.start.min(len);
        let end = chars.end.min(len);
        if start >= end {
            return Ok(());
        }

        let removed = document.text.slice(start..end).to_string();
        document.text.remove(start..end);
        document.history.push(Edit::delete(start, removed));
        Ok(())
    }

    fn undo(&mut self, doc: DocumentId) -> Result<bool, EngineError> {
        let document = self.writable(doc)?;
        Ok(document.history.undo(&mut document.text))
    }

    fn redo(&mut self, doc: DocumentId) -> Result<bool, EngineError> {
        let document = self.writable(doc)?;
        Ok(document.history.redo(&mut document.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_counting() {
        let mut engine = RopeEngine::new();
        let doc = engine.create_document();
        assert_eq!(engine.ref_count(doc), 1);
        assert_eq!(engine.add_ref(doc), Ok(2));
        assert_eq!(engine.release(doc), Ok(1));
        assert_eq!(engine.release(doc), Ok(0));
        assert_eq!(engine.ref_count(doc), 0);
        assert_eq!(engine.release(doc), Err(EngineError::UnknownDocument));
    }

    #[test]
    fn test_releasing_current_document_clears_current() {
        let mut engine = RopeEngine::new();
        let doc = engine.create_document();
        engine.set_current(doc).unwrap();
        engine.release(doc).unwrap();
        assert_eq!(engine.current(), None);
        assert_eq!(engine.append("x"), Err(EngineError::UnknownDocument));
    }

    #[test]
    fn test_append_goes_to_current_document() {
        let mut engine = RopeEngine::new();
        let a = engine.create_document();
        let b = engine.create_document();

        engine.set_current(b).unwrap();
        engine.append("hello ").unwrap();
        engine.append("world").unwrap();

        assert_eq!(engine.snapshot(b).unwrap().to_string(), "hello world");
        assert_eq!(engine.length(a), Ok(0));
        assert_eq!(engine.length(b), Ok(11));
    }

    #[test]
    fn test_read_only_blocks_append() {
        let mut engine = RopeEngine::new();
        let doc = engine.create_document();
        engine.set_current(doc).unwrap();
        engine.set_read_only(true);
        assert!(engine.is_read_only());
        assert_eq!(engine.append("x"), Err(EngineError::ReadOnly));
        assert_eq!(engine.insert(doc, 0, "x"), Err(EngineError::ReadOnly));
    }

    #[test]
    fn test_fault_injection_is_sticky() {
        let mut engine = RopeEngine::new();
        let doc = engine.create_document();
        engine.set_current(doc).unwrap();
        engine.fail_after_appends(1);

        engine.append("ok").unwrap();
        assert_eq!(engine.append("no"), Err(EngineError::Failure));
        assert_eq!(engine.status(), EngineStatus::Failure);
        assert_eq!(engine.append("still no"), Err(EngineError::Failure));

        engine.clear_status();
        assert_eq!(engine.status(), EngineStatus::Ok);
    }

    #[test]
    fn test_allocation_limit() {
        let mut engine = RopeEngine::new();
        let doc = engine.create_document();
        engine.set_current(doc).unwrap();
        engine.limit_capacity(100);
        assert!(engine.allocate(100).is_ok());
        assert_eq!(engine.allocate(101), Err(EngineError::BadAlloc));
        assert_eq!(engine.status(), EngineStatus::BadAlloc);
    }

    #[test]
    fn test_edits_track_save_point() {
        let mut engine = RopeEngine::new();
        let doc = engine.create_document();
        assert_eq!(engine.is_modified(doc), Ok(false));

        engine.insert(doc, 0, "abc").unwrap();
        assert_eq!(engine.is_modified(doc), Ok(true));

        engine.set_save_point(doc).unwrap();
        assert_eq!(engine.is_modified(doc), Ok(false));

        engine.delete(doc, 1..2).unwrap();
        assert_eq!(engine.snapshot(doc).unwrap().to_string(), "ac");
        assert_eq!(engine.undo(doc), Ok(true));
        assert_eq!(engine.is_modified(doc), Ok(false));
    }

    #[test]
    fn test_transfer_text_replaces_target() {
        let mut engine = RopeEngine::new();
        let staging = engine.create_document();
        let doc = engine.create_document();
        engine.insert(doc, 0, "old").unwrap();
        engine.set_current(doc).unwrap();
        engine.set_read_only(true);

        engine.set_current(staging).unwrap();
        engine.append("new text").unwrap();
        engine.transfer_text(staging, doc).unwrap();

        assert_eq!(engine.snapshot(doc).unwrap().to_string(), "new text");
        assert_eq!(engine.length(staging), Ok(0));
        engine.set_current(doc).unwrap();
        assert!(engine.is_read_only());
        engine.set_read_only(false);
        assert_eq!(engine.undo(doc), Ok(false));
    }
}
