use ropey::Rope;
use std::time::Instant;

/// A single change to a document, addressed in chars
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    /// Char index where the edit occurred
    pub offset: usize,
    /// Text before the edit
    pub old_text: String,
    /// Text after the edit
    pub new_text: String,
}

impl Edit {
    pub fn insert(offset: usize, text: &str) -> Self {
        Self {
            offset,
            old_text: String::new(),
            new_text: text.to_string(),
        }
    }

    pub fn delete(offset: usize, removed: String) -> Self {
        Self {
            offset,
            old_text: removed,
            new_text: String::new(),
        }
    }

    /// Get the reverse edit (for undo)
    pub fn reverse(&self) -> Self {
        Self {
            offset: self.offset,
            old_text: self.new_text.clone(),
            new_text: self.old_text.clone(),
        }
    }

    fn apply(&self, rope: &mut Rope) {
        let old_chars = self.old_text.chars().count();
        if old_chars > 0 {
            rope.remove(self.offset..self.offset + old_chars);
        }
        if !self.new_text.is_empty() {
            rope.insert(self.offset, &self.new_text);
        }
    }
}

/// Edits that are undone/redone together
#[derive(Debug, Clone)]
struct EditGroup {
    edits: Vec<Edit>,
}

impl EditGroup {
    fn apply(&self, rope: &mut Rope) {
        for edit in &self.edits {
            edit.apply(rope);
        }
    }

    fn apply_reverse(&self, rope: &mut Rope) {
        for edit in self.edits.iter().rev() {
            edit.reverse().apply(rope);
        }
    }
}

/// Undo/redo stack with time-based grouping and a save point
#[derive(Debug)]
pub struct History {
    stack: Vec<EditGroup>,
    redo_stack: Vec<EditGroup>,
    current_group: Vec<Edit>,
    max_size: usize,
    group_start_time: Option<Instant>,
    group_timeout_ms: u64,
    /// Depth of `stack` when the document was last saved; `None` once unreachable
    save_point: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            redo_stack: Vec::new(),
            current_group: Vec::new(),
            max_size: 1000,
            group_start_time: None,
            group_timeout_ms: 1000,
            save_point: Some(0),
        }
    }

    /// Record an edit that has already been applied to the document
    pub fn push(&mut self, edit: Edit) {
        if let Some(start_time) = self.group_start_time {
            if start_time.elapsed().as_millis() > self.group_timeout_ms as u128 {
                self.commit_group();
            }
        }

        if self.group_start_time.is_none() {
            self.group_start_time = Some(Instant::now());
        }

        self.current_group.push(edit);

        if !self.redo_stack.is_empty() {
            self.redo_stack.clear();
            // the saved state lived in the discarded redo branch
            if self.save_point.is_some_and(|depth| depth > self.stack.len()) {
                self.save_point = None;
            }
        }
    }

    /// Close the current group so the next edit starts a new one
    pub fn end_group(&mut self) {
        self.commit_group();
    }

    fn commit_group(&mut self) {
        self.group_start_time = None;
        if self.current_group.is_empty() {
            return;
        }

        let edits = std::mem::take(&mut self.current_group);
        self.stack.push(EditGroup { edits });

        if self.stack.len() > self.max_size {
            self.stack.remove(0);
            self.save_point = self.save_point.and_then(|depth| depth.checked_sub(1));
        }
    }

    /// Undo the last edit group. Returns false when there is nothing to undo.
    pub fn undo(&mut self, rope: &mut Rope) -> bool {
        self.commit_group();

        if let Some(group) = self.stack.pop() {
            group.apply_reverse(rope);
            self.redo_stack.push(group);
            true
        } else {
            false
        }
    }

    /// Redo the last undone edit group
    pub fn redo(&mut self, rope: &mut Rope) -> bool {
        self.commit_group();

        if let Some(group) = self.redo_stack.pop() {
            group.apply(rope);
            self.stack.push(group);
            true
        } else {
            false
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.stack.is_empty() || !self.current_group.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Mark the current state as the saved one
    pub fn set_save_point(&mut self) {
        self.commit_group();
        self.save_point = Some(self.stack.len());
    }

    pub fn is_at_save_point(&self) -> bool {
        self.current_group.is_empty() && self.save_point == Some(self.stack.len())
    }

    /// Forget all history; the current state becomes the save point
    pub fn clear(&mut self) {
        self.stack.clear();
        self.redo_stack.clear();
        self.current_group.clear();
        self.group_start_time = None;
        self.save_point = Some(0);
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit_insert(rope: &mut Rope, history: &mut History, at: usize, text: &str) {
        rope.insert(at, text);
        history.push(Edit::insert(at, text));
    }

    #[test]
    fn test_undo_redo_restores_text() {
        let mut rope = Rope::from_str("hello");
        let mut history = History::new();

        edit_insert(&mut rope, &mut history, 5, " world");
        assert!(history.undo(&mut rope));
        assert_eq!(rope.to_string(), "hello");
        assert!(history.redo(&mut rope));
        assert_eq!(rope.to_string(), "hello world");
    }

    #[test]
    fn test_delete_with_multibyte_text() {
        let mut rope = Rope::from_str("añb");
        let mut history = History::new();

        let removed = rope.slice(1..2).to_string();
        rope.remove(1..2);
        history.push(Edit::delete(1, removed));
        assert_eq!(rope.to_string(), "ab");

        history.undo(&mut rope);
        assert_eq!(rope.to_string(), "añb");
    }

    #[test]
    fn test_save_point_tracking() {
        let mut rope = Rope::new();
        let mut history = History::new();
        assert!(history.is_at_save_point());

        edit_insert(&mut rope, &mut history, 0, "a");
        assert!(!history.is_at_save_point());

        history.undo(&mut rope);
        assert!(history.is_at_save_point());

        history.redo(&mut rope);
        history.set_save_point();
        assert!(history.is_at_save_point());
    }

    #[test]
    fn test_new_edit_after_undo_past_save_point() {
        let mut rope = Rope::new();
        let mut history = History::new();

        edit_insert(&mut rope, &mut history, 0, "a");
        history.set_save_point();
        history.undo(&mut rope);

        edit_insert(&mut rope, &mut history, 0, "b");
        history.end_group();
        history.undo(&mut rope);
        // back at depth 0, but the saved text was "a"
        assert!(!history.is_at_save_point());
    }

    #[test]
    fn test_undo_with_empty_history() {
        let mut rope = Rope::from_str("x");
        let mut history = History::new();
        assert!(!history.undo(&mut rope));
        assert!(!history.can_undo());
        assert!(!history.can_redo());
    }
}
