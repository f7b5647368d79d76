use indexmap::IndexMap;
use std::fmt;

/// Identity of an editor view that can display a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub u32);

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Where a view was looking in a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Caret char index
    pub caret: usize,
    /// Selection anchor char index (equal to `caret` when nothing is selected)
    pub anchor: usize,
    /// First visible line (0-indexed)
    pub first_visible_line: usize,
    /// Horizontal scroll offset in columns
    pub x_offset: usize,
}

impl Position {
    pub fn at(caret: usize) -> Self {
        Self {
            caret,
            anchor: caret,
            ..Self::default()
        }
    }

    pub fn has_selection(&self) -> bool {
        self.caret != self.anchor
    }

    /// Clamp every offset into a document of `len_chars` chars
    pub fn clamp(&mut self, len_chars: usize) {
        self.caret = self.caret.min(len_chars);
        self.anchor = self.anchor.min(len_chars);
    }
}

/// Everything a buffer remembers for one view
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewState {
    pub position: Position,
    /// Header lines of collapsed folds
    pub folds: Vec<usize>,
}

/// Per-view state keyed by view; a view is either fully registered or absent
#[derive(Debug, Clone, Default)]
pub struct Views {
    map: IndexMap<ViewId, ViewState>,
}

impl Views {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `view`; returns false if it was already registered
    pub fn add(&mut self, view: ViewId) -> bool {
        if self.map.contains_key(&view) {
            return false;
        }
        self.map.insert(view, ViewState::default());
        true
    }

    /// Forget `view`; returns false if it was not registered
    pub fn remove(&mut self, view: ViewId) -> bool {
        self.map.shift_remove(&view).is_some()
    }

    pub fn contains(&self, view: ViewId) -> bool {
        self.map.contains_key(&view)
    }

    pub fn get(&self, view: ViewId) -> Option<&ViewState> {
        self.map.get(&view)
    }

    pub fn get_mut(&mut self, view: ViewId) -> Option<&mut ViewState> {
        self.map.get_mut(&view)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.map.keys().copied()
    }

    /// Clamp every view's position after the document shrank
    pub fn clamp_positions(&mut self, len_chars: usize) {
        for state in self.map.values_mut() {
            state.position.clamp(len_chars);
        }
    }
}
