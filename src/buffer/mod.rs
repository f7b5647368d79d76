pub mod lang;
pub mod notify;
pub mod view_state;

#[cfg(test)]
mod tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::NewDocumentConfig;
use crate::encoding::{Codepage, EolFormat, UniMode};
use crate::engine::DocumentId;
use crate::fsutil;

pub use lang::{LangType, LanguageMap};
pub use notify::{BufferEvent, ChangeBus, ChangeSet};
pub use view_state::{Position, ViewId, ViewState, Views};

/// Process-unique buffer identity; never reused by a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// How a buffer relates to the file it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// In sync with a file on disk
    Regular,
    /// Never saved; has no filesystem identity
    Unnamed,
    /// The file disappeared from disk
    Deleted,
    /// The file changed on disk since it was loaded
    Modified,
}

pub(crate) struct BufferInit<'a> {
    pub id: BufferId,
    pub document: DocumentId,
    pub path: &'a Path,
    pub status: FileStatus,
    pub large_file: bool,
    pub defaults: &'a NewDocumentConfig,
    pub languages: &'a LanguageMap,
    pub bus: ChangeBus,
}

/// One file open for editing: metadata, encoding, file state and per-view state.
///
/// Text lives in the engine document; a buffer only holds its handle.
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    document: DocumentId,
    path: PathBuf,
    name: String,
    lang: LangType,
    lang_explicit: bool,
    eol: EolFormat,
    uni_mode: UniMode,
    codepage: Option<Codepage>,
    dirty: bool,
    user_readonly: bool,
    file_readonly: bool,
    status: FileStatus,
    timestamp: Option<SystemTime>,
    backup_path: Option<PathBuf>,
    /// Edited since the last backup was written
    modified: bool,
    generation: u64,
    needs_lexing: bool,
    needs_reload: bool,
    large_file: bool,
    recent_tag: u64,
    views: Views,
    bus: ChangeBus,
    can_notify: bool,
}

impl Buffer {
    pub(crate) fn new(init: BufferInit<'_>) -> Self {
        let mut buffer = Self {
            id: init.id,
            document: init.document,
            path: PathBuf::new(),
            name: String::new(),
            lang: if init.large_file { LangType::Text } else { init.defaults.lang.clone() },
            lang_explicit: false,
            eol: init.defaults.eol_format,
            uni_mode: init.defaults.uni_mode,
            codepage: init.defaults.codepage,
            dirty: false,
            user_readonly: false,
            file_readonly: false,
            status: init.status,
            timestamp: None,
            backup_path: None,
            modified: false,
            generation: 0,
            needs_lexing: true,
            needs_reload: false,
            large_file: init.large_file,
            recent_tag: 0,
            views: Views::new(),
            bus: init.bus,
            can_notify: false,
        };

        let default_lang = init.defaults.lang.clone();
        buffer.set_file_name(init.path, &default_lang, init.languages);
        if buffer.status != FileStatus::Unnamed {
            buffer.file_readonly = fsutil::is_readonly(&buffer.path);
        }
        buffer.can_notify = true;
        buffer
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn document(&self) -> DocumentId {
        self.document
    }

    pub fn full_path(&self) -> &Path {
        &self.path
    }

    /// Display name: the last path component
    pub fn file_name(&self) -> &str {
        &self.name
    }

    pub fn lang_type(&self) -> &LangType {
        &self.lang
    }

    pub fn eol_format(&self) -> EolFormat {
        self.eol
    }

    pub fn uni_mode(&self) -> UniMode {
        self.uni_mode
    }

    /// Explicit codepage; `None` means the Unicode mode decides
    pub fn encoding(&self) -> Option<Codepage> {
        self.codepage
    }

    /// Codepage number, or -1 when the Unicode mode decides
    pub fn encoding_id(&self) -> i32 {
        self.codepage.map_or(-1, |cp| i32::from(cp.0))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_user_readonly(&self) -> bool {
        self.user_readonly
    }

    pub fn is_file_readonly(&self) -> bool {
        self.file_readonly
    }

    pub fn is_readonly(&self) -> bool {
        self.user_readonly || self.file_readonly
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn is_untitled(&self) -> bool {
        self.status == FileStatus::Unnamed
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    /// True when there are edits no backup has captured yet
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Bumped on every edit; lets an asynchronous backup tell whether it is stale
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn needs_lexing(&self) -> bool {
        self.needs_lexing
    }

    pub fn needs_reload(&self) -> bool {
        self.needs_reload
    }

    pub fn is_large_file(&self) -> bool {
        self.large_file
    }

    pub fn recent_tag(&self) -> u64 {
        self.recent_tag
    }

    /// Size of the file on disk, if it exists
    pub fn file_length(&self) -> Option<u64> {
        if self.is_untitled() {
            return None;
        }
        fsutil::file_size(&self.path).ok()
    }

    /// Point the buffer at `path`, inferring the language from the name.
    ///
    /// Setting the current path again only refreshes the timestamp.
    pub fn set_file_name(&mut self, path: &Path, default_lang: &LangType, languages: &LanguageMap) {
        if !self.path.as_os_str().is_empty() && self.path == path {
            self.update_timestamp();
            return;
        }

        self.path = path.to_path_buf();
        self.name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let mut changes = ChangeSet::FILE_NAME | ChangeSet::TIMESTAMP;
        if !self.large_file && !self.lang_explicit {
            let lang = languages.detect(path, default_lang);
            if lang != self.lang {
                self.lang = lang;
                self.needs_lexing = true;
                changes |= ChangeSet::LANGUAGE | ChangeSet::LEXING;
            }
        }

        if self.status != FileStatus::Unnamed {
            self.timestamp = fsutil::modified_time(&self.path);
        }
        self.notify(changes);
    }

    /// Compare against the filesystem and move to the status it implies.
    ///
    /// Returns true whenever a notification fired, including when only the
    /// read-only attribute changed.
    pub fn check_file_state(&mut self) -> bool {
        if self.status == FileStatus::Unnamed {
            return false;
        }

        let exists = fsutil::exists(&self.path);
        match self.status {
            FileStatus::Regular | FileStatus::Modified if !exists => {
                self.status = FileStatus::Deleted;
                self.file_readonly = false;
                self.dirty = true;
                self.timestamp = None;
                self.notify(ChangeSet::STATUS | ChangeSet::READ_ONLY | ChangeSet::TIMESTAMP | ChangeSet::DIRTY);
                true
            }
            FileStatus::Deleted if exists => {
                self.status = FileStatus::Modified;
                self.file_readonly = fsutil::is_readonly(&self.path);
                self.timestamp = fsutil::modified_time(&self.path);
                self.notify(ChangeSet::STATUS | ChangeSet::READ_ONLY | ChangeSet::TIMESTAMP);
                true
            }
            FileStatus::Regular | FileStatus::Modified => {
                let mut changes = ChangeSet::empty();

                let readonly = fsutil::is_readonly(&self.path);
                if readonly != self.file_readonly {
                    self.file_readonly = readonly;
                    changes |= ChangeSet::READ_ONLY;
                }

                let timestamp = fsutil::modified_time(&self.path);
                if timestamp != self.timestamp {
                    self.timestamp = timestamp;
                    changes |= ChangeSet::TIMESTAMP;
                }

                if changes.is_empty() {
                    return false;
                }
                // the status may already be Modified; it still re-fires
                self.status = FileStatus::Modified;
                self.notify(changes | ChangeSet::STATUS);
                true
            }
            FileStatus::Deleted | FileStatus::Unnamed => false,
        }
    }

    /// Re-read the on-disk timestamp, firing Timestamp if it moved
    pub fn update_timestamp(&mut self) {
        let timestamp = fsutil::modified_time(&self.path);
        if timestamp != self.timestamp {
            self.timestamp = timestamp;
            self.notify(ChangeSet::TIMESTAMP);
        }
    }

    /// Force a known timestamp, as when restoring a session
    pub fn set_timestamp(&mut self, timestamp: Option<SystemTime>) {
        if timestamp != self.timestamp {
            self.timestamp = timestamp;
            self.notify(ChangeSet::TIMESTAMP);
        }
    }

    /// Register a view; registering twice is a no-op.
    ///
    /// Returns the number of views referencing the buffer afterwards.
    pub fn add_reference(&mut self, view: ViewId) -> usize {
        self.views.add(view);
        self.views.len()
    }

    /// Returns the remaining view count; zero means the buffer is unreferenced
    pub fn remove_reference(&mut self, view: ViewId) -> usize {
        self.views.remove(view);
        self.views.len()
    }

    pub fn reference_count(&self) -> usize {
        self.views.len()
    }

    pub fn views(&self) -> &Views {
        &self.views
    }

    pub(crate) fn views_mut(&mut self) -> &mut Views {
        &mut self.views
    }

    pub fn position(&self, view: ViewId) -> Option<Position> {
        self.views.get(view).map(|state| state.position)
    }

    /// Remember where `view` was; ignored for views that do not reference the buffer
    pub fn set_position(&mut self, view: ViewId, position: Position) {
        if let Some(state) = self.views.get_mut(view) {
            state.position = position;
        }
    }

    pub fn fold_state(&self, view: ViewId) -> Option<&[usize]> {
        self.views.get(view).map(|state| state.folds.as_slice())
    }

    pub fn set_fold_state(&mut self, view: ViewId, folds: Vec<usize>) {
        if let Some(state) = self.views.get_mut(view) {
            state.folds = folds;
        }
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
        self.notify(ChangeSet::DIRTY);
    }

    /// A reload is pending: not user-authored damage, so dirty is cleared
    pub fn set_deferred_reload(&mut self) {
        self.dirty = false;
        self.needs_reload = true;
        self.notify(ChangeSet::DIRTY);
    }

    pub fn set_encoding(&mut self, codepage: Option<Codepage>) {
        self.codepage = codepage;
        self.notify(ChangeSet::UNICODE | ChangeSet::DIRTY);
    }

    pub fn set_unicode_mode(&mut self, mode: UniMode) {
        self.uni_mode = mode;
        self.notify(ChangeSet::UNICODE | ChangeSet::DIRTY);
    }

    pub fn set_eol_format(&mut self, eol: EolFormat) {
        self.eol = eol;
        self.notify(ChangeSet::FORMAT);
    }

    /// Choose a language explicitly; file-name inference will not override it
    pub fn set_lang_type(&mut self, lang: LangType) {
        self.lang_explicit = true;
        if lang == self.lang {
            return;
        }
        self.lang = lang;
        self.needs_lexing = true;
        self.notify(ChangeSet::LANGUAGE | ChangeSet::LEXING);
    }

    pub fn set_needs_lexing(&mut self, needs_lexing: bool) {
        self.needs_lexing = needs_lexing;
        self.notify(ChangeSet::LEXING);
    }

    pub fn set_user_readonly(&mut self, readonly: bool) {
        self.user_readonly = readonly;
        self.notify(ChangeSet::READ_ONLY);
    }

    pub fn set_file_readonly(&mut self, readonly: bool) {
        self.file_readonly = readonly;
        self.notify(ChangeSet::READ_ONLY);
    }

    pub(crate) fn set_recent_tag(&mut self, tag: u64) {
        self.recent_tag = tag;
        self.notify(ChangeSet::RECENT_TAG);
    }

    pub(crate) fn set_status(&mut self, status: FileStatus) {
        if self.status != status {
            self.status = status;
            self.notify(ChangeSet::STATUS);
        }
    }

    pub(crate) fn set_backup_path(&mut self, path: Option<PathBuf>) {
        self.backup_path = path;
    }

    pub(crate) fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Record an edit; `dirty` says whether the text now differs from the saved state
    pub(crate) fn record_edit(&mut self, dirty: bool) {
        self.modified = true;
        self.generation += 1;
        if self.dirty != dirty {
            self.set_dirty(dirty);
        }
    }

    pub(crate) fn clear_needs_reload(&mut self) {
        self.needs_reload = false;
    }

    /// Language sniffed from content applies only while nothing better is known
    pub(crate) fn apply_sniffed_lang(&mut self, lang: LangType) {
        if self.large_file || self.lang_explicit || self.lang != LangType::Text {
            return;
        }
        self.lang = lang;
        self.needs_lexing = true;
        self.notify(ChangeSet::LANGUAGE | ChangeSet::LEXING);
    }

    pub(crate) fn notifications_enabled(&self) -> bool {
        self.can_notify
    }

    pub(crate) fn set_notifications_enabled(&mut self, enabled: bool) {
        self.can_notify = enabled;
    }

    pub(crate) fn notify(&self, changes: ChangeSet) {
        if self.can_notify && !changes.is_empty() {
            self.bus.publish(BufferEvent {
                id: self.id,
                changes,
            });
        }
    }
}
