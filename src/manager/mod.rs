pub mod backup;
pub mod backup_worker;
pub mod load;
pub mod save;

use chrono::Local;
use crossbeam::channel::Receiver;
use indexmap::IndexMap;
use ropey::Rope;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::buffer::{
    Buffer, BufferEvent, BufferId, BufferInit, ChangeBus, ChangeSet, FileStatus, LangType, LanguageMap, ViewId,
};
use crate::config::Config;
use crate::engine::{DocumentId, RopeEngine, TextEngine};
use crate::error::{BackupError, EngineError, FileError, LoadError, SaveError};
use crate::fsutil;

pub use backup::{BackupGate, BackupJob, BackupOutcome, BackupPlan, BackupReceipt, GateGuard};
pub use backup_worker::{BackupMessage, BackupResponse, BackupWorker};
pub use load::LoadOptions;
pub use save::{EncodeTarget, SaveMode};

use load::{stream_into, LoadedFormat};
use save::write_rope;

/// Which buffers [`FileManager::check_filesystem_changes`] looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckScope {
    All,
    Active,
}

/// Registry of open buffers and the pipelines that load, save and back them up.
///
/// The manager keeps one engine reference on every buffer's document, and each
/// view referencing the buffer adds one more. A hidden scratch document is the
/// engine's current document whenever no streaming operation is running.
pub struct FileManager<E: TextEngine = RopeEngine> {
    engine: E,
    config: Config,
    languages: LanguageMap,
    buffers: IndexMap<BufferId, Buffer>,
    next_id: u64,
    next_untitled: u32,
    scratch: DocumentId,
    bus: ChangeBus,
    gate: BackupGate,
    active: Option<BufferId>,
    recent_tag: u64,
}

impl FileManager<RopeEngine> {
    pub fn new(config: Config) -> Self {
        Self::with_engine(RopeEngine::new(), config)
    }
}

impl<E: TextEngine> FileManager<E> {
    pub fn with_engine(mut engine: E, config: Config) -> Self {
        let scratch = engine.create_document();
        let _ = engine.set_current(scratch);
        let languages = LanguageMap::new(&config.user_languages);
        let gate = BackupGate::new(config.gate_timeout());

        Self {
            engine,
            config,
            languages,
            buffers: IndexMap::new(),
            next_id: 1,
            next_untitled: 1,
            scratch,
            bus: ChangeBus::new(),
            gate,
            active: None,
            recent_tag: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Shared with a [`BackupWorker`] so its writes exclude saves
    pub fn gate(&self) -> &BackupGate {
        &self.gate
    }

    pub fn scratch_document(&self) -> DocumentId {
        self.scratch
    }

    /// Receive every buffer change from now on
    pub fn subscribe(&self) -> Receiver<BufferEvent> {
        self.bus.subscribe()
    }

    pub fn buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(&id)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut Buffer> {
        self.buffers.get_mut(&id)
    }

    pub fn buffer_by_index(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get_index(index).map(|(_, buffer)| buffer)
    }

    pub fn index_of(&self, id: BufferId) -> Option<usize> {
        self.buffers.get_index_of(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer whose file is `path`, compared in canonical form
    pub fn buffer_by_name(&self, path: &Path) -> Option<BufferId> {
        let path = fsutil::canonical(path);
        self.buffers
            .values()
            .find(|buffer| !buffer.is_untitled() && buffer.full_path() == path)
            .map(Buffer::id)
    }

    pub fn buffer_by_document(&self, doc: DocumentId) -> Option<BufferId> {
        self.buffers
            .values()
            .find(|buffer| buffer.document() == doc)
            .map(Buffer::id)
    }

    pub fn dirty_count(&self) -> usize {
        self.buffers.values().filter(|buffer| buffer.is_dirty()).count()
    }

    /// Document length in bytes
    pub fn doc_length(&self, id: BufferId) -> Option<usize> {
        let buffer = self.buffers.get(&id)?;
        self.engine.length(buffer.document()).ok()
    }

    /// Snapshot of a buffer's text
    pub fn text(&self, id: BufferId) -> Option<Rope> {
        let buffer = self.buffers.get(&id)?;
        self.engine.snapshot(buffer.document()).ok()
    }

    pub fn active(&self) -> Option<BufferId> {
        self.active
    }

    /// Make `id` the active buffer, backing up the one being left first.
    ///
    /// Returns false for unknown buffers.
    pub fn set_active(&mut self, id: BufferId) -> bool {
        if !self.buffers.contains_key(&id) {
            return false;
        }
        if let Some(previous) = self.active.filter(|previous| *previous != id) {
            if let Err(err) = self.backup_buffer(previous) {
                warn!(id = %previous, error = %err, "backup before switching buffers failed");
            }
        }

        self.active = Some(id);
        self.recent_tag += 1;
        let tag = self.recent_tag;
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.set_recent_tag(tag);
        }
        true
    }

    fn allocate_id(&mut self) -> BufferId {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        id
    }

    fn register(&mut self, document: DocumentId, path: &Path, status: FileStatus, large_file: bool) -> BufferId {
        let id = self.allocate_id();
        let buffer = Buffer::new(BufferInit {
            id,
            document,
            path,
            status,
            large_file,
            defaults: &self.config.new_document,
            languages: &self.languages,
            bus: self.bus.clone(),
        });
        self.buffers.insert(id, buffer);
        id
    }

    fn untitled_name(&mut self) -> PathBuf {
        let name = format!("new {}", self.next_untitled);
        self.next_untitled += 1;
        PathBuf::from(name)
    }

    /// Create an empty untitled buffer ("new N") with the new-document defaults
    pub fn new_empty_document(&mut self) -> BufferId {
        let doc = self.engine.create_document();
        let name = self.untitled_name();
        let id = self.register(doc, &name, FileStatus::Unnamed, false);
        debug!(%id, name = %name.display(), "new document");
        id
    }

    /// Adopt a document that already lives in the engine as an untitled buffer
    pub fn buffer_from_document(&mut self, doc: DocumentId) -> Result<BufferId, EngineError> {
        self.engine.add_ref(doc)?;
        let name = self.untitled_name();
        Ok(self.register(doc, &name, FileStatus::Unnamed, false))
    }

    /// Open `path` into a new buffer.
    ///
    /// With `options.backup` pointing at an existing file the text comes from
    /// that backup instead; the buffer is then dirty, keeps the backup path,
    /// and is untitled when `path` itself no longer exists.
    pub fn load(&mut self, path: &Path, options: LoadOptions) -> Result<BufferId, LoadError> {
        let path = fsutil::canonical(path);

        let recovering = options.backup.as_deref().filter(|backup| fsutil::exists(backup));
        let (source, status) = match recovering {
            Some(backup) if fsutil::exists(&path) => (backup.to_path_buf(), FileStatus::Regular),
            Some(backup) => (backup.to_path_buf(), FileStatus::Unnamed),
            None => (path.clone(), FileStatus::Regular),
        };

        let (doc, owned) = match options.document {
            Some(doc) => (doc, false),
            None => (self.engine.create_document(), true),
        };

        let format = match stream_into(&mut self.engine, doc, self.scratch, &source, &self.config, options.encoding) {
            Ok(format) => format,
            Err(err) => {
                warn!(path = %source.display(), error = %err, "load failed");
                if owned {
                    let _ = self.engine.release(doc);
                }
                return Err(err);
            }
        };

        let id = self.register(doc, &path, status, format.large_file);
        let recovered = recovering.map(Path::to_path_buf);
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.set_notifications_enabled(false);
            apply_format(buffer, &format);
            if let Some(timestamp) = options.timestamp {
                buffer.set_timestamp(Some(timestamp));
            }
            if recovered.is_some() {
                buffer.set_dirty(true);
                buffer.set_backup_path(recovered.clone());
            }
            buffer.set_notifications_enabled(true);
        }

        info!(%id, path = %path.display(), recovered = recovered.is_some(), "loaded");
        Ok(id)
    }

    /// Re-read a buffer's file into its existing document.
    ///
    /// Notifications are held back while the text is replaced and one summary
    /// event fires afterwards.
    pub fn reload(&mut self, id: BufferId) -> Result<(), LoadError> {
        let buffer = self.buffers.get_mut(&id).ok_or(LoadError::UnknownBuffer)?;
        let doc = buffer.document();
        let path = buffer.full_path().to_path_buf();
        let forced = buffer.encoding();
        let was_enabled = buffer.notifications_enabled();
        buffer.set_notifications_enabled(false);

        let result = stream_into(&mut self.engine, doc, self.scratch, &path, &self.config, forced);
        let len_chars = self.engine.snapshot(doc).map(|text| text.len_chars()).unwrap_or(0);

        let buffer = self.buffers.get_mut(&id).ok_or(LoadError::UnknownBuffer)?;
        if let Ok(format) = &result {
            apply_format(buffer, format);
            buffer.set_dirty(false);
            buffer.set_modified(false);
            buffer.clear_needs_reload();
            buffer.set_status(FileStatus::Regular);
            buffer.update_timestamp();
            buffer.set_file_readonly(fsutil::is_readonly(&path));
        }
        buffer.views_mut().clamp_positions(len_chars);
        buffer.set_notifications_enabled(was_enabled);

        match result {
            Ok(_) => {
                buffer.notify(
                    ChangeSet::DIRTY
                        | ChangeSet::FORMAT
                        | ChangeSet::UNICODE
                        | ChangeSet::STATUS
                        | ChangeSet::TIMESTAMP
                        | ChangeSet::READ_ONLY,
                );
                info!(%id, path = %path.display(), "reloaded");
                Ok(())
            }
            Err(err) => {
                warn!(%id, path = %path.display(), error = %err, "reload failed");
                Err(err)
            }
        }
    }

    /// Perform a reload that was deferred with `Buffer::set_deferred_reload`.
    ///
    /// Returns whether a reload happened.
    pub fn reload_deferred(&mut self, id: BufferId) -> Result<bool, LoadError> {
        let pending = self
            .buffers
            .get(&id)
            .map(Buffer::needs_reload)
            .ok_or(LoadError::UnknownBuffer)?;
        if !pending {
            return Ok(false);
        }
        self.reload(id)?;
        Ok(true)
    }

    /// Write a buffer to `path`.
    ///
    /// A failed save keeps the buffer dirty and its backup in place.
    pub fn save(&mut self, id: BufferId, path: &Path, mode: SaveMode) -> Result<(), SaveError> {
        let path = fsutil::canonical(path);
        let buffer = self.buffers.get(&id).ok_or(SaveError::UnknownBuffer)?;
        let doc = buffer.document();
        let text = self.engine.snapshot(doc)?;
        let target = EncodeTarget::for_buffer(buffer, &self.config);

        {
            let _gate = self.gate.acquire()?;
            let attributes = fsutil::clear_special_attributes(&path);
            let result = write_rope(&text, &path, target, self.config.block_size());
            fsutil::restore_special_attributes(&path, attributes);
            if let Err(err) = result {
                warn!(%id, path = %path.display(), error = %err, "save failed");
                return Err(err);
            }
        }

        if mode == SaveMode::Copy {
            info!(%id, path = %path.display(), "saved a copy");
            return Ok(());
        }

        let default_lang = self.config.new_document.lang.clone();
        let buffer = self.buffers.get_mut(&id).ok_or(SaveError::UnknownBuffer)?;
        buffer.set_status(FileStatus::Regular);
        buffer.set_file_name(&path, &default_lang, &self.languages);
        buffer.update_timestamp();
        if *buffer.lang_type() == LangType::Text {
            let first_line = text.lines().next().map(|line| line.to_string()).unwrap_or_default();
            if let Some(lang) = LangType::from_first_line(first_line.trim_end()) {
                buffer.apply_sniffed_lang(lang);
            }
        }
        let readonly = fsutil::is_readonly(&path);
        if readonly != buffer.is_file_readonly() {
            buffer.set_file_readonly(readonly);
        }
        buffer.set_dirty(false);
        buffer.set_modified(false);
        self.engine.set_save_point(doc)?;

        if let Err(err) = self.delete_backup(id) {
            warn!(%id, error = %err, "could not delete the backup after saving");
        }
        info!(%id, path = %path.display(), "saved");
        Ok(())
    }

    /// Drop `view`'s reference; the last reference tears the buffer down.
    ///
    /// Returns the remaining view count.
    pub fn close(&mut self, id: BufferId, view: ViewId) -> Result<usize, EngineError> {
        let buffer = self.buffers.get_mut(&id).ok_or(EngineError::UnknownDocument)?;
        let doc = buffer.document();
        let had_view = buffer.views().contains(view);
        let remaining = buffer.remove_reference(view);
        if had_view {
            self.engine.release(doc)?;
        }
        if remaining > 0 {
            return Ok(remaining);
        }

        if let Err(err) = self.delete_backup(id) {
            warn!(%id, error = %err, "could not delete the backup of a closed buffer");
        }
        self.buffers.shift_remove(&id);
        if self.active == Some(id) {
            self.active = None;
        }
        self.engine.release(doc)?;
        debug!(%id, "closed");
        Ok(0)
    }

    /// Register `view` on a buffer and take an engine reference for it.
    ///
    /// Idempotent per view. Returns the buffer's view count.
    pub fn add_reference(&mut self, id: BufferId, view: ViewId) -> Result<usize, EngineError> {
        let buffer = self.buffers.get_mut(&id).ok_or(EngineError::UnknownDocument)?;
        if buffer.views().contains(view) {
            return Ok(buffer.reference_count());
        }
        self.engine.add_ref(buffer.document())?;
        Ok(buffer.add_reference(view))
    }

    /// Re-check buffers against the filesystem; returns those that changed
    pub fn check_filesystem_changes(&mut self, scope: CheckScope) -> Vec<BufferId> {
        let active = self.active;
        self.buffers
            .values_mut()
            .filter(|buffer| scope == CheckScope::All || Some(buffer.id()) == active)
            .filter_map(|buffer| buffer.check_file_state().then(|| buffer.id()))
            .collect()
    }

    /// Delete a buffer's file from disk; the buffer stays open as Deleted
    pub fn delete_file(&mut self, id: BufferId) -> Result<(), FileError> {
        let buffer = self.buffers.get_mut(&id).ok_or(FileError::UnknownBuffer)?;
        if buffer.is_untitled() {
            return Err(FileError::Unnamed);
        }
        let path = buffer.full_path().to_path_buf();
        fsutil::remove_file(&path).map_err(|source| FileError::Io {
            op: "delete",
            path: path.clone(),
            source,
        })?;
        buffer.check_file_state();
        info!(%id, path = %path.display(), "deleted file");
        Ok(())
    }

    /// Move a buffer's file, replacing anything at `to`
    pub fn move_file(&mut self, id: BufferId, to: &Path) -> Result<(), FileError> {
        let default_lang = self.config.new_document.lang.clone();
        let buffer = self.buffers.get_mut(&id).ok_or(FileError::UnknownBuffer)?;
        if buffer.is_untitled() {
            return Err(FileError::Unnamed);
        }
        let from = buffer.full_path().to_path_buf();
        fsutil::move_replace(&from, to).map_err(|source| FileError::Io {
            op: "move",
            path: from.clone(),
            source,
        })?;

        let to = fsutil::canonical(to);
        buffer.set_file_name(&to, &default_lang, &self.languages);
        buffer.update_timestamp();
        info!(%id, from = %from.display(), to = %to.display(), "moved file");
        Ok(())
    }

    /// Create (or truncate to) an empty file at `path`
    pub fn create_empty_file(&self, path: &Path) -> Result<(), FileError> {
        fsutil::open_write(path)
            .map(drop)
            .map_err(|source| FileError::Io {
                op: "create",
                path: path.to_path_buf(),
                source,
            })
    }

    fn editable(&mut self, id: BufferId) -> Result<DocumentId, FileError> {
        let buffer = self.buffers.get(&id).ok_or(FileError::UnknownBuffer)?;
        if buffer.is_readonly() {
            return Err(EngineError::ReadOnly.into());
        }
        Ok(buffer.document())
    }

    fn after_edit(&mut self, id: BufferId, doc: DocumentId) -> Result<(), FileError> {
        let dirty = self.engine.is_modified(doc)?;
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.record_edit(dirty);
        }
        Ok(())
    }

    /// Insert `text` at char index `at`
    pub fn insert_text(&mut self, id: BufferId, at: usize, text: &str) -> Result<(), FileError> {
        let doc = self.editable(id)?;
        self.engine.insert(doc, at, text)?;
        self.after_edit(id, doc)
    }

    /// Delete the chars in `range`
    pub fn delete_text(&mut self, id: BufferId, range: Range<usize>) -> Result<(), FileError> {
        let doc = self.editable(id)?;
        self.engine.delete(doc, range)?;
        self.after_edit(id, doc)
    }

    /// Returns whether anything was undone; undoing back to the save point clears dirty
    pub fn undo(&mut self, id: BufferId) -> Result<bool, FileError> {
        let doc = self.editable(id)?;
        let changed = self.engine.undo(doc)?;
        if changed {
            self.after_edit(id, doc)?;
        }
        Ok(changed)
    }

    pub fn redo(&mut self, id: BufferId) -> Result<bool, FileError> {
        let doc = self.editable(id)?;
        let changed = self.engine.redo(doc)?;
        if changed {
            self.after_edit(id, doc)?;
        }
        Ok(changed)
    }

    /// Run the backup protocol for one buffer synchronously
    pub fn backup_buffer(&mut self, id: BufferId) -> Result<BackupOutcome, BackupError> {
        match self.prepare_backup(id)? {
            BackupPlan::Done(outcome) => Ok(outcome),
            BackupPlan::Write(job) => {
                let receipt = job.write(&self.gate)?;
                self.complete_backup(&receipt);
                Ok(BackupOutcome::Written {
                    path: receipt.path,
                    new_path: receipt.new_path,
                })
            }
        }
    }

    /// Decide what backing up `id` takes.
    ///
    /// Clean buffers lose their stale backup here. When a write is needed the
    /// backup path is created (and kept on the buffer) and a snapshot job is
    /// returned for this thread or a [`BackupWorker`] to write.
    pub fn prepare_backup(&mut self, id: BufferId) -> Result<BackupPlan, BackupError> {
        let buffer = self.buffers.get(&id).ok_or(BackupError::UnknownBuffer)?;
        if buffer.is_large_file() || !self.config.backup.enabled {
            return Ok(BackupPlan::Done(BackupOutcome::Skipped));
        }

        if !buffer.is_dirty() {
            if buffer.backup_path().is_some() {
                self.delete_backup(id)?;
                return Ok(BackupPlan::Done(BackupOutcome::Removed));
            }
            return Ok(BackupPlan::Done(BackupOutcome::Clean));
        }

        if !buffer.is_modified() {
            return Ok(BackupPlan::Done(BackupOutcome::UpToDate));
        }

        let (path, new_path) = match buffer.backup_path() {
            Some(path) => (path.to_path_buf(), false),
            None => {
                let dir = self.config.backup_dir().ok_or(BackupError::NoDataDir)?;
                fsutil::create_dir_all(&dir).map_err(|source| BackupError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
                (dir.join(format!("{}@{}", buffer.file_name(), stamp)), true)
            }
        };

        let job = BackupJob {
            id,
            path: path.clone(),
            new_path,
            text: self.engine.snapshot(buffer.document()).map_err(SaveError::from)?,
            target: EncodeTarget::for_buffer(buffer, &self.config),
            block_size: self.config.block_size(),
            generation: buffer.generation(),
        };

        if new_path {
            if let Some(buffer) = self.buffers.get_mut(&id) {
                buffer.set_backup_path(Some(path));
            }
        }
        Ok(BackupPlan::Write(job))
    }

    /// Apply a finished backup write.
    ///
    /// "Modified" is cleared only if no edit happened since the snapshot. A
    /// backup that lost a race with a save or close is deleted again. Returns
    /// whether the buffer is now fully backed up.
    pub fn complete_backup(&mut self, receipt: &BackupReceipt) -> bool {
        let current = self
            .buffers
            .get_mut(&receipt.id)
            .filter(|buffer| buffer.is_dirty() && buffer.backup_path() == Some(receipt.path.as_path()));

        match current {
            Some(buffer) => {
                let up_to_date = buffer.generation() == receipt.generation;
                if up_to_date {
                    buffer.set_modified(false);
                }
                info!(id = %receipt.id, path = %receipt.path.display(), up_to_date, "backup complete");
                up_to_date
            }
            None => {
                if let Err(err) = remove_if_exists(&receipt.path) {
                    warn!(path = %receipt.path.display(), error = %err, "could not delete a stale backup");
                }
                false
            }
        }
    }

    /// Remove a buffer's backup file and forget its path.
    ///
    /// Returns whether there was a backup.
    pub fn delete_backup(&mut self, id: BufferId) -> Result<bool, BackupError> {
        let buffer = self.buffers.get_mut(&id).ok_or(BackupError::UnknownBuffer)?;
        let Some(path) = buffer.backup_path().map(Path::to_path_buf) else {
            return Ok(false);
        };

        let _gate = self.gate.acquire()?;
        remove_if_exists(&path).map_err(|source| BackupError::Io {
            path: path.clone(),
            source,
        })?;
        buffer.set_backup_path(None);
        info!(%id, path = %path.display(), "backup deleted");
        Ok(true)
    }
}

impl Default for FileManager<RopeEngine> {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn apply_format(buffer: &mut Buffer, format: &LoadedFormat) {
    buffer.set_unicode_mode(format.uni_mode);
    buffer.set_encoding(format.codepage);
    buffer.set_eol_format(format.eol);
    if let Some(lang) = &format.sniffed_lang {
        buffer.apply_sniffed_lang(lang.clone());
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fsutil::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
