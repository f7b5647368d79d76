use parking_lot::{Mutex, MutexGuard};
use ropey::Rope;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::save::{write_rope, EncodeTarget};
use crate::buffer::BufferId;
use crate::error::{BackupError, GateError};
use crate::fsutil;

/// Serializes saves and backup writes.
///
/// Clones share the same lock, so a backup thread and the foreground never
/// write at the same time. Waiting is bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct BackupGate {
    lock: Arc<Mutex<()>>,
    timeout: Duration,
}

/// Held while writing; the gate reopens when it is dropped
#[derive(Debug)]
pub struct GateGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl BackupGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    pub fn acquire(&self) -> Result<GateGuard<'_>, GateError> {
        self.lock
            .try_lock_for(self.timeout)
            .map(|guard| GateGuard { _guard: guard })
            .ok_or(GateError::Timeout(self.timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// What a backup attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// The recovery copy was rewritten; `new_path` when its path was just created
    Written { path: PathBuf, new_path: bool },
    /// Dirty, but nothing changed since the last backup
    UpToDate,
    /// The buffer is clean again and its stale backup was deleted
    Removed,
    /// Clean with no backup; nothing to do
    Clean,
    /// Backups are off for this buffer (large file or disabled)
    Skipped,
}

impl BackupOutcome {
    /// The set of backup paths changed, so a session file must be re-persisted
    pub fn session_changed(&self) -> bool {
        matches!(
            self,
            BackupOutcome::Written { new_path: true, .. } | BackupOutcome::Removed
        )
    }
}

/// Either a finished decision or a write still to be done
#[derive(Debug)]
pub enum BackupPlan {
    Done(BackupOutcome),
    Write(BackupJob),
}

/// Everything needed to write one backup without touching the manager
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub id: BufferId,
    pub path: PathBuf,
    pub new_path: bool,
    pub text: Rope,
    pub target: EncodeTarget,
    pub block_size: usize,
    /// Buffer generation the snapshot was taken at
    pub generation: u64,
}

/// Proof of a finished backup write, handed back to the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReceipt {
    pub id: BufferId,
    pub path: PathBuf,
    pub new_path: bool,
    pub generation: u64,
}

impl BackupJob {
    /// Write the snapshot under the gate
    pub fn write(self, gate: &BackupGate) -> Result<BackupReceipt, BackupError> {
        let _gate = gate.acquire()?;

        if fsutil::is_readonly(&self.path) {
            fsutil::set_readonly(&self.path, false).map_err(|source| BackupError::Io {
                path: self.path.clone(),
                source,
            })?;
        }

        write_rope(&self.text, &self.path, self.target, self.block_size)?;
        debug!(id = %self.id, path = %self.path.display(), "backup written");

        Ok(BackupReceipt {
            id: self.id,
            path: self.path,
            new_path: self.new_path,
            generation: self.generation,
        })
    }
}
