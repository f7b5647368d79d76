use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a text engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("not enough memory for the document")]
    BadAlloc,
    #[error("the editing engine reported a failure")]
    Failure,
    #[error("the document is read-only")]
    ReadOnly,
    #[error("unknown document")]
    UnknownDocument,
}

/// The save/backup gate could not be taken in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("timed out after {0:?} waiting for another save or backup to finish")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot find {}", .0.display())]
    NotFound(PathBuf),
    #[error("permission denied opening {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is too large to open ({size} bytes)", path.display())]
    TooLarge { path: PathBuf, size: u64 },
    #[error("loading {} failed: {source}", path.display())]
    Engine {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
    #[error("no such buffer")]
    UnknownBuffer,
}

impl LoadError {
    pub(crate) fn from_io(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound(path),
            io::ErrorKind::PermissionDenied => LoadError::PermissionDenied(path),
            _ => LoadError::Io { path, source },
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("cannot open {} for writing: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not enough space on disk to save {}", .0.display())]
    ShortWrite(PathBuf),
    #[error("writing {} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("no such buffer")]
    UnknownBuffer,
}

impl SaveError {
    /// Classify a failed `write`: running out of space counts as a short write
    pub(crate) fn from_write(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::WriteZero | io::ErrorKind::StorageFull => SaveError::ShortWrite(path),
            _ => SaveError::Io { path, source },
        }
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error("no data directory configured for backups")]
    NoDataDir,
    #[error("backup I/O on {} failed: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing the backup failed: {0}")]
    Save(#[from] SaveError),
    #[error("no such buffer")]
    UnknownBuffer,
}

/// Errors from buffer-level edits and file operations
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{} on {}: {source}", op, path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("the buffer has no file on disk")]
    Unnamed,
    #[error("no such buffer")]
    UnknownBuffer,
}
