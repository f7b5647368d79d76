pub mod buffer;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod manager;

pub use buffer::{Buffer, BufferEvent, BufferId, ChangeSet, FileStatus, LangType, Position, ViewId};
pub use config::Config;
pub use encoding::{Codepage, EolFormat, UniMode};
pub use engine::{DocumentId, RopeEngine, TextEngine};
pub use error::{BackupError, EngineError, FileError, GateError, LoadError, SaveError};
pub use manager::{
    BackupOutcome, BackupPlan, BackupResponse, BackupWorker, CheckScope, FileManager, LoadOptions, SaveMode,
};
