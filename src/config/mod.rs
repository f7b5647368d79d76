use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::buffer::LangType;
use crate::encoding::{Codepage, EolFormat, UniMode};

const APP_DIR: &str = "jot";
const CONFIG_FILE: &str = "config.json";
const BACKUP_DIR: &str = "backup";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings applied to new and untyped documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewDocumentConfig {
    pub eol_format: EolFormat,
    pub uni_mode: UniMode,
    pub codepage: Option<Codepage>,
    pub lang: LangType,
}

impl Default for NewDocumentConfig {
    fn default() -> Self {
        Self {
            eol_format: EolFormat::default(),
            uni_mode: UniMode::Utf8,
            codepage: None,
            lang: LangType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Seconds between periodic backups of the active buffer
    pub interval_secs: u64,
    /// How long a save or backup waits for the other to finish
    pub gate_timeout_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 7,
            gate_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for backups and logs; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    /// Guess the charset of files that are neither ASCII nor UTF-8
    pub detect_encoding: bool,
    /// Treat pure 7-bit files as UTF-8 instead of ANSI
    pub open_ansi_as_utf8: bool,
    /// Codepage used for ANSI text
    pub ansi_codepage: Codepage,
    pub new_document: NewDocumentConfig,
    /// Bytes read or written per block when streaming
    pub block_size: usize,
    /// Upper bound for the memory a single document may need
    pub max_load_bytes: u64,
    /// Files at least this big are opened as plain text without backups
    pub large_file_threshold: u64,
    pub backup: BackupConfig,
    /// Extension -> user-defined language name
    pub user_languages: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            detect_encoding: true,
            open_ansi_as_utf8: true,
            ansi_codepage: Codepage::WINDOWS_1252,
            new_document: NewDocumentConfig::default(),
            block_size: 128 * 1024,
            max_load_bytes: isize::MAX as u64,
            large_file_threshold: 200 * 1024 * 1024,
            backup: BackupConfig::default(),
            user_languages: HashMap::new(),
        }
    }
}

impl Config {
    /// `<config_dir>/jot/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` (or the default location); a missing file yields defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        match Self::load(&path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Configured data directory, or `<data_dir>/jot` of the platform
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR)))
    }

    pub fn backup_dir(&self) -> Option<PathBuf> {
        self.data_dir().map(|dir| dir.join(BACKUP_DIR))
    }

    pub fn ansi_encoding(&self) -> &'static Encoding {
        self.ansi_codepage.encoding().unwrap_or(encoding_rs::WINDOWS_1252)
    }

    pub fn block_size(&self) -> usize {
        self.block_size.max(1)
    }

    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.backup.gate_timeout_ms)
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup.interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "detect_encoding": false, "backup": { "interval_secs": 30 } }"#,
        )
        .unwrap();
        assert!(!config.detect_encoding);
        assert_eq!(config.backup.interval_secs, 30);
        assert_eq!(config.backup.gate_timeout_ms, 5000);
        assert_eq!(config.block_size, 128 * 1024);
    }

    #[test]
    fn test_enum_fields_use_kebab_case() {
        let config: Config = serde_json::from_str(
            r#"{ "new_document": { "eol_format": "mac", "uni_mode": "utf16-le-bom", "codepage": 1251, "lang": "python" } }"#,
        )
        .unwrap();
        assert_eq!(config.new_document.eol_format, EolFormat::Mac);
        assert_eq!(config.new_document.uni_mode, UniMode::Utf16LeBom);
        assert_eq!(config.new_document.codepage, Some(Codepage(1251)));
        assert_eq!(config.new_document.lang, LangType::Python);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_backup_dir_follows_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("/tmp/jot-data")),
            ..Config::default()
        };
        assert_eq!(config.backup_dir(), Some(PathBuf::from("/tmp/jot-data/backup")));
    }
}
