pub mod codepage;
pub mod detect;
pub mod transcode;

use serde::{Deserialize, Serialize};

pub use codepage::Codepage;
pub use detect::{detect, detect_bom, Bom, Detection, EolDetector};
pub use transcode::{Decoder, Encoder, MAX_CARRY};

/// How the bytes of a document map onto Unicode when no explicit codepage is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UniMode {
    /// Legacy 8-bit text in the configured ANSI codepage
    Ansi,
    Utf8Bom,
    Utf16BeBom,
    Utf16LeBom,
    /// UTF-8 without a byte-order mark
    #[default]
    Utf8,
    /// Pure 7-bit text. Only produced by detection, resolved before it reaches a buffer.
    Ascii,
    Utf16BeNoBom,
    Utf16LeNoBom,
}

impl UniMode {
    /// Byte-order mark written in front of the document, if any
    pub fn bom(self) -> &'static [u8] {
        match self {
            UniMode::Utf8Bom => &[0xEF, 0xBB, 0xBF],
            UniMode::Utf16BeBom => &[0xFE, 0xFF],
            UniMode::Utf16LeBom => &[0xFF, 0xFE],
            _ => &[],
        }
    }

    pub fn is_utf16(self) -> bool {
        matches!(
            self,
            UniMode::Utf16BeBom | UniMode::Utf16LeBom | UniMode::Utf16BeNoBom | UniMode::Utf16LeNoBom
        )
    }

    pub fn is_big_endian(self) -> bool {
        matches!(self, UniMode::Utf16BeBom | UniMode::Utf16BeNoBom)
    }

    /// Short label for status lines
    pub fn display(&self) -> &'static str {
        match self {
            UniMode::Ansi => "ANSI",
            UniMode::Utf8Bom => "UTF-8-BOM",
            UniMode::Utf16BeBom => "UTF-16 BE BOM",
            UniMode::Utf16LeBom => "UTF-16 LE BOM",
            UniMode::Utf8 => "UTF-8",
            UniMode::Ascii => "ASCII",
            UniMode::Utf16BeNoBom => "UTF-16 BE",
            UniMode::Utf16LeNoBom => "UTF-16 LE",
        }
    }
}

/// Line-ending convention of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EolFormat {
    /// CR LF
    Windows,
    /// CR
    Mac,
    /// LF
    Unix,
}

impl EolFormat {
    pub fn terminator(&self) -> &'static str {
        match self {
            EolFormat::Windows => "\r\n",
            EolFormat::Mac => "\r",
            EolFormat::Unix => "\n",
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            EolFormat::Windows => "Windows (CR LF)",
            EolFormat::Mac => "Macintosh (CR)",
            EolFormat::Unix => "Unix (LF)",
        }
    }
}

impl Default for EolFormat {
    #[cfg(windows)]
    fn default() -> Self {
        EolFormat::Windows
    }

    #[cfg(not(windows))]
    fn default() -> Self {
        EolFormat::Unix
    }
}
