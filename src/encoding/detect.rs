use super::transcode::incomplete_utf8_tail;
use super::{Codepage, EolFormat, UniMode};

const CR: u8 = 0x0D;
const LF: u8 = 0x0A;

/// Byte-order marks recognised at the start of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bom {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl Bom {
    pub fn len(self) -> usize {
        match self {
            Bom::Utf8 => 3,
            Bom::Utf16Le | Bom::Utf16Be => 2,
        }
    }

    pub fn uni_mode(self) -> UniMode {
        match self {
            Bom::Utf8 => UniMode::Utf8Bom,
            Bom::Utf16Le => UniMode::Utf16LeBom,
            Bom::Utf16Be => UniMode::Utf16BeBom,
        }
    }
}

pub fn detect_bom(block: &[u8]) -> Option<Bom> {
    if block.starts_with(&[0xFE, 0xFF]) {
        Some(Bom::Utf16Be)
    } else if block.starts_with(&[0xFF, 0xFE]) {
        Some(Bom::Utf16Le)
    } else if block.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some(Bom::Utf8)
    } else {
        None
    }
}

/// Result of examining the first block of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub bom: Option<Bom>,
    pub uni_mode: UniMode,
    /// Explicit codepage to decode with; `None` means "decode by `uni_mode`"
    pub codepage: Option<Codepage>,
}

/// Decide how to decode a file from its first block.
///
/// A byte-order mark always wins and discards `forced`. Without one, a forced
/// codepage is used as is. Otherwise the block is sniffed, and when it looks
/// like legacy 8-bit text and `autodetect` is set, a charset guess supplies
/// the codepage.
pub fn detect(block: &[u8], forced: Option<Codepage>, autodetect: bool) -> Detection {
    if let Some(bom) = detect_bom(block) {
        return Detection {
            bom: Some(bom),
            uni_mode: bom.uni_mode(),
            codepage: None,
        };
    }

    if let Some(codepage) = forced {
        return Detection {
            bom: None,
            uni_mode: UniMode::Utf8,
            codepage: (!codepage.is_utf8()).then_some(codepage),
        };
    }

    let uni_mode = sniff_uni_mode(block);
    if uni_mode == UniMode::Ansi && autodetect {
        match guess_codepage(block) {
            Some(codepage) if codepage.is_utf8() => {
                return Detection { bom: None, uni_mode: UniMode::Utf8, codepage: None };
            }
            Some(codepage) => {
                return Detection { bom: None, uni_mode: UniMode::Utf8, codepage: Some(codepage) };
            }
            None => {}
        }
    }

    Detection { bom: None, uni_mode, codepage: None }
}

/// Classify a block without a byte-order mark
pub fn sniff_uni_mode(block: &[u8]) -> UniMode {
    if looks_like_utf16le(block) {
        return UniMode::Utf16LeNoBom;
    }

    let body = &block[..block.len() - incomplete_utf8_tail(block)];
    match std::str::from_utf8(body) {
        Ok(text) if text.is_ascii() => UniMode::Ascii,
        Ok(_) => UniMode::Utf8,
        Err(_) => UniMode::Ansi,
    }
}

// Statistical check in the spirit of the Win32 IsTextUnicode test: mostly
// zero high bytes and almost no zero low bytes.
fn looks_like_utf16le(block: &[u8]) -> bool {
    if block.len() < 2 || block.len() % 2 != 0 || block[0] == 0 || block[1] != 0 {
        return false;
    }

    let pairs = block.len() / 2;
    let mut zero_high = 0usize;
    let mut zero_low = 0usize;
    for pair in block.chunks_exact(2) {
        if pair[0] == 0 {
            zero_low += 1;
        }
        if pair[1] == 0 {
            zero_high += 1;
        }
    }

    zero_high * 10 >= pairs * 7 && zero_low * 10 <= pairs
}

/// Frequency-based charset guess for legacy 8-bit text
pub fn guess_codepage(block: &[u8]) -> Option<Codepage> {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(block, true);
    let guess = detector.guess(None, true);
    Codepage::from_encoding(guess)
}

/// Finds the first line terminator across a stream of blocks.
///
/// A CR at the very end of one block is resolved by the first byte of the next.
#[derive(Debug, Default)]
pub struct EolDetector {
    found: Option<EolFormat>,
    pending_cr: bool,
}

impl EolDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        if self.found.is_some() {
            return;
        }

        for &byte in bytes {
            if self.pending_cr {
                self.found = Some(if byte == LF { EolFormat::Windows } else { EolFormat::Mac });
                return;
            }
            match byte {
                CR => self.pending_cr = true,
                LF => {
                    self.found = Some(EolFormat::Unix);
                    return;
                }
                _ => {}
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.found.is_some()
    }

    /// The detected format, or `None` when the stream held no line break at all
    pub fn finish(self) -> Option<EolFormat> {
        match self.found {
            Some(format) => Some(format),
            None if self.pending_cr => Some(EolFormat::Mac),
            None => None,
        }
    }
}
