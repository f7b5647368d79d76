use encoding_rs::Encoding;
use ropey::Rope;
use std::io::Write;
use std::path::Path;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::encoding::{Codepage, Encoder, UniMode, MAX_CARRY};
use crate::error::SaveError;
use crate::fsutil;

/// How to save a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Save and make `path` the buffer's file
    InPlace,
    /// Write a copy; the buffer keeps its path and dirty state
    Copy,
}

/// Output encoding of a document
#[derive(Debug, Clone, Copy)]
pub struct EncodeTarget {
    pub uni_mode: UniMode,
    pub codepage: Option<Codepage>,
    pub ansi: &'static Encoding,
}

impl EncodeTarget {
    pub fn for_buffer(buffer: &Buffer, config: &Config) -> Self {
        Self {
            uni_mode: buffer.uni_mode(),
            codepage: buffer.encoding(),
            ansi: config.ansi_encoding(),
        }
    }
}

/// Stream `rope` into `path` in blocks of `block_size` bytes, encoding each
/// block on the way out. Any failed or short write fails the whole save.
pub fn write_rope(rope: &Rope, path: &Path, target: EncodeTarget, block_size: usize) -> Result<(), SaveError> {
    let mut file = fsutil::open_write(path).map_err(|source| SaveError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut encoder = Encoder::new(target.uni_mode, target.codepage, target.ansi);
    let mut block: Vec<u8> = Vec::with_capacity(block_size + MAX_CARRY);
    let mut out: Vec<u8> = Vec::with_capacity(block_size * 2 + 4);

    for chunk in rope.chunks() {
        let mut bytes = chunk.as_bytes();
        while !bytes.is_empty() {
            let room = block_size.saturating_sub(block.len()).max(1);
            let take = room.min(bytes.len());
            block.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            if block.len() >= block_size {
                out.clear();
                let carry = encoder.encode(&block, &mut out, false);
                write_block(&mut file, &out, path)?;
                let keep = block.len() - carry;
                block.drain(..keep);
            }
        }
    }

    out.clear();
    encoder.encode(&block, &mut out, true);
    write_block(&mut file, &out, path)?;

    file.flush().map_err(|source| SaveError::from_write(path.to_path_buf(), source))?;
    file.sync_all().map_err(|source| SaveError::from_write(path.to_path_buf(), source))
}

fn write_block(file: &mut impl Write, bytes: &[u8], path: &Path) -> Result<(), SaveError> {
    if bytes.is_empty() {
        return Ok(());
    }
    file.write_all(bytes)
        .map_err(|source| SaveError::from_write(path.to_path_buf(), source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn target(uni_mode: UniMode, codepage: Option<Codepage>) -> EncodeTarget {
        EncodeTarget {
            uni_mode,
            codepage,
            ansi: encoding_rs::WINDOWS_1252,
        }
    }

    #[test]
    fn test_small_blocks_split_characters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let text = "héllo wörld 日本 😀\n".repeat(20);

        for block_size in [1, 2, 3, 5, 64] {
            write_rope(&Rope::from_str(&text), &path, target(UniMode::Utf8, None), block_size).unwrap();
            assert_eq!(fs::read_to_string(&path).unwrap(), text, "block size {block_size}");
        }
    }

    #[test]
    fn test_utf16_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_rope(&Rope::from_str("hi"), &path, target(UniMode::Utf16BeBom, None), 3).unwrap();
        assert_eq!(fs::read(&path).unwrap(), [0xFE, 0xFF, 0, b'h', 0, b'i']);
    }

    #[test]
    fn test_legacy_codepage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_rope(&Rope::from_str("Привет"), &path, target(UniMode::Utf8, Some(Codepage(1251))), 4).unwrap();
        let expected = encoding_rs::WINDOWS_1251.encode("Привет").0.into_owned();
        assert_eq!(fs::read(&path).unwrap(), expected);
    }

    #[test]
    fn test_empty_document_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "old content").unwrap();
        write_rope(&Rope::new(), &path, target(UniMode::Utf8, None), 16).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.txt");
        let err = write_rope(&Rope::new(), &path, target(UniMode::Utf8, None), 16).unwrap_err();
        assert!(matches!(err, SaveError::Open { .. }));
    }
}
