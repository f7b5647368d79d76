use std::io::{self, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::buffer::LangType;
use crate::config::Config;
use crate::encoding::{detect, Codepage, Decoder, EolDetector, EolFormat, UniMode, MAX_CARRY};
use crate::engine::{DocumentId, TextEngine};
use crate::error::{EngineError, LoadError};
use crate::fsutil;

/// Extra room for editing on top of the file size, capped at 1 MiB
const EDIT_MARGIN_CAP: u64 = 1024 * 1024;
/// Only this much of the start of a file is kept for language sniffing
const FIRST_LINE_MAX: usize = 1024;

/// Optional inputs to [`FileManager::load`](super::FileManager::load)
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Load into this engine document instead of a new one; the manager
    /// takes over the caller's reference
    pub document: Option<DocumentId>,
    /// Recover from this backup file instead of reading the path itself
    pub backup: Option<PathBuf>,
    /// Decode with this codepage unless the file has a byte-order mark
    pub encoding: Option<Codepage>,
    /// Known timestamp to use instead of the one on disk
    pub timestamp: Option<SystemTime>,
}

/// What the load pipeline learned about a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoadedFormat {
    pub uni_mode: UniMode,
    pub codepage: Option<Codepage>,
    pub eol: EolFormat,
    pub sniffed_lang: Option<LangType>,
    pub large_file: bool,
}

/// Makes a document current for the duration of a streaming operation and
/// puts the scratch document back however the operation ends.
pub(crate) struct CurrentDocument<'a, E: TextEngine> {
    engine: &'a mut E,
    restore: DocumentId,
}

impl<'a, E: TextEngine> CurrentDocument<'a, E> {
    pub fn new(engine: &'a mut E, doc: DocumentId, restore: DocumentId) -> Result<Self, EngineError> {
        engine.set_current(doc)?;
        Ok(Self { engine, restore })
    }
}

impl<E: TextEngine> Deref for CurrentDocument<'_, E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.engine
    }
}

impl<E: TextEngine> DerefMut for CurrentDocument<'_, E> {
    fn deref_mut(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: TextEngine> Drop for CurrentDocument<'_, E> {
    fn drop(&mut self) {
        let _ = self.engine.set_current(self.restore);
    }
}

/// Memory a document of `size` bytes is allowed to grow into
pub(crate) fn required_capacity(size: u64) -> u64 {
    size.saturating_add((size / 6).min(EDIT_MARGIN_CAP))
}

/// Read until `buf` is full or the reader is exhausted
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Stream `source` into `doc`, replacing its content.
///
/// The text is read into a staging document first and moved into `doc` only
/// once the whole file decoded, so a failed load leaves `doc` as it was. A
/// read-only `doc` still receives the text and keeps its flag.
pub(crate) fn stream_into<E: TextEngine>(
    engine: &mut E,
    doc: DocumentId,
    scratch: DocumentId,
    source: &Path,
    config: &Config,
    forced: Option<Codepage>,
) -> Result<LoadedFormat, LoadError> {
    let engine_err = |source_err: EngineError| LoadError::Engine {
        path: source.to_path_buf(),
        source: source_err,
    };
    if engine.ref_count(doc) == 0 {
        return Err(engine_err(EngineError::UnknownDocument));
    }

    let size = fsutil::file_size(source).map_err(|err| LoadError::from_io(source.to_path_buf(), err))?;
    let required = required_capacity(size);
    if required > config.max_load_bytes || usize::try_from(required).is_err() {
        return Err(LoadError::TooLarge {
            path: source.to_path_buf(),
            size,
        });
    }
    let mut file = fsutil::open_read(source).map_err(|err| LoadError::from_io(source.to_path_buf(), err))?;

    let staging = engine.create_document();
    let filled = CurrentDocument::new(engine, staging, scratch)
        .map_err(engine_err)
        .and_then(|mut target| {
            target.clear_status();
            fill(&mut *target, &mut file, size, required as usize, config, forced, source)
        });
    let result = filled.and_then(|format| {
        engine.transfer_text(staging, doc).map_err(engine_err)?;
        engine.set_save_point(doc).map_err(engine_err)?;
        Ok(format)
    });
    let _ = engine.release(staging);
    result
}

/// What one decoding pass over a file produced
struct DecodePass {
    eol: Option<EolFormat>,
    first_line: String,
    /// Stopped early on invalid UTF-8; the engine text is incomplete
    malformed: bool,
}

fn fill<E: TextEngine>(
    engine: &mut E,
    file: &mut (impl Read + Seek),
    size: u64,
    required: usize,
    config: &Config,
    forced: Option<Codepage>,
    source: &Path,
) -> Result<LoadedFormat, LoadError> {
    let io_err = |err: io::Error| LoadError::from_io(source.to_path_buf(), err);

    let large_file = size >= config.large_file_threshold;

    // the first block must be able to hold a byte-order mark
    let mut first = vec![0u8; config.block_size().max(4)];
    let got = read_block(file, &mut first).map_err(io_err)?;
    first.truncate(got);

    let detection = detect(&first, forced, config.detect_encoding && !large_file);
    let (mut uni_mode, mut codepage) = if size == 0 && forced.is_none() {
        (config.new_document.uni_mode, config.new_document.codepage)
    } else {
        match (detection.uni_mode, detection.codepage) {
            (_, Some(codepage)) => (UniMode::Utf8, Some(codepage)),
            (UniMode::Ascii, None) if config.open_ansi_as_utf8 => (UniMode::Utf8, None),
            (UniMode::Ascii, None) => (UniMode::Ansi, None),
            (mode, None) => (mode, None),
        }
    };
    // without a BOM or a forced codepage, UTF-8 is only what the first block suggests
    let utf8_guess = detection.bom.is_none() && forced.is_none() && uni_mode == UniMode::Utf8 && codepage.is_none();
    debug!(path = %source.display(), ?uni_mode, ?codepage, size, "decoding");

    let decoder = Decoder::new(uni_mode, codepage, config.ansi_encoding());
    let mut pass = decode_pass(engine, file, decoder, required, config, utf8_guess, source)?;
    if pass.malformed {
        debug!(path = %source.display(), "invalid UTF-8 past the first block, reading as ANSI");
        uni_mode = UniMode::Ansi;
        codepage = None;
        let decoder = Decoder::new(uni_mode, codepage, config.ansi_encoding());
        pass = decode_pass(engine, file, decoder, required, config, false, source)?;
    }

    let eol = pass.eol.unwrap_or(config.new_document.eol_format);
    let first_line = pass.first_line.split(['\r', '\n']).next().unwrap_or("");
    let sniffed_lang = if large_file { None } else { LangType::from_first_line(first_line) };

    Ok(LoadedFormat {
        uni_mode,
        codepage,
        eol,
        sniffed_lang,
        large_file,
    })
}

/// Decode the whole file from its start into the current document.
///
/// With `stop_on_malformed` the pass gives up at the first invalid UTF-8.
fn decode_pass<E: TextEngine>(
    engine: &mut E,
    file: &mut (impl Read + Seek),
    mut decoder: Decoder,
    required: usize,
    config: &Config,
    stop_on_malformed: bool,
    source: &Path,
) -> Result<DecodePass, LoadError> {
    let engine_err = |err: EngineError| LoadError::Engine {
        path: source.to_path_buf(),
        source: err,
    };
    let io_err = |err: io::Error| LoadError::from_io(source.to_path_buf(), err);

    file.seek(SeekFrom::Start(0)).map_err(io_err)?;
    engine.clear_all().map_err(engine_err)?;
    engine.allocate(required).map_err(engine_err)?;

    let block_size = config.block_size();
    let first_want = block_size.max(4);
    let mut pending = vec![0u8; first_want];
    let got = read_block(file, &mut pending).map_err(io_err)?;
    pending.truncate(got);
    let mut last = got < first_want;

    let mut eol = EolDetector::new();
    let mut first_line = String::new();
    let mut text = String::with_capacity(block_size + MAX_CARRY);

    loop {
        text.clear();
        let carry = decoder.decode(&pending, &mut text, last);
        if stop_on_malformed && decoder.saw_malformed() {
            return Ok(DecodePass {
                eol: None,
                first_line: String::new(),
                malformed: true,
            });
        }

        if !eol.is_resolved() {
            eol.feed(text.as_bytes());
        }
        if first_line.len() < FIRST_LINE_MAX && !first_line.contains(['\r', '\n']) {
            let room = FIRST_LINE_MAX - first_line.len();
            let mut end = room.min(text.len());
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            first_line.push_str(&text[..end]);
        }

        if !text.is_empty() {
            engine.append(&text).map_err(engine_err)?;
        }
        engine.status().into_result().map_err(engine_err)?;

        if last {
            break;
        }

        let keep = pending.len() - carry;
        pending.drain(..keep);
        let start = pending.len();
        pending.resize(start + block_size, 0);
        let got = read_block(file, &mut pending[start..]).map_err(io_err)?;
        pending.truncate(start + got);
        last = got < block_size;
    }

    Ok(DecodePass {
        eol: eol.finish(),
        first_line,
        malformed: false,
    })
}
