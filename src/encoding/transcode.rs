use encoding_rs::{DecoderResult, Encoder as RsEncoder, EncoderResult, Encoding};

use super::{Codepage, UniMode};

/// Headroom reserved in front of every read block for bytes carried over from
/// the previous one. Larger than the longest incomplete sequence any
/// supported encoding can leave behind.
pub const MAX_CARRY: usize = 8;

/// Number of trailing bytes of `bytes` that start a UTF-8 sequence the block
/// ends in the middle of. Zero when the block ends on a character boundary or
/// the tail is not a valid sequence prefix.
pub fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = if byte & 0xE0 == 0xC0 {
            2
        } else if byte & 0xF0 == 0xE0 {
            3
        } else if byte & 0xF8 == 0xF0 {
            4
        } else {
            return 0;
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[derive(Debug, Clone, Copy)]
enum Charset {
    Utf8,
    Utf16 { big_endian: bool },
    Legacy(&'static Encoding),
}

impl Charset {
    fn resolve(uni_mode: UniMode, codepage: Option<Codepage>, ansi: &'static Encoding) -> Self {
        if let Some(encoding) = codepage.and_then(Codepage::encoding) {
            return Self::from_encoding(encoding);
        }
        match uni_mode {
            UniMode::Ansi => Self::from_encoding(ansi),
            UniMode::Utf8 | UniMode::Utf8Bom | UniMode::Ascii => Charset::Utf8,
            mode => Charset::Utf16 { big_endian: mode.is_big_endian() },
        }
    }

    fn from_encoding(encoding: &'static Encoding) -> Self {
        if encoding == encoding_rs::UTF_8 {
            Charset::Utf8
        } else {
            Charset::Legacy(encoding)
        }
    }
}

/// Block-wise conversion from an external encoding to the engine's UTF-8.
///
/// Each call returns how many trailing bytes of the block it could not decode
/// yet because they start a character that continues in the next block. The
/// caller must put those bytes in front of the next block.
#[derive(Debug)]
pub struct Decoder {
    charset: Charset,
    bom_pending: usize,
    malformed: bool,
}

impl Decoder {
    /// `codepage` takes precedence over `uni_mode`; ANSI text is read with `ansi`.
    pub fn new(uni_mode: UniMode, codepage: Option<Codepage>, ansi: &'static Encoding) -> Self {
        let bom_pending = if codepage.is_some() { 0 } else { uni_mode.bom().len() };
        Self {
            charset: Charset::resolve(uni_mode, codepage, ansi),
            bom_pending,
            malformed: false,
        }
    }

    /// True once UTF-8 input held a sequence that had to be replaced with U+FFFD
    pub fn saw_malformed(&self) -> bool {
        self.malformed
    }

    /// Decode `block`, appending the text to `out`.
    ///
    /// Returns the number of trailing bytes left for the next block. When
    /// `last` is set everything is consumed and any cut sequence becomes U+FFFD.
    pub fn decode(&mut self, block: &[u8], out: &mut String, last: bool) -> usize {
        let skip = self.bom_pending.min(block.len());
        self.bom_pending -= skip;
        let block = &block[skip..];

        match self.charset {
            Charset::Utf8 => {
                let (carry, malformed) = decode_utf8(block, out, last);
                self.malformed |= malformed;
                carry
            }
            Charset::Utf16 { big_endian } => decode_utf16(block, big_endian, out, last),
            Charset::Legacy(encoding) => decode_legacy(encoding, block, out, last),
        }
    }
}

/// Returns the carry and whether anything was invalid
fn decode_utf8(block: &[u8], out: &mut String, last: bool) -> (usize, bool) {
    let carry = if last { 0 } else { incomplete_utf8_tail(block) };
    let body = &block[..block.len() - carry];
    match std::str::from_utf8(body) {
        Ok(text) => {
            out.push_str(text);
            (carry, false)
        }
        Err(_) => {
            out.push_str(&String::from_utf8_lossy(body));
            (carry, true)
        }
    }
}

fn decode_utf16(block: &[u8], big_endian: bool, out: &mut String, last: bool) -> usize {
    let unit_at = |pair: &[u8]| {
        if big_endian {
            u16::from_be_bytes([pair[0], pair[1]])
        } else {
            u16::from_le_bytes([pair[0], pair[1]])
        }
    };

    let mut end = block.len() - block.len() % 2;
    if !last && end >= 2 && (0xD800..0xDC00).contains(&unit_at(&block[end - 2..end])) {
        // high surrogate waiting for its pair
        end -= 2;
    }

    let units = block[..end].chunks_exact(2).map(unit_at);
    out.extend(char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)));

    if last {
        if end < block.len() {
            out.push(char::REPLACEMENT_CHARACTER);
        }
        0
    } else {
        block.len() - end
    }
}

fn decode_legacy(encoding: &'static Encoding, block: &[u8], out: &mut String, last: bool) -> usize {
    if encoding.is_single_byte() {
        out.push_str(&encoding.decode_without_bom_handling(block).0);
        return 0;
    }

    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut pos = 0;
    loop {
        let remaining = block.len() - pos;
        out.reserve(
            decoder
                .max_utf8_buffer_length_without_replacement(remaining)
                .unwrap_or(remaining * 3 + 4),
        );

        let (result, read) = decoder.decode_to_string_without_replacement(&block[pos..], out, true);
        pos += read;
        match result {
            DecoderResult::InputEmpty => return 0,
            DecoderResult::OutputFull => {}
            DecoderResult::Malformed(bad, extra) => {
                let tail = bad as usize + extra as usize;
                if !last && pos == block.len() && tail <= MAX_CARRY {
                    // cut short by the block end rather than really malformed
                    return tail;
                }
                out.push(char::REPLACEMENT_CHARACTER);
                if pos == block.len() {
                    return 0;
                }
            }
        }
    }
}

/// Block-wise conversion from the engine's UTF-8 back to the external encoding.
#[derive(Debug)]
pub struct Encoder {
    charset: Charset,
    bom: &'static [u8],
    bom_written: bool,
    legacy: Option<RsEncoder>,
}

impl Encoder {
    pub fn new(uni_mode: UniMode, codepage: Option<Codepage>, ansi: &'static Encoding) -> Self {
        let charset = Charset::resolve(uni_mode, codepage, ansi);
        let bom = if codepage.is_some() { &[][..] } else { uni_mode.bom() };
        let legacy = match charset {
            Charset::Legacy(encoding) => Some(encoding.new_encoder()),
            _ => None,
        };
        Self {
            charset,
            bom,
            bom_written: false,
            legacy,
        }
    }

    /// Encode a block of UTF-8 bytes that may end in the middle of a character.
    ///
    /// Appends the output to `out` and returns how many trailing bytes were
    /// left for the next call. Characters the target cannot represent become `?`.
    pub fn encode(&mut self, block: &[u8], out: &mut Vec<u8>, last: bool) -> usize {
        if !self.bom_written {
            out.extend_from_slice(self.bom);
            self.bom_written = true;
        }

        let carry = if last { 0 } else { incomplete_utf8_tail(block) };
        let text = String::from_utf8_lossy(&block[..block.len() - carry]);

        match self.charset {
            Charset::Utf8 => out.extend_from_slice(text.as_bytes()),
            Charset::Utf16 { big_endian } => {
                for unit in text.encode_utf16() {
                    let bytes = if big_endian { unit.to_be_bytes() } else { unit.to_le_bytes() };
                    out.extend_from_slice(&bytes);
                }
            }
            Charset::Legacy(_) => {
                if let Some(encoder) = self.legacy.as_mut() {
                    encode_legacy(encoder, &text, out, last);
                }
            }
        }
        carry
    }
}

fn encode_legacy(encoder: &mut RsEncoder, text: &str, out: &mut Vec<u8>, last: bool) {
    let mut pos = 0;
    loop {
        let remaining = text.len() - pos;
        out.reserve(
            encoder
                .max_buffer_length_from_utf8_without_replacement(remaining)
                .unwrap_or(remaining * 2 + 8),
        );

        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(&text[pos..], out, last);
        pos += read;
        match result {
            EncoderResult::InputEmpty => return,
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(_) => {
                out.push(b'?');
                if pos == text.len() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_in_blocks(decoder: &mut Decoder, input: &[u8], block_size: usize) -> String {
        let mut out = String::new();
        let mut buf: Vec<u8> = Vec::with_capacity(block_size + MAX_CARRY);
        let mut chunks = input.chunks(block_size).peekable();
        while let Some(chunk) = chunks.next() {
            buf.extend_from_slice(chunk);
            let last = chunks.peek().is_none();
            let carry = decoder.decode(&buf, &mut out, last);
            let keep = buf.len() - carry;
            buf.drain(..keep);
        }
        out
    }

    fn encode_in_blocks(encoder: &mut Encoder, text: &str, block_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        if text.is_empty() {
            encoder.encode(&[], &mut out, true);
            return out;
        }
        let mut buf: Vec<u8> = Vec::with_capacity(block_size + MAX_CARRY);
        let mut chunks = text.as_bytes().chunks(block_size).peekable();
        while let Some(chunk) = chunks.next() {
            buf.extend_from_slice(chunk);
            let last = chunks.peek().is_none();
            let carry = encoder.encode(&buf, &mut out, last);
            let keep = buf.len() - carry;
            buf.drain(..keep);
        }
        out
    }

    fn ansi() -> &'static Encoding {
        encoding_rs::WINDOWS_1252
    }

    #[test]
    fn test_incomplete_utf8_tail() {
        let euro = "€".as_bytes(); // E2 82 AC
        assert_eq!(incomplete_utf8_tail(b"abc"), 0);
        assert_eq!(incomplete_utf8_tail(&euro[..1]), 1);
        assert_eq!(incomplete_utf8_tail(&euro[..2]), 2);
        assert_eq!(incomplete_utf8_tail(euro), 0);
        assert_eq!(incomplete_utf8_tail(&[b'a', 0xF0, 0x9F, 0x98]), 3);
        assert_eq!(incomplete_utf8_tail(&[0xFF]), 0);
    }

    #[test]
    fn test_utf8_split_character_is_carried() {
        let mut decoder = Decoder::new(UniMode::Utf8, None, ansi());
        let mut out = String::new();
        let bytes = "a€".as_bytes();
        let carry = decoder.decode(&bytes[..2], &mut out, false);
        assert_eq!(carry, 1);
        assert_eq!(out, "a");

        let mut next = bytes[1..2].to_vec();
        next.extend_from_slice(&bytes[2..]);
        assert_eq!(decoder.decode(&next, &mut out, true), 0);
        assert_eq!(out, "a€");
        assert!(!decoder.saw_malformed());
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let mut decoder = Decoder::new(UniMode::Utf8, None, ansi());
        let mut out = String::new();
        decoder.decode(b"abcd", &mut out, false);
        assert!(!decoder.saw_malformed());

        decoder.decode(b"caf\xE9 ", &mut out, true);
        assert!(decoder.saw_malformed());
        assert_eq!(out, "abcdcaf\u{FFFD} ");
    }

    #[test]
    fn test_utf16_surrogate_pair_split() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "x😀".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let mut decoder = Decoder::new(UniMode::Utf16LeBom, None, ansi());
        assert_eq!(decode_in_blocks(&mut decoder, &bytes, 5), "x😀");
    }

    #[test]
    fn test_utf16_odd_trailing_byte_at_end() {
        let mut decoder = Decoder::new(UniMode::Utf16LeNoBom, None, ansi());
        let mut out = String::new();
        decoder.decode(&[b'a', 0, b'b'], &mut out, true);
        assert_eq!(out, "a\u{FFFD}");
    }

    #[test]
    fn test_shift_jis_split_lead_byte() {
        let text = "日本語のテキスト";
        let bytes = encoding_rs::SHIFT_JIS.encode(text).0.into_owned();
        for n in 1..8 {
            let mut decoder = Decoder::new(UniMode::Utf8, Some(Codepage(932)), ansi());
            assert_eq!(decode_in_blocks(&mut decoder, &bytes, n), text, "block size {n}");
        }
    }

    #[test]
    fn test_encoder_writes_bom_once() {
        let mut encoder = Encoder::new(UniMode::Utf8Bom, None, ansi());
        let out = encode_in_blocks(&mut encoder, "abc", 1);
        assert_eq!(out, [0xEF, 0xBB, 0xBF, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encoder_empty_document_still_gets_bom() {
        let mut encoder = Encoder::new(UniMode::Utf16LeBom, None, ansi());
        let out = encode_in_blocks(&mut encoder, "", 16);
        assert_eq!(out, [0xFF, 0xFE]);
    }

    #[test]
    fn test_encoder_unmappable_becomes_question_mark() {
        let mut encoder = Encoder::new(UniMode::Utf8, Some(Codepage(1252)), ansi());
        let out = encode_in_blocks(&mut encoder, "a中b", 64);
        assert_eq!(out, b"a?b");
    }

    fn sample_text() -> impl Strategy<Value = String> {
        proptest::collection::vec(
            prop_oneof![
                Just('a'),
                Just('\n'),
                Just('é'),
                Just('€'),
                Just('ж'),
                Just('日'),
                Just('😀'),
            ],
            0..64,
        )
        .prop_map(|chars| chars.into_iter().collect())
    }

    fn unicode_modes() -> impl Strategy<Value = UniMode> {
        prop_oneof![
            Just(UniMode::Utf8),
            Just(UniMode::Utf8Bom),
            Just(UniMode::Utf16LeBom),
            Just(UniMode::Utf16BeBom),
            Just(UniMode::Utf16LeNoBom),
            Just(UniMode::Utf16BeNoBom),
        ]
    }

    proptest! {
        #[test]
        fn unicode_round_trip_is_byte_identical(text in sample_text(), mode in unicode_modes(), n in 1usize..32) {
            let mut encoder = Encoder::new(mode, None, ansi());
            let encoded = encode_in_blocks(&mut encoder, &text, n);

            let mut decoder = Decoder::new(mode, None, ansi());
            let decoded = decode_in_blocks(&mut decoder, &encoded, n);
            prop_assert_eq!(&decoded, &text);

            let mut encoder = Encoder::new(mode, None, ansi());
            prop_assert_eq!(encode_in_blocks(&mut encoder, &decoded, 4096), encoded);
        }

        #[test]
        fn block_splitting_matches_whole_decode(text in sample_text(), mode in unicode_modes(), n in 1usize..16) {
            let mut encoder = Encoder::new(mode, None, ansi());
            let encoded = encode_in_blocks(&mut encoder, &text, 4096);

            let whole = decode_in_blocks(&mut Decoder::new(mode, None, ansi()), &encoded, encoded.len().max(1));
            let split = decode_in_blocks(&mut Decoder::new(mode, None, ansi()), &encoded, n);
            prop_assert_eq!(split, whole);
        }

        #[test]
        fn utf8_splitting_survives_invalid_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..64), n in 1usize..16) {
            let whole = decode_in_blocks(&mut Decoder::new(UniMode::Utf8, None, ansi()), &bytes, bytes.len().max(1));
            let split = decode_in_blocks(&mut Decoder::new(UniMode::Utf8, None, ansi()), &bytes, n);
            prop_assert_eq!(split, whole);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { max_global_rejects: 65536, ..ProptestConfig::default() })]

        #[test]
        fn codepage_round_trip_is_byte_identical(index in 0usize..64, raw in proptest::collection::vec(any::<u8>(), 0..24), n in 1usize..16) {
            let codepages: Vec<Codepage> = Codepage::all().collect();
            let codepage = codepages[index % codepages.len()];
            let encoding = codepage.encoding().unwrap();

            // Only text the codepage can represent is expected to survive.
            let (text, had_errors) = encoding.decode_without_bom_handling(&raw);
            prop_assume!(!had_errors);
            let (bytes, _, unmappable) = encoding.encode(&text);
            prop_assume!(!unmappable);
            let bytes = bytes.into_owned();
            prop_assume!(encoding.decode_without_bom_handling(&bytes).0 == text);

            let decoded = decode_in_blocks(&mut Decoder::new(UniMode::Utf8, Some(codepage), ansi()), &bytes, n);
            prop_assert_eq!(&decoded, &text);

            let mut encoder = Encoder::new(UniMode::Utf8, Some(codepage), ansi());
            prop_assert_eq!(encode_in_blocks(&mut encoder, &decoded, n), bytes);
        }
    }
}
