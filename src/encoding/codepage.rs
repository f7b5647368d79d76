use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier of a legacy (or explicit UTF-8) character encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Codepage(pub u16);

// Order matters: when several codepages share an encoding the first one wins in reverse lookups.
const CODEPAGES: &[u16] = &[
    1250, 1251, 1252, 1253, 1254, 1255, 1256, 1257, 1258,
    28591, 28592, 28593, 28594, 28595, 28596, 28597, 28598, 28599,
    28600, 28603, 28604, 28605, 28606, 866, 874, 932, 936,
    949, 950, 10007, 20866, 20932, 21866, 51949, 54936, 65001,
];

fn encoding_for(codepage: u16) -> Option<&'static Encoding> {
    let encoding = match codepage {
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1252 => encoding_rs::WINDOWS_1252,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        28591 => encoding_rs::WINDOWS_1252,
        28592 => encoding_rs::ISO_8859_2,
        28593 => encoding_rs::ISO_8859_3,
        28594 => encoding_rs::ISO_8859_4,
        28595 => encoding_rs::ISO_8859_5,
        28596 => encoding_rs::ISO_8859_6,
        28597 => encoding_rs::ISO_8859_7,
        28598 => encoding_rs::ISO_8859_8,
        28599 => encoding_rs::WINDOWS_1254,
        28600 => encoding_rs::ISO_8859_10,
        28603 => encoding_rs::ISO_8859_13,
        28604 => encoding_rs::ISO_8859_14,
        28605 => encoding_rs::ISO_8859_15,
        28606 => encoding_rs::ISO_8859_16,
        866 => encoding_rs::IBM866,
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GBK,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        10007 => encoding_rs::X_MAC_CYRILLIC,
        20866 => encoding_rs::KOI8_R,
        20932 => encoding_rs::EUC_JP,
        21866 => encoding_rs::KOI8_U,
        51949 => encoding_rs::EUC_KR,
        54936 => encoding_rs::GB18030,
        65001 => encoding_rs::UTF_8,
        _ => return None,
    };
    Some(encoding)
}

impl Codepage {
    pub const UTF8: Codepage = Codepage(65001);
    pub const WINDOWS_1252: Codepage = Codepage(1252);

    /// Every codepage this build can transcode
    pub fn all() -> impl Iterator<Item = Codepage> {
        CODEPAGES.iter().map(|cp| Codepage(*cp))
    }

    pub fn encoding(self) -> Option<&'static Encoding> {
        encoding_for(self.0)
    }

    pub fn from_encoding(encoding: &'static Encoding) -> Option<Codepage> {
        CODEPAGES
            .iter()
            .copied()
            .find(|cp| encoding_for(*cp) == Some(encoding))
            .map(Codepage)
    }

    /// Resolve a charset label such as `"Shift_JIS"` or `"latin2"`
    pub fn from_label(label: &str) -> Option<Codepage> {
        Encoding::for_label(label.trim().as_bytes()).and_then(Self::from_encoding)
    }

    pub fn is_utf8(self) -> bool {
        self == Self::UTF8
    }

    pub fn name(self) -> &'static str {
        self.encoding().map(|enc| enc.name()).unwrap_or("unknown")
    }
}

impl fmt::Display for Codepage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_number() {
        assert_eq!(Codepage(932).encoding(), Some(encoding_rs::SHIFT_JIS));
        assert_eq!(Codepage(437).encoding(), None);
    }

    #[test]
    fn test_reverse_lookup_prefers_first_entry() {
        assert_eq!(
            Codepage::from_encoding(encoding_rs::WINDOWS_1252),
            Some(Codepage(1252))
        );
        assert_eq!(Codepage::from_encoding(encoding_rs::EUC_KR), Some(Codepage(949)));
    }

    #[test]
    fn test_from_label() {
        assert_eq!(Codepage::from_label("Shift_JIS"), Some(Codepage(932)));
        assert_eq!(Codepage::from_label("latin2"), Some(Codepage(28592)));
        assert_eq!(Codepage::from_label("utf-8"), Some(Codepage::UTF8));
        assert_eq!(Codepage::from_label("no-such-charset"), None);
    }
}
