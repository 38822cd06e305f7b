//! Byte-encoding support for string fields and table/field names.
//!
//! The reference driver lets a caller pick any Python codec by name; this
//! crate supports the two codecs the spec calls out by name (`cp1251`,
//! `cp437`) plus UTF-8, and falls back to raw passthrough when no encoding
//! is configured or the name is unrecognized — mirroring the reference's
//! behavior of simply forwarding `encoding=None` straight to `bytes`.

/// DOS code page 437's upper half (0x80..=0xFF); the lower half is ASCII.
#[rustfmt::skip]
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å',
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ',
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»',
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐',
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧',
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀',
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩',
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00a0}',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Cp1251,
    Cp437,
}

impl Encoding {
    pub fn by_name(name: &str) -> Option<Encoding> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(Encoding::Utf8),
            "cp1251" | "windows-1251" => Some(Encoding::Cp1251),
            "cp437" | "ibm437" => Some(Encoding::Cp437),
            _ => None,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Cp1251 => {
                let (decoded, _, _) = encoding_rs::WINDOWS_1251.decode(bytes);
                decoded.into_owned()
            }
            Encoding::Cp437 => bytes
                .iter()
                .map(|&b| if b < 0x80 { b as char } else { CP437_HIGH[(b - 0x80) as usize] })
                .collect(),
        }
    }
}

/// Decodes with an optional encoding; raw bytes pass through as a lossy
/// UTF-8 view when no encoding is configured, matching the reference's
/// "None ⇒ uninterpreted bytes" behavior as closely as a typed string
/// return value allows.
pub fn decode_opt(bytes: &[u8], encoding: Option<Encoding>) -> String {
    match encoding {
        Some(enc) => enc.decode(bytes),
        None => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cp1251_decodes_cyrillic() {
        // "Привет" in windows-1251
        let bytes = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        assert_eq!(Encoding::Cp1251.decode(&bytes), "Привет");
    }

    #[test]
    fn cp437_ascii_range_is_identity() {
        assert_eq!(Encoding::Cp437.decode(b"Hello"), "Hello");
    }

    #[test]
    fn cp437_high_range_maps_box_drawing() {
        assert_eq!(Encoding::Cp437.decode(&[0xC4]), "─");
    }

    #[test]
    fn no_encoding_passes_bytes_through_as_chars() {
        assert_eq!(decode_opt(b"abc", None), "abc");
    }

    #[test]
    fn by_name_is_case_insensitive() {
        assert_eq!(Encoding::by_name("CP1251"), Some(Encoding::Cp1251));
        assert_eq!(Encoding::by_name("bogus"), None);
    }
}
