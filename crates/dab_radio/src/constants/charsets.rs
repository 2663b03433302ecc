//! Character set conversion for labels and MOT content names.
//!
//! DOC: ETSI TS 101 756
//! Table 1: Character sets for FIG type 1 data fields and dynamic labels
//! Table 19: Character set indicators for the MOT ContentName

/// DOC: ETSI TS 101 756, Annex C: Complete EBU Latin based repertoire.
/// Entries may expand to multiple UTF-8 bytes; the table is preserved
/// exactly, including the control range glyphs.
#[rustfmt::skip]
static EBU_LATIN_CHARACTERS: [&str; 256] = [
    "\0", "Дҳ", "Д®", "ЕІ", "ДӮ", "Д–", "ДҺ", "Иҳ",
    "Иҡ", "ДҠ", "", "", "Д ", "Д№", "Е»", "Еғ",
    "Д…", "Дҷ", "ДҜ", "Еі", "Дғ", "Д—", "ДҸ", "Иҷ",
    "Иӣ", "ДӢ", "ЕҮ", "Дҡ", "ДЎ", "Дә", "Еј", "",
    " ", "!", "\"", "#", "ЕӮ", "%", "&", "'",
    "(", ")", "*", "+", ",", "-", ".", "/",
    "0", "1", "2", "3", "4", "5", "6", "7",
    "8", "9", ":", ";", "<", "=", ">", "?",
    "@", "A", "B", "C", "D", "E", "F", "G",
    "H", "I", "J", "K", "L", "M", "N", "O",
    "P", "Q", "R", "S", "T", "U", "V", "W",
    "X", "Y", "Z", "[", "Е®", "]", "ЕҒ", "_",
    "Д„", "a", "b", "c", "d", "e", "f", "g",
    "h", "i", "j", "k", "l", "m", "n", "o",
    "p", "q", "r", "s", "t", "u", "v", "w",
    "x", "y", "z", "В«", "ЕҜ", "В»", "ДҪ", "ДҰ",
    "ГЎ", "Г ", "Г©", "ГЁ", "Гӯ", "Г¬", "Гі", "ГІ",
    "Гә", "Г№", "Г‘", "ГҮ", "Еһ", "Гҹ", "ВЎ", "Её",
    "Гў", "ГӨ", "ГӘ", "Г«", "Г®", "ГҜ", "Гҙ", "Г¶",
    "Г»", "Гј", "Гұ", "Г§", "Еҹ", "Дҹ", "Дұ", "Гҝ",
    "Д¶", "Е…", "В©", "Дў", "Дһ", "Дӣ", "ЕҲ", "Е‘",
    "Еҗ", "вӮ¬", "ВЈ", "$", "ДҖ", "Д’", "ДӘ", "ЕӘ",
    "Д·", "ЕҶ", "Д»", "ДЈ", "Дј", "Д°", "Е„", "Еұ",
    "Е°", "Вҝ", "Дҫ", "В°", "ДҒ", "Д“", "Д«", "Е«",
    "ГҒ", "ГҖ", "Гү", "ГҲ", "ГҚ", "ГҢ", "Г“", "Г’",
    "Гҡ", "Гҷ", "Еҳ", "ДҢ", "Е ", "ЕҪ", "Гҗ", "Дҝ",
    "ГӮ", "Г„", "ГҠ", "ГӢ", "ГҺ", "ГҸ", "Г”", "Г–",
    "Гӣ", "Гң", "Еҷ", "ДҚ", "ЕЎ", "Еҫ", "Д‘", "ЕҖ",
    "Гғ", "Г…", "ГҶ", "Е’", "Е·", "Гқ", "Г•", "Гҳ",
    "Гһ", "ЕҠ", "Е”", "ДҶ", "Еҡ", "Е№", "ЕӨ", "Г°",
    "ГЈ", "ГҘ", "ГҰ", "Е“", "Еө", "ГҪ", "Гө", "Гё",
    "Гҫ", "ЕӢ", "Е•", "ДҮ", "Еӣ", "Еә", "ЕҘ", "Д§",
];

fn convert_ebu_latin_to_utf8(buf: &[u8]) -> String {
    let mut utf8_string = String::with_capacity(buf.len());
    for &byte in buf {
        utf8_string.push_str(EBU_LATIN_CHARACTERS[byte as usize]);
    }
    utf8_string
}

/// ISO/IEC 8859-1. Codepoints map directly onto Unicode scalar values;
/// the C0/C1 control ranges are dropped.
fn convert_latin_alphabet_1_to_utf8(buf: &[u8]) -> String {
    let mut utf8_string = String::with_capacity(buf.len());
    for &byte in buf {
        let is_control = byte < 0x20 || (0x7F..=0x9F).contains(&byte);
        if !is_control {
            utf8_string.push(char::from(byte));
        }
    }
    utf8_string
}

/// DAB UTF-16 is big endian and limited to the basic multilingual plane,
/// but surrogate pairs are tolerated when broadcasters emit them anyway.
fn convert_utf16_to_utf8(buf: &[u8]) -> String {
    let code_units = buf
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(code_units)
        .filter_map(|result| match result {
            Ok(c) => Some(c),
            Err(err) => {
                tracing::warn!(target: "charsets", "invalid UTF-16 code unit {:04X}", err.unpaired_surrogate());
                None
            }
        })
        .collect()
}

fn convert_passthrough_utf8(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).into_owned()
}

/// Converts a charset-tagged label into UTF-8. Unknown charsets fall back
/// to a lossy passthrough with a warning, matching kind (b) protocol
/// violation handling.
pub fn convert_charset_to_utf8(buf: &[u8], charset: u8) -> String {
    match charset {
        0b0000 => convert_ebu_latin_to_utf8(buf),
        0b0100 => convert_latin_alphabet_1_to_utf8(buf),
        0b0110 => convert_utf16_to_utf8(buf),
        0b1111 => convert_passthrough_utf8(buf),
        charset => {
            let string = convert_passthrough_utf8(buf);
            tracing::warn!(target: "charsets", "unknown charset={} buf={:?}", charset, string);
            string
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ebu_latin_alphanumerics_are_identity() {
        let input: Vec<u8> = (b'0'..=b'9').chain(b'A'..=b'Z').chain(b'a'..=b'z').collect();
        let expected: String = input.iter().map(|&b| char::from(b)).collect();
        assert_eq!(convert_charset_to_utf8(&input, 0), expected);
    }

    #[test]
    fn ebu_latin_conversion_follows_the_table() {
        // conversion concatenates table entries verbatim, so labels mix
        // ASCII and multi-byte repertoire entries freely
        let input = [b'D', 0x24, b'B', 0xA9];
        let expected: String = input
            .iter()
            .map(|&byte| EBU_LATIN_CHARACTERS[byte as usize])
            .collect();
        assert_eq!(convert_charset_to_utf8(&input, 0), expected);
    }

    #[test]
    fn ebu_latin_repertoire_entries_are_not_ascii() {
        // 0x24 is the zloty sign slot in the EBU repertoire, not a
        // dollar, and 0xA9 is the euro slot; both expand to multi-byte
        // UTF-8 in the inherited table
        for index in [0x24usize, 0xA9] {
            let converted = convert_charset_to_utf8(&[index as u8], 0);
            assert_eq!(converted, EBU_LATIN_CHARACTERS[index]);
            assert!(converted.len() > 1, "entry {:#04X} should be multi-byte", index);
            assert!(!converted.is_ascii(), "entry {:#04X} should be outside ASCII", index);
        }
    }

    #[test]
    fn ucs2_big_endian_decodes() {
        let input = [0x00, 0x44, 0x00, 0x41, 0x00, 0x42, 0x01, 0x07];
        assert_eq!(convert_charset_to_utf8(&input, 6), "DAB\u{107}");
    }

    #[test]
    fn utf8_passes_through() {
        let input = "Stacja Testowa \u{17C}\u{F3}\u{142}w".as_bytes();
        assert_eq!(convert_charset_to_utf8(input, 15), "Stacja Testowa \u{17C}\u{F3}\u{142}w");
    }

    #[test]
    fn latin1_maps_high_range() {
        let input = [b'C', b'a', b'f', b'\xE9'];
        assert_eq!(convert_charset_to_utf8(&input, 4), "Caf\u{E9}");
    }
}
