//! MIX character codes used by the character-oriented devices (units 16..=20).

/// Characters for codes `0..=55`. Codes 10, 20 and 21 are the Greek letters Knuth uses in
/// place of characters that never made it onto the printer chain.
const CHARS: [char; 56] = [
    ' ', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'Δ', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q',
    'R', 'Σ', 'Π', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', '.', ',', '(', ')', '+', '-', '*', '/', '=', '$', '<', '>', '@', ';', ':', '\'',
];

/// Code of the digit `0`; digits run consecutively from here.
pub const DIGIT_ZERO: u8 = 30;

/// Character for a code, `None` for codes 56..=63 which have no glyph.
pub fn char_of(code: u8) -> Option<char> {
    CHARS.get(code as usize).copied()
}

/// Code for a character. Lowercase letters map to their uppercase codes.
pub fn code_of(ch: char) -> Option<u8> {
    let ch = ch.to_ascii_uppercase();
    CHARS.iter().position(|&c| c == ch).map(|code| code as u8)
}

/// Render codes as text, using `?` for codes without a glyph.
pub fn decode_str(codes: &[u8]) -> String {
    codes.iter().map(|&code| char_of(code).unwrap_or('?')).collect()
}

/// Convert text to codes, failing on the first character with no code.
pub fn encode_str(text: &str) -> Result<Vec<u8>, char> {
    text.chars().map(|ch| code_of(ch).ok_or(ch)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table() {
        assert_eq!(char_of(0), Some(' '));
        assert_eq!(char_of(10), Some('Δ'));
        assert_eq!(char_of(DIGIT_ZERO), Some('0'));
        assert_eq!(char_of(39), Some('9'));
        assert_eq!(char_of(55), Some('\''));
        assert_eq!(char_of(56), None);
        for code in 0..56 {
            assert_eq!(code_of(char_of(code).unwrap()), Some(code));
        }
    }

    #[test]
    fn strings() {
        assert_eq!(encode_str("Hi 9"), Ok(vec![8, 9, 0, 39]));
        assert_eq!(encode_str("a#"), Err('#'));
        assert_eq!(decode_str(&[20, 21, 63]), "ΣΠ?");
    }
}
