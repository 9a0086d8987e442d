//! Character cursor used by the operand scanner, modelled on `rustc_lexer`'s cursor.

use std::str::Chars;

/// Peekable iterator over a char sequence that tracks its byte offset in the source.
#[derive(Clone)]
pub struct Cursor<'a> {
    /// Offset of the start of `input` in the full source.
    base: usize,
    input: &'a str,
    chars: Chars<'a>,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str, base: usize) -> Cursor<'a> {
        Cursor {
            base,
            input,
            chars: input.chars(),
        }
    }

    /// Peek the next char without consuming it, `'\0'` at the end of input.
    pub fn first(&self) -> char {
        self.chars.clone().next().unwrap_or('\0')
    }

    pub fn is_eof(&self) -> bool {
        self.chars.as_str().is_empty()
    }

    /// Move to the next char.
    pub fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    /// Consume chars while the predicate holds.
    pub fn take_while(&mut self, mut pred: impl FnMut(char) -> bool) {
        while !self.is_eof() && pred(self.first()) {
            self.bump();
        }
    }

    /// Offset of the next char in the full source.
    pub fn pos(&self) -> usize {
        self.base + self.input.len() - self.chars.as_str().len()
    }

    /// Text between an earlier position and the current one.
    pub fn since(&self, start: usize) -> &'a str {
        &self.input[start - self.base..self.pos() - self.base]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_offsets() {
        let mut cur = Cursor::new("AB12+C", 10);
        assert_eq!(cur.first(), 'A');
        let start = cur.pos();
        cur.take_while(|c| c.is_ascii_alphanumeric());
        assert_eq!(cur.since(start), "AB12");
        assert_eq!(cur.pos(), 14);
        assert_eq!(cur.bump(), Some('+'));
        cur.bump();
        assert!(cur.is_eof());
        assert_eq!(cur.first(), '\0');
    }
}
