use std::fmt;

use miette::Result;
use tracing::trace;

use crate::error;
use crate::lexer::cursor::Cursor;
use crate::span::Span;
use crate::word::WORD_MAX;

pub mod cursor;

/// Operations whose operand is a w-value instead of `A,I(F)`.
pub const DIRECTIVES: [&str; 4] = ["EQU", "ORIG", "CON", "END"];

/// How lines are split into label, operation and operand.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Format {
    /// Punch-card columns: label in 1-10, operation in 12-15, operand from 17.
    Fixed,
    /// Whitespace separated fields. A line starting with a blank has no label.
    #[default]
    Free,
}

/// Field of the line a token was scanned in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Part {
    Label,
    Op,
    Address,
    Index,
    Field,
    WValue,
    Literal,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Label,
    Op,
    Number(i64),
    Symbol,
    /// `*` as the location counter.
    Here,
    Plus,
    Minus,
    /// `*` as multiplication.
    Mul,
    Div,
    /// `//`
    Frac,
    Colon,
    Comma,
    LParen,
    RParen,
    LiteralOpen,
    LiteralClose,
    Eol,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Label => f.write_str("label"),
            TokenKind::Op => f.write_str("operation"),
            TokenKind::Number(n) => write!(f, "number {n}"),
            TokenKind::Symbol => f.write_str("symbol"),
            TokenKind::Here => f.write_str("`*`"),
            TokenKind::Plus => f.write_str("`+`"),
            TokenKind::Minus => f.write_str("`-`"),
            TokenKind::Mul => f.write_str("`*`"),
            TokenKind::Div => f.write_str("`/`"),
            TokenKind::Frac => f.write_str("`//`"),
            TokenKind::Colon => f.write_str("`:`"),
            TokenKind::Comma => f.write_str("`,`"),
            TokenKind::LParen => f.write_str("`(`"),
            TokenKind::RParen => f.write_str("`)`"),
            TokenKind::LiteralOpen => f.write_str("literal"),
            TokenKind::LiteralClose => f.write_str("end of literal"),
            TokenKind::Eol => f.write_str("end of line"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub part: Part,
}

impl Token {
    fn new(kind: TokenKind, span: Span, part: Part) -> Self {
        Token { kind, span, part }
    }
}

/// Scan a whole program. Every non-comment line yields its tokens followed by
/// [`TokenKind::Eol`].
pub fn tokenize(src: &str, format: Format) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        format,
        toks: Vec::new(),
    };
    let mut offset = 0;
    for line in src.split_inclusive('\n') {
        lexer.line(line.trim_end_matches(['\n', '\r']), offset)?;
        offset += line.len();
    }
    Ok(lexer.toks)
}

/// A slice of a line together with its offset in the source.
type Field<'a> = (usize, &'a str);

struct Fields<'a> {
    label: Option<Field<'a>>,
    op: Option<Field<'a>>,
    operand: Option<Field<'a>>,
}

struct Lexer {
    format: Format,
    toks: Vec<Token>,
}

impl Lexer {
    fn line(&mut self, text: &str, offset: usize) -> Result<()> {
        if text.trim().is_empty() || text.starts_with('*') {
            return Ok(());
        }
        let fields = match self.format {
            Format::Fixed => fixed_fields(text, offset),
            Format::Free => match free_fields(text, offset) {
                Some(fields) => fields,
                None => return Ok(()),
            },
        };
        let first = self.toks.len();

        if let Some((pos, label)) = fields.label {
            let span = Span::new(pos, label.len());
            check_symbol(label, span)?;
            self.toks.push(Token::new(TokenKind::Label, span, Part::Label));
        }
        if let Some((pos, op)) = fields.op {
            let span = Span::new(pos, op.len());
            self.toks.push(Token::new(TokenKind::Op, span, Part::Op));
            let name = op.to_ascii_uppercase();
            // ALF operands are free text, left for the parser to reject.
            if name != "ALF" {
                if let Some((pos, operand)) = fields.operand {
                    self.operand(operand, pos, DIRECTIVES.contains(&name.as_str()))?;
                }
            }
        }
        let end = Span::new(offset + text.len(), 0);
        self.toks.push(Token::new(TokenKind::Eol, end, Part::Op));
        trace!(offset, tokens = self.toks.len() - first, "lexed line");
        Ok(())
    }

    /// Scan an operand field, tracking which part of `A,I(F)` (or of a w-value) each token
    /// belongs to.
    fn operand(&mut self, text: &str, base: usize, wvalue: bool) -> Result<()> {
        let mut cur = Cursor::new(text, base);
        let mut part = if wvalue { Part::WValue } else { Part::Address };
        // Part to return to after a field specification.
        let mut outer = part;
        let mut after_operand = false;

        while !cur.is_eof() {
            let start = cur.pos();
            let Some(c) = cur.bump() else { break };
            let (kind, tag) = match c {
                c if c.is_ascii_alphanumeric() => {
                    cur.take_while(|c| c.is_ascii_alphanumeric());
                    let text = cur.since(start);
                    let span = Span::new(start, text.len());
                    if text.bytes().all(|b| b.is_ascii_digit()) {
                        let value = text
                            .parse::<i64>()
                            .ok()
                            .filter(|v| *v <= WORD_MAX)
                            .ok_or_else(|| error::literal_overflow(span, text, WORD_MAX))?;
                        (TokenKind::Number(value), part)
                    } else {
                        check_symbol(text, span)?;
                        (TokenKind::Symbol, part)
                    }
                }
                '*' if after_operand => (TokenKind::Mul, part),
                '*' => (TokenKind::Here, part),
                '+' => (TokenKind::Plus, part),
                '-' => (TokenKind::Minus, part),
                '/' if cur.first() == '/' => {
                    cur.bump();
                    (TokenKind::Frac, part)
                }
                '/' => (TokenKind::Div, part),
                ':' => (TokenKind::Colon, part),
                ',' => {
                    if part == Part::Address {
                        part = Part::Index;
                        outer = part;
                    }
                    (TokenKind::Comma, part)
                }
                '(' => {
                    outer = part;
                    part = Part::Field;
                    (TokenKind::LParen, part)
                }
                ')' => {
                    let tag = part;
                    part = outer;
                    (TokenKind::RParen, tag)
                }
                '=' if part == Part::Literal => {
                    part = Part::Address;
                    outer = part;
                    (TokenKind::LiteralClose, Part::Literal)
                }
                '=' if part == Part::Address => {
                    part = Part::Literal;
                    outer = part;
                    (TokenKind::LiteralOpen, part)
                }
                '=' => {
                    return Err(error::syntax(
                        Span::new(start, 1),
                        "unexpected literal",
                        "literal constants may only appear as the address part",
                        "Literal constant in the wrong place",
                    ))
                }
                c => return Err(error::unknown_char(Span::new(start, c.len_utf8()), c)),
            };
            after_operand = matches!(
                kind,
                TokenKind::Number(_) | TokenKind::Symbol | TokenKind::Here | TokenKind::RParen
            );
            let span = Span::new(start, cur.pos() - start);
            self.toks.push(Token::new(kind, span, tag));
        }
        Ok(())
    }
}

/// Symbols are 1 to 10 letters and digits, at least one of them a letter.
fn check_symbol(text: &str, span: Span) -> Result<()> {
    let valid = (1..=10).contains(&text.len())
        && text.bytes().all(|b| b.is_ascii_alphanumeric())
        && text.bytes().any(|b| b.is_ascii_alphabetic());
    if valid {
        Ok(())
    } else {
        Err(error::bad_symbol(span, text))
    }
}

/// Byte offset of the character in column `col` (0-based), or the end of the line.
fn column(text: &str, col: usize) -> usize {
    text.char_indices()
        .nth(col)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Non-blank part of `text[from..to]`.
fn trimmed(text: &str, from: usize, to: usize, offset: usize) -> Option<Field<'_>> {
    let slice = &text[from..to];
    let trimmed = slice.trim_start();
    let start = from + slice.len() - trimmed.len();
    let trimmed = trimmed.trim_end();
    (!trimmed.is_empty()).then_some((offset + start, trimmed))
}

fn fixed_fields(text: &str, offset: usize) -> Fields<'_> {
    let label = trimmed(text, 0, column(text, 10), offset);
    let op = trimmed(text, column(text, 11), column(text, 15), offset);
    let from = column(text, 16);
    let rest = &text[from..];
    let len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let operand = (len > 0).then_some((offset + from, &rest[..len]));
    Fields { label, op, operand }
}

/// `None` for lines holding only a comment.
fn free_fields(text: &str, offset: usize) -> Option<Fields<'_>> {
    let code = match text.find(';') {
        Some(i) => &text[..i],
        None => text,
    };
    if code.trim().is_empty() {
        return None;
    }
    let mut words = split_fields(code, offset).into_iter();
    let label = if code.starts_with(char::is_whitespace) {
        None
    } else {
        words.next()
    };
    Some(Fields {
        label,
        op: words.next(),
        operand: words.next(),
    })
}

fn split_fields(text: &str, offset: usize) -> Vec<Field<'_>> {
    let mut fields = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                fields.push((offset + s, &text[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        fields.push((offset + s, &text[s..]));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{kind_of, AsmErrorKind};

    fn kinds(src: &str, format: Format) -> Vec<TokenKind> {
        tokenize(src, format)
            .unwrap()
            .into_iter()
            .map(|tok| tok.kind)
            .collect()
    }

    use TokenKind::*;

    #[test]
    fn free_format_instruction() {
        let src = "START LDA X,1(1:5) load it";
        let toks = tokenize(src, Format::Free).unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Label,
                Op,
                Symbol,
                Comma,
                Number(1),
                LParen,
                Number(1),
                Colon,
                Number(5),
                RParen,
                Eol
            ]
        );
        assert_eq!(&src[toks[0].span.as_range()], "START");
        assert_eq!(&src[toks[1].span.as_range()], "LDA");
        assert_eq!(&src[toks[2].span.as_range()], "X");
        assert_eq!(toks[2].part, Part::Address);
        assert_eq!(toks[4].part, Part::Index);
        assert_eq!(toks[6].part, Part::Field);
    }

    #[test]
    fn leading_blank_means_no_label() {
        assert_eq!(kinds("  HLT", Format::Free), vec![Op, Eol]);
        assert_eq!(kinds("  JMP *  ; loop forever", Format::Free), vec![Op, Here, Eol]);
        assert_eq!(kinds("* a comment\n; another\n\n", Format::Free), vec![]);
    }

    #[test]
    fn star_depends_on_position() {
        assert_eq!(
            kinds(" ENTA **2", Format::Free),
            vec![Op, Here, Mul, Number(2), Eol]
        );
        assert_eq!(
            kinds(" ENTA *-3", Format::Free),
            vec![Op, Here, Minus, Number(3), Eol]
        );
        assert_eq!(
            kinds(" ENTA 10//3", Format::Free),
            vec![Op, Number(10), Frac, Number(3), Eol]
        );
    }

    #[test]
    fn literals() {
        let toks = tokenize(" LDA =5(1:2)=,1", Format::Free).unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Op,
                LiteralOpen,
                Number(5),
                LParen,
                Number(1),
                Colon,
                Number(2),
                RParen,
                LiteralClose,
                Comma,
                Number(1),
                Eol
            ]
        );
        assert_eq!(toks[2].part, Part::Literal);
        assert_eq!(toks[10].part, Part::Index);
    }

    #[test]
    fn directives_scan_w_values() {
        let toks = tokenize("X CON 1(1:2),3", Format::Free).unwrap();
        assert_eq!(toks[2].part, Part::WValue);
        assert_eq!(toks[4].part, Part::Field);
        assert_eq!(toks[8].kind, Comma);
        assert_eq!(toks[8].part, Part::WValue);
        assert_eq!(toks[9].part, Part::WValue);

        // ALF text is not scanned.
        assert_eq!(kinds("  ALF \"HI #\"", Format::Free), vec![Op, Eol]);
    }

    #[test]
    fn fixed_columns() {
        let src = format!("{:<10} {:<4} {}\n{:<10} {:<4}", "START", "LDA", "2000,2(0:3) comment", "", "HLT");
        let toks = tokenize(&src, Format::Fixed).unwrap();
        let kinds: Vec<_> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Label,
                Op,
                Number(2000),
                Comma,
                Number(2),
                LParen,
                Number(0),
                Colon,
                Number(3),
                RParen,
                Eol,
                Op,
                Eol
            ]
        );
        assert_eq!(&src[toks[1].span.as_range()], "LDA");
        assert_eq!(&src[toks[11].span.as_range()], "HLT");
    }

    #[test]
    fn fixed_and_free_agree() {
        let free = "LOOP INC1 1\n J1N LOOP\n";
        let fixed = format!(
            "{:<10} {:<4} {}\n{:<10} {:<4} {}\n",
            "LOOP", "INC1", "1", "", "J1N", "LOOP"
        );
        assert_eq!(kinds(free, Format::Free), kinds(&fixed, Format::Fixed));
    }

    #[test]
    fn errors() {
        let err = tokenize(" LDA #", Format::Free).unwrap_err();
        assert_eq!(kind_of(&err), Some(AsmErrorKind::Syntax));
        let err = tokenize("ABCDEFGHIJK NOP", Format::Free).unwrap_err();
        assert_eq!(kind_of(&err), Some(AsmErrorKind::Syntax));
        let err = tokenize(" ENTA 12345678901", Format::Free).unwrap_err();
        assert_eq!(kind_of(&err), Some(AsmErrorKind::LiteralOverflow));
        let err = tokenize(" LDA 1,=2=", Format::Free).unwrap_err();
        assert_eq!(kind_of(&err), Some(AsmErrorKind::Syntax));
    }
}
