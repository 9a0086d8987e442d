use std::iter::Peekable;
use std::vec::IntoIter;

use miette::{Report, Result};
use tracing::debug;

use crate::air::{local_ref, APart, Air, AirStmt, Atom, BinOp, Expr, Instr, Label, StmtKind, SymbolRef, WValue};
use crate::error;
use crate::lexer::{tokenize, Format, Token, TokenKind};
use crate::ops::Mnemonic;
use crate::span::Span;
use crate::symbol::local_name;

/// Transforms token stream into AIR
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Peekable iterator over tokens
    toks: Peekable<IntoIter<Token>>,
    /// Assembly intermediate representation
    air: Air,
    /// Number of `dH` labels seen so far, per digit.
    locals: [u32; 10],
    /// Digit of the local label on the line being parsed.
    pending_local: Option<u8>,
}

/// Local symbol reference forms.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Local {
    Here(u8),
    Back(u8),
    Forward(u8),
}

impl Local {
    fn parse(text: &str) -> Option<Local> {
        let &[d, kind] = text.as_bytes() else {
            return None;
        };
        if !d.is_ascii_digit() {
            return None;
        }
        let d = d - b'0';
        match kind {
            b'H' => Some(Local::Here(d)),
            b'B' => Some(Local::Back(d)),
            b'F' => Some(Local::Forward(d)),
            _ => None,
        }
    }
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str, format: Format) -> Result<Self> {
        let toks = tokenize(src, format)?;
        Ok(AsmParser {
            src,
            toks: toks.into_iter().peekable(),
            air: Air::new(),
            locals: [0; 10],
            pending_local: None,
        })
    }

    fn text(&self, span: Span) -> &'a str {
        &self.src[span.as_range()]
    }

    /// Create AIR out of token stream
    pub fn parse(mut self) -> Result<Air> {
        while self.toks.peek().is_some() {
            let stmt = self.parse_line()?;
            debug!(op = self.text(stmt.span), label = ?stmt.label, "parsed line");
            self.air.add_stmt(stmt);
        }
        Ok(self.air)
    }

    /// `[label] op operand EOL`
    fn parse_line(&mut self) -> Result<AirStmt> {
        let label = self.optional_label();
        self.pending_local = match label.map(|tok| Local::parse(self.text(tok.span))) {
            Some(Some(Local::Here(d))) => Some(d),
            _ => None,
        };

        let op = self.expect(TokenKind::Op, "operation")?;
        let name = self.text(op.span).to_ascii_uppercase();
        let kind = match name.as_str() {
            "EQU" => StmtKind::Equ(self.wvalue(TokenKind::Eol)?),
            "ORIG" => StmtKind::Orig(self.wvalue(TokenKind::Eol)?),
            "CON" => StmtKind::Con(self.wvalue(TokenKind::Eol)?),
            "END" => StmtKind::End(self.wvalue(TokenKind::Eol)?),
            "ALF" => return Err(error::unsupported_directive(op.span, "ALF")),
            _ => {
                let mnemonic =
                    Mnemonic::lookup(&name).ok_or_else(|| error::unknown_op(op.span, &name))?;
                StmtKind::Instr(self.instr(mnemonic)?)
            }
        };
        self.expect(TokenKind::Eol, "end of line")?;

        // Defined after the operand so `dB` on the same line sees the previous `dH`.
        let label = label.map(|tok| self.define_label(tok)).transpose()?;
        Ok(AirStmt {
            label,
            kind,
            span: op.span,
        })
    }

    /// Return label or leave iter untouched and return None
    fn optional_label(&mut self) -> Option<Token> {
        self.toks.next_if(|tok| tok.kind == TokenKind::Label)
    }

    fn define_label(&mut self, tok: Token) -> Result<Label> {
        let text = self.text(tok.span);
        let name = match Local::parse(text) {
            None => text.to_string(),
            Some(Local::Here(d)) => {
                self.locals[d as usize] += 1;
                local_name(d, self.locals[d as usize])
            }
            Some(Local::Back(_) | Local::Forward(_)) => {
                return Err(error::syntax(
                    tok.span,
                    "reference used as label",
                    "local symbols are defined as dH and referenced as dB or dF",
                    format!("`{text}` cannot be defined"),
                ))
            }
        };
        Ok(Label {
            name,
            span: tok.span,
        })
    }

    /// `A,I(F)`, each part optional.
    fn instr(&mut self, mnemonic: Mnemonic) -> Result<Instr> {
        let address = match self.peek_kind() {
            Some(TokenKind::LiteralOpen) => {
                self.toks.next();
                let wvalue = self.wvalue(TokenKind::LiteralClose)?;
                self.expect(TokenKind::LiteralClose, "end of literal")?;
                APart::Literal(wvalue)
            }
            Some(TokenKind::Comma | TokenKind::LParen | TokenKind::Eol) | None => APart::Empty,
            Some(_) => APart::Expr(self.expr()?),
        };
        let index = match self.eat(TokenKind::Comma) {
            true => Some(self.expr()?),
            false => None,
        };
        let field = self.optional_field()?;
        Ok(Instr {
            mnemonic,
            address,
            index,
            field,
        })
    }

    fn optional_field(&mut self) -> Result<Option<Expr>> {
        if !self.eat(TokenKind::LParen) {
            return Ok(None);
        }
        let expr = self.expr()?;
        self.expect(TokenKind::RParen, "`)`")?;
        Ok(Some(expr))
    }

    /// `E(F),E(F),...` up to `end`, which is left unconsumed. May be empty.
    fn wvalue(&mut self, end: TokenKind) -> Result<WValue> {
        let start = self.peek_span();
        let mut parts = Vec::new();
        if self.peek_kind() != Some(end) {
            loop {
                let expr = self.expr()?;
                let field = self.optional_field()?;
                parts.push((expr, field));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        let span = match parts.last() {
            Some((expr, field)) => start.to(field.as_ref().unwrap_or(expr).span),
            None => start,
        };
        Ok(WValue { parts, span })
    }

    /// `[+|-] atom {binop atom}`
    fn expr(&mut self) -> Result<Expr> {
        let start = self.peek_span();
        let negative = match self.peek_kind() {
            Some(TokenKind::Minus) => true,
            Some(TokenKind::Plus) => false,
            _ => {
                let (first, span) = self.atom()?;
                return self.expr_rest(false, first, start.to(span));
            }
        };
        self.toks.next();
        let (first, span) = self.atom()?;
        self.expr_rest(negative, first, start.to(span))
    }

    fn expr_rest(&mut self, negative: bool, first: Atom, mut span: Span) -> Result<Expr> {
        let mut rest = Vec::new();
        while let Some(op) = self.peek_kind().and_then(binop) {
            self.toks.next();
            let (atom, atom_span) = self.atom()?;
            rest.push((op, atom));
            span = span.to(atom_span);
        }
        Ok(Expr {
            negative,
            first,
            rest,
            span,
        })
    }

    fn atom(&mut self) -> Result<(Atom, Span)> {
        match self.toks.next() {
            Some(Token {
                kind: TokenKind::Number(n),
                span,
                ..
            }) => Ok((Atom::Number(n), span)),
            Some(Token {
                kind: TokenKind::Here,
                span,
                ..
            }) => Ok((Atom::Here, span)),
            Some(Token {
                kind: TokenKind::Symbol,
                span,
                ..
            }) => Ok((Atom::Symbol(self.symbol_ref(span)?), span)),
            Some(tok) => Err(self.unexpected(tok, "number, symbol or `*`")),
            None => Err(self.eof()),
        }
    }

    fn symbol_ref(&self, span: Span) -> Result<SymbolRef> {
        let text = self.text(span);
        let name = match Local::parse(text) {
            None => text.to_string(),
            Some(Local::Back(d)) => local_ref(d, self.locals[d as usize], false),
            Some(Local::Forward(d)) => {
                // A `dH` label on this line is not yet counted but comes before `dF`.
                let own = u32::from(self.pending_local == Some(d));
                local_ref(d, self.locals[d as usize] + own, true)
            }
            Some(Local::Here(_)) => {
                return Err(error::syntax(
                    span,
                    "ambiguous local symbol",
                    format!("refer to `{text}` as `{}B` or `{}F`", &text[..1], &text[..1]).as_str(),
                    format!("`{text}` can only be used as a label"),
                ))
            }
        };
        Ok(SymbolRef {
            name,
            text: text.to_string(),
            span,
        })
    }

    fn peek_kind(&mut self) -> Option<TokenKind> {
        self.toks.peek().map(|tok| tok.kind)
    }

    fn peek_span(&mut self) -> Span {
        match self.toks.peek() {
            Some(tok) => tok.span,
            None => Span::new(self.src.len(), 0),
        }
    }

    /// Consume the next token if it is `kind`.
    fn eat(&mut self, kind: TokenKind) -> bool {
        self.toks.next_if(|tok| tok.kind == kind).is_some()
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> Result<Token> {
        match self.toks.next() {
            Some(tok) if tok.kind == expected => Ok(tok),
            Some(unexpected) => Err(self.unexpected(unexpected, what)),
            None => Err(self.eof()),
        }
    }

    fn unexpected(&self, tok: Token, expected: &str) -> Report {
        error::syntax(
            tok.span,
            "unexpected token",
            "lines have the form `LABEL OP ADDRESS,INDEX(FIELD)`",
            format!("Expected {expected}, found {}", tok.kind),
        )
    }

    fn eof(&self) -> Report {
        error::syntax(
            Span::new(self.src.len(), 0),
            "unexpected end of file",
            "you may be missing operands in your last statement",
            "Unexpected end of file",
        )
    }
}

fn binop(kind: TokenKind) -> Option<BinOp> {
    let op = match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Mul => BinOp::Mul,
        TokenKind::Div => BinOp::Div,
        TokenKind::Frac => BinOp::Frac,
        TokenKind::Colon => BinOp::Field,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{kind_of, AsmErrorKind};

    fn parse(src: &str) -> Result<Air> {
        AsmParser::new(src, Format::Free)?.parse()
    }

    fn err_kind(src: &str) -> Option<AsmErrorKind> {
        kind_of(&parse(src).unwrap_err())
    }

    #[test]
    fn instruction_parts() {
        let air = parse("START LDA -X+1,2(1:5)").unwrap();
        let stmt = air.get(0);
        assert_eq!(stmt.label.as_ref().unwrap().name, "START");
        let StmtKind::Instr(instr) = &stmt.kind else {
            panic!("expected an instruction, got {:?}", stmt.kind);
        };
        assert_eq!(instr.mnemonic, Mnemonic::lookup("LDA").unwrap());
        let APart::Expr(address) = &instr.address else {
            panic!("expected an address expression");
        };
        assert!(address.negative);
        assert!(matches!(&address.first, Atom::Symbol(sym) if sym.name == "X"));
        assert_eq!(address.rest, vec![(BinOp::Add, Atom::Number(1))]);
        assert_eq!(instr.index.as_ref().unwrap().first, Atom::Number(2));
        let field = instr.field.as_ref().unwrap();
        assert_eq!(field.rest, vec![(BinOp::Field, Atom::Number(5))]);
    }

    #[test]
    fn empty_parts() {
        let air = parse(" HLT\n JMP ,1\n ENTA (3)").unwrap();
        assert_eq!(air.len(), 3);
        for stmt in air.iter() {
            let StmtKind::Instr(instr) = &stmt.kind else {
                panic!("expected an instruction");
            };
            assert_eq!(instr.address, APart::Empty);
        }
    }

    #[test]
    fn directives() {
        let air = parse("X EQU 5\n ORIG 100\n CON 1(1:2),-3\n END X").unwrap();
        assert!(matches!(air.get(0).kind, StmtKind::Equ(_)));
        assert!(matches!(air.get(1).kind, StmtKind::Orig(_)));
        let StmtKind::Con(wvalue) = &air.get(2).kind else {
            panic!("expected CON");
        };
        assert_eq!(wvalue.parts.len(), 2);
        assert!(wvalue.parts[0].1.is_some());
        assert!(wvalue.parts[1].0.negative);
        assert!(matches!(air.get(3).kind, StmtKind::End(_)));
    }

    #[test]
    fn literal_address() {
        let air = parse(" LDA =1-5=,2").unwrap();
        let StmtKind::Instr(instr) = &air.get(0).kind else {
            panic!("expected an instruction");
        };
        let APart::Literal(wvalue) = &instr.address else {
            panic!("expected a literal");
        };
        assert_eq!(wvalue.parts[0].0.rest, vec![(BinOp::Sub, Atom::Number(5))]);
        assert!(instr.index.is_some());
    }

    #[test]
    fn local_labels_are_numbered() {
        let air = parse("1H NOP\n JMP 1B\n1H JMP 1F\n JMP 1B\n1H NOP").unwrap();
        let labels: Vec<_> = air
            .iter()
            .filter_map(|stmt| stmt.label.as_ref().map(|l| l.name.clone()))
            .collect();
        assert_eq!(labels, vec!["1H#1", "1H#2", "1H#3"]);
        let target = |idx: usize| match &air.get(idx).kind {
            StmtKind::Instr(Instr {
                address: APart::Expr(expr),
                ..
            }) => match &expr.first {
                Atom::Symbol(sym) => sym.name.clone(),
                other => panic!("unexpected atom {other:?}"),
            },
            other => panic!("unexpected statement {other:?}"),
        };
        assert_eq!(target(1), "1H#1");
        assert_eq!(target(2), "1H#3");
        assert_eq!(target(3), "1H#2");
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(err_kind(" FOO 1"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind("LABEL"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind(" LDA 1,"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind(" LDA (1:5"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind(" LDA 1)"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind(" LDA 1+"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind("2B NOP"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind(" JMP 2H"), Some(AsmErrorKind::Syntax));
        assert_eq!(err_kind(" ALF HELLO"), Some(AsmErrorKind::UnsupportedDirective));
        assert_eq!(err_kind("X ALF \"AB\""), Some(AsmErrorKind::UnsupportedDirective));

        // Fixed columns: label 1-10, operation 12-15.
        let fixed = |src: &str| {
            let parsed = AsmParser::new(src, Format::Fixed).and_then(AsmParser::parse);
            kind_of(&parsed.unwrap_err())
        };
        assert_eq!(fixed("X          ALF  HELLO"), Some(AsmErrorKind::UnsupportedDirective));
        assert_eq!(fixed("           ALF   AB C"), Some(AsmErrorKind::UnsupportedDirective));
    }

    #[test]
    fn lowercase_operations() {
        let air = parse(" lda 5").unwrap();
        assert!(matches!(air.get(0).kind, StmtKind::Instr(_)));
    }
}
