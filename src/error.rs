use std::fmt::Display;

use miette::{miette, LabeledSpan, Report, Severity};

use crate::span::Span;

/// Classes of assembly-time failure, one per diagnostic code.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AsmErrorKind {
    Syntax,
    UndefinedSymbol,
    DuplicateSymbol,
    FieldSpecOutOfRange,
    LiteralOverflow,
    UnsupportedDirective,
}

impl AsmErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            AsmErrorKind::Syntax => "asm::syntax",
            AsmErrorKind::UndefinedSymbol => "asm::undefined_symbol",
            AsmErrorKind::DuplicateSymbol => "asm::duplicate_symbol",
            AsmErrorKind::FieldSpecOutOfRange => "asm::field_spec",
            AsmErrorKind::LiteralOverflow => "asm::literal_overflow",
            AsmErrorKind::UnsupportedDirective => "asm::unsupported_directive",
        }
    }
}

/// Recover the kind of an assembly error from its diagnostic code.
pub fn kind_of(report: &Report) -> Option<AsmErrorKind> {
    let code = report.code()?.to_string();
    let kind = match code.as_str() {
        "asm::syntax" => AsmErrorKind::Syntax,
        "asm::undefined_symbol" => AsmErrorKind::UndefinedSymbol,
        "asm::duplicate_symbol" => AsmErrorKind::DuplicateSymbol,
        "asm::field_spec" => AsmErrorKind::FieldSpecOutOfRange,
        "asm::literal_overflow" => AsmErrorKind::LiteralOverflow,
        "asm::unsupported_directive" => AsmErrorKind::UnsupportedDirective,
        _ => return None,
    };
    Some(kind)
}

// Lexer and parser errors

pub fn syntax(span: Span, label: &str, help: &str, msg: impl Display) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::syntax",
        help = help.to_string(),
        labels = vec![LabeledSpan::at(span, label)],
        "{msg}",
    )
}

pub fn unknown_char(span: Span, c: char) -> Report {
    syntax(
        span,
        "unknown character",
        "operands are built from symbols, numbers, `*`, `=` and `+ - * / // : , ( )`",
        format!("Encountered an unexpected character `{c}`"),
    )
}

pub fn bad_symbol(span: Span, text: &str) -> Report {
    syntax(
        span,
        "invalid symbol",
        "symbols are 1 to 10 letters and digits with at least one letter",
        format!("`{text}` is not a valid symbol"),
    )
}

pub fn unknown_op(span: Span, name: &str) -> Report {
    syntax(
        span,
        "unknown operation",
        "check the operation code table",
        format!("Unknown operation `{name}`"),
    )
}

pub fn unsupported_directive(span: Span, name: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::unsupported_directive",
        help = "use CON with character codes instead",
        labels = vec![LabeledSpan::at(span, "unsupported")],
        "The {name} directive is not supported",
    )
}

// Resolution errors

pub fn undefined_symbol(span: Span, name: &str) -> Report {
    let help = match name.as_bytes() {
        [d, b'B'] if d.is_ascii_digit() => {
            format!("no `{}H` is defined before this line", *d as char)
        }
        [d, b'F'] if d.is_ascii_digit() => {
            format!("no `{}H` is defined after this line", *d as char)
        }
        _ => format!("define `{name}` as a label or with EQU"),
    };
    miette!(
        severity = Severity::Error,
        code = "asm::undefined_symbol",
        help = help,
        labels = vec![LabeledSpan::at(span, "undefined")],
        "Symbol `{name}` is never defined",
    )
}

pub fn forward_in_directive(span: Span, name: &str) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::undefined_symbol",
        help = "EQU, ORIG and literal constants may only use symbols defined on earlier lines",
        labels = vec![LabeledSpan::at(span, "not yet defined")],
        "Symbol `{name}` is not defined at this point",
    )
}

pub fn duplicate_symbol(span: Span, first: Option<Span>, name: &str) -> Report {
    let mut labels = vec![LabeledSpan::at(span, "defined again here")];
    if let Some(first) = first {
        labels.push(LabeledSpan::at(first, "first defined here"));
    }
    miette!(
        severity = Severity::Error,
        code = "asm::duplicate_symbol",
        help = "symbols may only be defined once, use local symbols like 2H for reuse",
        labels = labels,
        "Duplicate symbol `{name}`",
    )
}

pub fn field_spec(span: Span, value: i64) -> Report {
    let help = if (0..64).contains(&value) {
        format!("({}:{}) does not satisfy L <= R <= 5", value / 8, value % 8)
    } else {
        "field specifications are encoded as 8L + R with L <= R <= 5".to_string()
    };
    miette!(
        severity = Severity::Error,
        code = "asm::field_spec",
        help = help,
        labels = vec![LabeledSpan::at(span, "invalid field")],
        "Field specification {value} is out of range",
    )
}

pub fn literal_overflow(span: Span, value: impl Display, limit: i64) -> Report {
    miette!(
        severity = Severity::Error,
        code = "asm::literal_overflow",
        help = format!("magnitude must be at most {limit}"),
        labels = vec![LabeledSpan::at(span, "too large")],
        "Value {value} does not fit",
    )
}
