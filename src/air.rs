use miette::Result;
use tracing::debug;

use crate::error;
use crate::ops::{Mnemonic, Op};
use crate::program::Program;
use crate::span::Span;
use crate::state::MEMORY_SIZE;
use crate::symbol::{local_name, LiteralPool, PatchSite, SymbolTable};
use crate::word::{FieldSpec, Word, ADDRESS_MAX, WORD_MAX, WORD_RANGE};

/// Assembly intermediate representation: the parsed statements of a program, in order.
#[derive(Clone, Default, Debug)]
pub struct Air {
    stmts: Vec<AirStmt>,
}

/// Single MIXAL line with its optional label.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AirStmt {
    pub label: Option<Label>,
    pub kind: StmtKind,
    /// Span of the operation field.
    pub span: Span,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Label {
    /// Name in the symbol table. Local labels are numbered, see [`local_name`].
    pub name: String,
    pub span: Span,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum StmtKind {
    Instr(Instr),
    Equ(WValue),
    Orig(WValue),
    Con(WValue),
    End(WValue),
}

/// A machine instruction `OP A,I(F)` before resolution.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instr {
    pub mnemonic: Mnemonic,
    pub address: APart,
    pub index: Option<Expr>,
    pub field: Option<Expr>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum APart {
    Empty,
    Expr(Expr),
    /// `=w-value=`, replaced by the address of a pooled constant.
    Literal(WValue),
}

/// `E1(F1),E2(F2),...`, each expression stored into field `Fi` of an initially zero word.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct WValue {
    pub parts: Vec<(Expr, Option<Expr>)>,
    pub span: Span,
}

/// `[sign] atom {binop atom}`, evaluated strictly left to right.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Expr {
    pub negative: bool,
    pub first: Atom,
    pub rest: Vec<(BinOp, Atom)>,
    pub span: Span,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Atom {
    Number(i64),
    Symbol(SymbolRef),
    /// `*`, the location of the current line.
    Here,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SymbolRef {
    /// Name in the symbol table.
    pub name: String,
    /// Text as written, for diagnostics.
    pub text: String,
    pub span: Span,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    /// `a // b = floor(a * 64^5 / b)`
    Frac,
    /// `a:b = 8a + b`
    Field,
}

impl BinOp {
    /// `None` on division by zero.
    fn apply(self, lhs: i64, rhs: i64) -> Option<i64> {
        let value = match self {
            BinOp::Add => lhs + rhs,
            BinOp::Sub => lhs - rhs,
            BinOp::Mul => lhs * rhs,
            BinOp::Div => lhs.checked_div(rhs)?,
            BinOp::Frac => (lhs * WORD_RANGE).checked_div(rhs)?,
            BinOp::Field => 8 * lhs + rhs,
        };
        Some(value)
    }
}

impl Atom {
    fn value(&self, table: &SymbolTable, here: i64) -> Option<i64> {
        match self {
            Atom::Number(n) => Some(*n),
            Atom::Symbol(sym) => table.value(&sym.name),
            Atom::Here => Some(here),
        }
    }
}

impl Expr {
    /// `Ok(None)` if the expression depends on a symbol without a value yet.
    pub fn eval(&self, table: &SymbolTable, here: i64) -> Result<Option<i64>> {
        let Some(mut acc) = self.first.value(table, here) else {
            return Ok(None);
        };
        if self.negative {
            acc = -acc;
        }
        for (op, atom) in &self.rest {
            let Some(rhs) = atom.value(table, here) else {
                return Ok(None);
            };
            acc = op.apply(acc, rhs).ok_or_else(|| {
                error::syntax(
                    self.span,
                    "division by zero",
                    "the right side of `/` and `//` must not be zero",
                    "Division by zero in expression",
                )
            })?;
            if acc.abs() > WORD_MAX {
                return Err(error::literal_overflow(self.span, acc, WORD_MAX));
            }
        }
        Ok(Some(acc))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolRef> {
        std::iter::once(&self.first)
            .chain(self.rest.iter().map(|(_, atom)| atom))
            .filter_map(|atom| match atom {
                Atom::Symbol(sym) => Some(sym),
                _ => None,
            })
    }
}

impl WValue {
    /// `Ok(None)` if any part depends on a symbol without a value yet.
    pub fn eval(&self, table: &SymbolTable, here: i64) -> Result<Option<Word>> {
        let mut word = Word::ZERO;
        for (expr, field) in &self.parts {
            let Some(value) = expr.eval(table, here)? else {
                return Ok(None);
            };
            let spec = match field {
                None => FieldSpec::FULL,
                Some(field) => {
                    let Some(f) = field.eval(table, here)? else {
                        return Ok(None);
                    };
                    u8::try_from(f)
                        .ok()
                        .and_then(FieldSpec::decode)
                        .ok_or_else(|| error::field_spec(field.span, f))?
                }
            };
            let value = Word::new(value)
                .map_err(|_| error::literal_overflow(expr.span, value, WORD_MAX))?;
            word.set_field(spec, value);
        }
        Ok(Some(word))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolRef> {
        self.parts.iter().flat_map(|(expr, field)| {
            expr.symbols()
                .chain(field.iter().flat_map(|field| field.symbols()))
        })
    }

    /// Evaluate with only the symbols defined so far.
    fn eval_now(&self, table: &SymbolTable, here: i64) -> Result<Word> {
        match self.eval(table, here)? {
            Some(word) => Ok(word),
            None => Err(self.first_undefined(table)),
        }
    }

    fn first_undefined(&self, table: &SymbolTable) -> miette::Report {
        match self.symbols().find(|sym| table.value(&sym.name).is_none()) {
            Some(sym) => error::forward_in_directive(sym.span, &sym.text),
            None => error::forward_in_directive(self.span, "?"),
        }
    }
}

impl Air {
    pub fn new() -> Self {
        Air { stmts: Vec::new() }
    }

    pub fn add_stmt(&mut self, stmt: AirStmt) {
        self.stmts.push(stmt)
    }

    pub fn get(&self, idx: usize) -> &AirStmt {
        &self.stmts[idx]
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AirStmt> {
        self.stmts.iter()
    }

    /// Resolve every symbol and literal and emit the program.
    ///
    /// The first pass lays out addresses, defines labels and encodes every word it can,
    /// recording a patch site for each word that depends on a later definition. After
    /// `END` flushes the literal pool, the second pass re-encodes the patch sites with the
    /// complete symbol table.
    pub fn backpatch(&self) -> Result<Program> {
        let mut resolver = Resolver::default();
        let end = resolver.layout(self)?;
        resolver.table.check_defined()?;

        for site in resolver.table.sites().to_vec() {
            let stmt = &self.stmts[site.stmt];
            let here = resolver.locs[site.stmt];
            let word = match &stmt.kind {
                StmtKind::Instr(instr) => resolver.encode(instr, here)?,
                StmtKind::Con(wvalue) => wvalue.eval(&resolver.table, here)?,
                _ => None,
            };
            match word {
                Some(word) => resolver.words[site.slot].1 = word,
                // Only reachable for symbols without a patch site of their own.
                None => return Err(error::undefined_symbol(stmt.span, "?")),
            }
        }

        let (end_stmt, wvalue) = end;
        let start = match wvalue.eval(&resolver.table, resolver.locs[end_stmt])? {
            Some(word) => word.value(),
            None => return Err(wvalue.first_undefined(&resolver.table)),
        };
        let start = check_location(start, wvalue.span)?;
        debug!(
            words = resolver.words.len(),
            start,
            patched = resolver.table.sites().len(),
            "resolved program"
        );
        Ok(Program::new(resolver.words, start, resolver.table.exports()))
    }
}

#[derive(Default)]
struct Resolver {
    table: SymbolTable,
    pool: LiteralPool,
    words: Vec<(u16, Word)>,
    /// Location counter value at each statement.
    locs: Vec<i64>,
}

impl Resolver {
    /// First pass. Returns the `END` statement and its operand.
    fn layout<'a>(&mut self, air: &'a Air) -> Result<(usize, &'a WValue)> {
        let mut loc: i64 = 0;
        let mut end = None;

        for (idx, stmt) in air.stmts.iter().enumerate() {
            if end.is_some() {
                return Err(error::syntax(
                    stmt.span,
                    "after END",
                    "END must be the last line of the program",
                    "Statement after END",
                ));
            }
            self.locs.push(loc);
            let label_value = match &stmt.kind {
                StmtKind::Equ(wvalue) => wvalue.eval_now(&self.table, loc)?.value(),
                StmtKind::End(_) => {
                    loc = self.flush_literals(loc, stmt.span)?;
                    loc
                }
                _ => loc,
            };
            if let Some(label) = &stmt.label {
                self.table.define(&label.name, label_value, label.span)?;
            }
            debug!(stmt = idx, loc, label = ?stmt.label.as_ref().map(|l| &l.name), "layout");

            match &stmt.kind {
                StmtKind::Equ(_) => {}
                StmtKind::Orig(wvalue) => loc = wvalue.eval_now(&self.table, loc)?.value(),
                StmtKind::Con(wvalue) => {
                    let word = wvalue.eval(&self.table, loc)?;
                    let refs: Vec<_> = wvalue.symbols().cloned().collect();
                    self.emit(idx, loc, stmt.span, word, &refs)?;
                    loc += 1;
                }
                StmtKind::Instr(instr) => {
                    let mut refs: Vec<_> = instr.symbols().cloned().collect();
                    if let APart::Literal(wvalue) = &instr.address {
                        let value = wvalue.eval_now(&self.table, loc)?;
                        refs.push(SymbolRef {
                            name: self.pool.request(value),
                            text: format!("={value}="),
                            span: wvalue.span,
                        });
                    }
                    let word = self.encode(instr, loc)?;
                    self.emit(idx, loc, stmt.span, word, &refs)?;
                    loc += 1;
                }
                StmtKind::End(wvalue) => end = Some((idx, wvalue)),
            }
        }

        end.ok_or_else(|| {
            let span = air.stmts.last().map(|s| s.span).unwrap_or_default();
            error::syntax(
                span,
                "program ends here",
                "finish the program with `END start`",
                "Program has no END",
            )
        })
    }

    /// Append a word, or a placeholder with patch sites for every symbol it still needs.
    fn emit(
        &mut self,
        stmt: usize,
        loc: i64,
        span: Span,
        word: Option<Word>,
        refs: &[SymbolRef],
    ) -> Result<()> {
        let addr = check_location(loc, span)?;
        let slot = self.words.len();
        self.words.push((addr, word.unwrap_or(Word::ZERO)));
        if word.is_none() {
            for sym in refs {
                if self.table.value(&sym.name).is_none() {
                    let site = PatchSite { slot, stmt };
                    self.table.add_patch(&sym.name, &sym.text, sym.span, site);
                }
            }
        }
        Ok(())
    }

    /// Place pooled literals at `loc` onwards. Returns the next free location.
    fn flush_literals(&mut self, mut loc: i64, span: Span) -> Result<i64> {
        let entries: Vec<_> = self
            .pool
            .entries()
            .map(|(word, name)| (*word, name.clone()))
            .collect();
        for (word, name) in entries {
            let addr = check_location(loc, span)?;
            self.words.push((addr, word));
            self.table.define(&name, loc, span)?;
            loc += 1;
        }
        Ok(loc)
    }

    /// Encode an instruction, `Ok(None)` while it depends on an undefined symbol.
    fn encode(&mut self, instr: &Instr, here: i64) -> Result<Option<Word>> {
        let (address, address_span) = match &instr.address {
            APart::Empty => (0, None),
            APart::Expr(expr) => match expr.eval(&self.table, here)? {
                Some(value) => (value, Some(expr.span)),
                None => return Ok(None),
            },
            APart::Literal(wvalue) => {
                let name = self.pool.request(wvalue.eval_now(&self.table, here)?);
                match self.table.value(&name) {
                    Some(value) => (value, Some(wvalue.span)),
                    None => return Ok(None),
                }
            }
        };
        if address.abs() > ADDRESS_MAX {
            let span = address_span.unwrap_or_default();
            return Err(error::literal_overflow(span, address, ADDRESS_MAX));
        }

        let index = match &instr.index {
            None => 0,
            Some(expr) => match expr.eval(&self.table, here)? {
                Some(i @ 0..=6) => i as u8,
                Some(i) => {
                    return Err(error::syntax(
                        expr.span,
                        "invalid index",
                        "index registers are numbered 1 to 6, or 0 for none",
                        format!("Index {i} does not name a register"),
                    ))
                }
                None => return Ok(None),
            },
        };

        let field = match &instr.field {
            None => instr.mnemonic.field,
            Some(expr) => match expr.eval(&self.table, here)? {
                Some(f) => {
                    let valid = u8::try_from(f).ok().filter(|f| *f < 64).filter(|f| {
                        let field_op = Op::decode(instr.mnemonic.code, instr.mnemonic.field)
                            .is_some_and(Op::uses_field_spec);
                        !field_op || FieldSpec::decode(*f).is_some()
                    });
                    valid.ok_or_else(|| error::field_spec(expr.span, f))?
                }
                None => return Ok(None),
            },
        };

        let word = Word::instruction(address, index, field, instr.mnemonic.code)
            .map_err(|_| error::literal_overflow(address_span.unwrap_or_default(), address, ADDRESS_MAX))?;
        Ok(Some(word))
    }
}

impl Instr {
    /// Symbols in the address, index and field parts. Literal contents are excluded.
    pub fn symbols(&self) -> impl Iterator<Item = &SymbolRef> {
        let address = match &self.address {
            APart::Expr(expr) => Some(expr),
            _ => None,
        };
        address
            .into_iter()
            .chain(self.index.iter())
            .chain(self.field.iter())
            .flat_map(Expr::symbols)
    }
}

fn check_location(loc: i64, span: Span) -> Result<u16> {
    if (0..MEMORY_SIZE as i64).contains(&loc) {
        Ok(loc as u16)
    } else {
        Err(error::syntax(
            span,
            "outside of memory",
            "use ORIG to place the program within locations 0 to 3999",
            format!("Location {loc} is outside of memory"),
        ))
    }
}

/// Table name for a reference to local symbol `d` given how many `dH` came before.
pub(crate) fn local_ref(digit: u8, defined_before: u32, forward: bool) -> String {
    if forward {
        local_name(digit, defined_before + 1)
    } else {
        local_name(digit, defined_before)
    }
}
