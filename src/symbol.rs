use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use miette::Result;

use crate::error;
use crate::span::Span;
use crate::word::Word;

/// Insertion-ordered map, so symbols list in order of first appearance.
pub type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Reference to an entry in the patch-site arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct PatchId(usize);

/// An emitted word that could not be encoded in the first pass.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PatchSite {
    /// Index into the emitted words.
    pub slot: usize,
    /// Statement that produced the word.
    pub stmt: usize,
}

#[derive(Clone, Default, Debug)]
pub struct Symbol {
    value: Option<i64>,
    defined_at: Option<Span>,
    /// Source text and location of the first reference, for diagnostics.
    first_use: Option<(String, Span)>,
    patches: Vec<PatchId>,
}

impl Symbol {
    /// `None` until the defining line has been processed.
    pub fn value(&self) -> Option<i64> {
        self.value
    }

    pub fn is_defined(&self) -> bool {
        self.defined_at.is_some()
    }

    /// Words waiting on this symbol.
    pub fn patches(&self) -> &[PatchId] {
        &self.patches
    }
}

/// Symbol table for both passes, together with the arena of pending patch sites.
#[derive(Clone, Default, Debug)]
pub struct SymbolTable {
    symbols: FxMap<String, Symbol>,
    sites: Vec<PatchSite>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `name` a value. Fails if it already has one.
    pub fn define(&mut self, name: &str, value: i64, span: Span) -> Result<()> {
        let symbol = self.symbols.entry(name.to_string()).or_default();
        if symbol.is_defined() {
            return Err(error::duplicate_symbol(span, symbol.defined_at, name));
        }
        symbol.value = Some(value);
        symbol.defined_at = Some(span);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn value(&self, name: &str) -> Option<i64> {
        self.symbols.get(name).and_then(Symbol::value)
    }

    /// Record that the word at `site` refers to `name`, which has no value yet.
    pub fn add_patch(&mut self, name: &str, text: &str, span: Span, site: PatchSite) -> PatchId {
        let id = PatchId(self.sites.len());
        self.sites.push(site);
        let symbol = self.symbols.entry(name.to_string()).or_default();
        symbol
            .first_use
            .get_or_insert_with(|| (text.to_string(), span));
        symbol.patches.push(id);
        id
    }

    pub fn site(&self, id: PatchId) -> PatchSite {
        self.sites[id.0]
    }

    /// Every patch site, in the order they were recorded.
    pub fn sites(&self) -> &[PatchSite] {
        &self.sites
    }

    /// Fail on the first symbol that was referenced but never defined.
    pub fn check_defined(&self) -> Result<()> {
        for symbol in self.symbols.values() {
            if let (None, Some((text, span))) = (symbol.value, &symbol.first_use) {
                return Err(error::undefined_symbol(*span, text));
            }
        }
        Ok(())
    }

    /// Symbols written by the programmer, without local or literal symbols.
    pub fn exports(&self) -> FxMap<String, i64> {
        self.symbols
            .iter()
            .filter(|(name, _)| !is_internal(name))
            .filter_map(|(name, symbol)| Some((name.clone(), symbol.value?)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Local symbol instances contain `#` and literal constants are named `=n=`; neither can
/// be written in source.
pub fn is_internal(name: &str) -> bool {
    name.contains('#') || name.starts_with('=')
}

/// Name under which the `n`th definition of local symbol `dH` is stored.
pub fn local_name(digit: u8, n: u32) -> String {
    format!("{digit}H#{n}")
}

/// Anonymous constants, deduplicated by value, laid out after the program at `END`.
#[derive(Clone, Default, Debug)]
pub struct LiteralPool {
    entries: FxMap<Word, String>,
}

impl LiteralPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the pool symbol holding `word`, adding it if new.
    pub fn request(&mut self, word: Word) -> String {
        let next = self.entries.len();
        self.entries
            .entry(word)
            .or_insert_with(|| format!("={next}="))
            .clone()
    }

    /// Entries in order of first request.
    pub fn entries(&self) -> impl Iterator<Item = (&Word, &String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{kind_of, AsmErrorKind};

    #[test]
    fn define_and_patch() {
        let mut table = SymbolTable::new();
        let site = PatchSite { slot: 3, stmt: 5 };
        let id = table.add_patch("LOOP", "LOOP", Span::new(10, 4), site);
        assert_eq!(table.value("LOOP"), None);
        assert!(!table.get("LOOP").unwrap().is_defined());
        assert_eq!(table.site(id), site);

        let err = table.check_defined().unwrap_err();
        assert_eq!(kind_of(&err), Some(AsmErrorKind::UndefinedSymbol));

        table.define("LOOP", 100, Span::new(0, 4)).unwrap();
        assert_eq!(table.value("LOOP"), Some(100));
        assert_eq!(table.get("LOOP").unwrap().patches(), &[id]);
        table.check_defined().unwrap();

        let err = table.define("LOOP", 7, Span::new(20, 4)).unwrap_err();
        assert_eq!(kind_of(&err), Some(AsmErrorKind::DuplicateSymbol));
    }

    #[test]
    fn exports_skip_internal_names() {
        let mut table = SymbolTable::new();
        table.define("START", 3000, Span::default()).unwrap();
        table.define(&local_name(2, 1), 3001, Span::default()).unwrap();
        table.define("=0=", 3002, Span::default()).unwrap();
        let exports = table.exports();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports["START"], 3000);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn literals_dedupe_by_value() {
        let mut pool = LiteralPool::new();
        let five = Word::new(5).unwrap();
        let a = pool.request(five);
        let b = pool.request(Word::new(-5).unwrap());
        assert_eq!(pool.request(five), a);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert!(is_internal(&a));
        assert_eq!(pool.entries().next(), Some((&five, &a)));
    }
}
