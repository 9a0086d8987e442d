use std::fmt;

use crate::state::MEMORY_SIZE;
use crate::symbol::FxMap;
use crate::word::{Sign, Word, WordError};

/// Output of the assembler: words tagged with their addresses and a start address.
///
/// Immutable once built; [`crate::runtime::Machine::load`] copies it into memory.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Program {
    words: Vec<(u16, Word)>,
    start: u16,
    symbols: FxMap<String, i64>,
}

/// Failure to read an object file.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectError {
    /// Input ended in the middle of a record.
    Truncated,
    /// Address of a word or the start address is outside of memory.
    AddressOutOfRange(u16),
    /// Sign byte other than 0 or 1.
    BadSign(u8),
    Word(WordError),
}

impl std::error::Error for ObjectError {}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => f.write_str("object file is truncated"),
            Self::AddressOutOfRange(addr) => {
                write!(f, "address {addr} in object file is outside of memory")
            }
            Self::BadSign(byte) => write!(f, "invalid sign byte {byte} in object file"),
            Self::Word(e) => write!(f, "invalid word in object file: {e}"),
        }
    }
}

impl From<WordError> for ObjectError {
    fn from(value: WordError) -> Self {
        ObjectError::Word(value)
    }
}

/// Bytes per word record: address, sign, five bytes.
const RECORD_LEN: usize = 2 + 1 + 5;

impl Program {
    pub fn new(words: Vec<(u16, Word)>, start: u16, symbols: FxMap<String, i64>) -> Self {
        Program {
            words,
            start,
            symbols,
        }
    }

    /// Words in emission order. A later word for the same address replaces an earlier one.
    pub fn words(&self) -> &[(u16, Word)] {
        &self.words
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn symbols(&self) -> &FxMap<String, i64> {
        &self.symbols
    }

    pub fn symbol(&self, name: &str) -> Option<i64> {
        self.symbols.get(name).copied()
    }

    /// Word that will be at `addr` after loading.
    pub fn word_at(&self, addr: u16) -> Option<Word> {
        self.words
            .iter()
            .rev()
            .find(|(a, _)| *a == addr)
            .map(|(_, word)| *word)
    }

    /// Serialize as an object file: big-endian start address, then per word a
    /// big-endian address, a sign byte (0 for `+`, 1 for `-`) and the five bytes.
    /// Symbols are not kept.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.words.len() * RECORD_LEN);
        out.extend_from_slice(&self.start.to_be_bytes());
        for (addr, word) in &self.words {
            out.extend_from_slice(&addr.to_be_bytes());
            out.push(word.sign().is_negative() as u8);
            out.extend_from_slice(&word.bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Program, ObjectError> {
        let (start, records) = match bytes {
            [hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]), rest),
            _ => return Err(ObjectError::Truncated),
        };
        check_address(start)?;
        if records.len() % RECORD_LEN != 0 {
            return Err(ObjectError::Truncated);
        }

        let mut words = Vec::with_capacity(records.len() / RECORD_LEN);
        for record in records.chunks_exact(RECORD_LEN) {
            let addr = check_address(u16::from_be_bytes([record[0], record[1]]))?;
            let sign = match record[2] {
                0 => Sign::Plus,
                1 => Sign::Minus,
                other => return Err(ObjectError::BadSign(other)),
            };
            let mut data = [0; 5];
            data.copy_from_slice(&record[3..]);
            words.push((addr, Word::from_bytes(sign, data)?));
        }
        Ok(Program::new(words, start, FxMap::default()))
    }
}

fn check_address(addr: u16) -> Result<u16, ObjectError> {
    if (addr as usize) < MEMORY_SIZE {
        Ok(addr)
    } else {
        Err(ObjectError::AddressOutOfRange(addr))
    }
}
