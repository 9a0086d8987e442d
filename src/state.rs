use std::cmp::Ordering;
use std::fmt;

use crate::word::{Sign, Word, ADDRESS_MAX, BYTE_SIZE};

/// MIX has 4000 words of memory.
pub const MEMORY_SIZE: usize = 4000;

/// Represents the CPU registers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Register {
    /// Accumulator.
    A,
    I1,
    I2,
    I3,
    I4,
    I5,
    I6,
    /// Extension.
    X,
    /// Jump address, always nonnegative.
    J,
}

impl Register {
    /// The registers in opcode order: `A, I1..I6, X`.
    pub const OPERANDS: [Register; 8] = [
        Register::A,
        Register::I1,
        Register::I2,
        Register::I3,
        Register::I4,
        Register::I5,
        Register::I6,
        Register::X,
    ];

    /// Register selected by the offset of an opcode within its group of eight
    /// (for example `LDA + 3 = LD3`).
    pub fn from_offset(offset: u8) -> Option<Register> {
        Self::OPERANDS.get(offset as usize).copied()
    }

    /// Index register named by the `I` byte of an instruction, `1..=6`.
    pub fn index(i: u8) -> Option<Register> {
        match i {
            1..=6 => Self::from_offset(i),
            _ => None,
        }
    }

    pub fn is_index(self) -> bool {
        matches!(
            self,
            Register::I1 | Register::I2 | Register::I3 | Register::I4 | Register::I5 | Register::I6
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::A => "A",
            Register::I1 => "I1",
            Register::I2 => "I2",
            Register::I3 => "I3",
            Register::I4 => "I4",
            Register::I5 => "I5",
            Register::I6 => "I6",
            Register::X => "X",
            Register::J => "J",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.name())
    }
}

/// Set by comparison instructions, read by conditional jumps.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum Comparison {
    Less,
    #[default]
    Equal,
    Greater,
}

impl From<Ordering> for Comparison {
    fn from(value: Ordering) -> Self {
        match value {
            Ordering::Less => Comparison::Less,
            Ordering::Equal => Comparison::Equal,
            Ordering::Greater => Comparison::Greater,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparison::Less => "LESS",
            Comparison::Equal => "EQUAL",
            Comparison::Greater => "GREATER",
        };
        f.write_str(s)
    }
}

/// rA and rX hold full words. Index registers are meant to hold two bytes but keep any
/// value written to them, so an out-of-range index faults when it is used as an address.
/// rJ holds two bytes and is always positive.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct Registers {
    a: Word,
    x: Word,
    i: [Word; 6],
    j: Word,
}

impl Registers {
    pub fn get(&self, reg: Register) -> Word {
        match reg {
            Register::A => self.a,
            Register::X => self.x,
            Register::J => self.j,
            index => self.i[Self::slot(index)],
        }
    }

    /// Write a register. rJ keeps bytes 4 and 5 of `value`.
    pub fn set(&mut self, reg: Register, value: Word) {
        match reg {
            Register::A => self.a = value,
            Register::X => self.x = value,
            Register::J => self.j = two_bytes(value).with_sign(Sign::Plus),
            index => self.i[Self::slot(index)] = value,
        }
    }

    /// Whether an index register holds a value usable as an address offset.
    pub fn index_in_range(&self, reg: Register) -> bool {
        self.get(reg).magnitude() <= ADDRESS_MAX
    }

    fn slot(reg: Register) -> usize {
        match reg {
            Register::I1 => 0,
            Register::I2 => 1,
            Register::I3 => 2,
            Register::I4 => 3,
            Register::I5 => 4,
            Register::I6 => 5,
            _ => unreachable!("{reg} is not an index register"),
        }
    }
}

fn two_bytes(value: Word) -> Word {
    let (word, _) = Word::wrapping(value.sign(), value.magnitude() % (ADDRESS_MAX + 1));
    debug_assert!(word.magnitude() < BYTE_SIZE * BYTE_SIZE);
    word
}

/// Main memory. Owned by a single machine.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    cells: Box<[Word; MEMORY_SIZE]>,
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            cells: Box::new([Word::ZERO; MEMORY_SIZE]),
        }
    }

    /// Returns `None` for addresses outside `0..4000`.
    pub fn get(&self, addr: i64) -> Option<Word> {
        usize::try_from(addr)
            .ok()
            .and_then(|addr| self.cells.get(addr))
            .copied()
    }

    pub fn get_mut(&mut self, addr: i64) -> Option<&mut Word> {
        usize::try_from(addr)
            .ok()
            .and_then(|addr| self.cells.get_mut(addr))
    }

    pub fn as_slice(&self) -> &[Word] {
        &self.cells[..]
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.cells.iter().filter(|w| **w != Word::ZERO).count();
        write!(f, "Memory {{ {used} nonzero of {MEMORY_SIZE} }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets() {
        assert_eq!(Register::from_offset(0), Some(Register::A));
        assert_eq!(Register::from_offset(3), Some(Register::I3));
        assert_eq!(Register::from_offset(7), Some(Register::X));
        assert_eq!(Register::from_offset(8), None);
        assert_eq!(Register::index(0), None);
        assert_eq!(Register::index(6), Some(Register::I6));
        assert_eq!(Register::index(7), None);
    }

    #[test]
    fn register_widths() {
        let mut regs = Registers::default();
        let big = Word::new(-(5 * 4096 + 17)).unwrap();

        regs.set(Register::I2, big);
        assert_eq!(regs.get(Register::I2), big);
        assert!(!regs.index_in_range(Register::I2));
        regs.set(Register::I2, Word::new(-4095).unwrap());
        assert!(regs.index_in_range(Register::I2));

        regs.set(Register::J, big);
        assert_eq!(regs.get(Register::J).value(), 17);
        assert_eq!(regs.get(Register::J).sign(), Sign::Plus);

        regs.set(Register::A, big);
        assert_eq!(regs.get(Register::A), big);
    }

    #[test]
    fn memory_bounds() {
        let mut mem = Memory::new();
        assert!(mem.get(-1).is_none());
        assert!(mem.get(4000).is_none());
        *mem.get_mut(3999).unwrap() = Word::new(9).unwrap();
        assert_eq!(mem.get(3999).unwrap().value(), 9);
    }
}
