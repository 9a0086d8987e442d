use std::fmt;

use crate::state::Register;
use crate::word::{FieldSpec, Word};

/// Every operation the machine understands, keyed by opcode `C` and modifier `F`.
///
/// Opcodes that share a `C` value (5, 6, 39, 40..=47, 48..=55) are split apart here so that
/// execution can match exhaustively.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Nop,
    Add,
    Sub,
    Mul,
    Div,
    Num,
    Char,
    Hlt,
    Shift(Shift),
    Move,
    Load(Register),
    LoadNeg(Register),
    /// Includes `STJ`.
    Store(Register),
    Stz,
    Jbus,
    Ioc,
    In,
    Out,
    Jred,
    Jump(Jump),
    JumpReg(Register, RegCond),
    Inc(Register),
    Dec(Register),
    Ent(Register),
    Enn(Register),
    Cmp(Register),
    Fcmp,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Shift {
    Sla,
    Sra,
    Slax,
    Srax,
    Slc,
    Src,
}

/// Jumps sharing opcode 39.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Jump {
    Jmp,
    /// Jump without saving the return address in rJ.
    Jsj,
    Jov,
    Jnov,
    Less,
    Equal,
    Greater,
    GreaterEqual,
    NotEqual,
    LessEqual,
}

/// Conditions tested against the sign of a register, opcodes 40..=47.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegCond {
    Negative,
    Zero,
    Positive,
    NonNegative,
    NonZero,
    NonPositive,
}

impl RegCond {
    pub fn holds(self, value: i64) -> bool {
        match self {
            RegCond::Negative => value < 0,
            RegCond::Zero => value == 0,
            RegCond::Positive => value > 0,
            RegCond::NonNegative => value >= 0,
            RegCond::NonZero => value != 0,
            RegCond::NonPositive => value <= 0,
        }
    }
}

impl Op {
    /// Decode an opcode and modifier. `None` for combinations without a mnemonic.
    pub fn decode(c: u8, f: u8) -> Option<Op> {
        let field_op = |op: Op| FieldSpec::decode(f).map(|_| op);
        let op = match c {
            0 => Op::Nop,
            1 => return field_op(Op::Add),
            2 => return field_op(Op::Sub),
            3 => return field_op(Op::Mul),
            4 => return field_op(Op::Div),
            5 => match f {
                0 => Op::Num,
                1 => Op::Char,
                2 => Op::Hlt,
                _ => return None,
            },
            6 => Op::Shift(match f {
                0 => Shift::Sla,
                1 => Shift::Sra,
                2 => Shift::Slax,
                3 => Shift::Srax,
                4 => Shift::Slc,
                5 => Shift::Src,
                _ => return None,
            }),
            7 => Op::Move,
            8..=15 => return field_op(Op::Load(Register::from_offset(c - 8)?)),
            16..=23 => return field_op(Op::LoadNeg(Register::from_offset(c - 16)?)),
            24..=31 => return field_op(Op::Store(Register::from_offset(c - 24)?)),
            32 => return field_op(Op::Store(Register::J)),
            33 => return field_op(Op::Stz),
            34 => Op::Jbus,
            35 => Op::Ioc,
            36 => Op::In,
            37 => Op::Out,
            38 => Op::Jred,
            39 => Op::Jump(match f {
                0 => Jump::Jmp,
                1 => Jump::Jsj,
                2 => Jump::Jov,
                3 => Jump::Jnov,
                4 => Jump::Less,
                5 => Jump::Equal,
                6 => Jump::Greater,
                7 => Jump::GreaterEqual,
                8 => Jump::NotEqual,
                9 => Jump::LessEqual,
                _ => return None,
            }),
            40..=47 => {
                let reg = Register::from_offset(c - 40)?;
                let cond = match f {
                    0 => RegCond::Negative,
                    1 => RegCond::Zero,
                    2 => RegCond::Positive,
                    3 => RegCond::NonNegative,
                    4 => RegCond::NonZero,
                    5 => RegCond::NonPositive,
                    _ => return None,
                };
                Op::JumpReg(reg, cond)
            }
            48..=55 => {
                let reg = Register::from_offset(c - 48)?;
                match f {
                    0 => Op::Inc(reg),
                    1 => Op::Dec(reg),
                    2 => Op::Ent(reg),
                    3 => Op::Enn(reg),
                    _ => return None,
                }
            }
            56 if f == 6 => Op::Fcmp,
            56..=63 => return field_op(Op::Cmp(Register::from_offset(c - 56)?)),
            _ => return None,
        };
        Some(op)
    }

    /// Whether `F` selects a field of the operand rather than a unit, count or condition.
    pub fn uses_field_spec(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Load(_)
                | Op::LoadNeg(_)
                | Op::Store(_)
                | Op::Stz
                | Op::Cmp(_)
        )
    }

    /// Execution time in MIX time units, not counting device interlock.
    pub fn time(self, f: u8) -> u64 {
        match self {
            Op::Nop => 1,
            Op::Add | Op::Sub => 2,
            Op::Mul => 10,
            Op::Div => 12,
            Op::Num | Op::Char | Op::Hlt => 10,
            Op::Shift(_) => 2,
            Op::Move => 1 + 2 * f as u64,
            Op::Load(_) | Op::LoadNeg(_) | Op::Store(_) | Op::Stz => 2,
            Op::Jbus | Op::Jred => 1,
            Op::Ioc | Op::In | Op::Out => 1,
            Op::Jump(_) | Op::JumpReg(..) => 1,
            Op::Inc(_) | Op::Dec(_) | Op::Ent(_) | Op::Enn(_) => 1,
            Op::Cmp(_) => 2,
            Op::Fcmp => 4,
        }
    }
}

/// Suffix used in mnemonics for each operand register.
fn reg_suffix(reg: Register) -> &'static str {
    match reg {
        Register::A => "A",
        Register::I1 => "1",
        Register::I2 => "2",
        Register::I3 => "3",
        Register::I4 => "4",
        Register::I5 => "5",
        Register::I6 => "6",
        Register::X => "X",
        Register::J => "J",
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Nop => f.write_str("NOP"),
            Op::Add => f.write_str("ADD"),
            Op::Sub => f.write_str("SUB"),
            Op::Mul => f.write_str("MUL"),
            Op::Div => f.write_str("DIV"),
            Op::Num => f.write_str("NUM"),
            Op::Char => f.write_str("CHAR"),
            Op::Hlt => f.write_str("HLT"),
            Op::Shift(shift) => f.write_str(match shift {
                Shift::Sla => "SLA",
                Shift::Sra => "SRA",
                Shift::Slax => "SLAX",
                Shift::Srax => "SRAX",
                Shift::Slc => "SLC",
                Shift::Src => "SRC",
            }),
            Op::Move => f.write_str("MOVE"),
            Op::Load(reg) => write!(f, "LD{}", reg_suffix(*reg)),
            Op::LoadNeg(reg) => write!(f, "LD{}N", reg_suffix(*reg)),
            Op::Store(reg) => write!(f, "ST{}", reg_suffix(*reg)),
            Op::Stz => f.write_str("STZ"),
            Op::Jbus => f.write_str("JBUS"),
            Op::Ioc => f.write_str("IOC"),
            Op::In => f.write_str("IN"),
            Op::Out => f.write_str("OUT"),
            Op::Jred => f.write_str("JRED"),
            Op::Jump(jump) => f.write_str(match jump {
                Jump::Jmp => "JMP",
                Jump::Jsj => "JSJ",
                Jump::Jov => "JOV",
                Jump::Jnov => "JNOV",
                Jump::Less => "JL",
                Jump::Equal => "JE",
                Jump::Greater => "JG",
                Jump::GreaterEqual => "JGE",
                Jump::NotEqual => "JNE",
                Jump::LessEqual => "JLE",
            }),
            Op::JumpReg(reg, cond) => {
                let cond = match cond {
                    RegCond::Negative => "N",
                    RegCond::Zero => "Z",
                    RegCond::Positive => "P",
                    RegCond::NonNegative => "NN",
                    RegCond::NonZero => "NZ",
                    RegCond::NonPositive => "NP",
                };
                write!(f, "J{}{}", reg_suffix(*reg), cond)
            }
            Op::Inc(reg) => write!(f, "INC{}", reg_suffix(*reg)),
            Op::Dec(reg) => write!(f, "DEC{}", reg_suffix(*reg)),
            Op::Ent(reg) => write!(f, "ENT{}", reg_suffix(*reg)),
            Op::Enn(reg) => write!(f, "ENN{}", reg_suffix(*reg)),
            Op::Cmp(reg) => write!(f, "CMP{}", reg_suffix(*reg)),
            Op::Fcmp => f.write_str("FCMP"),
        }
    }
}

/// A decoded instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub op: Op,
    /// Signed `AA` part, before indexing.
    pub address: i64,
    pub index: u8,
    pub field: u8,
}

impl Instruction {
    /// `None` if the opcode/modifier pair does not name an operation.
    pub fn decode(word: Word) -> Option<Instruction> {
        let op = Op::decode(word.opcode(), word.modifier())?;
        Some(Instruction {
            op,
            address: word.address(),
            index: word.index(),
            field: word.modifier(),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<4} {}", self.op, self.address)?;
        if self.index != 0 {
            write!(f, ",{}", self.index)?;
        }
        write!(f, "({})", self.field)
    }
}

/// Opcode and default modifier for a symbolic operation name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mnemonic {
    pub code: u8,
    pub field: u8,
}

impl Mnemonic {
    const fn new(code: u8, field: u8) -> Self {
        Mnemonic { code, field }
    }

    /// Look up an operation name (uppercase). Directives are not mnemonics.
    pub fn lookup(name: &str) -> Option<Mnemonic> {
        let fixed = match name {
            "NOP" => Some(Self::new(0, 0)),
            "ADD" => Some(Self::new(1, 5)),
            "SUB" => Some(Self::new(2, 5)),
            "MUL" => Some(Self::new(3, 5)),
            "DIV" => Some(Self::new(4, 5)),
            "NUM" => Some(Self::new(5, 0)),
            "CHAR" => Some(Self::new(5, 1)),
            "HLT" => Some(Self::new(5, 2)),
            "SLA" => Some(Self::new(6, 0)),
            "SRA" => Some(Self::new(6, 1)),
            "SLAX" => Some(Self::new(6, 2)),
            "SRAX" => Some(Self::new(6, 3)),
            "SLC" => Some(Self::new(6, 4)),
            "SRC" => Some(Self::new(6, 5)),
            "MOVE" => Some(Self::new(7, 1)),
            "STJ" => Some(Self::new(32, 2)),
            "STZ" => Some(Self::new(33, 5)),
            "JBUS" => Some(Self::new(34, 0)),
            "IOC" => Some(Self::new(35, 0)),
            "IN" => Some(Self::new(36, 0)),
            "OUT" => Some(Self::new(37, 0)),
            "JRED" => Some(Self::new(38, 0)),
            "JMP" => Some(Self::new(39, 0)),
            "JSJ" => Some(Self::new(39, 1)),
            "JOV" => Some(Self::new(39, 2)),
            "JNOV" => Some(Self::new(39, 3)),
            "JL" => Some(Self::new(39, 4)),
            "JE" => Some(Self::new(39, 5)),
            "JG" => Some(Self::new(39, 6)),
            "JGE" => Some(Self::new(39, 7)),
            "JNE" => Some(Self::new(39, 8)),
            "JLE" => Some(Self::new(39, 9)),
            "FCMP" => Some(Self::new(56, 6)),
            _ => None,
        };
        fixed.or_else(|| Self::lookup_register_family(name))
    }

    /// Names of the form `LDr`, `LDrN`, `STr`, `Jrcc`, `INCr`, `DECr`, `ENTr`, `ENNr`, `CMPr`.
    fn lookup_register_family(name: &str) -> Option<Mnemonic> {
        fn split<'a>(name: &'a str, prefix: &str) -> Option<(u8, &'a str)> {
            let rest = name.strip_prefix(prefix)?;
            let mut chars = rest.chars();
            let offset = match chars.next()? {
                'A' => 0,
                c @ '1'..='6' => c as u8 - b'0',
                'X' => 7,
                _ => return None,
            };
            Some((offset, chars.as_str()))
        }

        if let Some((offset, rest)) = split(name, "LD") {
            return match rest {
                "" => Some(Self::new(8 + offset, 5)),
                "N" => Some(Self::new(16 + offset, 5)),
                _ => None,
            };
        }
        if let Some((offset, "")) = split(name, "ST") {
            return Some(Self::new(24 + offset, 5));
        }
        if let Some((offset, "")) = split(name, "CMP") {
            return Some(Self::new(56 + offset, 5));
        }
        for (prefix, field) in [("INC", 0), ("DEC", 1), ("ENT", 2), ("ENN", 3)] {
            if let Some((offset, "")) = split(name, prefix) {
                return Some(Self::new(48 + offset, field));
            }
        }
        if let Some((offset, cond)) = split(name, "J") {
            let field = match cond {
                "N" => 0,
                "Z" => 1,
                "P" => 2,
                "NN" => 3,
                "NZ" => 4,
                "NP" => 5,
                _ => return None,
            };
            return Some(Self::new(40 + offset, field));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_overloaded_opcodes() {
        assert_eq!(Op::decode(5, 2), Some(Op::Hlt));
        assert_eq!(Op::decode(5, 3), None);
        assert_eq!(Op::decode(6, 4), Some(Op::Shift(Shift::Slc)));
        assert_eq!(Op::decode(6, 6), None);
        assert_eq!(Op::decode(39, 9), Some(Op::Jump(Jump::LessEqual)));
        assert_eq!(Op::decode(39, 10), None);
        assert_eq!(
            Op::decode(47, 3),
            Some(Op::JumpReg(Register::X, RegCond::NonNegative))
        );
        assert_eq!(Op::decode(51, 2), Some(Op::Ent(Register::I3)));
        assert_eq!(Op::decode(56, 6), Some(Op::Fcmp));
        assert_eq!(Op::decode(64, 0), None);
    }

    #[test]
    fn decode_checks_field_specs() {
        assert_eq!(Op::decode(8, 5), Some(Op::Load(Register::A)));
        assert_eq!(Op::decode(8, 13), Some(Op::Load(Register::A)));
        assert_eq!(Op::decode(8, 6), None);
        assert_eq!(Op::decode(8, 7), None);
        assert_eq!(Op::decode(32, 2), Some(Op::Store(Register::J)));
        assert_eq!(Op::decode(1, 6), None);
    }

    #[test]
    fn mnemonic_lookup() {
        assert_eq!(Mnemonic::lookup("LDA"), Some(Mnemonic { code: 8, field: 5 }));
        assert_eq!(Mnemonic::lookup("LD3N"), Some(Mnemonic { code: 19, field: 5 }));
        assert_eq!(Mnemonic::lookup("STX"), Some(Mnemonic { code: 31, field: 5 }));
        assert_eq!(Mnemonic::lookup("STJ"), Some(Mnemonic { code: 32, field: 2 }));
        assert_eq!(Mnemonic::lookup("J1NZ"), Some(Mnemonic { code: 41, field: 4 }));
        assert_eq!(Mnemonic::lookup("JXP"), Some(Mnemonic { code: 47, field: 2 }));
        assert_eq!(Mnemonic::lookup("ENN6"), Some(Mnemonic { code: 54, field: 3 }));
        assert_eq!(Mnemonic::lookup("CMPX"), Some(Mnemonic { code: 63, field: 5 }));
        assert_eq!(Mnemonic::lookup("LD7"), None);
        assert_eq!(Mnemonic::lookup("JAE"), None);
        assert_eq!(Mnemonic::lookup("ALF"), None);
    }

    #[test]
    fn mnemonics_agree_with_decoder() {
        let names = [
            "NOP", "ADD", "SUB", "MUL", "DIV", "NUM", "CHAR", "HLT", "SLA", "SRA", "SLAX", "SRAX",
            "SLC", "SRC", "MOVE", "LDA", "LD1", "LD6", "LDX", "LDAN", "LD2N", "LDXN", "STA",
            "ST4", "STX", "STJ", "STZ", "JBUS", "IOC", "IN", "OUT", "JRED", "JMP", "JSJ", "JOV",
            "JNOV", "JL", "JE", "JG", "JGE", "JNE", "JLE", "JAN", "JAZ", "JAP", "JANN", "JANZ",
            "JANP", "J5N", "JXNP", "INCA", "DEC1", "ENT4", "ENNX", "CMPA", "CMP3", "CMPX", "FCMP",
        ];
        for name in names {
            let mnemonic = Mnemonic::lookup(name).unwrap();
            let op = Op::decode(mnemonic.code, mnemonic.field).unwrap();
            assert_eq!(op.to_string(), name);
        }
    }
}
