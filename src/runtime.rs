use std::fmt;

use miette::Diagnostic;
use tracing::{info, trace, warn};

use crate::charset::DIGIT_ZERO;
use crate::device::{Device, DeviceState, Devices, Instantaneous, IoOp, IoPolicy};
use crate::ops::{Instruction, Jump, Op, Shift};
use crate::program::Program;
use crate::state::{Comparison, Memory, Register, Registers, MEMORY_SIZE};
use crate::word::{FieldSpec, Sign, Word, BYTE_SIZE, WORD_RANGE};

/// Something that went wrong while executing an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Fault {
    /// Opcode/modifier pair without a mnemonic, or an operand the instruction cannot use.
    InvalidInstruction(Word),
    /// Memory access or jump outside of `0..4000`.
    AddressOutOfRange(i64),
    /// Division by zero or a quotient that does not fit in a word. Recorded, never fatal.
    DivisionFault,
    /// Unit outside `0..=20`, or an operation the unit does not support.
    InvalidDevice { unit: u8, op: IoOp },
}

impl std::error::Error for Fault {}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInstruction(word) => write!(f, "invalid instruction `{word}`"),
            Self::AddressOutOfRange(addr) => {
                write!(f, "address {addr} is outside of memory (0..{MEMORY_SIZE})")
            }
            Self::DivisionFault => write!(f, "division by zero or quotient overflow"),
            Self::InvalidDevice { unit, op } => write!(f, "unit {unit} does not support {op}"),
        }
    }
}

/// Whether the machine can keep going.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Running,
    Halted,
}

/// Complete copy of the machine state, taken when a run stops on a fault.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Snapshot {
    pub pc: u16,
    pub registers: Registers,
    pub overflow: bool,
    pub comparison: Comparison,
    pub clock: u64,
    pub memory: Memory,
}

/// A fatal fault together with the state of the machine when it happened.
#[derive(Debug)]
pub struct MachineError {
    pub fault: Fault,
    /// Location of the faulting instruction.
    pub pc: u16,
    pub snapshot: Box<Snapshot>,
}

impl std::error::Error for MachineError {}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at location {:04}", self.fault, self.pc)
    }
}

impl Diagnostic for MachineError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let code = match self.fault {
            Fault::InvalidInstruction(_) => "run::invalid_instruction",
            Fault::AddressOutOfRange(_) => "run::address_out_of_range",
            Fault::DivisionFault => "run::division",
            Fault::InvalidDevice { .. } => "run::invalid_device",
        };
        Some(Box::new(code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let help = match self.fault {
            Fault::InvalidInstruction(_) => "check that execution did not run into data",
            Fault::AddressOutOfRange(_) => "check the index registers used by this instruction",
            Fault::DivisionFault => "the overflow toggle is set instead of halting",
            Fault::InvalidDevice { .. } => "units 0-20 are available, see the device table",
        };
        Some(Box::new(help))
    }
}

/// Represents complete machine state during runtime.
pub struct Machine {
    mem: Memory,
    reg: Registers,
    /// Location of the next instruction.
    pc: u16,
    overflow: bool,
    comparison: Comparison,
    devices: Devices,
    /// Elapsed MIX time units.
    clock: u64,
    halted: bool,
    /// Last non-fatal fault and where it happened.
    recovered: Option<(u16, Fault)>,
    policy: Box<dyn IoPolicy>,
}

impl Machine {
    pub fn new() -> Self {
        Self::with_policy(Instantaneous)
    }

    pub fn with_policy(policy: impl IoPolicy + 'static) -> Self {
        Machine {
            mem: Memory::new(),
            reg: Registers::default(),
            pc: 0,
            overflow: false,
            comparison: Comparison::Equal,
            devices: Devices::new(),
            clock: 0,
            halted: false,
            recovered: None,
            policy: Box::new(policy),
        }
    }

    /// Copy an assembled program into memory and point the machine at its start address.
    pub fn load(&mut self, program: &Program) -> Result<(), MachineError> {
        for &(addr, word) in program.words() {
            if let Err(fault) = self.set_memory(addr as i64, word) {
                return Err(self.error(fault, program.start()));
            }
        }
        self.pc = program.start();
        self.halted = false;
        Ok(())
    }

    /// Execute exactly one instruction. A halted machine stays halted until
    /// [`Machine::resume`].
    ///
    /// On a fault the program counter is left on the faulting instruction.
    pub fn step(&mut self) -> Result<Status, MachineError> {
        if self.halted {
            return Ok(Status::Halted);
        }
        self.devices.settle(self.clock);
        let pc = self.pc;
        match self.execute(pc) {
            Ok(()) if self.halted => Ok(Status::Halted),
            Ok(()) => Ok(Status::Running),
            Err(fault) => {
                self.pc = pc;
                Err(self.error(fault, pc))
            }
        }
    }

    /// Run until `HLT` or a fault.
    pub fn run(&mut self) -> Result<Status, MachineError> {
        loop {
            if self.step()? == Status::Halted {
                return Ok(Status::Halted);
            }
        }
    }

    /// Run at most `max_steps` instructions. Returns [`Status::Running`] if stopped by the
    /// limit.
    pub fn run_for(&mut self, max_steps: u64) -> Result<Status, MachineError> {
        for _ in 0..max_steps {
            if self.step()? == Status::Halted {
                return Ok(Status::Halted);
            }
        }
        Ok(if self.halted {
            Status::Halted
        } else {
            Status::Running
        })
    }

    /// Restart after `HLT`, continuing with the instruction after it.
    pub fn resume(&mut self) {
        self.halted = false;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    pub fn register(&self, reg: Register) -> Word {
        self.reg.get(reg)
    }

    pub fn registers(&self) -> &Registers {
        &self.reg
    }

    pub fn set_register(&mut self, reg: Register, value: Word) {
        self.reg.set(reg, value)
    }

    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn set_memory(&mut self, addr: i64, word: Word) -> Result<(), Fault> {
        *self.mem.get_mut(addr).ok_or(Fault::AddressOutOfRange(addr))? = word;
        Ok(())
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    pub fn set_overflow(&mut self, overflow: bool) {
        self.overflow = overflow;
    }

    pub fn comparison(&self) -> Comparison {
        self.comparison
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    pub fn device(&self, unit: u8) -> Option<&Device> {
        self.devices.get(unit)
    }

    /// For attaching input before a run.
    pub fn device_mut(&mut self, unit: u8) -> Option<&mut Device> {
        self.devices.get_mut(unit)
    }

    /// The most recent fault that did not stop execution.
    pub fn last_recovered(&self) -> Option<(u16, Fault)> {
        self.recovered
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pc: self.pc,
            registers: self.reg.clone(),
            overflow: self.overflow,
            comparison: self.comparison,
            clock: self.clock,
            memory: self.mem.clone(),
        }
    }

    fn error(&self, fault: Fault, pc: u16) -> MachineError {
        MachineError {
            fault,
            pc,
            snapshot: Box::new(self.snapshot()),
        }
    }

    fn execute(&mut self, pc: u16) -> Result<(), Fault> {
        let word = self.read(pc as i64)?;
        let instr = Instruction::decode(word).ok_or(Fault::InvalidInstruction(word))?;
        let m = self.effective_address(&instr, word)?;
        trace!(pc, %instr, m, "execute");

        // PC incremented before instruction is performed
        self.pc = pc + 1;
        let time = instr.op.time(instr.field);
        self.dispatch(instr, m, word, time)?;
        self.clock += time;
        Ok(())
    }

    /// `M = ±AA + rIi`.
    fn effective_address(&self, instr: &Instruction, word: Word) -> Result<i64, Fault> {
        let offset = match instr.index {
            0 => 0,
            i => {
                let reg = Register::index(i).ok_or(Fault::InvalidInstruction(word))?;
                let offset = self.reg.get(reg).value();
                if !self.reg.index_in_range(reg) {
                    return Err(Fault::AddressOutOfRange(instr.address + offset));
                }
                offset
            }
        };
        Ok(instr.address + offset)
    }

    fn read(&self, addr: i64) -> Result<Word, Fault> {
        self.mem.get(addr).ok_or(Fault::AddressOutOfRange(addr))
    }

    fn cell(&mut self, addr: i64) -> Result<&mut Word, Fault> {
        self.mem.get_mut(addr).ok_or(Fault::AddressOutOfRange(addr))
    }

    fn dispatch(&mut self, instr: Instruction, m: i64, word: Word, time: u64) -> Result<(), Fault> {
        // Only meaningful for operations that take a field specification, which `decode`
        // has already validated.
        let spec = FieldSpec::decode(instr.field).unwrap_or_default();
        let invalid = Fault::InvalidInstruction(word);

        match instr.op {
            Op::Nop => {}
            Op::Add => self.add(self.read(m)?.field(spec)),
            Op::Sub => self.add(self.read(m)?.field(spec).negated()),
            Op::Mul => self.mul(self.read(m)?.field(spec)),
            Op::Div => self.div(self.read(m)?.field(spec)),
            Op::Num => self.num(),
            Op::Char => self.char(),
            Op::Hlt => {
                info!(pc = self.pc - 1, clock = self.clock, "halted");
                self.halted = true;
            }
            Op::Shift(shift) => {
                if m < 0 {
                    return Err(invalid);
                }
                self.shift(shift, m);
            }
            Op::Move => self.move_words(m, instr.field)?,
            Op::Load(reg) => {
                let value = self.read(m)?.field(spec);
                self.reg.set(reg, value);
            }
            Op::LoadNeg(reg) => {
                let value = self.read(m)?.field(spec).negated();
                self.reg.set(reg, value);
            }
            Op::Store(reg) => {
                let value = self.reg.get(reg);
                self.cell(m)?.set_field(spec, value);
            }
            Op::Stz => self.cell(m)?.set_field(spec, Word::ZERO),
            Op::Jbus => {
                if self.device_busy(instr.field, IoOp::Status)? {
                    self.jump(m)?;
                }
            }
            Op::Jred => {
                if !self.device_busy(instr.field, IoOp::Status)? {
                    self.jump(m)?;
                }
            }
            Op::Ioc => self.io(instr.field, IoOp::Control, m, time)?,
            Op::In => self.io(instr.field, IoOp::In, m, time)?,
            Op::Out => self.io(instr.field, IoOp::Out, m, time)?,
            Op::Jump(jump) => self.jump_on(jump, m)?,
            Op::JumpReg(reg, cond) => {
                if cond.holds(self.reg.get(reg).value()) {
                    self.jump(m)?;
                }
            }
            Op::Inc(reg) => self.increment(reg, m),
            Op::Dec(reg) => self.increment(reg, -m),
            Op::Ent(reg) => self.reg.set(reg, Self::address_word(m, word)),
            Op::Enn(reg) => self.reg.set(reg, Self::address_word(m, word).negated()),
            Op::Cmp(reg) => {
                let lhs = self.reg.get(reg).field(spec);
                let rhs = self.read(m)?.field(spec);
                self.comparison = lhs.compare(&rhs).into();
            }
            Op::Fcmp => {
                let v = self.read(m)?;
                let epsilon = self.read(0)?;
                self.comparison = float_compare(self.reg.get(Register::A), v, epsilon);
            }
        }
        Ok(())
    }

    /// `M` as a word. When `M` is zero it takes the sign of the instruction.
    fn address_word(m: i64, instr: Word) -> Word {
        let sign = if m == 0 { instr.sign() } else { Sign::of(m) };
        Word::wrapping(sign, m).0
    }

    /// Save the return address in rJ and jump.
    fn jump(&mut self, m: i64) -> Result<(), Fault> {
        let target = Self::check_address(m)?;
        self.reg.set(Register::J, Word::wrapping(Sign::Plus, self.pc as i64).0);
        self.pc = target;
        Ok(())
    }

    fn check_address(m: i64) -> Result<u16, Fault> {
        if (0..MEMORY_SIZE as i64).contains(&m) {
            Ok(m as u16)
        } else {
            Err(Fault::AddressOutOfRange(m))
        }
    }

    fn jump_on(&mut self, jump: Jump, m: i64) -> Result<(), Fault> {
        use Comparison::*;
        let taken = match jump {
            Jump::Jmp => true,
            Jump::Jsj => {
                self.pc = Self::check_address(m)?;
                return Ok(());
            }
            Jump::Jov => std::mem::replace(&mut self.overflow, false),
            Jump::Jnov => !std::mem::replace(&mut self.overflow, false),
            Jump::Less => self.comparison == Less,
            Jump::Equal => self.comparison == Equal,
            Jump::Greater => self.comparison == Greater,
            Jump::GreaterEqual => self.comparison != Less,
            Jump::NotEqual => self.comparison != Equal,
            Jump::LessEqual => self.comparison != Greater,
        };
        if taken {
            self.jump(m)?;
        }
        Ok(())
    }

    /// rA + `value`. A zero result keeps the sign of rA.
    fn add(&mut self, value: Word) {
        let a = self.reg.get(Register::A);
        let sum = a.value() + value.value();
        let sign = if sum == 0 { a.sign() } else { Sign::of(sum) };
        let (result, overflow) = Word::wrapping(sign, sum);
        self.overflow |= overflow;
        self.reg.set(Register::A, result);
    }

    fn increment(&mut self, reg: Register, amount: i64) {
        let current = self.reg.get(reg);
        let sum = current.value() + amount;
        let sign = if sum == 0 { current.sign() } else { Sign::of(sum) };
        let (result, overflow) = Word::wrapping(sign, sum);
        if matches!(reg, Register::A | Register::X) {
            self.overflow |= overflow;
        }
        self.reg.set(reg, result);
    }

    /// rAX = rA * `value`, both registers taking the sign of the product.
    fn mul(&mut self, value: Word) {
        let a = self.reg.get(Register::A);
        let sign = if a.sign() == value.sign() {
            Sign::Plus
        } else {
            Sign::Minus
        };
        let product = a.magnitude() * value.magnitude();
        self.reg
            .set(Register::A, Word::wrapping(sign, product / WORD_RANGE).0);
        self.reg
            .set(Register::X, Word::wrapping(sign, product % WORD_RANGE).0);
    }

    /// rA = rAX / `value`, rX = remainder.
    ///
    /// A zero divisor or a quotient that would not fit sets overflow and clears both rA and
    /// rX to `+0`, then execution continues.
    fn div(&mut self, value: Word) {
        let a = self.reg.get(Register::A);
        let x = self.reg.get(Register::X);
        if value.is_zero() || a.magnitude() >= value.magnitude() {
            let pc = self.pc - 1;
            warn!(pc, divisor = value.value(), "division fault");
            self.overflow = true;
            self.reg.set(Register::A, Word::ZERO);
            self.reg.set(Register::X, Word::ZERO);
            self.recovered = Some((pc, Fault::DivisionFault));
            return;
        }
        let dividend = a.magnitude() * WORD_RANGE + x.magnitude();
        let quotient_sign = if a.sign() == value.sign() {
            Sign::Plus
        } else {
            Sign::Minus
        };
        let quotient = dividend / value.magnitude();
        let remainder = dividend % value.magnitude();
        self.reg
            .set(Register::A, Word::wrapping(quotient_sign, quotient).0);
        self.reg
            .set(Register::X, Word::wrapping(a.sign(), remainder).0);
    }

    /// Convert the ten character-code digits in rAX to a number in rA.
    fn num(&mut self) {
        let a = self.reg.get(Register::A);
        let x = self.reg.get(Register::X);
        let digits = a.bytes().into_iter().chain(x.bytes());
        let number = digits.fold(0i64, |acc, byte| acc * 10 + (byte % 10) as i64);
        let (result, overflow) = Word::wrapping(a.sign(), number);
        self.overflow |= overflow;
        self.reg.set(Register::A, result);
    }

    /// Convert rA to ten character-code digits in rAX. Signs are unchanged.
    fn char(&mut self) {
        let a = self.reg.get(Register::A);
        let x = self.reg.get(Register::X);
        let mut digits = [0u8; 10];
        let mut rest = a.magnitude();
        for digit in digits.iter_mut().rev() {
            *digit = DIGIT_ZERO + (rest % 10) as u8;
            rest /= 10;
        }
        let mut high = [0; 5];
        let mut low = [0; 5];
        high.copy_from_slice(&digits[..5]);
        low.copy_from_slice(&digits[5..]);
        // Digit codes are at most 39, always valid bytes.
        self.reg.set(
            Register::A,
            Word::from_bytes(a.sign(), high).unwrap_or(Word::ZERO),
        );
        self.reg.set(
            Register::X,
            Word::from_bytes(x.sign(), low).unwrap_or(Word::ZERO),
        );
    }

    fn shift(&mut self, shift: Shift, m: i64) {
        let a = self.reg.get(Register::A);
        let x = self.reg.get(Register::X);
        let mut bytes = [0u8; 10];
        bytes[..5].copy_from_slice(&a.bytes());
        bytes[5..].copy_from_slice(&x.bytes());

        match shift {
            Shift::Sla => shift_bytes(&mut bytes[..5], m, true),
            Shift::Sra => shift_bytes(&mut bytes[..5], m, false),
            Shift::Slax => shift_bytes(&mut bytes, m, true),
            Shift::Srax => shift_bytes(&mut bytes, m, false),
            Shift::Slc => bytes.rotate_left((m % 10) as usize),
            Shift::Src => bytes.rotate_right((m % 10) as usize),
        }

        let mut high = [0; 5];
        let mut low = [0; 5];
        high.copy_from_slice(&bytes[..5]);
        low.copy_from_slice(&bytes[5..]);
        self.reg.set(
            Register::A,
            Word::from_bytes(a.sign(), high).unwrap_or(Word::ZERO),
        );
        self.reg.set(
            Register::X,
            Word::from_bytes(x.sign(), low).unwrap_or(Word::ZERO),
        );
    }

    /// Copy `count` words from `M` to the location in rI1, advancing rI1.
    fn move_words(&mut self, m: i64, count: u8) -> Result<(), Fault> {
        for k in 0..count as i64 {
            let word = self.read(m + k)?;
            let dest = self.reg.get(Register::I1).value();
            *self.cell(dest)? = word;
            self.reg
                .set(Register::I1, Word::wrapping(Sign::of(dest + 1), dest + 1).0);
        }
        Ok(())
    }

    fn device_busy(&self, unit: u8, op: IoOp) -> Result<bool, Fault> {
        let device = self
            .devices
            .get(unit)
            .ok_or(Fault::InvalidDevice { unit, op })?;
        Ok(device.is_busy(self.clock))
    }

    /// Perform `IN`, `OUT` or `IOC`, waiting for the unit first if it is still busy.
    fn io(&mut self, unit: u8, op: IoOp, m: i64, time: u64) -> Result<(), Fault> {
        let device = self
            .devices
            .get_mut(unit)
            .ok_or(Fault::InvalidDevice { unit, op })?;
        if !device.kind().supports(op) {
            return Err(Fault::InvalidDevice { unit, op });
        }
        let kind = device.kind();
        let size = kind.block_size() as i64;
        if op != IoOp::Control {
            Self::check_address(m)?;
            Self::check_address(m + size - 1)?;
        }

        // Interlock: the instruction waits until the unit is ready.
        if let DeviceState::Busy { until } = device.state() {
            if until > self.clock {
                trace!(unit, wait = until - self.clock, "interlock");
                self.clock = until;
            }
        }

        let x = self.reg.get(Register::X).value();
        match op {
            IoOp::In => {
                let block = device.read_block(x)?;
                for (k, word) in block.into_iter().enumerate() {
                    let addr = m + k as i64;
                    *self.mem.get_mut(addr).ok_or(Fault::AddressOutOfRange(addr))? = word;
                }
            }
            IoOp::Out => {
                let block = &self.mem.as_slice()[m as usize..(m + size) as usize];
                device.write_block(x, block)?;
            }
            IoOp::Control => device.control(m)?,
            IoOp::Status => return Err(Fault::InvalidDevice { unit, op }),
        }

        let latency = self.policy.latency(unit, kind, op);
        device.mark_busy(self.clock + time + latency);
        trace!(unit, %op, latency, "device busy");
        Ok(())
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

/// Shift bytes by `m` positions, filling with zeros.
fn shift_bytes(bytes: &mut [u8], m: i64, left: bool) {
    let len = bytes.len();
    let m = (m.min(len as i64)) as usize;
    if left {
        bytes.copy_within(m.., 0);
        bytes[len - m..].fill(0);
    } else {
        bytes.copy_within(..len - m, m);
        bytes[..m].fill(0);
    }
}

/// Value of a word in MIX floating point format: `±(e, f f f f)` with an excess-32
/// exponent. Returns the value and the unbiased exponent.
fn float_value(word: Word) -> (f64, i32) {
    let [e, f1, f2, f3, f4] = word.bytes();
    let fraction = [f1, f2, f3, f4]
        .iter()
        .fold(0f64, |acc, &b| acc * BYTE_SIZE as f64 + b as f64)
        / (BYTE_SIZE as f64).powi(4);
    let exponent = e as i32 - 32;
    let value = fraction * (BYTE_SIZE as f64).powi(exponent);
    let value = if word.sign().is_negative() {
        -value
    } else {
        value
    };
    (value, exponent)
}

/// `u ~ v` when `|u - v| <= epsilon * b^max(eu, ev)`, otherwise ordered by value.
fn float_compare(u: Word, v: Word, epsilon: Word) -> Comparison {
    let (u, eu) = float_value(u);
    let (v, ev) = float_value(v);
    let (epsilon, _) = float_value(epsilon);
    let tolerance = epsilon.abs() * (BYTE_SIZE as f64).powi(eu.max(ev));
    if (u - v).abs() <= tolerance {
        Comparison::Equal
    } else if u < v {
        Comparison::Less
    } else {
        Comparison::Greater
    }
}
