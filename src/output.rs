use std::fmt::Write;

use colored::Colorize;

use crate::device::Device;
use crate::ops::Instruction;
use crate::program::Program;
use crate::runtime::Machine;
use crate::state::{Memory, Register};
use crate::word::Word;

/// Word as a signed decimal that keeps the sign of zero, like `+5` or `-0`.
pub fn signed(word: Word) -> String {
    format!("{}{}", word.sign(), word.magnitude())
}

/// Registers, overflow toggle, comparison indicator and clock.
///
/// The minimal form has one `NAME value` pair per line and no colour, for scripts and tests.
pub fn render_state(machine: &Machine, minimal: bool) -> String {
    let mut out = String::new();
    if minimal {
        for reg in Register::OPERANDS {
            let _ = writeln!(out, "{} {}", reg.name(), signed(machine.register(reg)));
        }
        let _ = writeln!(out, "J {}", signed(machine.register(Register::J)));
        let _ = writeln!(out, "OV {}", machine.overflow() as u8);
        let _ = writeln!(out, "CI {}", machine.comparison());
        let _ = writeln!(out, "PC {}", machine.pc());
        let _ = writeln!(out, "CLOCK {}", machine.clock());
        return out;
    }

    let bar = "│".dimmed();
    let _ = writeln!(out, "{}", "┌───────────────────────────────────────┐".dimmed());
    let _ = writeln!(
        out,
        "{bar}      {}{bar}",
        "sign  bytes                 value ".italic().dimmed()
    );
    for reg in Register::OPERANDS.into_iter().chain([Register::J]) {
        let word = machine.register(reg);
        let _ = writeln!(
            out,
            "{bar} {:<3}  {}  {:>12} {bar}",
            reg.name().bold(),
            word,
            signed(word)
        );
    }
    let overflow = if machine.overflow() { "ON" } else { "off" };
    let _ = writeln!(
        out,
        "{bar} {}  {:<4} {}  {:<7} {}  {:>6} {bar}",
        "OV".bold(),
        overflow,
        "CI".bold(),
        machine.comparison(),
        "PC".bold(),
        machine.pc(),
    );
    let _ = writeln!(out, "{bar} {}  {:<31} {bar}", "CLOCK".bold(), machine.clock());
    let _ = writeln!(out, "{}", "└───────────────────────────────────────┘".dimmed());
    out
}

/// One line per address, with the word decoded as an instruction where possible.
pub fn render_memory(memory: &Memory, addrs: impl IntoIterator<Item = u16>, minimal: bool) -> String {
    let mut out = String::new();
    for addr in addrs {
        let Some(word) = memory.get(addr as i64) else {
            continue;
        };
        if minimal {
            let _ = writeln!(out, "{addr:04} {}", signed(word));
            continue;
        }
        let _ = writeln!(out, "{}  {}", format!("{addr:04}").bold(), describe(word));
    }
    out
}

/// Words of an assembled program followed by its symbol table.
pub fn render_listing(program: &Program, minimal: bool) -> String {
    let mut out = String::new();
    for (addr, word) in program.words() {
        if minimal {
            let _ = writeln!(out, "{addr:04} {word}");
        } else {
            let _ = writeln!(out, "{}  {}", format!("{addr:04}").bold(), describe(*word));
        }
    }
    let _ = writeln!(out, "START {}", program.start());
    for (name, value) in program.symbols() {
        if minimal {
            let _ = writeln!(out, "{name} {value}");
        } else {
            let _ = writeln!(out, "{:>10}  {value}", name.cyan());
        }
    }
    out
}

/// Text written to a character output device, one record per line.
pub fn render_device_output(device: &Device) -> String {
    let breaks = device.page_breaks();
    let mut out = String::new();
    for (i, line) in device.output_lines().iter().enumerate() {
        if i > 0 && breaks.contains(&i) {
            out.push('\u{c}');
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn describe(word: Word) -> String {
    let decoded = match Instruction::decode(word) {
        Some(instr) => instr.to_string(),
        None => String::new(),
    };
    format!("{word}  {:>12}  {}", signed(word), decoded.dimmed())
}
