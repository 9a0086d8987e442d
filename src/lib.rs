// Machine
pub mod word;
pub use word::{FieldSpec, Sign, Word, WordError};
pub mod state;
pub use state::{Comparison, Memory, Register, Registers};
pub mod ops;
pub mod charset;
pub mod device;
pub use device::{Device, DeviceKind, FixedLatency, Instantaneous, IoPolicy};
pub mod runtime;
pub use runtime::{Fault, Machine, MachineError, Snapshot, Status};

// Assembling
mod span;
pub use span::Span;
pub mod lexer;
pub use lexer::Format;
mod parser;
pub use parser::AsmParser;
pub mod air;
pub use air::Air;
pub mod symbol;
pub mod program;
pub use program::{ObjectError, Program};
pub mod error;
pub use error::AsmErrorKind;

pub mod output;
pub mod env;

use miette::Result;
use tracing::debug;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;

/// Assemble MIXAL source into a loadable [`Program`].
///
/// Errors carry the source text, so they render with context when printed.
pub fn assemble(src: &str, format: Format) -> Result<Program> {
    let result = AsmParser::new(src, format)
        .and_then(AsmParser::parse)
        .and_then(|air| {
            debug!(statements = air.len(), "parsed program");
            air.backpatch()
        });
    result.map_err(|report| report.with_source_code(src.to_string()))
}

/// Assemble and load `src` into a fresh machine using the instantaneous policy.
pub fn load(src: &str, format: Format) -> Result<Machine> {
    let program = assemble(src, format)?;
    let mut machine = Machine::new();
    machine.load(&program)?;
    Ok(machine)
}
