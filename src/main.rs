use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::Colorize;
use miette::{bail, miette, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use mixal::device::DeviceKind;
use mixal::{output, Format, Machine, Program, Status};

/// Card reader unit.
const CARD_READER: u8 = 16;

/// Assembler and simulator for Knuth's MIX computer.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a `.mixal` source or `.mix` object file and print the final machine state
    Run {
        /// `.mixal` or `.mix` file to run
        name: PathBuf,
        #[command(flatten)]
        opts: Opts,
        /// Text to feed the card reader, one card per 80 columns
        #[arg(long)]
        cards: Option<PathBuf>,
        /// Stop after this many instructions
        #[arg(long)]
        max_steps: Option<u64>,
    },
    /// Check a `.mixal` file without running or outputting binary
    Check {
        /// File to check
        name: PathBuf,
        #[command(flatten)]
        opts: Opts,
    },
    /// Create binary `.mix` file to run later
    Compile {
        /// `.mixal` file to compile
        name: PathBuf,
        /// Destination to output `.mix` file
        dest: Option<PathBuf>,
        #[command(flatten)]
        opts: Opts,
    },
    /// Print the assembled words and symbol table
    Dump {
        /// `.mixal` file to assemble
        name: PathBuf,
        #[command(flatten)]
        opts: Opts,
    },
}

#[derive(ClapArgs, Clone, Copy)]
struct Opts {
    /// Source uses fixed columns (label 1-10, operation 12-15, operand from 17)
    #[arg(long)]
    fixed: bool,
    /// Produce minimal output, suited for blackbox tests
    #[arg(short, long)]
    minimal: bool,
}

impl Opts {
    fn format(self) -> Format {
        if self.fixed {
            Format::Fixed
        } else {
            Format::Free
        }
    }
}

fn main() -> Result<()> {
    use MsgColor::*;
    let args = Args::parse();
    mixal::env::init();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_new(mixal::env::log_filter())
                .unwrap_or_else(|_| EnvFilter::new(mixal::env::DEFAULT_LOG_FILTER)),
        )
        .init();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(mixal::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    match args.command {
        Command::Run {
            name,
            opts,
            cards,
            max_steps,
        } => run(&name, opts, cards.as_deref(), max_steps),
        Command::Check { name, opts } => {
            file_message(Green, "Checking", &name, opts.minimal);
            let _ = assemble(&name, opts.format())?;
            message(Green, "Success", "no errors found!", opts.minimal);
            Ok(())
        }
        Command::Compile { name, dest, opts } => {
            file_message(Green, "Assembling", &name, opts.minimal);
            let program = assemble(&name, opts.format())?;
            let out_file_name = match dest {
                Some(dest) => dest,
                None => name.with_extension("mix"),
            };
            fs::write(&out_file_name, program.to_bytes()).into_diagnostic()?;
            message(Green, "Finished", "emit binary", opts.minimal);
            file_message(Green, "Saved", &out_file_name, opts.minimal);
            Ok(())
        }
        Command::Dump { name, opts } => {
            let program = assemble(&name, opts.format())?;
            print!("{}", output::render_listing(&program, opts.minimal));
            Ok(())
        }
    }
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path, minimal: bool) {
    let right = format!("target {}", right.display());
    message(color, left, &right, minimal);
}

/// Status line on stderr, so stdout only carries program output and state.
fn message(color: MsgColor, left: &str, right: &str, minimal: bool) {
    if minimal {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    eprintln!("{left:>12} {right}");
}

fn run(name: &Path, opts: Opts, cards: Option<&Path>, max_steps: Option<u64>) -> Result<()> {
    file_message(MsgColor::Green, "Assembling", name, opts.minimal);
    let program = match name.extension().and_then(|ext| ext.to_str()) {
        Some("mix") => {
            let bytes = fs::read(name).into_diagnostic()?;
            Program::from_bytes(&bytes).into_diagnostic()?
        }
        Some("mixal" | "mal") => assemble(name, opts.format())?,
        Some(_) => bail!("File has unknown extension. Exiting..."),
        None => bail!("File has no extension. Exiting..."),
    };

    let mut machine = Machine::with_policy(mixal::env::io_policy());
    machine.load(&program)?;
    if let Some(cards) = cards {
        let text = fs::read_to_string(cards).into_diagnostic()?;
        let reader = machine
            .device_mut(CARD_READER)
            .ok_or_else(|| miette!("Card reader is not attached"))?;
        for line in text.lines() {
            reader
                .push_text(line)
                .map_err(|ch| miette!("Character {ch:?} has no MIX code"))?;
        }
    }

    message(MsgColor::Green, "Running", "loaded program", opts.minimal);
    let status = match max_steps {
        Some(max) => machine.run_for(max)?,
        None => machine.run()?,
    };
    match status {
        Status::Halted => message(MsgColor::Green, "Halted", "program finished", opts.minimal),
        Status::Running => message(MsgColor::Cyan, "Stopped", "step limit reached", opts.minimal),
    }
    if let Some((pc, fault)) = machine.last_recovered() {
        message(
            MsgColor::Red,
            "Recovered",
            &format!("{fault} at {pc}"),
            opts.minimal,
        );
    }

    for device in machine.devices().iter() {
        let kind = device.kind();
        if kind.is_character() && kind != DeviceKind::CardReader {
            print!("{}", output::render_device_output(device));
        }
    }
    print!("{}", output::render_state(&machine, opts.minimal));
    let addrs: Vec<u16> = program.words().iter().map(|(addr, _)| *addr).collect();
    print!("{}", output::render_memory(machine.memory(), addrs, opts.minimal));
    Ok(())
}

/// Read and assemble a source file.
fn assemble(name: &Path, format: Format) -> Result<Program> {
    let src = fs::read_to_string(name).into_diagnostic()?;
    mixal::assemble(&src, format)
}
