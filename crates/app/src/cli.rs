use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Engine {
    Interpreter,
    Recompiler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Isa {
    #[value(name = "1.0")]
    V10,
    #[value(name = "1.1")]
    V11,
    #[value(name = "1.2")]
    V12,
    #[value(name = "2.0")]
    V20,
}

impl From<Isa> for unsp::IsaVersion {
    fn from(value: Isa) -> Self {
        match value {
            Isa::V10 => Self::V10,
            Isa::V11 => Self::V11,
            Isa::V12 => Self::V12,
            Isa::V20 => Self::V20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Timing {
    Fixed,
    Table,
}

impl From<Timing> for unsp::Timing {
    fn from(value: Timing) -> Self {
        match value {
            Timing::Fixed => Self::Fixed,
            Timing::Table => Self::Table,
        }
    }
}

#[derive(Args, Debug)]
pub struct RecompilerConfig {
    /// Maximum number of instructions per block
    #[arg(visible_alias("ipb"), long, default_value_t = 64, value_parser = clap::value_parser!(u32).range(1..))]
    pub instr_per_block: u32,
}

/// µ'nSP: runs a raw program image on a µ'nSP core
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub recompiler: RecompilerConfig,
    /// Path to the raw image of 16-bit words to load
    pub image: PathBuf,
    /// Word address at which the image is loaded
    #[arg(long, value_parser = parse_addr, default_value = "0")]
    pub base: u32,
    /// Whether the image words are big endian
    #[arg(long, default_value_t = false)]
    pub big_endian: bool,
    /// Revision of the instruction set
    #[arg(long, value_enum, default_value_t = Isa::V11)]
    pub isa: Isa,
    /// Which engine executes instructions
    ///
    /// The recompiler falls back to the interpreter if it is unavailable for the host or the
    /// instruction set revision.
    #[arg(short, long, value_enum, default_value_t = Engine::Recompiler)]
    pub engine: Engine,
    /// How instructions are timed
    #[arg(long, value_enum, default_value_t = Timing::Fixed)]
    pub timing: Timing,
    /// Number of cycles to run for
    #[arg(short, long, default_value_t = 1_000_000)]
    pub cycles: u64,
    /// Addresses at which execution stops
    #[arg(short, long = "breakpoint", value_parser = parse_addr)]
    pub breakpoints: Vec<u32>,
    /// Interrupt lines to assert before running (0-7, or `fiq`)
    #[arg(long = "irq", value_parser = parse_line)]
    pub irqs: Vec<unsp::irq::Line>,
    /// Whether to trace every executed instruction
    #[arg(long, default_value_t = false)]
    pub log_ops: bool,
    /// Path to a state to start from instead of resetting the core
    #[arg(long)]
    pub load_state: Option<PathBuf>,
    /// Path to write the final state to
    #[arg(long)]
    pub save_state: Option<PathBuf>,
}

impl Config {
    pub fn core(&self) -> unsp::Config {
        unsp::Config {
            isa: self.isa.into(),
            timing: self.timing.into(),
            log_ops: self.log_ops,
        }
    }
}

/// Parses an address, either decimal or hexadecimal with a `0x` prefix.
fn parse_addr(s: &str) -> Result<u32, String> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| e.to_string())?;

    if value > unsp::regs::LPC_MASK {
        return Err(format!("{value:#x} is outside of the 22-bit address space"));
    }

    Ok(value)
}

fn parse_line(s: &str) -> Result<unsp::irq::Line, String> {
    if s.eq_ignore_ascii_case("fiq") {
        return Ok(unsp::irq::Line::Fiq);
    }

    s.parse::<u8>()
        .ok()
        .and_then(unsp::irq::Line::irq)
        .ok_or_else(|| format!("unknown interrupt line {s:?}"))
}
