mod exec;

pub mod bus;
pub mod disasm;
pub mod engine;
pub mod ins;
pub mod irq;
pub mod regs;
pub mod state;


use std::fmt;

use easyerr::Error;
use serde::{Deserialize, Serialize};
use strum::{FromRepr, IntoStaticStr};
use tinyvec::ArrayVec;

use crate::bus::Bus;
use crate::irq::{Interrupts, RESET_VECTOR};
use crate::regs::{Reg, Registers};

#[rustfmt::skip]
pub use crate::{
    engine::{Executed, InstructionEngine},
    ins::Ins,
};

/// Revision of the instruction set implemented by a device.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, FromRepr, IntoStaticStr,
)]
#[repr(u8)]
pub enum IsaVersion {
    #[default]
    #[strum(serialize = "1.0")]
    V10,
    #[strum(serialize = "1.1")]
    V11,
    #[strum(serialize = "1.2")]
    V12,
    #[strum(serialize = "2.0")]
    V20,
}

impl IsaVersion {
    /// Whether the recompiler supports this revision.
    pub fn recompilable(self) -> bool {
        self < Self::V12
    }
}

/// How cycles are charged for each instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    /// Every instruction costs [`Timing::FIXED_CYCLES`].
    #[default]
    Fixed,
    /// Instructions cost what the silicon documents for their form.
    Table,
}

impl Timing {
    pub const FIXED_CYCLES: u32 = 5;

    #[inline(always)]
    pub fn charge(self, table: u32) -> u32 {
        match self {
            Self::Fixed => Self::FIXED_CYCLES,
            Self::Table => table,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub isa: IsaVersion,
    pub timing: Timing,
    /// Trace every executed instruction along with its disassembly.
    pub log_ops: bool,
}

/// The words of an undecodable instruction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Words(pub ArrayVec<[u16; 3]>);

impl Words {
    pub fn new(words: &[u16]) -> Self {
        let mut inner = ArrayVec::new();
        inner.extend_from_slice(&words[..words.len().min(3)]);
        Self(inner)
    }
}

impl fmt::Display for Words {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }

            write!(f, "{word:04x}")?;
        }

        Ok(())
    }
}

/// A condition that stops emulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// The instruction at `lpc` has no defined behaviour.
    #[error("unknown opcode {words} at {lpc:04x}")]
    UnknownOpcode { words: Words, lpc: u32 },
}

/// A µ'nSP core.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    pub regs: Registers,
    pub irq: Interrupts,
    pub config: Config,
}

impl Cpu {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Resets the core and fetches the program counter from the reset vector.
    pub fn reset(&mut self, bus: &mut dyn Bus) {
        self.regs = Registers::default();
        self.irq = Interrupts::default();

        let pc = bus.read16(RESET_VECTOR);
        self.regs.set(Reg::Pc, pc);
        tracing::debug!("reset, starting at {pc:04X}");
    }

    /// Stores `value` at the address in `sp`, then decrements it.
    #[inline(always)]
    pub fn push(&mut self, bus: &mut dyn Bus, value: u16, sp: Reg) {
        let addr = self.regs.get(sp);
        bus.write16(addr as u32, value);
        self.regs.set(sp, addr.wrapping_sub(1));
    }

    /// Increments `sp`, then loads the value at its address.
    #[inline(always)]
    pub fn pop(&mut self, bus: &mut dyn Bus, sp: Reg) -> u16 {
        let addr = self.regs.get(sp).wrapping_add(1);
        self.regs.set(sp, addr);
        bus.read16(addr as u32)
    }

    /// Chip select lines driven for the current program counter.
    pub fn csb(&self) -> u8 {
        1 << ((self.regs.lpc() >> 20) & 3)
    }

    /// Executes a single instruction and samples interrupts. Returns the cycles it took.
    ///
    /// On a fault, the program counter is left at the faulting instruction.
    pub fn step(&mut self, bus: &mut dyn Bus) -> Result<u32, Fault> {
        let lpc = self.regs.lpc();
        let ins = Ins::new(bus.read16(lpc));
        self.regs.add_lpc(1);

        if self.config.log_ops {
            let disasm = disasm::disassemble(ins, lpc, self.config.isa, |addr| bus.read16(addr));
            tracing::trace!("{lpc:06X}: {disasm}");
        }

        let cycles = match exec::dispatch(self, bus, ins) {
            Ok(cycles) => cycles,
            Err(words) => {
                self.regs.set_lpc(lpc);
                return Err(Fault::UnknownOpcode { words, lpc });
            }
        };

        self.check_irqs(bus);
        Ok(self.config.timing.charge(cycles))
    }

    /// Runs until the cycle counter, starting at `cycles`, goes negative or a breakpoint is
    /// reached. Breakpoints are not checked for the first instruction.
    pub fn exec(
        &mut self,
        bus: &mut dyn Bus,
        cycles: u64,
        breakpoints: &[u32],
    ) -> Result<Executed, Fault> {
        let mut icount = i64::try_from(cycles).unwrap_or(i64::MAX);
        let mut executed = Executed::default();

        while icount >= 0 {
            if executed.instructions != 0 && breakpoints.contains(&self.regs.lpc()) {
                executed.hit_breakpoint = true;
                break;
            }

            let taken = self.step(bus)?;
            icount -= taken as i64;
            executed.instructions += 1;
            executed.cycles += taken as u64;
        }

        Ok(executed)
    }
}
