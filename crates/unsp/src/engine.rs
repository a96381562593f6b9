use crate::bus::Bus;
use crate::{Cpu, Fault};

/// Summary of an execution slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Executed {
    pub instructions: u32,
    pub cycles: u64,
    /// Execution stopped because a breakpoint was reached.
    pub hit_breakpoint: bool,
}

impl std::ops::AddAssign for Executed {
    fn add_assign(&mut self, rhs: Self) {
        self.instructions += rhs.instructions;
        self.cycles += rhs.cycles;
        self.hit_breakpoint |= rhs.hit_breakpoint;
    }
}

/// A strategy for executing µ'nSP code.
///
/// Engines own no architectural state: everything lives in the [`Cpu`] they are given, so a core
/// can be handed from one engine to another between slices.
pub trait InstructionEngine {
    fn name(&self) -> &'static str;

    /// Resets `cpu` and discards any state derived from the program, such as translated code.
    fn reset(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus);

    /// Runs until the cycle counter, starting at `cycles`, goes negative or one of `breakpoints`
    /// is reached. Breakpoints are not checked for the first instruction.
    fn exec(
        &mut self,
        cpu: &mut Cpu,
        bus: &mut dyn Bus,
        cycles: u64,
        breakpoints: &[u32],
    ) -> Result<Executed, Fault>;

    /// Executes a single instruction.
    fn step(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus) -> Result<Executed, Fault>;

    /// Notifies the engine that the word at `addr` was modified by someone other than the core.
    fn invalidate(&mut self, addr: u32);
}
