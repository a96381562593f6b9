use unsp::bus::Bus;
use unsp::{Cpu, Executed, Fault, InstructionEngine};

/// Executes every instruction through [`Cpu::step`].
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterEngine;

impl InstructionEngine for InterpreterEngine {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn reset(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus) {
        cpu.reset(bus);
    }

    fn exec(
        &mut self,
        cpu: &mut Cpu,
        bus: &mut dyn Bus,
        cycles: u64,
        breakpoints: &[u32],
    ) -> Result<Executed, Fault> {
        cpu.exec(bus, cycles, breakpoints)
    }

    fn step(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus) -> Result<Executed, Fault> {
        let cycles = cpu.step(bus)?;
        Ok(Executed {
            instructions: 1,
            cycles: cycles as u64,
            hit_breakpoint: false,
        })
    }

    fn invalidate(&mut self, _: u32) {}
}
