//! Interrupt controller.

use serde::{Deserialize, Serialize};
use strum::{FromRepr, IntoStaticStr};

use crate::Cpu;
use crate::bus::Bus;
use crate::regs::Reg;

/// Vector of the fast interrupt.
pub const FIQ_VECTOR: u32 = 0xFFF6;
/// Vector of IRQ0. IRQn vectors through `IRQ_VECTOR + n`.
pub const IRQ_VECTOR: u32 = 0xFFF8;
/// Vector of the `break` software interrupt.
pub const BREAK_VECTOR: u32 = 0xFFF5;
/// Vector fetched on reset.
pub const RESET_VECTOR: u32 = 0xFFF7;

/// Input lines of the core. The discriminant is the bit of the line in the pending mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Line {
    Fiq,
    Irq0,
    Irq1,
    Irq2,
    Irq3,
    Irq4,
    Irq5,
    Irq6,
    Irq7,
    /// Not wired to anything.
    Brk,
}

impl Line {
    /// Returns IRQ line `n`, if it exists.
    pub fn irq(n: u8) -> Option<Self> {
        (n < 8).then(|| Self::from_repr(n + 1)).flatten()
    }

    #[inline(always)]
    pub fn mask(self) -> u16 {
        1 << self as u16
    }
}

/// Interrupt state of the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interrupts {
    pub enable_irq: bool,
    pub enable_fiq: bool,
    /// An IRQ is being serviced.
    pub irq: bool,
    /// A FIQ is being serviced.
    pub fiq: bool,
    pub curirq: u16,
    /// Pending mask: bit 0 is FIQ, bits 1..=8 are IRQ0..=IRQ7.
    pub sirq: u16,
    /// Banked shift buffers: normal level, IRQ level and FIQ level.
    pub saved_sb: [u16; 3],
}

impl Interrupts {
    /// Latches (or clears) the pending bit of `line`. BRK is ignored.
    pub fn set_input(&mut self, line: Line, asserted: bool) {
        self.sirq &= !line.mask();
        if asserted && line != Line::Brk {
            self.sirq |= line.mask();
        }
    }

    /// Returns the line [`Cpu::check_irqs`] would consider next, if any is pending.
    pub fn pending(&self) -> Option<Line> {
        let pending = self.sirq & 0x1FF;
        (pending != 0).then(|| Line::from_repr(pending.trailing_zeros() as u8)).flatten()
    }

    /// Whether [`Cpu::check_irqs`] would switch context right now.
    pub fn takeable(&self) -> bool {
        match self.pending() {
            Some(Line::Fiq) => self.enable_fiq && !self.fiq && !self.irq,
            Some(_) => self.enable_irq && !self.fiq && !self.irq,
            None => false,
        }
    }
}

impl Cpu {
    /// Latches the state of an input line. The interrupt is taken at the next instruction
    /// boundary, if at all.
    pub fn set_input(&mut self, line: Line, asserted: bool) {
        self.irq.set_input(line, asserted);
    }

    /// Takes the first pending interrupt, scanning from bit 0 (FIQ) upwards.
    pub fn check_irqs(&mut self, bus: &mut dyn Bus) {
        match self.irq.pending() {
            Some(Line::Fiq) => self.trigger_fiq(bus),
            Some(line) => self.trigger_irq(bus, line as u8 - 1),
            None => (),
        }
    }

    fn enter_interrupt(&mut self, bus: &mut dyn Bus, vector: u32) {
        let pc = self.regs.get(Reg::Pc);
        let sr = self.regs.get(Reg::Sr);
        self.push(bus, pc, Reg::Sp);
        self.push(bus, sr, Reg::Sp);

        let target = bus.read16(vector);
        self.regs.set(Reg::Pc, target);
        self.regs.set(Reg::Sr, 0);
    }

    pub fn trigger_fiq(&mut self, bus: &mut dyn Bus) {
        if !self.irq.enable_fiq || self.irq.fiq || self.irq.irq {
            return;
        }

        self.irq.fiq = true;
        self.irq.saved_sb[self.irq.irq as usize] = self.regs.sb;
        self.regs.sb = self.irq.saved_sb[2];

        let from = self.regs.lpc();
        self.enter_interrupt(bus, FIQ_VECTOR);
        tracing::debug!("entering fiq from {from:06X}");
    }

    pub fn trigger_irq(&mut self, bus: &mut dyn Bus, line: u8) {
        if !self.irq.enable_irq || self.irq.irq || self.irq.fiq {
            return;
        }

        self.irq.irq = true;
        self.irq.saved_sb[0] = self.regs.sb;
        self.regs.sb = self.irq.saved_sb[1];

        let from = self.regs.lpc();
        self.enter_interrupt(bus, IRQ_VECTOR + line as u32);
        tracing::debug!("entering irq{line} from {from:06X}");
    }

    /// Software interrupt. Ignores the enables and does not change the service level.
    pub(crate) fn trigger_break(&mut self, bus: &mut dyn Bus) {
        self.enter_interrupt(bus, BREAK_VECTOR);
    }

    /// Returns from the current interrupt level, restoring SR and PC from the stack.
    pub(crate) fn reti(&mut self, bus: &mut dyn Bus) {
        let sr = self.pop(bus, Reg::Sp);
        self.regs.set(Reg::Sr, sr);
        let pc = self.pop(bus, Reg::Sp);
        self.regs.set(Reg::Pc, pc);

        if self.irq.fiq {
            self.irq.fiq = false;
            self.irq.saved_sb[2] = self.regs.sb;
            self.regs.sb = self.irq.saved_sb[self.irq.irq as usize];
            tracing::debug!("leaving fiq to {:06X}", self.regs.lpc());
        } else if self.irq.irq {
            self.irq.irq = false;
            self.irq.saved_sb[1] = self.regs.sb;
            self.regs.sb = self.irq.saved_sb[0];
            tracing::debug!("leaving irq to {:06X}", self.regs.lpc());
        }

        self.irq.curirq = 0;
        self.check_irqs(bus);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::Ram;

    fn setup() -> (Cpu, Ram) {
        let mut ram = Ram::new();
        ram.write16(FIQ_VECTOR, 0x0F00);
        for n in 0..8 {
            ram.write16(IRQ_VECTOR + n, 0x1000 + n as u16);
        }

        let mut cpu = Cpu::default();
        cpu.regs.set(Reg::Sp, 0x2000);
        cpu.regs.set(Reg::Pc, 0x0123);
        cpu.regs.set(Reg::Sr, 0x0340);
        cpu.irq.enable_irq = true;
        cpu.irq.enable_fiq = true;

        (cpu, ram)
    }

    #[test]
    fn lowest_irq_line_wins() {
        let (mut cpu, mut ram) = setup();
        cpu.set_input(Line::Irq5, true);
        cpu.set_input(Line::Irq3, true);
        cpu.check_irqs(&mut ram);

        assert!(cpu.irq.irq);
        assert_eq!(cpu.regs.get(Reg::Pc), 0x1003);
        assert_eq!(cpu.regs.get(Reg::Sr), 0);
        assert_eq!(cpu.regs.get(Reg::Sp), 0x1FFE);
        assert_eq!(ram.read16(0x2000), 0x0123);
        assert_eq!(ram.read16(0x1FFF), 0x0340);
    }

    #[test]
    fn fiq_preempts_irqs() {
        let (mut cpu, mut ram) = setup();
        cpu.set_input(Line::Irq0, true);
        cpu.set_input(Line::Fiq, true);
        cpu.check_irqs(&mut ram);

        assert!(cpu.irq.fiq);
        assert!(!cpu.irq.irq);
        assert_eq!(cpu.regs.get(Reg::Pc), 0x0F00);
    }

    #[test]
    fn fiq_blocks_irq() {
        let (mut cpu, mut ram) = setup();
        cpu.set_input(Line::Fiq, true);
        cpu.check_irqs(&mut ram);
        cpu.set_input(Line::Fiq, false);

        for line in 0..8 {
            cpu.set_input(Line::irq(line).unwrap(), true);
            cpu.check_irqs(&mut ram);
            assert!(!cpu.irq.irq);
        }
        assert_eq!(cpu.regs.get(Reg::Pc), 0x0F00);
    }

    #[test]
    fn irq_blocks_fiq() {
        let (mut cpu, mut ram) = setup();
        cpu.set_input(Line::Irq1, true);
        cpu.check_irqs(&mut ram);
        cpu.set_input(Line::Irq1, false);

        cpu.set_input(Line::Fiq, true);
        cpu.check_irqs(&mut ram);
        assert!(!cpu.irq.fiq);
        assert_eq!(cpu.regs.get(Reg::Pc), 0x1001);
    }

    #[test]
    fn disabled_lines_stay_pending() {
        let (mut cpu, mut ram) = setup();
        cpu.irq.enable_irq = false;
        cpu.set_input(Line::Irq2, true);
        cpu.check_irqs(&mut ram);

        assert!(!cpu.irq.irq);
        assert_eq!(cpu.irq.sirq, Line::Irq2.mask());
        assert_eq!(cpu.regs.get(Reg::Pc), 0x0123);
    }

    #[test]
    fn brk_is_ignored() {
        let mut irq = Interrupts::default();
        irq.set_input(Line::Brk, true);
        assert_eq!(irq.sirq, 0);
        assert_eq!(irq.pending(), None);
    }

    #[test]
    fn reti_restores_banked_sb() {
        let (mut cpu, mut ram) = setup();
        cpu.regs.sb = 0x5;
        cpu.irq.saved_sb[1] = 0xA;

        cpu.set_input(Line::Irq0, true);
        cpu.check_irqs(&mut ram);
        cpu.set_input(Line::Irq0, false);
        assert_eq!(cpu.regs.sb, 0xA);
        assert_eq!(cpu.irq.saved_sb[0], 0x5);

        cpu.regs.sb = 0xC;
        cpu.reti(&mut ram);

        assert!(!cpu.irq.irq);
        assert_eq!(cpu.regs.sb, 0x5);
        assert_eq!(cpu.irq.saved_sb[1], 0xC);
        assert_eq!(cpu.regs.get(Reg::Pc), 0x0123);
        assert_eq!(cpu.regs.get(Reg::Sr), 0x0340);
        assert_eq!(cpu.regs.get(Reg::Sp), 0x2000);
    }
}
