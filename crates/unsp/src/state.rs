//! Save states and debugger state entries.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{IntoStaticStr, VariantArray};

use crate::Cpu;
use crate::irq::Interrupts;
use crate::regs::{Reg, Registers};

/// Serializable state of a core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub regs: Registers,
    pub irq: Interrupts,
}

impl Cpu {
    pub fn save_state(&self) -> State {
        State {
            regs: self.regs.clone(),
            irq: self.irq.clone(),
        }
    }

    pub fn load_state(&mut self, state: &State) {
        self.regs = state.regs.clone();
        self.irq = state.irq.clone();
    }
}

/// Named state items exposed to debuggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, VariantArray)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Item {
    Sp,
    R1,
    R2,
    R3,
    R4,
    Bp,
    Sr,
    Pc,
    Irqe,
    Fiqe,
    Irq,
    Fiq,
    Sb,
}

/// How an item is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Hex4,
    Hex6,
    Dec1,
}

impl Item {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn format(self) -> Format {
        match self {
            Self::Pc => Format::Hex6,
            Self::Irqe | Self::Fiqe | Self::Irq | Self::Fiq | Self::Sb => Format::Dec1,
            _ => Format::Hex4,
        }
    }

    fn reg(self) -> Option<Reg> {
        Some(match self {
            Self::Sp => Reg::Sp,
            Self::R1 => Reg::R1,
            Self::R2 => Reg::R2,
            Self::R3 => Reg::R3,
            Self::R4 => Reg::R4,
            Self::Bp => Reg::Bp,
            Self::Sr => Reg::Sr,
            _ => return None,
        })
    }
}

/// A state item and its current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub item: Item,
    pub value: u32,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.item.name();
        match self.item.format() {
            Format::Hex4 => write!(f, "{name}: {:04X}", self.value),
            Format::Hex6 => write!(f, "{name}: {:06X}", self.value),
            Format::Dec1 => write!(f, "{name}: {}", self.value),
        }
    }
}

impl Cpu {
    /// Current value of a state item. `PC` reports the paged program counter.
    pub fn state_value(&self, item: Item) -> u32 {
        if let Some(reg) = item.reg() {
            return self.regs.get(reg) as u32;
        }

        match item {
            Item::Pc => self.regs.lpc(),
            Item::Irqe => self.irq.enable_irq as u32,
            Item::Fiqe => self.irq.enable_fiq as u32,
            Item::Irq => self.irq.irq as u32,
            Item::Fiq => self.irq.fiq as u32,
            _ => self.regs.sb as u32,
        }
    }

    /// Imports a state item. `PC` takes a 22-bit value which is split into PC and the code
    /// segment.
    pub fn set_state_value(&mut self, item: Item, value: u32) {
        if let Some(reg) = item.reg() {
            self.regs.set(reg, value as u16);
            return;
        }

        match item {
            Item::Pc => {
                self.regs.set(Reg::Pc, value as u16);
                let sr = self.regs.get(Reg::Sr);
                self.regs.set(Reg::Sr, (sr & 0xFFC0) | ((value & 0x3F_0000) >> 16) as u16);
            }
            Item::Irqe => self.irq.enable_irq = value != 0,
            Item::Fiqe => self.irq.enable_fiq = value != 0,
            Item::Irq => self.irq.irq = value != 0,
            Item::Fiq => self.irq.fiq = value != 0,
            _ => self.regs.sb = value as u16 & 0xF,
        }
    }

    pub fn state_entries(&self) -> Vec<Entry> {
        Item::VARIANTS
            .iter()
            .map(|&item| Entry {
                item,
                value: self.state_value(item),
            })
            .collect()
    }

    /// The flags, as `NZSC` with blanks in place of clear flags.
    pub fn genflags(&self) -> String {
        let status = self.regs.status();
        [
            (status.negative(), 'N'),
            (status.zero(), 'Z'),
            (status.sign(), 'S'),
            (status.carry(), 'C'),
        ]
        .into_iter()
        .map(|(set, c)| if set { c } else { ' ' })
        .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regs::{FLAG_C, FLAG_N, FLAG_S, FLAG_Z};

    #[test]
    fn entries() {
        let mut cpu = Cpu::default();
        cpu.regs.set(Reg::R1, 0xBEEF);
        cpu.regs.set(Reg::Sr, 0x0342);
        cpu.regs.set(Reg::Pc, 0x1234);
        cpu.regs.sb = 7;
        cpu.irq.enable_irq = true;

        let text = cpu
            .state_entries()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");

        insta::assert_snapshot!(text, @r"
        SP: 0000
        R1: BEEF
        R2: 0000
        R3: 0000
        R4: 0000
        BP: 0000
        SR: 0342
        PC: 021234
        IRQE: 1
        FIQE: 0
        IRQ: 0
        FIQ: 0
        SB: 7
        ");
    }

    #[test]
    fn genflags() {
        let mut cpu = Cpu::default();
        cpu.regs.set(Reg::Sr, FLAG_N | FLAG_C);
        assert_eq!(cpu.genflags(), "N  C");

        cpu.regs.set(Reg::Sr, FLAG_Z | FLAG_S);
        assert_eq!(cpu.genflags(), " ZS ");
    }

    #[test]
    fn import_pc_splits_segment() {
        let mut cpu = Cpu::default();
        cpu.regs.set(Reg::Sr, 0xFC3F);
        cpu.set_state_value(Item::Pc, 0x15_ABCD);

        assert_eq!(cpu.regs.get(Reg::Pc), 0xABCD);
        assert_eq!(cpu.regs.get(Reg::Sr), 0xFC15);
        assert_eq!(cpu.state_value(Item::Pc), 0x15_ABCD);
    }
}
