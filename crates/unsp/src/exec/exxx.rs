use strum::{FromRepr, IntoStaticStr};

use super::{GroupResult, undefined};
use crate::bus::Bus;
use crate::ins::Ins;
use crate::regs::{FLAG_Z, Reg};
use crate::{Cpu, IsaVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum BitOp {
    Tstb,
    Setb,
    Clrb,
    Invb,
}

impl BitOp {
    #[inline(always)]
    pub fn from_ins(ins: Ins) -> Self {
        match (ins.0 >> 4) & 3 {
            0 => Self::Tstb,
            1 => Self::Setb,
            2 => Self::Clrb,
            _ => Self::Invb,
        }
    }

    /// Applies the operation to `value`. Returns `None` for `tstb`.
    #[inline(always)]
    pub fn apply(self, value: u16, bit: u16) -> Option<u16> {
        let mask = 1 << (bit & 0xF);
        match self {
            Self::Tstb => None,
            Self::Setb => Some(value | mask),
            Self::Clrb => Some(value & !mask),
            Self::Invb => Some(value ^ mask),
        }
    }
}

/// Where a bit operation takes its operand from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitTarget {
    Register,
    Memory { ds: bool },
}

/// The bit operation encoded by `ins`: its target and whether the bit index is an immediate.
pub fn decode_bitop(ins: Ins) -> Option<(BitTarget, bool)> {
    let code = ins.0;
    if code & 0xF1C8 == 0xE000 {
        Some((BitTarget::Register, false))
    } else if code & 0xF1C0 == 0xE040 {
        Some((BitTarget::Register, true))
    } else if code & 0xF1C0 == 0xE180 {
        Some((BitTarget::Memory { ds: false }, true))
    } else if code & 0xF1C0 == 0xE1C0 {
        Some((BitTarget::Memory { ds: true }, true))
    } else if code & 0xF1C8 == 0xE100 {
        Some((BitTarget::Memory { ds: false }, false))
    } else if code & 0xF1C8 == 0xE140 {
        Some((BitTarget::Memory { ds: true }, false))
    } else {
        None
    }
}

/// 16-bit shifts into MR (or rotates of a register), selected by bits 6..4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Shift16 {
    Asr,
    Asror,
    Lsl,
    Lslor,
    Lsr,
    Lsror,
    Rol,
    Ror,
}

impl Cpu {
    fn exec_bitop(&mut self, bus: &mut dyn Bus, ins: Ins, target: BitTarget, imm: bool) -> u32 {
        let op = BitOp::from_ins(ins);
        let bit = if imm {
            ins.0 & 0xF
        } else {
            self.regs.get(ins.reg_b()) & 0xF
        };

        let rd = ins.reg_a();
        let (value, addr) = match target {
            BitTarget::Register => (self.regs.get(rd), None),
            BitTarget::Memory { ds } => {
                let addr = if ds {
                    self.regs.ds_address(rd)
                } else {
                    self.regs.get(rd) as u32
                };
                (bus.read16(addr), Some(addr))
            }
        };

        match op.apply(value, bit) {
            None => {
                let sr = self.regs.get(Reg::Sr) & !FLAG_Z;
                let clear = value & (1 << bit) == 0;
                self.regs.set(Reg::Sr, if clear { sr | FLAG_Z } else { sr });
            }
            Some(result) => match addr {
                Some(addr) => bus.write16(addr, result),
                None => self.regs.set(rd, result),
            },
        }

        if addr.is_some() { 7 } else { 4 }
    }

    fn exec_shift16(&mut self, ins: Ins) -> u32 {
        let rd = ins.reg_a();
        let value = self.regs.get(rd);
        let amount = (self.regs.get(ins.reg_b()) & 0x1F) as u32;
        let op = Shift16::from_repr(((ins.0 >> 4) & 7) as u8).unwrap_or(Shift16::Asr);

        let shifted = match op {
            Shift16::Asr | Shift16::Asror => (((value as i16 as i32) << 16) >> amount) as u32,
            Shift16::Lsl | Shift16::Lslor => (value as u32) << amount,
            Shift16::Lsr | Shift16::Lsror => ((value as u32) << 16) >> amount,
            Shift16::Rol => {
                self.regs.set(rd, value.rotate_left(amount & 0xF));
                return 4;
            }
            Shift16::Ror => {
                self.regs.set(rd, value.rotate_right(amount & 0xF));
                return 4;
            }
        };

        let accumulate = matches!(op, Shift16::Asror | Shift16::Lslor | Shift16::Lsror);
        let mr = if accumulate {
            self.regs.mr() | shifted
        } else {
            shifted
        };
        self.regs.set_mr(mr);

        4
    }

    pub(crate) fn exec_exxx(&mut self, bus: &mut dyn Bus, ins: Ins) -> GroupResult {
        if self.config.isa < IsaVersion::V12 {
            return undefined(&[ins.0]);
        }

        let code = ins.0;
        if let Some((target, imm)) = decode_bitop(ins) {
            return Ok(self.exec_bitop(bus, ins, target, imm));
        }

        // mul.uu
        if code & 0xF1F8 == 0xE008 {
            let a = self.regs.get(ins.reg_a()) as u32;
            let b = self.regs.get(ins.reg_b()) as u32;
            self.regs.set_mr(a * b);
            return Ok(12);
        }

        // multiply-accumulate is not supported
        if code & 0xF080 == 0xE080 {
            return undefined(&[code]);
        }

        if code & 0xF188 == 0xE108 {
            return Ok(self.exec_shift16(ins));
        }

        undefined(&[code])
    }
}
