use super::{GroupResult, undefined};
use crate::bus::Bus;
use crate::ins::{AluOp, Ins};
use crate::regs::Reg;
use crate::{Cpu, IsaVersion};

/// Signed-by-unsigned or signed-by-signed 16x16 multiply into a 32-bit result.
pub(crate) fn multiply(a: u16, b: u16, signed_a: bool) -> u32 {
    let (a32, b32) = (a as u32, b as u32);
    let mut result = a32.wrapping_mul(b32);
    if b & 0x8000 != 0 {
        result = result.wrapping_sub(a32 << 16);
    }

    if signed_a && a & 0x8000 != 0 {
        result = result.wrapping_sub(b32 << 16);
    }

    result
}

impl Cpu {
    fn exec_int_control(&mut self, bus: &mut dyn Bus, ins: Ins) -> GroupResult {
        match ins.imm6() {
            sel @ 0x00..=0x03 => {
                self.irq.enable_irq = sel & 1 != 0;
                self.irq.enable_fiq = sel & 2 != 0;
            }
            0x08 => self.irq.enable_irq = false,
            0x09 => self.irq.enable_irq = true,
            0x0C => self.irq.enable_fiq = false,
            0x0E => self.irq.enable_fiq = true,
            0x20 => self.trigger_break(bus),
            0x25 => (),
            _ => return undefined(&[ins.0]),
        }

        Ok(2)
    }

    fn exec_extended(&mut self, bus: &mut dyn Bus, ins: Ins) -> GroupResult {
        let ext = self.fetch(bus);
        if ext & 0xF0 != 0 {
            return undefined(&[ins.0, ext]);
        }

        let op = AluOp::from_repr((ext >> 12) as u8);
        let Some(op) = op.filter(|&op| op != AluOp::Store) else {
            return undefined(&[ins.0, ext]);
        };

        let ra = Reg::new(((ext >> 9) & 7) | ((ext >> 5) & 8));
        let rb = Reg::new(ext & 0xF);

        let value = self.alu(op, self.regs.get(ra), self.regs.get(rb), ra != Reg::Pc);
        self.writeback(op, ra, value);

        Ok(4)
    }

    pub(crate) fn exec_fxxx(&mut self, bus: &mut dyn Bus, ins: Ins) -> GroupResult {
        let code = ins.0;

        // mul.us / mul.ss
        if code & 0xF0F8 == 0xF008 {
            let signed = code & 0x0100 != 0;
            let a = self.regs.get(ins.reg_a());
            let b = self.regs.get(ins.reg_b());
            self.regs.set_mr(multiply(a, b, signed));
            return Ok(12);
        }

        // call
        if code & 0xF3C0 == 0xF040 {
            let target = self.fetch(bus);
            let pc = self.regs.get(Reg::Pc);
            let sr = self.regs.get(Reg::Sr);
            self.push(bus, pc, Reg::Sp);
            self.push(bus, sr, Reg::Sp);
            self.regs.set_lpc(((ins.imm6() as u32) << 16) | target as u32);
            return Ok(9);
        }

        // jmpf
        if code & 0xFFC0 == 0xFE80 {
            let target = self.fetch(bus);
            self.regs.set_lpc(((ins.imm6() as u32) << 16) | target as u32);
            return Ok(5);
        }

        if code & 0xFFC0 == 0xF140 {
            return self.exec_int_control(bus, ins);
        }

        if code == Ins::EXTENDED && self.config.isa >= IsaVersion::V20 {
            return self.exec_extended(bus, ins);
        }

        undefined(&[code])
    }
}
