pub(crate) mod exxx;
mod fxxx;
mod jump;
mod remaining;

use crate::bus::Bus;
use crate::ins::{AluOp, Group, Ins};
use crate::regs::Reg;
use crate::{Cpu, Words};

/// Cycles taken by an instruction, or the words of an undefined one.
pub(crate) type GroupResult = Result<u32, Words>;

type GroupFn = for<'a, 'b> fn(&'a mut Cpu, &'b mut dyn Bus, Ins) -> GroupResult;

static GROUP_EXEC_LUT: [GroupFn; 4] = {
    let mut lut = [Cpu::exec_remaining as GroupFn; 4];
    lut[Group::Fxxx as usize] = Cpu::exec_fxxx as GroupFn;
    lut[Group::Jump as usize] = Cpu::exec_jump as GroupFn;
    lut[Group::Exxx as usize] = Cpu::exec_exxx as GroupFn;
    lut
};

#[inline(always)]
pub(crate) fn dispatch(cpu: &mut Cpu, bus: &mut dyn Bus, ins: Ins) -> GroupResult {
    GROUP_EXEC_LUT[ins.group() as usize](cpu, bus, ins)
}

#[inline(always)]
pub(crate) fn undefined(words: &[u16]) -> GroupResult {
    Err(Words::new(words))
}

impl Cpu {
    /// Reads the word at the program counter and advances past it.
    #[inline(always)]
    pub(crate) fn fetch(&mut self, bus: &mut dyn Bus) -> u16 {
        let value = bus.read16(self.regs.lpc());
        self.regs.add_lpc(1);
        value
    }

    /// Performs `op` on `r0` and `r1`, returning the 17-bit intermediate. Flags are only updated
    /// if `flags` is set. Stores are not handled here.
    pub(crate) fn alu(&mut self, op: AluOp, r0: u16, r1: u16, flags: bool) -> u32 {
        let carry = self.regs.carry() as u32;
        let (a, b) = (r0 as u32, r1 as u32);
        let not_b = (!r1) as u32;

        let (value, nzsc) = match op {
            AluOp::Add => (a + b, Some(r1)),
            AluOp::Adc => (a + b + carry, Some(r1)),
            AluOp::Sub | AluOp::Cmp => (a + not_b + 1, Some(!r1)),
            AluOp::Sbc => (a + not_b + carry, Some(!r1)),
            AluOp::Neg => (0u32.wrapping_sub(b), None),
            AluOp::Xor => (a ^ b, None),
            AluOp::Load | AluOp::Store => (b, None),
            AluOp::Or => (a | b, None),
            AluOp::And | AluOp::Test => (a & b, None),
        };

        if flags {
            match nzsc {
                Some(operand) => self.regs.update_nzsc(value, r0, operand),
                None => self.regs.update_nz(value),
            }
        }

        value
    }

    /// Writes the result of an ALU operation to `dest`, unless the operation only sets flags.
    #[inline(always)]
    pub(crate) fn writeback(&mut self, op: AluOp, dest: Reg, value: u32) {
        if !op.flags_only() {
            self.regs.set(dest, value as u16);
        }
    }
}
