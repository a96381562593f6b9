use super::GroupResult;
use crate::Cpu;
use crate::bus::Bus;
use crate::ins::Ins;
use crate::regs::{FLAG_C, FLAG_N, FLAG_S, FLAG_Z, Reg};

/// Whether the condition of a jump, selected by `op0`, holds under `sr`.
pub(crate) fn condition(op0: u16, sr: u16) -> bool {
    let bit = |mask: u16| sr & mask != 0;
    let (n, z, s, c) = (bit(FLAG_N), bit(FLAG_Z), bit(FLAG_S), bit(FLAG_C));

    match op0 {
        0x0 => !c,
        0x1 => c,
        0x2 => !s,
        0x3 => s,
        0x4 => !z,
        0x5 => z,
        0x6 => !n,
        0x7 => n,
        0x8 => sr & (FLAG_Z | FLAG_C) != FLAG_C,
        0x9 => sr & (FLAG_Z | FLAG_C) == FLAG_C,
        0xA => z || s,
        0xB => !z && !s,
        0xC => n == s,
        0xD => n != s,
        _ => true,
    }
}

impl Cpu {
    pub(crate) fn exec_jump(&mut self, _: &mut dyn Bus, ins: Ins) -> GroupResult {
        if !condition(ins.op0(), self.regs.get(Reg::Sr)) {
            return Ok(2);
        }

        let offset = ins.imm6() as i32;
        self.regs.add_lpc(if ins.op1() == 0 { offset } else { -offset });

        Ok(4)
    }
}
