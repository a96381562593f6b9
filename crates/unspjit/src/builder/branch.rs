use cranelift::codegen::ir;
use cranelift::prelude::{InstBuilder, IntCC};
use unsp::regs::{FLAG_C, FLAG_N, FLAG_S, FLAG_Z, LPC_MASK, Reg};

use super::{Action, BlockBuilder, InstructionInfo, Slot};
use crate::sequence::Entry;

const CS_MASK: u16 = 0x3F;

impl BlockBuilder<'_> {
    /// Leaves the block with the program counter at `lpc`, accounting for the current instruction
    /// with `cycles` cycles.
    fn exit_to(&mut self, lpc: u32, cycles: u32) {
        self.flush();

        let pc = self.const16(lpc as u16);
        self.store_slot(Slot::Reg(Reg::Pc), pc);

        let cs = (lpc >> 16) as u16;
        if cs != (self.lpc >> 16) as u16 {
            let sr = self.peek(Reg::Sr);
            let sr = self.bd.ins().band_imm(sr, (!CS_MASK) as i64);
            let sr = self.bd.ins().bor_imm(sr, cs as i64);
            self.store_slot(Slot::Reg(Reg::Sr), sr);
        }

        self.update_info(
            self.executed_instructions + 1,
            self.executed_cycles + cycles,
        );
        self.bd.ins().return_(&[]);
    }

    /// An I8 which is 1 if the jump condition selected by `op0` holds.
    fn condition(&mut self, op0: u16) -> ir::Value {
        let sr = self.get(Reg::Sr);
        let test = |this: &mut Self, mask: u16, cc: IntCC, expected: u16| {
            let masked = this.bd.ins().band_imm(sr, mask as i64);
            this.bd.ins().icmp_imm(cc, masked, expected as i64)
        };

        match op0 {
            0x0 => test(self, FLAG_C, IntCC::Equal, 0),
            0x1 => self.any_bit(sr, FLAG_C),
            0x2 => test(self, FLAG_S, IntCC::Equal, 0),
            0x3 => self.any_bit(sr, FLAG_S),
            0x4 => test(self, FLAG_Z, IntCC::Equal, 0),
            0x5 => self.any_bit(sr, FLAG_Z),
            0x6 => test(self, FLAG_N, IntCC::Equal, 0),
            0x7 => self.any_bit(sr, FLAG_N),
            0x8 => test(self, FLAG_Z | FLAG_C, IntCC::NotEqual, FLAG_C),
            0x9 => test(self, FLAG_Z | FLAG_C, IntCC::Equal, FLAG_C),
            0xA => self.any_bit(sr, FLAG_Z | FLAG_S),
            0xB => test(self, FLAG_Z | FLAG_S, IntCC::Equal, 0),
            0xC | 0xD => {
                // S lines up with N
                let shifted = self.bd.ins().ishl_imm(sr, 2);
                let differ = self.bd.ins().bxor(sr, shifted);
                let differ = self.bd.ins().band_imm(differ, FLAG_N as i64);
                let cc = if op0 == 0xC {
                    IntCC::Equal
                } else {
                    IntCC::NotEqual
                };

                self.bd.ins().icmp_imm(cc, differ, 0)
            }
            _ => unreachable!("unconditional jumps have no condition"),
        }
    }

    /// Relative jumps. Always end the block.
    pub fn jump(&mut self, entry: Entry) -> Option<InstructionInfo> {
        let ins = entry.ins;
        let offset = ins.imm6() as u32;
        let target = if ins.op1() == 0 {
            self.next.wrapping_add(offset)
        } else {
            self.next.wrapping_sub(offset)
        } & LPC_MASK;

        let timing = self.codegen.settings.timing;
        let (taken, not_taken) = (timing.charge(4), timing.charge(2));

        if ins.op0() >= 0xE {
            self.exit_to(target, taken);
        } else {
            let cond = self.condition(ins.op0());
            let taken_bb = self.bd.create_block();
            let not_taken_bb = self.bd.create_block();

            self.bd.ins().brif(cond, taken_bb, &[], not_taken_bb, &[]);
            self.bd.seal_block(taken_bb);
            self.bd.seal_block(not_taken_bb);

            self.switch_to_bb(taken_bb);
            self.exit_to(target, taken);

            self.switch_to_bb(not_taken_bb);
            self.exit_to(self.next, not_taken);
        }

        Some(InstructionInfo {
            cycles: 4,
            auto_pc: false,
            action: Action::Finish,
        })
    }

    /// Multiplies `a` by `b` into a 32-bit value, treating `b` as signed and `a` as signed only
    /// if `signed_a` is set.
    fn multiply(&mut self, a: ir::Value, b: ir::Value, signed_a: bool) -> ir::Value {
        let a32 = self.widen(a);
        let b32 = self.widen(b);
        let zero = self.const32(0);

        let mut result = self.bd.ins().imul(a32, b32);

        let b_negative = self.any_bit(b, 0x8000);
        let a_high = self.bd.ins().ishl_imm(a32, 16);
        let correction = self.bd.ins().select(b_negative, a_high, zero);
        result = self.bd.ins().isub(result, correction);

        if signed_a {
            let a_negative = self.any_bit(a, 0x8000);
            let b_high = self.bd.ins().ishl_imm(b32, 16);
            let correction = self.bd.ins().select(a_negative, b_high, zero);
            result = self.bd.ins().isub(result, correction);
        }

        result
    }

    /// `mul`, `call` and `jmpf`. Interrupt control and the extended opcode are left to the
    /// interpreter.
    pub fn fxxx(&mut self, entry: Entry) -> Option<InstructionInfo> {
        let ins = entry.ins;
        let code = ins.0;
        let timing = self.codegen.settings.timing;

        // mul.us / mul.ss
        if code & 0xF0F8 == 0xF008 {
            let a = self.get(ins.reg_a());
            let b = self.get(ins.reg_b());
            let result = self.multiply(a, b, code & 0x0100 != 0);

            let high = self.bd.ins().ushr_imm(result, 16);
            let high = self.narrow(high);
            let low = self.narrow(result);
            self.set(Reg::R4, high);
            self.set(Reg::R3, low);

            return Some(InstructionInfo::continues(12));
        }

        let far_target = |ext: u16| ((ins.imm6() as u32) << 16) | ext as u32;

        // call
        if code & 0xF3C0 == 0xF040 {
            let target = far_target(entry.ext?);

            let pc = self.const16(self.next as u16);
            self.push(pc, Reg::Sp);
            let sr = self.get(Reg::Sr);
            self.push(sr, Reg::Sp);

            self.exit_to(target, timing.charge(9));
            return Some(InstructionInfo {
                cycles: 9,
                auto_pc: false,
                action: Action::Finish,
            });
        }

        // jmpf
        if code & 0xFFC0 == 0xFE80 {
            let target = far_target(entry.ext?);
            self.exit_to(target, timing.charge(5));
            return Some(InstructionInfo {
                cycles: 5,
                auto_pc: false,
                action: Action::Finish,
            });
        }

        None
    }
}
