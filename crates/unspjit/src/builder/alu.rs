use cranelift::codegen::ir;
use cranelift::prelude::{InstBuilder, IntCC};
use unsp::ins::{AluOp, Form, ShiftOp, Update};
use unsp::regs::{FLAG_C, FLAG_N, FLAG_S, FLAG_Z, Reg};

use super::{Action, BlockBuilder, InstructionInfo, Slot};
use crate::sequence::Entry;

/// How the S flag of an arithmetic operation is derived.
#[derive(Clone, Copy)]
enum SignRule {
    /// `r0 < !r1`, for additions.
    Add,
    /// `r0 < r1`, for subtractions.
    Sub,
}

impl BlockBuilder<'_> {
    /// Updates N and Z, and S and C if `sign` is given, from the 17-bit intermediate `value`.
    fn update_flags(&mut self, value: ir::Value, sign: Option<ir::Value>) {
        let sr = self.get(Reg::Sr);
        let mask = match sign {
            Some(_) => FLAG_N | FLAG_Z | FLAG_S | FLAG_C,
            None => FLAG_N | FLAG_Z,
        };

        let mut sr = self.bd.ins().band_imm(sr, (!mask) as i64);

        let low = self.narrow(value);
        let n = self.move_bit(low, 15, 9);
        sr = self.bd.ins().bor(sr, n);

        let z = self.bd.ins().icmp_imm(IntCC::Equal, low, 0);
        let z = self.bd.ins().uextend(ir::types::I16, z);
        let z = self.bd.ins().ishl_imm(z, 8);
        sr = self.bd.ins().bor(sr, z);

        if let Some(sign) = sign {
            let s = self.bd.ins().uextend(ir::types::I16, sign);
            let s = self.bd.ins().ishl_imm(s, 7);
            sr = self.bd.ins().bor(sr, s);

            let c = self.move_bit(value, 16, 6);
            sr = self.bd.ins().bor(sr, c);
        }

        self.set(Reg::Sr, sr);
    }

    /// Performs `op` on the 16-bit values `r0` and `r1`, returning the 32-bit intermediate.
    pub fn alu(&mut self, op: AluOp, r0: ir::Value, r1: ir::Value, flags: bool) -> ir::Value {
        let a = self.widen(r0);
        let b = self.widen(r1);

        let (value, rule) = match op {
            AluOp::Add => (self.bd.ins().iadd(a, b), Some(SignRule::Add)),
            AluOp::Adc => {
                let carry = self.carry();
                let sum = self.bd.ins().iadd(a, b);
                (self.bd.ins().iadd(sum, carry), Some(SignRule::Add))
            }
            AluOp::Sub | AluOp::Cmp => {
                let not_b = self.bd.ins().bnot(r1);
                let not_b = self.widen(not_b);
                let sum = self.bd.ins().iadd(a, not_b);
                (self.bd.ins().iadd_imm(sum, 1), Some(SignRule::Sub))
            }
            AluOp::Sbc => {
                let carry = self.carry();
                let not_b = self.bd.ins().bnot(r1);
                let not_b = self.widen(not_b);
                let sum = self.bd.ins().iadd(a, not_b);
                (self.bd.ins().iadd(sum, carry), Some(SignRule::Sub))
            }
            AluOp::Neg => (self.bd.ins().ineg(b), None),
            AluOp::Xor => (self.bd.ins().bxor(a, b), None),
            AluOp::Load | AluOp::Store => (b, None),
            AluOp::Or => (self.bd.ins().bor(a, b), None),
            AluOp::And | AluOp::Test => (self.bd.ins().band(a, b), None),
        };

        if flags {
            let sign = rule.map(|rule| match rule {
                SignRule::Add => {
                    let not_b = self.bd.ins().bnot(r1);
                    self.bd.ins().icmp(IntCC::SignedLessThan, r0, not_b)
                }
                SignRule::Sub => self.bd.ins().icmp(IntCC::SignedLessThan, r0, r1),
            });

            self.update_flags(value, sign);
        }

        value
    }

    /// The carry flag as a 32-bit 0 or 1.
    fn carry(&mut self) -> ir::Value {
        let sr = self.get(Reg::Sr);
        let carry = self.move_bit(sr, 6, 0);
        self.widen(carry)
    }

    /// Shifts `value` through the shift buffer.
    pub fn shift_sb(&mut self, value: ir::Value, op: ShiftOp, amount: u8) -> ir::Value {
        let amount = amount as i64;
        let sb = self.get(Slot::Sb);
        let sb = self.widen(sb);
        let sb = self.bd.ins().band_imm(sb, 0xF);
        let value = self.widen(value);

        // (sb << 16) | value
        let wide = {
            let high = self.bd.ins().ishl_imm(sb, 16);
            self.bd.ins().bor(high, value)
        };

        let (result, sb) = match op {
            ShiftOp::Asr => {
                let shifted = self.bd.ins().ishl_imm(value, 4);
                let shift = self.bd.ins().bor(shifted, sb);
                let negative = self.bd.ins().band_imm(shift, 0x8_0000);
                let extended = self.bd.ins().bor_imm(shift, 0xF0_0000);
                let shift = self.bd.ins().select(negative, extended, shift);
                let shift = self.bd.ins().ushr_imm(shift, amount);
                (
                    self.bd.ins().ushr_imm(shift, 4),
                    self.bd.ins().band_imm(shift, 0xF),
                )
            }
            ShiftOp::Lsr => {
                let shifted = self.bd.ins().ishl_imm(value, 4);
                let shift = self.bd.ins().bor(shifted, sb);
                let shift = self.bd.ins().ushr_imm(shift, amount);
                (
                    self.bd.ins().ushr_imm(shift, 4),
                    self.bd.ins().band_imm(shift, 0xF),
                )
            }
            ShiftOp::Lsl => {
                let shift = self.bd.ins().ishl_imm(wide, amount);
                let high = self.bd.ins().ushr_imm(shift, 16);
                (shift, self.bd.ins().band_imm(high, 0xF))
            }
            ShiftOp::Ror => {
                let shifted = self.bd.ins().ishl_imm(wide, 4);
                let shift = self.bd.ins().bor(shifted, sb);
                let shift = self.bd.ins().ushr_imm(shift, amount);
                (
                    self.bd.ins().ushr_imm(shift, 4),
                    self.bd.ins().band_imm(shift, 0xF),
                )
            }
            ShiftOp::Rol => {
                let shifted = self.bd.ins().ishl_imm(wide, 4);
                let shift = self.bd.ins().bor(shifted, sb);
                let shift = self.bd.ins().ishl_imm(shift, amount);
                let high = self.bd.ins().ushr_imm(shift, 20);
                (
                    self.bd.ins().ushr_imm(shift, 4),
                    self.bd.ins().band_imm(high, 0xF),
                )
            }
        };

        let sb = self.narrow(sb);
        self.set(Slot::Sb, sb);
        self.narrow(result)
    }

    /// Adds `delta` to an indirect base register. In `ds:` mode, wrapping carries into DS.
    fn update_indirect_base(&mut self, base: Reg, increment: bool, ds: bool) {
        let value = self.get(base);
        let value = if increment {
            self.bd.ins().iadd_imm(value, 1)
        } else {
            let one = self.const16(1);
            self.bd.ins().isub(value, one)
        };
        self.set(base, value);

        if ds {
            let (wrapped, adjusted) = {
                let sr = self.get(Reg::Sr);
                let step = self.const16(0x400);
                if increment {
                    (
                        self.bd.ins().icmp_imm(IntCC::Equal, value, 0),
                        self.bd.ins().iadd(sr, step),
                    )
                } else {
                    (
                        self.bd.ins().icmp_imm(IntCC::Equal, value, 0xFFFF),
                        self.bd.ins().isub(sr, step),
                    )
                }
            };

            let sr = self.get(Reg::Sr);
            let sr = self.bd.ins().select(wrapped, adjusted, sr);
            self.set(Reg::Sr, sr);
        }
    }

    /// The 32-bit address held in `base`, prefixed by DS if `ds` is set.
    fn indirect_address(&mut self, base: Reg, ds: bool) -> ir::Value {
        let value = self.get(base);
        let addr = self.widen(value);
        if !ds {
            return addr;
        }

        let sr = self.get(Reg::Sr);
        let sr = self.widen(sr);
        let segment = self.bd.ins().ushr_imm(sr, 10);
        let segment = self.bd.ins().ishl_imm(segment, 16);
        self.bd.ins().bor(segment, addr)
    }

    /// ALU operations with their operand forms, `push` and `pop`.
    pub fn remaining(&mut self, entry: Entry) -> Option<InstructionInfo> {
        let ins = entry.ins;
        let form = ins.form();
        if form == Form::Stack {
            return self.stack(ins);
        }

        let op = ins.alu_op()?;
        let is_store = op == AluOp::Store;
        if is_store && !form.is_memory() {
            return None;
        }

        // updating PC or SR as a base would move the program counter
        if let Form::Indirect { update, .. } = form
            && update != Update::None
            && matches!(ins.reg_b(), Reg::Pc | Reg::Sr)
        {
            return None;
        }

        let dest = ins.reg_a();
        let writes_dest = !is_store && !op.flags_only() && form != Form::StoreDirect16;

        let mut r0 = self.get(dest);
        let mut r1 = None;
        let mut addr = None;

        match form {
            Form::BpImm6 => {
                let bp = self.get(Reg::Bp);
                let target = self.bd.ins().iadd_imm(bp, ins.imm6() as i64);
                let target = self.widen(target);
                if !is_store {
                    r1 = Some(self.read(target));
                }
                addr = Some(target);
            }
            Form::Imm6 => r1 = Some(self.const16(ins.imm6())),
            Form::Indirect { update, ds } => {
                let base = ins.reg_b();
                if update == Update::PreInc {
                    self.update_indirect_base(base, true, ds);
                }

                let target = self.indirect_address(base, ds);
                if is_store {
                    self.write(target, r0);
                } else {
                    r1 = Some(self.read(target));
                }

                match update {
                    Update::PostDec => self.update_indirect_base(base, false, ds),
                    Update::PostInc => self.update_indirect_base(base, true, ds),
                    _ => (),
                }
            }
            Form::Register => r1 = Some(self.get(ins.reg_b())),
            Form::Imm16 => {
                r0 = self.get(ins.reg_b());
                r1 = Some(self.const16(entry.ext?));
            }
            Form::Direct16 => {
                r0 = self.get(ins.reg_b());
                let target = self.const32(entry.ext? as u32);
                if !is_store {
                    r1 = Some(self.read(target));
                }
                addr = Some(target);
            }
            Form::StoreDirect16 => {
                r1 = Some(r0);
                r0 = self.get(ins.reg_b());
                addr = Some(self.const32(entry.ext? as u32));
            }
            Form::Shifted { op, amount } => {
                let value = self.get(ins.reg_b());
                r1 = Some(self.shift_sb(value, op, amount));
            }
            Form::Direct6 => {
                let target = self.const32(ins.imm6() as u32);
                if !is_store {
                    r1 = Some(self.read(target));
                }
                addr = Some(target);
            }
            Form::Stack => unreachable!(),
        }

        let cycles = form.cycles(dest == Reg::Pc);
        if is_store {
            if let Some(addr) = addr {
                self.write(addr, r0);
            }

            return Some(InstructionInfo::continues(cycles));
        }

        let r1 = match r1 {
            Some(r1) => r1,
            None => self.const16(0),
        };

        let value = self.alu(op, r0, r1, dest != Reg::Pc);
        if form == Form::StoreDirect16 {
            if !op.flags_only()
                && let Some(addr) = addr
            {
                let value = self.narrow(value);
                self.write(addr, value);
            }
        } else if writes_dest {
            let value = self.narrow(value);
            self.set(dest, value);
        }

        Some(match dest {
            Reg::Pc if writes_dest => InstructionInfo {
                cycles,
                auto_pc: false,
                action: Action::FlushAndPrologue,
            },
            // SR holds the code segment
            Reg::Sr if writes_dest => InstructionInfo {
                cycles,
                auto_pc: true,
                action: Action::FlushAndPrologue,
            },
            _ => InstructionInfo::continues(cycles),
        })
    }
}
