use super::{GroupResult, undefined};
use crate::Cpu;
use crate::bus::Bus;
use crate::ins::{AluOp, Form, Ins, ShiftOp, Update};
use crate::regs::Reg;

impl Cpu {
    /// Adds `delta` to an indirect base register. In `ds:` mode, wrapping carries into DS.
    fn update_indirect_base(&mut self, base: Reg, delta: i16, ds: bool) {
        let value = self.regs.get(base).wrapping_add_signed(delta);
        self.regs.set(base, value);

        if ds {
            let sr = self.regs.get(Reg::Sr);
            if delta < 0 && value == 0xFFFF {
                self.regs.set(Reg::Sr, sr.wrapping_sub(0x400));
            } else if delta > 0 && value == 0 {
                self.regs.set(Reg::Sr, sr.wrapping_add(0x400));
            }
        }
    }

    /// Shifts `value` through the shift buffer.
    pub(crate) fn shift_sb(&mut self, value: u16, op: ShiftOp, amount: u8) -> u16 {
        let sb = self.regs.sb as u32 & 0xF;
        let value = value as u32;

        let (result, sb) = match op {
            ShiftOp::Asr => {
                let mut shift = (value << 4) | sb;
                if shift & 0x8_0000 != 0 {
                    shift |= 0xF0_0000;
                }
                shift >>= amount;
                (shift >> 4, shift & 0xF)
            }
            ShiftOp::Lsr => {
                let shift = ((value << 4) | sb) >> amount;
                (shift >> 4, shift & 0xF)
            }
            ShiftOp::Lsl => {
                let shift = ((sb << 16) | value) << amount;
                (shift, (shift >> 16) & 0xF)
            }
            ShiftOp::Ror => {
                let shift = ((((sb << 16) | value) << 4) | sb) >> amount;
                (shift >> 4, shift & 0xF)
            }
            ShiftOp::Rol => {
                let shift = ((((sb << 16) | value) << 4) | sb) << amount;
                (shift >> 4, (shift >> 20) & 0xF)
            }
        };

        self.regs.sb = sb as u16;
        result as u16
    }

    fn exec_stack(&mut self, bus: &mut dyn Bus, ins: Ins) -> GroupResult {
        let count = ins.opn();
        let sp = ins.reg_b();

        match ins.op0() {
            // push
            0xD => {
                if count > ins.opa() + 1 {
                    return undefined(&[ins.0]);
                }

                let mut reg = ins.opa();
                for _ in 0..count {
                    let value = self.regs.get(Reg::new(reg));
                    self.push(bus, value, sp);
                    reg = reg.wrapping_sub(1);
                }
            }
            // pop
            0x9 if ins.0 == Ins::RETI => {
                self.reti(bus);
                return Ok(8);
            }
            0x9 => {
                if ins.opa() + count > 7 {
                    return undefined(&[ins.0]);
                }

                let mut reg = ins.opa();
                for _ in 0..count {
                    reg += 1;
                    let value = self.pop(bus, sp);
                    self.regs.set(Reg::new(reg), value);
                }
            }
            _ => return undefined(&[ins.0]),
        }

        Ok(4 + 2 * count as u32)
    }

    pub(crate) fn exec_remaining(&mut self, bus: &mut dyn Bus, ins: Ins) -> GroupResult {
        let form = ins.form();
        if form == Form::Stack {
            return self.exec_stack(bus, ins);
        }

        let Some(op) = ins.alu_op() else {
            return undefined(&[ins.0]);
        };

        let is_store = op == AluOp::Store;
        if is_store && !form.is_memory() {
            return undefined(&[ins.0]);
        }

        let dest = ins.reg_a();
        let mut r0 = self.regs.get(dest);
        let mut r1 = 0;
        let mut addr = 0u32;

        match form {
            Form::BpImm6 => {
                addr = self.regs.get(Reg::Bp).wrapping_add(ins.imm6()) as u32;
                if !is_store {
                    r1 = bus.read16(addr);
                }
            }
            Form::Imm6 => r1 = ins.imm6(),
            Form::Indirect { update, ds } => {
                let base = ins.reg_b();
                if update == Update::PreInc {
                    self.update_indirect_base(base, 1, ds);
                }

                addr = if ds {
                    self.regs.ds_address(base)
                } else {
                    self.regs.get(base) as u32
                };

                if is_store {
                    bus.write16(addr, r0);
                } else {
                    r1 = bus.read16(addr);
                }

                match update {
                    Update::PostDec => self.update_indirect_base(base, -1, ds),
                    Update::PostInc => self.update_indirect_base(base, 1, ds),
                    _ => (),
                }
            }
            Form::Register => r1 = self.regs.get(ins.reg_b()),
            Form::Imm16 => {
                r0 = self.regs.get(ins.reg_b());
                r1 = self.fetch(bus);
            }
            Form::Direct16 => {
                r0 = self.regs.get(ins.reg_b());
                addr = self.fetch(bus) as u32;
                if !is_store {
                    r1 = bus.read16(addr);
                }
            }
            Form::StoreDirect16 => {
                r1 = r0;
                r0 = self.regs.get(ins.reg_b());
                addr = self.fetch(bus) as u32;
            }
            Form::Shifted { op, amount } => {
                let value = self.regs.get(ins.reg_b());
                r1 = self.shift_sb(value, op, amount);
            }
            Form::Direct6 => {
                addr = ins.imm6() as u32;
                if !is_store {
                    r1 = bus.read16(addr);
                }
            }
            Form::Stack => unreachable!(),
        }

        let cycles = form.cycles(dest == Reg::Pc);
        if is_store {
            if !matches!(form, Form::Indirect { .. }) {
                bus.write16(addr, r0);
            }

            return Ok(cycles);
        }

        let value = self.alu(op, r0, r1, dest != Reg::Pc);
        if form == Form::StoreDirect16 {
            if !op.flags_only() {
                bus.write16(addr, value as u16);
            }
        } else {
            self.writeback(op, dest, value);
        }

        Ok(cycles)
    }
}
