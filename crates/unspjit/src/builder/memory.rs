use cranelift::codegen::ir;
use cranelift::prelude::InstBuilder;
use unsp::ins::Ins;
use unsp::regs::Reg;

use super::{Action, BlockBuilder, InstructionInfo};

impl BlockBuilder<'_> {
    /// Reads the word at the 32-bit address `addr` through the read hook.
    pub fn read(&mut self, addr: ir::Value) -> ir::Value {
        let inst = self
            .bd
            .ins()
            .call(self.hooks.read, &[self.consts.ctx_ptr, addr]);

        self.bd.inst_results(inst)[0]
    }

    /// Writes `value` to the 32-bit address `addr` through the write hook.
    pub fn write(&mut self, addr: ir::Value, value: ir::Value) {
        let inst = self
            .bd
            .ins()
            .call(self.hooks.write, &[self.consts.ctx_ptr, addr, value]);

        let hit = self.bd.inst_results(inst)[0];
        self.invalidated = Some(match self.invalidated {
            Some(previous) => self.bd.ins().bor(previous, hit),
            None => hit,
        });
    }

    /// Writes `value` at the address in `sp`, then decrements it.
    pub fn push(&mut self, value: ir::Value, sp: Reg) {
        let current = self.get(sp);
        let addr = self.widen(current);
        self.write(addr, value);

        let one = self.const16(1);
        let decremented = self.bd.ins().isub(current, one);
        self.set(sp, decremented);
    }

    /// Increments `sp`, then reads the word at its address.
    pub fn pop(&mut self, sp: Reg) -> ir::Value {
        let current = self.get(sp);
        let incremented = self.bd.ins().iadd_imm(current, 1);
        self.set(sp, incremented);

        let addr = self.widen(incremented);
        self.read(addr)
    }

    /// `push` and `pop` of a register range.
    pub fn stack(&mut self, ins: Ins) -> Option<InstructionInfo> {
        let count = ins.opn();
        let sp = ins.reg_b();
        if matches!(sp, Reg::Pc | Reg::Sr) {
            return None;
        }

        let mut touches_sr = false;
        let mut touches_pc = false;
        match ins.op0() {
            0xD => {
                if count > ins.opa() + 1 {
                    return None;
                }

                let mut reg = ins.opa();
                for _ in 0..count {
                    let value = self.get(Reg::new(reg));
                    self.push(value, sp);
                    reg = reg.wrapping_sub(1);
                }
            }
            0x9 => {
                if ins.0 == Ins::RETI || ins.opa() + count > 7 {
                    return None;
                }

                let mut reg = ins.opa();
                for _ in 0..count {
                    reg += 1;
                    let dest = Reg::new(reg);
                    let value = self.pop(sp);
                    self.set(dest, value);

                    touches_sr |= dest == Reg::Sr;
                    touches_pc |= dest == Reg::Pc;
                }
            }
            _ => return None,
        }

        let cycles = 4 + 2 * count as u32;
        Some(if touches_pc {
            // retf
            InstructionInfo {
                cycles,
                auto_pc: false,
                action: Action::FlushAndPrologue,
            }
        } else if touches_sr {
            InstructionInfo {
                cycles,
                auto_pc: true,
                action: Action::FlushAndPrologue,
            }
        } else {
            InstructionInfo::continues(cycles)
        })
    }
}
