use cranelift::codegen::ir;
use cranelift::prelude::{InstBuilder, IntCC};

use super::BlockBuilder;

impl BlockBuilder<'_> {
    pub fn const16(&mut self, value: u16) -> ir::Value {
        self.bd.ins().iconst(ir::types::I16, value as i64)
    }

    pub fn const32(&mut self, value: u32) -> ir::Value {
        self.bd.ins().iconst(ir::types::I32, value as i64)
    }

    /// Zero extends a 16-bit value to 32 bits.
    pub fn widen(&mut self, value: ir::Value) -> ir::Value {
        self.bd.ins().uextend(ir::types::I32, value)
    }

    /// Keeps the low 16 bits of a 32-bit value.
    pub fn narrow(&mut self, value: ir::Value) -> ir::Value {
        self.bd.ins().ireduce(ir::types::I16, value)
    }

    /// Returns an I8 which is 1 if any bit of `mask` is set in `value`.
    pub fn any_bit(&mut self, value: ir::Value, mask: u16) -> ir::Value {
        let masked = self.bd.ins().band_imm(value, mask as i64);
        self.bd.ins().icmp_imm(IntCC::NotEqual, masked, 0)
    }

    /// Moves the bit at `from` in `value` to position `to` of a 16-bit value, clearing the rest.
    pub fn move_bit(&mut self, value: ir::Value, from: u32, to: u32) -> ir::Value {
        let aligned = if from > to {
            self.bd.ins().ushr_imm(value, (from - to) as i64)
        } else {
            self.bd.ins().ishl_imm(value, (to - from) as i64)
        };

        let bit = self.bd.ins().band_imm(aligned, 1 << to);
        if self.bd.func.dfg.value_type(bit) == ir::types::I16 {
            bit
        } else {
            self.narrow(bit)
        }
    }
}
