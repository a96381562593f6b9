use std::mem::offset_of;

use bitos::integer::u6;
use bitos::{BitUtils, bitos};
use serde::{Deserialize, Serialize};
use strum::{IntoStaticStr, VariantArray};

/// Mask of the program counter after paging: 6 bits of CS followed by the 16 bits of PC.
pub const LPC_MASK: u32 = 0x3F_FFFF;

/// SR flag masks.
pub const FLAG_N: u16 = 1 << 9;
pub const FLAG_Z: u16 = 1 << 8;
pub const FLAG_S: u16 = 1 << 7;
pub const FLAG_C: u16 = 1 << 6;

/// The status register.
#[bitos(16)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    /// Code segment: bits 16..22 of the program counter.
    #[bits(0..6)]
    pub cs: u6,
    #[bits(6)]
    pub carry: bool,
    #[bits(7)]
    pub sign: bool,
    #[bits(8)]
    pub zero: bool,
    #[bits(9)]
    pub negative: bool,
    /// Data segment: bits 16..22 of `ds:` indirect addresses.
    #[bits(10..16)]
    pub ds: u6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, VariantArray)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Reg {
    Sp,
    R1,
    R2,
    R3,
    R4,
    Bp,
    Sr,
    Pc,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Reg {
    /// Returns the register with the given index. Only the low 4 bits are considered.
    #[inline(always)]
    pub fn new(index: u16) -> Self {
        Self::VARIANTS[(index & 0xF) as usize]
    }

    #[inline(always)]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase assembly name of this register.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Offset of this register in [`Registers`].
    pub fn offset(self) -> usize {
        offset_of!(Registers, gpr) + size_of::<u16>() * self.index()
    }
}

/// The register file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct Registers {
    /// `SP`, `R1`-`R4`, `BP`, `SR` and `PC`, followed by the extended `R8`-`R15`.
    pub gpr: [u16; 16],
    /// 4-bit shift buffer.
    pub sb: u16,
}

impl Registers {
    pub const SB_OFFSET: usize = offset_of!(Registers, sb);

    #[inline(always)]
    pub fn get(&self, reg: Reg) -> u16 {
        self.gpr[reg.index()]
    }

    #[inline(always)]
    pub fn set(&mut self, reg: Reg, value: u16) {
        self.gpr[reg.index()] = value;
    }

    #[inline(always)]
    pub fn status(&self) -> Status {
        Status::from_bits(self.get(Reg::Sr))
    }

    #[inline(always)]
    pub fn set_status(&mut self, status: Status) {
        self.set(Reg::Sr, status.to_bits());
    }

    /// The 22-bit program counter, `CS:PC`.
    #[inline(always)]
    pub fn lpc(&self) -> u32 {
        ((self.get(Reg::Sr).bits(0, 6) as u32) << 16) | self.get(Reg::Pc) as u32
    }

    /// Sets `CS:PC` from a 22-bit address.
    #[inline(always)]
    pub fn set_lpc(&mut self, lpc: u32) {
        let sr = self.get(Reg::Sr).with_bits(0, 6, (lpc >> 16) as u16 & 0x3F);
        self.set(Reg::Pc, lpc as u16);
        self.set(Reg::Sr, sr);
    }

    /// Adds `offset` words to `CS:PC`, carrying into the code segment.
    #[inline(always)]
    pub fn add_lpc(&mut self, offset: i32) {
        self.set_lpc(self.lpc().wrapping_add_signed(offset));
    }

    #[inline(always)]
    pub fn ds(&self) -> u16 {
        self.get(Reg::Sr).bits(10, 16)
    }

    #[inline(always)]
    pub fn set_ds(&mut self, ds: u16) {
        let sr = self.get(Reg::Sr).with_bits(10, 16, ds & 0x3F);
        self.set(Reg::Sr, sr);
    }

    /// The `ds:`-prefixed 22-bit address held in `reg`.
    #[inline(always)]
    pub fn ds_address(&self, reg: Reg) -> u32 {
        ((self.ds() as u32) << 16) | self.get(reg) as u32
    }

    /// The 32-bit multiply result register, `R4:R3`.
    #[inline(always)]
    pub fn mr(&self) -> u32 {
        ((self.get(Reg::R4) as u32) << 16) | self.get(Reg::R3) as u32
    }

    #[inline(always)]
    pub fn set_mr(&mut self, value: u32) {
        self.set(Reg::R4, (value >> 16) as u16);
        self.set(Reg::R3, value as u16);
    }

    #[inline(always)]
    fn flag(&self, mask: u16) -> bool {
        self.get(Reg::Sr) & mask != 0
    }

    pub fn negative(&self) -> bool {
        self.flag(FLAG_N)
    }

    pub fn zero(&self) -> bool {
        self.flag(FLAG_Z)
    }

    pub fn sign(&self) -> bool {
        self.flag(FLAG_S)
    }

    pub fn carry(&self) -> bool {
        self.flag(FLAG_C)
    }

    /// Updates N and Z from the low 16 bits of `value`.
    pub fn update_nz(&mut self, value: u32) {
        let mut sr = self.get(Reg::Sr) & !(FLAG_N | FLAG_Z);
        if value.bit(15) {
            sr |= FLAG_N;
        }

        if value as u16 == 0 {
            sr |= FLAG_Z;
        }

        self.set(Reg::Sr, sr);
    }

    /// Updates N, Z, S and C from the 17-bit ALU intermediate `value` and its operands.
    ///
    /// S is `r0 < !r1` as signed 16-bit values: subtraction-style callers pass the complemented
    /// operand, so S ends up being the signed "less than" of the original operands.
    pub fn update_nzsc(&mut self, value: u32, r0: u16, r1: u16) {
        let mut sr = self.get(Reg::Sr) & !(FLAG_N | FLAG_Z | FLAG_S | FLAG_C);
        if (r0 as i16) < (!r1 as i16) {
            sr |= FLAG_S;
        }

        if value.bit(15) {
            sr |= FLAG_N;
        }

        if value as u16 == 0 {
            sr |= FLAG_Z;
        }

        if value.bit(16) {
            sr |= FLAG_C;
        }

        self.set(Reg::Sr, sr);
    }
}
