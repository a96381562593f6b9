//! Instruction word decoding.

use bitos::BitUtils;
use strum::{FromRepr, IntoStaticStr};

use crate::IsaVersion;
use crate::regs::Reg;

/// Primary instruction groups, selected from the top fields of the opcode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Group {
    /// `op0 == 0xF`: multiplies, far calls/jumps, interrupt control.
    Fxxx,
    /// `opa == 7 && op1 < 2`: relative jumps.
    Jump,
    /// `op0 == 0xE`: bit operations, unsigned multiply, 16-bit shifts.
    Exxx,
    /// ALU operations with their operand forms, push and pop.
    Remaining,
}

/// ALU operations, indexed by `op0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum AluOp {
    Add   = 0x0,
    Adc   = 0x1,
    Sub   = 0x2,
    Sbc   = 0x3,
    Cmp   = 0x4,
    Neg   = 0x6,
    Xor   = 0x8,
    Load  = 0x9,
    Or    = 0xA,
    And   = 0xB,
    Test  = 0xC,
    Store = 0xD,
}

impl AluOp {
    /// Whether the result of this operation is discarded and only flags are updated.
    pub fn flags_only(self) -> bool {
        matches!(self, Self::Cmp | Self::Test)
    }
}

/// Shift applied to a register operand through the shift buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Asr,
    Lsl,
    Lsr,
    Rol,
    Ror,
}

/// Indirect addressing side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Update {
    /// `[Rn]`
    None,
    /// `[Rn--]`
    PostDec,
    /// `[Rn++]`
    PostInc,
    /// `[++Rn]`
    PreInc,
}

/// Operand form of a remaining group instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    /// `[BP+imm6]`
    BpImm6,
    /// `imm6`
    Imm6,
    /// `push`/`pop`
    Stack,
    /// `[Rn]`, `ds:[Rn]` and their update variants.
    Indirect { update: Update, ds: bool },
    /// `Rb`
    Register,
    /// `Rd = Rb op imm16`
    Imm16,
    /// `Rd = Rb op [imm16]`
    Direct16,
    /// `[imm16] = Rd op Rb`
    StoreDirect16,
    /// `Rb shift n`
    Shifted { op: ShiftOp, amount: u8 },
    /// `[imm6]`
    Direct6,
}

impl Form {
    /// Whether this form reads from (or writes to) memory.
    pub fn is_memory(self) -> bool {
        matches!(
            self,
            Self::BpImm6 | Self::Indirect { .. } | Self::Direct16 | Self::StoreDirect16 | Self::Direct6
        )
    }

    /// Cycles taken by an instruction of this form, without and with PC as the destination.
    pub fn cycles(self, to_pc: bool) -> u32 {
        let (base, pc_penalty) = match self {
            Self::BpImm6 => (6, 1),
            Self::Imm6 => (2, 1),
            Self::Indirect { .. } => (6, 1),
            Self::Register => (3, 2),
            Self::Imm16 => (4, 1),
            Self::Direct16 | Self::StoreDirect16 => (7, 1),
            Self::Shifted { .. } => (3, 2),
            Self::Direct6 => (5, 1),
            Self::Stack => (4, 0),
        };

        if to_pc { base + pc_penalty } else { base }
    }
}

/// A µ'nSP instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Ins(pub u16);

impl std::fmt::Debug for Ins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ins({:04X})", self.0)
    }
}

impl Ins {
    pub const RETI: u16 = 0x9A98;
    pub const EXTENDED: u16 = 0xFF80;

    #[inline(always)]
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    /// Bits 15..12, the primary group.
    #[inline(always)]
    pub fn op0(self) -> u16 {
        self.0.bits(12, 16)
    }

    /// Bits 11..9, usually the destination register.
    #[inline(always)]
    pub fn opa(self) -> u16 {
        self.0.bits(9, 12)
    }

    /// Bits 8..6, the operand form.
    #[inline(always)]
    pub fn op1(self) -> u16 {
        self.0.bits(6, 9)
    }

    /// Bits 5..3, the form modifier.
    #[inline(always)]
    pub fn opn(self) -> u16 {
        self.0.bits(3, 6)
    }

    /// Bits 2..0, usually the source register.
    #[inline(always)]
    pub fn opb(self) -> u16 {
        self.0.bits(0, 3)
    }

    #[inline(always)]
    pub fn imm6(self) -> u16 {
        self.0.bits(0, 6)
    }

    #[inline(always)]
    pub fn reg_a(self) -> Reg {
        Reg::new(self.opa())
    }

    #[inline(always)]
    pub fn reg_b(self) -> Reg {
        Reg::new(self.opb())
    }

    #[inline(always)]
    pub fn group(self) -> Group {
        if self.op0() == 0xF {
            Group::Fxxx
        } else if self.opa() == 7 && self.op1() < 2 {
            Group::Jump
        } else if self.op0() == 0xE {
            Group::Exxx
        } else {
            Group::Remaining
        }
    }

    /// The ALU operation of a remaining group instruction.
    #[inline(always)]
    pub fn alu_op(self) -> Option<AluOp> {
        AluOp::from_repr(self.op0() as u8)
    }

    /// The operand form of a remaining group instruction.
    pub fn form(self) -> Form {
        let opn = self.opn();
        match self.op1() {
            0 => Form::BpImm6,
            1 => Form::Imm6,
            2 => Form::Stack,
            3 => Form::Indirect {
                update: Update::from_repr(opn.bits(0, 2) as u8).unwrap_or(Update::None),
                ds: opn.bit(2),
            },
            4 => match opn {
                0 => Form::Register,
                1 => Form::Imm16,
                2 => Form::Direct16,
                3 => Form::StoreDirect16,
                _ => Form::Shifted {
                    op: ShiftOp::Asr,
                    amount: (opn - 3) as u8,
                },
            },
            5 if opn.bit(2) => Form::Shifted {
                op: ShiftOp::Lsr,
                amount: (opn - 3) as u8,
            },
            5 => Form::Shifted {
                op: ShiftOp::Lsl,
                amount: (opn + 1) as u8,
            },
            6 if opn.bit(2) => Form::Shifted {
                op: ShiftOp::Ror,
                amount: (opn - 3) as u8,
            },
            6 => Form::Shifted {
                op: ShiftOp::Rol,
                amount: (opn + 1) as u8,
            },
            _ => Form::Direct6,
        }
    }

    /// Number of words (including this one) the instruction occupies.
    pub fn len(self, isa: IsaVersion) -> u32 {
        match self.group() {
            Group::Remaining => match self.form() {
                Form::Imm16 | Form::Direct16 | Form::StoreDirect16 => 2,
                _ => 1,
            },
            Group::Fxxx => {
                let code = self.0;
                let call = code & 0xF3C0 == 0xF040;
                let jmpf = code & 0xFFC0 == 0xFE80;
                let extended = code == Self::EXTENDED && isa >= IsaVersion::V20;
                if call || jmpf || extended { 2 } else { 1 }
            }
            _ => 1,
        }
    }
}
