//! Disassembler, used for opcode logging and debugging output.

use crate::IsaVersion;
use crate::exec::exxx::{self, BitTarget};
use crate::ins::{Form, Group, Ins, ShiftOp, Update};
use crate::regs::LPC_MASK;

pub static REGS: [&str; 8] = ["sp", "r1", "r2", "r3", "r4", "bp", "sr", "pc"];
pub static EXTREGS: [&str; 8] = ["r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15"];
pub static BITOPS: [&str; 4] = ["tstb", "setb", "clrb", "invb"];
pub static LSFT: [&str; 8] = ["asr", "asror", "lsl", "lslor", "lsr", "lsror", "rol", "ror"];
pub static ALUOPS: [&str; 16] = [
    "add", "adc", "sub", "sbc", "cmp", "(05)", "neg", "(07)", "xor", "load", "or", "and", "test",
    "store", "(0e)", "(0f)",
];
pub static FORMS: [&str; 4] = ["[{}]", "[{}--]", "[{}++]", "[++{}]"];
pub static JUMPS: [&str; 15] = [
    "jb", "jae", "jge", "jl", "jne", "je", "jpl", "jmi", "jbe", "ja", "jle", "jg", "jvc", "jvs",
    "jmp",
];

/// Name of register `index` (0 to 15).
pub fn reg_name(index: u16) -> &'static str {
    let index = (index & 0xF) as usize;
    if index < 8 {
        REGS[index]
    } else {
        EXTREGS[index - 8]
    }
}

fn form(update: Update, ds: bool, reg: &str) -> String {
    let prefix = if ds { "ds:" } else { "" };
    format!("{prefix}{}", FORMS[update as usize].replace("{}", reg))
}

fn shift_name(op: ShiftOp) -> &'static str {
    match op {
        ShiftOp::Asr => LSFT[0],
        ShiftOp::Lsl => LSFT[2],
        ShiftOp::Lsr => LSFT[4],
        ShiftOp::Rol => LSFT[6],
        ShiftOp::Ror => LSFT[7],
    }
}

fn invalid(ins: Ins) -> String {
    format!(".dw {:04x}", ins.0)
}

fn disasm_remaining(ins: Ins, mut imm16: impl FnMut() -> u16) -> String {
    let (ra, rb) = (REGS[ins.opa() as usize], REGS[ins.opb() as usize]);
    let op = ALUOPS[ins.op0() as usize];

    match ins.form() {
        Form::Stack => {
            let count = ins.opn();
            match ins.op0() {
                0x9 if ins.0 == Ins::RETI => "reti".into(),
                0x9 if ins.0 == 0x9A90 => "retf".into(),
                0x9 if count > 0 && ins.opa() + count <= 7 => {
                    let (lo, hi) = (ins.opa() + 1, ins.opa() + count);
                    if lo == hi {
                        format!("pop {} from [{rb}]", REGS[lo as usize])
                    } else {
                        format!("pop {}, {} from [{rb}]", REGS[lo as usize], REGS[hi as usize])
                    }
                }
                0xD if count > 0 && count <= ins.opa() + 1 => {
                    let (lo, hi) = (ins.opa() + 1 - count, ins.opa());
                    if lo == hi {
                        format!("push {} to [{rb}]", REGS[lo as usize])
                    } else {
                        format!("push {}, {} to [{rb}]", REGS[lo as usize], REGS[hi as usize])
                    }
                }
                _ => invalid(ins),
            }
        }
        Form::BpImm6 => format!("{op} {ra}, [bp+{:02x}]", ins.imm6()),
        Form::Imm6 => format!("{op} {ra}, {:02x}", ins.imm6()),
        Form::Indirect { update, ds } => format!("{op} {ra}, {}", form(update, ds, rb)),
        Form::Register => format!("{op} {ra}, {rb}"),
        Form::Imm16 => format!("{op} {ra}, {rb}, {:04x}", imm16()),
        Form::Direct16 => format!("{op} {ra}, {rb}, [{:04x}]", imm16()),
        Form::StoreDirect16 => format!("{op} [{:04x}], {ra}, {rb}", imm16()),
        Form::Shifted { op: shift, amount } => {
            format!("{op} {ra}, {rb} {} {amount}", shift_name(shift))
        }
        Form::Direct6 => format!("{op} {ra}, [{:02x}]", ins.imm6()),
    }
}

fn disasm_fxxx(ins: Ins, isa: IsaVersion, mut next: impl FnMut() -> u16) -> String {
    let code = ins.0;
    let (ra, rb) = (REGS[ins.opa() as usize], REGS[ins.opb() as usize]);

    if code & 0xF0F8 == 0xF008 {
        let kind = if code & 0x0100 != 0 { "ss" } else { "us" };
        return format!("mul.{kind} {ra}, {rb}");
    }

    if code & 0xF3C0 == 0xF040 {
        let target = ((ins.imm6() as u32) << 16) | next() as u32;
        return format!("call {target:06x}");
    }

    if code & 0xFFC0 == 0xFE80 {
        let target = ((ins.imm6() as u32) << 16) | next() as u32;
        return format!("jmpf {target:06x}");
    }

    if code & 0xFFC0 == 0xF140 {
        return match ins.imm6() {
            0x00 => "int off".into(),
            0x01 => "int irq".into(),
            0x02 => "int fiq".into(),
            0x03 => "int irq,fiq".into(),
            0x08 => "irq off".into(),
            0x09 => "irq on".into(),
            0x0C => "fiq off".into(),
            0x0E => "fiq on".into(),
            0x20 => "break".into(),
            0x25 => "nop".into(),
            _ => invalid(ins),
        };
    }

    if code == Ins::EXTENDED && isa >= IsaVersion::V20 {
        let ext = next();
        let aluop = (ext >> 12) as usize;
        if ext & 0xF0 == 0 && !matches!(aluop, 5 | 7 | 13 | 14 | 15) {
            let ra = reg_name(((ext >> 9) & 7) | ((ext >> 5) & 8));
            let rb = reg_name(ext & 0xF);
            return format!("{} {ra}, {rb}", ALUOPS[aluop]);
        }

        return format!(".dw {code:04x} {ext:04x}");
    }

    invalid(ins)
}

fn disasm_exxx(ins: Ins, isa: IsaVersion) -> String {
    if isa < IsaVersion::V12 {
        return invalid(ins);
    }

    let code = ins.0;
    let (ra, rb) = (REGS[ins.opa() as usize], REGS[ins.opb() as usize]);

    if let Some((target, imm)) = exxx::decode_bitop(ins) {
        let op = BITOPS[((code >> 4) & 3) as usize];
        let dest = match target {
            BitTarget::Register => ra.to_string(),
            BitTarget::Memory { ds: false } => format!("[{ra}]"),
            BitTarget::Memory { ds: true } => format!("ds:[{ra}]"),
        };

        return if imm {
            format!("{op} {dest}, {:x}", code & 0xF)
        } else {
            format!("{op} {dest}, {rb}")
        };
    }

    if code & 0xF1F8 == 0xE008 {
        return format!("mul.uu {ra}, {rb}");
    }

    if code & 0xF188 == 0xE108 {
        let op = (code >> 4) & 7;
        let shift = LSFT[op as usize];
        return match op {
            // rol, ror
            6 | 7 => format!("{ra} = {ra} {shift} {rb}"),
            // asror, lslor, lsror
            1 | 3 | 5 => format!("mr |= {ra} {} {rb}", LSFT[op as usize - 1]),
            _ => format!("mr = {ra} {shift} {rb}"),
        };
    }

    invalid(ins)
}

/// Disassembles the instruction `ins` located at `lpc`. Any extension words are fetched with
/// `read`.
pub fn disassemble(ins: Ins, lpc: u32, isa: IsaVersion, mut read: impl FnMut(u32) -> u16) -> String {
    let mut offset = 0;
    let mut next = || {
        offset += 1;
        read((lpc + offset) & LPC_MASK)
    };

    match ins.group() {
        Group::Fxxx => disasm_fxxx(ins, isa, next),
        Group::Jump => {
            let offset = ins.imm6() as i32;
            let after = lpc.wrapping_add(1);
            let target = if ins.op1() == 0 {
                after.wrapping_add_signed(offset)
            } else {
                after.wrapping_add_signed(-offset)
            };
            format!("{} {:06x}", JUMPS[ins.op0() as usize], target & LPC_MASK)
        }
        Group::Exxx => disasm_exxx(ins, isa),
        Group::Remaining => disasm_remaining(ins, &mut next),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dis(code: &[u16], isa: IsaVersion) -> String {
        let words = code.to_vec();
        disassemble(Ins::new(words[0]), 0x0100, isa, |addr| {
            words.get((addr - 0x0100) as usize).copied().unwrap_or(0)
        })
    }

    #[test]
    fn remaining_forms() {
        insta::assert_snapshot!(dis(&[0x0245], IsaVersion::V10), @"add r1, 05");
        insta::assert_snapshot!(dis(&[0x0205], IsaVersion::V10), @"add r1, [bp+05]");
        insta::assert_snapshot!(dis(&[0x92F2], IsaVersion::V10), @"load r1, ds:[r2++]");
        insta::assert_snapshot!(dis(&[0x9309, 0x1234], IsaVersion::V10), @"load r1, r1, 1234");
        insta::assert_snapshot!(dis(&[0xD319, 0x0020], IsaVersion::V10), @"store [0020], r1, r1");
        insta::assert_snapshot!(dis(&[0x0342], IsaVersion::V10), @"add r1, r2 lsl 1");
        insta::assert_snapshot!(dis(&[0xD888], IsaVersion::V10), @"push r4 to [sp]");
        insta::assert_snapshot!(dis(&[0xD8A0], IsaVersion::V10), @"push r1, r4 to [sp]");
        insta::assert_snapshot!(dis(&[0x9A90], IsaVersion::V10), @"retf");
        insta::assert_snapshot!(dis(&[0x9A98], IsaVersion::V10), @"reti");
    }

    #[test]
    fn jumps_and_far_flow() {
        insta::assert_snapshot!(dis(&[0x0E03], IsaVersion::V10), @"jb 000104");
        insta::assert_snapshot!(dis(&[0xEE42], IsaVersion::V10), @"jmp 0000ff");
        insta::assert_snapshot!(dis(&[0xF041, 0x2345], IsaVersion::V10), @"call 012345");
        insta::assert_snapshot!(dis(&[0xFE82, 0x0000], IsaVersion::V10), @"jmpf 020000");
        insta::assert_snapshot!(dis(&[0xF143], IsaVersion::V10), @"int irq,fiq");
        insta::assert_snapshot!(dis(&[0xF165], IsaVersion::V10), @"nop");
        insta::assert_snapshot!(dis(&[0xF160], IsaVersion::V10), @"break");
    }

    #[test]
    fn gated_groups() {
        insta::assert_snapshot!(dis(&[0xE241], IsaVersion::V10), @".dw e241");
        insta::assert_snapshot!(dis(&[0xE251], IsaVersion::V12), @"setb r1, 1");
        insta::assert_snapshot!(dis(&[0xE3C3], IsaVersion::V12), @"tstb ds:[r1], 3");
        insta::assert_snapshot!(dis(&[0xE34A], IsaVersion::V12), @"mr = r1 lsr r2");
        insta::assert_snapshot!(dis(&[0xE33A], IsaVersion::V12), @"mr |= r1 lsl r2");
        insta::assert_snapshot!(dis(&[0xE36A], IsaVersion::V12), @"r1 = r1 rol r2");
        insta::assert_snapshot!(dis(&[0xE20A], IsaVersion::V12), @"mul.uu r1, r2");
        insta::assert_snapshot!(dis(&[0xE28A], IsaVersion::V12), @".dw e28a");
        insta::assert_snapshot!(dis(&[0xFF80, 0x0209], IsaVersion::V20), @"add r1, r9");
        insta::assert_snapshot!(dis(&[0xFF80, 0x0209], IsaVersion::V11), @".dw ff80");
    }
}
