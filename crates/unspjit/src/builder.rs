mod alu;
mod branch;
mod memory;
mod util;

use std::mem::offset_of;

use cranelift::codegen::ir;
use cranelift::frontend;
use cranelift::prelude::InstBuilder;
use easyerr::Error;
use rustc_hash::FxHashMap;
use unsp::IsaVersion;
use unsp::ins::{Group, Ins};
use unsp::regs::{LPC_MASK, Reg, Registers};

use crate::block::Info;
use crate::hooks::{HookKind, Hooks};
use crate::sequence::{Entry, Sequence};
use crate::{Codegen, NAMESPACE_USER_HOOKS};

const MEMFLAGS: ir::MemFlags = ir::MemFlags::trusted();

/// Words in a code segment. Blocks never cross from one into the next.
pub const PAGE_WORDS: u32 = 1 << 16;

/// A piece of architectural state the builder keeps in SSA values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Reg(Reg),
    Sb,
}

impl Slot {
    fn offset(self) -> i32 {
        match self {
            Self::Reg(reg) => reg.offset() as i32,
            Self::Sb => Registers::SB_OFFSET as i32,
        }
    }
}

impl From<Reg> for Slot {
    fn from(value: Reg) -> Self {
        Self::Reg(value)
    }
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("instruction {f0:?} at {f1:06X} is not translated")]
    Unsupported(Ins, u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Continue emitting instructions.
    Continue,
    /// Flush registers and emit the prologue (returns).
    FlushAndPrologue,
    /// Just return, the instruction emitted its own exits.
    Finish,
}

#[derive(Clone, Copy)]
pub(crate) struct InstructionInfo {
    /// Cost under [`unsp::Timing::Table`]. The largest one for instructions with several exits.
    cycles: u32,
    /// Whether PC should point to the next instruction once this one is done.
    auto_pc: bool,
    action: Action,
}

impl InstructionInfo {
    fn continues(cycles: u32) -> Self {
        Self {
            cycles,
            auto_pc: true,
            action: Action::Continue,
        }
    }
}

struct HookFuncs {
    read: ir::FuncRef,
    write: ir::FuncRef,
}

/// Constants used through block building.
struct Consts {
    info_ptr: ir::Value,
    ctx_ptr: ir::Value,
    regs_ptr: ir::Value,
}

/// A cached value.
struct CachedValue {
    value: ir::Value,
    modified: bool,
}

/// Structure to build JIT blocks.
pub struct BlockBuilder<'ctx> {
    codegen: &'ctx mut Codegen,
    bd: frontend::FunctionBuilder<'ctx>,
    cache: FxHashMap<Slot, CachedValue>,
    consts: Consts,
    hooks: HookFuncs,

    /// Address of the instruction being emitted.
    lpc: u32,
    /// Address of the instruction following the one being emitted.
    next: u32,
    /// Whether any write of the current instruction hit translated code.
    invalidated: Option<ir::Value>,

    executed_cycles: u32,
    executed_instructions: u32,
}

impl<'ctx> BlockBuilder<'ctx> {
    pub fn new(codegen: &'ctx mut Codegen, mut builder: frontend::FunctionBuilder<'ctx>) -> Self {
        let entry_bb = builder.create_block();
        builder.append_block_params_for_function_params(entry_bb);
        builder.switch_to_block(entry_bb);
        builder.seal_block(entry_bb);

        let ptr_type = codegen.isa.pointer_type();
        let default = codegen.isa.default_call_conv();
        let params = builder.block_params(entry_bb);
        let info_ptr = params[0];
        let ctx_ptr = params[1];
        let regs_ptr = params[2];

        let read_sig = builder.import_signature(Hooks::read_sig(ptr_type, default));
        let write_sig = builder.import_signature(Hooks::write_sig(ptr_type, default));

        let mut hook = |sig, kind| {
            let name = builder
                .func
                .declare_imported_user_function(ir::UserExternalName::new(
                    NAMESPACE_USER_HOOKS,
                    kind as u32,
                ));

            builder.import_function(ir::ExtFuncData {
                name: ir::ExternalName::User(name),
                signature: sig,
                colocated: false,
                patchable: false,
            })
        };

        let hooks = HookFuncs {
            read: hook(read_sig, HookKind::Read),
            write: hook(write_sig, HookKind::Write),
        };

        Self {
            codegen,
            bd: builder,
            cache: FxHashMap::default(),
            consts: Consts {
                info_ptr,
                ctx_ptr,
                regs_ptr,
            },
            hooks,

            lpc: 0,
            next: 0,
            invalidated: None,

            executed_cycles: 0,
            executed_instructions: 0,
        }
    }

    fn switch_to_bb(&mut self, bb: ir::Block) {
        self.bd.switch_to_block(bb);
        self.bd
            .set_srcloc(ir::SourceLoc::new(self.executed_instructions));
    }

    fn load_slot(&mut self, slot: Slot) -> ir::Value {
        self.bd
            .ins()
            .load(ir::types::I16, MEMFLAGS, self.consts.regs_ptr, slot.offset())
    }

    fn store_slot(&mut self, slot: Slot, value: ir::Value) {
        self.bd
            .ins()
            .store(MEMFLAGS, value, self.consts.regs_ptr, slot.offset());
    }

    /// Gets the current value of the given slot.
    ///
    /// Until an instruction writes it, PC reads as the address following the opcode word, as
    /// it does in the interpreter.
    fn get(&mut self, slot: impl Into<Slot>) -> ir::Value {
        let slot = slot.into();

        if let Some(cached) = self.cache.get(&slot) {
            return cached.value;
        }

        if slot == Slot::Reg(Reg::Pc) {
            return self.const16(self.lpc.wrapping_add(1) as u16);
        }

        let value = self.load_slot(slot);
        self.cache.insert(
            slot,
            CachedValue {
                value,
                modified: false,
            },
        );

        value
    }

    /// Like [`Self::get`], but never caches. Used from exit paths, whose values do not dominate
    /// the rest of the block.
    fn peek(&mut self, slot: impl Into<Slot>) -> ir::Value {
        let slot = slot.into();
        match self.cache.get(&slot) {
            Some(cached) => cached.value,
            None => self.load_slot(slot),
        }
    }

    /// Sets the value of the given slot.
    fn set(&mut self, slot: impl Into<Slot>, value: ir::Value) {
        let slot = slot.into();
        debug_assert_eq!(self.bd.func.dfg.value_type(value), ir::types::I16);

        self.cache.insert(
            slot,
            CachedValue {
                value,
                modified: true,
            },
        );
    }

    /// Flushes the register cache to the registers struct. This does not invalidate the register
    /// cache.
    fn flush(&mut self) {
        let modified: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, cached)| cached.modified)
            .map(|(slot, cached)| (*slot, cached.value))
            .collect();

        for (slot, value) in modified {
            self.store_slot(slot, value);
        }
    }

    /// Adds the given counts to the Info struct.
    fn update_info(&mut self, instructions: u32, cycles: u32) {
        for (offset, delta) in [
            (offset_of!(Info, instructions), instructions),
            (offset_of!(Info, cycles), cycles),
        ] {
            let current =
                self.bd
                    .ins()
                    .load(ir::types::I32, MEMFLAGS, self.consts.info_ptr, offset as i32);
            let updated = self.bd.ins().iadd_imm(current, delta as i64);
            self.bd
                .ins()
                .store(MEMFLAGS, updated, self.consts.info_ptr, offset as i32);
        }
    }

    /// Emits the prologue: flushes registers, points PC at `self.next` unless the last instruction
    /// set it, accounts for everything executed so far and returns.
    fn prologue(&mut self, auto_pc: bool) {
        self.flush();

        if auto_pc && !self.cache.contains_key(&Slot::Reg(Reg::Pc)) {
            let pc = self.const16(self.next as u16);
            self.store_slot(Slot::Reg(Reg::Pc), pc);
        }

        self.update_info(self.executed_instructions, self.executed_cycles);
        self.bd.ins().return_(&[]);
    }

    /// Leaves the block right after the current instruction if one of its writes hit translated
    /// code, which may have been this very block.
    fn check_invalidated(&mut self) {
        let Some(hit) = self.invalidated.take() else {
            return;
        };

        let exit_bb = self.bd.create_block();
        let continue_bb = self.bd.create_block();

        self.bd.set_cold_block(exit_bb);
        self.bd.ins().brif(hit, exit_bb, &[], continue_bb, &[]);
        self.bd.seal_block(exit_bb);
        self.bd.seal_block(continue_bb);

        self.switch_to_bb(exit_bb);
        self.prologue(true);

        self.switch_to_bb(continue_bb);
    }

    /// Emits the given instruction into the block. Returns `None`, without emitting anything, if
    /// the instruction is not translated.
    fn emit(&mut self, entry: Entry) -> Option<InstructionInfo> {
        self.bd
            .set_srcloc(ir::SourceLoc::new(self.executed_instructions));
        self.invalidated = None;

        match entry.ins.group() {
            Group::Remaining => self.remaining(entry),
            Group::Jump => self.jump(entry),
            Group::Fxxx => self.fxxx(entry),
            // ISA 1.2 and later
            Group::Exxx => None,
        }
    }

    /// Translates at most `limit` instructions starting at `start`, fetching words with `read`.
    /// The block ends early at the first control flow instruction, at the first instruction that
    /// is not translated and before crossing into the next code segment.
    pub fn build(
        mut self,
        start: u32,
        limit: u32,
        mut read: impl FnMut(u32) -> u16,
    ) -> Result<(Sequence, u32), BuilderError> {
        let timing = self.codegen.settings.timing;
        let mut sequence = Sequence::default();
        let mut lpc = start & LPC_MASK;

        loop {
            if sequence.len() as u32 >= limit {
                self.bd.set_srcloc(ir::SourceLoc::new(u32::MAX));
                self.prologue(true);
                break;
            }

            let ins = Ins::new(read(lpc));
            let len = ins.len(IsaVersion::V11);
            let ext = (len == 2).then(|| read((lpc + 1) & LPC_MASK));
            let entry = Entry { lpc, ins, ext };

            self.lpc = lpc;
            self.next = lpc + len;

            let fits = (lpc & 0xFFFF) + len < PAGE_WORDS;
            let Some(info) = fits.then(|| self.emit(entry)).flatten() else {
                self.bd.set_srcloc(ir::SourceLoc::new(u32::MAX));

                if sequence.is_empty() {
                    self.bd.ins().return_(&[]);
                    self.bd.finalize();
                    return Err(BuilderError::Unsupported(ins, lpc));
                }

                tracing::trace!("ending block at untranslated {ins:?} at {lpc:06X}");
                self.next = lpc;
                self.prologue(true);
                break;
            };

            sequence.0.push(entry);
            self.executed_instructions += 1;
            self.executed_cycles += timing.charge(info.cycles);

            match info.action {
                Action::Continue => self.check_invalidated(),
                Action::FlushAndPrologue => {
                    self.bd.set_srcloc(ir::SourceLoc::new(u32::MAX));
                    self.prologue(info.auto_pc);
                    break;
                }
                Action::Finish => break,
            }

            lpc = self.next;
        }

        self.bd.finalize();
        Ok((sequence, self.executed_cycles))
    }
}
