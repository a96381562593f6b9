use std::ffi::c_void;
use std::ptr::NonNull;

use jitalloc::{Arena, Code};

use crate::Sequence;
use crate::hooks::Context;

/// Information about block execution.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Info {
    /// How many instructions have been executed already. Updated on block exits only.
    pub instructions: u32,
    /// How many cycles have been executed already. Updated on block exits only.
    pub cycles: u32,
}

/// Meta information regarding a block.
#[derive(Debug, Clone)]
pub struct Meta {
    /// The sequence of instructions this block contains.
    pub seq: Sequence,
    /// The Cranelift IR of this block. Only available if `cfg!(debug_assertions)` is true.
    pub clir: Option<String>,
    /// The disassembly of this block. Only available if `cfg!(debug_assertions)` is true.
    pub disasm: Option<String>,
    /// How many cycles this block executes at most.
    pub cycles: u32,
}

/// A handle representing a compiled block of µ'nSP instructions. This struct does not manage the
/// memory behind the block.
///
/// In order to call the block, use [`Jit::call`](super::Jit::call).
pub struct Block {
    code: Code,
    meta: Meta,
}

/// A opaque handle representing the function of a compiled [`Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BlockFn(NonNull<c_void>);

impl Block {
    pub(crate) fn new(code: Code, meta: Meta) -> Self {
        Self { code, meta }
    }

    /// Meta information regarding this block.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Address of the first instruction of this block.
    pub fn lpc(&self) -> u32 {
        self.meta.seq[0].lpc
    }

    /// Number of words of µ'nSP code this block was translated from.
    pub fn words(&self) -> u32 {
        self.meta.seq.words()
    }

    /// Returns a pointer to the function of this block.
    pub fn as_ptr(&self) -> BlockFn {
        BlockFn(self.code.as_ptr().cast())
    }
}

/// A trampoline that allows calling blocks produced by a [`Jit`](super::Jit) compiler. Lives in
/// its own arena so that clearing blocks keeps it alive.
pub(super) struct Trampoline {
    pub(super) code: Code,
    pub(super) _arena: Arena,
}

type TrampolineFn = extern "C-unwind" fn(*mut Info, *mut Context, BlockFn);

impl Trampoline {
    /// Calls the given block using this trampoline.
    ///
    /// # Safety
    /// The arena holding this trampoline and the block must not be cleared while the block is
    /// being called.
    pub unsafe fn call(&self, ctx: *mut Context, block: BlockFn) -> Info {
        let mut info = Info::default();

        // SAFETY: the trampoline was compiled with the signature of `TrampolineFn`
        let trampoline: TrampolineFn = unsafe { std::mem::transmute(self.code.as_ptr().as_ptr()) };
        trampoline(&raw mut info, ctx, block);

        info
    }
}
