//! A JIT compiler translating basic blocks of µ'nSP code into host code through cranelift.
//!
//! Translated blocks reproduce the interpreter exactly for the instructions they cover. Anything
//! else ends the block, leaving the program counter at the untranslated instruction so the caller
//! can interpret it.

mod builder;
mod cache;
mod sequence;

#[cfg(test)]
mod test;

pub mod block;
pub mod hooks;

use std::sync::Arc;

use cranelift::codegen::entity::PrimaryMap;
use cranelift::codegen::ir::InstBuilder;
use cranelift::codegen::isa::{CallConv, TargetIsa};
use cranelift::codegen::settings::{Configurable, SetError};
use cranelift::codegen::{self, ir};
use cranelift::{frontend, native};
use easyerr::{Error, ResultExt};
use jitalloc::{AllocError, Arena};
use jitclif::RelocError;
use unsp::Timing;

use crate::block::{BlockFn, Info, Meta, Trampoline};
use crate::builder::BlockBuilder;
use crate::cache::{ArtifactKey, Cache};
use crate::hooks::{Context, HookKind, Hooks};

#[rustfmt::skip]
pub use crate::{
    block::Block,
    builder::BuilderError,
    sequence::{Entry, Sequence},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Settings {
    /// Cycle model charged by translated code.
    pub timing: Timing,
    /// Maximum number of instructions in a block.
    pub instr_per_block: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            instr_per_block: 64,
        }
    }
}

const NAMESPACE_USER_HOOKS: u32 = 0;

struct Codegen {
    settings: Settings,
    hooks: Hooks,
    isa: Arc<dyn TargetIsa>,
    arena: Arena,
    code_ctx: codegen::Context,
}

impl Codegen {
    fn new(isa: codegen::isa::Builder, settings: Settings, hooks: Hooks) -> Result<Self, SetupError> {
        let verifier = if cfg!(debug_assertions) {
            "true"
        } else {
            "false"
        };

        let mut flags = codegen::settings::builder();
        for (name, value) in [
            ("preserve_frame_pointers", "true"),
            ("use_colocated_libcalls", "false"),
            ("unwind_info", "false"),
            ("is_pic", "false"),
            // affect runtime performance
            ("opt_level", "speed"),
            ("enable_verifier", verifier),
            ("enable_alias_analysis", "true"),
            ("regalloc_algorithm", "backtracking"),
            ("regalloc_checker", "false"),
            ("enable_pinned_reg", "false"),
        ] {
            flags.set(name, value).context(SetupCtx::Settings)?;
        }

        let flags = codegen::settings::Flags::new(flags);
        let isa = isa.finish(flags).context(SetupCtx::Codegen)?;

        Ok(Codegen {
            settings,
            hooks,
            isa,
            arena: Arena::new(),
            code_ctx: codegen::Context::new(),
        })
    }

    fn block_signature(&self) -> ir::Signature {
        let ptr = self.isa.pointer_type();
        ir::Signature {
            // info, ctx, regs
            params: vec![ir::AbiParam::new(ptr); 3],
            returns: vec![],
            call_conv: CallConv::Tail,
        }
    }

    fn trampoline_signature(&self, call_conv: CallConv) -> ir::Signature {
        let ptr = self.isa.pointer_type();
        ir::Signature {
            // info, ctx, block
            params: vec![ir::AbiParam::new(ptr); 3],
            returns: vec![],
            call_conv,
        }
    }

    /// Compiles a cranelift function in the code context into an artifact.
    fn compile(
        &mut self,
        func: ir::Function,
        disasm: bool,
    ) -> Result<Artifact, codegen::CodegenError> {
        self.code_ctx.clear();
        self.code_ctx.func = func;
        self.code_ctx.want_disasm = disasm;

        let compiled = self
            .code_ctx
            .compile(&*self.isa, &mut Default::default())
            .map_err(|e| e.inner)?;

        let code = compiled.code_buffer().to_owned();
        let relocs = compiled.buffer.relocs().to_owned();
        let disasm = compiled.vcode.clone();

        Ok(Artifact {
            code,
            user_named_funcs: self.code_ctx.func.params.user_named_funcs().clone(),
            relocs,
            disasm,
        })
    }

    /// Applies all relocations to the given buffer.
    fn apply_relocations(
        &self,
        code: &mut [u8],
        mapping: &PrimaryMap<ir::UserExternalNameRef, ir::UserExternalName>,
        relocs: &[codegen::FinalizedMachReloc],
    ) -> Result<(), RelocError> {
        for reloc in relocs {
            let codegen::FinalizedRelocTarget::ExternalName(ir::ExternalName::User(name_ref)) =
                &reloc.target
            else {
                unreachable!("blocks only reference hooks")
            };

            let hook = mapping
                .get(*name_ref)
                .filter(|name| name.namespace == NAMESPACE_USER_HOOKS)
                .and_then(|name| HookKind::from_repr(name.index));

            let Some(hook) = hook else {
                unreachable!("unknown external name {name_ref:?}")
            };

            jitclif::write_relocation(code, reloc, self.hooks.address(hook))?;
        }

        Ok(())
    }
}

/// A JIT compiler, producing [`Block`]s.
pub struct Jit {
    codegen: Codegen,
    func_ctx: frontend::FunctionBuilderContext,
    cache: Cache,
    compiled_count: u64,
    trampoline: Trampoline,
}

struct Translated {
    func: ir::Function,
    sequence: Sequence,
    cycles: u32,
}

#[derive(Clone)]
struct Artifact {
    code: Vec<u8>,
    user_named_funcs: PrimaryMap<ir::UserExternalNameRef, ir::UserExternalName>,
    relocs: Vec<codegen::FinalizedMachReloc>,
    disasm: Option<String>,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("block contains no instructions")]
    EmptyBlock,
    #[error(transparent)]
    Builder { source: BuilderError },
    #[error("failed to compile block:\n{sequence}")]
    Codegen {
        source: codegen::CodegenError,
        sequence: Sequence,
        clir: Option<String>,
    },
    #[error(transparent)]
    Reloc { source: RelocError },
    #[error(transparent)]
    Alloc { source: AllocError },
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("host machine is not supported: {message}")]
    UnsupportedHost { message: String },
    #[error(transparent)]
    Settings { source: SetError },
    #[error(transparent)]
    Codegen { source: codegen::CodegenError },
    #[error("failed to build trampoline")]
    Trampoline { source: BuildError },
}

impl Jit {
    /// Compiles and returns a trampoline to call blocks.
    fn trampoline(
        codegen: &mut Codegen,
        func_ctx: &mut frontend::FunctionBuilderContext,
    ) -> Result<Trampoline, BuildError> {
        let block_sig = codegen.block_signature();
        let default = codegen.isa.default_call_conv();

        let mut func = ir::Function::new();
        func.signature = codegen.trampoline_signature(default);

        let mut builder = frontend::FunctionBuilder::new(&mut func, func_ctx);
        let entry_bb = builder.create_block();
        builder.append_block_params_for_function_params(entry_bb);
        builder.switch_to_block(entry_bb);
        builder.seal_block(entry_bb);

        let params = builder.block_params(entry_bb);
        let info_ptr = params[0];
        let ctx_ptr = params[1];
        let block_ptr = params[2];
        let ptr_type = codegen.isa.pointer_type();

        // extract regs ptr
        let get_regs_sig = builder.import_signature(Hooks::get_registers_sig(ptr_type, default));
        let get_registers = builder.ins().iconst(
            ptr_type,
            codegen.hooks.address(HookKind::GetRegisters) as i64,
        );
        let inst = builder
            .ins()
            .call_indirect(get_regs_sig, get_registers, &[ctx_ptr]);
        let regs_ptr = builder.inst_results(inst)[0];

        // call the block
        let block_sig = builder.import_signature(block_sig);
        builder
            .ins()
            .call_indirect(block_sig, block_ptr, &[info_ptr, ctx_ptr, regs_ptr]);

        builder.ins().return_(&[]);
        builder.finalize();

        let artifact = codegen
            .compile(func, false)
            .with_context(|_| BuildCtx::Codegen {
                sequence: Sequence::default(),
                clir: None,
            })?;

        let mut arena = Arena::new();
        let code = arena.insert(&artifact.code).context(BuildCtx::Alloc)?;

        Ok(Trampoline {
            code,
            _arena: arena,
        })
    }

    /// Creates a new [`Jit`] instance with the given ISA.
    pub(crate) fn with_isa(
        isa: codegen::isa::Builder,
        settings: Settings,
        hooks: Hooks,
    ) -> Result<Self, SetupError> {
        let mut codegen = Codegen::new(isa, settings, hooks)?;
        let mut func_ctx = frontend::FunctionBuilderContext::new();
        let trampoline =
            Self::trampoline(&mut codegen, &mut func_ctx).context(SetupCtx::Trampoline)?;

        Ok(Self {
            codegen,
            func_ctx,
            cache: Cache::default(),
            compiled_count: 0,
            trampoline,
        })
    }

    /// Creates a new [`Jit`] instance with the host's ISA.
    pub fn new(settings: Settings, hooks: Hooks) -> Result<Self, SetupError> {
        let isa_builder = native::builder().map_err(|message| SetupError::UnsupportedHost {
            message: message.to_owned(),
        })?;

        Self::with_isa(isa_builder, settings, hooks)
    }

    pub fn settings(&self) -> &Settings {
        &self.codegen.settings
    }

    /// How many blocks were compiled so far.
    pub fn compiled_count(&self) -> u64 {
        self.compiled_count
    }

    /// Bytes of host code held by blocks built since the last [`Jit::clear`].
    pub fn code_len(&self) -> usize {
        self.codegen.arena.used()
    }

    /// How many blocks were served from the artifact cache instead of being compiled again.
    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    /// Translates the block starting at `start` into a cranelift function.
    fn translate(
        &mut self,
        start: u32,
        read: impl FnMut(u32) -> u16,
    ) -> Result<Translated, BuildError> {
        let mut func = ir::Function::new();
        func.signature = self.codegen.block_signature();

        let limit = self.codegen.settings.instr_per_block;
        let func_builder = frontend::FunctionBuilder::new(&mut func, &mut self.func_ctx);
        let builder = BlockBuilder::new(&mut self.codegen, func_builder);

        let (sequence, cycles) = builder.build(start, limit, read).context(BuildCtx::Builder)?;
        if sequence.is_empty() {
            return Err(BuildError::EmptyBlock);
        }

        Ok(Translated {
            func,
            sequence,
            cycles,
        })
    }

    /// Builds an artifact for the block starting at `start`.
    fn build_artifact(
        &mut self,
        start: u32,
        read: impl FnMut(u32) -> u16,
    ) -> Result<(Artifact, Meta), BuildError> {
        let translated = self.translate(start, read)?;
        let func = translated.func;
        let sequence = translated.sequence;

        let clir = cfg!(debug_assertions).then(|| func.display().to_string());
        let key = ArtifactKey::new(&*self.codegen.isa, &self.codegen.settings, &sequence);

        let artifact = if let Some(artifact) = self.cache.get(key) {
            artifact
        } else {
            let artifact = self
                .codegen
                .compile(func, cfg!(debug_assertions))
                .with_context(|_| BuildCtx::Codegen {
                    sequence: sequence.clone(),
                    clir: clir.clone(),
                })?;

            self.cache.insert(key, &artifact);
            artifact
        };

        let meta = Meta {
            seq: sequence,
            clir,
            disasm: artifact.disasm.clone(),
            cycles: translated.cycles,
        };

        Ok((artifact, meta))
    }

    /// Builds a block starting at `start`, fetching code words with `read`. The block ends at
    /// the first control flow instruction, the first untranslated instruction, the end of the
    /// code segment or after [`Settings::instr_per_block`] instructions.
    pub fn build(
        &mut self,
        start: u32,
        read: impl FnMut(u32) -> u16,
    ) -> Result<Block, BuildError> {
        let _span = tracing::trace_span!("compiling new block", lpc = format_args!("{start:06X}"))
            .entered();

        let (artifact, meta) = self.build_artifact(start, read)?;

        let mut code = artifact.code;
        self.codegen
            .apply_relocations(&mut code, &artifact.user_named_funcs, &artifact.relocs)
            .context(BuildCtx::Reloc)?;

        let code = self.codegen.arena.insert(&code).context(BuildCtx::Alloc)?;
        let block = Block::new(code, meta);
        self.compiled_count += 1;

        tracing::trace!(len = block.words(), "compiled block");
        Ok(block)
    }

    /// Calls the given block with the given context.
    ///
    /// # Safety
    /// `ctx` must match the type expected by the hooks of this JIT context, and `block` must
    /// have been built by this JIT since the last [`Jit::clear`].
    pub unsafe fn call(&mut self, ctx: *mut Context, block: BlockFn) -> Info {
        // SAFETY: the exclusive reference guarantees the arena is not cleared during the call
        unsafe { self.trampoline.call(ctx, block) }
    }

    /// Frees the code of every block built so far. Compiled artifacts stay cached.
    ///
    /// # Safety
    /// No block built before this call may be called afterwards.
    pub unsafe fn clear(&mut self) {
        // SAFETY: upheld by the caller
        unsafe { self.codegen.arena.clear() };
    }
}
