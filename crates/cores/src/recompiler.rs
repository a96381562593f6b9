mod mapping;

use indexmap::IndexSet;
use mapping::Mapping;
use unsp::bus::Bus;
use unsp::regs::{LPC_MASK, Registers};
use unsp::{Cpu, Executed, Fault, InstructionEngine, Timing};
use unspjit::hooks::{GetRegistersHook, Hooks, ReadHook, WriteHook};
use unspjit::{Block, BuildError, Jit, SetupError};

#[rustfmt::skip]
pub use unspjit;

/// Identifier for a block in a [`Blocks`] storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(usize);

/// A structure which keeps tracks of compiled [`Block`]s.
#[derive(Default)]
pub struct Blocks {
    storage: Vec<Block>,
    mappings: mapping::Table,
    deps: mapping::DepsTable,
    temp_deps: IndexSet<u32>,
    /// Blocks in `storage` which are no longer mapped.
    dead: usize,
}

impl Blocks {
    fn insert_mapping(&mut self, addr: u32, mapping: Mapping) {
        self.mappings.insert(addr, mapping);
        self.deps.mark(addr, mapping);
    }

    /// Inserts a block into the storage and maps it to its address.
    pub fn insert(&mut self, block: Block) -> Mapping {
        let addr = block.lpc();
        let mapping = Mapping {
            id: Some(BlockId(self.storage.len())),
            length: block.words(),
        };

        self.storage.push(block);
        self.insert_mapping(addr, mapping);

        mapping
    }

    /// Marks `addr` as the start of code that must be interpreted.
    pub fn insert_interpreted(&mut self, addr: u32) -> Mapping {
        let mapping = Mapping { id: None, length: 1 };
        self.insert_mapping(addr, mapping);

        mapping
    }

    /// Returns the mapping at `addr`.
    #[inline(always)]
    pub fn get_mapping(&self, addr: u32) -> Option<Mapping> {
        self.mappings.get(addr).copied()
    }

    /// Returns the block with the given id.
    #[inline(always)]
    pub fn get(&self, id: BlockId) -> &Block {
        &self.storage[id.0]
    }

    /// Number of live mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of blocks stored, including invalidated ones.
    pub fn stored(&self) -> usize {
        self.storage.len()
    }

    /// Number of stored blocks which were invalidated.
    pub fn dead(&self) -> usize {
        self.dead
    }

    /// Invalidates mappings built from the word at `target`. Returns whether any was removed.
    ///
    /// The code of invalidated blocks stays allocated, so a block may invalidate itself while it
    /// runs.
    pub fn invalidate(&mut self, target: u32) -> bool {
        let target = target & LPC_MASK;
        let Some(deps) = self.deps.get(target) else {
            return false;
        };

        if deps.is_empty() {
            return false;
        }

        let mut temp_deps = std::mem::take(&mut self.temp_deps);
        deps.clone_into(&mut temp_deps);

        let mut removed = false;
        for &dep in &temp_deps {
            let Some(mapping) = self.mappings.get(dep).copied() else {
                unreachable!("mapping {dep:06X} is listed as dependent on a page but does not exist");
            };

            if (dep..dep + mapping.length).contains(&target) {
                tracing::debug!("write to {target:06X} invalidated mapping at {dep:06X}");
                self.deps.unmark(dep, mapping);
                self.mappings.remove(dep);
                self.dead += mapping.id.is_some() as usize;
                removed = true;
            }
        }

        temp_deps.clear();
        self.temp_deps = temp_deps;

        removed
    }

    /// Clears all mappings and blocks.
    pub fn clear(&mut self) {
        self.storage.clear();
        self.mappings.clear();
        self.deps.clear();
        self.dead = 0;
    }
}

/// A bus that invalidates blocks on writes.
struct WatchBus<'a> {
    inner: &'a mut dyn Bus,
    blocks: &'a mut Blocks,
}

impl Bus for WatchBus<'_> {
    #[inline(always)]
    fn read16(&mut self, addr: u32) -> u16 {
        self.inner.read16(addr)
    }

    #[inline(always)]
    fn write16(&mut self, addr: u32, value: u16) {
        self.inner.write16(addr, value);
        self.blocks.invalidate(addr);
    }
}

/// Context to be passed in for execution of JIT blocks.
struct Context<'a> {
    cpu: &'a mut Cpu,
    bus: &'a mut dyn Bus,
    /// The block mapping, so that write operations can invalidate blocks.
    blocks: &'a mut Blocks,
}

const CTX_HOOKS: Hooks = {
    extern "C-unwind" fn get_registers<'a>(ctx: &'a mut Context) -> &'a mut Registers {
        &mut ctx.cpu.regs
    }

    extern "C-unwind" fn read(ctx: &mut Context, addr: u32) -> u16 {
        ctx.bus.read16(addr)
    }

    extern "C-unwind" fn write(ctx: &mut Context, addr: u32, value: u16) -> bool {
        ctx.bus.write16(addr, value);
        ctx.blocks.invalidate(addr)
    }

    #[expect(
        clippy::missing_transmute_annotations,
        reason = "unnecessary - the definitions are above"
    )]
    unsafe {
        use std::mem::transmute;

        let get_registers =
            transmute::<_, GetRegistersHook>(get_registers as extern "C-unwind" fn(_) -> _);
        let read = transmute::<_, ReadHook>(read as extern "C-unwind" fn(_, _) -> _);
        let write = transmute::<_, WriteHook>(write as extern "C-unwind" fn(_, _, _) -> _);

        Hooks {
            get_registers,
            read,
            write,
        }
    }
};

/// Recompiler configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of instructions per block.
    pub instr_per_block: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instr_per_block: unspjit::Settings::default().instr_per_block,
        }
    }
}

/// Invalidated blocks keep their code allocated until this many accumulate and they make up at
/// least half of the stored blocks. Then every block is dropped.
pub const DEAD_BLOCKS_LIMIT: usize = 256;

/// Runs translated blocks, interpreting whatever the recompiler does not cover.
pub struct RecompilerEngine {
    compiler: Jit,
    blocks: Blocks,
}

impl RecompilerEngine {
    /// Creates an engine charging cycles with `timing`, which must match the cores it runs.
    /// Cores with another timing model are interpreted. Blocks hold at least one instruction.
    pub fn new(timing: Timing, config: Config) -> Result<Self, SetupError> {
        let settings = unspjit::Settings {
            timing,
            instr_per_block: config.instr_per_block.max(1),
        };

        Ok(Self {
            compiler: Jit::new(settings, CTX_HOOKS)?,
            blocks: Blocks::default(),
        })
    }

    pub fn blocks(&self) -> &Blocks {
        &self.blocks
    }

    pub fn compiler(&self) -> &Jit {
        &self.compiler
    }

    /// Drops every block and frees their code if too many of them were invalidated. Must not be
    /// called while a block runs.
    fn collect(&mut self) {
        let dead = self.blocks.dead();
        if dead < DEAD_BLOCKS_LIMIT || dead * 2 < self.blocks.stored() {
            return;
        }

        tracing::debug!(
            dead,
            stored = self.blocks.stored(),
            code = self.compiler.code_len(),
            "dropping invalidated blocks"
        );

        self.blocks.clear();

        // SAFETY: every block was just dropped and none is running
        unsafe { self.compiler.clear() };
    }

    /// Whether translated code can stand in for the interpreter on `cpu`.
    fn runs_natively(&self, cpu: &Cpu) -> bool {
        cpu.config.isa.recompilable()
            && cpu.config.timing == self.compiler.settings().timing
            && !cpu.config.log_ops
    }

    /// Compiles the block starting at `lpc`. Falls back to an interpreted mapping if that is not
    /// possible.
    fn compile(&mut self, bus: &mut dyn Bus, lpc: u32) -> Mapping {
        match self.compiler.build(lpc, |addr| bus.read16(addr)) {
            Ok(block) => {
                tracing::trace!(
                    instructions = block.meta().seq.len(),
                    "block sequence built"
                );

                self.blocks.insert(block)
            }
            Err(BuildError::Builder { source }) => {
                tracing::trace!("{source}, interpreting");
                self.blocks.insert_interpreted(lpc)
            }
            Err(e) => {
                tracing::warn!("failed to compile block at {lpc:06X}, interpreting: {e}");
                self.blocks.insert_interpreted(lpc)
            }
        }
    }

    fn interpret(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus) -> Result<Executed, Fault> {
        let mut bus = WatchBus {
            inner: bus,
            blocks: &mut self.blocks,
        };

        let cycles = cpu.step(&mut bus)?;
        Ok(Executed {
            instructions: 1,
            cycles: cycles as u64,
            hit_breakpoint: false,
        })
    }

    /// Runs the block at the current address if it fits in `icount` cycles and contains no
    /// breakpoint past its first instruction. Otherwise, interprets a single instruction.
    fn run(
        &mut self,
        cpu: &mut Cpu,
        bus: &mut dyn Bus,
        icount: i64,
        breakpoints: &[u32],
    ) -> Result<Executed, Fault> {
        // interrupts are taken by the interpreter
        if cpu.irq.takeable() {
            return self.interpret(cpu, bus);
        }

        let lpc = cpu.regs.lpc();
        let mapping = match self.blocks.get_mapping(lpc) {
            Some(mapping) => mapping,
            None => self.compile(bus, lpc),
        };

        let Some(id) = mapping.id else {
            return self.interpret(cpu, bus);
        };

        let block = self.blocks.get(id);
        let end = lpc + mapping.length;
        let fits = block.meta().cycles as i64 <= icount;
        let breaks = breakpoints.iter().any(|&b| b > lpc && b < end);
        if !fits || breaks {
            return self.interpret(cpu, bus);
        }

        let block = block.as_ptr();
        let mut ctx = Context {
            cpu,
            bus,
            blocks: &mut self.blocks,
        };

        // SAFETY: the context matches the hooks in `CTX_HOOKS`, and the block was built by this
        // compiler after the last clear
        let info = unsafe {
            self.compiler
                .call(&raw mut ctx as *mut unspjit::hooks::Context, block)
        };

        Ok(Executed {
            instructions: info.instructions,
            cycles: info.cycles as u64,
            hit_breakpoint: false,
        })
    }

    /// Runs a slice like [`Cpu::exec`], using translated blocks where possible.
    fn exec_slice(
        &mut self,
        cpu: &mut Cpu,
        bus: &mut dyn Bus,
        cycles: u64,
        breakpoints: &[u32],
    ) -> Result<Executed, Fault> {
        let native = self.runs_natively(cpu);
        let mut icount = i64::try_from(cycles).unwrap_or(i64::MAX);
        let mut executed = Executed::default();

        while icount >= 0 {
            if executed.instructions != 0 && breakpoints.contains(&cpu.regs.lpc()) {
                executed.hit_breakpoint = true;
                break;
            }

            let e = if native {
                self.run(cpu, bus, icount, breakpoints)?
            } else {
                self.interpret(cpu, bus)?
            };

            icount -= e.cycles as i64;
            executed += e;
        }

        Ok(executed)
    }
}

impl InstructionEngine for RecompilerEngine {
    fn name(&self) -> &'static str {
        "recompiler"
    }

    fn reset(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus) {
        cpu.reset(bus);
        self.blocks.clear();

        // SAFETY: every block was just dropped
        unsafe { self.compiler.clear() };
    }

    fn exec(
        &mut self,
        cpu: &mut Cpu,
        bus: &mut dyn Bus,
        cycles: u64,
        breakpoints: &[u32],
    ) -> Result<Executed, Fault> {
        let result = self.exec_slice(cpu, bus, cycles, breakpoints);
        self.collect();

        result
    }

    fn step(&mut self, cpu: &mut Cpu, bus: &mut dyn Bus) -> Result<Executed, Fault> {
        let result = self.interpret(cpu, bus);
        self.collect();

        result
    }

    fn invalidate(&mut self, addr: u32) {
        self.blocks.invalidate(addr);
    }
}

