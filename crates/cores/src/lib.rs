//! Instruction engines for the µ'nSP core.

pub mod interpreter;
pub mod recompiler;

#[cfg(test)]
mod test;

use unsp::InstructionEngine;

#[rustfmt::skip]
pub use crate::{
    interpreter::InterpreterEngine,
    recompiler::RecompilerEngine,
};

/// Picks an engine for cores configured with `config`. The recompiler is only used if
/// `prefer_recompiler` is set, the ISA revision is supported by it and the host can run it.
pub fn select(
    config: &unsp::Config,
    prefer_recompiler: bool,
    recompiler: recompiler::Config,
) -> Box<dyn InstructionEngine> {
    if prefer_recompiler && !config.isa.recompilable() {
        let isa: &'static str = config.isa.into();
        tracing::info!("isa {isa} is not supported by the recompiler, using the interpreter");
        return Box::new(InterpreterEngine);
    }

    if prefer_recompiler {
        match RecompilerEngine::new(config.timing, recompiler) {
            Ok(engine) => {
                tracing::info!("using the recompiler");
                return Box::new(engine);
            }
            Err(e) => tracing::warn!("failed to set up the recompiler, using the interpreter: {e}"),
        }
    }

    tracing::info!("using the interpreter");
    Box::new(InterpreterEngine)
}
