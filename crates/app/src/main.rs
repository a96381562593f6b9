mod cli;

use std::time::Instant;

use bytesize::ByteSize;
use clap::Parser;
use eyre_pretty::eyre::{Result, WrapErr};
use unsp::bus::{Bus, Endian, Ram};
use unsp::{Cpu, Ins};
use unsp::state::State;

use crate::cli::Engine;

fn setup_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("unsp=info,cores=info,unspjit=info,app=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_state(path: &std::path::Path) -> Result<State> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read state from {}", path.display()))?;

    ron::from_str(&text).wrap_err_with(|| format!("malformed state in {}", path.display()))
}

fn save_state(path: &std::path::Path, state: &State) -> Result<()> {
    let text = ron::ser::to_string_pretty(state, ron::ser::PrettyConfig::default())?;
    std::fs::write(path, text)
        .wrap_err_with(|| format!("failed to write state to {}", path.display()))
}

fn main() -> Result<()> {
    eyre_pretty::install()?;
    setup_tracing();
    let cfg = cli::Config::parse();

    let image = std::fs::read(&cfg.image)
        .wrap_err_with(|| format!("failed to read image {}", cfg.image.display()))?;
    tracing::info!(
        "loading {} ({}) at {:06X}",
        cfg.image.display(),
        ByteSize(image.len() as u64),
        cfg.base
    );

    let endian = if cfg.big_endian { Endian::Big } else { Endian::Little };
    let mut ram = Ram::new();
    ram.load_image(cfg.base, &image, endian);

    let config = cfg.core();
    let mut cpu = Cpu::new(config);
    let mut engine = cores::select(
        &config,
        cfg.engine == Engine::Recompiler,
        cores::recompiler::Config {
            instr_per_block: cfg.recompiler.instr_per_block,
        },
    );

    engine.reset(&mut cpu, &mut ram);
    if let Some(path) = &cfg.load_state {
        let state = load_state(path)?;
        cpu.load_state(&state);
        tracing::info!("loaded state from {}, resuming at {:06X}", path.display(), cpu.regs.lpc());
    }

    for &line in &cfg.irqs {
        cpu.set_input(line, true);
    }

    let start = Instant::now();
    let executed = engine
        .exec(&mut cpu, &mut ram, cfg.cycles, &cfg.breakpoints)
        .inspect_err(|fault| tracing::error!("{} engine faulted: {fault}", engine.name()))?;
    let elapsed = start.elapsed();

    if executed.hit_breakpoint {
        tracing::info!("hit breakpoint at {:06X}", cpu.regs.lpc());
    }

    tracing::info!(
        "executed {} instructions in {} cycles ({elapsed:?})",
        executed.instructions,
        executed.cycles
    );

    let lpc = cpu.regs.lpc();
    let next = unsp::disasm::disassemble(Ins::new(ram.read16(lpc)), lpc, config.isa, |addr| {
        ram.read16(addr)
    });
    println!("{lpc:06X}: {next}");

    for entry in cpu.state_entries() {
        println!("{entry}");
    }
    println!("FLAGS: {}", cpu.genflags());

    if let Some(path) = &cfg.save_state {
        save_state(path, &cpu.save_state())?;
        tracing::info!("saved state to {}", path.display());
    }

    Ok(())
}
