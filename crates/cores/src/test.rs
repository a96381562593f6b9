use nanorand::{Rng, WyRand};
use unsp::bus::{Bus, Ram};
use unsp::irq::{BREAK_VECTOR, FIQ_VECTOR, IRQ_VECTOR, Line};
use unsp::regs::Reg;
use unsp::{Config, Cpu, Executed, Fault, Ins, InstructionEngine, IsaVersion, Timing};

use crate::recompiler::{self, DEAD_BLOCKS_LIMIT, RecompilerEngine};
use crate::{InterpreterEngine, select};

struct Outcome {
    cpu: Cpu,
    ram: Ram,
    result: Result<Executed, Fault>,
}

fn machine(timing: Timing, program: &[u16], setup: &impl Fn(&mut Cpu, &mut Ram)) -> (Cpu, Ram) {
    let mut ram = Ram::new();
    ram.load(0x0100, program);

    let mut cpu = Cpu::new(Config {
        isa: IsaVersion::V11,
        timing,
        log_ops: false,
    });
    cpu.regs.set(Reg::Pc, 0x0100);
    cpu.regs.set(Reg::Sp, 0x0800);
    setup(&mut cpu, &mut ram);

    (cpu, ram)
}

fn run(
    engine: &mut dyn InstructionEngine,
    timing: Timing,
    program: &[u16],
    setup: &impl Fn(&mut Cpu, &mut Ram),
    cycles: u64,
    breakpoints: &[u32],
) -> Outcome {
    let (mut cpu, mut ram) = machine(timing, program, setup);
    let result = engine.exec(&mut cpu, &mut ram, cycles, breakpoints);

    Outcome { cpu, ram, result }
}

fn recompiler(timing: Timing) -> RecompilerEngine {
    RecompilerEngine::new(timing, recompiler::Config::default()).expect("host should be supported")
}

/// Runs `program` through both engines and checks that they end in the same state.
fn compare(
    timing: Timing,
    program: &[u16],
    setup: impl Fn(&mut Cpu, &mut Ram),
    cycles: u64,
    breakpoints: &[u32],
) -> Outcome {
    let expected = run(&mut InterpreterEngine, timing, program, &setup, cycles, breakpoints);
    let actual = run(&mut recompiler(timing), timing, program, &setup, cycles, breakpoints);

    assert_eq!(actual.result, expected.result, "{program:04X?}");
    assert_eq!(actual.cpu.regs, expected.cpu.regs, "{program:04X?}");
    assert_eq!(actual.cpu.irq, expected.cpu.irq, "{program:04X?}");
    assert!(actual.ram.words() == expected.ram.words(), "{program:04X?}: memory differs");

    actual
}

/// Generates `len` words of mostly valid code to be loaded at 0x0100. With `far_flow`, calls,
/// far jumps, multiplies, interrupt control and pops into SR and PC are generated too.
fn random_program(rng: &mut WyRand, len: usize, far_flow: bool) -> Vec<u16> {
    const ALU_OPS: [u16; 11] = [0x0, 0x1, 0x2, 0x3, 0x4, 0x6, 0x8, 0x9, 0xA, 0xB, 0xC];
    const INT_CONTROL: [u16; 10] = [0x00, 0x01, 0x02, 0x03, 0x08, 0x09, 0x0C, 0x0E, 0x20, 0x25];
    // pop sr; pop pc; retf; reti
    const POPS: [u16; 4] = [0x9A88, 0x9C88, 0x9A90, Ins::RETI];

    let choices = if far_flow { 20u8 } else { 16 };
    let mut program = Vec::with_capacity(len + 1);
    while program.len() < len {
        match rng.generate_range(0..choices) {
            // jumps
            0 => {
                let op0 = rng.generate_range(0..=0xEu16);
                program.push((op0 << 12) | (7 << 9) | rng.generate_range(0..0x80u16));
            }
            // stores
            1 => program.push(0xD000 | (rng.generate_range(0..7u16) << 9) | rng.generate::<u16>() & 0x1FF),
            // push and pop
            2 => {
                let op0 = if rng.generate_range(0..2u8) == 0 { 0x9 } else { 0xD };
                program.push((op0 << 12) | (2 << 6) | rng.generate::<u16>() & 0xE38);
            }
            // mul.us, mul.ss
            16 => {
                let signed = rng.generate_range(0..2u16);
                let (ra, rb) = (rng.generate_range(0..8u16), rng.generate_range(0..8u16));
                program.push(0xF008 | (ra << 9) | (signed << 8) | rb);
            }
            // call, jmpf
            17 => {
                let op = if rng.generate_range(0..2u8) == 0 { 0xF040 } else { 0xFE80 };
                program.push(op);
                program.push(0x0100 + rng.generate_range(0..len as u16));
            }
            18 => program.push(0xF140 | INT_CONTROL[rng.generate_range(0..INT_CONTROL.len())]),
            19 => program.push(POPS[rng.generate_range(0..POPS.len())]),
            _ => {
                let op0 = ALU_OPS[rng.generate_range(0..ALU_OPS.len())];
                program.push((op0 << 12) | rng.generate::<u16>() & 0xFFF);
            }
        }
    }

    program
}

/// Sets registers, the shift buffer and a data word from `values`.
fn randomize(cpu: &mut Cpu, ram: &mut Ram, values: &[u16]) {
    for (reg, value) in [Reg::R1, Reg::R2, Reg::R3, Reg::R4, Reg::Bp].into_iter().zip(values) {
        cpu.regs.set(reg, *value);
    }

    cpu.regs.set(Reg::Sr, values[5] & !0x3F);
    cpu.regs.sb = values[6] & 0xF;
    ram.write16(0x0050, values[7]);
}

#[test]
fn counting_loop() {
    let program = [
        0x9240, // load r1, 00
        0x0241, // add r1, 01
        0x424A, // cmp r1, 0a
        0x4E43, // jne 000101
        0xEE41, // jmp 000104
    ];

    for timing in [Timing::Fixed, Timing::Table] {
        let outcome = compare(timing, &program, |_, _| (), 500, &[]);
        assert_eq!(outcome.cpu.regs.get(Reg::R1), 10);
        assert_eq!(outcome.cpu.regs.lpc(), 0x0104);
    }
}

#[test]
fn calls_and_stack() {
    let program = [
        0x950A, 0x1234, // load r2, r2, 1234
        0xF040, 0x0140, // call 000140
        0xEE41, // jmp 000103
    ];

    let setup = |cpu: &mut Cpu, ram: &mut Ram| {
        cpu.regs.set(Reg::R1, 0xFFFF);
        ram.load(
            0x0140,
            &[
                0xD8A0, // push r1, r4 to [sp]
                0xF30A, // mul.ss r1, r2
                0x0342, // add r1, r2 lsl 1
                0x9322, // load r1, r2 asr 1
                0x90A0, // pop r1, r4 from [sp]
                0x9A90, // retf
            ],
        );
    };

    for timing in [Timing::Fixed, Timing::Table] {
        let outcome = compare(timing, &program, setup, 1_000, &[]);
        assert_eq!(outcome.cpu.regs.get(Reg::Sp), 0x0800);
        assert_eq!(outcome.cpu.regs.get(Reg::R1), 0xFFFF);
        assert_eq!(outcome.cpu.regs.lpc(), 0x0103);
    }
}

#[test]
fn self_modifying_code() {
    let program = [
        0xD312, 0x0103, // store [0103], r2
        0x0241, // add r1, 01
        0x0241, // add r1, 01, overwritten with add r1, 02
        0xEE41, // jmp 000104
    ];

    let setup = |cpu: &mut Cpu, _: &mut Ram| cpu.regs.set(Reg::R2, 0x0242);
    let outcome = compare(Timing::Fixed, &program, setup, 200, &[]);
    assert_eq!(outcome.cpu.regs.get(Reg::R1), 3);
}

#[test]
fn external_writes_invalidate() {
    let program = [0x0241, 0x0241, 0xEE41];

    let mut engine = recompiler(Timing::Fixed);
    let (mut cpu, mut ram) = machine(Timing::Fixed, &program, &|_, _| ());
    engine.exec(&mut cpu, &mut ram, 100, &[]).unwrap();
    assert_eq!(cpu.regs.get(Reg::R1), 2);
    assert!(!engine.blocks().is_empty());

    // add r1, 03
    ram.write16(0x0100, 0x0243);
    engine.invalidate(0x0100);
    cpu.regs.set(Reg::Pc, 0x0100);

    engine.exec(&mut cpu, &mut ram, 100, &[]).unwrap();
    assert_eq!(cpu.regs.get(Reg::R1), 6);
}

#[test]
fn breakpoints_split_blocks() {
    let program = [0x0241, 0x0241, 0x0241, 0x0241, 0xEE41];

    let outcome = compare(Timing::Fixed, &program, |_, _| (), 1_000, &[0x0103]);
    assert_eq!(outcome.cpu.regs.lpc(), 0x0103);
    assert_eq!(outcome.cpu.regs.get(Reg::R1), 3);
    assert!(outcome.result.unwrap().hit_breakpoint);
}

#[test]
fn cycle_budget_is_exact() {
    let program = [0x0241; 32];

    for cycles in [0, 1, 4, 5, 6, 23, 24, 25, 61] {
        let outcome = compare(Timing::Fixed, &program, |_, _| (), cycles, &[]);
        let executed = outcome.result.unwrap();
        assert_eq!(executed.instructions as u64, cycles / 5 + 1);
    }
}

#[test]
fn interrupts_between_blocks() {
    let program = [
        0xF141, // int irq
        0x0241, // add r1, 01
        0xEE41, // jmp 000102
    ];

    let setup = |cpu: &mut Cpu, ram: &mut Ram| {
        ram.write16(IRQ_VECTOR + 3, 0x0200);
        // add r2, 01; jmp 000201
        ram.load(0x0200, &[0x0441, 0xEE41]);
        cpu.set_input(Line::Irq3, true);
    };

    let outcome = compare(Timing::Fixed, &program, setup, 300, &[]);
    assert!(outcome.cpu.irq.irq);
    assert_eq!(outcome.cpu.regs.get(Reg::R2), 1);
}

#[test]
fn faults_propagate() {
    // add r1, 01; (05) r1, 01
    let outcome = compare(Timing::Fixed, &[0x0241, 0x5241], |_, _| (), 100, &[]);
    let fault = outcome.result.unwrap_err();
    assert_eq!(fault.to_string(), "unknown opcode 5241 at 0101");
}

#[test]
fn unbounded_budget_runs() {
    // add r1, 01; (05) r1, 01
    let outcome = compare(Timing::Fixed, &[0x0241, 0x5241], |_, _| (), u64::MAX, &[]);
    assert_eq!(outcome.cpu.regs.get(Reg::R1), 1);
    assert!(outcome.result.is_err());
}

#[test]
fn random_programs() {
    for seed in 0..64 {
        let mut rng = WyRand::new_seed(seed);
        let program = random_program(&mut rng, 96, false);

        let values: Vec<u16> = (0..8).map(|_| rng.generate()).collect();
        let setup = |cpu: &mut Cpu, ram: &mut Ram| randomize(cpu, ram, &values);

        for timing in [Timing::Fixed, Timing::Table] {
            compare(timing, &program, &setup, 5_000, &[]);
        }
    }
}

#[test]
fn random_programs_with_interrupts() {
    const LEN: usize = 160;

    for seed in 0..48 {
        let mut rng = WyRand::new_seed(0x1000 + seed);
        let program = random_program(&mut rng, LEN, true);

        let values: Vec<u16> = (0..8).map(|_| rng.generate()).collect();
        // fiq, irq0..=irq7, break
        let handlers: Vec<u16> = (0..10)
            .map(|_| 0x0100 + rng.generate_range(0..LEN as u16))
            .collect();

        let setup = |cpu: &mut Cpu, ram: &mut Ram| {
            randomize(cpu, ram, &values);
            ram.write16(FIQ_VECTOR, handlers[0]);
            for line in 0..8 {
                ram.write16(IRQ_VECTOR + line, handlers[1 + line as usize]);
            }
            ram.write16(BREAK_VECTOR, handlers[9]);

            cpu.irq.enable_irq = true;
            cpu.irq.enable_fiq = true;
        };

        // line toggled before each slice, and the slice budget
        let slices: Vec<(Line, bool, u64)> = (0..32)
            .map(|_| {
                let line = Line::from_repr(rng.generate_range(0..9u8)).unwrap_or(Line::Fiq);
                let asserted = rng.generate_range(0..3u8) != 0;
                (line, asserted, rng.generate_range(0..400u64))
            })
            .collect();

        for timing in [Timing::Fixed, Timing::Table] {
            let mut engine = recompiler(timing);
            let (mut expected_cpu, mut expected_ram) = machine(timing, &program, &setup);
            let (mut cpu, mut ram) = machine(timing, &program, &setup);

            for (i, &(line, asserted, cycles)) in slices.iter().enumerate() {
                expected_cpu.set_input(line, asserted);
                cpu.set_input(line, asserted);

                let expected =
                    InterpreterEngine.exec(&mut expected_cpu, &mut expected_ram, cycles, &[]);
                let actual = engine.exec(&mut cpu, &mut ram, cycles, &[]);

                assert_eq!(actual, expected, "seed {seed}, slice {i}");
                assert_eq!(cpu.regs, expected_cpu.regs, "seed {seed}, slice {i}");
                assert_eq!(cpu.irq, expected_cpu.irq, "seed {seed}, slice {i}");

                if expected.is_err() {
                    break;
                }
            }

            assert!(ram.words() == expected_ram.words(), "seed {seed}: memory differs");
        }
    }
}

#[test]
fn invalidated_blocks_are_reclaimed() {
    let program = [
        0x0241, // add r1, 01
        0xD312, 0x0100, // store [0100], r2
        0xEE44, // jmp 000100
    ];

    // the store rewrites the add with itself, killing the block it runs in
    let setup = |cpu: &mut Cpu, _: &mut Ram| cpu.regs.set(Reg::R2, 0x0241);

    let mut engine = recompiler(Timing::Fixed);
    let (mut cpu, mut ram) = machine(Timing::Fixed, &program, &setup);
    let (mut expected_cpu, mut expected_ram) = machine(Timing::Fixed, &program, &setup);

    engine.exec(&mut cpu, &mut ram, 2_000, &[]).unwrap();
    InterpreterEngine
        .exec(&mut expected_cpu, &mut expected_ram, 2_000, &[])
        .unwrap();

    let per_block = engine.compiler().code_len() / engine.blocks().stored();
    let bound = 4 * DEAD_BLOCKS_LIMIT * per_block;

    for _ in 0..200 {
        engine.exec(&mut cpu, &mut ram, 2_000, &[]).unwrap();
        InterpreterEngine
            .exec(&mut expected_cpu, &mut expected_ram, 2_000, &[])
            .unwrap();

        assert!(engine.blocks().stored() <= 2 * DEAD_BLOCKS_LIMIT);
        assert!(engine.compiler().code_len() <= bound);
    }

    assert!(engine.compiler().compiled_count() > 4 * DEAD_BLOCKS_LIMIT as u64);
    assert_eq!(cpu.regs, expected_cpu.regs);
}

#[test]
fn zero_block_length_is_clamped() {
    let config = recompiler::Config { instr_per_block: 0 };
    let mut engine = RecompilerEngine::new(Timing::Fixed, config).expect("host should be supported");
    assert_eq!(engine.compiler().settings().instr_per_block, 1);

    let (mut cpu, mut ram) = machine(Timing::Fixed, &[0x0241, 0x0241, 0xEE41], &|_, _| ());
    engine.exec(&mut cpu, &mut ram, 100, &[]).unwrap();
    assert_eq!(engine.blocks().stored(), 3);
    assert_eq!(cpu.regs.get(Reg::R1), 2);
}

#[test]
fn selection() {
    let config = Config {
        isa: IsaVersion::V12,
        ..Default::default()
    };

    assert_eq!(select(&config, true, Default::default()).name(), "interpreter");
    assert_eq!(select(&Config::default(), false, Default::default()).name(), "interpreter");
    assert_eq!(select(&Config::default(), true, Default::default()).name(), "recompiler");
}

#[test]
fn reset_discards_blocks() {
    let mut engine = recompiler(Timing::Fixed);
    let (mut cpu, mut ram) = machine(Timing::Fixed, &[0x0241, 0xEE41], &|_, _| ());
    ram.write16(unsp::irq::RESET_VECTOR, 0x0100);

    engine.exec(&mut cpu, &mut ram, 50, &[]).unwrap();
    assert!(!engine.blocks().is_empty());

    engine.reset(&mut cpu, &mut ram);
    assert!(engine.blocks().is_empty());
    assert_eq!(cpu.regs.lpc(), 0x0100);

    engine.exec(&mut cpu, &mut ram, 50, &[]).unwrap();
    assert!(engine.compiler().cache_hits() > 0);
}
