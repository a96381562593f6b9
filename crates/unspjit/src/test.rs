use jitclif::isa::Target;
use strum::VariantArray;
use unsp::Timing;

use crate::block::Meta;
use crate::hooks::Hooks;
use crate::{Artifact, BuildError, BuilderError, Jit, Settings};

fn jit(target: Target, settings: Settings) -> Jit {
    let isa = target.builder().expect("target should be available");

    // SAFETY: blocks are only compiled, never called
    Jit::with_isa(isa, settings, unsafe { Hooks::stub() }).expect("jit should set up")
}

fn reader(base: u32, words: &[u16]) -> impl FnMut(u32) -> u16 {
    move |addr| {
        addr.checked_sub(base)
            .and_then(|offset| words.get(offset as usize).copied())
            // int fiq, never translated
            .unwrap_or(0xF142)
    }
}

fn compile(target: Target, settings: Settings, base: u32, words: &[u16]) -> (Artifact, Meta) {
    let mut jit = jit(target, settings);
    jit.build_artifact(base, reader(base, words))
        .unwrap_or_else(|e| panic!("{}: {e}", target.name()))
}

#[test]
fn straight_line_block() {
    // add r1, 05; cmp r1, 05; jl +2
    let program = [0x0245, 0x4245, 0x3E02];

    for &target in Target::VARIANTS {
        let (artifact, meta) = compile(target, Settings::default(), 0x0100, &program);
        assert!(!artifact.code.is_empty());
        assert_eq!(meta.seq.len(), 3);
        assert_eq!(meta.cycles, 3 * Timing::FIXED_CYCLES);
        insta::assert_snapshot!(meta.seq.to_string(), @r"
        000100: add r1, 05
        000101: cmp r1, 05
        000102: jl 000105
        ");
    }
}

#[test]
fn table_timing_takes_worst_exit() {
    // add r1, 05; load r2, [bp+03]; jl +2
    let settings = Settings {
        timing: Timing::Table,
        ..Default::default()
    };

    let (_, meta) = compile(Target::X86_64V1, settings, 0x0100, &[0x0245, 0x9403, 0x3E02]);
    assert_eq!(meta.cycles, 2 + 6 + 4);
}

#[test]
fn every_form_compiles() {
    let program = [
        0x0205, // add r1, [bp+05]
        0x92F2, // load r1, ds:[r2++]
        0xD2DA, // store r1, [++r2]
        0xD2CB, // store r1, [r3--]
        0x9309, 0x1234, // load r1, r1, 1234
        0xD319, 0x0020, // store [0020], r1, r1
        0x0342, // add r1, r2 lsl 1
        0x9322, // load r1, r2 asr 1
        0x9782, // load r3, r2 rol 1
        0x36C5, // sbc r3, [05]
        0x6A41, // neg bp, 01
        0xF30A, // mul.ss r1, r2
        0xF20A, // mul.us r1, r2
        0xD8A0, // push r1, r4 to [sp]
        0x90A0, // pop r1, r4 from [sp]
        0xF041, 0x0200, // call 010200
    ];

    for &target in Target::VARIANTS {
        let (_, meta) = compile(target, Settings::default(), 0x0100, &program);
        assert_eq!(meta.seq.len(), 16, "{}", target.name());
        assert_eq!(meta.seq.words(), program.len() as u32);
    }
}

#[test]
fn control_flow_ends_block() {
    let cases: [(&[u16], usize); 5] = [
        // load pc, r2
        (&[0x9F02, 0x0245], 1),
        // retf
        (&[0x9A90, 0x0245], 1),
        // load sr, 00
        (&[0x9C40, 0x0245], 1),
        // jmpf 020000
        (&[0xFE82, 0x0000, 0x0245], 1),
        // jmp 0000ff
        (&[0x0245, 0xEE42, 0x0245], 2),
    ];

    for (program, len) in cases {
        let (_, meta) = compile(Target::Aarch64, Settings::default(), 0x0100, program);
        assert_eq!(meta.seq.len(), len, "{program:04X?}");
    }
}

#[test]
fn untranslated_instruction_ends_block() {
    // add r1, 05; int irq; add r1, 05
    let (_, meta) = compile(Target::X86_64V3, Settings::default(), 0x0100, &[0x0245, 0xF141, 0x0245]);
    assert_eq!(meta.seq.len(), 1);

    // reti
    let (_, meta) = compile(Target::X86_64V3, Settings::default(), 0x0100, &[0x0245, 0x9A98]);
    assert_eq!(meta.seq.len(), 1);
}

#[test]
fn untranslated_first_instruction_is_an_error() {
    for program in [
        // break
        &[0xF160][..],
        // store r1, 05
        &[0xD245],
        // push r1, r4 to [pc]
        &[0xD8A7],
        // push with four registers ending at r1
        &[0xD2A0],
        // r1 = r1 lsr r2
        &[0xE34A],
    ] {
        let mut jit = jit(Target::X86_64V1, Settings::default());
        let result = jit.build_artifact(0x0100, reader(0x0100, program));
        assert!(
            matches!(
                result,
                Err(BuildError::Builder {
                    source: BuilderError::Unsupported(_, 0x0100)
                })
            ),
            "{program:04X?}"
        );
    }

    // the builder context must be usable after a failure
    let mut jit = jit(Target::X86_64V1, Settings::default());
    assert!(jit.build_artifact(0x0100, reader(0x0100, &[0xF160])).is_err());
    assert!(jit.build_artifact(0x0100, reader(0x0100, &[0x0245])).is_ok());
}

#[test]
fn block_length_is_bounded() {
    let settings = Settings {
        instr_per_block: 4,
        ..Default::default()
    };

    let (_, meta) = compile(Target::X86_64V1, settings, 0x0100, &[0x0245; 16]);
    assert_eq!(meta.seq.len(), 4);

    let settings = Settings {
        instr_per_block: 0,
        ..Default::default()
    };

    let mut jit = jit(Target::X86_64V1, settings);
    let result = jit.build_artifact(0x0100, reader(0x0100, &[0x0245]));
    assert!(matches!(result, Err(BuildError::EmptyBlock)));
}

#[test]
fn blocks_stay_in_their_code_segment() {
    // add r1, 05 at the last words of segment 0
    let (_, meta) = compile(Target::X86_64V1, Settings::default(), 0xFFFC, &[0x0245; 8]);
    assert_eq!(meta.seq.len(), 3);

    // load r1, r1, 1234 would end in the next segment
    let (_, meta) = compile(
        Target::X86_64V1,
        Settings::default(),
        0x1_FFFD,
        &[0x0245, 0x9309, 0x1234],
    );
    assert_eq!(meta.seq.len(), 1);
}

#[test]
fn identical_code_hits_the_cache() {
    let mut jit = jit(Target::X86_64V1, Settings::default());
    let program = [0x0245, 0x4245, 0x3E02];

    jit.build(0x0100, reader(0x0100, &program)).unwrap();
    jit.build(0x0100, reader(0x0100, &program)).unwrap();
    assert_eq!(jit.compiled_count(), 2);
    assert_eq!(jit.cache_hits(), 1);

    // same code elsewhere is a different sequence
    jit.build(0x0200, reader(0x0200, &program)).unwrap();
    assert_eq!(jit.cache_hits(), 1);
}
