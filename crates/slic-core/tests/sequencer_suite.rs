//! Sequencer ownership over both control paths, loop counting, caller-ID
//! splicing, and executor properties over arbitrary valid programs.

#![allow(clippy::pedantic, clippy::nursery)]

use proptest::prelude::*;
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use slic_core::sequencer::{Effect, STEP_BUDGET_PER_TICK};
use slic_core::{
    ms_to_ticks, Completion, DeviceFamily, DriveState, Executor, GeneratorMask, Instruction,
    LineBus, Marker, Program, ProgramBuilder, ProgramKind, SequenceControl, Sequencer,
    SimDevice, Ticks, VpError, MAX_BRANCH_COUNT, MAX_PROGRAM_LEN, MAX_REPEAT_CYCLES,
};
use thiserror as _;
use tracing as _;

fn delay(ticks: u16) -> Instruction {
    Instruction::Delay {
        ticks,
        absolute: false,
    }
}

/// Holds generator A in a loop until the host breaks out, then plays B.
fn held_loop() -> Program {
    Program::new(
        ProgramKind::ToneCadence,
        vec![
            Instruction::SetGenerators(GeneratorMask::A),
            delay(0),
            Instruction::Branch {
                target: 0,
                count: 0,
            },
            Instruction::SetGenerators(GeneratorMask::B),
        ],
    )
    .expect("valid program")
}

fn one_shot() -> Program {
    Program::new(
        ProgramKind::Park,
        vec![Instruction::SetState(DriveState::Standby)],
    )
    .expect("valid program")
}

#[rstest]
#[case(DeviceFamily::Vp880)]
#[case(DeviceFamily::Vp792)]
fn break_and_resume_leaves_a_held_loop(#[case] family: DeviceFamily) {
    let mut sim = SimDevice::new(family, 2);
    let mut sequencer = Sequencer::new();
    sequencer
        .start(&mut LineBus::new(&mut sim, family, 1), held_loop())
        .expect("idle sequencer");

    sim.tick();
    assert_eq!(sim.generators(1), GeneratorMask::A);
    sim.run(3);
    assert!(sim.sequencer_running(1), "held forever");

    sequencer
        .control(
            &mut LineBus::new(&mut sim, family, 1),
            SequenceControl::BreakAndResume,
        )
        .expect("control written");
    sim.tick();
    assert_eq!(sim.generators(1), GeneratorMask::B);
    assert!(!sim.sequencer_running(1));
    assert_eq!(sim.pending_indications(), 1);
    assert_eq!(
        sequencer.on_complete(1),
        Completion::Finished(ProgramKind::ToneCadence)
    );
    assert!(!sequencer.is_active());
}

#[rstest]
#[case(DeviceFamily::Vp890)]
#[case(DeviceFamily::Vp792)]
fn abort_reports_an_aborted_completion(#[case] family: DeviceFamily) {
    let mut sim = SimDevice::new(family, 1);
    let mut sequencer = Sequencer::new();
    sequencer
        .start(&mut LineBus::new(&mut sim, family, 0), held_loop())
        .expect("idle sequencer");
    sim.tick();

    assert_eq!(
        sequencer.start(&mut LineBus::new(&mut sim, family, 0), one_shot()),
        Err(VpError::DeviceBusy)
    );
    assert_eq!(
        sequencer.abort(&mut LineBus::new(&mut sim, family, 0)),
        Ok(true)
    );
    assert!(sequencer.is_aborting());
    assert!(!sim.sequencer_running(0));
    assert_eq!(sim.pending_indications(), 1);
    assert_eq!(
        sequencer.on_complete(0),
        Completion::Aborted(ProgramKind::ToneCadence)
    );
    assert_eq!(
        sequencer.abort(&mut LineBus::new(&mut sim, family, 0)),
        Ok(false),
        "nothing left to stop"
    );
}

#[test]
fn restart_over_an_aborting_program_skips_its_completion() {
    let family = DeviceFamily::Vp880;
    let mut sim = SimDevice::new(family, 1);
    let mut sequencer = Sequencer::new();
    sequencer
        .start(&mut LineBus::new(&mut sim, family, 0), held_loop())
        .expect("idle sequencer");
    sim.tick();
    sequencer
        .abort(&mut LineBus::new(&mut sim, family, 0))
        .expect("abort written");
    sequencer
        .start(&mut LineBus::new(&mut sim, family, 0), one_shot())
        .expect("aborting program may be replaced");
    assert!(!sequencer.owns_next_completion());

    assert_eq!(sequencer.on_complete(0), Completion::Stale);
    sim.tick();
    assert_eq!(sim.drive_state(0), DriveState::Standby);
    assert_eq!(
        sequencer.on_complete(0),
        Completion::Finished(ProgramKind::Park)
    );
}

#[rstest]
#[case(SequenceControl::Stopped)]
#[case(SequenceControl::Running)]
#[case(SequenceControl::Restart)]
fn only_flow_controls_are_sent_to_a_running_program(#[case] control: SequenceControl) {
    let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
    let mut sequencer = Sequencer::new();
    assert_eq!(
        sequencer.control(
            &mut LineBus::new(&mut sim, DeviceFamily::Vp880, 0),
            control
        ),
        Err(VpError::InvalidArgument)
    );
}

#[test]
fn absolute_delay_counts_ticks_since_start() {
    let mut executor = Executor::new();
    executor.load(vec![
        Instruction::SetState(DriveState::Active),
        Instruction::Delay {
            ticks: 5,
            absolute: true,
        },
        Instruction::SetState(DriveState::Standby),
    ]);
    executor.control(SequenceControl::Running);
    for _ in 0..4 {
        assert!(!executor.tick().completed);
    }
    assert!(executor.tick().completed);
}

/// Runs `instructions` until they end or `max_ticks` pass. Returns how many
/// times metering was switched on and whether the program completed.
fn metering_passes(instructions: Vec<Instruction>, max_ticks: usize) -> (usize, bool) {
    let mut executor = Executor::new();
    executor.load(instructions);
    executor.control(SequenceControl::Running);
    let mut passes = 0;
    for _ in 0..max_ticks {
        let report = executor.tick();
        passes += report
            .effects
            .iter()
            .filter(|effect| **effect == Effect::Metering(true))
            .count();
        if report.completed {
            return (passes, true);
        }
    }
    (passes, false)
}

fn counted_loop(ticks: u16, count: u8) -> Vec<Instruction> {
    vec![
        Instruction::SetState(DriveState::Active),
        Instruction::Metering(true),
        delay(ticks),
        Instruction::Branch { target: 1, count },
        Instruction::SetState(DriveState::Standby),
    ]
}

#[test]
fn forever_branch_keeps_looping() {
    let (passes, completed) = metering_passes(counted_loop(2, 0), 200);
    assert!(!completed);
    assert_eq!(passes, 100);
}

/// Raw material for a fragment: (is branch, target seed or delay seed, count).
fn raw_fragment(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<(bool, u8, u8)>> {
    prop::collection::vec((any::<bool>(), any::<u8>(), 0u8..4), len)
}

/// Turns raw material placed at `start` into delays and backward branches.
fn materialize(start: usize, raw: &[(bool, u8, u8)]) -> Vec<Instruction> {
    raw.iter()
        .enumerate()
        .map(|(offset, &(branch, seed, count))| {
            if branch {
                Instruction::Branch {
                    target: (usize::from(seed) % (start + offset + 1)) as u8,
                    count,
                }
            } else {
                delay(u16::from(seed % 4) + 1)
            }
        })
        .collect()
}

fn arbitrary_instruction() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        Just(Instruction::SetGenerators(GeneratorMask::A)),
        Just(Instruction::SetState(DriveState::Ringing)),
        (0u16..4).prop_map(delay),
        (any::<u8>(), 0u8..3).prop_map(|(target, count)| Instruction::Branch { target, count }),
        Just(Instruction::UserEvent(Marker(0x40))),
        Just(Instruction::Metering(true)),
    ]
}

fn arbitrary_program() -> impl Strategy<Value = Vec<Instruction>> {
    prop::collection::vec(arbitrary_instruction(), 0..MAX_PROGRAM_LEN).prop_map(|body| {
        let len = body.len() + 1;
        std::iter::once(Instruction::SetState(DriveState::Standby))
            .chain(body.into_iter().map(|instruction| match instruction {
                Instruction::Branch { target, count } => Instruction::Branch {
                    target: (usize::from(target) % len) as u8,
                    count,
                },
                other => other,
            }))
            .collect()
    })
}

proptest! {
    #[test]
    fn every_tick_is_bounded(instructions in arbitrary_program(), controls in prop::collection::vec(0u8..3, 0..8)) {
        let program = Program::new(ProgramKind::ToneCadence, instructions.clone());
        prop_assert!(program.is_ok());

        let mut executor = Executor::new();
        executor.load(instructions);
        executor.control(SequenceControl::Running);
        let mut controls = controls.into_iter();
        for _ in 0..32 {
            let report = executor.tick();
            prop_assert!(report.effects.len() <= STEP_BUDGET_PER_TICK);
            if report.completed {
                prop_assert!(!executor.is_running());
                prop_assert!(executor.tick().effects.is_empty());
                break;
            }
            match controls.next() {
                Some(0) => { executor.control(SequenceControl::Resume); }
                Some(1) => { executor.control(SequenceControl::Break); }
                _ => {}
            }
            prop_assert!(executor.current_index() <= MAX_PROGRAM_LEN);
        }
    }

    #[test]
    fn stop_always_ends_a_running_program(instructions in arbitrary_program(), ticks in 0usize..8) {
        let mut executor = Executor::new();
        executor.load(instructions);
        executor.control(SequenceControl::Running);
        for _ in 0..ticks {
            executor.tick();
        }
        let was_running = executor.is_running();
        prop_assert_eq!(executor.control(SequenceControl::Stopped), was_running);
        prop_assert!(!executor.is_running());
    }

    #[test]
    fn counted_branch_runs_its_body_count_plus_one_times(count in 1..=MAX_BRANCH_COUNT, ticks in 1u16..4) {
        let (passes, completed) = metering_passes(counted_loop(ticks, count), 1024);
        prop_assert!(completed);
        prop_assert_eq!(passes, usize::from(count) + 1);
    }

    #[test]
    fn repeat_plays_exactly_the_requested_cycles(cycles in 1..=MAX_REPEAT_CYCLES) {
        let mut builder = ProgramBuilder::new(ProgramKind::MeteringBurst);
        builder
            .set_state(DriveState::Active)
            .metering(true)
            .delay(Ticks::Count(1));
        builder.repeat(1, cycles).expect("in range");
        let program = builder.build().expect("valid");
        let (passes, completed) = metering_passes(program.instructions().to_vec(), 1024);
        prop_assert!(completed);
        prop_assert_eq!(passes, usize::from(cycles));
    }

    #[test]
    fn cid_splice_shifts_the_ring_tail(
        head in raw_fragment(0..6),
        tail in raw_fragment(0..8),
        body in raw_fragment(0..8),
    ) {
        let marker_at = head.len() + 1;
        let mut ring = vec![Instruction::SetState(DriveState::Ringing)];
        ring.extend(materialize(1, &head));
        ring.push(Instruction::CidMarker);
        ring.extend(materialize(marker_at + 1, &tail));
        let ring = Program::new(ProgramKind::RingCadence, ring).expect("valid ring");

        let mut cid = vec![Instruction::SetGenerators(GeneratorMask::FSK)];
        cid.extend(materialize(1, &body));
        let cid = Program::new(ProgramKind::CallerId, cid).expect("valid envelope");

        let merged = Program::splice_cid(&ring, &cid).expect("fits");
        let shift = cid.len() - 1;
        prop_assert_eq!(merged.len(), ring.len() + cid.len() - 1);
        prop_assert_eq!(&merged.instructions()[..marker_at], &ring.instructions()[..marker_at]);

        for (offset, instruction) in cid.instructions().iter().enumerate() {
            let expected = match *instruction {
                Instruction::Branch { target, count } => Instruction::Branch {
                    target: target + marker_at as u8,
                    count,
                },
                other => other,
            };
            prop_assert_eq!(merged.instructions()[marker_at + offset], expected);
        }
        for index in marker_at + 1..ring.len() {
            let expected = match ring.instructions()[index] {
                Instruction::Branch { target, count } if usize::from(target) > marker_at => {
                    Instruction::Branch {
                        target: target + shift as u8,
                        count,
                    }
                }
                other => other,
            };
            prop_assert_eq!(merged.instructions()[index + shift], expected);
        }
    }

    #[test]
    fn ticks_round_to_the_nearest_period(ms in 1u32..1_000_000) {
        let Ticks::Count(ticks) = ms_to_ticks(ms) else {
            return Err(TestCaseError::fail("finite durations never map to forever"));
        };
        prop_assert!(ticks >= 1);
        if ms >= 3 {
            prop_assert!((i64::from(ticks) * 5 - i64::from(ms)).abs() <= 2);
        }
    }
}
