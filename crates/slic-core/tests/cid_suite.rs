//! Caller-ID transmission end to end: FSK buffer refills, ring splicing,
//! DTMF digits and the acknowledge window.

#![allow(clippy::pedantic, clippy::nursery, clippy::too_many_lines)]

mod common;

use common::{
    checksum, cid_profile, delay, device, drain, fsk_cid_profile, kinds, line, run,
    ring_cadence_with_cid_slot, store, SimHost,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use slic_core::{
    Activity, CidMode, CidPhase, DeviceFamily, Digit, DriveState, EventKind, GeneratorMask,
    Instruction, LineState, Marker, Profile, ProfileKind, ProfileRef, Program, ProgramKind,
    Termination, VpError, NO_ACK_TONE,
};
use thiserror as _;
use tracing as _;

/// Acknowledge window of three ticks, then one DTMF digit per loop pass.
fn dtmf_envelope() -> Program {
    Program::new(
        ProgramKind::CallerId,
        vec![
            Instruction::SetGenerators(GeneratorMask::NONE),
            Instruction::UserEvent(Marker::CID_ACK_START),
            delay(3),
            Instruction::UserEvent(Marker::CID_ACK_END),
            Instruction::UserEvent(Marker::CID_DIGIT),
            Instruction::SetGenerators(GeneratorMask::A.union(GeneratorMask::B)),
            delay(2),
            Instruction::SetGenerators(GeneratorMask::NONE),
            delay(2),
            Instruction::Branch { target: 4, count: 0 },
        ],
    )
    .expect("valid envelope")
}

fn dtmf_with_ack(device: &mut SimHost) -> ProfileRef {
    store(
        device,
        &cid_profile(
            CidMode::Dtmf,
            &dtmf_envelope(),
            [Digit::D.as_nibble(), NO_ACK_TONE],
        ),
    )
}

#[test]
fn stand_alone_fsk_message_and_checksum_reach_the_wire() {
    let mut device = device(DeviceFamily::Vp880, 1);
    line(&mut device, 0, Termination::Fxs);
    let profile = store(&mut device, &fsk_cid_profile());
    let message = b"0123456789";

    device.send_cid(0, message, profile).expect("idle line");
    assert_eq!(device.line(0).map(|l| l.activity()), Some(Activity::CallerId));
    assert_eq!(
        device.line(0).and_then(|l| l.cid_phase()),
        Some(CidPhase::Transmitting)
    );

    let events = run(&mut device, 6);
    assert_eq!(
        kinds(&events),
        vec![EventKind::CidNeedMoreData, EventKind::CidTransmitDone]
    );
    let mut expected = message.to_vec();
    expected.push(checksum(message));
    assert_eq!(device.bus().wire_bytes(0), expected.as_slice());
    assert_eq!(device.line(0).map(|l| l.activity()), Some(Activity::Idle));
    assert!(!device.bus().sequencer_running(0));
}

#[test]
fn continue_cid_extends_a_running_transmission() {
    let mut device = device(DeviceFamily::Vp880, 1);
    line(&mut device, 0, Termination::Fxs);
    let profile = store(&mut device, &fsk_cid_profile());
    let first = b"ABCDEFGHIJKLMNOP";

    device.send_cid(0, first, profile).expect("idle line");
    assert_eq!(
        kinds(&run(&mut device, 2)),
        vec![EventKind::CidNeedMoreData]
    );
    device.continue_cid(0, b"QRST").expect("space in the drained half");

    let events = run(&mut device, 10);
    assert_eq!(
        kinds(&events),
        vec![EventKind::CidNeedMoreData, EventKind::CidTransmitDone]
    );
    let mut expected = b"ABCDEFGHIJKLMNOPQRST".to_vec();
    expected.push(checksum(&expected));
    assert_eq!(device.bus().wire_bytes(0), expected.as_slice());
    assert_eq!(
        device.continue_cid(0, b"UV"),
        Err(VpError::InvalidArgument),
        "nothing is transmitting"
    );
}

#[test]
fn send_cid_rejects_bad_requests() {
    let mut device = device(DeviceFamily::Vp890, 2);
    line(&mut device, 0, Termination::Fxs);
    line(&mut device, 1, Termination::Fxo);
    let fsk = store(&mut device, &fsk_cid_profile());
    let dtmf = dtmf_with_ack(&mut device);

    assert_eq!(device.send_cid(0, b"", fsk), Err(VpError::InvalidArgument));
    assert_eq!(
        device.send_cid(0, &[b'1'; 33], fsk),
        Err(VpError::InvalidArgument)
    );
    assert_eq!(
        device.send_cid(0, b"12x4", dtmf),
        Err(VpError::InvalidArgument),
        "DTMF carries keypad characters only"
    );
    assert_eq!(device.send_cid(1, b"1234", fsk), Err(VpError::InvalidArgument));
    assert_eq!(
        device.send_cid(0, b"1234", ProfileRef(9)),
        Err(VpError::Profile(slic_core::ProfileError::OutOfRange))
    );
    assert!(drain(&mut device).is_empty());
}

#[test]
fn ringing_carries_fsk_caller_id_in_the_cadence_gap() {
    let mut device = device(DeviceFamily::Vp880, 1);
    line(&mut device, 0, Termination::Fxs);
    let cadence = store(
        &mut device,
        &Profile::new(ProfileKind::RingCadence).with_program(&ring_cadence_with_cid_slot()),
    );
    let cid = store(&mut device, &fsk_cid_profile());
    let message = b"5551234";

    device
        .init_ring(0, Some(cadence), Some(cid))
        .expect("caller ID fits the cadence");
    device.init_cid(0, message).expect("staged");
    device
        .set_line_state(0, LineState::Ringing)
        .expect("idle line");
    assert_eq!(
        device.line(0).map(|l| l.activity()),
        Some(Activity::Ringing { cid: true })
    );
    assert_eq!(
        kinds(&drain(&mut device)),
        vec![EventKind::CidNeedMoreData],
        "priming drained the only half in use"
    );

    run(&mut device, 1);
    assert_eq!(device.bus().drive_state(0), DriveState::Ringing);
    assert!(device.bus().wire_bytes(0).is_empty(), "no FSK while ringing");

    let events = run(&mut device, 8);
    assert_eq!(kinds(&events), vec![EventKind::CidTransmitDone]);
    let mut expected = message.to_vec();
    expected.push(checksum(message));
    assert_eq!(device.bus().wire_bytes(0), expected.as_slice());
    assert_eq!(
        device.line(0).map(|l| l.activity()),
        Some(Activity::Ringing { cid: false })
    );
    assert!(device.bus().sequencer_running(0), "cadence keeps ringing");

    device
        .set_line_state(0, LineState::Disconnect)
        .expect("stops the cadence");
    assert!(drain(&mut device).is_empty());
    assert_eq!(device.bus().drive_state(0), DriveState::Disconnect);
}

#[test]
fn init_cid_validates_the_staged_message() {
    let mut device = device(DeviceFamily::Vp880, 1);
    line(&mut device, 0, Termination::Fxs);
    assert_eq!(device.init_cid(0, b""), Err(VpError::InvalidArgument));
    assert_eq!(
        device.init_cid(0, &[b'7'; 33]),
        Err(VpError::InvalidArgument)
    );
    device.init_cid(0, &[b'7'; 32]).expect("fits both halves");
}

#[test]
fn missing_acknowledge_abandons_dtmf_caller_id() {
    let mut device = device(DeviceFamily::Vp880, 1);
    line(&mut device, 0, Termination::Fxs);
    let profile = dtmf_with_ack(&mut device);

    device.send_cid(0, b"123", profile).expect("idle line");
    assert!(run(&mut device, 1).is_empty());
    assert_eq!(
        device.line(0).and_then(|l| l.cid_phase()),
        Some(CidPhase::AwaitingAck)
    );

    let events = run(&mut device, 6);
    assert_eq!(kinds(&events), vec![EventKind::CidAckMissing]);
    assert_eq!(device.line(0).map(|l| l.activity()), Some(Activity::Idle));
    assert!(!device.bus().sequencer_running(0));
    assert_eq!(device.bus().generators(0), GeneratorMask::NONE);
}

#[test]
fn acknowledged_dtmf_caller_id_plays_every_digit() {
    let mut device = device(DeviceFamily::Vp880, 1);
    line(&mut device, 0, Termination::Fxs);
    let profile = dtmf_with_ack(&mut device);

    device.send_cid(0, b"123", profile).expect("idle line");
    run(&mut device, 1);
    device.bus_mut().press_digit(0, Digit::D);
    assert!(
        drain(&mut device).is_empty(),
        "the acknowledge tone is absorbed"
    );
    assert_eq!(
        device.line(0).and_then(|l| l.cid_phase()),
        Some(CidPhase::Acknowledged)
    );

    assert!(run(&mut device, 5).is_empty());
    assert_eq!(
        device.bus().generator_params(0)[0],
        Digit::D1.dtmf_words().0
    );
    assert_eq!(
        device.bus().generator_params(0)[2],
        Digit::D1.dtmf_words().1
    );

    let events = run(&mut device, 40);
    assert_eq!(
        kinds(&events),
        vec![EventKind::CidNeedMoreData, EventKind::CidTransmitDone]
    );
    assert_eq!(device.line(0).map(|l| l.activity()), Some(Activity::Idle));
}

#[test]
fn digits_outside_the_acknowledge_window_are_reported() {
    let mut device = device(DeviceFamily::Vp880, 1);
    line(&mut device, 0, Termination::Fxs);
    device.bus_mut().press_digit(0, Digit::D);
    assert_eq!(
        kinds(&drain(&mut device)),
        vec![EventKind::Digit {
            digit: Digit::D,
            pulse: false
        }]
    );
}

#[test]
fn busy_mailbox_requeues_the_acknowledge_digit() {
    let mut device = device(DeviceFamily::Vp792, 2);
    line(&mut device, 1, Termination::Fxs);
    let profile = dtmf_with_ack(&mut device);

    device.send_cid(1, b"42", profile).expect("idle line");
    run(&mut device, 1);
    assert_eq!(
        device.line(1).and_then(|l| l.cid_phase()),
        Some(CidPhase::AwaitingAck)
    );

    device.bus_mut().lock_mailbox(true);
    device.bus_mut().press_digit(1, Digit::D);
    assert_eq!(device.poll_event(), None);
    assert_eq!(
        device.line(1).and_then(|l| l.cid_phase()),
        Some(CidPhase::AwaitingAck),
        "nothing changed while the mailbox was busy"
    );

    device.bus_mut().lock_mailbox(false);
    assert_eq!(device.poll_event(), None);
    assert_eq!(
        device.line(1).and_then(|l| l.cid_phase()),
        Some(CidPhase::Acknowledged)
    );
}
