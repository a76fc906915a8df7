//! Fixtures shared by the integration suites.

#![allow(dead_code)]

use slic_core::{
    CidMode, Device, DeviceConfig, DeviceFamily, DriveState, Event, EventKind, GeneratorMask,
    Instruction, LineConfig, Profile, ProfileKind, ProfileRef, Program, ProgramKind, SimDevice,
    Termination, NO_ACK_TONE,
};

pub type SimHost = Device<SimDevice>;

/// An initialized device on a simulated bus.
pub fn device(family: DeviceFamily, channels: u8) -> SimHost {
    let mut device = Device::with_bus(SimDevice::new(family, channels));
    device
        .init_device(DeviceConfig {
            family,
            channel_count: channels,
            ..DeviceConfig::default()
        })
        .expect("valid device config");
    device
}

/// Creates and initializes a line, consuming its init-complete event.
pub fn line(device: &mut SimHost, channel: u8, termination: Termination) {
    device
        .make_line(
            channel,
            LineConfig {
                termination,
                ..LineConfig::default()
            },
        )
        .expect("make line");
    device.init_line(channel).expect("init line");
    assert_eq!(
        drain(device),
        vec![Event::line(EventKind::LineInitComplete, channel)]
    );
}

/// Polls until no event is left.
pub fn drain(device: &mut SimHost) -> Vec<Event> {
    std::iter::from_fn(|| device.poll_event()).take(1024).collect()
}

/// Advances the simulated device `ticks` ticks, polling after each.
pub fn run(device: &mut SimHost, ticks: usize) -> Vec<Event> {
    let mut events = Vec::new();
    for _ in 0..ticks {
        device.bus_mut().tick();
        events.extend(drain(device));
    }
    events
}

pub fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|event| event.kind).collect()
}

pub fn store(device: &mut SimHost, profile: &Profile) -> ProfileRef {
    let bytes = profile.encode().expect("encodable profile");
    device.profiles_mut().insert(bytes).expect("table has room")
}

pub const fn delay(ticks: u16) -> Instruction {
    Instruction::Delay {
        ticks,
        absolute: false,
    }
}

/// One short ring, a caller-ID slot, then continuous short rings.
pub fn ring_cadence_with_cid_slot() -> Program {
    Program::new(
        ProgramKind::RingCadence,
        vec![
            Instruction::SetState(DriveState::Ringing),
            delay(2),
            Instruction::SetState(DriveState::Standby),
            Instruction::CidMarker,
            Instruction::SetState(DriveState::Ringing),
            delay(2),
            Instruction::SetState(DriveState::Standby),
            delay(2),
            Instruction::Branch { target: 4, count: 0 },
        ],
    )
    .expect("valid cadence")
}

/// Keys the FSK modulator and waits until the host releases the program.
pub fn fsk_envelope() -> Program {
    Program::new(
        ProgramKind::CallerId,
        vec![Instruction::SetGenerators(GeneratorMask::FSK), delay(0)],
    )
    .expect("valid envelope")
}

pub fn cid_profile(mode: CidMode, envelope: &Program, ack: [u8; 2]) -> Profile {
    let mode = match mode {
        CidMode::Fsk => 0,
        CidMode::Dtmf => 1,
    };
    Profile::new(ProfileKind::CallerId)
        .with_registers(&[(4, 0x1200), (5, 0x0400)])
        .with_program(envelope)
        .with_params(&[mode, ack[0], ack[1]])
}

pub fn fsk_cid_profile() -> Profile {
    cid_profile(CidMode::Fsk, &fsk_envelope(), [NO_ACK_TONE, NO_ACK_TONE])
}

/// Two's complement checksum of a caller-ID message.
pub fn checksum(message: &[u8]) -> u8 {
    message
        .iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}
