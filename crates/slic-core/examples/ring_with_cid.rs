//! Rings a simulated line with FSK caller ID in the first silent interval,
//! then answers it and prints every event along the way.

use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use slic_core::{
    Device, DeviceConfig, DeviceFamily, DriveState, GeneratorMask, Instruction, LineConfig,
    LineState, Profile, ProfileKind, Program, ProgramKind, SimDevice, VpError, NO_ACK_TONE,
};
use thiserror as _;
use tracing as _;

const CALLER: &[u8] = b"\x80\x0F\x01\x0810191230\x02\x075551234";

const fn hold(ticks: u16) -> Instruction {
    Instruction::Delay {
        ticks,
        absolute: false,
    }
}

fn profiles() -> Result<(Profile, Profile), VpError> {
    let cadence = Program::new(
        ProgramKind::RingCadence,
        vec![
            Instruction::SetState(DriveState::Ringing),
            hold(400),
            Instruction::SetState(DriveState::Standby),
            Instruction::CidMarker,
            Instruction::SetState(DriveState::Ringing),
            hold(400),
            Instruction::SetState(DriveState::Standby),
            hold(800),
            Instruction::Branch { target: 4, count: 0 },
        ],
    )?;
    let envelope = Program::new(
        ProgramKind::CallerId,
        vec![
            Instruction::SetGenerators(GeneratorMask::NONE),
            hold(100),
            Instruction::SetGenerators(GeneratorMask::FSK),
            hold(0),
        ],
    )?;
    Ok((
        Profile::new(ProfileKind::RingCadence).with_program(&cadence),
        Profile::new(ProfileKind::CallerId)
            .with_registers(&[(4, 0x1200), (5, 0x0400)])
            .with_program(&envelope)
            .with_params(&[0, NO_ACK_TONE, NO_ACK_TONE]),
    ))
}

fn main() -> Result<(), VpError> {
    let mut device = Device::with_bus(SimDevice::new(DeviceFamily::Vp880, 1));
    device.init_device(DeviceConfig {
        channel_count: 1,
        ..DeviceConfig::default()
    })?;
    device.make_line(0, LineConfig::default())?;
    device.init_line(0)?;

    let (cadence, cid) = profiles()?;
    let cadence = device.profiles_mut().insert(cadence.encode()?)?;
    let cid = device.profiles_mut().insert(cid.encode()?)?;
    device.init_ring(0, Some(cadence), Some(cid))?;
    device.init_cid(0, CALLER)?;
    device.set_line_state(0, LineState::Ringing)?;

    for tick in 0..1_200u32 {
        if tick == 1_100 {
            device.bus_mut().set_hook(0, true);
        }
        device.bus_mut().tick();
        while let Some(event) = device.poll_event() {
            println!("tick {tick:>5}: {:?} on {:?}", event.kind, event.channel);
        }
    }

    let line = device.line(0).ok_or(VpError::NotInitialized)?;
    println!("line state: {:?}", line.state());
    println!("wire bytes: {}", device.bus().wire_bytes(0).len());
    Ok(())
}
