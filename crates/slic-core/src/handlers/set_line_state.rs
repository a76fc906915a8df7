//! `set_line_state`: static drive states, ring cadences with optional
//! spliced caller ID, park, and ring trip.

use tracing::debug;

use crate::cid::CidBuffer;
use crate::decoder::Instruction;
use crate::encoding::GeneratorMask;
use crate::error::VpError;
use crate::event::Event;
use crate::line::{Line, Operation};
use crate::program::{Program, ProgramBuilder, ProgramKind};
use crate::state::{DriveState, LineState, PcmCut};
use crate::timing::ms_to_ticks_with;
use crate::transport::{LineBus, RegisterBus};

use super::{send_cid, submit, write_drive, write_generators, write_pcm, Request};

/// Cadence used when `init_ring` staged none: ring continuously.
pub(crate) fn default_ring_cadence() -> Result<Program, VpError> {
    Ok(Program::new(
        ProgramKind::RingCadence,
        vec![
            Instruction::SetState(DriveState::Ringing),
            Instruction::Branch { target: 1, count: 0 },
        ],
    )?)
}

pub(crate) fn enter<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    target: LineState,
) -> Result<(), VpError> {
    if line.steady_tone {
        write_generators(io, GeneratorMask::NONE)?;
        line.steady_tone = false;
    }
    match target {
        LineState::Ringing => start_ringing(line, io)?,
        LineState::Park => start_park(line, io)?,
        _ => {
            let drive = target.static_drive().ok_or(VpError::InvalidArgument)?;
            write_drive(line, io, drive)?;
            line.operation = Operation::Idle;
        }
    }
    debug!(channel = line.channel, state = ?target, "line state applied");
    line.state = target;
    Ok(())
}

fn start_ringing<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
) -> Result<(), VpError> {
    let cadence = match &line.ring.cadence {
        Some(cadence) => cadence.clone(),
        None => default_ring_cadence()?,
    };
    let (program, session) = match (&line.ring.cid, &line.cid_message) {
        (Some(profile), Some(message)) => {
            send_cid::validate_message(profile.params.mode, message)?;
            let program = Program::splice_cid(&cadence, &profile.program)?;
            let session = send_cid::prepare(io, profile, CidBuffer::new(message)?)?;
            (program, Some(session))
        }
        _ => (cadence, None),
    };

    write_pcm(io, PcmCut { tx: true, rx: true })?;
    line.sequencer.start(io, program)?;
    if session.is_some() {
        line.cid_message = None;
    }
    line.drive = DriveState::Ringing;
    line.operation = Operation::Ringing { cid: session };
    Ok(())
}

fn start_park<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
) -> Result<(), VpError> {
    let ticks = |ms: u32| ms_to_ticks_with(ms, line.tick_ms);
    let mut program = ProgramBuilder::new(ProgramKind::Park);
    program
        .set_state(DriveState::Disconnect)
        .delay(ticks(line.options.park_disconnect_ms))
        .set_state(DriveState::Standby)
        .delay(ticks(line.options.park_standby_ms));
    program.repeat(0, 0)?;
    line.sequencer.start(io, program.build()?)?;
    line.drive = DriveState::Disconnect;
    line.operation = Operation::Parked;
    Ok(())
}

/// Subscriber answered during ringing: move to the configured exit state.
pub(crate) fn on_ring_trip<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    let exit = line.options.ring_trip_exit;
    debug!(channel = line.channel, exit = ?exit, "ring trip");
    submit(line, io, Request::LineState(exit), out)
}

#[cfg(test)]
mod tests {
    use super::{default_ring_cadence, enter};
    use crate::config::LineConfig;
    use crate::decoder::Instruction;
    use crate::line::{Activity, Line};
    use crate::registers::DeviceFamily;
    use crate::sim::SimDevice;
    use crate::state::{DriveState, LineState, PcmCut};
    use crate::transport::LineBus;

    fn line() -> Line {
        let mut line = Line::new(0, LineConfig::default(), 5);
        line.initialized = true;
        line
    }

    #[test]
    fn static_state_writes_drive_and_pcm_together() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        let mut line = line();
        {
            let mut io = LineBus::new(&mut sim, DeviceFamily::Vp880, 0);
            enter(&mut line, &mut io, LineState::Standby).expect("enter");
        }
        assert_eq!(line.state, LineState::Standby);
        assert_eq!(sim.drive_state(0), DriveState::Standby);
        assert_eq!(sim.pcm_control(0), DriveState::Standby.pcm_cut().bits());
        assert_eq!(line.activity(), Activity::Idle);
    }

    #[test]
    fn ringing_without_cadence_uses_the_continuous_stub() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        let mut line = line();
        {
            let mut io = LineBus::new(&mut sim, DeviceFamily::Vp880, 0);
            enter(&mut line, &mut io, LineState::Ringing).expect("enter");
        }
        assert_eq!(line.activity(), Activity::Ringing { cid: false });
        assert_eq!(
            line.program().map(|p| p.instructions().to_vec()),
            Some(default_ring_cadence().expect("valid").instructions().to_vec())
        );
        assert_eq!(sim.pcm_control(0), PcmCut { tx: true, rx: true }.bits());
        sim.tick();
        assert_eq!(sim.drive_state(0), DriveState::Ringing);
    }

    #[test]
    fn park_alternates_disconnect_and_standby() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        let mut line = line();
        line.options.park_disconnect_ms = 10;
        line.options.park_standby_ms = 20;
        {
            let mut io = LineBus::new(&mut sim, DeviceFamily::Vp880, 0);
            enter(&mut line, &mut io, LineState::Park).expect("enter");
        }
        let program = line.program().expect("parked").instructions().to_vec();
        assert_eq!(program[0], Instruction::SetState(DriveState::Disconnect));
        assert_eq!(program[2], Instruction::SetState(DriveState::Standby));
        assert_eq!(program[4], Instruction::Branch { target: 0, count: 0 });
        sim.tick();
        assert_eq!(sim.drive_state(0), DriveState::Disconnect);
        sim.run(2);
        assert_eq!(sim.drive_state(0), DriveState::Standby);
    }
}
