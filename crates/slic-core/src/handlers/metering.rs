//! `start_meter`: metering bursts and the meter-abort handshake.

use tracing::{debug, warn};

use crate::error::VpError;
use crate::line::{Line, Operation};
use crate::program::{Program, ProgramBuilder, ProgramKind};
use crate::registers::METER_ABORT_BIT;
use crate::timing::{ms_to_ticks_with, Ticks};
use crate::transport::{LineBus, RegisterBus};

/// Builds a burst of `count` pulses while holding the current drive state.
pub(crate) fn build(line: &Line, on_ms: u32, off_ms: u32, count: u16) -> Result<Program, VpError> {
    if !line.state.supports_metering() || count == 0 {
        return Err(VpError::InvalidArgument);
    }
    let ticks = |ms: u32| match ms_to_ticks_with(ms, line.tick_ms) {
        Ticks::Forever => Err(VpError::InvalidArgument),
        finite @ Ticks::Count(_) => Ok(finite),
    };
    let (on, off) = (ticks(on_ms)?, ticks(off_ms)?);

    let mut program = ProgramBuilder::new(ProgramKind::MeteringBurst);
    program.set_state(line.drive);
    let body = program.position();
    program.metering(true).delay(on).metering(false).delay(off);
    program.repeat(body, count)?;
    program.build()
}

pub(crate) fn enter<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    program: Program,
) -> Result<(), VpError> {
    line.sequencer.start(io, program)?;
    line.meter_on = true;
    line.operation = Operation::Metering;
    Ok(())
}

/// Asks the device to stop metering; completion arrives as an indication.
pub(crate) fn request_abort<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
) -> Result<(), VpError> {
    let offset = io.map().meter_control;
    io.write_word(offset, METER_ABORT_BIT)?;
    line.meter_abort_outstanding = true;
    debug!(channel = line.channel, "meter abort requested");
    Ok(())
}

pub(crate) fn on_abort_complete(line: &mut Line) {
    if !line.meter_abort_outstanding {
        warn!(channel = line.channel, "meter abort complete without a request");
    }
    line.meter_abort_outstanding = false;
    line.meter_on = false;
}
