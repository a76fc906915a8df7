//! `set_line_tone`: steady tones are plain register writes, cadenced tones
//! run as a sequencer program.

use tracing::debug;

use crate::error::VpError;
use crate::line::{Line, Operation};
use crate::profile::ToneSetup;
use crate::transport::{LineBus, RegisterBus};

use super::{write_generator_params, write_generators};

pub(crate) fn enter<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    setup: ToneSetup,
) -> Result<(), VpError> {
    write_generator_params(io, &setup.registers)?;
    match setup.cadence {
        Some(cadence) => {
            line.sequencer.start(io, cadence)?;
            line.operation = Operation::Tone;
            line.steady_tone = false;
        }
        None => {
            write_generators(io, setup.mask)?;
            line.operation = Operation::Idle;
            line.steady_tone = !setup.mask.is_empty();
        }
    }
    debug!(channel = line.channel, mask = setup.mask.bits(), "tone applied");
    Ok(())
}
