//! `send_signal`: one-shot line signals run as sequencer programs, and the
//! message-waiting DC feed swap driven by their markers.

use tracing::{debug, warn};

use crate::error::{TransportError, VpError};
use crate::line::{Line, Operation};
use crate::program::Program;
use crate::registers::{DC_FEED_WORDS, GEN_A_FREQ, GEN_B_FREQ};
use crate::signal::{Digit, Signal, SignalKind};
use crate::transport::{LineBus, RegisterBus};

use super::{in_mwi_signal, write_generator_params};

/// A validated signal program plus the DTMF pair it needs, if any.
#[derive(Debug, Clone)]
pub(crate) struct SignalRequest {
    kind: SignalKind,
    program: Program,
    dtmf: Option<Digit>,
}

/// Builds the program for `signal` from the line's current drive state.
pub(crate) fn build(line: &Line, signal: Signal) -> Result<SignalRequest, VpError> {
    let program = signal.build_program(line.termination, line.drive, &line.options, line.tick_ms)?;
    let dtmf = match signal {
        Signal::DtmfDigit(digit) => Some(digit),
        _ => None,
    };
    Ok(SignalRequest {
        kind: signal.kind(),
        program,
        dtmf,
    })
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn enter<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    request: SignalRequest,
) -> Result<(), VpError> {
    if let Some(digit) = request.dtmf {
        let (row, column) = digit.dtmf_words();
        write_generator_params(io, &[(GEN_A_FREQ as u16, row), (GEN_B_FREQ as u16, column)])?;
    }
    line.sequencer.start(io, request.program)?;
    line.operation = Operation::Signal(request.kind);
    Ok(())
}

/// Saves the DC feed and raises the open-circuit voltage for one
/// message-waiting pulse.
pub(crate) fn raise_feed<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
) -> Result<(), VpError> {
    if !in_mwi_signal(line) {
        warn!(channel = line.channel, "message-waiting pulse outside a message-waiting signal");
        return Ok(());
    }
    let offset = io.map().dc_feed;
    let saved = match line.mwi {
        Some(saved) => saved,
        None => {
            let words = io.read(offset, DC_FEED_WORDS)?;
            <[u16; DC_FEED_WORDS]>::try_from(words.as_slice())
                .map_err(|_| TransportError::Desync)?
        }
    };
    io.write_word(offset, line.options.mwi_voc)?;
    line.mwi = Some(saved);
    debug!(channel = line.channel, voc = line.options.mwi_voc, "message-waiting feed raised");
    Ok(())
}

/// Puts back a DC feed saved by [`raise_feed`]. No-op when none is saved.
pub(crate) fn restore_feed<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
) -> Result<(), VpError> {
    let Some(saved) = line.mwi else {
        return Ok(());
    };
    let offset = io.map().dc_feed;
    io.write(offset, &saved)?;
    line.mwi = None;
    debug!(channel = line.channel, "message-waiting feed restored");
    Ok(())
}
