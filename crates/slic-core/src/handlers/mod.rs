//! Per-operation handlers and the deferral gate in front of them.
//!
//! Every operation that needs the line's sequencer or meter passes through
//! [`submit`]. When both are idle the request is entered at once; otherwise
//! the running program is stopped, the request is parked in the line's
//! pending slot, and [`service`] enters it once the stop has been
//! acknowledged. A newer request replaces a parked one.
//!
//! Handlers issue their register writes before committing host-side state,
//! so a handler that fails with a busy transport can be re-run from the
//! same indication without doubling its effects.

pub(crate) mod metering;
pub(crate) mod send_cid;
pub(crate) mod send_signal;
pub(crate) mod set_line_state;
pub(crate) mod set_line_tone;

use tracing::{debug, warn};

use crate::encoding::{GeneratorMask, Marker};
use crate::error::{TransportError, VpError};
use crate::event::Event;
use crate::line::{Line, Operation};
use crate::profile::ToneSetup;
use crate::program::Program;
use crate::registers::FSK_ENABLE_BIT;
use crate::sequencer::Completion;
use crate::signal::SignalKind;
use crate::state::{DriveState, LineState, PcmCut};
use crate::transport::{LineBus, RegisterBus};

pub(crate) use self::send_cid::CidStart;
use self::send_signal::SignalRequest;

/// A sequencer-owning operation waiting to be entered.
#[derive(Debug, Clone)]
pub(crate) enum Request {
    LineState(LineState),
    Signal(SignalRequest),
    Cid(CidStart),
    Tone(ToneSetup),
    Meter(Program),
}

impl Request {
    const fn name(&self) -> &'static str {
        match self {
            Self::LineState(_) => "set_line_state",
            Self::Signal(_) => "send_signal",
            Self::Cid(_) => "send_cid",
            Self::Tone(_) => "set_line_tone",
            Self::Meter(_) => "start_meter",
        }
    }
}

/// Request parked until the line is ready.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub(crate) request: Request,
}

/// True when nothing on the line blocks entering a new request.
pub(crate) const fn is_ready(line: &Line) -> bool {
    !line.sequencer.is_active() && !line.meter_abort_outstanding
}

/// Enters `request` now, or stops the current operation and defers it.
pub(crate) fn submit<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    request: Request,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    let needs_meter_abort = line.meter_on
        && matches!(request, Request::LineState(target) if !target.supports_metering());

    if is_ready(line) && !needs_meter_abort {
        enter(line, io, request)?;
        line.pending = None;
        drain_cid_events(line, out);
        return Ok(());
    }

    stop_operation(line, io)?;
    if needs_meter_abort && !line.meter_abort_outstanding {
        metering::request_abort(line, io)?;
    }
    debug!(
        channel = line.channel,
        request = request.name(),
        replaced = line.pending.is_some(),
        "request deferred"
    );
    line.pending = Some(Pending { request });
    Ok(())
}

/// Enters the parked request once the line is ready.
///
/// A retryable failure leaves the request parked for the next attempt.
pub(crate) fn service<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    if !is_ready(line) {
        return Ok(());
    }
    let Some(pending) = line.pending.take() else {
        return Ok(());
    };
    debug!(
        channel = line.channel,
        request = pending.request.name(),
        "entering deferred request"
    );
    match enter(line, io, pending.request.clone()) {
        Ok(()) => {
            drain_cid_events(line, out);
            Ok(())
        }
        Err(error) => {
            if error.is_retryable() {
                line.pending = Some(pending);
            }
            Err(error)
        }
    }
}

fn enter<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    request: Request,
) -> Result<(), VpError> {
    match request {
        Request::LineState(target) => set_line_state::enter(line, io, target),
        Request::Signal(signal) => send_signal::enter(line, io, signal),
        Request::Cid(start) => send_cid::enter(line, io, start),
        Request::Tone(setup) => set_line_tone::enter(line, io, setup),
        Request::Meter(program) => metering::enter(line, io, program),
    }
}

/// Stops whatever owns the sequencer and undoes side effects that must not
/// outlive it: a raised message-waiting feed, running generators and the
/// FSK transmitter.
pub(crate) fn stop_operation<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
) -> Result<(), VpError> {
    if !line.sequencer.is_active() {
        return Ok(());
    }
    let was_aborting = line.sequencer.is_aborting();
    line.sequencer.abort(io)?;
    send_signal::restore_feed(line, io)?;
    if !was_aborting {
        write_generators(io, GeneratorMask::NONE)?;
        if line.operation.cid_session().is_some() {
            fsk_enable(io, false)?;
        }
    }
    Ok(())
}

/// Resolves a sequence-complete indication against the line's program.
pub(crate) fn on_sequence_complete<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    if line.sequencer.owns_next_completion() {
        send_signal::restore_feed(line, io)?;
    }
    let channel = line.channel;
    let (kind, aborted) = match line.sequencer.on_complete(channel) {
        Completion::Stale => return Ok(()),
        Completion::Finished(kind) => (kind, false),
        Completion::Aborted(kind) => (kind, true),
    };

    let operation = std::mem::take(&mut line.operation);
    if matches!(operation, Operation::Metering) {
        line.meter_on = false;
    }
    if !aborted && matches!(operation, Operation::Ringing { cid: Some(_) }) {
        warn!(channel, "ring cadence ended before caller ID finished");
    }
    debug!(channel, kind = ?kind, aborted, "sequence complete");

    if !aborted {
        if let Some(event) = kind.completion_event() {
            out.push(Event::line(event, channel));
        }
    }
    Ok(())
}

/// Applies one user-event marker raised by the running program.
pub(crate) fn on_marker<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    marker: Marker,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    let channel = line.channel;
    match marker {
        Marker::HOOK_MASK => line.hook_masked = true,
        Marker::HOOK_UNMASK => line.hook_masked = false,
        Marker::VOICE_MUTE => write_pcm(io, PcmCut { tx: true, rx: true })?,
        Marker::VOICE_UNMUTE => write_pcm(io, line.drive.pcm_cut())?,
        Marker::MWI_PULSE_ON => send_signal::raise_feed(line, io)?,
        Marker::MWI_PULSE_OFF => send_signal::restore_feed(line, io)?,
        Marker::CID_DIGIT => send_cid::on_digit_marker(line, io, out)?,
        Marker::CID_ACK_START => send_cid::on_ack_start(line),
        Marker::CID_ACK_END => send_cid::on_ack_end(line, io, out)?,
        Marker(other) => warn!(channel, marker = other, "unknown user event ignored"),
    }
    Ok(())
}

/// Forwards caller-ID buffer drains recorded during entry.
fn drain_cid_events(line: &mut Line, out: &mut Vec<Event>) {
    let channel = line.channel;
    if let Some(session) = line.operation.cid_session() {
        session.report_drains(channel, out);
    }
}

/// Writes a drive state and its PCM cut-off as one atomic pair.
pub(crate) fn write_drive<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    drive: DriveState,
) -> Result<(), VpError> {
    let map = io.map();
    let target = io.target();
    {
        let mut section = io.critical();
        section.write_word(target, map.drive_state, u16::from(drive.as_u4()))?;
        section.write_word(target, map.pcm_control, drive.pcm_cut().bits())?;
    }
    line.drive = drive;
    Ok(())
}

pub(crate) fn write_pcm<B: RegisterBus + ?Sized>(
    io: &mut LineBus<'_, B>,
    cut: PcmCut,
) -> Result<(), TransportError> {
    let offset = io.map().pcm_control;
    io.write_word(offset, cut.bits())
}

pub(crate) fn write_generators<B: RegisterBus + ?Sized>(
    io: &mut LineBus<'_, B>,
    mask: GeneratorMask,
) -> Result<(), TransportError> {
    let offset = io.map().generator_enable;
    io.write_word(offset, u16::from(mask.bits()))
}

/// Writes `(offset, value)` pairs into the generator parameter block.
pub(crate) fn write_generator_params<B: RegisterBus + ?Sized>(
    io: &mut LineBus<'_, B>,
    registers: &[(u16, u16)],
) -> Result<(), TransportError> {
    let base = io.map().generator_params;
    for &(offset, value) in registers {
        io.write_word(base + offset, value)?;
    }
    Ok(())
}

pub(crate) fn fsk_enable<B: RegisterBus + ?Sized>(
    io: &mut LineBus<'_, B>,
    on: bool,
) -> Result<(), TransportError> {
    let offset = io.map().fsk_control;
    io.write_word(offset, if on { FSK_ENABLE_BIT } else { 0 })
}

/// True while the line runs a message-waiting signal.
pub(crate) const fn in_mwi_signal(line: &Line) -> bool {
    matches!(line.operation, Operation::Signal(SignalKind::MessageWaiting))
}
