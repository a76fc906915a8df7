//! Caller-ID transmission: FSK buffer refills, DTMF digit feeding and the
//! acknowledge window.
//!
//! FSK data moves through the two hardware buffers in strict alternation.
//! Entry primes both with message data; every buffer-empty indication
//! refills the buffer that drained. Once the queue is exhausted the next
//! refill carries the checksum with end-of-message set, and the device's
//! transmit-complete indication releases the envelope program.

use tracing::{debug, warn};

use crate::cid::{fsk_buffer_words, CidBuffer};
use crate::encoding::SequenceControl;
use crate::error::VpError;
use crate::event::{Event, EventKind};
use crate::line::{Line, Operation};
use crate::profile::{CidMode, CidParams, CidProfile};
use crate::registers::{FSK_BUFFER_BYTES, GEN_A_FREQ, GEN_B_FREQ};
use crate::signal::Digit;
use crate::transport::{LineBus, RegisterBus};

use super::{fsk_enable, stop_operation, write_generator_params};

/// A stand-alone caller-ID request.
#[derive(Debug, Clone)]
pub(crate) struct CidStart {
    pub(crate) profile: CidProfile,
    pub(crate) buffer: CidBuffer,
}

/// Where a caller-ID transmission stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CidPhase {
    /// Message data is flowing.
    Transmitting,
    /// The acknowledge window is open.
    AwaitingAck,
    /// An acknowledge tone arrived inside the window.
    Acknowledged,
    /// The checksum is queued; waiting for transmit-complete.
    WaitingChecksum,
    /// Transmission finished or was abandoned.
    Done,
}

/// Transmit state of one caller-ID operation.
#[derive(Debug, Clone)]
pub(crate) struct CidSession {
    params: CidParams,
    buffer: CidBuffer,
    phase: CidPhase,
    next_hw: usize,
    loaded: [bool; 2],
}

impl CidSession {
    fn new(params: CidParams, buffer: CidBuffer) -> Self {
        Self {
            params,
            buffer,
            phase: CidPhase::Transmitting,
            next_hw: 0,
            loaded: [false; 2],
        }
    }

    pub(crate) const fn phase(&self) -> CidPhase {
        self.phase
    }

    /// Queues `NeedMoreData` once per drained half-buffer.
    pub(crate) fn report_drains(&mut self, channel: u8, out: &mut Vec<Event>) {
        for _ in 0..self.buffer.take_drains() {
            out.push(Event::line(EventKind::CidNeedMoreData, channel));
        }
    }

    /// Writes the next chunk into the hardware buffer whose turn it is.
    /// While priming, an exhausted queue writes nothing; afterwards it
    /// writes the checksum.
    fn fill_next<B: RegisterBus + ?Sized>(
        &mut self,
        io: &mut LineBus<'_, B>,
        priming: bool,
    ) -> Result<bool, VpError> {
        let slot = self.next_hw;
        if self.loaded[slot] || self.buffer.is_sealed() {
            return Ok(false);
        }
        let (words, consumed, last) = if !self.buffer.is_exhausted() {
            let chunk = self.buffer.peek(FSK_BUFFER_BYTES);
            (fsk_buffer_words(chunk, false), chunk.len(), false)
        } else if priming {
            return Ok(false);
        } else {
            (fsk_buffer_words(&[self.buffer.checksum()], true), 0, true)
        };
        let offset = io.map().fsk_buffers[slot];
        io.write(offset, &words)?;

        self.buffer.consume(consumed);
        if last {
            self.buffer.seal();
            self.phase = CidPhase::WaitingChecksum;
        }
        self.loaded[slot] = true;
        self.next_hw = 1 - slot;
        Ok(true)
    }

    fn finish(&mut self) {
        self.phase = CidPhase::Done;
        self.buffer.seal();
    }
}

/// Rejects message bytes the profile's modulation cannot carry.
pub(crate) fn validate_message(mode: CidMode, bytes: &[u8]) -> Result<(), VpError> {
    if mode == CidMode::Dtmf && !bytes.iter().all(|b| Digit::from_char(char::from(*b)).is_some()) {
        return Err(VpError::InvalidArgument);
    }
    Ok(())
}

/// Applies a caller-ID profile's generator setup and primes the FSK
/// buffers. The caller starts the envelope program afterwards.
pub(crate) fn prepare<B: RegisterBus + ?Sized>(
    io: &mut LineBus<'_, B>,
    profile: &CidProfile,
    buffer: CidBuffer,
) -> Result<CidSession, VpError> {
    let mut session = CidSession::new(profile.params, buffer);
    write_generator_params(io, &profile.registers)?;
    if profile.params.mode == CidMode::Fsk {
        fsk_enable(io, true)?;
        for _ in 0..2 {
            session.fill_next(io, true)?;
        }
    }
    Ok(session)
}

pub(crate) fn enter<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    start: CidStart,
) -> Result<(), VpError> {
    let session = prepare(io, &start.profile, start.buffer)?;
    line.sequencer.start(io, start.profile.program)?;
    debug!(channel = line.channel, mode = ?session.params.mode, "caller ID started");
    line.operation = Operation::CallerId(session);
    Ok(())
}

/// Appends message bytes for the running transmission.
pub(crate) fn continue_cid(line: &mut Line, bytes: &[u8]) -> Result<(), VpError> {
    let session = line.operation.cid_session().ok_or(VpError::InvalidArgument)?;
    if matches!(session.phase, CidPhase::WaitingChecksum | CidPhase::Done) {
        return Err(VpError::InvalidArgument);
    }
    validate_message(session.params.mode, bytes)?;
    session.buffer.extend(bytes)
}

/// Refills hardware FSK buffer `index` after the device drained it.
pub(crate) fn on_fsk_empty<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    index: usize,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    let channel = line.channel;
    let Some(session) = line.operation.cid_session() else {
        warn!(channel, index, "FSK buffer empty with no caller ID running");
        return Ok(());
    };
    if session.params.mode != CidMode::Fsk || index > 1 {
        warn!(channel, index, "unexpected FSK buffer empty");
        return Ok(());
    }
    session.loaded[index] = false;
    session.fill_next(io, false)?;
    session.report_drains(channel, out);
    Ok(())
}

/// The device finished sending the checksum: release the envelope.
pub(crate) fn on_tx_complete<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    let channel = line.channel;
    let Some(session) = line.operation.cid_session() else {
        warn!(channel, "caller-ID transmit complete with no caller ID running");
        return Ok(());
    };
    if session.phase == CidPhase::Done {
        return Ok(());
    }
    fsk_enable(io, false)?;
    line.sequencer.control(io, SequenceControl::Resume)?;
    session.finish();
    finish_ringing_cid(line);
    debug!(channel, "caller ID transmitted");
    out.push(Event::line(EventKind::CidTransmitDone, channel));
    Ok(())
}

/// DTMF caller ID: play the next message digit, or leave the digit loop
/// when the queue is exhausted.
pub(crate) fn on_digit_marker<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    let channel = line.channel;
    let Some(session) = line.operation.cid_session() else {
        warn!(channel, "caller-ID digit marker with no caller ID running");
        return Ok(());
    };
    if session.params.mode != CidMode::Dtmf {
        warn!(channel, "caller-ID digit marker in an FSK profile");
        return Ok(());
    }
    if let Some(&byte) = session.buffer.peek(1).first() {
        let digit = Digit::from_char(char::from(byte)).ok_or(VpError::InvalidArgument)?;
        let (row, column) = digit.dtmf_words();
        write_generator_params(io, &[(gen_offset(GEN_A_FREQ), row), (gen_offset(GEN_B_FREQ), column)])?;
        session.buffer.consume(1);
        session.report_drains(channel, out);
        return Ok(());
    }
    line.sequencer.control(io, SequenceControl::Break)?;
    session.finish();
    finish_ringing_cid(line);
    debug!(channel, "DTMF caller ID transmitted");
    out.push(Event::line(EventKind::CidTransmitDone, channel));
    Ok(())
}

pub(crate) fn on_ack_start(line: &mut Line) {
    if let Some(session) = line.operation.cid_session() {
        session.phase = CidPhase::AwaitingAck;
    }
}

/// Closes the acknowledge window. Without an acknowledge tone the
/// transmission is abandoned.
pub(crate) fn on_ack_end<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    out: &mut Vec<Event>,
) -> Result<(), VpError> {
    let channel = line.channel;
    let phase = match line.operation.cid_session() {
        Some(session) => session.phase,
        None => return Ok(()),
    };
    match phase {
        CidPhase::AwaitingAck => {
            stop_operation(line, io)?;
            if let Some(session) = line.operation.cid_session() {
                session.finish();
            }
            warn!(channel, "caller-ID acknowledge missing");
            out.push(Event::line(EventKind::CidAckMissing, channel));
        }
        CidPhase::Acknowledged => {
            if let Some(session) = line.operation.cid_session() {
                session.phase = CidPhase::Transmitting;
            }
        }
        CidPhase::Transmitting | CidPhase::WaitingChecksum | CidPhase::Done => {}
    }
    Ok(())
}

/// Consumes a detected digit that acknowledges caller ID. Returns true
/// when the digit was absorbed.
pub(crate) fn on_digit<B: RegisterBus + ?Sized>(
    line: &mut Line,
    io: &mut LineBus<'_, B>,
    digit: Digit,
) -> Result<bool, VpError> {
    let accepted = line
        .operation
        .cid_session()
        .is_some_and(|s| s.phase == CidPhase::AwaitingAck && s.params.accepts_ack(digit));
    if !accepted {
        return Ok(false);
    }
    line.sequencer.control(io, SequenceControl::Resume)?;
    if let Some(session) = line.operation.cid_session() {
        session.phase = CidPhase::Acknowledged;
    }
    debug!(channel = line.channel, ?digit, "caller-ID acknowledge received");
    Ok(true)
}

/// Drops the finished session from a ringing operation so the line reports
/// plain ringing.
fn finish_ringing_cid(line: &mut Line) {
    if let Operation::Ringing { cid } = &mut line.operation {
        *cid = None;
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn gen_offset(index: usize) -> u16 {
    index as u16
}
