//! The device context: line arena, host API and event loop.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::cid::{CidBuffer, CID_BUFFER_BYTES};
use crate::config::{DeviceConfig, LineConfig, LineOption, OptionId, PulseMode, Termination};
use crate::dispatch::{
    classify, Classified, LineIndication, LoopParam, RawIndication, RequestKind, ResponseTable,
    ResultData,
};
use crate::encoding::GeneratorMask;
use crate::error::{TransportError, VpError};
use crate::event::{Event, EventKind, EventMask, ResponseHandle};
use crate::handlers::{self, metering, send_cid, send_signal, set_line_state, CidStart, Request};
use crate::line::{Line, Operation};
use crate::profile::{
    load_ring_cadence, CidProfile, ProfileLookup, ProfileRef, ProfileTable, ToneSetup,
};
use crate::program::Program;
use crate::registers::{
    DeviceFamily, MailboxCommand, INDICATION_WORDS, RESPONSE_HEADER_WORDS, RESPONSE_WORDS,
    TIMER_WORDS,
};
use crate::sequencer::send_mailbox;
use crate::signal::Signal;
use crate::state::LineState;
use crate::timing::{ms_to_ticks_with, Ticks};
use crate::transport::{LineBus, RegisterBus, RegisterTarget};

/// Words a low-level command may carry.
pub const MAX_LOW_LEVEL_WORDS: usize = RESPONSE_WORDS - RESPONSE_HEADER_WORDS;

/// One SLIC/SLAC device and the lines it drives.
///
/// Every operation is synchronous and non-blocking. Long-running work is
/// handed to the device's per-line sequencer; its progress comes back
/// through [`Device::poll_event`].
#[derive(Debug)]
pub struct Device<B: RegisterBus, P: ProfileLookup = ProfileTable> {
    bus: B,
    profiles: P,
    config: Option<DeviceConfig>,
    lines: Vec<Option<Line>>,
    responses: ResponseTable,
    deferred_raw: Option<RawIndication>,
    local_events: VecDeque<Event>,
}

impl<B: RegisterBus, P: ProfileLookup> Device<B, P> {
    /// Wraps a register bus and a profile store. Nothing is touched until
    /// [`Self::init_device`].
    pub fn new(bus: B, profiles: P) -> Self {
        Self {
            bus,
            profiles,
            config: None,
            lines: Vec::new(),
            responses: ResponseTable::new(),
            deferred_raw: None,
            local_events: VecDeque::new(),
        }
    }

    /// The register bus.
    pub const fn bus(&self) -> &B {
        &self.bus
    }

    /// The register bus, mutably. Test hosts drive their simulated device
    /// through this.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// The profile store.
    pub const fn profiles(&self) -> &P {
        &self.profiles
    }

    /// The profile store, mutably.
    pub fn profiles_mut(&mut self) -> &mut P {
        &mut self.profiles
    }

    /// Active configuration, once initialized.
    pub const fn config(&self) -> Option<&DeviceConfig> {
        self.config.as_ref()
    }

    /// A line created by [`Self::make_line`].
    pub fn line(&self, channel: u8) -> Option<&Line> {
        self.lines.get(usize::from(channel))?.as_ref()
    }

    /// Brings the device up with `config`, discarding every line, pending
    /// request and queued event.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] for an invalid configuration.
    pub fn init_device(&mut self, config: DeviceConfig) -> Result<(), VpError> {
        config.validate()?;
        self.lines = vec![None; usize::from(config.channel_count)];
        self.responses.clear();
        self.deferred_raw = None;
        self.local_events.clear();
        debug!(family = ?config.family, channels = config.channel_count, "device initialized");
        self.config = Some(config);
        Ok(())
    }

    /// Replaces the device-level event mask.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::NotInitialized`] before `init_device`.
    pub fn set_event_mask(&mut self, mask: EventMask) -> Result<(), VpError> {
        let config = self.config.as_mut().ok_or(VpError::NotInitialized)?;
        config.event_mask = mask;
        Ok(())
    }

    /// Creates the line object for `channel`. The line is unusable until
    /// [`Self::init_line`].
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`.
    /// - [`VpError::InvalidArgument`] for a channel out of range, an FXO
    ///   line on a family without FXO support, or an existing line.
    pub fn make_line(&mut self, channel: u8, config: LineConfig) -> Result<(), VpError> {
        let device = self.config.as_ref().ok_or(VpError::NotInitialized)?;
        if config.termination == Termination::Fxo && !device.family.supports_fxo() {
            return Err(VpError::InvalidArgument);
        }
        let tick_ms = device.tick_ms;
        let slot = self
            .lines
            .get_mut(usize::from(channel))
            .ok_or(VpError::InvalidArgument)?;
        if slot.is_some() {
            return Err(VpError::InvalidArgument);
        }
        *slot = Some(Line::new(channel, config, tick_ms));
        Ok(())
    }

    /// Resets a line to its idle state: stops any program, drops staged
    /// ring and caller-ID setup, and writes the idle drive state. Queues
    /// `LineInitComplete`.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device` or `make_line`.
    /// - Transport and mailbox errors from the idle writes.
    pub fn init_line(&mut self, channel: u8) -> Result<(), VpError> {
        let family = self.family()?;
        let line = self
            .lines
            .get_mut(usize::from(channel))
            .ok_or(VpError::InvalidArgument)?
            .as_mut()
            .ok_or(VpError::NotInitialized)?;
        let mut io = LineBus::new(&mut self.bus, family, channel);

        if line.sequencer.is_active() {
            handlers::stop_operation(line, &mut io)?;
        }
        let idle = line.idle_state().static_drive().unwrap_or_default();
        handlers::write_drive(line, &mut io, idle)?;
        handlers::write_generators(&mut io, GeneratorMask::NONE)?;
        handlers::fsk_enable(&mut io, false)?;
        line.reset();
        line.initialized = true;
        debug!(channel, termination = ?line.termination, "line initialized");
        self.local_events
            .push_back(Event::line(EventKind::LineInitComplete, channel));
        Ok(())
    }

    /// Moves the line to `state`.
    ///
    /// Static states are written at once when the sequencer is idle.
    /// `Ringing` and `Park` start programs. While a program runs, it is
    /// stopped and the request is entered once the stop completes; a later
    /// request replaces an earlier one still waiting.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] for a state the termination cannot use.
    /// - Profile, mailbox and transport errors from an immediate entry.
    pub fn set_line_state(&mut self, channel: u8, state: LineState) -> Result<(), VpError> {
        let (line, mut io) = self.line_io(channel)?;
        if !state.valid_for(line.termination) {
            return Err(VpError::InvalidArgument);
        }
        let mut out = Vec::new();
        let result = handlers::submit(line, &mut io, Request::LineState(state), &mut out);
        self.local_events.extend(out);
        result
    }

    /// Generates a one-shot line signal.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] when the signal does not apply to the
    ///   line or a parameter is out of range.
    /// - Mailbox and transport errors from an immediate entry.
    pub fn send_signal(&mut self, channel: u8, signal: Signal) -> Result<(), VpError> {
        let (line, mut io) = self.line_io(channel)?;
        let request = send_signal::build(line, signal)?;
        let mut out = Vec::new();
        let result = handlers::submit(line, &mut io, Request::Signal(request), &mut out);
        self.local_events.extend(out);
        result
    }

    /// Transmits caller ID outside a ring cadence using the profile's
    /// envelope program.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] on an FXO line, or for a message that
    ///   is empty, too long, or not dialable in a DTMF profile.
    /// - Profile, mailbox and transport errors.
    pub fn send_cid(
        &mut self,
        channel: u8,
        message: &[u8],
        profile: ProfileRef,
    ) -> Result<(), VpError> {
        if self.initialized_line(channel)?.termination != Termination::Fxs {
            return Err(VpError::InvalidArgument);
        }
        let profile = CidProfile::load(&self.profiles, profile)?;
        send_cid::validate_message(profile.params.mode, message)?;
        let buffer = CidBuffer::new(message)?;
        let (line, mut io) = self.line_io(channel)?;
        let mut out = Vec::new();
        let result = handlers::submit(
            line,
            &mut io,
            Request::Cid(CidStart { profile, buffer }),
            &mut out,
        );
        self.local_events.extend(out);
        result
    }

    /// Queues more caller-ID message bytes, typically after
    /// `CidNeedMoreData`.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] when no transmission is running, the
    ///   checksum was already sent, or the bytes do not fit.
    pub fn continue_cid(&mut self, channel: u8, bytes: &[u8]) -> Result<(), VpError> {
        let (line, _) = self.line_io(channel)?;
        send_cid::continue_cid(line, bytes)
    }

    /// Plays a tone, optionally under a cadence. `None` silences the
    /// generators.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] for a cadence without a tone.
    /// - Profile, mailbox and transport errors.
    pub fn set_line_tone(
        &mut self,
        channel: u8,
        tone: Option<ProfileRef>,
        cadence: Option<ProfileRef>,
    ) -> Result<(), VpError> {
        self.initialized_line(channel)?;
        let setup = match tone {
            Some(tone) => ToneSetup::load(&self.profiles, tone, cadence)?,
            None if cadence.is_some() => return Err(VpError::InvalidArgument),
            None => ToneSetup::off(),
        };
        let (line, mut io) = self.line_io(channel)?;
        let mut out = Vec::new();
        let result = handlers::submit(line, &mut io, Request::Tone(setup), &mut out);
        self.local_events.extend(out);
        result
    }

    /// Stages the ring cadence and the caller-ID profile used by the next
    /// `set_line_state(Ringing)`. `None` clears the corresponding setting.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] on an FXO line.
    /// - Profile errors, including [`crate::ProfileError::TooLong`] when the
    ///   caller-ID program cannot be spliced into the cadence.
    pub fn init_ring(
        &mut self,
        channel: u8,
        cadence: Option<ProfileRef>,
        cid: Option<ProfileRef>,
    ) -> Result<(), VpError> {
        if self.initialized_line(channel)?.termination != Termination::Fxs {
            return Err(VpError::InvalidArgument);
        }
        let cadence = cadence
            .map(|reference| load_ring_cadence(&self.profiles, reference))
            .transpose()?;
        let cid = cid
            .map(|reference| CidProfile::load(&self.profiles, reference))
            .transpose()?;
        if let Some(profile) = &cid {
            let ring = match &cadence {
                Some(cadence) => cadence.clone(),
                None => set_line_state::default_ring_cadence()?,
            };
            Program::splice_cid(&ring, &profile.program)?;
        }
        let (line, _) = self.line_io(channel)?;
        line.ring.cadence = cadence;
        line.ring.cid = cid;
        Ok(())
    }

    /// Stages the caller-ID message sent during the next ring cadence.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] for an empty or oversized message, or
    ///   one not dialable under a staged DTMF profile.
    pub fn init_cid(&mut self, channel: u8, message: &[u8]) -> Result<(), VpError> {
        let (line, _) = self.line_io(channel)?;
        if message.is_empty() || message.len() > CID_BUFFER_BYTES {
            return Err(VpError::InvalidArgument);
        }
        if let Some(profile) = &line.ring.cid {
            send_cid::validate_message(profile.params.mode, message)?;
        }
        line.cid_message = Some(message.to_vec());
        Ok(())
    }

    /// Applies one line option.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] for an out-of-range value.
    pub fn set_option(&mut self, channel: u8, option: LineOption) -> Result<(), VpError> {
        let (line, _) = self.line_io(channel)?;
        let termination = line.termination;
        line.options.apply(termination, option)?;
        debug!(channel, option = ?option.id(), "option applied");
        Ok(())
    }

    /// Requests an option read. The value is fetched with
    /// [`Self::get_results`] after the `OptionRead` event.
    ///
    /// Option values live in the host-side line object. The device echoes
    /// the option id through the mailbox, which orders the read after every
    /// command already queued for the line; the echoed id is checked before
    /// the current value is returned.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::DeviceBusy`] when every response slot is in use.
    /// - [`VpError::MailboxBusy`] and transport errors from the request.
    pub fn get_option(&mut self, channel: u8, id: OptionId) -> Result<ResponseHandle, VpError> {
        self.send_request(channel, RequestKind::Option(id), &[u16::from(id.as_u8())])
    }

    /// Requests a loop measurement, answered by a `LoopCondition` event.
    ///
    /// # Errors
    ///
    /// As [`Self::get_option`].
    pub fn get_loop_condition(
        &mut self,
        channel: u8,
        param: LoopParam,
    ) -> Result<ResponseHandle, VpError> {
        self.send_request(
            channel,
            RequestKind::LoopCondition(param),
            &[u16::from(param.as_u8())],
        )
    }

    /// Passes raw words to the device, answered by a `LowLevelCmd` event.
    ///
    /// # Errors
    ///
    /// [`VpError::InvalidArgument`] for an empty command or one longer than
    /// [`MAX_LOW_LEVEL_WORDS`]; otherwise as [`Self::get_option`].
    pub fn low_level_cmd(&mut self, channel: u8, words: &[u16]) -> Result<ResponseHandle, VpError> {
        self.initialized_line(channel)?;
        if words.is_empty() || words.len() > MAX_LOW_LEVEL_WORDS {
            return Err(VpError::InvalidArgument);
        }
        self.send_request(channel, RequestKind::LowLevel, words)
    }

    /// Starts a burst of `count` metering pulses on a line in a state that
    /// supports metering.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] for a zero count or duration, or a
    ///   line state without metering support.
    /// - Mailbox and transport errors from an immediate entry.
    pub fn start_meter(
        &mut self,
        channel: u8,
        on_ms: u32,
        off_ms: u32,
        count: u16,
    ) -> Result<(), VpError> {
        let (line, mut io) = self.line_io(channel)?;
        let program = metering::build(line, on_ms, off_ms, count)?;
        let mut out = Vec::new();
        let result = handlers::submit(line, &mut io, Request::Meter(program), &mut out);
        self.local_events.extend(out);
        result
    }

    /// Arms the line timer. `TimerExpired { handle }` follows after `ms`.
    /// Re-arming replaces the previous timer.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`/`init_line`.
    /// - [`VpError::InvalidArgument`] for a zero duration.
    /// - Transport errors from the timer write.
    pub fn start_timer(&mut self, channel: u8, ms: u32, handle: u16) -> Result<(), VpError> {
        let (line, mut io) = self.line_io(channel)?;
        let Ticks::Count(ticks) = ms_to_ticks_with(ms, line.tick_ms) else {
            return Err(VpError::InvalidArgument);
        };
        let ticks = u16::try_from(ticks).unwrap_or(u16::MAX);
        let offset = io.map().timer;
        let words: [u16; TIMER_WORDS] = [ticks, handle];
        io.write(offset, &words)?;
        line.timer_handle = Some(handle);
        Ok(())
    }

    /// Returns the next event, or `None` when nothing is pending.
    ///
    /// Queued local events are delivered first. Then lines whose deferred
    /// request has become ready are entered, and finally raw indications
    /// are read and decoded until one produces a deliverable event or the
    /// indication register reads empty, so `None` means the device is
    /// drained. A handler that meets a busy bus leaves its indication
    /// queued and the call returns `None`.
    pub fn poll_event(&mut self) -> Option<Event> {
        let family = self.config.as_ref()?.family;
        loop {
            if let Some(event) = self.local_events.pop_front() {
                if self.delivers(&event) {
                    return Some(event);
                }
                if let Some(handle) = event.request {
                    if let Err(error) = self.discard_response(family, handle) {
                        warn!(handle = handle.0, %error, "masked response not cleared");
                        return Some(Event::device(EventKind::BusFault).with_status(Err(error)));
                    }
                }
                continue;
            }
            if self.service_lines(family) {
                continue;
            }

            let raw = match self.deferred_raw.take() {
                Some(raw) => raw,
                None => match self.read_indication(family) {
                    Ok(Some(raw)) => raw,
                    Ok(None) => return None,
                    Err(error) => {
                        warn!(%error, "indication read failed");
                        return Some(Event::device(EventKind::BusFault).with_status(Err(error)));
                    }
                },
            };

            let mut out = Vec::new();
            match self.handle_raw(family, raw, &mut out) {
                Ok(()) => self.local_events.extend(out),
                Err(error) if error.is_retryable() => {
                    debug!(id = raw.id, param = raw.param, %error, "indication requeued");
                    self.deferred_raw = Some(raw);
                    return None;
                }
                Err(error) => {
                    warn!(id = raw.id, param = raw.param, %error, "indication handler failed");
                    let event = match raw_channel(raw) {
                        Some(channel) => Event::line(EventKind::BusFault, channel),
                        None => Event::device(EventKind::BusFault),
                    };
                    return Some(event.with_status(Err(error)));
                }
            }
        }
    }

    /// Clears the response region when it still holds `handle`'s answer, so
    /// a late reply to a dropped request cannot block later ones.
    fn clear_stale_response(
        &mut self,
        family: DeviceFamily,
        handle: ResponseHandle,
    ) -> Result<(), VpError> {
        let base = family.map().response;
        let header = self
            .bus
            .read_register(RegisterTarget::Device, base, RESPONSE_HEADER_WORDS)?;
        if let [command, owner, ..] = header[..] {
            if command != 0 && owner == u16::from(handle.0) {
                self.bus.write_word(RegisterTarget::Device, base, 0)?;
            }
        }
        Ok(())
    }

    /// Frees a masked response: the slot is released and its answer cleared
    /// from the response region so the device can publish the next one.
    fn discard_response(
        &mut self,
        family: DeviceFamily,
        handle: ResponseHandle,
    ) -> Result<(), VpError> {
        self.responses.release(handle);
        self.clear_stale_response(family, handle)?;
        debug!(handle = handle.0, "masked response discarded");
        Ok(())
    }

    /// Fetches the data announced by a response-category event.
    ///
    /// # Errors
    ///
    /// - [`VpError::NotInitialized`] before `init_device`.
    /// - [`VpError::InvalidArgument`] for an event without a request handle.
    /// - [`VpError::MailboxEmpty`] when the request has no response yet or
    ///   its results were already fetched.
    /// - [`VpError::MailboxDataMismatch`] when the response region holds a
    ///   different request's answer, or an option answer names another
    ///   option; the request is dropped.
    pub fn get_results(&mut self, event: &Event) -> Result<ResultData, VpError> {
        let family = self.family()?;
        let handle = event.request.ok_or(VpError::InvalidArgument)?;
        let (kind, channel) = self.responses.answered(handle)?;

        let map = family.map();
        let words = self
            .bus
            .read_register(RegisterTarget::Device, map.response, RESPONSE_WORDS)?;
        let [command, response_handle, len, ..] = words[..] else {
            return Err(VpError::MailboxEmpty);
        };
        if command == 0 {
            return Err(VpError::MailboxEmpty);
        }
        if MailboxCommand::from_u16(command) != Some(kind.command())
            || response_handle != u16::from(handle.0)
        {
            warn!(handle = handle.0, command, response_handle, "response belongs to another request");
            self.responses.release(handle);
            return Err(VpError::MailboxDataMismatch);
        }
        let len = usize::from(len).min(RESPONSE_WORDS - RESPONSE_HEADER_WORDS);
        let data = &words[RESPONSE_HEADER_WORDS..RESPONSE_HEADER_WORDS + len];

        let result = match kind {
            RequestKind::LoopCondition(param) => ResultData::LoopCondition {
                param,
                value: data.first().copied().ok_or(VpError::MailboxDataMismatch)?,
            },
            RequestKind::Option(id) => {
                let echoed = data.first().and_then(|&word| u8::try_from(word).ok());
                if echoed.and_then(OptionId::from_u8) != Some(id) {
                    warn!(handle = handle.0, ?echoed, "option response names another option");
                    self.responses.release(handle);
                    self.bus.write_word(RegisterTarget::Device, map.response, 0)?;
                    return Err(VpError::MailboxDataMismatch);
                }
                let line = self.line(channel).ok_or(VpError::NotInitialized)?;
                ResultData::Option(line.options.get(id))
            }
            RequestKind::LowLevel => ResultData::LowLevel(data.to_vec()),
        };
        self.bus.write_word(RegisterTarget::Device, map.response, 0)?;
        self.responses.release(handle);
        Ok(result)
    }

    fn family(&self) -> Result<DeviceFamily, VpError> {
        self.config
            .as_ref()
            .map(|config| config.family)
            .ok_or(VpError::NotInitialized)
    }

    fn initialized_line(&self, channel: u8) -> Result<&Line, VpError> {
        self.family()?;
        let slot = self
            .lines
            .get(usize::from(channel))
            .ok_or(VpError::InvalidArgument)?;
        match slot {
            Some(line) if line.initialized => Ok(line),
            _ => Err(VpError::NotInitialized),
        }
    }

    fn line_io(&mut self, channel: u8) -> Result<(&mut Line, LineBus<'_, B>), VpError> {
        let family = self.family()?;
        let line = self
            .lines
            .get_mut(usize::from(channel))
            .ok_or(VpError::InvalidArgument)?
            .as_mut()
            .filter(|line| line.initialized)
            .ok_or(VpError::NotInitialized)?;
        Ok((line, LineBus::new(&mut self.bus, family, channel)))
    }

    fn send_request(
        &mut self,
        channel: u8,
        kind: RequestKind,
        payload: &[u16],
    ) -> Result<ResponseHandle, VpError> {
        let family = self.family()?;
        self.initialized_line(channel)?;
        let handle = self.responses.allocate(kind, channel)?;
        let mut io = LineBus::new(&mut self.bus, family, channel);
        if let Err(error) = send_mailbox(&mut io, kind.command(), handle.0, payload) {
            self.responses.release(handle);
            return Err(error);
        }
        debug!(channel, handle = handle.0, ?kind, "request sent");
        Ok(handle)
    }

    fn delivers(&self, event: &Event) -> bool {
        let mask = match event.channel.and_then(|channel| self.line(channel)) {
            Some(line) => line.options.event_mask,
            None => self
                .config
                .as_ref()
                .map_or_else(EventMask::default, |config| config.event_mask),
        };
        mask.delivers(event.kind)
    }

    /// Enters ready deferred requests. Returns true when events were queued.
    fn service_lines(&mut self, family: DeviceFamily) -> bool {
        let mut out = Vec::new();
        for line in self.lines.iter_mut().flatten() {
            if line.pending.is_none() || !handlers::is_ready(line) {
                continue;
            }
            let channel = line.channel;
            let mut io = LineBus::new(&mut self.bus, family, channel);
            match handlers::service(line, &mut io, &mut out) {
                Ok(()) => {}
                Err(error) if error.is_retryable() => {
                    debug!(channel, %error, "deferred request still blocked");
                }
                Err(error) => {
                    warn!(channel, %error, "deferred request failed");
                    out.push(Event::line(EventKind::BusFault, channel).with_status(Err(error)));
                }
            }
        }
        let queued = !out.is_empty();
        self.local_events.extend(out);
        queued
    }

    fn read_indication(
        &mut self,
        family: DeviceFamily,
    ) -> Result<Option<RawIndication>, VpError> {
        let words = self.bus.read_register(
            RegisterTarget::Device,
            family.map().indication,
            INDICATION_WORDS,
        )?;
        match words[..] {
            [0, ..] | [] => Ok(None),
            [id, param, ..] => Ok(Some(RawIndication { id, param })),
            [_] => Err(VpError::Transport(TransportError::Desync)),
        }
    }

    fn handle_raw(
        &mut self,
        family: DeviceFamily,
        raw: RawIndication,
        out: &mut Vec<Event>,
    ) -> Result<(), VpError> {
        match classify(raw) {
            Classified::SystemFault { kind, remaining } => {
                if remaining != 0 {
                    self.deferred_raw = Some(RawIndication {
                        id: raw.id,
                        param: remaining,
                    });
                }
                out.push(Event::device(kind));
            }
            Classified::Marker { channel, marker } => {
                let Some((line, mut io)) = self.line_for_indication(family, channel) else {
                    return Ok(());
                };
                handlers::on_marker(line, &mut io, marker, out)?;
            }
            Classified::Line {
                channel,
                indication,
            } => self.handle_line(family, channel, indication, out)?,
            Classified::Response(handle) => match self.responses.answer(handle) {
                Some(event) => out.push(event),
                None => {
                    warn!(handle = handle.0, "response for an unknown request");
                    self.clear_stale_response(family, handle)?;
                }
            },
            Classified::Unknown => warn!(id = raw.id, param = raw.param, "unknown indication"),
        }
        Ok(())
    }

    fn handle_line(
        &mut self,
        family: DeviceFamily,
        channel: u8,
        indication: LineIndication,
        out: &mut Vec<Event>,
    ) -> Result<(), VpError> {
        let Some((line, mut io)) = self.line_for_indication(family, channel) else {
            return Ok(());
        };
        let io = &mut io;
        match indication {
            LineIndication::HookOff | LineIndication::HookOn => {
                let off_hook = indication == LineIndication::HookOff;
                if line.hook_masked {
                    line.off_hook = off_hook;
                    return Ok(());
                }
                if off_hook && matches!(line.operation, Operation::Ringing { .. }) {
                    set_line_state::on_ring_trip(line, io, out)?;
                } else if handlers::in_mwi_signal(line) {
                    handlers::stop_operation(line, io)?;
                }
                line.off_hook = off_hook;
                let kind = if off_hook {
                    EventKind::HookOff
                } else {
                    EventKind::HookOn
                };
                out.push(Event::line(kind, channel));
            }
            LineIndication::HookFlash => {
                if !line.hook_masked {
                    out.push(Event::line(EventKind::HookFlash, channel));
                }
            }
            LineIndication::Digit(digit) => {
                if !send_cid::on_digit(line, io, digit)? {
                    out.push(Event::line(
                        EventKind::Digit {
                            digit,
                            pulse: false,
                        },
                        channel,
                    ));
                }
            }
            LineIndication::PulseDigit(digit) => {
                if line.options.pulse_mode == PulseMode::Decode {
                    out.push(Event::line(EventKind::Digit { digit, pulse: true }, channel));
                }
            }
            LineIndication::SequenceComplete => handlers::on_sequence_complete(line, io, out)?,
            LineIndication::MeterAbortComplete => metering::on_abort_complete(line),
            LineIndication::FskBufferEmpty(index) => send_cid::on_fsk_empty(line, io, index, out)?,
            LineIndication::CidTxComplete => send_cid::on_tx_complete(line, io, out)?,
            LineIndication::TimerComplete => match line.timer_handle.take() {
                Some(handle) => out.push(Event::line(EventKind::TimerExpired { handle }, channel)),
                None => warn!(channel, "timer expired with no timer armed"),
            },
            LineIndication::Fault(bits) => out.push(Event::line(
                EventKind::LineFault {
                    bits: u16::from(bits),
                },
                channel,
            )),
        }
        Ok(())
    }

    fn line_for_indication(
        &mut self,
        family: DeviceFamily,
        channel: u8,
    ) -> Option<(&mut Line, LineBus<'_, B>)> {
        let Some(line) = self
            .lines
            .get_mut(usize::from(channel))
            .and_then(Option::as_mut)
        else {
            warn!(channel, "indication for a line that does not exist");
            return None;
        };
        Some((line, LineBus::new(&mut self.bus, family, channel)))
    }
}

fn raw_channel(raw: RawIndication) -> Option<u8> {
    match classify(raw) {
        Classified::Marker { channel, .. } | Classified::Line { channel, .. } => Some(channel),
        Classified::SystemFault { .. } | Classified::Response(_) | Classified::Unknown => None,
    }
}

impl<B: RegisterBus> Device<B, ProfileTable> {
    /// Wraps a register bus with an empty in-memory profile table.
    pub fn with_bus(bus: B) -> Self {
        Self::new(bus, ProfileTable::new())
    }
}
