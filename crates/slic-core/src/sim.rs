//! Simulated device implementing [`RegisterBus`].
//!
//! Each line owns a register file and an [`Executor`]; the device space
//! holds the indication queue, the command mailbox and the response region.
//! Nothing advances on its own: [`SimDevice::tick`] moves every line one
//! sequencer tick forward and raises the indications that tick produced.

use std::collections::VecDeque;

use tracing::{trace, warn};

use crate::cid::fsk_buffer_bytes;
use crate::decoder::decode_words;
use crate::dispatch::{ids, LoopParam, RawIndication};
use crate::encoding::{decode_header, GeneratorMask, SequenceControl};
use crate::error::{TransportError, VpError};
use crate::registers::{
    DeviceFamily, MailboxCommand, RegisterMap, DC_FEED_WORDS, FSK_BUFFER_WORDS, FSK_ENABLE_BIT,
    GENERATOR_PARAM_WORDS, MAILBOX_HEADER_WORDS, METER_ABORT_BIT,
    RESPONSE_HEADER_WORDS, RESPONSE_WORDS, SEQUENCE_WORDS,
};
use crate::sequencer::{Effect, Executor};
use crate::signal::Digit;
use crate::state::DriveState;
use crate::transport::{RegisterBus, RegisterTarget};

/// Words in one line's register file.
pub const LINE_SPACE_WORDS: usize = 0x100;
/// Words in the device register file.
pub const DEVICE_SPACE_WORDS: usize = 0x200;

const DEFAULT_DC_FEED: [u16; DC_FEED_WORDS] = [0x0800, 0x0019];

#[derive(Debug, Clone)]
struct SimLine {
    registers: Vec<u16>,
    executor: Executor,
    metering: bool,
    fsk_next: usize,
    fsk_loaded: [bool; 2],
    timer: Option<u32>,
    wire: Vec<u8>,
    loop_condition: [u16; 3],
}

impl SimLine {
    fn new(map: &RegisterMap) -> Self {
        let mut registers = vec![0; LINE_SPACE_WORDS];
        let feed = usize::from(map.dc_feed);
        registers[feed..feed + DC_FEED_WORDS].copy_from_slice(&DEFAULT_DC_FEED);
        Self {
            registers,
            executor: Executor::new(),
            metering: false,
            fsk_next: 0,
            fsk_loaded: [false; 2],
            timer: None,
            wire: Vec::new(),
            loop_condition: [0; 3],
        }
    }

    fn word(&self, offset: u16) -> u16 {
        self.registers[usize::from(offset)]
    }
}

/// In-memory SLIC/SLAC device for tests and host bring-up.
#[derive(Debug, Clone)]
pub struct SimDevice {
    family: DeviceFamily,
    device: Vec<u16>,
    lines: Vec<SimLine>,
    indications: VecDeque<RawIndication>,
    responses: VecDeque<Vec<u16>>,
    mailbox_locked: bool,
    fail_next: Option<TransportError>,
    ticks: u64,
}

impl SimDevice {
    /// A powered-up device with `channels` idle lines.
    #[must_use]
    pub fn new(family: DeviceFamily, channels: u8) -> Self {
        let map = family.map();
        Self {
            family,
            device: vec![0; DEVICE_SPACE_WORDS],
            lines: (0..channels).map(|_| SimLine::new(map)).collect(),
            indications: VecDeque::new(),
            responses: VecDeque::new(),
            mailbox_locked: false,
            fail_next: None,
            ticks: 0,
        }
    }

    /// Chip family being simulated.
    #[must_use]
    pub const fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Ticks elapsed since creation.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Advances every line by one sequencer tick.
    pub fn tick(&mut self) {
        self.ticks += 1;
        let map = self.family.map();
        for channel in 0..self.lines.len() {
            let Ok(channel) = u8::try_from(channel) else {
                break;
            };
            self.step_sequencer(map, channel);
            self.clock_fsk(map, channel);
            self.count_timer(channel);
        }
        self.deliver_response(map);
    }

    /// Advances `ticks` ticks.
    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Queues a raw indication as if the device had raised it.
    pub fn inject(&mut self, id: u16, param: u16) {
        self.indications.push_back(RawIndication { id, param });
    }

    /// Changes the loop state seen by the device.
    pub fn set_hook(&mut self, channel: u8, off_hook: bool) {
        let id = if off_hook { ids::HOOK_OFF } else { ids::HOOK_ON };
        self.raise(RawIndication::line(id, channel, 0));
    }

    /// Reports a DTMF digit detected on `channel`.
    pub fn press_digit(&mut self, channel: u8, digit: Digit) {
        self.raise(RawIndication::line(ids::DIGIT, channel, digit.as_nibble()));
    }

    /// Holds the command mailbox on the device side.
    pub fn lock_mailbox(&mut self, locked: bool) {
        self.mailbox_locked = locked;
    }

    /// Fails the next register read or write with `error`.
    pub fn fail_next_access(&mut self, error: TransportError) {
        self.fail_next = Some(error);
    }

    /// Sets the value a loop-condition request for `param` returns.
    pub fn set_loop_condition(&mut self, channel: u8, param: LoopParam, value: u16) {
        if let Some(line) = self.lines.get_mut(usize::from(channel)) {
            line.loop_condition[usize::from(param.as_u8())] = value;
        }
    }

    /// Current drive state of a line.
    #[must_use]
    pub fn drive_state(&self, channel: u8) -> DriveState {
        let word = self.line(channel).word(self.family.map().drive_state);
        u8::try_from(word)
            .ok()
            .and_then(DriveState::from_u4)
            .unwrap_or_default()
    }

    /// Enabled generators of a line.
    #[must_use]
    pub fn generators(&self, channel: u8) -> GeneratorMask {
        let word = self.line(channel).word(self.family.map().generator_enable);
        u8::try_from(word)
            .ok()
            .and_then(GeneratorMask::from_bits)
            .unwrap_or(GeneratorMask::NONE)
    }

    /// Generator parameter block of a line.
    #[must_use]
    pub fn generator_params(&self, channel: u8) -> &[u16] {
        let base = usize::from(self.family.map().generator_params);
        &self.line(channel).registers[base..base + GENERATOR_PARAM_WORDS]
    }

    /// DC feed words of a line.
    #[must_use]
    pub fn dc_feed(&self, channel: u8) -> [u16; DC_FEED_WORDS] {
        let base = self.family.map().dc_feed;
        let line = self.line(channel);
        [line.word(base), line.word(base + 1)]
    }

    /// Overwrites the DC feed words of a line.
    pub fn set_dc_feed(&mut self, channel: u8, feed: [u16; DC_FEED_WORDS]) {
        let base = usize::from(self.family.map().dc_feed);
        self.line_mut(channel).registers[base..base + DC_FEED_WORDS].copy_from_slice(&feed);
    }

    /// PCM cut-off bits of a line.
    #[must_use]
    pub fn pcm_control(&self, channel: u8) -> u16 {
        self.line(channel).word(self.family.map().pcm_control)
    }

    /// True while a program runs on the line's sequencer.
    #[must_use]
    pub fn sequencer_running(&self, channel: u8) -> bool {
        self.line(channel).executor.is_running()
    }

    /// True while metering pulses are applied.
    #[must_use]
    pub fn metering(&self, channel: u8) -> bool {
        self.line(channel).metering
    }

    /// Bytes the FSK modulator has sent on a line, checksum included.
    #[must_use]
    pub fn wire_bytes(&self, channel: u8) -> &[u8] {
        &self.line(channel).wire
    }

    /// Indications raised but not yet read.
    #[must_use]
    pub fn pending_indications(&self) -> usize {
        self.indications.len()
    }

    fn line(&self, channel: u8) -> &SimLine {
        &self.lines[usize::from(channel)]
    }

    fn line_mut(&mut self, channel: u8) -> &mut SimLine {
        &mut self.lines[usize::from(channel)]
    }

    fn raise(&mut self, indication: RawIndication) {
        trace!(id = indication.id, param = indication.param, "indication raised");
        self.indications.push_back(indication);
    }

    fn step_sequencer(&mut self, map: &RegisterMap, channel: u8) {
        let line = self.line_mut(channel);
        let report = line.executor.tick();
        let mut raised = Vec::new();
        for effect in report.effects {
            match effect {
                Effect::SetState(state) => {
                    line.registers[usize::from(map.drive_state)] = u16::from(state.as_u4());
                }
                Effect::Generators(mask) => {
                    line.registers[usize::from(map.generator_enable)] = u16::from(mask.bits());
                }
                Effect::Metering(on) => line.metering = on,
                Effect::UserEvent(marker) => {
                    raised.push(RawIndication::line(ids::USER_EVENT, channel, marker.0));
                }
            }
        }
        if report.completed {
            raised.push(RawIndication::line(ids::SEQUENCE_COMPLETE, channel, 0));
        }
        for indication in raised {
            self.raise(indication);
        }
    }

    fn clock_fsk(&mut self, map: &RegisterMap, channel: u8) {
        let line = self.line_mut(channel);
        let enabled = line.word(map.fsk_control) & FSK_ENABLE_BIT != 0;
        let keyed = u8::try_from(line.word(map.generator_enable))
            .ok()
            .and_then(GeneratorMask::from_bits)
            .is_some_and(|mask| mask.contains(GeneratorMask::FSK));
        let index = line.fsk_next;
        if !enabled || !keyed || !line.fsk_loaded[index] {
            return;
        }
        let base = usize::from(map.fsk_buffers[index]);
        let (bytes, end_of_message) =
            fsk_buffer_bytes(&line.registers[base..base + FSK_BUFFER_WORDS]);
        line.wire.extend_from_slice(&bytes);
        line.fsk_loaded[index] = false;
        line.fsk_next = 1 - index;
        let indication = if end_of_message {
            line.registers[usize::from(map.fsk_control)] &= !FSK_ENABLE_BIT;
            RawIndication::line(ids::CID_TX_COMPLETE, channel, 0)
        } else {
            RawIndication::line(ids::FSK_BUFFER_EMPTY, channel, u8::try_from(index).unwrap_or(0))
        };
        self.raise(indication);
    }

    fn count_timer(&mut self, channel: u8) {
        let line = self.line_mut(channel);
        let Some(remaining) = line.timer else {
            return;
        };
        if remaining > 1 {
            line.timer = Some(remaining - 1);
            return;
        }
        line.timer = None;
        self.raise(RawIndication::line(ids::TIMER_COMPLETE, channel, 0));
    }

    /// Publishes the next queued response once the host has cleared the
    /// previous one.
    fn deliver_response(&mut self, map: &RegisterMap) {
        let base = usize::from(map.response);
        if self.device[base] != 0 {
            return;
        }
        let Some(frame) = self.responses.pop_front() else {
            return;
        };
        let handle = frame[1];
        self.device[base..base + RESPONSE_WORDS].fill(0);
        self.device[base..base + frame.len()].copy_from_slice(&frame);
        self.raise(RawIndication {
            id: ids::MAILBOX_RESPONSE,
            param: handle,
        });
    }

    fn apply_control(&mut self, channel: u8, control: SequenceControl) {
        if self.line_mut(channel).executor.control(control) {
            self.raise(RawIndication::line(ids::SEQUENCE_COMPLETE, channel, 0));
        }
    }

    /// The host wrote the program header word.
    fn on_header(&mut self, map: &RegisterMap, channel: u8) {
        let base = usize::from(map.sequence_program);
        let line = self.line_mut(channel);
        let Some((control, len)) = decode_header(line.registers[base]) else {
            warn!(channel, "undecodable sequencer header");
            return;
        };
        if !control.starts_program() {
            self.apply_control(channel, control);
            return;
        }
        match decode_words(&line.registers[base + 1..base + 1 + len]) {
            Ok(instructions) => {
                line.executor.load(instructions);
                line.executor.control(control);
            }
            Err(error) => warn!(channel, %error, "sequencer program rejected"),
        }
    }

    fn on_line_write(&mut self, channel: u8, offset: u16, words: &[u16]) {
        let map = self.family.map();
        let end = offset + u16::try_from(words.len()).unwrap_or(u16::MAX);
        let touches = |register: u16| offset <= register && register < end;

        if touches(map.sequence_program) {
            self.on_header(map, channel);
        }
        let line = self.line_mut(channel);
        if touches(map.fsk_control) {
            line.fsk_next = 0;
            line.fsk_loaded = [false; 2];
        }
        for (index, &buffer) in map.fsk_buffers.iter().enumerate() {
            if touches(buffer) {
                line.fsk_loaded[index] = true;
            }
        }
        if touches(map.timer) {
            let ticks = line.word(map.timer);
            line.timer = (ticks != 0).then_some(u32::from(ticks));
        }
        if touches(map.meter_control) && line.word(map.meter_control) & METER_ABORT_BIT != 0 {
            line.registers[usize::from(map.meter_control)] &= !METER_ABORT_BIT;
            line.metering = false;
            self.raise(RawIndication::line(ids::METER_ABORT_COMPLETE, channel, 0));
        }
    }

    /// The host handed over a mailbox frame `[cmd, channel, handle, len, payload..]`.
    fn on_mailbox(&mut self, map: &RegisterMap) {
        let base = usize::from(map.mailbox);
        let header = &self.device[base..base + MAILBOX_HEADER_WORDS];
        let (command, channel, handle, len) = (header[0], header[1], header[2], usize::from(header[3]));
        let start = base + MAILBOX_HEADER_WORDS;
        let payload = self.device[start..start + len].to_vec();
        let Some(channel) = u8::try_from(channel)
            .ok()
            .filter(|channel| usize::from(*channel) < self.lines.len())
        else {
            warn!(channel, "mailbox frame for an unknown line");
            return;
        };

        match MailboxCommand::from_u16(command) {
            Some(MailboxCommand::SeqUpload) => {
                let program = usize::from(map.sequence_program);
                let count = payload.len().min(SEQUENCE_WORDS);
                self.line_mut(channel).registers[program..program + count]
                    .copy_from_slice(&payload[..count]);
                self.on_header(map, channel);
            }
            Some(MailboxCommand::SeqControl) => {
                for word in payload {
                    let control = u8::try_from(word).ok().and_then(SequenceControl::from_u3);
                    match control {
                        Some(control) => self.apply_control(channel, control),
                        None => warn!(channel, word, "unknown sequencer control"),
                    }
                }
            }
            Some(MailboxCommand::LoopCondition) => {
                let value = payload
                    .first()
                    .and_then(|&param| u8::try_from(param).ok())
                    .and_then(LoopParam::from_u8)
                    .map_or(0, |param| {
                        self.line(channel).loop_condition[usize::from(param.as_u8())]
                    });
                self.queue_response(command, handle, &[value]);
            }
            Some(MailboxCommand::GetOption) => self.queue_response(command, handle, &payload),
            Some(MailboxCommand::LowLevel) => self.queue_response(command, handle, &payload),
            None => warn!(command, "unknown mailbox command"),
        }
    }

    fn queue_response(&mut self, command: u16, handle: u16, data: &[u16]) {
        let len = data.len().min(RESPONSE_WORDS - RESPONSE_HEADER_WORDS);
        let mut frame = vec![command, handle, u16::try_from(len).unwrap_or(0)];
        frame.extend_from_slice(&data[..len]);
        self.responses.push_back(frame);
    }

    fn space(&mut self, target: RegisterTarget) -> Result<&mut Vec<u16>, TransportError> {
        match target {
            RegisterTarget::Device => Ok(&mut self.device),
            RegisterTarget::Line(channel) => self
                .lines
                .get_mut(usize::from(channel))
                .map(|line| &mut line.registers)
                .ok_or(TransportError::BusFault),
        }
    }

    fn check_access(&mut self) -> Result<(), TransportError> {
        self.fail_next.take().map_or(Ok(()), Err)
    }
}

impl RegisterBus for SimDevice {
    fn read_register(
        &mut self,
        target: RegisterTarget,
        offset: u16,
        count: usize,
    ) -> Result<Vec<u16>, TransportError> {
        self.check_access()?;
        let map = self.family.map();
        if target == RegisterTarget::Device && offset == map.indication {
            let raw = self.indications.pop_front().unwrap_or(RawIndication {
                id: ids::NONE,
                param: 0,
            });
            let mut words = vec![raw.id, raw.param];
            words.resize(count, 0);
            return Ok(words);
        }
        let space = self.space(target)?;
        let start = usize::from(offset);
        space
            .get(start..start + count)
            .map(<[u16]>::to_vec)
            .ok_or(TransportError::BusFault)
    }

    fn write_register(
        &mut self,
        target: RegisterTarget,
        offset: u16,
        words: &[u16],
    ) -> Result<(), TransportError> {
        self.check_access()?;
        let start = usize::from(offset);
        self.space(target)?
            .get_mut(start..start + words.len())
            .ok_or(TransportError::BusFault)?
            .copy_from_slice(words);

        let map = self.family.map();
        match target {
            RegisterTarget::Device if offset == map.mailbox => self.on_mailbox(map),
            RegisterTarget::Device => {}
            RegisterTarget::Line(channel) => self.on_line_write(channel, offset, words),
        }
        Ok(())
    }

    fn acquire_mailbox(&mut self) -> Result<(), VpError> {
        if self.mailbox_locked {
            return Err(VpError::MailboxBusy);
        }
        Ok(())
    }

    fn release_mailbox(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::SimDevice;
    use crate::cid::fsk_buffer_words;
    use crate::decoder::Instruction;
    use crate::dispatch::{ids, LoopParam};
    use crate::encoding::{GeneratorMask, SequenceControl};
    use crate::error::TransportError;
    use crate::program::{Program, ProgramKind};
    use crate::registers::{DeviceFamily, MailboxCommand, FSK_ENABLE_BIT, INDICATION_WORDS};
    use crate::state::DriveState;
    use crate::transport::{RegisterBus, RegisterTarget};

    fn read_indication(sim: &mut SimDevice) -> (u16, u16) {
        let map = sim.family().map();
        let words = sim
            .read_register(RegisterTarget::Device, map.indication, INDICATION_WORDS)
            .expect("read");
        (words[0], words[1])
    }

    fn upload(sim: &mut SimDevice, channel: u8, program: &Program) {
        let map = sim.family().map();
        let words = program.to_words(SequenceControl::Running);
        sim.write_register(
            RegisterTarget::Line(channel),
            map.sequence_program + 1,
            &words[1..],
        )
        .expect("body");
        sim.write_word(RegisterTarget::Line(channel), map.sequence_program, words[0])
            .expect("header");
    }

    #[test]
    fn empty_indication_register_reads_zero() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        assert_eq!(read_indication(&mut sim), (ids::NONE, 0));
    }

    #[test]
    fn finite_program_runs_to_completion() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 2);
        let program = Program::new(
            ProgramKind::ToneCadence,
            vec![
                Instruction::SetGenerators(GeneratorMask::A),
                Instruction::Delay {
                    ticks: 2,
                    absolute: false,
                },
                Instruction::SetGenerators(GeneratorMask::NONE),
            ],
        )
        .expect("valid");
        upload(&mut sim, 1, &program);
        sim.tick();
        assert_eq!(sim.generators(1), GeneratorMask::A);
        sim.run(2);
        assert_eq!(sim.generators(1), GeneratorMask::NONE);
        assert!(!sim.sequencer_running(1));
        assert_eq!(read_indication(&mut sim), (ids::SEQUENCE_COMPLETE, 0x0100));
    }

    #[test]
    fn stop_control_completes_immediately() {
        let mut sim = SimDevice::new(DeviceFamily::Vp890, 1);
        let program = Program::new(
            ProgramKind::RingCadence,
            vec![
                Instruction::SetState(DriveState::Ringing),
                Instruction::Branch { target: 1, count: 0 },
            ],
        )
        .expect("valid");
        upload(&mut sim, 0, &program);
        sim.tick();
        let map = sim.family().map();
        let header = sim
            .read_word(RegisterTarget::Line(0), map.sequence_program)
            .expect("header");
        let stopped = (header & 0x1FFF) | u16::from(SequenceControl::Stopped.as_u3()) << 13;
        sim.write_word(RegisterTarget::Line(0), map.sequence_program, stopped)
            .expect("stop");
        assert!(!sim.sequencer_running(0));
        assert_eq!(read_indication(&mut sim), (ids::SEQUENCE_COMPLETE, 0));
    }

    #[test]
    fn fsk_buffers_drain_in_alternation() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        let map = sim.family().map();
        let line = RegisterTarget::Line(0);
        sim.write_word(line, map.fsk_control, FSK_ENABLE_BIT).expect("enable");
        sim.write_register(line, map.fsk_buffers[0], &fsk_buffer_words(b"AB", false))
            .expect("fill");
        sim.write_register(line, map.fsk_buffers[1], &fsk_buffer_words(b"C", true))
            .expect("fill");
        sim.tick();
        assert_eq!(sim.pending_indications(), 0, "modulator is not keyed");

        sim.write_word(line, map.generator_enable, u16::from(GeneratorMask::FSK.bits()))
            .expect("key");
        sim.run(2);
        assert_eq!(sim.wire_bytes(0), b"ABC");
        assert_eq!(read_indication(&mut sim), (ids::FSK_BUFFER_EMPTY, 0));
        assert_eq!(read_indication(&mut sim), (ids::CID_TX_COMPLETE, 0));
        assert_eq!(
            sim.read_word(line, map.fsk_control).expect("read") & FSK_ENABLE_BIT,
            0
        );
    }

    #[test]
    fn mailbox_requests_answer_one_at_a_time() {
        let mut sim = SimDevice::new(DeviceFamily::Vp792, 1);
        sim.set_loop_condition(0, LoopParam::LoopCurrent, 0x0123);
        let map = sim.family().map();
        let loop_frame = [MailboxCommand::LoopCondition.as_u16(), 0, 1, 1, 0];
        sim.write_register(RegisterTarget::Device, map.mailbox, &loop_frame)
            .expect("request");
        let echo_frame = [MailboxCommand::LowLevel.as_u16(), 0, 2, 2, 7, 9];
        sim.write_register(RegisterTarget::Device, map.mailbox, &echo_frame)
            .expect("request");

        sim.tick();
        assert_eq!(read_indication(&mut sim), (ids::MAILBOX_RESPONSE, 1));
        let response = sim
            .read_register(RegisterTarget::Device, map.response, 4)
            .expect("read");
        assert_eq!(response, vec![MailboxCommand::LoopCondition.as_u16(), 1, 1, 0x0123]);

        sim.tick();
        assert_eq!(sim.pending_indications(), 0, "previous response not consumed");
        sim.write_word(RegisterTarget::Device, map.response, 0)
            .expect("clear");
        sim.tick();
        assert_eq!(read_indication(&mut sim), (ids::MAILBOX_RESPONSE, 2));
    }

    #[test]
    fn injected_failure_hits_one_access() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        sim.fail_next_access(TransportError::Busy);
        assert_eq!(
            sim.read_word(RegisterTarget::Line(0), 0),
            Err(TransportError::Busy)
        );
        assert!(sim.read_word(RegisterTarget::Line(0), 0).is_ok());
    }

    #[test]
    fn timer_expires_after_its_ticks() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        let map = sim.family().map();
        sim.write_register(RegisterTarget::Line(0), map.timer, &[3, 42])
            .expect("arm");
        sim.run(2);
        assert_eq!(sim.pending_indications(), 0);
        sim.tick();
        assert_eq!(read_indication(&mut sim), (ids::TIMER_COMPLETE, 0));
    }
}
