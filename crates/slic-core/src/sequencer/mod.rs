//! Host side of the per-line sequencer: upload, control and completion
//! bookkeeping. The device runs the program; [`exec`] models how.

/// Device-side stepping semantics.
pub mod exec;

pub use exec::{Effect, Executor, RunStatus, TickReport, STEP_BUDGET_PER_TICK};

use tracing::{debug, warn};

use crate::encoding::SequenceControl;
use crate::error::VpError;
use crate::program::{Program, ProgramKind};
use crate::registers::{MailboxCommand, MAILBOX_HEADER_WORDS};
use crate::transport::{LineBus, RegisterBus, RegisterTarget};

const CONTROL_FIELD_MASK: u16 = 0xE000;
const CONTROL_FIELD_SHIFT: u16 = 13;

/// How a sequence-complete notification resolves against the line's program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    /// The program ran to its end.
    Finished(ProgramKind),
    /// The program was stopped by the host.
    Aborted(ProgramKind),
    /// The notification belongs to a program that was already replaced.
    Stale,
}

/// Per-line program ownership.
///
/// A program is present from a successful start until its completion
/// notification is consumed, so at most one program is active per line.
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    program: Option<Program>,
    stale_completions: u8,
}

impl Sequencer {
    /// Creates an idle sequencer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Program currently owned by the device, if any.
    #[must_use]
    pub const fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    /// True while a program is active on the device.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.program.is_some()
    }

    /// True while a stop is outstanding.
    #[must_use]
    pub fn is_aborting(&self) -> bool {
        self.program.as_ref().is_some_and(Program::is_aborting)
    }

    /// True when the next completion notification belongs to the program
    /// currently held, rather than to one already replaced.
    #[must_use]
    pub const fn owns_next_completion(&self) -> bool {
        self.stale_completions == 0 && self.program.is_some()
    }

    /// Uploads `program` and starts it.
    ///
    /// A program that is still aborting is replaced; its completion is
    /// recorded as stale so it cannot be mistaken for the new program's.
    ///
    /// # Errors
    ///
    /// - [`VpError::DeviceBusy`] if another program is active and not aborting.
    /// - [`VpError::MailboxBusy`] or transport errors from the upload.
    pub fn start<B: RegisterBus + ?Sized>(
        &mut self,
        io: &mut LineBus<'_, B>,
        mut program: Program,
    ) -> Result<(), VpError> {
        if self.program.as_ref().is_some_and(|p| !p.is_aborting()) {
            return Err(VpError::DeviceBusy);
        }
        upload(io, &program)?;
        if self.program.take().is_some() {
            self.stale_completions = self.stale_completions.saturating_add(1);
        }
        debug!(
            channel = io.channel(),
            kind = ?program.kind(),
            len = program.len(),
            "sequencer started"
        );
        program.mark_started();
        self.program = Some(program);
        Ok(())
    }

    /// Issues a stop for the active program. Completion arrives later.
    ///
    /// Returns true when a completion notification is outstanding afterwards.
    ///
    /// # Errors
    ///
    /// Propagates mailbox and transport errors; the program is not marked
    /// aborting unless the stop was issued.
    pub fn abort<B: RegisterBus + ?Sized>(
        &mut self,
        io: &mut LineBus<'_, B>,
    ) -> Result<bool, VpError> {
        let Some(program) = self.program.as_mut() else {
            return Ok(false);
        };
        if !program.is_aborting() {
            write_control(io, &[SequenceControl::Stopped])?;
            program.mark_aborting();
            debug!(channel = io.channel(), kind = ?program.kind(), "sequencer abort issued");
        }
        Ok(true)
    }

    /// Sends a flow control (`Resume`, `Break`, `BreakAndResume`) to the
    /// running program.
    ///
    /// Families without a native `BreakAndResume` receive `Break` then
    /// `Resume` inside one critical section and one mailbox transaction.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] for start/stop controls, and
    /// propagates mailbox and transport errors.
    pub fn control<B: RegisterBus + ?Sized>(
        &mut self,
        io: &mut LineBus<'_, B>,
        control: SequenceControl,
    ) -> Result<(), VpError> {
        match control {
            SequenceControl::Resume | SequenceControl::Break => write_control(io, &[control]),
            SequenceControl::BreakAndResume if io.family().native_break_and_resume() => {
                write_control(io, &[control])
            }
            SequenceControl::BreakAndResume => write_control(
                io,
                &[SequenceControl::Break, SequenceControl::Resume],
            ),
            SequenceControl::Stopped | SequenceControl::Running | SequenceControl::Restart => {
                Err(VpError::InvalidArgument)
            }
        }
    }

    /// Resolves one sequence-complete notification.
    pub fn on_complete(&mut self, channel: u8) -> Completion {
        if self.stale_completions > 0 {
            self.stale_completions -= 1;
            debug!(channel, "stale sequence completion discarded");
            return Completion::Stale;
        }
        match self.program.take() {
            Some(program) if program.is_aborting() => Completion::Aborted(program.kind()),
            Some(program) => Completion::Finished(program.kind()),
            None => {
                warn!(channel, "sequence completion with no program active");
                Completion::Stale
            }
        }
    }

    /// Forgets all program state, for line re-initialization. Any completion
    /// still owed by a stopped program is treated as stale.
    pub fn reset(&mut self) {
        if self.program.take().is_some_and(|p| p.is_aborting()) {
            self.stale_completions = self.stale_completions.saturating_add(1);
        }
    }
}

fn upload<B: RegisterBus + ?Sized>(io: &mut LineBus<'_, B>, program: &Program) -> Result<(), VpError> {
    let words = program.to_words(SequenceControl::Running);
    if io.family().uses_mailbox_for_sequencer() {
        return send_mailbox(io, MailboxCommand::SeqUpload, 0, &words);
    }
    let base = io.map().sequence_program;
    let target = io.target();
    let mut section = io.critical();
    section.write_register(target, base + 1, &words[1..])?;
    section.write_word(target, base, words[0])?;
    Ok(())
}

fn write_control<B: RegisterBus + ?Sized>(
    io: &mut LineBus<'_, B>,
    controls: &[SequenceControl],
) -> Result<(), VpError> {
    if io.family().uses_mailbox_for_sequencer() {
        let payload: Vec<u16> = controls.iter().map(|c| u16::from(c.as_u3())).collect();
        return send_mailbox(io, MailboxCommand::SeqControl, 0, &payload);
    }
    let base = io.map().sequence_program;
    let target = io.target();
    let mut section = io.critical();
    for control in controls {
        section.modify(
            target,
            base,
            CONTROL_FIELD_MASK,
            u16::from(control.as_u3()) << CONTROL_FIELD_SHIFT,
        )?;
    }
    Ok(())
}

/// Writes one mailbox frame `[cmd, channel, handle, len, payload..]` under
/// mailbox ownership and hands it to the device.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn send_mailbox<B: RegisterBus + ?Sized>(
    io: &mut LineBus<'_, B>,
    command: MailboxCommand,
    handle: u8,
    payload: &[u16],
) -> Result<(), VpError> {
    let channel = io.channel();
    let base = io.map().mailbox;
    let mut section = io.critical();
    section.acquire_mailbox()?;
    let mut frame = Vec::with_capacity(MAILBOX_HEADER_WORDS + payload.len());
    frame.extend_from_slice(&[
        command.as_u16(),
        u16::from(channel),
        u16::from(handle),
        payload.len() as u16,
    ]);
    frame.extend_from_slice(payload);
    let written = section.write_register(RegisterTarget::Device, base, &frame);
    section.release_mailbox();
    written.map_err(VpError::from)
}

#[cfg(test)]
mod tests {
    use super::{Completion, Sequencer};
    use crate::decoder::Instruction;
    use crate::encoding::SequenceControl;
    use crate::error::VpError;
    use crate::program::{Program, ProgramKind};
    use crate::registers::DeviceFamily;
    use crate::sim::SimDevice;
    use crate::signal::SignalKind;
    use crate::state::DriveState;
    use crate::transport::LineBus;

    fn ring() -> Program {
        Program::new(
            ProgramKind::RingCadence,
            vec![
                Instruction::SetState(DriveState::Ringing),
                Instruction::Branch { target: 1, count: 0 },
            ],
        )
        .expect("valid")
    }

    fn pulse() -> Program {
        Program::new(
            ProgramKind::Signal(SignalKind::PolarityReversal),
            vec![
                Instruction::SetState(DriveState::ActiveReverse),
                Instruction::Delay {
                    ticks: 2,
                    absolute: false,
                },
                Instruction::SetState(DriveState::Active),
            ],
        )
        .expect("valid")
    }

    #[test]
    fn second_start_is_busy_until_abort() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        let mut sequencer = Sequencer::new();
        let mut io = LineBus::new(&mut sim, DeviceFamily::Vp880, 0);
        sequencer.start(&mut io, ring()).expect("idle line");
        assert_eq!(sequencer.start(&mut io, pulse()), Err(VpError::DeviceBusy));
        assert_eq!(sequencer.abort(&mut io), Ok(true));
        assert!(sequencer.is_aborting());
        assert_eq!(
            sequencer.on_complete(0),
            Completion::Aborted(ProgramKind::RingCadence)
        );
        assert!(!sequencer.is_active());
    }

    #[test]
    fn restart_while_aborting_marks_old_completion_stale() {
        let mut sim = SimDevice::new(DeviceFamily::Vp880, 1);
        let mut sequencer = Sequencer::new();
        let mut io = LineBus::new(&mut sim, DeviceFamily::Vp880, 0);
        sequencer.start(&mut io, ring()).expect("idle line");
        sequencer.abort(&mut io).expect("abort");
        sequencer.start(&mut io, pulse()).expect("aborting program is replaced");
        assert_eq!(sequencer.on_complete(0), Completion::Stale);
        assert_eq!(
            sequencer.on_complete(0),
            Completion::Finished(ProgramKind::Signal(SignalKind::PolarityReversal))
        );
    }

    #[test]
    fn abort_without_program_is_a_no_op() {
        let mut sim = SimDevice::new(DeviceFamily::Vp792, 1);
        let mut sequencer = Sequencer::new();
        let mut io = LineBus::new(&mut sim, DeviceFamily::Vp792, 0);
        assert_eq!(sequencer.abort(&mut io), Ok(false));
        assert_eq!(sequencer.on_complete(0), Completion::Stale);
    }

    #[test]
    fn start_controls_are_not_flow_controls() {
        let mut sim = SimDevice::new(DeviceFamily::Vp890, 1);
        let mut sequencer = Sequencer::new();
        let mut io = LineBus::new(&mut sim, DeviceFamily::Vp890, 0);
        assert_eq!(
            sequencer.control(&mut io, SequenceControl::Restart),
            Err(VpError::InvalidArgument)
        );
    }

    #[test]
    fn mailbox_family_uploads_through_the_mailbox() {
        let mut sim = SimDevice::new(DeviceFamily::Vp792, 2);
        let mut sequencer = Sequencer::new();
        {
            let mut io = LineBus::new(&mut sim, DeviceFamily::Vp792, 1);
            sequencer.start(&mut io, ring()).expect("idle line");
        }
        sim.tick();
        assert_eq!(sim.drive_state(1), DriveState::Ringing);
        assert!(sim.sequencer_running(1));
    }

    #[test]
    fn locked_mailbox_reports_busy_without_starting() {
        let mut sim = SimDevice::new(DeviceFamily::Vp792, 1);
        sim.lock_mailbox(true);
        let mut sequencer = Sequencer::new();
        let mut io = LineBus::new(&mut sim, DeviceFamily::Vp792, 0);
        assert_eq!(sequencer.start(&mut io, ring()), Err(VpError::MailboxBusy));
        assert!(!sequencer.is_active());
    }
}
