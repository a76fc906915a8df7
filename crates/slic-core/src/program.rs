//! Timed-instruction programs: validation, splicing and construction.

use crate::decoder::{decode_words, encode_buffer, Instruction};
use crate::encoding::{GeneratorMask, Marker, SequenceControl, MAX_BRANCH_COUNT, MAX_PROGRAM_LEN};
use crate::error::{ProfileError, VpError};
use crate::event::EventKind;
use crate::signal::SignalKind;
use crate::state::DriveState;
use crate::timing::{Ticks, MAX_DELAY_TICKS};

/// Largest cycle count a builder can express with two chained loops.
pub const MAX_REPEAT_CYCLES: u16 = 2 * (MAX_BRANCH_COUNT as u16 + 1);

/// Logical cadence kind, used to pick the completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ProgramKind {
    /// Ring cadence, optionally with a spliced caller-ID sequence.
    RingCadence,
    /// Tone cadence started by `set_line_tone`.
    ToneCadence,
    /// Stand-alone caller-ID envelope.
    CallerId,
    /// Signal generated by `send_signal`.
    Signal(SignalKind),
    /// Metering burst started by `start_meter`.
    MeteringBurst,
    /// Endless disconnect/standby alternation.
    Park,
}

impl ProgramKind {
    /// Event raised when a program of this kind finishes without an abort.
    #[must_use]
    pub const fn completion_event(self) -> Option<EventKind> {
        match self {
            Self::RingCadence => Some(EventKind::RingCadenceDone),
            Self::ToneCadence => Some(EventKind::ToneCadenceDone),
            Self::Signal(kind) => Some(EventKind::SignalComplete(kind)),
            Self::MeteringBurst => Some(EventKind::MeteringComplete),
            Self::CallerId | Self::Park => None,
        }
    }
}

/// A validated sequencer program owned by one line.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Program {
    kind: ProgramKind,
    instructions: Vec<Instruction>,
    active: bool,
    aborting: bool,
}

impl Program {
    /// Validates an instruction list as a program.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::Format`] for an empty list, a first instruction that
    ///   is neither `SetState` nor `SetGenerators`, a branch target at or past
    ///   the end, or a field outside its encodable range.
    /// - [`ProfileError::TooLong`] above [`MAX_PROGRAM_LEN`] instructions.
    pub fn new(kind: ProgramKind, instructions: Vec<Instruction>) -> Result<Self, ProfileError> {
        validate(&instructions)?;
        Ok(Self {
            kind,
            instructions,
            active: false,
            aborting: false,
        })
    }

    /// Decodes and validates a program from stored instruction words.
    ///
    /// # Errors
    ///
    /// Propagates decode and validation failures as [`ProfileError`].
    pub fn from_words(kind: ProgramKind, words: &[u16]) -> Result<Self, ProfileError> {
        Self::new(kind, decode_words(words)?)
    }

    /// Cadence kind of this program.
    #[must_use]
    pub const fn kind(&self) -> ProgramKind {
        self.kind
    }

    /// Instructions in execution order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Always false for a validated program.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// True between a successful start and its completion notification.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// True once a stop has been issued and completion is still outstanding.
    #[must_use]
    pub const fn is_aborting(&self) -> bool {
        self.aborting
    }

    pub(crate) fn mark_started(&mut self) {
        self.active = true;
        self.aborting = false;
    }

    pub(crate) fn mark_aborting(&mut self) {
        self.aborting = true;
    }

    /// Index of the first caller-ID splice marker, if any.
    #[must_use]
    pub fn cid_marker_position(&self) -> Option<usize> {
        self.instructions
            .iter()
            .position(|instruction| matches!(instruction, Instruction::CidMarker))
    }

    /// Header-prefixed device buffer for this program.
    #[must_use]
    pub fn to_words(&self, control: SequenceControl) -> Vec<u16> {
        encode_buffer(control, &self.instructions)
    }

    /// Big-endian wire bytes for this program.
    #[must_use]
    pub fn serialize(&self, control: SequenceControl) -> Vec<u8> {
        self.to_words(control)
            .into_iter()
            .flat_map(u16::to_be_bytes)
            .collect()
    }

    /// Merges a caller-ID sequence into a ring cadence.
    ///
    /// The CID instructions replace the ring cadence's first `CidMarker`, or
    /// are appended when the cadence has none. Branch targets of every moved
    /// instruction are renumbered by the distance it moved.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::TooLong`] when the merged program would not fit.
    pub fn splice_cid(ring: &Self, cid: &Self) -> Result<Self, ProfileError> {
        let ring_len = ring.len();
        let cid_len = cid.len();

        let merged = match ring.cid_marker_position() {
            Some(at) => {
                if ring_len + cid_len - 1 > MAX_PROGRAM_LEN {
                    return Err(ProfileError::TooLong);
                }
                let tail_shift = cid_len - 1;
                let mut merged = Vec::with_capacity(ring_len + tail_shift);
                merged.extend_from_slice(&ring.instructions[..at]);
                merged.extend(cid.instructions.iter().map(|i| shift_target(*i, 0, at)));
                merged.extend(
                    ring.instructions[at + 1..]
                        .iter()
                        .map(|i| shift_target(*i, at + 1, tail_shift)),
                );
                for instruction in &mut merged[..at] {
                    *instruction = shift_target(*instruction, at + 1, tail_shift);
                }
                merged
            }
            None => {
                if ring_len + cid_len > MAX_PROGRAM_LEN {
                    return Err(ProfileError::TooLong);
                }
                let mut merged = ring.instructions.clone();
                merged.extend(cid.instructions.iter().map(|i| shift_target(*i, 0, ring_len)));
                merged
            }
        };

        Self::new(ProgramKind::RingCadence, merged)
    }
}

/// Adds `by` to a branch target that is at least `from`.
#[allow(clippy::cast_possible_truncation)]
fn shift_target(instruction: Instruction, from: usize, by: usize) -> Instruction {
    match instruction {
        Instruction::Branch { target, count } if usize::from(target) >= from => {
            Instruction::Branch {
                target: (usize::from(target) + by) as u8,
                count,
            }
        }
        other => other,
    }
}

fn validate(instructions: &[Instruction]) -> Result<(), ProfileError> {
    let first = instructions.first().ok_or(ProfileError::Format)?;
    if instructions.len() > MAX_PROGRAM_LEN {
        return Err(ProfileError::TooLong);
    }
    if !first.is_entry() {
        return Err(ProfileError::Format);
    }
    for instruction in instructions {
        match *instruction {
            Instruction::Branch { target, count } => {
                if usize::from(target) >= instructions.len() || count > MAX_BRANCH_COUNT {
                    return Err(ProfileError::Format);
                }
            }
            Instruction::Delay { ticks, .. } if ticks > MAX_DELAY_TICKS => {
                return Err(ProfileError::Format);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Incremental program construction from millisecond-level parameters.
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    kind: ProgramKind,
    instructions: Vec<Instruction>,
}

impl ProgramBuilder {
    /// Starts an empty program of the given kind.
    #[must_use]
    pub const fn new(kind: ProgramKind) -> Self {
        Self {
            kind,
            instructions: Vec::new(),
        }
    }

    /// Index the next pushed instruction will occupy.
    #[must_use]
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    /// Appends a drive-state change.
    pub fn set_state(&mut self, state: DriveState) -> &mut Self {
        self.instructions.push(Instruction::SetState(state));
        self
    }

    /// Appends a generator-enable write.
    pub fn generators(&mut self, mask: GeneratorMask) -> &mut Self {
        self.instructions.push(Instruction::SetGenerators(mask));
        self
    }

    /// Appends a relative delay. Durations beyond one instruction's range are
    /// split across consecutive delays; `Forever` becomes a zero-tick wait.
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay(&mut self, ticks: Ticks) -> &mut Self {
        let Ticks::Count(mut remaining) = ticks else {
            self.instructions.push(Instruction::Delay {
                ticks: 0,
                absolute: false,
            });
            return self;
        };
        let max = u32::from(MAX_DELAY_TICKS);
        while remaining > 0 {
            let step = remaining.min(max);
            self.instructions.push(Instruction::Delay {
                ticks: step as u16,
                absolute: false,
            });
            remaining -= step;
        }
        self
    }

    /// Appends a user-event marker.
    pub fn marker(&mut self, marker: Marker) -> &mut Self {
        self.instructions.push(Instruction::UserEvent(marker));
        self
    }

    /// Appends a metering on/off instruction.
    pub fn metering(&mut self, on: bool) -> &mut Self {
        self.instructions.push(Instruction::Metering(on));
        self
    }

    /// Closes a loop so the body starting at `body_start` runs `cycles` times
    /// in total; zero repeats forever.
    ///
    /// Counts above one branch's range are expressed with a second loop over
    /// a copy of the body.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] for more than
    /// [`MAX_REPEAT_CYCLES`] cycles or a body start past the current end.
    #[allow(clippy::cast_possible_truncation)]
    pub fn repeat(&mut self, body_start: usize, cycles: u16) -> Result<&mut Self, VpError> {
        let body_end = self.instructions.len();
        if body_start >= body_end || cycles > MAX_REPEAT_CYCLES {
            return Err(VpError::InvalidArgument);
        }
        let native = u16::from(MAX_BRANCH_COUNT) + 1;
        match cycles {
            0 => self.push_branch(body_start, 0),
            1 => {}
            n if n <= native => self.push_branch(body_start, (n - 1) as u8),
            n => {
                self.push_branch(body_start, MAX_BRANCH_COUNT);
                let copy_start = self.instructions.len();
                let offset = copy_start - body_start;
                let body: Vec<Instruction> = self.instructions[body_start..body_end].to_vec();
                self.instructions
                    .extend(body.into_iter().map(|i| shift_target(i, body_start, offset)));
                let rest = n - native;
                if rest > 1 {
                    self.push_branch(copy_start, (rest - 1) as u8);
                }
            }
        }
        Ok(self)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push_branch(&mut self, target: usize, count: u8) {
        self.instructions.push(Instruction::Branch {
            target: target.min(usize::from(u8::MAX)) as u8,
            count,
        });
    }

    /// Validates and returns the program.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::Profile`] when the result is not a valid program.
    pub fn build(self) -> Result<Program, VpError> {
        Ok(Program::new(self.kind, self.instructions)?)
    }
}
