//! Short signaling programs: message waiting, polarity reversal, forward
//! disconnect, and FXO digit/flash generation.

use crate::config::{LineOptions, Termination};
use crate::encoding::{GeneratorMask, Marker};
use crate::error::VpError;
use crate::program::{Program, ProgramBuilder, ProgramKind};
use crate::state::DriveState;
use crate::timing::{ms_to_ticks_with, Ticks};

/// Signal type tag carried by `SignalComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum SignalKind {
    MessageWaiting,
    ForwardDisconnect,
    PolarityReversal,
    MomentaryLoopOpen,
    DtmfDigit,
    PulseDigit,
    HookFlash,
}

/// Dialable digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum Digit {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    D8,
    D9,
    A,
    B,
    C,
    D,
    Star,
    Hash,
}

const DTMF_ROW_WORDS: [u16; 4] = [5710, 6308, 6980, 7709];
const DTMF_COL_WORDS: [u16; 4] = [9904, 10945, 12100, 13378];

impl Digit {
    /// Parses a keypad character.
    #[must_use]
    pub const fn from_char(c: char) -> Option<Self> {
        match c {
            '0'..='9' => Self::from_nibble(c as u8 - b'0'),
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            'C' | 'c' => Some(Self::C),
            'D' | 'd' => Some(Self::D),
            '*' => Some(Self::Star),
            '#' => Some(Self::Hash),
            _ => None,
        }
    }

    /// Converts a 4-bit digit code (`0-9`, `A-D` = 0xA-0xD, `*` = 0xE,
    /// `#` = 0xF).
    #[must_use]
    pub const fn from_nibble(code: u8) -> Option<Self> {
        match code {
            0x0 => Some(Self::D0),
            0x1 => Some(Self::D1),
            0x2 => Some(Self::D2),
            0x3 => Some(Self::D3),
            0x4 => Some(Self::D4),
            0x5 => Some(Self::D5),
            0x6 => Some(Self::D6),
            0x7 => Some(Self::D7),
            0x8 => Some(Self::D8),
            0x9 => Some(Self::D9),
            0xA => Some(Self::A),
            0xB => Some(Self::B),
            0xC => Some(Self::C),
            0xD => Some(Self::D),
            0xE => Some(Self::Star),
            0xF => Some(Self::Hash),
            _ => None,
        }
    }

    /// Converts a digit to its 4-bit code.
    #[must_use]
    pub const fn as_nibble(self) -> u8 {
        match self {
            Self::D0 => 0x0,
            Self::D1 => 0x1,
            Self::D2 => 0x2,
            Self::D3 => 0x3,
            Self::D4 => 0x4,
            Self::D5 => 0x5,
            Self::D6 => 0x6,
            Self::D7 => 0x7,
            Self::D8 => 0x8,
            Self::D9 => 0x9,
            Self::A => 0xA,
            Self::B => 0xB,
            Self::C => 0xC,
            Self::D => 0xD,
            Self::Star => 0xE,
            Self::Hash => 0xF,
        }
    }

    /// Loop-break count for pulse dialing; `None` for non-numeric keys.
    #[must_use]
    pub const fn pulse_count(self) -> Option<u16> {
        match self.as_nibble() {
            0x0 => Some(10),
            n @ 0x1..=0x9 => Some(n as u16),
            _ => None,
        }
    }

    /// Generator A (row) and B (column) frequency words for this key.
    #[must_use]
    pub const fn dtmf_words(self) -> (u16, u16) {
        let (row, col) = match self {
            Self::D1 => (0, 0),
            Self::D2 => (0, 1),
            Self::D3 => (0, 2),
            Self::A => (0, 3),
            Self::D4 => (1, 0),
            Self::D5 => (1, 1),
            Self::D6 => (1, 2),
            Self::B => (1, 3),
            Self::D7 => (2, 0),
            Self::D8 => (2, 1),
            Self::D9 => (2, 2),
            Self::C => (2, 3),
            Self::Star => (3, 0),
            Self::D0 => (3, 1),
            Self::Hash => (3, 2),
            Self::D => (3, 3),
        };
        (DTMF_ROW_WORDS[row], DTMF_COL_WORDS[col])
    }
}

/// A `send_signal` request with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Signal {
    /// Message-waiting voltage pulses; `cycles == 0` repeats until stopped.
    MessageWaiting {
        /// Bias-on time.
        on_ms: u32,
        /// Bias-off time.
        off_ms: u32,
        /// Number of on/off cycles.
        cycles: u16,
    },
    /// Open the loop feed for `ms`.
    ForwardDisconnect {
        /// Disconnect time.
        ms: u32,
    },
    /// Reverse polarity for `ms`.
    PolarityReversal {
        /// Reversal time.
        ms: u32,
    },
    /// FXO: open the loop for `ms`.
    MomentaryLoopOpen {
        /// Open time.
        ms: u32,
    },
    /// FXO: dial one DTMF digit.
    DtmfDigit(Digit),
    /// FXO: dial one digit by loop pulsing.
    PulseDigit(Digit),
    /// FXO: timed hook flash.
    HookFlash,
}

impl Signal {
    /// Signal type tag for completion reporting.
    #[must_use]
    pub const fn kind(self) -> SignalKind {
        match self {
            Self::MessageWaiting { .. } => SignalKind::MessageWaiting,
            Self::ForwardDisconnect { .. } => SignalKind::ForwardDisconnect,
            Self::PolarityReversal { .. } => SignalKind::PolarityReversal,
            Self::MomentaryLoopOpen { .. } => SignalKind::MomentaryLoopOpen,
            Self::DtmfDigit(_) => SignalKind::DtmfDigit,
            Self::PulseDigit(_) => SignalKind::PulseDigit,
            Self::HookFlash => SignalKind::HookFlash,
        }
    }

    /// Termination this signal is generated on.
    #[must_use]
    pub const fn termination(self) -> Termination {
        match self {
            Self::MessageWaiting { .. }
            | Self::ForwardDisconnect { .. }
            | Self::PolarityReversal { .. } => Termination::Fxs,
            Self::MomentaryLoopOpen { .. }
            | Self::DtmfDigit(_)
            | Self::PulseDigit(_)
            | Self::HookFlash => Termination::Fxo,
        }
    }

    /// Builds the program for this signal from the line's current drive
    /// state and timing options.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] when the signal does not apply to
    /// the termination or current state, or a parameter is out of range.
    pub fn build_program(
        self,
        termination: Termination,
        current: DriveState,
        options: &LineOptions,
        tick_ms: u16,
    ) -> Result<Program, VpError> {
        if self.termination() != termination {
            return Err(VpError::InvalidArgument);
        }
        let ticks = |ms: u32| ms_to_ticks_with(ms, tick_ms);
        let settle = ticks(options.signal_settle_ms);
        let mut program = ProgramBuilder::new(ProgramKind::Signal(self.kind()));

        match self {
            Self::MessageWaiting {
                on_ms,
                off_ms,
                cycles,
            } => {
                if on_ms == 0 || off_ms == 0 || current.is_fxo() {
                    return Err(VpError::InvalidArgument);
                }
                program.set_state(current);
                let body = program.position();
                program
                    .marker(Marker::MWI_PULSE_ON)
                    .delay(ticks(on_ms))
                    .marker(Marker::MWI_PULSE_OFF)
                    .delay(ticks(off_ms));
                program.repeat(body, cycles)?;
            }
            Self::ForwardDisconnect { ms } => {
                let timed = finite(ticks(ms))?;
                transient(&mut program, DriveState::Disconnect, timed, current, settle);
            }
            Self::PolarityReversal { ms } => {
                let reversed = current.reversed().ok_or(VpError::InvalidArgument)?;
                let timed = finite(ticks(ms))?;
                transient(&mut program, reversed, timed, current, settle);
            }
            Self::MomentaryLoopOpen { ms } => {
                if !current.is_fxo() {
                    return Err(VpError::InvalidArgument);
                }
                let timed = finite(ticks(ms))?;
                transient(&mut program, DriveState::LoopOpen, timed, current, settle);
            }
            Self::HookFlash => {
                require_loop_closed(current)?;
                let timed = finite(ticks(options.flash_ms))?;
                transient(&mut program, DriveState::LoopOpen, timed, current, settle);
            }
            Self::DtmfDigit(_) => {
                require_loop_closed(current)?;
                program
                    .generators(GeneratorMask::A.union(GeneratorMask::B))
                    .delay(finite(ticks(options.dtmf_on_ms))?.less_one())
                    .generators(GeneratorMask::NONE)
                    .delay(finite(ticks(options.dtmf_off_ms))?.less_one());
            }
            Self::PulseDigit(digit) => {
                require_loop_closed(current)?;
                let pulses = digit.pulse_count().ok_or(VpError::InvalidArgument)?;
                program
                    .set_state(DriveState::LoopOpen)
                    .delay(finite(ticks(options.pulse_break_ms))?)
                    .set_state(DriveState::LoopClose)
                    .delay(finite(ticks(options.pulse_make_ms))?);
                program.repeat(0, pulses)?;
                program
                    .set_state(current)
                    .delay(finite(ticks(options.interdigit_ms))?);
            }
        }
        program.build()
    }
}

fn transient(
    program: &mut ProgramBuilder,
    transient: DriveState,
    duration: Ticks,
    restore: DriveState,
    settle: Ticks,
) {
    program
        .set_state(transient)
        .delay(duration)
        .set_state(restore)
        .delay(settle);
}

/// Rejects zero-millisecond durations where a "forever" wait makes no sense.
const fn finite(ticks: Ticks) -> Result<Ticks, VpError> {
    match ticks {
        Ticks::Forever => Err(VpError::InvalidArgument),
        Ticks::Count(_) => Ok(ticks),
    }
}

const fn require_loop_closed(current: DriveState) -> Result<(), VpError> {
    match current {
        DriveState::LoopClose | DriveState::FxoTalk => Ok(()),
        _ => Err(VpError::InvalidArgument),
    }
}
