//! Per-line state owned by the device's line arena.

use crate::config::{LineConfig, LineOptions, Termination};
use crate::handlers::send_cid::{CidPhase, CidSession};
use crate::handlers::Pending;
use crate::profile::CidProfile;
use crate::program::Program;
use crate::registers::DC_FEED_WORDS;
use crate::sequencer::Sequencer;
use crate::signal::SignalKind;
use crate::state::{DriveState, LineState};

/// What a line is currently doing, as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Activity {
    /// No operation owns the sequencer.
    Idle,
    /// A ring cadence is playing.
    Ringing {
        /// Caller ID is still being transmitted within the cadence.
        cid: bool,
    },
    /// The park cadence is running.
    Parked,
    /// A tone cadence is playing.
    Tone,
    /// A stand-alone caller-ID transmission is running.
    CallerId,
    /// A `send_signal` program is running.
    Signal(SignalKind),
    /// A metering burst is running.
    Metering,
}

/// Operation that owns the line's sequencer program.
#[derive(Debug, Clone, Default)]
pub(crate) enum Operation {
    #[default]
    Idle,
    Ringing {
        cid: Option<CidSession>,
    },
    Parked,
    Tone,
    CallerId(CidSession),
    Signal(SignalKind),
    Metering,
}

impl Operation {
    pub(crate) const fn activity(&self) -> Activity {
        match self {
            Self::Idle => Activity::Idle,
            Self::Ringing { cid } => Activity::Ringing { cid: cid.is_some() },
            Self::Parked => Activity::Parked,
            Self::Tone => Activity::Tone,
            Self::CallerId(_) => Activity::CallerId,
            Self::Signal(kind) => Activity::Signal(*kind),
            Self::Metering => Activity::Metering,
        }
    }

    pub(crate) fn cid_session(&mut self) -> Option<&mut CidSession> {
        match self {
            Self::Ringing { cid: Some(session) } | Self::CallerId(session) => Some(session),
            _ => None,
        }
    }
}

/// Ring cadence and caller-ID profile staged by `init_ring`.
#[derive(Debug, Clone, Default)]
pub(crate) struct RingSetup {
    pub(crate) cadence: Option<Program>,
    pub(crate) cid: Option<CidProfile>,
}

/// One physical voice port.
#[derive(Debug, Clone)]
pub struct Line {
    pub(crate) channel: u8,
    pub(crate) termination: Termination,
    pub(crate) options: LineOptions,
    pub(crate) tick_ms: u16,
    pub(crate) initialized: bool,
    pub(crate) state: LineState,
    pub(crate) drive: DriveState,
    pub(crate) sequencer: Sequencer,
    pub(crate) operation: Operation,
    pub(crate) pending: Option<Pending>,
    pub(crate) meter_on: bool,
    pub(crate) meter_abort_outstanding: bool,
    pub(crate) ring: RingSetup,
    pub(crate) cid_message: Option<Vec<u8>>,
    pub(crate) hook_masked: bool,
    pub(crate) off_hook: bool,
    /// DC feed saved while a message-waiting pulse raises the line voltage.
    pub(crate) mwi: Option<[u16; DC_FEED_WORDS]>,
    pub(crate) timer_handle: Option<u16>,
    /// Generators left enabled by a steady `set_line_tone`.
    pub(crate) steady_tone: bool,
}

impl Line {
    pub(crate) fn new(channel: u8, config: LineConfig, tick_ms: u16) -> Self {
        Self {
            channel,
            termination: config.termination,
            options: config.options,
            tick_ms,
            initialized: false,
            state: LineState::default(),
            drive: DriveState::default(),
            sequencer: Sequencer::new(),
            operation: Operation::Idle,
            pending: None,
            meter_on: false,
            meter_abort_outstanding: false,
            ring: RingSetup::default(),
            cid_message: None,
            hook_masked: false,
            off_hook: false,
            mwi: None,
            timer_handle: None,
            steady_tone: false,
        }
    }

    /// Clears everything `init_line` resets. Options and termination survive.
    pub(crate) fn reset(&mut self) {
        self.sequencer.reset();
        self.operation = Operation::Idle;
        self.pending = None;
        self.meter_on = false;
        self.meter_abort_outstanding = false;
        self.ring = RingSetup::default();
        self.cid_message = None;
        self.hook_masked = false;
        self.off_hook = false;
        self.mwi = None;
        self.timer_handle = None;
        self.steady_tone = false;
        self.state = self.idle_state();
        self.drive = self.state.static_drive().unwrap_or_default();
    }

    /// Line state written by `init_line`.
    pub(crate) const fn idle_state(&self) -> LineState {
        match self.termination {
            Termination::Fxs => LineState::Disconnect,
            Termination::Fxo => LineState::FxoLoopOpen,
        }
    }

    /// Channel index of this line.
    #[must_use]
    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// Station or office side.
    #[must_use]
    pub const fn termination(&self) -> Termination {
        self.termination
    }

    /// Current option values.
    #[must_use]
    pub const fn options(&self) -> &LineOptions {
        &self.options
    }

    /// Line state of the last completed `set_line_state` transition.
    #[must_use]
    pub const fn state(&self) -> LineState {
        self.state
    }

    /// Drive state last written by the host.
    #[must_use]
    pub const fn drive(&self) -> DriveState {
        self.drive
    }

    /// True once `init_line` has run.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Operation currently owning the sequencer.
    #[must_use]
    pub const fn activity(&self) -> Activity {
        self.operation.activity()
    }

    /// Program currently owned by the sequencer.
    #[must_use]
    pub const fn program(&self) -> Option<&Program> {
        self.sequencer.program()
    }

    /// True while a request waits for the sequencer or meter to stop.
    #[must_use]
    pub const fn has_deferred_request(&self) -> bool {
        self.pending.is_some()
    }

    /// Last hook state reported by the device.
    #[must_use]
    pub const fn is_off_hook(&self) -> bool {
        self.off_hook
    }

    /// Progress of the caller-ID transmission in flight, if any.
    #[must_use]
    pub const fn cid_phase(&self) -> Option<CidPhase> {
        match &self.operation {
            Operation::CallerId(session)
            | Operation::Ringing {
                cid: Some(session),
            } => Some(session.phase()),
            _ => None,
        }
    }
}
