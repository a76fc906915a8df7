//! Decoded API events, categories and per-category masking.

use crate::error::VpError;
use crate::signal::{Digit, SignalKind};

/// Event category; each has its own 16-bit mask word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EventCategory {
    /// Device or line faults.
    Fault,
    /// Hook and digit signaling from the line.
    Signaling,
    /// Answers to asynchronous requests.
    Response,
    /// Completion of host-initiated processes.
    Process,
    /// Line test results. No events are defined in this category yet.
    Test,
}

/// Identifier of a decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EventKind {
    /// Battery supply out of range.
    BatteryFault,
    /// Device clock failure.
    ClockFault,
    /// Device watchdog expired.
    WatchdogFault,
    /// Line-level fault with device-specific fault bits.
    LineFault {
        /// Raw fault bits.
        bits: u16,
    },
    /// Register access failed outside a caller's own call, while reading
    /// indications or entering a deferred request. The status carries the
    /// error.
    BusFault,
    /// Subscriber went off-hook.
    HookOff,
    /// Subscriber went on-hook.
    HookOn,
    /// Subscriber flashed the hook.
    HookFlash,
    /// A detected digit.
    Digit {
        /// The digit.
        digit: Digit,
        /// Detected by pulse decoding rather than DTMF.
        pulse: bool,
    },
    /// Loop measurement is available through `get_results`.
    LoopCondition,
    /// Option value is available through `get_results`.
    OptionRead,
    /// Low-level command result is available through `get_results`.
    LowLevelCmd,
    /// A finite ring cadence finished.
    RingCadenceDone,
    /// A finite tone cadence finished.
    ToneCadenceDone,
    /// A `send_signal` program finished.
    SignalComplete(SignalKind),
    /// Caller-ID transmission finished.
    CidTransmitDone,
    /// Half of the caller-ID buffer drained; `continue_cid` may refill it.
    CidNeedMoreData,
    /// The acknowledge window closed without the expected tone; the
    /// caller-ID program was stopped.
    CidAckMissing,
    /// A metering burst finished.
    MeteringComplete,
    /// Generic per-line timer expired.
    TimerExpired {
        /// Caller handle passed to `start_timer`.
        handle: u16,
    },
    /// `init_line` finished.
    LineInitComplete,
}

impl EventKind {
    /// Category of this event.
    #[must_use]
    pub const fn category(self) -> EventCategory {
        match self {
            Self::BatteryFault
            | Self::ClockFault
            | Self::WatchdogFault
            | Self::LineFault { .. }
            | Self::BusFault => EventCategory::Fault,
            Self::HookOff | Self::HookOn | Self::HookFlash | Self::Digit { .. } => {
                EventCategory::Signaling
            }
            Self::LoopCondition | Self::OptionRead | Self::LowLevelCmd => EventCategory::Response,
            Self::RingCadenceDone
            | Self::ToneCadenceDone
            | Self::SignalComplete(_)
            | Self::CidTransmitDone
            | Self::CidNeedMoreData
            | Self::CidAckMissing
            | Self::MeteringComplete
            | Self::TimerExpired { .. }
            | Self::LineInitComplete => EventCategory::Process,
        }
    }

    /// Bit within the category mask word.
    #[must_use]
    pub const fn mask_bit(self) -> u16 {
        let index = match self {
            Self::BatteryFault
            | Self::HookOff
            | Self::LoopCondition
            | Self::RingCadenceDone => 0,
            Self::ClockFault | Self::HookOn | Self::OptionRead | Self::ToneCadenceDone => 1,
            Self::WatchdogFault
            | Self::HookFlash
            | Self::LowLevelCmd
            | Self::SignalComplete(_) => 2,
            Self::LineFault { .. } | Self::Digit { .. } | Self::CidTransmitDone => 3,
            Self::BusFault | Self::CidNeedMoreData => 4,
            Self::MeteringComplete => 5,
            Self::TimerExpired { .. } => 6,
            Self::LineInitComplete => 7,
            Self::CidAckMissing => 8,
        };
        1 << index
    }
}

/// Per-category event mask; a set bit suppresses delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EventMask {
    /// Fault category mask word.
    pub fault: u16,
    /// Signaling category mask word.
    pub signaling: u16,
    /// Response category mask word.
    pub response: u16,
    /// Process category mask word.
    pub process: u16,
    /// Test category mask word.
    pub test: u16,
}

impl EventMask {
    /// Mask with every event suppressed.
    pub const ALL: Self = Self {
        fault: u16::MAX,
        signaling: u16::MAX,
        response: u16::MAX,
        process: u16::MAX,
        test: u16::MAX,
    };

    /// Mask word for one category.
    #[must_use]
    pub const fn word(self, category: EventCategory) -> u16 {
        match category {
            EventCategory::Fault => self.fault,
            EventCategory::Signaling => self.signaling,
            EventCategory::Response => self.response,
            EventCategory::Process => self.process,
            EventCategory::Test => self.test,
        }
    }

    const fn with_word(mut self, category: EventCategory, word: u16) -> Self {
        match category {
            EventCategory::Fault => self.fault = word,
            EventCategory::Signaling => self.signaling = word,
            EventCategory::Response => self.response = word,
            EventCategory::Process => self.process = word,
            EventCategory::Test => self.test = word,
        }
        self
    }

    /// Returns a copy with `kind` suppressed.
    #[must_use]
    pub const fn masking(self, kind: EventKind) -> Self {
        let category = kind.category();
        self.with_word(category, self.word(category) | kind.mask_bit())
    }

    /// Returns a copy with `kind` delivered.
    #[must_use]
    pub const fn unmasking(self, kind: EventKind) -> Self {
        let category = kind.category();
        self.with_word(category, self.word(category) & !kind.mask_bit())
    }

    /// Whether an event of this kind is delivered. Depends only on the
    /// event's category bit and the mask.
    #[must_use]
    pub const fn delivers(self, kind: EventKind) -> bool {
        self.word(kind.category()) & kind.mask_bit() == 0
    }
}

/// Correlation handle for an asynchronous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ResponseHandle(pub u8);

/// One decoded event returned by `poll_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// Originating line, when known.
    pub channel: Option<u8>,
    /// Request handle for response-category events.
    pub request: Option<ResponseHandle>,
    /// Error status carried by events that report a failure.
    pub status: Result<(), VpError>,
}

impl Event {
    /// Successful event for a line.
    #[must_use]
    pub const fn line(kind: EventKind, channel: u8) -> Self {
        Self {
            kind,
            channel: Some(channel),
            request: None,
            status: Ok(()),
        }
    }

    /// Successful device-level event.
    #[must_use]
    pub const fn device(kind: EventKind) -> Self {
        Self {
            kind,
            channel: None,
            request: None,
            status: Ok(()),
        }
    }

    /// Attaches an error status.
    #[must_use]
    pub const fn with_status(mut self, status: Result<(), VpError>) -> Self {
        self.status = status;
        self
    }

    /// Attaches a response handle.
    #[must_use]
    pub const fn with_request(mut self, request: ResponseHandle) -> Self {
        self.request = Some(request);
        self
    }

    /// Category of this event.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        self.kind.category()
    }
}
