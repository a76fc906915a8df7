//! Raw device indications, their classification, and the table that
//! correlates asynchronous requests with mailbox responses.
//!
//! An indication is two words, `[id, param]`. Line indications carry the
//! channel in the high byte of `param` and their data in the low byte.

use crate::config::{LineOption, OptionId};
use crate::encoding::Marker;
use crate::error::VpError;
use crate::event::{Event, EventKind, ResponseHandle};
use crate::registers::MailboxCommand;
use crate::signal::Digit;

/// Raw indication identifiers.
pub mod ids {
    /// Indication register empty.
    pub const NONE: u16 = 0x0000;
    /// Device fault; `param` holds fault bits.
    pub const SYSTEM_FAULT: u16 = 0x0001;
    /// Sequencer user event; data is the marker id.
    pub const USER_EVENT: u16 = 0x0010;
    /// Loop closed.
    pub const HOOK_OFF: u16 = 0x0020;
    /// Loop opened.
    pub const HOOK_ON: u16 = 0x0021;
    /// Timed loop break.
    pub const HOOK_FLASH: u16 = 0x0022;
    /// DTMF digit; data is the digit nibble.
    pub const DIGIT: u16 = 0x0030;
    /// Pulse-decoded digit; data is the digit nibble.
    pub const PULSE_DIGIT: u16 = 0x0031;
    /// Sequencer program ended or was stopped.
    pub const SEQUENCE_COMPLETE: u16 = 0x0040;
    /// Meter abort acknowledged.
    pub const METER_ABORT_COMPLETE: u16 = 0x0041;
    /// Hardware FSK buffer drained; data is the buffer index.
    pub const FSK_BUFFER_EMPTY: u16 = 0x0050;
    /// Last FSK buffer, with end-of-message, was sent.
    pub const CID_TX_COMPLETE: u16 = 0x0051;
    /// Line timer expired.
    pub const TIMER_COMPLETE: u16 = 0x0060;
    /// Mailbox response ready; `param` is the request handle.
    pub const MAILBOX_RESPONSE: u16 = 0x0070;
    /// Line fault; data is the fault bits.
    pub const LINE_FAULT: u16 = 0x0080;
}

/// Battery supply fault bit of `SYSTEM_FAULT`.
pub const FAULT_BATTERY: u16 = 0x0001;
/// Clock fault bit of `SYSTEM_FAULT`.
pub const FAULT_CLOCK: u16 = 0x0002;
/// Watchdog fault bit of `SYSTEM_FAULT`.
pub const FAULT_WATCHDOG: u16 = 0x0004;
const FAULT_KNOWN: u16 = FAULT_BATTERY | FAULT_CLOCK | FAULT_WATCHDOG;

/// Number of asynchronous requests that may be outstanding at once.
pub const RESPONSE_SLOTS: usize = 4;

/// One indication read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RawIndication {
    /// Indication identifier, see [`ids`].
    pub id: u16,
    /// Identifier-specific parameter.
    pub param: u16,
}

impl RawIndication {
    /// Builds a line indication with `data` in the low byte.
    #[must_use]
    pub const fn line(id: u16, channel: u8, data: u8) -> Self {
        Self {
            id,
            param: (channel as u16) << 8 | data as u16,
        }
    }

    /// Channel carried in the parameter's high byte.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn channel(self) -> u8 {
        (self.param >> 8) as u8
    }

    /// Data carried in the parameter's low byte.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn data(self) -> u8 {
        self.param as u8
    }
}

/// Indication addressed to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum LineIndication {
    HookOff,
    HookOn,
    HookFlash,
    Digit(Digit),
    PulseDigit(Digit),
    SequenceComplete,
    MeterAbortComplete,
    FskBufferEmpty(usize),
    CidTxComplete,
    TimerComplete,
    Fault(u8),
}

/// Result of classifying a raw indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classified {
    /// One device fault, plus the fault bits still to report.
    SystemFault {
        /// Event for the lowest set fault bit.
        kind: EventKind,
        /// Remaining known fault bits.
        remaining: u16,
    },
    /// Sequencer marker for a line.
    Marker {
        /// Line the marker came from.
        channel: u8,
        /// Marker id.
        marker: Marker,
    },
    /// Line indication.
    Line {
        /// Addressed line.
        channel: u8,
        /// What happened.
        indication: LineIndication,
    },
    /// Response to an asynchronous request.
    Response(ResponseHandle),
    /// Not understood; dropped.
    Unknown,
}

/// Classifies one raw indication: faults first, then sequencer markers,
/// then line and response indications.
#[must_use]
pub fn classify(raw: RawIndication) -> Classified {
    if raw.id == ids::SYSTEM_FAULT {
        return peel_fault(raw.param);
    }
    let channel = raw.channel();
    if raw.id == ids::USER_EVENT {
        return Classified::Marker {
            channel,
            marker: Marker(raw.data()),
        };
    }
    let indication = match raw.id {
        ids::HOOK_OFF => LineIndication::HookOff,
        ids::HOOK_ON => LineIndication::HookOn,
        ids::HOOK_FLASH => LineIndication::HookFlash,
        ids::DIGIT | ids::PULSE_DIGIT => {
            let Some(digit) = Digit::from_nibble(raw.data()) else {
                return Classified::Unknown;
            };
            if raw.id == ids::DIGIT {
                LineIndication::Digit(digit)
            } else {
                LineIndication::PulseDigit(digit)
            }
        }
        ids::SEQUENCE_COMPLETE => LineIndication::SequenceComplete,
        ids::METER_ABORT_COMPLETE => LineIndication::MeterAbortComplete,
        ids::FSK_BUFFER_EMPTY => LineIndication::FskBufferEmpty(usize::from(raw.data())),
        ids::CID_TX_COMPLETE => LineIndication::CidTxComplete,
        ids::TIMER_COMPLETE => LineIndication::TimerComplete,
        ids::LINE_FAULT => LineIndication::Fault(raw.data()),
        ids::MAILBOX_RESPONSE => {
            return match u8::try_from(raw.param) {
                Ok(handle) => Classified::Response(ResponseHandle(handle)),
                Err(_) => Classified::Unknown,
            };
        }
        _ => return Classified::Unknown,
    };
    Classified::Line {
        channel,
        indication,
    }
}

/// Splits off the lowest known fault bit.
fn peel_fault(bits: u16) -> Classified {
    let known = bits & FAULT_KNOWN;
    let lowest = known & known.wrapping_neg();
    let kind = match lowest {
        FAULT_BATTERY => EventKind::BatteryFault,
        FAULT_CLOCK => EventKind::ClockFault,
        FAULT_WATCHDOG => EventKind::WatchdogFault,
        _ => return Classified::Unknown,
    };
    Classified::SystemFault {
        kind,
        remaining: known & !lowest,
    }
}

/// Loop measurement requested through `get_loop_condition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum LoopParam {
    /// Loop current.
    LoopCurrent = 0,
    /// Tip-ring voltage.
    TipRingVoltage = 1,
    /// Battery voltage.
    BatteryVoltage = 2,
}

impl LoopParam {
    /// Wire code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a wire code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::LoopCurrent),
            1 => Some(Self::TipRingVoltage),
            2 => Some(Self::BatteryVoltage),
            _ => None,
        }
    }
}

/// What an outstanding request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `get_loop_condition`.
    LoopCondition(LoopParam),
    /// `get_option`.
    Option(OptionId),
    /// `low_level_cmd`.
    LowLevel,
}

impl RequestKind {
    /// Mailbox command carrying this request.
    #[must_use]
    pub const fn command(self) -> MailboxCommand {
        match self {
            Self::LoopCondition(_) => MailboxCommand::LoopCondition,
            Self::Option(_) => MailboxCommand::GetOption,
            Self::LowLevel => MailboxCommand::LowLevel,
        }
    }

    /// Event announcing the response.
    #[must_use]
    pub const fn event_kind(self) -> EventKind {
        match self {
            Self::LoopCondition(_) => EventKind::LoopCondition,
            Self::Option(_) => EventKind::OptionRead,
            Self::LowLevel => EventKind::LowLevelCmd,
        }
    }
}

/// Data fetched by `get_results`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ResultData {
    /// Loop measurement.
    LoopCondition {
        /// What was measured.
        param: LoopParam,
        /// Raw measurement.
        value: u16,
    },
    /// Option value.
    Option(LineOption),
    /// Words returned by a low-level command.
    LowLevel(Vec<u16>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    kind: RequestKind,
    channel: u8,
    answered: bool,
}

/// Outstanding asynchronous requests, indexed by handle.
#[derive(Debug, Clone, Default)]
pub struct ResponseTable {
    slots: [Option<Slot>; RESPONSE_SLOTS],
}

impl ResponseTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a handle for a new request.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::DeviceBusy`] when every slot is outstanding.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate(&mut self, kind: RequestKind, channel: u8) -> Result<ResponseHandle, VpError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(VpError::DeviceBusy)?;
        self.slots[index] = Some(Slot {
            kind,
            channel,
            answered: false,
        });
        Ok(ResponseHandle(index as u8))
    }

    /// Frees a handle.
    pub fn release(&mut self, handle: ResponseHandle) {
        if let Some(slot) = self.slots.get_mut(usize::from(handle.0)) {
            *slot = None;
        }
    }

    /// Marks a request answered and returns the event announcing it, or
    /// `None` for a handle with no outstanding request.
    pub fn answer(&mut self, handle: ResponseHandle) -> Option<Event> {
        let slot = self.slots.get_mut(usize::from(handle.0))?.as_mut()?;
        slot.answered = true;
        Some(Event::line(slot.kind.event_kind(), slot.channel).with_request(handle))
    }

    /// Request kind and channel of an answered request.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::MailboxEmpty`] when the handle is free or not yet
    /// answered.
    pub fn answered(&self, handle: ResponseHandle) -> Result<(RequestKind, u8), VpError> {
        match self.slots.get(usize::from(handle.0)).copied().flatten() {
            Some(slot) if slot.answered => Ok((slot.kind, slot.channel)),
            _ => Err(VpError::MailboxEmpty),
        }
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Forgets every request.
    pub fn clear(&mut self) {
        self.slots = [None; RESPONSE_SLOTS];
    }
}
