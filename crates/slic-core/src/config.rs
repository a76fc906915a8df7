//! Device and line configuration.

use crate::error::VpError;
use crate::event::EventMask;
use crate::registers::DeviceFamily;
use crate::state::LineState;
use crate::timing::TICK_MS;

/// Default number of channels on a device.
pub const DEFAULT_CHANNEL_COUNT: u8 = 2;

/// Device-wide configuration applied by `init_device`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceConfig {
    /// Chip family; selects the register map and capabilities.
    pub family: DeviceFamily,
    /// Number of line channels the device exposes.
    pub channel_count: u8,
    /// Sequencer tick period in milliseconds.
    pub tick_ms: u16,
    /// Mask applied to events not tied to a line.
    pub event_mask: EventMask,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            family: DeviceFamily::Vp880,
            channel_count: DEFAULT_CHANNEL_COUNT,
            tick_ms: TICK_MS,
            event_mask: EventMask::default(),
        }
    }
}

impl DeviceConfig {
    /// Rejects configurations the device cannot run.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] for zero channels, more channels
    /// than the family supports, or a zero tick period.
    pub const fn validate(&self) -> Result<(), VpError> {
        if self.channel_count == 0
            || self.channel_count > self.family.max_channels()
            || self.tick_ms == 0
        {
            return Err(VpError::InvalidArgument);
        }
        Ok(())
    }
}

/// Line role on the analog interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Termination {
    /// Station side: feeds and rings a telephone.
    #[default]
    Fxs,
    /// Office side: dials toward an exchange.
    Fxo,
}

/// Pulse-dialing report mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PulseMode {
    /// Device-decoded pulse digits are reported as digit events.
    #[default]
    Decode,
    /// Pulse digits are dropped; raw hook transitions are reported instead.
    Passthrough,
}

/// Per-line tunables, changed at runtime with `set_option`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LineOptions {
    /// Mask applied to this line's events.
    pub event_mask: EventMask,
    /// Pulse-dialing report mode.
    pub pulse_mode: PulseMode,
    /// Line state entered when the subscriber answers during ringing.
    pub ring_trip_exit: LineState,
    /// Disconnect phase of the park cadence.
    pub park_disconnect_ms: u32,
    /// Standby phase of the park cadence.
    pub park_standby_ms: u32,
    /// DTMF tone-on time for generated digits.
    pub dtmf_on_ms: u32,
    /// DTMF inter-tone gap for generated digits.
    pub dtmf_off_ms: u32,
    /// Loop-open time of one dial pulse.
    pub pulse_break_ms: u32,
    /// Loop-closed time of one dial pulse.
    pub pulse_make_ms: u32,
    /// Pause after the last pulse of a digit.
    pub interdigit_ms: u32,
    /// Loop-open time of a generated hook flash.
    pub flash_ms: u32,
    /// Settle delay after a transient signal restores the line.
    pub signal_settle_ms: u32,
    /// Open-circuit voltage word applied during message-waiting pulses.
    pub mwi_voc: u16,
}

impl Default for LineOptions {
    fn default() -> Self {
        Self {
            event_mask: EventMask::default(),
            pulse_mode: PulseMode::Decode,
            ring_trip_exit: LineState::Talk,
            park_disconnect_ms: 800,
            park_standby_ms: 10_000,
            dtmf_on_ms: 100,
            dtmf_off_ms: 100,
            pulse_break_ms: 60,
            pulse_make_ms: 40,
            interdigit_ms: 700,
            flash_ms: 600,
            signal_settle_ms: 100,
            mwi_voc: 0x0F00,
        }
    }
}

/// Line creation parameters for `make_line`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LineConfig {
    /// Station or office side.
    pub termination: Termination,
    /// Initial option values.
    pub options: LineOptions,
}

/// Identifier for reading a single option back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum OptionId {
    EventMask = 0x01,
    PulseMode = 0x02,
    RingTripExit = 0x03,
    ParkTiming = 0x04,
    DtmfTiming = 0x05,
    PulseTiming = 0x06,
    FlashTime = 0x07,
    SignalSettle = 0x08,
    MwiVoltage = 0x09,
}

impl OptionId {
    /// Converts an option id to its wire code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a wire code back into an option id.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::EventMask),
            0x02 => Some(Self::PulseMode),
            0x03 => Some(Self::RingTripExit),
            0x04 => Some(Self::ParkTiming),
            0x05 => Some(Self::DtmfTiming),
            0x06 => Some(Self::PulseTiming),
            0x07 => Some(Self::FlashTime),
            0x08 => Some(Self::SignalSettle),
            0x09 => Some(Self::MwiVoltage),
            _ => None,
        }
    }
}

/// A single option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum LineOption {
    EventMask(EventMask),
    PulseMode(PulseMode),
    RingTripExit(LineState),
    ParkTiming { disconnect_ms: u32, standby_ms: u32 },
    DtmfTiming { on_ms: u32, off_ms: u32 },
    PulseTiming { break_ms: u32, make_ms: u32, interdigit_ms: u32 },
    FlashTime(u32),
    SignalSettle(u32),
    MwiVoltage(u16),
}

impl LineOption {
    /// Identifier of this option.
    #[must_use]
    pub const fn id(self) -> OptionId {
        match self {
            Self::EventMask(_) => OptionId::EventMask,
            Self::PulseMode(_) => OptionId::PulseMode,
            Self::RingTripExit(_) => OptionId::RingTripExit,
            Self::ParkTiming { .. } => OptionId::ParkTiming,
            Self::DtmfTiming { .. } => OptionId::DtmfTiming,
            Self::PulseTiming { .. } => OptionId::PulseTiming,
            Self::FlashTime(_) => OptionId::FlashTime,
            Self::SignalSettle(_) => OptionId::SignalSettle,
            Self::MwiVoltage(_) => OptionId::MwiVoltage,
        }
    }
}

impl LineOptions {
    /// Validates and applies one option.
    ///
    /// # Errors
    ///
    /// Returns [`VpError::InvalidArgument`] for a ring-trip exit state that
    /// is not a directly driven state of this termination, or for a zero
    /// duration where a finite time is required. Nothing is changed on error.
    pub fn apply(&mut self, termination: Termination, option: LineOption) -> Result<(), VpError> {
        let nonzero = |values: &[u32]| {
            if values.contains(&0) {
                Err(VpError::InvalidArgument)
            } else {
                Ok(())
            }
        };
        match option {
            LineOption::EventMask(mask) => self.event_mask = mask,
            LineOption::PulseMode(mode) => self.pulse_mode = mode,
            LineOption::RingTripExit(state) => {
                if state.static_drive().is_none() || !state.valid_for(termination) {
                    return Err(VpError::InvalidArgument);
                }
                self.ring_trip_exit = state;
            }
            LineOption::ParkTiming {
                disconnect_ms,
                standby_ms,
            } => {
                nonzero(&[disconnect_ms, standby_ms])?;
                self.park_disconnect_ms = disconnect_ms;
                self.park_standby_ms = standby_ms;
            }
            LineOption::DtmfTiming { on_ms, off_ms } => {
                nonzero(&[on_ms, off_ms])?;
                self.dtmf_on_ms = on_ms;
                self.dtmf_off_ms = off_ms;
            }
            LineOption::PulseTiming {
                break_ms,
                make_ms,
                interdigit_ms,
            } => {
                nonzero(&[break_ms, make_ms, interdigit_ms])?;
                self.pulse_break_ms = break_ms;
                self.pulse_make_ms = make_ms;
                self.interdigit_ms = interdigit_ms;
            }
            LineOption::FlashTime(ms) => {
                nonzero(&[ms])?;
                self.flash_ms = ms;
            }
            LineOption::SignalSettle(ms) => {
                nonzero(&[ms])?;
                self.signal_settle_ms = ms;
            }
            LineOption::MwiVoltage(voc) => self.mwi_voc = voc,
        }
        Ok(())
    }

    /// Reads the current value of one option.
    #[must_use]
    pub const fn get(&self, id: OptionId) -> LineOption {
        match id {
            OptionId::EventMask => LineOption::EventMask(self.event_mask),
            OptionId::PulseMode => LineOption::PulseMode(self.pulse_mode),
            OptionId::RingTripExit => LineOption::RingTripExit(self.ring_trip_exit),
            OptionId::ParkTiming => LineOption::ParkTiming {
                disconnect_ms: self.park_disconnect_ms,
                standby_ms: self.park_standby_ms,
            },
            OptionId::DtmfTiming => LineOption::DtmfTiming {
                on_ms: self.dtmf_on_ms,
                off_ms: self.dtmf_off_ms,
            },
            OptionId::PulseTiming => LineOption::PulseTiming {
                break_ms: self.pulse_break_ms,
                make_ms: self.pulse_make_ms,
                interdigit_ms: self.interdigit_ms,
            },
            OptionId::FlashTime => LineOption::FlashTime(self.flash_ms),
            OptionId::SignalSettle => LineOption::SignalSettle(self.signal_settle_ms),
            OptionId::MwiVoltage => LineOption::MwiVoltage(self.mwi_voc),
        }
    }
}
