//! Sequencer tick quantization.
//!
//! All device-side timing is expressed in sequencer ticks. Host APIs accept
//! milliseconds and convert once, at program-build time.

/// Sequencer time quantum on every supported family, in milliseconds.
pub const TICK_MS: u16 = 5;

/// Largest tick count a single `Delay` instruction can encode (11 bits).
pub const MAX_DELAY_TICKS: u16 = 0x07FF;

/// Quantized duration in sequencer ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Ticks {
    /// Sentinel for a zero-millisecond request: hold until resumed or aborted.
    Forever,
    /// Finite duration, always at least one tick.
    Count(u32),
}

impl Ticks {
    /// Returns the tick count, or `None` for [`Ticks::Forever`].
    #[must_use]
    pub const fn count(self) -> Option<u32> {
        match self {
            Self::Forever => None,
            Self::Count(n) => Some(n),
        }
    }

    /// Removes one tick-period of latency compensation, never dropping below
    /// one tick. `Forever` is unchanged.
    #[must_use]
    pub const fn less_one(self) -> Self {
        match self {
            Self::Forever => Self::Forever,
            Self::Count(n) if n > 1 => Self::Count(n - 1),
            Self::Count(_) => Self::Count(1),
        }
    }

    /// Returns the value stored in a `Delay` instruction's tick field, where
    /// zero encodes "forever".
    ///
    /// Returns `None` when the duration does not fit the 11-bit field.
    #[must_use]
    pub const fn delay_field(self) -> Option<u16> {
        match self {
            Self::Forever => Some(0),
            Self::Count(n) if n <= MAX_DELAY_TICKS as u32 => Some(n as u16),
            Self::Count(_) => None,
        }
    }
}

/// Converts milliseconds to sequencer ticks using the default 5 ms period.
#[must_use]
pub const fn ms_to_ticks(ms: u32) -> Ticks {
    ms_to_ticks_with(ms, TICK_MS)
}

/// Converts milliseconds to ticks of `tick_ms`, rounding to nearest with a
/// one-tick floor. Zero milliseconds maps to [`Ticks::Forever`].
#[must_use]
pub const fn ms_to_ticks_with(ms: u32, tick_ms: u16) -> Ticks {
    if ms == 0 {
        return Ticks::Forever;
    }
    let period = if tick_ms == 0 { 1 } else { tick_ms as u32 };
    let rounded = (ms + period / 2) / period;
    if rounded == 0 {
        Ticks::Count(1)
    } else {
        Ticks::Count(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::{ms_to_ticks, ms_to_ticks_with, Ticks, MAX_DELAY_TICKS};

    #[test]
    fn zero_is_forever_sentinel() {
        assert_eq!(ms_to_ticks(0), Ticks::Forever);
        assert_eq!(Ticks::Forever.delay_field(), Some(0));
    }

    #[test]
    fn sub_tick_durations_floor_to_one() {
        assert_eq!(ms_to_ticks(1), Ticks::Count(1));
        assert_eq!(ms_to_ticks(2), Ticks::Count(1));
    }

    #[test]
    fn rounding_is_to_nearest() {
        assert_eq!(ms_to_ticks(200), Ticks::Count(40));
        assert_eq!(ms_to_ticks(102), Ticks::Count(20));
        assert_eq!(ms_to_ticks(103), Ticks::Count(21));
        assert_eq!(ms_to_ticks_with(10, 4), Ticks::Count(3));
    }

    #[test]
    fn latency_compensation_keeps_floor() {
        assert_eq!(Ticks::Count(20).less_one(), Ticks::Count(19));
        assert_eq!(Ticks::Count(1).less_one(), Ticks::Count(1));
        assert_eq!(Ticks::Forever.less_one(), Ticks::Forever);
    }

    #[test]
    fn delay_field_rejects_oversized_durations() {
        assert_eq!(
            Ticks::Count(u32::from(MAX_DELAY_TICKS)).delay_field(),
            Some(MAX_DELAY_TICKS)
        );
        assert_eq!(Ticks::Count(u32::from(MAX_DELAY_TICKS) + 1).delay_field(), None);
    }
}
