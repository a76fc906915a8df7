/// Device-level electrical drive state (4-bit `SetState` payload and the
/// per-line drive-state register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum DriveState {
    /// Line fully disconnected.
    #[default]
    Disconnect = 0x0,
    /// Low-power standby feed.
    Standby = 0x1,
    /// Active feed, normal polarity.
    Active = 0x2,
    /// Active feed, reversed polarity.
    ActiveReverse = 0x3,
    /// Talk path enabled, normal polarity.
    Talk = 0x4,
    /// Talk path enabled, reversed polarity.
    TalkReverse = 0x5,
    /// On-hook transmission, normal polarity.
    OnHookTransmit = 0x6,
    /// On-hook transmission, reversed polarity.
    OnHookTransmitReverse = 0x7,
    /// Ringing with talk/receive paths cut.
    Ringing = 0x8,
    /// Tip lead open.
    TipOpen = 0xA,
    /// FXO loop open (on-hook toward the exchange).
    LoopOpen = 0xC,
    /// FXO loop closed (off-hook toward the exchange).
    LoopClose = 0xD,
    /// FXO loop closed with the voice path enabled.
    FxoTalk = 0xE,
}

/// PCM path cut-off bits written alongside a drive-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmCut {
    /// Transmit (line to host) path cut.
    pub tx: bool,
    /// Receive (host to line) path cut.
    pub rx: bool,
}

impl PcmCut {
    /// Register bit for a cut transmit path.
    pub const TX_BIT: u16 = 0x0001;
    /// Register bit for a cut receive path.
    pub const RX_BIT: u16 = 0x0002;

    /// Returns the register bits for this cut-off setting.
    #[must_use]
    pub const fn bits(self) -> u16 {
        let mut bits = 0;
        if self.tx {
            bits |= Self::TX_BIT;
        }
        if self.rx {
            bits |= Self::RX_BIT;
        }
        bits
    }
}

impl DriveState {
    /// Converts a drive state to its 4-bit encoding.
    #[must_use]
    pub const fn as_u4(self) -> u8 {
        self as u8
    }

    /// Converts a 4-bit encoding into a drive state.
    #[must_use]
    pub const fn from_u4(code: u8) -> Option<Self> {
        match code {
            0x0 => Some(Self::Disconnect),
            0x1 => Some(Self::Standby),
            0x2 => Some(Self::Active),
            0x3 => Some(Self::ActiveReverse),
            0x4 => Some(Self::Talk),
            0x5 => Some(Self::TalkReverse),
            0x6 => Some(Self::OnHookTransmit),
            0x7 => Some(Self::OnHookTransmitReverse),
            0x8 => Some(Self::Ringing),
            0xA => Some(Self::TipOpen),
            0xC => Some(Self::LoopOpen),
            0xD => Some(Self::LoopClose),
            0xE => Some(Self::FxoTalk),
            _ => None,
        }
    }

    /// Returns true for states with the voice path connected both ways.
    #[must_use]
    pub const fn is_talk(self) -> bool {
        matches!(self, Self::Talk | Self::TalkReverse | Self::FxoTalk)
    }

    /// Returns true for states in which metering pulses may be applied.
    #[must_use]
    pub const fn supports_metering(self) -> bool {
        matches!(
            self,
            Self::Active | Self::ActiveReverse | Self::Talk | Self::TalkReverse
        )
    }

    /// Returns true for FXO-side loop states.
    #[must_use]
    pub const fn is_fxo(self) -> bool {
        matches!(self, Self::LoopOpen | Self::LoopClose | Self::FxoTalk)
    }

    /// Returns the opposite-polarity counterpart, if the state has one.
    #[must_use]
    pub const fn reversed(self) -> Option<Self> {
        match self {
            Self::Active => Some(Self::ActiveReverse),
            Self::ActiveReverse => Some(Self::Active),
            Self::Talk => Some(Self::TalkReverse),
            Self::TalkReverse => Some(Self::Talk),
            Self::OnHookTransmit => Some(Self::OnHookTransmitReverse),
            Self::OnHookTransmitReverse => Some(Self::OnHookTransmit),
            _ => None,
        }
    }

    /// PCM cut-off implied by this state.
    #[must_use]
    pub const fn pcm_cut(self) -> PcmCut {
        if self.is_talk() {
            PcmCut { tx: false, rx: false }
        } else if matches!(self, Self::OnHookTransmit | Self::OnHookTransmitReverse) {
            PcmCut { tx: true, rx: false }
        } else {
            PcmCut { tx: true, rx: true }
        }
    }
}
