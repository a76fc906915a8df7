use super::DriveState;
use crate::config::Termination;

/// User-level line state requested through `set_line_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum LineState {
    #[default]
    Disconnect,
    Standby,
    Active,
    ActiveReverse,
    Talk,
    TalkReverse,
    OnHookTransmit,
    OnHookTransmitReverse,
    Ringing,
    TipOpen,
    /// Alternates disconnect and standby under sequencer control.
    Park,
    FxoLoopOpen,
    FxoLoopClose,
    FxoTalk,
}

impl LineState {
    /// Returns the drive state written directly for this line state, or
    /// `None` when the state is produced by a sequencer program.
    #[must_use]
    pub const fn static_drive(self) -> Option<DriveState> {
        match self {
            Self::Disconnect => Some(DriveState::Disconnect),
            Self::Standby => Some(DriveState::Standby),
            Self::Active => Some(DriveState::Active),
            Self::ActiveReverse => Some(DriveState::ActiveReverse),
            Self::Talk => Some(DriveState::Talk),
            Self::TalkReverse => Some(DriveState::TalkReverse),
            Self::OnHookTransmit => Some(DriveState::OnHookTransmit),
            Self::OnHookTransmitReverse => Some(DriveState::OnHookTransmitReverse),
            Self::TipOpen => Some(DriveState::TipOpen),
            Self::FxoLoopOpen => Some(DriveState::LoopOpen),
            Self::FxoLoopClose => Some(DriveState::LoopClose),
            Self::FxoTalk => Some(DriveState::FxoTalk),
            Self::Ringing | Self::Park => None,
        }
    }

    /// Maps a drive state read back from the device to the line state it
    /// represents.
    #[must_use]
    pub const fn from_drive(drive: DriveState) -> Self {
        match drive {
            DriveState::Disconnect => Self::Disconnect,
            DriveState::Standby => Self::Standby,
            DriveState::Active => Self::Active,
            DriveState::ActiveReverse => Self::ActiveReverse,
            DriveState::Talk => Self::Talk,
            DriveState::TalkReverse => Self::TalkReverse,
            DriveState::OnHookTransmit => Self::OnHookTransmit,
            DriveState::OnHookTransmitReverse => Self::OnHookTransmitReverse,
            DriveState::Ringing => Self::Ringing,
            DriveState::TipOpen => Self::TipOpen,
            DriveState::LoopOpen => Self::FxoLoopOpen,
            DriveState::LoopClose => Self::FxoLoopClose,
            DriveState::FxoTalk => Self::FxoTalk,
        }
    }

    /// Returns true for states only meaningful on an FXO termination.
    #[must_use]
    pub const fn is_fxo(self) -> bool {
        matches!(self, Self::FxoLoopOpen | Self::FxoLoopClose | Self::FxoTalk)
    }

    /// Returns true when the state may be requested on a line of the given
    /// termination.
    #[must_use]
    pub const fn valid_for(self, termination: Termination) -> bool {
        match termination {
            Termination::Fxs => !self.is_fxo(),
            Termination::Fxo => self.is_fxo(),
        }
    }

    /// Returns true when active metering may continue across a transition
    /// into this state.
    #[must_use]
    pub const fn supports_metering(self) -> bool {
        match self.static_drive() {
            Some(drive) => drive.supports_metering(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::LineState;
    use crate::config::Termination;
    use crate::state::DriveState;

    #[rstest]
    #[case(LineState::Active, Some(DriveState::Active))]
    #[case(LineState::FxoTalk, Some(DriveState::FxoTalk))]
    #[case(LineState::Ringing, None)]
    #[case(LineState::Park, None)]
    fn static_drive_mapping(#[case] state: LineState, #[case] expected: Option<DriveState>) {
        assert_eq!(state.static_drive(), expected);
    }

    #[test]
    fn drive_readback_inverts_static_mapping() {
        for code in 0u8..=0xF {
            let Some(drive) = DriveState::from_u4(code) else {
                continue;
            };
            let state = LineState::from_drive(drive);
            if let Some(back) = state.static_drive() {
                assert_eq!(back, drive);
            }
        }
    }

    #[test]
    fn termination_filters_states() {
        assert!(LineState::Ringing.valid_for(Termination::Fxs));
        assert!(!LineState::Ringing.valid_for(Termination::Fxo));
        assert!(LineState::FxoLoopClose.valid_for(Termination::Fxo));
        assert!(!LineState::FxoLoopClose.valid_for(Termination::Fxs));
    }

    #[test]
    fn metering_survives_only_fed_states() {
        assert!(LineState::Talk.supports_metering());
        assert!(!LineState::Standby.supports_metering());
        assert!(!LineState::Ringing.supports_metering());
    }
}
