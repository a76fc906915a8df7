//! Per-family register offset tables and fixed register layouts.
//!
//! Offsets are word addresses within either the device space or one line's
//! space (see [`crate::transport::RegisterTarget`]). Field layouts inside the
//! multi-word regions are shared by all families.

use crate::encoding::MAX_PROGRAM_LEN;

/// Words in the raw indication register (`[event id, param]`).
pub const INDICATION_WORDS: usize = 2;
/// Words in the DC feed region (`[open-circuit voltage, loop current limit]`).
pub const DC_FEED_WORDS: usize = 2;
/// Words in the generator parameter region.
pub const GENERATOR_PARAM_WORDS: usize = 8;
/// Words in one FSK hardware buffer (`[count | EOM, bytes 0-1, bytes 2-3]`).
pub const FSK_BUFFER_WORDS: usize = 3;
/// Payload bytes held by one FSK hardware buffer.
pub const FSK_BUFFER_BYTES: usize = 4;
/// Words in the timer region (`[ticks, handle]`).
pub const TIMER_WORDS: usize = 2;
/// Words in the sequencer program region (header plus instructions).
pub const SEQUENCE_WORDS: usize = MAX_PROGRAM_LEN + 1;
/// Fixed words at the start of a mailbox frame (`[cmd, channel, handle, len]`).
pub const MAILBOX_HEADER_WORDS: usize = 4;
/// Words in the command mailbox.
pub const MAILBOX_WORDS: usize = MAILBOX_HEADER_WORDS + SEQUENCE_WORDS + 1;
/// Fixed words at the start of the response region (`[cmd, handle, len]`).
pub const RESPONSE_HEADER_WORDS: usize = 3;
/// Words in the response region.
pub const RESPONSE_WORDS: usize = RESPONSE_HEADER_WORDS + 8;

/// Generator parameter word: tone A frequency.
pub const GEN_A_FREQ: usize = 0;
/// Generator parameter word: tone A amplitude.
pub const GEN_A_AMP: usize = 1;
/// Generator parameter word: tone B frequency.
pub const GEN_B_FREQ: usize = 2;
/// Generator parameter word: tone B amplitude.
pub const GEN_B_AMP: usize = 3;

/// FSK buffer header bit marking the final buffer of a message.
pub const FSK_EOM_BIT: u16 = 0x8000;
/// FSK control bit enabling the modulator.
pub const FSK_ENABLE_BIT: u16 = 0x0001;
/// Meter control bit requesting an abort of the running burst.
pub const METER_ABORT_BIT: u16 = 0x0001;

/// Command codes written to word 0 of the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum MailboxCommand {
    SeqUpload = 0x0001,
    SeqControl = 0x0002,
    LoopCondition = 0x0010,
    GetOption = 0x0011,
    LowLevel = 0x0012,
}

impl MailboxCommand {
    /// Converts a command to its mailbox word.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a mailbox word back into a command.
    #[must_use]
    pub const fn from_u16(word: u16) -> Option<Self> {
        match word {
            0x0001 => Some(Self::SeqUpload),
            0x0002 => Some(Self::SeqControl),
            0x0010 => Some(Self::LoopCondition),
            0x0011 => Some(Self::GetOption),
            0x0012 => Some(Self::LowLevel),
            _ => None,
        }
    }
}

/// Supported chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum DeviceFamily {
    /// Two-channel FXS family with a register-mapped sequencer.
    #[default]
    Vp880,
    /// FXS/FXO combination family with a register-mapped sequencer.
    Vp890,
    /// Multi-channel family whose sequencer is driven through the mailbox.
    Vp792,
}

impl DeviceFamily {
    /// Register offset table for this family.
    #[must_use]
    pub const fn map(self) -> &'static RegisterMap {
        match self {
            Self::Vp880 => &VP880_MAP,
            Self::Vp890 => &VP890_MAP,
            Self::Vp792 => &VP792_MAP,
        }
    }

    /// Sequencer programs and controls travel through the command mailbox.
    #[must_use]
    pub const fn uses_mailbox_for_sequencer(self) -> bool {
        matches!(self, Self::Vp792)
    }

    /// The sequencer accepts `BreakAndResume` as one control write.
    #[must_use]
    pub const fn native_break_and_resume(self) -> bool {
        !matches!(self, Self::Vp792)
    }

    /// Largest channel count the family provides.
    #[must_use]
    pub const fn max_channels(self) -> u8 {
        match self {
            Self::Vp880 | Self::Vp890 => 2,
            Self::Vp792 => 8,
        }
    }

    /// The family can terminate FXO lines.
    #[must_use]
    pub const fn supports_fxo(self) -> bool {
        matches!(self, Self::Vp890)
    }
}

/// Register offsets for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterMap {
    /// Device: raw indication pair; reading pops the next indication.
    pub indication: u16,
    /// Device: command mailbox frame.
    pub mailbox: u16,
    /// Device: response region.
    pub response: u16,
    /// Line: drive-state code.
    pub drive_state: u16,
    /// Line: PCM cut-off bits.
    pub pcm_control: u16,
    /// Line: DC feed parameters.
    pub dc_feed: u16,
    /// Line: generator enable mask.
    pub generator_enable: u16,
    /// Line: generator frequency/amplitude words.
    pub generator_params: u16,
    /// Line: FSK modulator control.
    pub fsk_control: u16,
    /// Line: the two FSK hardware buffers.
    pub fsk_buffers: [u16; 2],
    /// Line: metering control.
    pub meter_control: u16,
    /// Line: generic timer.
    pub timer: u16,
    /// Line: sequencer program; word 0 is the header/control word.
    pub sequence_program: u16,
}

impl RegisterMap {
    /// Line regions as `(offset, width)` pairs in ascending order.
    #[must_use]
    pub const fn line_regions(&self) -> [(u16, usize); 11] {
        [
            (self.drive_state, 1),
            (self.pcm_control, 1),
            (self.dc_feed, DC_FEED_WORDS),
            (self.generator_enable, 1),
            (self.generator_params, GENERATOR_PARAM_WORDS),
            (self.fsk_control, 1),
            (self.fsk_buffers[0], FSK_BUFFER_WORDS),
            (self.fsk_buffers[1], FSK_BUFFER_WORDS),
            (self.meter_control, 1),
            (self.timer, TIMER_WORDS),
            (self.sequence_program, SEQUENCE_WORDS),
        ]
    }

    /// Device regions as `(offset, width)` pairs in ascending order.
    #[must_use]
    pub const fn device_regions(&self) -> [(u16, usize); 3] {
        [
            (self.indication, INDICATION_WORDS),
            (self.mailbox, MAILBOX_WORDS),
            (self.response, RESPONSE_WORDS),
        ]
    }
}

/// Register map of the two-channel FXS family.
pub const VP880_MAP: RegisterMap = RegisterMap {
    indication: 0x0000,
    mailbox: 0x0010,
    response: 0x0040,
    drive_state: 0x0000,
    pcm_control: 0x0001,
    dc_feed: 0x0004,
    generator_enable: 0x0008,
    generator_params: 0x0010,
    fsk_control: 0x0020,
    fsk_buffers: [0x0024, 0x0028],
    meter_control: 0x0030,
    timer: 0x0034,
    sequence_program: 0x0040,
};

/// Register map of the FXS/FXO combination family.
pub const VP890_MAP: RegisterMap = RegisterMap {
    indication: 0x0002,
    mailbox: 0x0020,
    response: 0x0060,
    drive_state: 0x0002,
    pcm_control: 0x0003,
    dc_feed: 0x0006,
    generator_enable: 0x000A,
    generator_params: 0x0018,
    fsk_control: 0x0028,
    fsk_buffers: [0x002C, 0x0030],
    meter_control: 0x0034,
    timer: 0x0038,
    sequence_program: 0x0060,
};

/// Register map of the mailbox-driven multi-channel family.
pub const VP792_MAP: RegisterMap = RegisterMap {
    indication: 0x0100,
    mailbox: 0x0180,
    response: 0x01C0,
    drive_state: 0x0010,
    pcm_control: 0x0011,
    dc_feed: 0x0014,
    generator_enable: 0x0018,
    generator_params: 0x0020,
    fsk_control: 0x0030,
    fsk_buffers: [0x0034, 0x0038],
    meter_control: 0x003C,
    timer: 0x003E,
    sequence_program: 0x0080,
};

const _: () = assert_register_layouts();

const fn assert_register_layouts() {
    assert_ascending(&VP880_MAP.line_regions());
    assert_ascending(&VP890_MAP.line_regions());
    assert_ascending(&VP792_MAP.line_regions());
    assert_ascending(&VP880_MAP.device_regions());
    assert_ascending(&VP890_MAP.device_regions());
    assert_ascending(&VP792_MAP.device_regions());
}

const fn assert_ascending(regions: &[(u16, usize)]) {
    let mut i = 1;
    while i < regions.len() {
        let (prev_start, prev_width) = regions[i - 1];
        assert!(
            prev_start as usize + prev_width <= regions[i].0 as usize,
            "register regions must not overlap"
        );
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceFamily, MailboxCommand, FSK_BUFFER_BYTES, FSK_BUFFER_WORDS};

    #[test]
    fn families_select_distinct_maps() {
        assert_ne!(DeviceFamily::Vp880.map(), DeviceFamily::Vp890.map());
        assert_ne!(DeviceFamily::Vp890.map(), DeviceFamily::Vp792.map());
    }

    #[test]
    fn only_mailbox_family_lacks_native_break_and_resume() {
        for family in [DeviceFamily::Vp880, DeviceFamily::Vp890, DeviceFamily::Vp792] {
            assert_eq!(
                family.uses_mailbox_for_sequencer(),
                !family.native_break_and_resume()
            );
        }
        assert!(DeviceFamily::Vp890.supports_fxo());
        assert!(!DeviceFamily::Vp880.supports_fxo());
    }

    #[test]
    fn mailbox_commands_roundtrip() {
        for command in [
            MailboxCommand::SeqUpload,
            MailboxCommand::SeqControl,
            MailboxCommand::LoopCondition,
            MailboxCommand::GetOption,
            MailboxCommand::LowLevel,
        ] {
            assert_eq!(MailboxCommand::from_u16(command.as_u16()), Some(command));
        }
        assert_eq!(MailboxCommand::from_u16(0xFFFF), None);
    }

    #[test]
    fn fsk_buffer_holds_two_packed_words() {
        assert_eq!(FSK_BUFFER_BYTES, (FSK_BUFFER_WORDS - 1) * 2);
    }
}
