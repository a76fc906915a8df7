//! Sequencer word layout: opcode and control-field tables, header packing,
//! and the small value types carried in instruction payloads.

/// Maximum number of instructions in one sequencer program.
pub const MAX_PROGRAM_LEN: usize = 32;

/// Largest per-branch iteration count (7-bit field).
pub const MAX_BRANCH_COUNT: u8 = 0x7F;

const HEADER_CONTROL_SHIFT: u16 = 13;
const HEADER_LENGTH_MASK: u16 = 0x003F;
const HEADER_RESERVED_MASK: u16 = 0x1FC0;

/// Instruction opcodes (`OP` field, bits 15..12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    SetState = 0x0,
    SetGenerators = 0x1,
    Delay = 0x2,
    Branch = 0x3,
    UserEvent = 0x4,
    Metering = 0x5,
    CidMarker = 0x6,
}

impl Opcode {
    /// Converts a 4-bit primary opcode value into an assigned opcode.
    #[must_use]
    pub const fn from_u4(op: u8) -> Option<Self> {
        match op {
            0x0 => Some(Self::SetState),
            0x1 => Some(Self::SetGenerators),
            0x2 => Some(Self::Delay),
            0x3 => Some(Self::Branch),
            0x4 => Some(Self::UserEvent),
            0x5 => Some(Self::Metering),
            0x6 => Some(Self::CidMarker),
            _ => None,
        }
    }

    /// Bits of the payload that must be zero for this opcode.
    #[must_use]
    pub const fn reserved_mask(self) -> u16 {
        match self {
            Self::SetState | Self::SetGenerators => 0x0FF0,
            Self::Delay | Self::Branch => 0x0000,
            Self::UserEvent => 0x0F00,
            Self::Metering => 0x0FFE,
            Self::CidMarker => 0x0FFF,
        }
    }
}

/// Extracts the opcode nibble from an instruction word.
#[must_use]
pub const fn opcode_nibble(word: u16) -> u8 {
    ((word >> 12) & 0x000F) as u8
}

/// Control field carried in the program header word (bits 15..13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum SequenceControl {
    /// Stop execution; the device still reports sequence-complete.
    Stopped = 0,
    /// Start at instruction 0 with fresh loop counters.
    Running = 1,
    /// Same as `Running`, issued against an already-loaded program.
    Restart = 2,
    /// End the delay in progress.
    Resume = 3,
    /// Leave the innermost enclosing loop at the next instruction boundary.
    Break = 4,
    /// `Break` and `Resume` applied as one transaction.
    BreakAndResume = 5,
}

impl SequenceControl {
    /// Converts a control value to its 3-bit field encoding.
    #[must_use]
    pub const fn as_u3(self) -> u8 {
        self as u8
    }

    /// Converts a 3-bit field value into a control value.
    #[must_use]
    pub const fn from_u3(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Stopped),
            1 => Some(Self::Running),
            2 => Some(Self::Restart),
            3 => Some(Self::Resume),
            4 => Some(Self::Break),
            5 => Some(Self::BreakAndResume),
            _ => None,
        }
    }

    /// Returns true for controls that (re)load the program from instruction 0.
    #[must_use]
    pub const fn starts_program(self) -> bool {
        matches!(self, Self::Running | Self::Restart)
    }
}

/// Packs a header word from a control value and instruction count.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn encode_header(control: SequenceControl, len: usize) -> u16 {
    ((control.as_u3() as u16) << HEADER_CONTROL_SHIFT) | (len as u16 & HEADER_LENGTH_MASK)
}

/// Unpacks a header word into its control value and instruction count.
///
/// Returns `None` for unassigned control values, non-zero reserved bits, or a
/// count above [`MAX_PROGRAM_LEN`].
#[must_use]
pub const fn decode_header(word: u16) -> Option<(SequenceControl, usize)> {
    if word & HEADER_RESERVED_MASK != 0 {
        return None;
    }
    let len = (word & HEADER_LENGTH_MASK) as usize;
    if len > MAX_PROGRAM_LEN {
        return None;
    }
    match SequenceControl::from_u3((word >> HEADER_CONTROL_SHIFT) as u8) {
        Some(control) => Some((control, len)),
        None => None,
    }
}

/// Signal generator enable mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct GeneratorMask(u8);

impl GeneratorMask {
    /// All generators off.
    pub const NONE: Self = Self(0);
    /// Tone generator A (DTMF row tone).
    pub const A: Self = Self(0x1);
    /// Tone generator B (DTMF column tone).
    pub const B: Self = Self(0x2);
    /// Tone generator C.
    pub const C: Self = Self(0x4);
    /// FSK / caller-ID generator.
    pub const FSK: Self = Self(0x8);

    /// Builds a mask from its 4-bit field, rejecting stray high bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !0x0F == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Returns the raw 4-bit field value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns the union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true when every generator in `other` is enabled in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true when no generator is enabled.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// User-event marker identifier emitted by `UserEvent` instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Marker(pub u8);

impl Marker {
    /// Hook detection must now be masked.
    pub const HOOK_MASK: Self = Self(0x01);
    /// Hook detection may resume.
    pub const HOOK_UNMASK: Self = Self(0x02);
    /// Voice path must now be muted.
    pub const VOICE_MUTE: Self = Self(0x03);
    /// Voice path may be restored.
    pub const VOICE_UNMUTE: Self = Self(0x04);
    /// Message-waiting bias on.
    pub const MWI_PULSE_ON: Self = Self(0x10);
    /// Message-waiting bias off.
    pub const MWI_PULSE_OFF: Self = Self(0x11);
    /// Next caller-ID DTMF digit must be written to the generators.
    pub const CID_DIGIT: Self = Self(0x20);
    /// Start of the caller-ID acknowledge window.
    pub const CID_ACK_START: Self = Self(0x21);
    /// End of the caller-ID acknowledge window.
    pub const CID_ACK_END: Self = Self(0x22);
}

#[cfg(test)]
mod tests {
    use super::{
        decode_header, encode_header, opcode_nibble, GeneratorMask, Opcode, SequenceControl,
        MAX_PROGRAM_LEN,
    };

    #[test]
    fn assigned_opcodes_roundtrip_through_nibble() {
        for op in 0x0u8..=0x6 {
            let opcode = Opcode::from_u4(op).expect("assigned");
            assert_eq!(opcode as u8, op);
            assert_eq!(opcode_nibble(u16::from(op) << 12), op);
        }
        for op in 0x7u8..=0xF {
            assert_eq!(Opcode::from_u4(op), None);
        }
    }

    #[test]
    fn control_values_roundtrip() {
        for value in 0u8..=5 {
            let control = SequenceControl::from_u3(value).expect("assigned");
            assert_eq!(control.as_u3(), value);
        }
        assert_eq!(SequenceControl::from_u3(6), None);
        assert_eq!(SequenceControl::from_u3(7), None);
        assert!(SequenceControl::Restart.starts_program());
        assert!(!SequenceControl::Resume.starts_program());
    }

    #[test]
    fn header_packs_control_in_top_bits() {
        let word = encode_header(SequenceControl::Running, 4);
        assert_eq!(word, 0x2004);
        assert_eq!(decode_header(word), Some((SequenceControl::Running, 4)));
        assert_eq!(
            decode_header(encode_header(SequenceControl::BreakAndResume, MAX_PROGRAM_LEN)),
            Some((SequenceControl::BreakAndResume, MAX_PROGRAM_LEN))
        );
    }

    #[test]
    fn header_rejects_reserved_bits_and_overlong_counts() {
        assert_eq!(decode_header(0x2040), None);
        assert_eq!(decode_header(0x2021), None);
        assert_eq!(decode_header(0xC000), None);
    }

    #[test]
    fn generator_mask_rejects_high_bits() {
        assert_eq!(GeneratorMask::from_bits(0x10), None);
        let dual = GeneratorMask::A.union(GeneratorMask::B);
        assert_eq!(GeneratorMask::from_bits(0x3), Some(dual));
        assert!(dual.contains(GeneratorMask::B));
        assert!(!dual.contains(GeneratorMask::FSK));
        assert!(GeneratorMask::NONE.is_empty());
    }
}
