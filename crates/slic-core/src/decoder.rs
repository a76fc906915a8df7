//! Sequencer instruction decoding and encoding.
//!
//! Words are validated strictly: unassigned opcodes, reserved payload bits and
//! unknown drive-state codes are all rejected as [`ProfileError::Format`].

use crate::encoding::{
    decode_header, encode_header, opcode_nibble, GeneratorMask, Marker, Opcode, SequenceControl,
    MAX_BRANCH_COUNT, MAX_PROGRAM_LEN,
};
use crate::error::ProfileError;
use crate::state::DriveState;
use crate::timing::MAX_DELAY_TICKS;

const DELAY_ABSOLUTE_BIT: u16 = 0x0800;
const BRANCH_TARGET_SHIFT: u16 = 7;
const BRANCH_TARGET_MASK: u16 = 0x1F;

/// One decoded sequencer instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Instruction {
    /// Change the line's drive state.
    SetState(DriveState),
    /// Enable exactly the generators in the mask.
    SetGenerators(GeneratorMask),
    /// Wait `ticks` (0 = until resumed or aborted).
    Delay {
        /// Tick count, at most [`MAX_DELAY_TICKS`].
        ticks: u16,
        /// Measured from program start instead of from this instruction.
        absolute: bool,
    },
    /// Jump to `target`; `count == 0` loops forever.
    Branch {
        /// Destination instruction index.
        target: u8,
        /// Extra passes through the loop body before falling through.
        count: u8,
    },
    /// Emit a marker consumed by the owning operation.
    UserEvent(Marker),
    /// Metering pulse on or off.
    Metering(bool),
    /// Splice point for a caller-ID sequence inside a ring cadence.
    CidMarker,
}

impl Instruction {
    /// Decodes one instruction word.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Format`] for any word outside the assigned
    /// encoding space.
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(word: u16) -> Result<Self, ProfileError> {
        let opcode = Opcode::from_u4(opcode_nibble(word)).ok_or(ProfileError::Format)?;
        if word & opcode.reserved_mask() != 0 {
            return Err(ProfileError::Format);
        }
        let low_nibble = (word & 0x000F) as u8;

        let instruction = match opcode {
            Opcode::SetState => {
                Self::SetState(DriveState::from_u4(low_nibble).ok_or(ProfileError::Format)?)
            }
            Opcode::SetGenerators => Self::SetGenerators(
                GeneratorMask::from_bits(low_nibble).ok_or(ProfileError::Format)?,
            ),
            Opcode::Delay => Self::Delay {
                ticks: word & MAX_DELAY_TICKS,
                absolute: word & DELAY_ABSOLUTE_BIT != 0,
            },
            Opcode::Branch => Self::Branch {
                target: ((word >> BRANCH_TARGET_SHIFT) & BRANCH_TARGET_MASK) as u8,
                count: (word & u16::from(MAX_BRANCH_COUNT)) as u8,
            },
            Opcode::UserEvent => Self::UserEvent(Marker((word & 0x00FF) as u8)),
            Opcode::Metering => Self::Metering(word & 0x0001 != 0),
            Opcode::CidMarker => Self::CidMarker,
        };
        Ok(instruction)
    }

    /// Re-encodes this instruction into its 16-bit word.
    ///
    /// Out-of-range payloads are masked to their field width; programs are
    /// validated before they are ever serialized.
    #[must_use]
    pub fn encode(self) -> u16 {
        let op = |opcode: Opcode| u16::from(opcode as u8) << 12;
        match self {
            Self::SetState(state) => op(Opcode::SetState) | u16::from(state.as_u4()),
            Self::SetGenerators(mask) => op(Opcode::SetGenerators) | u16::from(mask.bits()),
            Self::Delay { ticks, absolute } => {
                let flag = if absolute { DELAY_ABSOLUTE_BIT } else { 0 };
                op(Opcode::Delay) | flag | (ticks & MAX_DELAY_TICKS)
            }
            Self::Branch { target, count } => {
                op(Opcode::Branch)
                    | ((u16::from(target) & BRANCH_TARGET_MASK) << BRANCH_TARGET_SHIFT)
                    | (u16::from(count) & u16::from(MAX_BRANCH_COUNT))
            }
            Self::UserEvent(marker) => op(Opcode::UserEvent) | u16::from(marker.0),
            Self::Metering(on) => op(Opcode::Metering) | u16::from(on),
            Self::CidMarker => op(Opcode::CidMarker),
        }
    }

    /// Returns the opcode of this instruction.
    #[must_use]
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::SetState(_) => Opcode::SetState,
            Self::SetGenerators(_) => Opcode::SetGenerators,
            Self::Delay { .. } => Opcode::Delay,
            Self::Branch { .. } => Opcode::Branch,
            Self::UserEvent(_) => Opcode::UserEvent,
            Self::Metering(_) => Opcode::Metering,
            Self::CidMarker => Opcode::CidMarker,
        }
    }

    /// Returns true for the instructions a program may start with.
    #[must_use]
    pub const fn is_entry(self) -> bool {
        matches!(self, Self::SetState(_) | Self::SetGenerators(_))
    }

    /// Returns the branch target, if this is a branch.
    #[must_use]
    pub const fn branch_target(self) -> Option<u8> {
        match self {
            Self::Branch { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Decodes a run of instruction words.
///
/// # Errors
///
/// Returns [`ProfileError::Format`] at the first undecodable word and
/// [`ProfileError::TooLong`] if more than [`MAX_PROGRAM_LEN`] words are given.
pub fn decode_words(words: &[u16]) -> Result<Vec<Instruction>, ProfileError> {
    if words.len() > MAX_PROGRAM_LEN {
        return Err(ProfileError::TooLong);
    }
    words.iter().map(|word| Instruction::decode(*word)).collect()
}

/// Splits big-endian bytes into 16-bit words.
///
/// # Errors
///
/// Returns [`ProfileError::Format`] when the byte count is odd.
pub fn bytes_to_words(bytes: &[u8]) -> Result<Vec<u16>, ProfileError> {
    if bytes.len() % 2 != 0 {
        return Err(ProfileError::Format);
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encodes a header plus instruction words as one device buffer.
#[must_use]
pub fn encode_buffer(control: SequenceControl, instructions: &[Instruction]) -> Vec<u16> {
    let mut words = Vec::with_capacity(instructions.len() + 1);
    words.push(encode_header(control, instructions.len()));
    words.extend(instructions.iter().map(|instruction| instruction.encode()));
    words
}

/// Decodes a header-prefixed device buffer.
///
/// Words beyond the header's instruction count are ignored.
///
/// # Errors
///
/// Returns [`ProfileError::Format`] for an invalid header, a buffer shorter
/// than the header announces, or any undecodable instruction word.
pub fn decode_buffer(words: &[u16]) -> Result<(SequenceControl, Vec<Instruction>), ProfileError> {
    let (&header, body) = words.split_first().ok_or(ProfileError::Format)?;
    let (control, len) = decode_header(header).ok_or(ProfileError::Format)?;
    let body = body.get(..len).ok_or(ProfileError::Format)?;
    Ok((control, decode_words(body)?))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::{bytes_to_words, decode_buffer, encode_buffer, Instruction};
    use crate::encoding::{GeneratorMask, Marker, SequenceControl};
    use crate::error::ProfileError;
    use crate::state::DriveState;

    #[rstest]
    #[case(0x0002, Instruction::SetState(DriveState::Active))]
    #[case(0x1003, Instruction::SetGenerators(GeneratorMask::A.union(GeneratorMask::B)))]
    #[case(0x2028, Instruction::Delay { ticks: 40, absolute: false })]
    #[case(0x2800, Instruction::Delay { ticks: 0, absolute: true })]
    #[case(0x3080, Instruction::Branch { target: 1, count: 0 })]
    #[case(0x4020, Instruction::UserEvent(Marker::CID_DIGIT))]
    #[case(0x5001, Instruction::Metering(true))]
    #[case(0x6000, Instruction::CidMarker)]
    fn known_words_decode(#[case] word: u16, #[case] expected: Instruction) {
        assert_eq!(Instruction::decode(word), Ok(expected));
        assert_eq!(expected.encode(), word);
    }

    #[rstest]
    #[case(0x0009)]
    #[case(0x0012)]
    #[case(0x1010)]
    #[case(0x4100)]
    #[case(0x5002)]
    #[case(0x6001)]
    #[case(0x7000)]
    #[case(0xF000)]
    fn malformed_words_are_format_errors(#[case] word: u16) {
        assert_eq!(Instruction::decode(word), Err(ProfileError::Format));
    }

    #[test]
    fn entry_instructions_are_state_or_generator_writes() {
        assert!(Instruction::SetState(DriveState::Standby).is_entry());
        assert!(Instruction::SetGenerators(GeneratorMask::NONE).is_entry());
        assert!(!Instruction::CidMarker.is_entry());
        assert_eq!(
            Instruction::Branch { target: 3, count: 2 }.branch_target(),
            Some(3)
        );
    }

    #[test]
    fn buffer_helpers_respect_header_length() {
        let program = [
            Instruction::SetState(DriveState::Ringing),
            Instruction::Branch { target: 1, count: 0 },
        ];
        let mut words = encode_buffer(SequenceControl::Running, &program);
        words.push(0xFFFF);
        assert_eq!(
            decode_buffer(&words),
            Ok((SequenceControl::Running, program.to_vec()))
        );
        assert_eq!(decode_buffer(&words[..2]), Err(ProfileError::Format));
        assert_eq!(decode_buffer(&[]), Err(ProfileError::Format));
    }

    #[test]
    fn odd_byte_counts_are_rejected() {
        assert_eq!(bytes_to_words(&[0x20]), Err(ProfileError::Format));
        assert_eq!(bytes_to_words(&[0x20, 0x28]), Ok(vec![0x2028]));
    }

    proptest! {
        #[test]
        fn every_decodable_word_reencodes_identically(word in any::<u16>()) {
            if let Ok(instruction) = Instruction::decode(word) {
                prop_assert_eq!(instruction.encode(), word);
            }
        }
    }
}
