//! Profile container parsing and the lookup boundary.
//!
//! A profile is `[kind, version, section count]` followed by sections of
//! `[tag, len, bytes..]`. Register-list offsets are relative to the line's
//! generator parameter block, so a profile is valid on every family.

use crate::decoder::bytes_to_words;
use crate::encoding::GeneratorMask;
use crate::error::ProfileError;
use crate::program::{Program, ProgramKind};
use crate::registers::GENERATOR_PARAM_WORDS;
use crate::signal::Digit;

/// Container version understood by [`Profile::parse`].
pub const PROFILE_VERSION: u8 = 1;

const TAG_REGISTERS: u8 = 0x01;
const TAG_SEQUENCE: u8 = 0x02;
const TAG_PARAMS: u8 = 0x03;

/// Byte marking an unused caller-ID acknowledge tone slot.
pub const NO_ACK_TONE: u8 = 0xFF;

/// Profile kinds stored in a profile table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ProfileKind {
    Tone = 0x01,
    ToneCadence = 0x02,
    RingCadence = 0x03,
    CallerId = 0x04,
    Metering = 0x05,
}

impl ProfileKind {
    /// Converts a kind to its container byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a container byte back into a kind.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Tone),
            0x02 => Some(Self::ToneCadence),
            0x03 => Some(Self::RingCadence),
            0x04 => Some(Self::CallerId),
            0x05 => Some(Self::Metering),
            _ => None,
        }
    }

    const fn program_kind(self) -> ProgramKind {
        match self {
            Self::Tone | Self::ToneCadence => ProgramKind::ToneCadence,
            Self::RingCadence => ProgramKind::RingCadence,
            Self::CallerId => ProgramKind::CallerId,
            Self::Metering => ProgramKind::MeteringBurst,
        }
    }
}

/// Index of a profile in the caller's profile table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ProfileRef(pub u8);

/// Resolves profile references to encoded profile bytes.
pub trait ProfileLookup {
    /// Returns the encoded profile behind `reference`.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::OutOfRange`] when nothing is stored at `reference`.
    /// - [`ProfileError::WrongKind`] when the stored profile is not `kind`.
    fn lookup(&self, kind: ProfileKind, reference: ProfileRef) -> Result<&[u8], ProfileError>;
}

/// In-memory profile table.
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    entries: Vec<Vec<u8>>,
}

impl ProfileTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an encoded profile and returns its reference.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::OutOfRange`] once 256 profiles are stored.
    pub fn insert(&mut self, bytes: Vec<u8>) -> Result<ProfileRef, ProfileError> {
        let index = u8::try_from(self.entries.len()).map_err(|_| ProfileError::OutOfRange)?;
        self.entries.push(bytes);
        Ok(ProfileRef(index))
    }

    /// Number of stored profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no profile is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ProfileLookup for ProfileTable {
    fn lookup(&self, kind: ProfileKind, reference: ProfileRef) -> Result<&[u8], ProfileError> {
        let bytes = self
            .entries
            .get(usize::from(reference.0))
            .ok_or(ProfileError::OutOfRange)?;
        match bytes.first() {
            Some(&code) if code == kind.as_u8() => Ok(bytes),
            Some(_) => Err(ProfileError::WrongKind),
            None => Err(ProfileError::Format),
        }
    }
}

/// One parsed profile.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Profile {
    kind: ProfileKind,
    registers: Vec<(u16, u16)>,
    sequence: Option<Vec<u16>>,
    params: Vec<u8>,
}

impl Profile {
    /// Starts an empty profile of `kind`.
    #[must_use]
    pub const fn new(kind: ProfileKind) -> Self {
        Self {
            kind,
            registers: Vec::new(),
            sequence: None,
            params: Vec::new(),
        }
    }

    /// Adds register writes, as `(offset, value)` pairs.
    #[must_use]
    pub fn with_registers(mut self, registers: &[(u16, u16)]) -> Self {
        self.registers.extend_from_slice(registers);
        self
    }

    /// Sets the sequence section from a program's instructions.
    #[must_use]
    pub fn with_program(mut self, program: &Program) -> Self {
        self.sequence = Some(program.instructions().iter().map(|i| i.encode()).collect());
        self
    }

    /// Sets the kind-specific parameter bytes.
    #[must_use]
    pub fn with_params(mut self, params: &[u8]) -> Self {
        self.params = params.to_vec();
        self
    }

    /// Kind tag of this profile.
    #[must_use]
    pub const fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// Register writes in application order.
    #[must_use]
    pub fn registers(&self) -> &[(u16, u16)] {
        &self.registers
    }

    /// Parameter bytes.
    #[must_use]
    pub fn params(&self) -> &[u8] {
        &self.params
    }

    /// Parses an encoded profile, checking its kind.
    ///
    /// # Errors
    ///
    /// - [`ProfileError::WrongKind`] when the kind byte is not `expected`.
    /// - [`ProfileError::Format`] for a bad version, truncated or unknown
    ///   section, duplicate sequence, or register offset outside the
    ///   generator parameter block.
    pub fn parse(expected: ProfileKind, bytes: &[u8]) -> Result<Self, ProfileError> {
        let [kind, version, count, body @ ..] = bytes else {
            return Err(ProfileError::Format);
        };
        let kind = ProfileKind::from_u8(*kind).ok_or(ProfileError::Format)?;
        if kind != expected {
            return Err(ProfileError::WrongKind);
        }
        if *version != PROFILE_VERSION {
            return Err(ProfileError::Format);
        }

        let mut profile = Self::new(kind);
        let mut rest = body;
        for _ in 0..*count {
            let [tag, len, tail @ ..] = rest else {
                return Err(ProfileError::Format);
            };
            let len = usize::from(*len);
            if tail.len() < len {
                return Err(ProfileError::Format);
            }
            let (section, next) = tail.split_at(len);
            match *tag {
                TAG_REGISTERS => profile.registers.extend(parse_registers(section)?),
                TAG_SEQUENCE if profile.sequence.is_none() => {
                    profile.sequence = Some(bytes_to_words(section)?);
                }
                TAG_PARAMS => profile.params = section.to_vec(),
                _ => return Err(ProfileError::Format),
            }
            rest = next;
        }
        if !rest.is_empty() {
            return Err(ProfileError::Format);
        }
        Ok(profile)
    }

    /// Encodes this profile in container format.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::TooLong`] when a section exceeds 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProfileError> {
        let mut sections: Vec<(u8, Vec<u8>)> = Vec::new();
        if !self.registers.is_empty() {
            let bytes = self
                .registers
                .iter()
                .flat_map(|(offset, value)| {
                    offset.to_be_bytes().into_iter().chain(value.to_be_bytes())
                })
                .collect();
            sections.push((TAG_REGISTERS, bytes));
        }
        if let Some(words) = &self.sequence {
            sections.push((TAG_SEQUENCE, words.iter().flat_map(|w| w.to_be_bytes()).collect()));
        }
        if !self.params.is_empty() {
            sections.push((TAG_PARAMS, self.params.clone()));
        }

        let count = u8::try_from(sections.len()).map_err(|_| ProfileError::TooLong)?;
        let mut out = vec![self.kind.as_u8(), PROFILE_VERSION, count];
        for (tag, bytes) in sections {
            let len = u8::try_from(bytes.len()).map_err(|_| ProfileError::TooLong)?;
            out.push(tag);
            out.push(len);
            out.extend(bytes);
        }
        Ok(out)
    }

    /// Builds the program carried in the sequence section, if present.
    ///
    /// # Errors
    ///
    /// Propagates instruction decode and program validation failures.
    pub fn program(&self) -> Result<Option<Program>, ProfileError> {
        self.sequence
            .as_deref()
            .map(|words| Program::from_words(self.kind.program_kind(), words))
            .transpose()
    }

    /// Generator mask of a tone profile (`params[0]`).
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Format`] for missing or undefined mask bits.
    pub fn tone_mask(&self) -> Result<GeneratorMask, ProfileError> {
        self.params
            .first()
            .copied()
            .and_then(GeneratorMask::from_bits)
            .ok_or(ProfileError::Format)
    }

    /// Caller-ID parameters of a caller-ID profile.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Format`] for a short parameter block, unknown
    /// mode, or an acknowledge tone that is not a digit code.
    pub fn cid_params(&self) -> Result<CidParams, ProfileError> {
        let [mode, ack1, ack2, ..] = self.params[..] else {
            return Err(ProfileError::Format);
        };
        let mode = match mode {
            0 => CidMode::Fsk,
            1 => CidMode::Dtmf,
            _ => return Err(ProfileError::Format),
        };
        let ack_tone = |code: u8| {
            if code == NO_ACK_TONE {
                Ok(None)
            } else {
                Digit::from_nibble(code).map(Some).ok_or(ProfileError::Format)
            }
        };
        Ok(CidParams {
            mode,
            ack: [ack_tone(ack1)?, ack_tone(ack2)?],
        })
    }
}

fn parse_registers(section: &[u8]) -> Result<Vec<(u16, u16)>, ProfileError> {
    let words = bytes_to_words(section)?;
    if words.len() % 2 != 0 {
        return Err(ProfileError::Format);
    }
    words
        .chunks_exact(2)
        .map(|pair| {
            if usize::from(pair[0]) < GENERATOR_PARAM_WORDS {
                Ok((pair[0], pair[1]))
            } else {
                Err(ProfileError::Format)
            }
        })
        .collect()
}

/// Caller-ID modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CidMode {
    /// Bell 202 / V.23 FSK through the hardware FSK buffers.
    Fsk,
    /// DTMF digits played on the tone generators.
    Dtmf,
}

/// Parameters of a caller-ID profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CidParams {
    /// Modulation.
    pub mode: CidMode,
    /// Acknowledge tones accepted during the acknowledge window.
    pub ack: [Option<Digit>; 2],
}

impl CidParams {
    /// True when `digit` is one of the expected acknowledge tones.
    #[must_use]
    pub fn accepts_ack(&self, digit: Digit) -> bool {
        self.ack.contains(&Some(digit))
    }
}

/// A resolved caller-ID profile: setup writes, envelope program and params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidProfile {
    /// Generator setup writes, relative to the generator parameter block.
    pub registers: Vec<(u16, u16)>,
    /// Envelope program.
    pub program: Program,
    /// Modulation and acknowledge tones.
    pub params: CidParams,
}

impl CidProfile {
    /// Resolves and parses a caller-ID profile.
    ///
    /// # Errors
    ///
    /// Propagates lookup and parse failures; a profile without a sequence is
    /// a [`ProfileError::Format`].
    pub fn load<P: ProfileLookup + ?Sized>(
        profiles: &P,
        reference: ProfileRef,
    ) -> Result<Self, ProfileError> {
        let profile = Profile::parse(
            ProfileKind::CallerId,
            profiles.lookup(ProfileKind::CallerId, reference)?,
        )?;
        Ok(Self {
            program: profile.program()?.ok_or(ProfileError::Format)?,
            params: profile.cid_params()?,
            registers: profile.registers,
        })
    }
}

/// A resolved tone profile plus optional cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneSetup {
    /// Generator parameter writes.
    pub registers: Vec<(u16, u16)>,
    /// Generators enabled for a steady tone.
    pub mask: GeneratorMask,
    /// Cadence program; `None` plays the tone steadily.
    pub cadence: Option<Program>,
}

impl ToneSetup {
    /// Silence: no generator writes, all generators off.
    #[must_use]
    pub const fn off() -> Self {
        Self {
            registers: Vec::new(),
            mask: GeneratorMask::NONE,
            cadence: None,
        }
    }

    /// Resolves a tone profile and optional tone-cadence profile.
    ///
    /// # Errors
    ///
    /// Propagates lookup and parse failures; a cadence profile without a
    /// sequence is a [`ProfileError::Format`].
    pub fn load<P: ProfileLookup + ?Sized>(
        profiles: &P,
        tone: ProfileRef,
        cadence: Option<ProfileRef>,
    ) -> Result<Self, ProfileError> {
        let profile = Profile::parse(ProfileKind::Tone, profiles.lookup(ProfileKind::Tone, tone)?)?;
        let cadence = cadence
            .map(|reference| {
                Profile::parse(
                    ProfileKind::ToneCadence,
                    profiles.lookup(ProfileKind::ToneCadence, reference)?,
                )?
                .program()?
                .ok_or(ProfileError::Format)
            })
            .transpose()?;
        Ok(Self {
            mask: profile.tone_mask()?,
            registers: profile.registers,
            cadence,
        })
    }
}

/// Resolves a ring-cadence profile to its program.
///
/// # Errors
///
/// Propagates lookup and parse failures; a cadence without a sequence is a
/// [`ProfileError::Format`].
pub fn load_ring_cadence<P: ProfileLookup + ?Sized>(
    profiles: &P,
    reference: ProfileRef,
) -> Result<Program, ProfileError> {
    Profile::parse(
        ProfileKind::RingCadence,
        profiles.lookup(ProfileKind::RingCadence, reference)?,
    )?
    .program()?
    .ok_or(ProfileError::Format)
}
