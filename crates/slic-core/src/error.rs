use thiserror::Error;

/// Error classes used for propagation policy and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorClass {
    /// Caller-supplied parameter was rejected before any register I/O.
    Argument,
    /// Sequencer or mailbox ownership conflict; retry on a later poll.
    Contention,
    /// Profile reference or profile contents were unusable.
    Profile,
    /// Register I/O failed underneath the core.
    Transport,
    /// Operation attempted before bring-up completed.
    State,
    /// Deferred response payload was missing or did not match its request.
    Response,
}

/// Failures reported by the register transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum TransportError {
    /// Bus is momentarily owned elsewhere; the access may be retried.
    #[error("register bus busy")]
    Busy = 0x01,
    /// Device did not answer within the transport's own deadline.
    #[error("register access timed out")]
    Timeout = 0x02,
    /// Electrical or protocol fault on the bus.
    #[error("register bus fault")]
    BusFault = 0x03,
    /// Host and device lost framing synchronization.
    #[error("register bus desynchronized")]
    Desync = 0x04,
}

impl TransportError {
    /// Converts a transport error to its stable low-nibble code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable low-nibble code back into a transport error.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Busy),
            0x02 => Some(Self::Timeout),
            0x03 => Some(Self::BusFault),
            0x04 => Some(Self::Desync),
            _ => None,
        }
    }
}

/// Reasons a profile or stored cadence was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum ProfileError {
    /// Bytes do not follow the profile or instruction encoding.
    #[error("malformed profile encoding")]
    Format = 0x01,
    /// Profile exists but is not of the kind the operation needs.
    #[error("profile is of the wrong kind")]
    WrongKind = 0x02,
    /// Profile reference points outside the profile table.
    #[error("profile reference out of range")]
    OutOfRange = 0x03,
    /// Program would not fit the sequencer's instruction memory.
    #[error("program exceeds sequencer capacity")]
    TooLong = 0x04,
}

impl ProfileError {
    /// Converts a profile error to its stable low-nibble code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable low-nibble code back into a profile error.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Format),
            0x02 => Some(Self::WrongKind),
            0x03 => Some(Self::OutOfRange),
            0x04 => Some(Self::TooLong),
            _ => None,
        }
    }
}

/// Status taxonomy returned by every public operation and carried on events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum VpError {
    /// Out-of-range or type-mismatched parameter.
    #[error("invalid argument")]
    InvalidArgument,
    /// Requested operation conflicts with sequencer ownership.
    #[error("device busy")]
    DeviceBusy,
    /// Command mailbox is owned by the device.
    #[error("command mailbox busy")]
    MailboxBusy,
    /// Profile reference or contents rejected.
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    /// Underlying register I/O failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Device or line bring-up has not completed.
    #[error("device or line not initialized")]
    NotInitialized,
    /// No response is waiting for the requested event.
    #[error("response mailbox empty")]
    MailboxEmpty,
    /// Response mailbox holds data for a different request.
    #[error("response mailbox data mismatch")]
    MailboxDataMismatch,
}

const PROFILE_CODE_BASE: u8 = 0x10;
const TRANSPORT_CODE_BASE: u8 = 0x20;

impl VpError {
    /// Converts an error to its stable one-byte status code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::InvalidArgument => 0x01,
            Self::DeviceBusy => 0x02,
            Self::MailboxBusy => 0x03,
            Self::NotInitialized => 0x04,
            Self::MailboxEmpty => 0x05,
            Self::MailboxDataMismatch => 0x06,
            Self::Profile(kind) => PROFILE_CODE_BASE | kind.as_u8(),
            Self::Transport(kind) => TRANSPORT_CODE_BASE | kind.as_u8(),
        }
    }

    /// Converts a stable one-byte status code back into an error.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::InvalidArgument),
            0x02 => Some(Self::DeviceBusy),
            0x03 => Some(Self::MailboxBusy),
            0x04 => Some(Self::NotInitialized),
            0x05 => Some(Self::MailboxEmpty),
            0x06 => Some(Self::MailboxDataMismatch),
            0x11..=0x1F => match ProfileError::from_u8(code & 0x0F) {
                Some(kind) => Some(Self::Profile(kind)),
                None => None,
            },
            0x21..=0x2F => match TransportError::from_u8(code & 0x0F) {
                Some(kind) => Some(Self::Transport(kind)),
                None => None,
            },
            _ => None,
        }
    }

    /// Returns the policy class for this error.
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::InvalidArgument => ErrorClass::Argument,
            Self::DeviceBusy | Self::MailboxBusy => ErrorClass::Contention,
            Self::Profile(_) => ErrorClass::Profile,
            Self::Transport(_) => ErrorClass::Transport,
            Self::NotInitialized => ErrorClass::State,
            Self::MailboxEmpty | Self::MailboxDataMismatch => ErrorClass::Response,
        }
    }

    /// Errors that are an expected part of event-driven orchestration and
    /// should be retried on a later poll cycle.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::DeviceBusy | Self::MailboxBusy | Self::Transport(TransportError::Busy)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorClass, ProfileError, TransportError, VpError};

    #[test]
    fn stable_code_roundtrip_is_bijective_for_defined_values() {
        let mut defined = 0;
        for code in 0x00u8..=0xFF {
            if let Some(error) = VpError::from_u8(code) {
                assert_eq!(error.as_u8(), code);
                defined += 1;
            }
        }
        assert_eq!(defined, 6 + 4 + 4);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert!(VpError::from_u8(0x00).is_none());
        assert!(VpError::from_u8(0x10).is_none());
        assert!(VpError::from_u8(0x25).is_none());
        assert!(VpError::from_u8(0xFF).is_none());
    }

    #[test]
    fn nested_errors_convert_with_question_mark() {
        fn fails() -> Result<(), VpError> {
            Err(TransportError::Timeout)?;
            Ok(())
        }
        assert_eq!(fails(), Err(VpError::Transport(TransportError::Timeout)));
        assert_eq!(
            VpError::from(ProfileError::TooLong),
            VpError::Profile(ProfileError::TooLong)
        );
    }

    #[test]
    fn retry_policy_matches_contention_contract() {
        assert!(VpError::DeviceBusy.is_retryable());
        assert!(VpError::MailboxBusy.is_retryable());
        assert!(VpError::Transport(TransportError::Busy).is_retryable());
        assert!(!VpError::Transport(TransportError::BusFault).is_retryable());
        assert!(!VpError::InvalidArgument.is_retryable());
    }

    #[test]
    fn class_mapping_matches_taxonomy() {
        assert_eq!(VpError::InvalidArgument.class(), ErrorClass::Argument);
        assert_eq!(VpError::MailboxBusy.class(), ErrorClass::Contention);
        assert_eq!(
            VpError::Profile(ProfileError::Format).class(),
            ErrorClass::Profile
        );
        assert_eq!(
            VpError::Transport(TransportError::Desync).class(),
            ErrorClass::Transport
        );
        assert_eq!(VpError::NotInitialized.class(), ErrorClass::State);
        assert_eq!(VpError::MailboxDataMismatch.class(), ErrorClass::Response);
    }

    #[test]
    fn display_includes_nested_reason() {
        let text = VpError::Profile(ProfileError::WrongKind).to_string();
        assert_eq!(text, "profile error: profile is of the wrong kind");
    }
}
