//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when working with the AlarmClock protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is too long. The framer discards the offending line.
    #[error("frame too long: maximum {max} bytes, got {actual}")]
    FrameTooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Reply carries fewer tokens than the verb requires.
    #[error("not enough tokens: expected {expected}, got {actual}")]
    NotEnoughTokens {
        /// Expected token count.
        expected: usize,
        /// Actual token count.
        actual: usize,
    },

    /// A token could not be parsed as the expected value.
    #[error("invalid {field}: {value:?}")]
    InvalidToken {
        /// What the token was supposed to be.
        field: &'static str,
        /// The offending token text.
        value: String,
    },

    /// A request token contains whitespace or control characters.
    #[error("illegal request token: {0:?}")]
    IllegalToken(String),

    /// Generic parse failure.
    #[error("failed to parse: {0}")]
    ParseError(String),
}

impl ProtocolError {
    pub(crate) fn invalid(field: &'static str, value: &str) -> Self {
        ProtocolError::InvalidToken {
            field,
            value: value.to_string(),
        }
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Error codes returned by the firmware in `ERR` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    /// Malformed or out-of-range argument.
    ArgumentError,
    /// Command needs a selected alarm and none is selected.
    NothingSelected,
    /// Save requested but nothing has changed.
    UselessSave,
    /// Referenced item does not exist.
    NotFound,
    /// Command not supported by this firmware.
    Unsupported,
    /// Unknown error code.
    Unknown(u8),
}

impl std::fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorCode::ArgumentError => write!(f, "argument error"),
            DeviceErrorCode::NothingSelected => write!(f, "nothing selected"),
            DeviceErrorCode::UselessSave => write!(f, "useless save"),
            DeviceErrorCode::NotFound => write!(f, "not found"),
            DeviceErrorCode::Unsupported => write!(f, "unsupported command"),
            DeviceErrorCode::Unknown(code) => write!(f, "unknown error ({})", code),
        }
    }
}

impl From<u8> for DeviceErrorCode {
    fn from(code: u8) -> Self {
        use crate::constants::*;
        match code {
            ERR_CODE_ARGUMENT => DeviceErrorCode::ArgumentError,
            ERR_CODE_NOTHING_SELECTED => DeviceErrorCode::NothingSelected,
            ERR_CODE_USELESS_SAVE => DeviceErrorCode::UselessSave,
            ERR_CODE_NOT_FOUND => DeviceErrorCode::NotFound,
            ERR_CODE_UNSUPPORTED => DeviceErrorCode::Unsupported,
            _ => DeviceErrorCode::Unknown(code),
        }
    }
}

impl From<DeviceErrorCode> for u8 {
    fn from(code: DeviceErrorCode) -> Self {
        use crate::constants::*;
        match code {
            DeviceErrorCode::ArgumentError => ERR_CODE_ARGUMENT,
            DeviceErrorCode::NothingSelected => ERR_CODE_NOTHING_SELECTED,
            DeviceErrorCode::UselessSave => ERR_CODE_USELESS_SAVE,
            DeviceErrorCode::NotFound => ERR_CODE_NOT_FOUND,
            DeviceErrorCode::Unsupported => ERR_CODE_UNSUPPORTED,
            DeviceErrorCode::Unknown(code) => code,
        }
    }
}
