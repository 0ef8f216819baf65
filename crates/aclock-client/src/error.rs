//! Client error types.
//!
//! The five failure families callers have to tell apart:
//! - [`ClientError::Transport`] / [`ClientError::Serial`]: the byte stream is
//!   gone. Fatal for the client instance; every later call fails the same way.
//! - [`ClientError::Protocol`]: a frame was malformed and dropped. The client
//!   stays usable.
//! - [`ClientError::Timeout`]: no reply within the per-attempt timeout, all
//!   retries exhausted.
//! - [`ClientError::Device`]: the firmware answered `ERR`. Never retried.
//! - [`ClientError::Validation`]: the request was rejected before any I/O.

use aclock_protocol::{DeviceErrorCode, ProtocolError};
use thiserror::Error;

/// Errors returned by AlarmClock client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport failed. The client instance is no longer usable.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Failed to open or configure the serial port.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A frame or reply could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No reply arrived in time, including retries.
    #[error("timeout waiting for reply after {attempts} attempts")]
    Timeout {
        /// Number of times the request was written.
        attempts: u32,
    },

    /// The firmware rejected the request.
    #[error("device error: {code}{}", .message.as_ref().map(|m| format!(" ({})", m)).unwrap_or_default())]
    Device {
        /// Firmware error code.
        code: DeviceErrorCode,
        /// Optional detail text from the firmware.
        message: Option<String>,
    },

    /// The call was abandoned because its deadline passed or the client was
    /// closed while the call was in flight.
    #[error("command cancelled")]
    Cancelled,

    /// The client has been closed.
    #[error("client is closed")]
    Closed,

    /// The request was rejected before any bytes were written.
    #[error("validation error: {0}")]
    Validation(String),
}

impl ClientError {
    /// Build a device error from a parsed `ERR` reply.
    pub(crate) fn device(code: DeviceErrorCode, message: Option<String>) -> Self {
        ClientError::Device { code, message }
    }

    /// Whether this failure leaves the client usable for further commands.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::Serial(_) | ClientError::Closed
        )
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
