//! Client configuration.

use std::time::{Duration, Instant};

use aclock_protocol::{EEPROM_SIZE, MAX_LINE_LENGTH};

/// Configuration for an AlarmClock client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Serial baud rate.
    pub baud_rate: u32,

    /// How long to wait for a reply before one attempt is considered lost.
    pub timeout: Duration,

    /// How many times a timed-out request is written again before the call
    /// fails. 2 retries means up to 3 writes in total.
    pub max_retries: u32,

    /// Maximum accepted frame length in bytes, excluding the terminator.
    /// Longer frames are discarded.
    pub max_frame_len: usize,

    /// Size of the device's EEPROM in bytes. Memory operations outside
    /// `0..eeprom_size` are rejected before any I/O.
    pub eeprom_size: usize,

    /// Maximum number of bytes a single memory read or write may cover.
    pub max_memory_span: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            baud_rate: 9600,
            timeout: Duration::from_secs(1),
            max_retries: 2,
            max_frame_len: MAX_LINE_LENGTH,
            eeprom_size: EEPROM_SIZE,
            max_memory_span: 32,
        }
    }
}

impl ClientConfig {
    /// Set the serial baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the per-attempt reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries after a timed-out attempt.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the maximum accepted frame length.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Set the EEPROM size used for memory range validation.
    pub fn with_eeprom_size(mut self, eeprom_size: usize) -> Self {
        self.eeprom_size = eeprom_size;
        self
    }

    /// Set the per-command memory span limit.
    pub fn with_max_memory_span(mut self, max_memory_span: usize) -> Self {
        self.max_memory_span = max_memory_span;
        self
    }
}

/// Per-command overrides for a single call.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Per-attempt timeout override.
    pub timeout: Option<Duration>,

    /// Retry count override.
    pub max_retries: Option<u32>,

    /// Overall deadline for the whole call, retries included. Once it
    /// passes, no further writes happen and the call resolves cancelled.
    pub deadline: Option<Instant>,
}

impl CommandOptions {
    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set an overall deadline for the call.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
