//! Line-based codec for the AlarmClock serial protocol.
//!
//! The protocol uses line-based text communication: every frame is a single
//! line of space-separated ASCII tokens terminated with `\n`. Incoming `\r`
//! is tolerated and stripped, and stray control bytes (line noise, the
//! firmware's power-on banner fragments) are filtered out before a line is
//! turned into a frame.

use bytes::BytesMut;

use crate::constants::{LINE_TERMINATOR, MAX_LINE_LENGTH};
use crate::error::{ProtocolError, ProtocolResult};

/// A single complete frame received from the device.
///
/// Frames carry a sequence number assigned by the codec in arrival order, so
/// consumers can tell in which order frames were produced even after they
/// have been routed to different handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    seq: u64,
    line: String,
}

impl Frame {
    /// Create a frame from an already decoded line.
    pub fn new(seq: u64, line: impl Into<String>) -> Self {
        Frame {
            seq,
            line: line.into(),
        }
    }

    /// Sequence number assigned by the codec.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The full frame text, terminator stripped.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// First token of the frame.
    pub fn verb(&self) -> &str {
        self.line.split_ascii_whitespace().next().unwrap_or("")
    }

    /// All tokens after the verb.
    pub fn args(&self) -> Vec<&str> {
        self.line.split_ascii_whitespace().skip(1).collect()
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.line)
    }
}

/// A codec for reading and writing protocol lines.
///
/// This handles the line-based nature of the protocol:
/// - Accumulates received bytes until a complete line is found
/// - Strips `\r` and filters non-printable noise bytes
/// - Discards oversized lines instead of growing the buffer without bound
#[derive(Debug)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
    /// Maximum accepted line length, excluding the terminator.
    max_line_len: usize,
    /// Sequence number for the next decoded frame.
    next_seq: u64,
    /// Whether we are discarding an oversized line up to its terminator.
    discarding: bool,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a new line codec with the default maximum line length.
    pub fn new() -> Self {
        Self::with_max_line_len(MAX_LINE_LENGTH)
    }

    /// Create a new line codec with a custom maximum line length.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(max_line_len * 2),
            max_line_len,
            next_seq: 0,
            discarding: false,
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode one complete frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` when a complete line is available,
    /// `Ok(None)` when more data is needed, and an error when an oversized
    /// line had to be discarded. After an error the codec stays usable and
    /// the next call continues with the following line.
    pub fn decode(&mut self) -> ProtocolResult<Option<Frame>> {
        loop {
            let terminator = self
                .buffer
                .iter()
                .position(|&byte| byte == LINE_TERMINATOR);

            if self.discarding {
                match terminator {
                    Some(end) => {
                        let _ = self.buffer.split_to(end + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buffer.clear();
                        return Ok(None);
                    }
                }
            }

            let Some(end) = terminator else {
                // No terminator yet. Refuse to buffer more than one line.
                if self.buffer.len() > self.max_line_len {
                    let actual = self.buffer.len();
                    self.buffer.clear();
                    self.discarding = true;
                    return Err(ProtocolError::FrameTooLong {
                        max: self.max_line_len,
                        actual,
                    });
                }
                return Ok(None);
            };

            if end > self.max_line_len {
                let _ = self.buffer.split_to(end + 1);
                return Err(ProtocolError::FrameTooLong {
                    max: self.max_line_len,
                    actual: end,
                });
            }

            let raw = self.buffer.split_to(end + 1);
            let line: String = raw[..end]
                .iter()
                .filter(|&&byte| (0x20..=0x7E).contains(&byte))
                .map(|&byte| byte as char)
                .collect();
            let line = line.trim();

            // Noise-only and empty lines produce no frame.
            if line.is_empty() {
                log::trace!("skipping empty line");
                continue;
            }

            let frame = Frame::new(self.next_seq, line);
            self.next_seq += 1;
            log::trace!("decoded frame #{}: {}", frame.seq(), frame.line());
            return Ok(Some(frame));
        }
    }

    /// Encode a request line for transmission.
    ///
    /// Appends the line terminator.
    pub fn encode_command(line: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(LINE_TERMINATOR);
        buf
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer and any discard state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}
