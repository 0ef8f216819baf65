//! Byte stream transports.
//!
//! The client reads and writes through the [`Transport`] trait so tests can
//! plug in a scripted byte stream. The only shipped implementation talks to
//! a serial port.

use std::io;
use std::time::Duration;

use serialport::SerialPort;

/// How long a single [`Transport::read`] may block. Short enough that the
/// reader thread notices a stop request promptly.
pub(crate) const READ_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A blocking byte stream to the device.
///
/// `read` must block at most a short poll interval and signal an empty poll
/// with [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`].
/// Returning `Ok(0)` means the stream is gone for good.
pub trait Transport: Send {
    /// Read available bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data`.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Clone a handle sharing the same underlying byte stream, so one half
    /// can read while the other writes.
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;
}

/// [`Transport`] implementation over a serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port for talking to an AlarmClock.
    pub fn open(path: &str, baud_rate: u32) -> Result<SerialTransport, serialport::Error> {
        let port = serialport::new(path, baud_rate)
            .timeout(READ_POLL_INTERVAL)
            .open()?;
        tracing::debug!(path, baud_rate, "serial port opened");
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialTransport { port }))
    }
}
