//! AlarmClock Serial Client
//!
//! Threaded client for AlarmClock devices. A dedicated reader thread drains
//! the transport and correlates replies with the pending command, while
//! unsolicited notifications go to subscriber callbacks on a separate
//! dispatcher thread. Commands that time out are retried up to a configured
//! budget before failing.
//!
//! # Example
//!
//! ```rust,ignore
//! use aclock_client::{AlarmClock, ClientConfig};
//!
//! let clock = AlarmClock::connect("/dev/ttyUSB0", ClientConfig::default())?;
//! println!("firmware {}", clock.device_info().version);
//!
//! clock.subscribe("ALARM_FIRED", |event| {
//!     println!("alarm went off: {:?}", event);
//! });
//!
//! let status = clock.status()?;
//! if !status.lamp {
//!     clock.set_lamp(true)?;
//! }
//! ```

mod channel;
mod config;
mod device;
mod error;
mod events;
mod reader;
mod transport;

pub use channel::{standard_matcher, CommandChannel, ReplyMatcher};
pub use config::{ClientConfig, CommandOptions};
pub use device::AlarmClock;
pub use error::{ClientError, ClientResult};
pub use events::SubscriptionId;
pub use transport::{SerialTransport, Transport};
