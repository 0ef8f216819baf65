//! AlarmClock Serial Protocol
//!
//! This crate provides types and utilities for communicating with AlarmClock
//! firmware over its serial line protocol. The protocol is half duplex
//! request/response with unsolicited notifications mixed into the same byte
//! stream.
//!
//! # Protocol Overview
//!
//! Every frame is a single line of ASCII tokens separated by spaces and
//! terminated with `\n` (a `\r` before the terminator is tolerated and
//! stripped):
//!
//! - **Requests** (host → firmware): first token is the verb, e.g.
//!   `READ_ALARM 3` or `SET_RTC 2024-01-06 13:01:00`
//! - **Replies** (firmware → host): `OK` followed by result tokens, or
//!   `ERR <code> [message]` on failure
//! - **Notifications** (firmware → host, unsolicited): first token names the
//!   event, e.g. `ALARM_FIRED 2`, `TIMER_FIRED`, `STATE_CHANGED`
//!
//! The firmware answers at most one request at a time; notifications may
//! arrive at any point, including between a request and its reply.
//!
//! # Example
//!
//! ```rust,ignore
//! use aclock_protocol::{Command, LineCodec, Reply};
//!
//! // Build a request line
//! let cmd = Command::ReadAlarm { index: 3 };
//! let bytes = LineCodec::encode_command(&cmd.to_line());
//!
//! // Feed received bytes and pull out frames
//! let mut codec = LineCodec::new();
//! codec.push(b"OK RPT 74 13:01 5 3 240 1 1\n");
//! let frame = codec.decode()?.unwrap();
//! let reply = Reply::parse(&frame)?;
//! ```

mod codec;
mod commands;
mod constants;
mod error;
mod reply;
mod types;

pub use codec::*;
pub use commands::*;
pub use constants::*;
pub use error::*;
pub use reply::*;
pub use types::*;
