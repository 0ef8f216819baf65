//! Reply and notification parsing.
//!
//! Every frame coming from the firmware is either a reply to the pending
//! request (`OK …` or `ERR <code> [message]`) or an unsolicited notification
//! (any other verb). [`Reply::is_reply`] makes that call; the client routes
//! frames accordingly.

use crate::codec::Frame;
use crate::error::{DeviceErrorCode, ProtocolError, ProtocolResult};

/// Parsed reply to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Request succeeded. Carries the result tokens after `OK`.
    Ok(Vec<String>),

    /// Request failed on the device.
    Err {
        /// Firmware error code.
        code: DeviceErrorCode,
        /// Optional human readable detail.
        message: Option<String>,
    },
}

impl Reply {
    /// Whether this frame is a reply at all, as opposed to a notification.
    pub fn is_reply(frame: &Frame) -> bool {
        matches!(frame.verb(), "OK" | "ERR")
    }

    /// Parse a reply frame.
    pub fn parse(frame: &Frame) -> ProtocolResult<Reply> {
        let args = frame.args();
        match frame.verb() {
            "OK" => Ok(Reply::Ok(args.iter().map(|s| s.to_string()).collect())),
            "ERR" => {
                let code = args
                    .first()
                    .ok_or(ProtocolError::NotEnoughTokens {
                        expected: 1,
                        actual: 0,
                    })?;
                let code: u8 = code
                    .parse()
                    .map_err(|_| ProtocolError::invalid("error code", code))?;
                let message = if args.len() > 1 {
                    Some(args[1..].join(" "))
                } else {
                    None
                };
                Ok(Reply::Err {
                    code: DeviceErrorCode::from(code),
                    message,
                })
            }
            other => Err(ProtocolError::ParseError(format!(
                "not a reply frame: {:?}",
                other
            ))),
        }
    }

    /// Check if this is an `OK` reply.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    /// Get the result tokens if this is an `OK` reply.
    pub fn ok_args(&self) -> Option<&[String]> {
        match self {
            Reply::Ok(args) => Some(args),
            Reply::Err { .. } => None,
        }
    }
}

/// An unsolicited notification pushed by the firmware.
///
/// The first token of the frame names the event and doubles as the
/// subscription category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// An alarm started signalling.
    AlarmFired {
        /// Index of the alarm that fired.
        index: u8,
    },

    /// The countdown timer expired.
    TimerFired,

    /// Some device state changed outside of a request, for example the lamp
    /// was toggled with the physical button. Consumers should re-poll
    /// `STATUS`.
    StateChanged,

    /// A notification this crate does not know about.
    Unknown(Frame),
}

/// Category token of [`Notification::AlarmFired`].
pub const EVENT_ALARM_FIRED: &str = "ALARM_FIRED";
/// Category token of [`Notification::TimerFired`].
pub const EVENT_TIMER_FIRED: &str = "TIMER_FIRED";
/// Category token of [`Notification::StateChanged`].
pub const EVENT_STATE_CHANGED: &str = "STATE_CHANGED";

impl Notification {
    /// Classify a non-reply frame.
    ///
    /// Unrecognized or malformed notifications come back as
    /// [`Notification::Unknown`] so that no frame is silently lost.
    pub fn parse(frame: &Frame) -> Notification {
        match frame.verb() {
            EVENT_ALARM_FIRED => match frame.args().first().and_then(|arg| arg.parse().ok()) {
                Some(index) => Notification::AlarmFired { index },
                None => Notification::Unknown(frame.clone()),
            },
            EVENT_TIMER_FIRED => Notification::TimerFired,
            EVENT_STATE_CHANGED => Notification::StateChanged,
            _ => Notification::Unknown(frame.clone()),
        }
    }

    /// The subscription category this notification belongs to.
    pub fn category(&self) -> &str {
        match self {
            Notification::AlarmFired { .. } => EVENT_ALARM_FIRED,
            Notification::TimerFired => EVENT_TIMER_FIRED,
            Notification::StateChanged => EVENT_STATE_CHANGED,
            Notification::Unknown(frame) => frame.verb(),
        }
    }
}
