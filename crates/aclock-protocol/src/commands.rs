//! Requests that can be sent to the AlarmClock firmware.
//!
//! Every request is a single line: the verb followed by space separated
//! argument tokens. The firmware answers each request with exactly one
//! `OK`/`ERR` reply line.

use chrono::NaiveDateTime;

use crate::codec::LineCodec;
use crate::constants::RTC_FORMAT;
use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Alarm, Signalization, TimerDuration};

/// Requests understood by the AlarmClock firmware.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ========== Info Commands ==========
    /// Get firmware identification and the number of alarms.
    Version,

    /// Get a device status snapshot.
    Status,

    // ========== Alarm Commands ==========
    /// Read a single alarm.
    ReadAlarm {
        /// Alarm index.
        index: u8,
    },

    /// Write a single alarm. Changes persist only after `Save`.
    WriteAlarm {
        /// Alarm index.
        index: u8,
        /// New alarm settings.
        alarm: Alarm,
    },

    // ========== Clock Commands ==========
    /// Get the RTC date and time.
    Rtc,

    /// Set the RTC date and time in one step.
    SetRtc {
        /// New date and time.
        time: NaiveDateTime,
    },

    // ========== Output Commands ==========
    /// Get the lamp state.
    Lamp,

    /// Switch the lamp on or off.
    SetLamp {
        /// Desired lamp state.
        on: bool,
    },

    /// Get the ambient LED status.
    Ambient,

    /// Set the ambient LED target brightness.
    SetAmbient {
        /// Target brightness (0-255).
        target: u8,
    },

    /// Get the alarm inhibit state.
    Inhibit,

    /// Enable or disable alarm inhibit.
    SetInhibit {
        /// Desired inhibit state.
        on: bool,
    },

    // ========== Countdown Timer Commands ==========
    /// Get the countdown timer state.
    Timer,

    /// Set the countdown time without starting the timer.
    SetTimer {
        /// Countdown time.
        time: TimerDuration,
    },

    /// Set what happens when the countdown expires.
    SetTimerEvents {
        /// Expiry signalization.
        events: Signalization,
    },

    /// Start the countdown.
    StartTimer,

    /// Stop the countdown.
    StopTimer,

    // ========== EEPROM Commands ==========
    /// Read a region of the EEPROM.
    ReadMemory {
        /// Start address.
        address: u16,
        /// Number of bytes to read.
        length: u8,
    },

    /// Write bytes to the EEPROM. Takes effect immediately.
    WriteMemory {
        /// Start address.
        address: u16,
        /// Bytes to write.
        data: Vec<u8>,
    },

    // ========== Action Commands ==========
    /// Persist changed alarm settings to the EEPROM.
    Save,

    /// Emulate pressing the physical stop button.
    Stop,

    // ========== Raw Command ==========
    /// Send a raw verb with raw argument tokens.
    Raw {
        /// The request verb.
        verb: String,
        /// Argument tokens.
        args: Vec<String>,
    },
}

impl Command {
    /// Build a raw command, validating token hygiene.
    ///
    /// Tokens must be non-empty printable ASCII without spaces, otherwise
    /// the encoded line would not survive the trip through the framer.
    pub fn raw(
        verb: impl Into<String>,
        args: impl IntoIterator<Item = String>,
    ) -> ProtocolResult<Command> {
        let verb = verb.into();
        validate_token(&verb)?;
        let args: Vec<String> = args.into_iter().collect();
        for arg in &args {
            validate_token(arg)?;
        }
        Ok(Command::Raw { verb, args })
    }

    /// The request verb.
    pub fn verb(&self) -> &str {
        match self {
            Command::Version => "VERSION",
            Command::Status => "STATUS",
            Command::ReadAlarm { .. } => "READ_ALARM",
            Command::WriteAlarm { .. } => "WRITE_ALARM",
            Command::Rtc => "RTC",
            Command::SetRtc { .. } => "SET_RTC",
            Command::Lamp => "LAMP",
            Command::SetLamp { .. } => "SET_LAMP",
            Command::Ambient => "AMBIENT",
            Command::SetAmbient { .. } => "SET_AMBIENT",
            Command::Inhibit => "INHIBIT",
            Command::SetInhibit { .. } => "SET_INHIBIT",
            Command::Timer => "TIMER",
            Command::SetTimer { .. } => "SET_TIMER",
            Command::SetTimerEvents { .. } => "SET_TIMER_EVENTS",
            Command::StartTimer => "START_TIMER",
            Command::StopTimer => "STOP_TIMER",
            Command::ReadMemory { .. } => "READ_MEM",
            Command::WriteMemory { .. } => "WRITE_MEM",
            Command::Save => "SAVE",
            Command::Stop => "STOP",
            Command::Raw { verb, .. } => verb,
        }
    }

    /// Get the request line without the terminator.
    pub fn to_line(&self) -> String {
        match self {
            Command::Version
            | Command::Status
            | Command::Rtc
            | Command::Lamp
            | Command::Ambient
            | Command::Inhibit
            | Command::Timer
            | Command::StartTimer
            | Command::StopTimer
            | Command::Save
            | Command::Stop => self.verb().to_string(),

            Command::ReadAlarm { index } => format!("READ_ALARM {}", index),
            Command::WriteAlarm { index, alarm } => {
                format!("WRITE_ALARM {} {}", index, alarm.to_args().join(" "))
            }
            Command::SetRtc { time } => format!("SET_RTC {}", time.format(RTC_FORMAT)),
            Command::SetLamp { on } => format!("SET_LAMP {}", *on as u8),
            Command::SetAmbient { target } => format!("SET_AMBIENT {}", target),
            Command::SetInhibit { on } => format!("SET_INHIBIT {}", *on as u8),
            Command::SetTimer { time } => format!("SET_TIMER {}", time),
            Command::SetTimerEvents { events } => format!(
                "SET_TIMER_EVENTS {} {} {}",
                events.ambient, events.lamp as u8, events.buzzer as u8
            ),
            Command::ReadMemory { address, length } => format!("READ_MEM {} {}", address, length),
            Command::WriteMemory { address, data } => {
                let mut line = format!("WRITE_MEM {}", address);
                for byte in data {
                    line.push(' ');
                    line.push_str(&byte.to_string());
                }
                line
            }
            Command::Raw { verb, args } => {
                if args.is_empty() {
                    verb.clone()
                } else {
                    format!("{} {}", verb, args.join(" "))
                }
            }
        }
    }

    /// Encode the request as bytes to send, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        LineCodec::encode_command(&self.to_line())
    }
}

fn validate_token(token: &str) -> ProtocolResult<()> {
    let printable = !token.is_empty()
        && token
            .bytes()
            .all(|byte| (0x21..=0x7E).contains(&byte));
    if !printable {
        return Err(ProtocolError::IllegalToken(token.to_string()));
    }
    Ok(())
}
