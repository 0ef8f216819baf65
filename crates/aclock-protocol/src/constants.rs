//! Protocol constants.
//!
//! These need to be updated if the AlarmClock firmware changes.

/// Frame terminator appended to every outgoing request.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Default maximum frame length in bytes, excluding the terminator.
pub const MAX_LINE_LENGTH: usize = 512;

/// Timestamp layout used by `SET_RTC` and the `RTC` reply.
pub const RTC_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Error code: malformed or out-of-range argument.
pub const ERR_CODE_ARGUMENT: u8 = 1;
/// Error code: command needs a selected alarm and none is selected.
pub const ERR_CODE_NOTHING_SELECTED: u8 = 2;
/// Error code: save requested but nothing has changed.
pub const ERR_CODE_USELESS_SAVE: u8 = 4;
/// Error code: referenced item does not exist.
pub const ERR_CODE_NOT_FOUND: u8 = 8;
/// Error code: command not supported by this firmware.
pub const ERR_CODE_UNSUPPORTED: u8 = 16;

/// Total EEPROM size in bytes.
pub const EEPROM_SIZE: usize = 1024;
/// Start of the melody header table.
pub const EEPROM_MELODIES_HEADER_START: u16 = 0x0010;
/// Number of melody header entries.
pub const EEPROM_MELODIES_COUNT: u16 = 16;
/// Start of the melody data region.
pub const EEPROM_MELODIES_DATA_START: u16 = 0x0100;
/// Start of the stored alarms region.
pub const EEPROM_ALARMS_START: u16 = 0x0040;

/// Maximum snooze time in minutes the firmware accepts.
pub const MAX_SNOOZE_TIME: u8 = 99;
/// Maximum snooze count the firmware accepts.
pub const MAX_SNOOZE_COUNT: u8 = 9;
