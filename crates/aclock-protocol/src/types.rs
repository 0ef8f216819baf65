//! Typed views of AlarmClock data.
//!
//! These types mirror what the firmware stores: alarms with a day-of-week
//! mask, snooze and signalization settings, the countdown timer and the
//! device status snapshot. Each reply-carrying type knows how to parse
//! itself from the token list of an `OK` reply, and alarm settings also
//! encode back into request tokens.

use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtocolError, ProtocolResult};

/// Full day names in AlarmClock day numbering order (Monday first).
const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn day_name(day: Weekday) -> &'static str {
    DAY_NAMES[day.num_days_from_monday() as usize]
}

fn parse_num<T: FromStr>(field: &'static str, token: &str) -> ProtocolResult<T> {
    token.parse().map_err(|_| ProtocolError::invalid(field, token))
}

fn parse_flag(field: &'static str, token: &str) -> ProtocolResult<bool> {
    match token {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ProtocolError::invalid(field, token)),
    }
}

fn expect_args(args: &[&str], expected: usize) -> ProtocolResult<()> {
    if args.len() < expected {
        return Err(ProtocolError::NotEnoughTokens {
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

/// Alarm indexes packed into a bitmask, lowest bit is alarm 0.
fn ids_from_mask(mask: u32) -> Vec<u8> {
    (0..32).filter(|bit| mask & (1 << bit) != 0).collect()
}

// ============================================================================
// Days of week
// ============================================================================

/// A boolean value for each day of the week.
///
/// Reads and produces the one byte code the firmware uses: bit 1 is Monday
/// through bit 7 Sunday. Bit 0 has no meaning and is always kept zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaysOfWeek {
    code: u8,
}

impl DaysOfWeek {
    /// Empty set, no day enabled.
    pub fn new() -> Self {
        DaysOfWeek { code: 0 }
    }

    /// Create from the firmware's one byte code. Bit 0 is filtered out.
    pub fn from_code(code: u8) -> Self {
        DaysOfWeek { code: code & 0xFE }
    }

    /// Create from a list of enabled days.
    pub fn from_days(days: &[Weekday]) -> Self {
        let mut dow = DaysOfWeek::new();
        for &day in days {
            dow.set_day(day, true);
        }
        dow
    }

    /// The firmware's one byte code.
    pub fn code(&self) -> u8 {
        self.code
    }

    fn bit(day: Weekday) -> u8 {
        // Monday is day 1, Sunday is day 7.
        1 << (day.num_days_from_monday() + 1)
    }

    /// Get the value for a single day of the week.
    pub fn get_day(&self, day: Weekday) -> bool {
        self.code & Self::bit(day) != 0
    }

    /// Set the value for a single day of the week.
    pub fn set_day(&mut self, day: Weekday, value: bool) {
        if value {
            self.code |= Self::bit(day);
        } else {
            self.code &= !Self::bit(day);
        }
    }

    /// Whether no day is enabled.
    pub fn is_empty(&self) -> bool {
        self.code == 0
    }

    /// All days for which the stored value is true, Monday first.
    pub fn active_days(&self) -> Vec<Weekday> {
        ALL_DAYS
            .iter()
            .copied()
            .filter(|&day| self.get_day(day))
            .collect()
    }
}

impl std::fmt::Display for DaysOfWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.active_days().into_iter().map(day_name).collect();
        write!(f, "{}", names.join(", "))
    }
}

impl Serialize for DaysOfWeek {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.active_days().into_iter().map(day_name))
    }
}

impl<'de> Deserialize<'de> for DaysOfWeek {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accepts day names ("Monday") or day numbers (1..=7, Monday is 1).
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Day {
            Name(String),
            Number(u8),
        }

        let days = Vec::<Day>::deserialize(deserializer)?;
        let mut dow = DaysOfWeek::new();
        for day in days {
            let weekday = match day {
                Day::Name(name) => name
                    .parse::<Weekday>()
                    .map_err(|_| D::Error::custom(format!("unknown day: {:?}", name)))?,
                Day::Number(number) => {
                    if !(1..=7).contains(&number) {
                        return Err(D::Error::custom(format!(
                            "{} is not a valid day of the week",
                            number
                        )));
                    }
                    ALL_DAYS[(number - 1) as usize]
                }
            };
            dow.set_day(weekday, true);
        }
        Ok(dow)
    }
}

// ============================================================================
// Alarm settings
// ============================================================================

/// All possible states of an alarm's `enabled` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmEnabled {
    /// Alarm never fires.
    Off,
    /// Fires once, then disables itself.
    Sgl,
    /// Fires on every enabled day.
    Rpt,
    /// Fires repeatedly, but the next occurrence is skipped.
    Skp,
}

impl AlarmEnabled {
    /// Wire token for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmEnabled::Off => "OFF",
            AlarmEnabled::Sgl => "SGL",
            AlarmEnabled::Rpt => "RPT",
            AlarmEnabled::Skp => "SKP",
        }
    }

    /// Parse a wire token.
    pub fn from_str(s: &str) -> Option<AlarmEnabled> {
        match s {
            "OFF" => Some(AlarmEnabled::Off),
            "SGL" => Some(AlarmEnabled::Sgl),
            "RPT" => Some(AlarmEnabled::Rpt),
            "SKP" => Some(AlarmEnabled::Skp),
            _ => None,
        }
    }
}

/// A time of day with minutes precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    /// Hours (0-23).
    pub hours: u8,
    /// Minutes (0-59).
    pub minutes: u8,
}

impl TimeOfDay {
    /// Parse a `H:MM` token.
    pub fn parse(token: &str) -> ProtocolResult<TimeOfDay> {
        let (hours, minutes) = token
            .split_once(':')
            .ok_or_else(|| ProtocolError::invalid("time of day", token))?;
        let hours: u8 = parse_num("hours", hours)?;
        let minutes: u8 = parse_num("minutes", minutes)?;
        if hours > 23 || minutes > 59 {
            return Err(ProtocolError::invalid("time of day", token));
        }
        Ok(TimeOfDay { hours, minutes })
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:02}", self.hours, self.minutes)
    }
}

/// Snooze settings of an alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snooze {
    /// Snooze time in minutes (max 99).
    pub time: u8,
    /// Number of times the alarm can be snoozed (max 9).
    pub count: u8,
}

/// Signalization settings of an alarm or the countdown timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signalization {
    /// Ambient LED target brightness (0-255).
    pub ambient: u8,
    /// Whether the lamp turns on.
    pub lamp: bool,
    /// Whether the buzzer sounds.
    pub buzzer: bool,
}

/// A single alarm as stored by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    /// When the alarm fires.
    pub enabled: AlarmEnabled,
    /// Days of the week the alarm fires on.
    pub days_of_week: DaysOfWeek,
    /// Time of day the alarm fires at.
    pub time: TimeOfDay,
    /// Snooze settings.
    pub snooze: Snooze,
    /// What happens when the alarm fires.
    pub signalization: Signalization,
}

impl Alarm {
    /// Parse alarm settings from reply tokens.
    ///
    /// Token order: enabled, days-of-week code, time, snooze time, snooze
    /// count, ambient, lamp, buzzer.
    pub fn parse_args(args: &[&str]) -> ProtocolResult<Alarm> {
        expect_args(args, 8)?;
        let enabled = AlarmEnabled::from_str(args[0])
            .ok_or_else(|| ProtocolError::invalid("enabled", args[0]))?;
        let days_of_week = DaysOfWeek::from_code(parse_num("days of week", args[1])?);
        let time = TimeOfDay::parse(args[2])?;
        let snooze = Snooze {
            time: parse_num("snooze time", args[3])?,
            count: parse_num("snooze count", args[4])?,
        };
        let signalization = Signalization {
            ambient: parse_num("ambient", args[5])?,
            lamp: parse_flag("lamp", args[6])?,
            buzzer: parse_flag("buzzer", args[7])?,
        };
        Ok(Alarm {
            enabled,
            days_of_week,
            time,
            snooze,
            signalization,
        })
    }

    /// Encode alarm settings as request tokens, in the same order
    /// `parse_args` expects.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.enabled.as_str().to_string(),
            self.days_of_week.code().to_string(),
            self.time.to_string(),
            self.snooze.time.to_string(),
            self.snooze.count.to_string(),
            self.signalization.ambient.to_string(),
            (self.signalization.lamp as u8).to_string(),
            (self.signalization.buzzer as u8).to_string(),
        ]
    }

    /// The next time this alarm fires strictly after `after`.
    ///
    /// Returns `None` for alarms that never fire on their own: disabled or
    /// skipped alarms and alarms with no enabled day. An occurrence exactly
    /// at `after` does not count; the next one is returned instead.
    pub fn next_occurrence(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        match self.enabled {
            AlarmEnabled::Off | AlarmEnabled::Skp => return None,
            AlarmEnabled::Sgl | AlarmEnabled::Rpt => {}
        }
        if self.days_of_week.is_empty() {
            return None;
        }

        let alarm_time =
            NaiveTime::from_hms_opt(self.time.hours as u32, self.time.minutes as u32, 0)?;
        for day_offset in 0..=7 {
            let date = after.date() + Duration::days(day_offset);
            if !self.days_of_week.get_day(date.weekday()) {
                continue;
            }
            let candidate = date.and_time(alarm_time);
            if candidate > after {
                return Some(candidate);
            }
        }
        None
    }
}

// ============================================================================
// Device status
// ============================================================================

/// Display backlight levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BacklightLevel {
    /// Backlight off.
    Off,
    /// Dimmed.
    Dim,
    /// Full brightness.
    Bright,
    /// Full brightness, never times out.
    Permanent,
}

impl BacklightLevel {
    /// Wire token for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            BacklightLevel::Off => "OFF",
            BacklightLevel::Dim => "DIM",
            BacklightLevel::Bright => "BRIGHT",
            BacklightLevel::Permanent => "PERMANENT",
        }
    }

    /// Parse a wire token.
    pub fn from_str(s: &str) -> Option<BacklightLevel> {
        match s {
            "OFF" => Some(BacklightLevel::Off),
            "DIM" => Some(BacklightLevel::Dim),
            "BRIGHT" => Some(BacklightLevel::Bright),
            "PERMANENT" => Some(BacklightLevel::Permanent),
            _ => None,
        }
    }
}

/// Current and target brightness of the ambient LED strip.
///
/// The LED fades towards the target, so the two differ while a fade is in
/// progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientStatus {
    /// Momentary brightness.
    pub current: u8,
    /// Brightness being faded towards.
    pub target: u8,
}

impl AmbientStatus {
    /// Parse the `AMBIENT` reply tokens: current, target.
    pub fn parse_args(args: &[&str]) -> ProtocolResult<AmbientStatus> {
        expect_args(args, 2)?;
        Ok(AmbientStatus {
            current: parse_num("ambient current", args[0])?,
            target: parse_num("ambient target", args[1])?,
        })
    }
}

/// Device status snapshot from the `STATUS` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Ambient LED status.
    pub ambient: AmbientStatus,
    /// Whether the lamp is on.
    pub lamp: bool,
    /// Whether alarms are inhibited.
    pub inhibit: bool,
    /// Display backlight level.
    pub display_backlight: BacklightLevel,
    /// Indexes of alarms that are currently sounding.
    pub active_alarm_ids: Vec<u8>,
    /// Indexes of alarms whose ambient fade is active.
    pub alarm_with_active_ambient_ids: Vec<u8>,
    /// Whether any alarm was modified on the device since the last `STATUS`.
    pub alarms_changed: bool,
}

impl DeviceStatus {
    /// Parse a status snapshot from reply tokens.
    ///
    /// Token order: ambient current, ambient target, lamp, inhibit,
    /// backlight, active alarm bitmask, active ambient bitmask,
    /// alarms-changed flag.
    pub fn parse_args(args: &[&str]) -> ProtocolResult<DeviceStatus> {
        expect_args(args, 8)?;
        Ok(DeviceStatus {
            ambient: AmbientStatus {
                current: parse_num("ambient current", args[0])?,
                target: parse_num("ambient target", args[1])?,
            },
            lamp: parse_flag("lamp", args[2])?,
            inhibit: parse_flag("inhibit", args[3])?,
            display_backlight: BacklightLevel::from_str(args[4])
                .ok_or_else(|| ProtocolError::invalid("backlight", args[4]))?,
            active_alarm_ids: ids_from_mask(parse_num("active alarm mask", args[5])?),
            alarm_with_active_ambient_ids: ids_from_mask(parse_num("ambient alarm mask", args[6])?),
            alarms_changed: parse_flag("alarms changed", args[7])?,
        })
    }
}

/// Firmware identification from the `VERSION` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Number of alarms the firmware stores.
    pub number_of_alarms: u8,
    /// Firmware version string.
    pub version: String,
    /// Firmware build identifier.
    pub build: String,
}

impl DeviceInfo {
    /// Parse firmware identification from reply tokens.
    pub fn parse_args(args: &[&str]) -> ProtocolResult<DeviceInfo> {
        expect_args(args, 3)?;
        Ok(DeviceInfo {
            number_of_alarms: parse_num("number of alarms", args[0])?,
            version: args[1].to_string(),
            build: args[2..].join(" "),
        })
    }
}

// ============================================================================
// Countdown timer
// ============================================================================

/// A countdown time with seconds precision, formatted `H:MM:SS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerDuration {
    total_seconds: u32,
}

impl TimerDuration {
    /// Create from a total number of seconds.
    pub fn from_secs(total_seconds: u32) -> Self {
        TimerDuration { total_seconds }
    }

    /// Create from hours, minutes and seconds.
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Self {
        TimerDuration {
            total_seconds: hours * 3600 + minutes * 60 + seconds,
        }
    }

    /// Total number of seconds.
    pub fn as_secs(&self) -> u32 {
        self.total_seconds
    }

    /// Parse a `H:MM:SS` token.
    pub fn parse(token: &str) -> ProtocolResult<TimerDuration> {
        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() != 3 {
            return Err(ProtocolError::invalid("timer duration", token));
        }
        let hours: u32 = parse_num("hours", parts[0])?;
        let minutes: u32 = parse_num("minutes", parts[1])?;
        let seconds: u32 = parse_num("seconds", parts[2])?;
        if minutes > 59 || seconds > 59 {
            return Err(ProtocolError::invalid("timer duration", token));
        }
        Ok(TimerDuration::from_hms(hours, minutes, seconds))
    }
}

impl std::fmt::Display for TimerDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{:02}:{:02}",
            self.total_seconds / 3600,
            (self.total_seconds / 60) % 60,
            self.total_seconds % 60
        )
    }
}

impl Serialize for TimerDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimerDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        TimerDuration::parse(&text).map_err(D::Error::custom)
    }
}

/// Countdown timer state from the `TIMER` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// Time left on the countdown.
    pub time: TimerDuration,
    /// Whether the countdown is running.
    pub running: bool,
    /// What happens when the countdown expires.
    pub events: Signalization,
}

impl TimerState {
    /// Parse timer state from reply tokens.
    ///
    /// Token order: time left, running, ambient, lamp, buzzer.
    pub fn parse_args(args: &[&str]) -> ProtocolResult<TimerState> {
        expect_args(args, 5)?;
        Ok(TimerState {
            time: TimerDuration::parse(args[0])?,
            running: parse_flag("running", args[1])?,
            events: Signalization {
                ambient: parse_num("ambient", args[2])?,
                lamp: parse_flag("lamp", args[3])?,
                buzzer: parse_flag("buzzer", args[4])?,
            },
        })
    }
}
