//! High level AlarmClock device facade.
//!
//! [`AlarmClock`] owns the transport, the reader thread and the event
//! dispatcher, and exposes one typed method per firmware operation.
//! Arguments are validated locally before anything is written to the
//! transport, so an out-of-range request never reaches the device.

use std::sync::Arc;

use aclock_protocol::{
    Alarm, AmbientStatus, Command, DeviceInfo, DeviceStatus, Frame, Notification, ProtocolError,
    Signalization, Snooze, TimerDuration, TimerState, MAX_SNOOZE_COUNT, MAX_SNOOZE_TIME,
    RTC_FORMAT,
};
use chrono::NaiveDateTime;
use parking_lot::Mutex;

use crate::channel::{CommandChannel, ReplyMatcher, Shared};
use crate::config::{ClientConfig, CommandOptions};
use crate::error::{ClientError, ClientResult};
use crate::events::{EventDispatcher, SubscriptionId};
use crate::reader::Reader;
use crate::transport::{SerialTransport, Transport};

/// Client for one AlarmClock device.
///
/// Commands may be issued from any thread; they are serialized on the wire
/// in submission order. Dropping the client closes it.
pub struct AlarmClock {
    config: ClientConfig,
    shared: Arc<Shared>,
    channel: CommandChannel,
    dispatcher: EventDispatcher,
    reader: Mutex<Option<Reader>>,
    info: DeviceInfo,
}

impl AlarmClock {
    /// Open a serial port and connect to the device behind it.
    ///
    /// Runs the `VERSION` handshake before returning, so a successfully
    /// connected client always knows its firmware identity.
    pub fn connect(path: &str, config: ClientConfig) -> ClientResult<AlarmClock> {
        let transport = SerialTransport::open(path, config.baud_rate)?;
        Self::attach(Box::new(transport), config)
    }

    /// Connect over an already open transport.
    ///
    /// This is how tests and non-serial transports plug in; `connect` is a
    /// thin wrapper around it.
    pub fn attach(transport: Box<dyn Transport>, config: ClientConfig) -> ClientResult<AlarmClock> {
        let writer = transport.try_clone()?;
        let shared = Arc::new(Shared::new());
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut reader = Reader::spawn(
            transport,
            Arc::clone(&shared),
            events_tx,
            config.max_frame_len,
        );
        let dispatcher = EventDispatcher::spawn(events_rx);
        let channel = CommandChannel::new(Arc::clone(&shared), writer, &config);

        let handshake = channel
            .execute(&Command::Version, &CommandOptions::default())
            .and_then(|args| DeviceInfo::parse_args(&arg_refs(&args)).map_err(ClientError::from));
        let info = match handshake {
            Ok(info) => info,
            Err(err) => {
                tracing::error!(error = %err, "handshake failed");
                shared.close();
                reader.stop();
                dispatcher.join();
                return Err(err);
            }
        };
        tracing::info!(
            version = %info.version,
            build = %info.build,
            alarms = info.number_of_alarms,
            "connected to device"
        );

        Ok(AlarmClock {
            config,
            shared,
            channel,
            dispatcher,
            reader: Mutex::new(Some(reader)),
            info,
        })
    }

    /// Firmware identification captured during the handshake.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Number of alarms the firmware stores.
    pub fn number_of_alarms(&self) -> u8 {
        self.info.number_of_alarms
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ========== Status ==========

    /// Get a status snapshot.
    pub fn status(&self) -> ClientResult<DeviceStatus> {
        let args = self.run_command(&Command::Status)?;
        Ok(DeviceStatus::parse_args(&arg_refs(&args))?)
    }

    // ========== Alarms ==========

    /// Read one alarm.
    pub fn read_alarm(&self, index: u8) -> ClientResult<Alarm> {
        self.validate_alarm_index(index)?;
        let args = self.run_command(&Command::ReadAlarm { index })?;
        Ok(Alarm::parse_args(&arg_refs(&args))?)
    }

    /// Read every alarm the firmware stores, in index order.
    pub fn read_alarms(&self) -> ClientResult<Vec<Alarm>> {
        (0..self.info.number_of_alarms)
            .map(|index| self.read_alarm(index))
            .collect()
    }

    /// Write one alarm.
    ///
    /// The change lives in device RAM until [`save_settings`] commits it
    /// to EEPROM.
    ///
    /// [`save_settings`]: AlarmClock::save_settings
    pub fn write_alarm(&self, index: u8, alarm: &Alarm) -> ClientResult<()> {
        self.validate_alarm_index(index)?;
        validate_snooze(&alarm.snooze)?;
        self.run_command(&Command::WriteAlarm {
            index,
            alarm: *alarm,
        })?;
        Ok(())
    }

    // ========== Clock ==========

    /// Read the device real time clock.
    pub fn rtc(&self) -> ClientResult<NaiveDateTime> {
        let args = self.run_command(&Command::Rtc)?;
        parse_rtc(&args)
    }

    /// Set the device real time clock.
    pub fn set_rtc(&self, time: NaiveDateTime) -> ClientResult<()> {
        self.run_command(&Command::SetRtc { time })?;
        Ok(())
    }

    // ========== Outputs ==========

    /// Whether the lamp is on.
    pub fn lamp(&self) -> ClientResult<bool> {
        let args = self.run_command(&Command::Lamp)?;
        parse_flag("lamp", &args)
    }

    /// Switch the lamp on or off.
    pub fn set_lamp(&self, on: bool) -> ClientResult<()> {
        self.run_command(&Command::SetLamp { on })?;
        Ok(())
    }

    /// Current and target ambient LED brightness.
    pub fn ambient(&self) -> ClientResult<AmbientStatus> {
        let args = self.run_command(&Command::Ambient)?;
        Ok(AmbientStatus::parse_args(&arg_refs(&args))?)
    }

    /// Fade the ambient LED towards the given brightness.
    pub fn set_ambient(&self, target: u8) -> ClientResult<()> {
        self.run_command(&Command::SetAmbient { target })?;
        Ok(())
    }

    /// Whether alarms are currently inhibited.
    pub fn inhibit(&self) -> ClientResult<bool> {
        let args = self.run_command(&Command::Inhibit)?;
        parse_flag("inhibit", &args)
    }

    /// Inhibit or allow upcoming alarms.
    pub fn set_inhibit(&self, on: bool) -> ClientResult<()> {
        self.run_command(&Command::SetInhibit { on })?;
        Ok(())
    }

    // ========== Countdown Timer ==========

    /// Read the countdown timer state.
    pub fn timer(&self) -> ClientResult<TimerState> {
        let args = self.run_command(&Command::Timer)?;
        Ok(TimerState::parse_args(&arg_refs(&args))?)
    }

    /// Set the countdown duration.
    pub fn set_timer(&self, time: TimerDuration) -> ClientResult<()> {
        self.run_command(&Command::SetTimer { time })?;
        Ok(())
    }

    /// Set what the timer does when it expires.
    pub fn set_timer_events(&self, events: Signalization) -> ClientResult<()> {
        self.run_command(&Command::SetTimerEvents { events })?;
        Ok(())
    }

    /// Start the countdown.
    pub fn start_timer(&self) -> ClientResult<()> {
        self.run_command(&Command::StartTimer)?;
        Ok(())
    }

    /// Stop the countdown.
    pub fn stop_timer(&self) -> ClientResult<()> {
        self.run_command(&Command::StopTimer)?;
        Ok(())
    }

    // ========== EEPROM ==========

    /// Read a span of EEPROM.
    ///
    /// The whole span must fit the configured EEPROM size and the
    /// per-request limit; nothing is written to the transport otherwise.
    pub fn read_memory(&self, address: u16, length: usize) -> ClientResult<Vec<u8>> {
        self.validate_memory_span(address, length)?;
        let args = self.run_command(&Command::ReadMemory {
            address,
            length: length as u8,
        })?;
        if args.len() != length {
            return Err(ProtocolError::ParseError(format!(
                "expected {} memory bytes, got {}",
                length,
                args.len()
            ))
            .into());
        }
        let mut bytes = Vec::with_capacity(length);
        for token in &args {
            let byte: u8 = token.parse().map_err(|_| ProtocolError::InvalidToken {
                field: "memory byte",
                value: token.clone(),
            })?;
            bytes.push(byte);
        }
        Ok(bytes)
    }

    /// Write a span of EEPROM. Writes persist immediately.
    pub fn write_memory(&self, address: u16, data: &[u8]) -> ClientResult<()> {
        self.validate_memory_span(address, data.len())?;
        self.run_command(&Command::WriteMemory {
            address,
            data: data.to_vec(),
        })?;
        Ok(())
    }

    // ========== Actions ==========

    /// Commit changed alarms and settings to EEPROM.
    pub fn save_settings(&self) -> ClientResult<()> {
        self.run_command(&Command::Save)?;
        Ok(())
    }

    /// Press the stop button remotely, silencing whatever is sounding.
    pub fn press_stop(&self) -> ClientResult<()> {
        self.run_command(&Command::Stop)?;
        Ok(())
    }

    // ========== Raw Access ==========

    /// Execute any command and return the `OK` reply tokens.
    pub fn run_command(&self, command: &Command) -> ClientResult<Vec<String>> {
        self.channel.execute(command, &CommandOptions::default())
    }

    /// Execute any command with per-call timeout, retry and deadline
    /// overrides.
    pub fn run_command_with(
        &self,
        command: &Command,
        options: &CommandOptions,
    ) -> ClientResult<Vec<String>> {
        self.channel.execute(command, options)
    }

    /// Execute a command whose reply is recognized by a caller supplied
    /// matcher, and return the raw matched frame.
    pub fn run_command_matched(
        &self,
        command: &Command,
        matcher: ReplyMatcher,
        options: &CommandOptions,
    ) -> ClientResult<Frame> {
        self.channel.execute_matched(command, matcher, options)
    }

    // ========== Notifications ==========

    /// Observe notifications of one category, e.g. `"ALARM_FIRED"`.
    ///
    /// The callback runs on the dispatcher thread.
    pub fn subscribe<F>(&self, category: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.dispatcher
            .subscribe(Some(category.to_string()), Box::new(callback))
    }

    /// Observe every notification.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(None, Box::new(callback))
    }

    /// Drop a subscription. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    // ========== Lifecycle ==========

    /// Close the client.
    ///
    /// A pending command resolves with `Cancelled`; later commands fail
    /// with `Closed`. Queued notifications are still delivered before the
    /// dispatcher finishes. Idempotent. Must not be called from inside an
    /// observer callback.
    pub fn close(&self) {
        if !self.shared.close() {
            return;
        }
        tracing::debug!("closing client");
        if let Some(mut reader) = self.reader.lock().take() {
            reader.stop();
        }
        self.dispatcher.join();
    }

    fn validate_alarm_index(&self, index: u8) -> ClientResult<()> {
        let count = self.info.number_of_alarms;
        if index >= count {
            return Err(ClientError::Validation(format!(
                "{} is not a valid alarm index (0...{})",
                index,
                count.saturating_sub(1)
            )));
        }
        Ok(())
    }

    fn validate_memory_span(&self, address: u16, length: usize) -> ClientResult<()> {
        if length == 0 {
            return Err(ClientError::Validation(
                "memory span must not be empty".to_string(),
            ));
        }
        let max_span = self.config.max_memory_span.min(u8::MAX as usize);
        if length > max_span {
            return Err(ClientError::Validation(format!(
                "{} bytes exceed the per-request limit ({})",
                length, max_span
            )));
        }
        let end = address as usize + length;
        if end > self.config.eeprom_size {
            return Err(ClientError::Validation(format!(
                "{}..{} is outside the EEPROM range (0...{})",
                address,
                end,
                self.config.eeprom_size - 1
            )));
        }
        Ok(())
    }
}

impl Drop for AlarmClock {
    fn drop(&mut self) {
        self.close();
    }
}

fn arg_refs(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}

fn parse_flag(field: &'static str, args: &[String]) -> ClientResult<bool> {
    let token = args.first().ok_or(ProtocolError::NotEnoughTokens {
        expected: 1,
        actual: 0,
    })?;
    match token.as_str() {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ProtocolError::InvalidToken {
            field,
            value: token.clone(),
        }
        .into()),
    }
}

fn parse_rtc(args: &[String]) -> ClientResult<NaiveDateTime> {
    if args.len() < 2 {
        return Err(ProtocolError::NotEnoughTokens {
            expected: 2,
            actual: args.len(),
        }
        .into());
    }
    let joined = format!("{} {}", args[0], args[1]);
    match NaiveDateTime::parse_from_str(&joined, RTC_FORMAT) {
        Ok(time) => Ok(time),
        Err(_) => Err(ProtocolError::InvalidToken {
            field: "rtc",
            value: joined,
        }
        .into()),
    }
}

fn validate_snooze(snooze: &Snooze) -> ClientResult<()> {
    if snooze.time > MAX_SNOOZE_TIME {
        return Err(ClientError::Validation(format!(
            "snooze time {} out of range (0...{})",
            snooze.time, MAX_SNOOZE_TIME
        )));
    }
    if snooze.count > MAX_SNOOZE_COUNT {
        return Err(ClientError::Validation(format!(
            "snooze count {} out of range (0...{})",
            snooze.count, MAX_SNOOZE_COUNT
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_rtc() {
        let time = parse_rtc(&strings(&["2024-01-06", "13:01:00"])).unwrap();
        assert_eq!(
            time.date(),
            NaiveDate::from_ymd_opt(2024, 1, 6).unwrap()
        );
        assert_eq!(time.hour(), 13);
        assert_eq!(time.minute(), 1);
    }

    #[test]
    fn test_parse_rtc_rejects_garbage() {
        assert!(matches!(
            parse_rtc(&strings(&["2024-01-06"])),
            Err(ClientError::Protocol(ProtocolError::NotEnoughTokens { .. }))
        ));
        assert!(matches!(
            parse_rtc(&strings(&["yesterday", "noon"])),
            Err(ClientError::Protocol(ProtocolError::InvalidToken { .. }))
        ));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("lamp", &strings(&["1"])).unwrap());
        assert!(!parse_flag("lamp", &strings(&["0"])).unwrap());
        assert!(parse_flag("lamp", &strings(&["ON"])).is_err());
        assert!(parse_flag("lamp", &[]).is_err());
    }

    #[test]
    fn test_validate_snooze() {
        assert!(validate_snooze(&Snooze { time: 99, count: 9 }).is_ok());
        assert!(matches!(
            validate_snooze(&Snooze { time: 100, count: 0 }),
            Err(ClientError::Validation(_))
        ));
        assert!(matches!(
            validate_snooze(&Snooze { time: 0, count: 10 }),
            Err(ClientError::Validation(_))
        ));
    }
}
