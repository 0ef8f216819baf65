//! The MQTT adapter proper.
//!
//! Topic layout under the configured prefix:
//!
//! - `{prefix}/stat/...`  retained device state, plus `stat/available` for
//!   online/offline presence (also set by the broker via last will)
//! - `{prefix}/cmnd/...`  commands from other MQTT clients
//! - `{prefix}/err`       human readable command errors
//!
//! One thread pumps the MQTT connection, the device client delivers
//! notifications from its own dispatcher thread, and everything meets in a
//! single select loop so device access stays single threaded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aclock_client::{AlarmClock, ClientError};
use aclock_protocol::{Alarm, Command, Notification, Signalization, TimerDuration};
use chrono::{Local, NaiveDateTime};
use crossbeam_channel::{Receiver, Sender};
use rumqttc::{Client, Connection, Event, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde::Deserialize;

use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Command names accepted under `{prefix}/cmnd/`.
const KNOWN_COMMANDS: [&str; 10] = [
    "ambient",
    "lamp",
    "inhibit",
    "rtc",
    "timer",
    "alarm",
    "alarms",
    "alarm/write",
    "button/stop",
    "run_command",
];

const RTC_PAYLOAD_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const ALARM_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

enum MqttEvent {
    Connected,
    Message { topic: String, payload: String },
}

enum BridgeEvent {
    Mqtt(MqttEvent),
    Device(Notification),
}

/// Runs the bridge between one AlarmClock and one MQTT broker.
pub struct Bridge {
    config: BridgeConfig,
    clock: AlarmClock,
    client: Client,
    /// Cache of the last alarms read, for next-alarm-time refreshes.
    alarms: Vec<Alarm>,
    /// When the earliest cached next-alarm-time passes, refreshed topics
    /// are due.
    next_alarm_update: Option<NaiveDateTime>,
}

impl Bridge {
    /// Run the bridge until shutdown is requested. Blocking call.
    pub fn run(config: BridgeConfig, clock: AlarmClock) -> Result<(), BridgeError> {
        let client_id = format!("aclock-mqtt-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(60));
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone());
        }
        options.set_last_will(LastWill::new(
            format!("{}/available", config.state_topic),
            "offline",
            QoS::AtMostOnce,
            true,
        ));

        tracing::info!(host = %config.host, port = config.port, "connecting to MQTT broker");
        let (client, connection) = Client::new(options, 64);

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        ctrlc::set_handler(move || {
            let _ = shutdown_tx.try_send(());
        })?;

        let device_events = events_tx.clone();
        clock.subscribe_all(move |event| {
            let _ = device_events.send(BridgeEvent::Device(event.clone()));
        });

        let pump_stop = Arc::new(AtomicBool::new(false));
        let pump_stop_flag = Arc::clone(&pump_stop);
        let mqtt_thread =
            thread::spawn(move || mqtt_event_pump(connection, events_tx, pump_stop_flag));

        let mut bridge = Bridge {
            config,
            clock,
            client,
            alarms: Vec::new(),
            next_alarm_update: None,
        };
        bridge.event_loop(events_rx, shutdown_rx);

        bridge.publish_stat("available", "offline", true);
        pump_stop.store(true, Ordering::Relaxed);
        if let Err(err) = bridge.client.disconnect() {
            tracing::warn!(error = %err, "mqtt disconnect failed");
        }
        let _ = mqtt_thread.join();
        bridge.clock.close();
        tracing::info!("bridge stopped");
        Ok(())
    }

    fn event_loop(&mut self, events: Receiver<BridgeEvent>, shutdown: Receiver<()>) {
        // Fine grained tick for next-alarm-time rollovers, coarse tick for
        // the periodic status poll.
        let refresh = crossbeam_channel::tick(Duration::from_secs(1));
        let poll = crossbeam_channel::tick(self.config.poll_interval);

        loop {
            crossbeam_channel::select! {
                recv(events) -> event => match event {
                    Ok(BridgeEvent::Mqtt(MqttEvent::Connected)) => self.on_connected(),
                    Ok(BridgeEvent::Mqtt(MqttEvent::Message { topic, payload })) => {
                        self.on_message(&topic, &payload);
                    }
                    Ok(BridgeEvent::Device(notification)) => self.on_notification(&notification),
                    Err(_) => {
                        tracing::error!("event sources disconnected");
                        break;
                    }
                },
                recv(refresh) -> _ => self.refresh_next_alarm(),
                recv(poll) -> _ => self.report_status(false),
                recv(shutdown) -> _ => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }
    }

    fn on_connected(&mut self) {
        tracing::info!("MQTT connected");
        self.publish_stat("available", "online", true);
        self.publish_stat(
            "number_of_alarms",
            self.clock.number_of_alarms().to_string(),
            true,
        );

        // Subscribing here means a reconnect renews the subscription.
        let filter = format!("{}/#", self.config.command_topic);
        tracing::debug!(filter = %filter, "subscribing");
        if let Err(err) = self.client.subscribe(filter, QoS::AtMostOnce) {
            tracing::error!(error = %err, "mqtt subscribe failed");
        }

        self.report_status(true);
    }

    fn on_message(&mut self, topic: &str, payload: &str) {
        tracing::debug!(topic = %topic, payload = %payload, "mqtt message");
        let prefix = format!("{}/", self.config.command_topic);
        let Some(name) = topic.strip_prefix(prefix.as_str()) else {
            return;
        };
        if !KNOWN_COMMANDS.contains(&name) {
            self.error(&format!("Bad topic for command: {}", topic));
            return;
        }
        self.dispatch_command(name, payload);
    }

    fn on_notification(&mut self, notification: &Notification) {
        tracing::info!(category = notification.category(), "device notification");
        match notification {
            Notification::AlarmFired { index } => {
                self.publish_stat("event/alarm_fired", index.to_string(), false);
                self.report_status(false);
            }
            Notification::TimerFired => {
                self.publish_stat("event/timer_fired", "FIRED", false);
                self.report_status(false);
            }
            Notification::StateChanged => self.report_status(false),
            Notification::Unknown(frame) => {
                tracing::warn!(frame = %frame, "unrecognized notification");
            }
        }
    }

    /// Re-publish alarm topics once the earliest next-alarm-time passes,
    /// so `next_alarm_time` values never point into the past.
    fn refresh_next_alarm(&mut self) {
        let Some(due) = self.next_alarm_update else {
            return;
        };
        if Local::now().naive_local() > due {
            tracing::debug!("refreshing next alarm times");
            if let Err(detail) = self.publish_alarms() {
                self.error(&format!("Failed to refresh alarms: {}", detail));
            }
        }
    }

    /// Poll device status and publish it retained under the state topic.
    fn report_status(&mut self, onconnect: bool) {
        let status = match self.clock.status() {
            Ok(status) => status,
            Err(err) => {
                self.error(&format!("Failed to read device status: {}", err));
                return;
            }
        };

        // The current ambient value would be stale the moment it is
        // published; only the target is meaningful.
        self.publish_stat("ambient", status.ambient.target.to_string(), true);
        self.publish_stat("lamp", switch_payload(status.lamp), true);
        self.publish_stat("inhibit", switch_payload(status.inhibit), true);
        self.publish_stat(
            "display_backlight",
            status.display_backlight.as_str(),
            true,
        );
        if let Ok(json) = serde_json::to_string(&status.active_alarm_ids) {
            self.publish_stat("active_alarm_ids", json, true);
        }
        if let Ok(json) = serde_json::to_string(&status.alarm_with_active_ambient_ids) {
            self.publish_stat("alarm_with_active_ambient_ids", json, true);
        }

        if status.alarms_changed || onconnect {
            if let Err(detail) = self.cmd_alarms() {
                self.error(&format!("Failed to refresh alarms: {}", detail));
            }
        }
    }

    fn dispatch_command(&mut self, name: &str, payload: &str) {
        let result = match name {
            "ambient" => self.cmd_ambient(payload),
            "lamp" => self.cmd_lamp(payload),
            "inhibit" => self.cmd_inhibit(payload),
            "rtc" => self.cmd_rtc(payload),
            "timer" => self.cmd_timer(payload),
            "alarm" => self.cmd_alarm(payload),
            "alarms" => self.cmd_alarms(),
            "alarm/write" => self.cmd_write_alarm(payload),
            "button/stop" => self.cmd_button_stop(payload),
            "run_command" => self.cmd_run_command(payload),
            _ => return,
        };
        if let Err(detail) = result {
            let details = if detail.is_empty() {
                String::new()
            } else {
                format!("\n{}", detail)
            };
            self.error(&format!(
                "Bad payload for {}/{}: {}{}",
                self.config.command_topic, name, payload, details
            ));
        }
    }

    // ========== Command Handlers ==========

    fn cmd_ambient(&mut self, payload: &str) -> Result<(), String> {
        if let Some(target) = dimmable_request(payload)? {
            self.clock.set_ambient(target).map_err(detail)?;
        }
        self.report_status(false);
        Ok(())
    }

    fn cmd_lamp(&mut self, payload: &str) -> Result<(), String> {
        if let Some(on) = switch_request(payload)? {
            self.clock.set_lamp(on).map_err(detail)?;
        }
        self.report_status(false);
        Ok(())
    }

    fn cmd_inhibit(&mut self, payload: &str) -> Result<(), String> {
        if let Some(on) = switch_request(payload)? {
            self.clock.set_inhibit(on).map_err(detail)?;
        }
        self.report_status(false);
        Ok(())
    }

    fn cmd_rtc(&mut self, payload: &str) -> Result<(), String> {
        let trimmed = payload.trim();
        if trimmed.is_empty() || trimmed == "?" {
            let time = self.clock.rtc().map_err(detail)?;
            self.publish_stat("rtc", time.format(RTC_PAYLOAD_FORMAT).to_string(), false);
            return Ok(());
        }
        let time = parse_rtc_payload(trimmed)
            .ok_or_else(|| format!("not a valid timestamp: {}", trimmed))?;
        self.clock.set_rtc(time).map_err(detail)
    }

    fn cmd_timer(&mut self, payload: &str) -> Result<(), String> {
        let trimmed = payload.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "START" => self.clock.start_timer().map_err(detail)?,
            "STOP" => self.clock.stop_timer().map_err(detail)?,
            "" | "?" => {}
            _ => {
                let request: TimerRequest =
                    serde_json::from_str(trimmed).map_err(|err| err.to_string())?;
                if let Some(events) = request.events {
                    self.clock.set_timer_events(events).map_err(detail)?;
                }
                if let Some(time) = request.time {
                    self.clock.set_timer(time).map_err(detail)?;
                }
                if let Some(running) = request.running {
                    if running {
                        self.clock.start_timer().map_err(detail)?;
                    } else {
                        self.clock.stop_timer().map_err(detail)?;
                    }
                }
            }
        }

        let state = self.clock.timer().map_err(detail)?;
        let json = serde_json::to_string(&state).map_err(|err| err.to_string())?;
        self.publish_stat("timer", json, false);
        Ok(())
    }

    fn cmd_alarm(&mut self, payload: &str) -> Result<(), String> {
        let index: u8 = payload
            .trim()
            .parse()
            .map_err(|_| format!("not an alarm index: {}", payload.trim()))?;
        let alarm = self.clock.read_alarm(index).map_err(detail)?;
        let json = alarm_json(&alarm, Local::now().naive_local())?;
        self.publish_stat(&format!("alarms/alarm{}", index), json, false);
        Ok(())
    }

    /// Read all alarms from the device and publish them retained.
    fn cmd_alarms(&mut self) -> Result<(), String> {
        self.alarms = self.clock.read_alarms().map_err(detail)?;
        self.publish_alarms()
    }

    fn cmd_write_alarm(&mut self, payload: &str) -> Result<(), String> {
        let request: WriteAlarmRequest =
            serde_json::from_str(payload).map_err(|err| err.to_string())?;
        self.clock
            .write_alarm(request.index, &request.alarm)
            .map_err(detail)?;
        self.clock.save_settings().map_err(detail)?;
        // Keep the retained alarm topics in sync with what was written.
        self.cmd_alarms()
    }

    fn cmd_button_stop(&mut self, payload: &str) -> Result<(), String> {
        if payload.trim().eq_ignore_ascii_case("STOP") {
            self.clock.press_stop().map_err(detail)
        } else {
            Err(format!("invalid payload for stop: {}", payload))
        }
    }

    fn cmd_run_command(&mut self, payload: &str) -> Result<(), String> {
        let mut tokens = payload.split_whitespace().map(|token| token.to_string());
        let verb = tokens.next().ok_or_else(|| "empty command".to_string())?;
        let command = Command::raw(verb, tokens).map_err(|err| err.to_string())?;
        let args = self.clock.run_command(&command).map_err(detail)?;
        let json = serde_json::to_string(&args).map_err(|err| err.to_string())?;
        self.publish_stat("run_command", json, false);
        Ok(())
    }

    // ========== Publishing ==========

    /// Publish cached alarms under `alarms/alarm{i}` retained and remember
    /// when the earliest of their next-alarm-times passes.
    fn publish_alarms(&mut self) -> Result<(), String> {
        let now = Local::now().naive_local();
        let mut next_times = Vec::new();
        for (index, alarm) in self.alarms.iter().enumerate() {
            let json = alarm_json(alarm, now)?;
            self.publish_stat(&format!("alarms/alarm{}", index), json, true);
            if let Some(time) = alarm.next_occurrence(now) {
                next_times.push(time);
            }
        }
        self.next_alarm_update = next_times.into_iter().min();
        Ok(())
    }

    fn publish_stat<V: Into<Vec<u8>>>(&self, subtopic: &str, payload: V, retain: bool) {
        let topic = format!("{}/{}", self.config.state_topic, subtopic);
        if let Err(err) = self
            .client
            .publish(topic.clone(), QoS::AtMostOnce, retain, payload)
        {
            tracing::error!(topic = %topic, error = %err, "mqtt publish failed");
        }
    }

    /// Log an error and publish it to the error topic.
    fn error(&self, text: &str) {
        tracing::error!("{}", text);
        if let Err(err) =
            self.client
                .publish(self.config.err_topic.clone(), QoS::AtMostOnce, false, text)
        {
            tracing::error!(error = %err, "mqtt error publish failed");
        }
    }
}

/// Pump the MQTT connection, forwarding what the event loop needs.
///
/// Connection errors are retried with a fixed backoff until the stop flag
/// is set; a clean disconnect ends the pump.
fn mqtt_event_pump(mut connection: Connection, events: Sender<BridgeEvent>, stop: Arc<AtomicBool>) {
    for notification in connection.iter() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if events.send(BridgeEvent::Mqtt(MqttEvent::Connected)).is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).to_string();
                let message = MqttEvent::Message {
                    topic: publish.topic,
                    payload,
                };
                if events.send(BridgeEvent::Mqtt(message)).is_err() {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = %err, "MQTT connection error, retrying");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
    tracing::debug!("mqtt event pump finished");
}

// ========== Payload Parsing ==========

/// Partial countdown timer update.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimerRequest {
    #[serde(default)]
    events: Option<Signalization>,
    #[serde(default)]
    time: Option<TimerDuration>,
    #[serde(default)]
    running: Option<bool>,
}

/// Payload of `alarm/write`: the alarm fields plus the target index.
#[derive(Debug, Deserialize)]
struct WriteAlarmRequest {
    index: u8,
    #[serde(flatten)]
    alarm: Alarm,
}

fn detail(err: ClientError) -> String {
    err.to_string()
}

fn switch_payload(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// `ON`/`OFF` to a state, `?` or empty to a pure query.
fn switch_request(payload: &str) -> Result<Option<bool>, String> {
    match payload.trim().to_ascii_uppercase().as_str() {
        "ON" => Ok(Some(true)),
        "OFF" => Ok(Some(false)),
        "" | "?" => Ok(None),
        _ => Err(String::new()),
    }
}

/// Like [`switch_request`], but numeric payloads give a brightness.
fn dimmable_request(payload: &str) -> Result<Option<u8>, String> {
    match switch_request(payload) {
        Ok(Some(true)) => Ok(Some(255)),
        Ok(Some(false)) => Ok(Some(0)),
        Ok(None) => Ok(None),
        Err(_) => payload
            .trim()
            .parse::<u8>()
            .map(Some)
            .map_err(|err| err.to_string()),
    }
}

fn parse_rtc_payload(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, RTC_PAYLOAD_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, ALARM_TIME_FORMAT))
        .ok()
}

/// Serialize an alarm with its computed `next_alarm_time`.
fn alarm_json(alarm: &Alarm, now: NaiveDateTime) -> Result<String, String> {
    let mut value = serde_json::to_value(alarm).map_err(|err| err.to_string())?;
    let next = alarm
        .next_occurrence(now)
        .map(|time| time.format(ALARM_TIME_FORMAT).to_string());
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "next_alarm_time".to_string(),
            serde_json::to_value(next).map_err(|err| err.to_string())?,
        );
    }
    serde_json::to_string(&value).map_err(|err| err.to_string())
}
