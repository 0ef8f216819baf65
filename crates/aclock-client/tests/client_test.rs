//! Integration tests for the AlarmClock client.
//!
//! These tests drive a full client (reader thread, command channel, event
//! dispatcher) over a scripted in-memory transport, so every wire
//! interaction can be asserted byte for byte without a device attached.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aclock_client::{AlarmClock, ClientConfig, ClientError, CommandOptions, Transport};
use aclock_protocol::{
    Alarm, AlarmEnabled, BacklightLevel, Command, DaysOfWeek, DeviceErrorCode, Notification,
    Signalization, Snooze, TimeOfDay, TimerDuration,
};
use chrono::NaiveDate;
use crossbeam_channel::unbounded;
use parking_lot::{Condvar, Mutex};

// ============================================================================
// Scripted transport
// ============================================================================

struct ScriptedState {
    /// Reply lines queued per request verb, injected on write.
    replies: HashMap<String, VecDeque<String>>,
    /// Every line written by the client, in order.
    written: Vec<String>,
    /// Bytes waiting to be read.
    inbound: VecDeque<u8>,
    closed: bool,
    fail_writes: bool,
}

struct ScriptedInner {
    state: Mutex<ScriptedState>,
    data_ready: Condvar,
}

/// In-memory transport that answers requests from a script.
#[derive(Clone)]
struct ScriptedTransport {
    inner: Arc<ScriptedInner>,
}

impl ScriptedTransport {
    fn new() -> Self {
        ScriptedTransport {
            inner: Arc::new(ScriptedInner {
                state: Mutex::new(ScriptedState {
                    replies: HashMap::new(),
                    written: Vec::new(),
                    inbound: VecDeque::new(),
                    closed: false,
                    fail_writes: false,
                }),
                data_ready: Condvar::new(),
            }),
        }
    }

    /// Queue a reply line sent back when the given verb is next written.
    fn script(&self, verb: &str, reply: &str) {
        let mut state = self.inner.state.lock();
        state
            .replies
            .entry(verb.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Push raw bytes into the read stream, as if the device sent them.
    fn inject(&self, bytes: &[u8]) {
        let mut state = self.inner.state.lock();
        state.inbound.extend(bytes);
        self.inner.data_ready.notify_all();
    }

    fn inject_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.inject(&bytes);
    }

    /// Make further reads return end-of-stream.
    fn close_stream(&self) {
        self.inner.state.lock().closed = true;
        self.inner.data_ready.notify_all();
    }

    /// Make further writes fail.
    fn fail_writes(&self) {
        self.inner.state.lock().fail_writes = true;
    }

    fn written(&self) -> Vec<String> {
        self.inner.state.lock().written.clone()
    }

    fn writes_of(&self, verb: &str) -> usize {
        self.inner
            .state
            .lock()
            .written
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(verb))
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.inner.state.lock();
        if state.inbound.is_empty() && !state.closed {
            let _ = self
                .inner
                .data_ready
                .wait_for(&mut state, Duration::from_millis(10));
        }
        if !state.inbound.is_empty() {
            let n = buf.len().min(state.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = state.inbound.pop_front().unwrap();
            }
            return Ok(n);
        }
        if state.closed {
            return Ok(0);
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.inner.state.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port gone"));
        }
        let line = String::from_utf8_lossy(data).trim_end().to_string();
        let verb = line.split_whitespace().next().unwrap_or("").to_string();
        state.written.push(line);
        if let Some(reply) = state
            .replies
            .get_mut(&verb)
            .and_then(|queue| queue.pop_front())
        {
            state.inbound.extend(reply.as_bytes());
            state.inbound.push_back(b'\n');
            self.inner.data_ready.notify_all();
        }
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

/// Config with timeouts short enough for tests.
fn fast_config() -> ClientConfig {
    ClientConfig::default().with_timeout(Duration::from_millis(200))
}

/// Connect a client over the scripted transport, answering the handshake.
fn connect(transport: &ScriptedTransport, config: ClientConfig) -> AlarmClock {
    transport.script("VERSION", "OK 6 v0.5.1 2024-01-06");
    AlarmClock::attach(Box::new(transport.clone()), config).expect("connect should succeed")
}

fn example_alarm() -> Alarm {
    Alarm {
        enabled: AlarmEnabled::Rpt,
        days_of_week: DaysOfWeek::from_code(0x2C),
        time: TimeOfDay {
            hours: 13,
            minutes: 1,
        },
        snooze: Snooze { time: 5, count: 3 },
        signalization: Signalization {
            ambient: 240,
            lamp: true,
            buzzer: false,
        },
    }
}

// ============================================================================
// Connection and handshake
// ============================================================================

#[test]
fn test_connect_performs_version_handshake() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    assert_eq!(clock.device_info().version, "v0.5.1");
    assert_eq!(clock.device_info().build, "2024-01-06");
    assert_eq!(clock.number_of_alarms(), 6);
    assert_eq!(transport.written(), vec!["VERSION".to_string()]);
}

#[test]
fn test_connect_fails_on_silent_device() {
    let transport = ScriptedTransport::new();
    let config = ClientConfig::default()
        .with_timeout(Duration::from_millis(30))
        .with_max_retries(0);

    let result = AlarmClock::attach(Box::new(transport.clone()), config);
    assert!(matches!(result, Err(ClientError::Timeout { attempts: 1 })));
}

// ============================================================================
// Command execution
// ============================================================================

#[test]
fn test_matched_command_returns_raw_frame() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("STATUS", "OK 1 2 3");
    let frame = clock
        .run_command_matched(
            &Command::Status,
            Arc::new(|frame| frame.verb() == "OK"),
            &CommandOptions::default(),
        )
        .expect("matched command should succeed");

    assert_eq!(frame.verb(), "OK");
    assert_eq!(frame.args(), vec!["1", "2", "3"]);
}

#[test]
fn test_typed_status() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("STATUS", "OK 120 240 1 0 DIM 5 0 0");
    let status = clock.status().expect("status should succeed");

    assert_eq!(status.ambient.current, 120);
    assert_eq!(status.ambient.target, 240);
    assert!(status.lamp);
    assert!(!status.inhibit);
    assert_eq!(status.display_backlight, BacklightLevel::Dim);
    assert_eq!(status.active_alarm_ids, vec![0, 2]);
    assert!(status.alarm_with_active_ambient_ids.is_empty());
    assert!(!status.alarms_changed);
}

#[test]
fn test_timeout_writes_request_once_per_attempt() {
    let transport = ScriptedTransport::new();
    let clock = connect(
        &transport,
        ClientConfig::default()
            .with_timeout(Duration::from_millis(30))
            .with_max_retries(2),
    );

    // No STATUS reply scripted, so every attempt times out.
    let result = clock.status();
    assert!(matches!(result, Err(ClientError::Timeout { attempts: 3 })));
    assert_eq!(transport.writes_of("STATUS"), 3);
}

#[test]
fn test_device_error_is_not_retried() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("SAVE", "ERR 4 nothing to save");
    let result = clock.save_settings();

    match result {
        Err(ClientError::Device { code, message }) => {
            assert_eq!(code, DeviceErrorCode::UselessSave);
            assert_eq!(message.as_deref(), Some("nothing to save"));
        }
        other => panic!("expected device error, got {:?}", other),
    }
    assert_eq!(transport.writes_of("SAVE"), 1);
}

#[test]
fn test_deadline_stops_retrying() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    let options = CommandOptions::default()
        .with_timeout(Duration::from_millis(20))
        .with_deadline(Instant::now() + Duration::from_millis(30));
    let result = clock.run_command_with(&Command::Status, &options);

    assert!(matches!(result, Err(ClientError::Cancelled)));
    // The deadline passed during the second attempt window at the latest,
    // so no further writes happened after it.
    assert!(transport.writes_of("STATUS") <= 2);
}

#[test]
fn test_late_reply_is_dropped() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    // First command times out, then its reply shows up anyway.
    let options = CommandOptions::default()
        .with_timeout(Duration::from_millis(30))
        .with_max_retries(0);
    let result = clock.run_command_with(&Command::Status, &options);
    assert!(matches!(result, Err(ClientError::Timeout { attempts: 1 })));

    transport.inject_line("OK 9 9 1 1 OFF 0 0 0");
    // Give the reader time to route and drop the stale frame.
    thread::sleep(Duration::from_millis(100));

    transport.script("LAMP", "OK 1");
    assert!(clock.lamp().expect("lamp should succeed"));
}

// ============================================================================
// Notifications
// ============================================================================

#[test]
fn test_unsolicited_notification_reaches_subscriber() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    let (tx, rx) = unbounded();
    clock.subscribe("ALARM_FIRED", move |event| {
        tx.send(event.clone()).unwrap();
    });

    transport.inject_line("ALARM_FIRED 2");

    let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(event, Notification::AlarmFired { index: 2 });
    // No command was written for it.
    assert_eq!(transport.written(), vec!["VERSION".to_string()]);
}

#[test]
fn test_notification_between_request_and_reply() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    let (tx, rx) = unbounded();
    clock.subscribe("ALARM_FIRED", move |event| {
        tx.send(event.clone()).unwrap();
    });

    // The device announces an alarm before answering the status request.
    let injector = transport.clone();
    let pusher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        injector.inject(b"ALARM_FIRED 1\nOK 0 0 0 0 OFF 2 0 0\n");
    });

    let status = clock.status().expect("status should succeed");
    assert_eq!(status.active_alarm_ids, vec![1]);

    let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(event, Notification::AlarmFired { index: 1 });
    pusher.join().unwrap();
}

#[test]
fn test_category_filter_and_order() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    let (tx, rx) = unbounded();
    clock.subscribe("TIMER_FIRED", move |event| {
        tx.send(event.clone()).unwrap();
    });

    // Delivery preserves arrival order, so receiving TIMER_FIRED first
    // proves ALARM_FIRED was filtered out.
    transport.inject_line("ALARM_FIRED 0");
    transport.inject_line("TIMER_FIRED");

    let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(event, Notification::TimerFired);
}

#[test]
fn test_unknown_notification_is_delivered_as_unknown() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    let (tx, rx) = unbounded();
    clock.subscribe_all(move |event| {
        tx.send(event.clone()).unwrap();
    });

    transport.inject_line("MELODY_DONE 1");

    let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(event.category(), "MELODY_DONE");
    assert!(matches!(event, Notification::Unknown(_)));
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    let (dropped_tx, dropped_rx) = unbounded();
    let id = clock.subscribe_all(move |event| {
        dropped_tx.send(event.clone()).unwrap();
    });
    assert!(clock.unsubscribe(id));
    assert!(!clock.unsubscribe(id));

    let (kept_tx, kept_rx) = unbounded();
    clock.subscribe_all(move |event| {
        kept_tx.send(event.clone()).unwrap();
    });

    transport.inject_line("TIMER_FIRED");

    assert_eq!(
        kept_rx.recv_timeout(Duration::from_secs(1)).unwrap(),
        Notification::TimerFired
    );
    assert!(dropped_rx.try_recv().is_err());
}

#[test]
fn test_chunked_notification_reassembly() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    let (tx, rx) = unbounded();
    clock.subscribe_all(move |event| {
        tx.send(event.clone()).unwrap();
    });

    // Bytes dribble in across three reads.
    transport.inject(b"ALARM");
    thread::sleep(Duration::from_millis(30));
    transport.inject(b"_FIRED ");
    thread::sleep(Duration::from_millis(30));
    transport.inject(b"3\n");

    let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(event, Notification::AlarmFired { index: 3 });
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_memory_validation_blocks_transport() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config().with_eeprom_size(256));

    assert!(matches!(
        clock.read_memory(9999, 1),
        Err(ClientError::Validation(_))
    ));
    assert!(matches!(
        clock.read_memory(250, 10),
        Err(ClientError::Validation(_))
    ));
    assert!(matches!(
        clock.read_memory(0, 64),
        Err(ClientError::Validation(_))
    ));
    assert!(matches!(
        clock.write_memory(0, &[]),
        Err(ClientError::Validation(_))
    ));

    assert_eq!(transport.writes_of("READ_MEM"), 0);
    assert_eq!(transport.writes_of("WRITE_MEM"), 0);
}

#[test]
fn test_alarm_validation_blocks_transport() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    // Handshake reported 6 alarms.
    assert!(matches!(
        clock.read_alarm(6),
        Err(ClientError::Validation(_))
    ));

    let mut alarm = example_alarm();
    alarm.snooze.time = 100;
    assert!(matches!(
        clock.write_alarm(0, &alarm),
        Err(ClientError::Validation(_))
    ));

    assert_eq!(transport.writes_of("READ_ALARM"), 0);
    assert_eq!(transport.writes_of("WRITE_ALARM"), 0);
}

// ============================================================================
// Typed operations on the wire
// ============================================================================

#[test]
fn test_alarm_read_write_round_trip() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("READ_ALARM", "OK RPT 44 13:01 5 3 240 1 0");
    let alarm = clock.read_alarm(1).expect("read_alarm should succeed");
    assert_eq!(alarm.enabled, AlarmEnabled::Rpt);
    assert_eq!(alarm.time.hours, 13);
    assert_eq!(alarm.snooze.count, 3);

    transport.script("WRITE_ALARM", "OK");
    transport.script("SAVE", "OK");
    clock
        .write_alarm(1, &example_alarm())
        .expect("write_alarm should succeed");
    clock.save_settings().expect("save should succeed");

    let written = transport.written();
    assert!(written.contains(&"READ_ALARM 1".to_string()));
    assert!(written.contains(&"WRITE_ALARM 1 RPT 44 13:01 5 3 240 1 0".to_string()));
    assert!(written.contains(&"SAVE".to_string()));
}

#[test]
fn test_rtc_round_trip() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("RTC", "OK 2024-01-06 13:01:00");
    let time = clock.rtc().expect("rtc should succeed");
    assert_eq!(
        time,
        NaiveDate::from_ymd_opt(2024, 1, 6)
            .unwrap()
            .and_hms_opt(13, 1, 0)
            .unwrap()
    );

    transport.script("SET_RTC", "OK");
    clock.set_rtc(time).expect("set_rtc should succeed");
    assert!(transport
        .written()
        .contains(&"SET_RTC 2024-01-06 13:01:00".to_string()));
}

#[test]
fn test_memory_round_trip() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("READ_MEM", "OK 170 187");
    let bytes = clock.read_memory(16, 2).expect("read should succeed");
    assert_eq!(bytes, vec![0xAA, 0xBB]);

    transport.script("WRITE_MEM", "OK");
    clock
        .write_memory(16, &[0xAA, 0xBB])
        .expect("write should succeed");

    let written = transport.written();
    assert!(written.contains(&"READ_MEM 16 2".to_string()));
    assert!(written.contains(&"WRITE_MEM 16 170 187".to_string()));
}

#[test]
fn test_short_memory_reply_is_a_protocol_error() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("READ_MEM", "OK 170");
    assert!(matches!(
        clock.read_memory(16, 2),
        Err(ClientError::Protocol(_))
    ));
}

#[test]
fn test_timer_operations() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("TIMER", "OK 0:05:00 1 120 0 1");
    let state = clock.timer().expect("timer should succeed");
    assert_eq!(state.time, TimerDuration::from_hms(0, 5, 0));
    assert!(state.running);
    assert_eq!(state.events.ambient, 120);
    assert!(!state.events.lamp);
    assert!(state.events.buzzer);

    transport.script("SET_TIMER", "OK");
    transport.script("START_TIMER", "OK");
    transport.script("STOP_TIMER", "OK");
    clock
        .set_timer(TimerDuration::from_hms(0, 5, 0))
        .expect("set_timer should succeed");
    clock.start_timer().expect("start should succeed");
    clock.stop_timer().expect("stop should succeed");

    let written = transport.written();
    assert!(written.contains(&"SET_TIMER 0:05:00".to_string()));
    assert!(written.contains(&"START_TIMER".to_string()));
    assert!(written.contains(&"STOP_TIMER".to_string()));
}

#[test]
fn test_lamp_ambient_inhibit() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.script("LAMP", "OK 1");
    transport.script("AMBIENT", "OK 10 240");
    transport.script("INHIBIT", "OK 0");

    assert!(clock.lamp().unwrap());
    let ambient = clock.ambient().unwrap();
    assert_eq!(ambient.current, 10);
    assert_eq!(ambient.target, 240);
    assert!(!clock.inhibit().unwrap());

    transport.script("SET_LAMP", "OK");
    transport.script("SET_AMBIENT", "OK");
    transport.script("SET_INHIBIT", "OK");
    clock.set_lamp(false).unwrap();
    clock.set_ambient(255).unwrap();
    clock.set_inhibit(true).unwrap();

    let written = transport.written();
    assert!(written.contains(&"SET_LAMP 0".to_string()));
    assert!(written.contains(&"SET_AMBIENT 255".to_string()));
    assert!(written.contains(&"SET_INHIBIT 1".to_string()));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_close_cancels_blocked_command() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(connect(
        &transport,
        ClientConfig::default().with_timeout(Duration::from_secs(5)),
    ));

    // No STATUS reply scripted; the call blocks until close.
    let worker = Arc::clone(&clock);
    let blocked = thread::spawn(move || worker.status());

    thread::sleep(Duration::from_millis(50));
    clock.close();

    let result = blocked.join().unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));

    // After close every command fails fast.
    assert!(matches!(clock.status(), Err(ClientError::Closed)));
}

#[test]
fn test_close_is_idempotent() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    clock.close();
    clock.close();
    assert!(matches!(clock.status(), Err(ClientError::Closed)));
}

#[test]
fn test_write_failure_fails_fast() {
    let transport = ScriptedTransport::new();
    let clock = connect(&transport, fast_config());

    transport.fail_writes();
    assert!(matches!(clock.status(), Err(ClientError::Transport(_))));
    // The failure sticks without another write.
    assert!(matches!(clock.lamp(), Err(ClientError::Transport(_))));
    assert_eq!(transport.writes_of("LAMP"), 0);
}

#[test]
fn test_transport_failure_poisons_client() {
    let transport = ScriptedTransport::new();
    let clock = Arc::new(connect(
        &transport,
        ClientConfig::default().with_timeout(Duration::from_secs(5)),
    ));

    let worker = Arc::clone(&clock);
    let blocked = thread::spawn(move || worker.status());

    thread::sleep(Duration::from_millis(50));
    transport.close_stream();

    let result = blocked.join().unwrap();
    assert!(matches!(result, Err(ClientError::Transport(_))));

    // The failure sticks.
    assert!(matches!(clock.status(), Err(ClientError::Transport(_))));
}
