//! Bridge configuration.
//!
//! Settings come from three layers: command line arguments win over the
//! YAML config file, which wins over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::error::BridgeError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "alarmclock";
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// An MQTT bridge for AlarmClock devices.
#[derive(Parser, Debug)]
#[command(name = "aclock-mqtt", version, about)]
pub struct Args {
    /// Configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serial port the device is attached to
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baudrate to be used with the serial port
    #[arg(short, long)]
    pub baudrate: Option<u32>,

    /// MQTT broker host
    #[arg(long)]
    pub host: Option<String>,

    /// MQTT broker port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// MQTT username (default: anonymous login)
    #[arg(short, long)]
    pub username: Option<String>,

    /// MQTT password
    #[arg(short = 'P', long)]
    pub password: Option<String>,

    /// MQTT topic prefix
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Seconds between periodic device status polls
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Log debug level messages
    #[arg(short, long)]
    pub verbose: bool,

    /// File to output the log to (default: stderr)
    #[arg(long)]
    pub logfile: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    mqtt: MqttSection,
    serial: SerialSection,
    bridge: BridgeSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MqttSection {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SerialSection {
    device: Option<String>,
    baudrate: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BridgeSection {
    poll_interval_secs: Option<u64>,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<ConfigFile, BridgeError> {
        tracing::info!(path = %path.display(), "reading config file");
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Fully resolved bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial port of the device.
    pub device: String,
    /// Serial baud rate.
    pub baudrate: u32,
    /// MQTT broker host.
    pub host: String,
    /// MQTT broker port.
    pub port: u16,
    /// MQTT username, if the broker needs one.
    pub username: Option<String>,
    /// MQTT password.
    pub password: String,
    /// Topic errors are published to.
    pub err_topic: String,
    /// Topic prefix state is published under.
    pub state_topic: String,
    /// Topic prefix commands are received under.
    pub command_topic: String,
    /// How often the device status is polled.
    pub poll_interval: Duration,
}

impl BridgeConfig {
    /// Resolve the final configuration from arguments and the optional
    /// config file.
    pub fn resolve(args: &Args) -> Result<BridgeConfig, BridgeError> {
        let file = match &args.config {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: &Args, file: ConfigFile) -> Result<BridgeConfig, BridgeError> {
        let device = args
            .device
            .clone()
            .or(file.serial.device)
            .ok_or(BridgeError::MissingDevice)?;
        let topic = args
            .topic
            .clone()
            .or(file.mqtt.topic)
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string());

        Ok(BridgeConfig {
            device,
            baudrate: args
                .baudrate
                .or(file.serial.baudrate)
                .unwrap_or(DEFAULT_BAUDRATE),
            host: args
                .host
                .clone()
                .or(file.mqtt.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: args.port.or(file.mqtt.port).unwrap_or(DEFAULT_PORT),
            username: args.username.clone().or(file.mqtt.username),
            password: args
                .password
                .clone()
                .or(file.mqtt.password)
                .unwrap_or_default(),
            err_topic: format!("{}/err", topic),
            state_topic: format!("{}/stat", topic),
            command_topic: format!("{}/cmnd", topic),
            poll_interval: Duration::from_secs(
                args.poll_interval
                    .or(file.bridge.poll_interval_secs)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["aclock-mqtt"];
        full.extend_from_slice(argv);
        Args::parse_from(full)
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::merge(
            &args(&["--device", "/dev/ttyUSB0"]),
            ConfigFile::default(),
        )
        .unwrap();

        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.baudrate, 9600);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.username, None);
        assert_eq!(config.err_topic, "alarmclock/err");
        assert_eq!(config.state_topic, "alarmclock/stat");
        assert_eq!(config.command_topic, "alarmclock/cmnd");
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_device_is_rejected() {
        let result = BridgeConfig::merge(&args(&[]), ConfigFile::default());
        assert!(matches!(result, Err(BridgeError::MissingDevice)));
    }

    #[test]
    fn test_file_supplies_values() {
        let file: ConfigFile = serde_yaml::from_str(
            "mqtt:\n  host: broker.local\n  port: 8883\n  topic: bedroom/clock\nserial:\n  device: /dev/ttyACM1\n  baudrate: 115200\nbridge:\n  poll_interval_secs: 10\n",
        )
        .unwrap();
        let config = BridgeConfig::merge(&args(&[]), file).unwrap();

        assert_eq!(config.device, "/dev/ttyACM1");
        assert_eq!(config.baudrate, 115200);
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 8883);
        assert_eq!(config.command_topic, "bedroom/clock/cmnd");
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(
            "mqtt:\n  host: broker.local\nserial:\n  device: /dev/ttyACM1\n",
        )
        .unwrap();
        let config = BridgeConfig::merge(
            &args(&["--device", "/dev/ttyUSB0", "--host", "other.local"]),
            file,
        )
        .unwrap();

        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.host, "other.local");
    }

    #[test]
    fn test_unknown_config_keys_are_rejected() {
        let result: Result<ConfigFile, _> = serde_yaml::from_str("mqtt:\n  hostname: oops\n");
        assert!(result.is_err());
    }
}
