//! Bridge error type.

use aclock_client::ClientError;
use thiserror::Error;

/// Errors that stop the bridge from starting or running.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The serial device was given neither on the command line nor in the
    /// config file.
    #[error("serial device is not specified")]
    MissingDevice,

    /// Device client failure.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// MQTT client request failure.
    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Config file or log file could not be read or created.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed.
    #[error("config file error: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    /// Signal handler installation failure.
    #[error("signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}
