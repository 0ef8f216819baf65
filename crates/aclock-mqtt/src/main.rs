//! MQTT bridge for an AlarmClock device.
//!
//! Connects to the device over a serial port and mirrors its state to an
//! MQTT broker, accepting commands back over MQTT. The topic layout is
//! described in the [`bridge`] module.

mod bridge;
mod config;
mod error;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use aclock_client::{AlarmClock, ClientConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::bridge::Bridge;
use crate::config::{Args, BridgeConfig};
use crate::error::BridgeError;

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        tracing::error!(error = %err, "bridge failed");
        eprintln!("error: {}", err);
        let code = match err {
            BridgeError::MissingDevice => 255,
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn run(args: Args) -> Result<(), BridgeError> {
    init_logging(args.verbose, args.logfile.as_deref())?;

    let config = BridgeConfig::resolve(&args)?;
    tracing::info!(topic = %config.err_topic, "error topic");
    tracing::info!(topic = %config.state_topic, "state topic");
    tracing::info!(topic = %config.command_topic, "command topic");

    let client_config = ClientConfig::default().with_baud_rate(config.baudrate);
    tracing::info!(device = %config.device, baudrate = config.baudrate, "opening device");
    let clock = AlarmClock::connect(&config.device, client_config)?;

    Bridge::run(config, clock)
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug over info.
fn init_logging(verbose: bool, logfile: Option<&Path>) -> Result<(), BridgeError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    match logfile {
        Some(path) => {
            let file = File::create(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
