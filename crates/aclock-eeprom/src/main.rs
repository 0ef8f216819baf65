//! EEPROM tool for an AlarmClock device.
//!
//! Reads a region of the device's EEPROM into a binary file, writes a file
//! back, or prints a hex dump, going through the serial memory commands in
//! chunks the firmware accepts.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use aclock_client::{AlarmClock, ClientConfig, ClientError};
use aclock_protocol::EEPROM_SIZE;
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Largest span a single memory command may carry.
const CHUNK_SIZE: usize = 32;
/// Bytes per hex dump row.
const DUMP_WIDTH: usize = 16;

#[derive(Debug, Error)]
enum ToolError {
    #[error("region {start:#06x}..{end:#06x} does not fit the EEPROM ({eeprom} bytes)")]
    OutOfRange {
        start: usize,
        end: usize,
        eeprom: usize,
    },
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "aclock-eeprom", version, about)]
struct Cli {
    /// Serial port the device is attached to
    device: String,

    /// Baudrate to be used with the serial port
    #[arg(short, long, default_value_t = 9600)]
    baudrate: u32,

    /// Log debug level messages
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    operation: Operation,
}

#[derive(Subcommand, Debug)]
enum Operation {
    /// Read data from EEPROM to a binary file
    Read {
        /// Start address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Size of the region
        #[arg(value_parser = parse_size)]
        size: usize,
        /// Name of the binary file
        file: PathBuf,
    },
    /// Write data from a binary file to EEPROM
    Write {
        /// Start address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Name of the binary file
        file: PathBuf,
    },
    /// Print a hex dump of an EEPROM region
    Dump {
        /// Start address, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_address)]
        address: u16,
        /// Size of the region
        #[arg(value_parser = parse_size)]
        size: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "operation failed");
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ToolError> {
    init_logging(cli.verbose);

    let config = ClientConfig::default().with_baud_rate(cli.baudrate);
    tracing::info!(device = %cli.device, baudrate = cli.baudrate, "opening device");
    let clock = AlarmClock::connect(&cli.device, config)?;

    let result = match &cli.operation {
        Operation::Read {
            address,
            size,
            file,
        } => read_to_file(&clock, *address, *size, file),
        Operation::Write { address, file } => write_from_file(&clock, *address, file),
        Operation::Dump { address, size } => dump(&clock, *address, *size),
    };
    clock.close();
    result
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// ========== Operations ==========

fn read_to_file(
    clock: &AlarmClock,
    address: u16,
    size: usize,
    file: &Path,
) -> Result<(), ToolError> {
    let data = read_region(clock, address, size)?;
    fs::write(file, &data)?;
    tracing::info!(bytes = data.len(), file = %file.display(), "read finished");
    Ok(())
}

fn write_from_file(clock: &AlarmClock, address: u16, file: &Path) -> Result<(), ToolError> {
    let data = fs::read(file)?;
    check_span(address, data.len())?;
    for (chunk_address, span) in chunk_spans(address, data.len()) {
        let offset = (chunk_address - address) as usize;
        retry_once("memory write", || {
            clock.write_memory(chunk_address, &data[offset..offset + span])
        })?;
        tracing::info!(
            address = chunk_address,
            written = offset + span,
            total = data.len(),
            "write progress"
        );
    }
    tracing::info!(bytes = data.len(), "write finished");
    Ok(())
}

fn dump(clock: &AlarmClock, address: u16, size: usize) -> Result<(), ToolError> {
    let data = read_region(clock, address, size)?;
    print!("{}", hex_dump(address, &data));
    Ok(())
}

fn read_region(clock: &AlarmClock, address: u16, size: usize) -> Result<Vec<u8>, ToolError> {
    check_span(address, size)?;
    let mut data = Vec::with_capacity(size);
    for (chunk_address, span) in chunk_spans(address, size) {
        let chunk = retry_once("memory read", || clock.read_memory(chunk_address, span))?;
        data.extend_from_slice(&chunk);
        tracing::info!(
            address = chunk_address,
            read = data.len(),
            total = size,
            "read progress"
        );
    }
    Ok(data)
}

/// Retry a chunk once when the device times out or reports an error.
/// Anything else, validation and transport failures included, aborts.
fn retry_once<T>(
    what: &str,
    mut op: impl FnMut() -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    match op() {
        Err(err) if matches!(err, ClientError::Timeout { .. } | ClientError::Device { .. }) => {
            tracing::warn!(error = %err, "{} failed, retrying", what);
            op()
        }
        other => other,
    }
}

// ========== Region Math ==========

fn check_span(address: u16, size: usize) -> Result<(), ToolError> {
    let end = address as usize + size;
    if end > EEPROM_SIZE {
        return Err(ToolError::OutOfRange {
            start: address as usize,
            end,
            eeprom: EEPROM_SIZE,
        });
    }
    Ok(())
}

/// Split a region into per-request spans of at most [`CHUNK_SIZE`] bytes.
/// The region must already fit the EEPROM, see [`check_span`].
fn chunk_spans(address: u16, size: usize) -> Vec<(u16, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    while offset < size {
        let span = CHUNK_SIZE.min(size - offset);
        spans.push((address + offset as u16, span));
        offset += span;
    }
    spans
}

// ========== Formatting ==========

/// Rows of [`DUMP_WIDTH`] bytes: offset, hex digits, ASCII gutter.
fn hex_dump(address: u16, data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(DUMP_WIDTH).enumerate() {
        let offset = address as usize + row * DUMP_WIDTH;
        let ascii: String = chunk
            .iter()
            .map(|&byte| {
                if (0x20..0x7f).contains(&byte) {
                    byte as char
                } else {
                    '.'
                }
            })
            .collect();
        let _ = writeln!(
            out,
            "{:04x}  {:<width$}  |{}|",
            offset,
            hex::encode(chunk),
            ascii,
            width = DUMP_WIDTH * 2
        );
    }
    out
}

/// Parse a decimal or `0x`-prefixed hex integer.
fn parse_auto_int(text: &str) -> Result<u64, String> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|_| format!("not a number: {}", text))
}

fn parse_address(text: &str) -> Result<u16, String> {
    let value = parse_auto_int(text)?;
    u16::try_from(value).map_err(|_| format!("address out of range: {}", text))
}

fn parse_size(text: &str) -> Result<usize, String> {
    let value = parse_auto_int(text)?;
    usize::try_from(value).map_err(|_| format!("size out of range: {}", text))
}
