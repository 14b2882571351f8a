//! Error types for SetuIO
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Fatal Errors (Daemon Exit)
//!
//! - **`LinkClosed`**: EOF or a non-retryable error on the serial port.
//!   Without the FPGA there is nothing to multiplex; the reactor loop
//!   returns this error and the daemon exits with a log message.
//!
//! ## Transient Errors (Retry Recommended)
//!
//! - **`LinkBusy`**: The serial transmit would block or was partial.
//!   The caller keeps its state, surfaces `ERROR 100` to the issuing
//!   client, and may arm a timer to retry. No bytes are buffered.
//!
//! - **`Serial`** / **`Io`**: Port or socket I/O error. Socket errors
//!   tear down the affected client session only.
//!
//! ## Protocol Errors (Log and Continue)
//!
//! - Bad stuff sequences, CRC mismatches, runt frames, and unknown
//!   target cores are logged at the daemon level and the frame is
//!   discarded. They never produce a crate `Error`; nothing user-visible
//!   happens.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: Configuration file is missing or invalid.
//! - **`UnknownDriver`**: A driver name that is not in the registry.
//!
//! ## Capacity Errors
//!
//! - **`PoolExhausted`**: A fixed-size table (timers, sessions, file
//!   handles, slots) is full. The attempted allocation fails and is
//!   surfaced to the caller; tables are never grown or corrupted.

use thiserror::Error;

/// Errors that can occur in SetuIO
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FPGA link busy")]
    LinkBusy,

    #[error("FPGA link closed")]
    LinkClosed,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    #[error("Driver init failed: {0}")]
    DriverInit(String),

    #[error("{0} pool exhausted")]
    PoolExhausted(&'static str),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
