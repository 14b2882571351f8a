//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! The configuration file is TOML-formatted with the following structure:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [network]
//! bind_address = "127.0.0.1:8870"
//!
//! [control]
//! prefix = "pc"
//!
//! [slots]
//! # Load drivers into fixed slots before the enumerator runs.
//! # Format: "<slot>:<driver name>"
//! load = ["9:out4"]
//! ```
//!
//! See `setuio.toml` for a complete example.
//!
//! All sections except `[serial]` have working defaults: the daemon
//! listens on loopback, uses the `pc` verb prefix, and loads no extra
//! slots.

use crate::core::slot::MAX_SLOTS;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Serial link configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Serial port device path (e.g., "/dev/ttyUSB0")
    pub port: String,

    /// Baud rate for the FPGA link
    ///
    /// **Default**: 115200
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
}

fn default_baud() -> u32 {
    115200
}

/// Network configuration for the control-plane listener
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// TCP bind address for client connections
    ///
    /// **Format**: "host:port"
    /// **Examples**:
    /// - "127.0.0.1:8870" (localhost only, the default)
    /// - "0.0.0.0:8870" (listen on all interfaces)
    #[serde(default = "default_bind")]
    pub bind_address: String,
}

fn default_bind() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind(),
        }
    }
}

/// Default control-plane TCP port
pub const DEFAULT_PORT: u16 = 8870;

/// Control-plane command configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Verb prefix for control commands
    ///
    /// With prefix "pc" clients send `pcset`, `pcget`, `pccat`,
    /// `pclist`, `pcloadso`. An empty prefix uses the bare verbs.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Size of the client session pool
    ///
    /// Connections past this are refused at accept time.
    ///
    /// **Default**: 32
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_prefix() -> String {
    "pc".to_string()
}

fn default_max_sessions() -> usize {
    crate::ui::session::MAX_SESSIONS
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Explicit slot assignments applied before enumeration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SlotsConfig {
    /// Entries of the form "<slot>:<driver name>"
    #[serde(default)]
    pub load: Vec<String>,
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub serial: SerialConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub slots: SlotsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Validation
    ///
    /// - `baud_rate` must be nonzero
    /// - `prefix` must be ASCII alphanumeric (it is spliced onto verbs)
    /// - every `[slots] load` entry must parse as `<slot>:<name>` with
    ///   the slot index inside the slot table
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(Error::Config("baud_rate must be nonzero".to_string()));
        }

        if !self.control.prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config(format!(
                "control prefix {:?} must be ASCII alphanumeric",
                self.control.prefix
            )));
        }

        if self.control.max_sessions == 0 {
            return Err(Error::Config("max_sessions must be nonzero".to_string()));
        }

        for entry in &self.slots.load {
            let (slot, _name) = parse_overload(entry)?;
            if slot >= MAX_SLOTS {
                return Err(Error::Config(format!(
                    "slot {} in {:?} is outside the slot table (0..{})",
                    slot, entry, MAX_SLOTS
                )));
            }
        }

        Ok(())
    }
}

/// Split a "<slot>:<driver name>" overload entry
pub fn parse_overload(entry: &str) -> Result<(usize, &str)> {
    let (slot, name) = entry
        .split_once(':')
        .ok_or_else(|| Error::Config(format!("expected <slot>:<driver>, got {:?}", entry)))?;
    let slot = slot
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("invalid slot index in {:?}", entry)))?;
    if name.is_empty() {
        return Err(Error::Config(format!("missing driver name in {:?}", entry)));
    }
    Ok((slot, name))
}
