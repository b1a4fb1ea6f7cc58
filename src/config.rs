//! Configuration using Figment
//!
//! Configuration is layered from:
//! 1. compiled defaults (the device's fixed wire parameters)
//! 2. an optional TOML file
//! 3. environment variables prefixed with `MOTORCTL_` (nested keys split on `__`)
//!
//! # Example
//! ```no_run
//! use motor_controller::config::MotorConfig;
//!
//! let config = MotorConfig::load_from("motorctl.toml")?;
//! println!("Baud rate: {}", config.serial.baud_rate);
//! # Ok::<(), motor_controller::error::MotorError>(())
//! ```
//!
//! Example override: `MOTORCTL_SERIAL__SETTLE_DELAY_MS=500`

use crate::error::{AppResult, MotorError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link settings
    pub serial: SerialConfig,
    /// Inbound message mailbox settings
    pub mailbox: MailboxConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "motorctl".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Serial link configuration
///
/// The defaults match the device firmware: 9600 baud, one second read
/// timeout, two seconds for the board to reset after the port opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Communication speed
    pub baud_rate: u32,
    /// Bounded wait for a single line read, in milliseconds
    pub read_timeout_ms: u64,
    /// Delay after opening before the link is considered usable, in milliseconds
    pub settle_delay_ms: u64,
    /// Pause between unsuccessful read attempts, in milliseconds
    pub poll_interval_ms: u64,
    /// Bounded wait for the reader/writer tasks to exit on close, in milliseconds
    pub join_timeout_ms: u64,
    /// Terminator appended to every outbound command
    pub line_terminator: String,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            read_timeout_ms: 1000,
            settle_delay_ms: 2000,
            poll_interval_ms: 10,
            join_timeout_ms: 1000,
            line_terminator: "\n".to_string(),
        }
    }
}

impl SerialConfig {
    /// Read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Settle delay as a `Duration`
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Join timeout as a `Duration`
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// Inbound message mailbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Maximum queued lines; the oldest line is dropped when full
    pub capacity: usize,
    /// Cadence of the log drain, in milliseconds
    pub drain_interval_ms: u64,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            drain_interval_ms: 100,
        }
    }
}

impl MailboxConfig {
    /// Drain interval as a `Duration`
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl MotorConfig {
    /// Load defaults overridden by `MOTORCTL_` environment variables only
    pub fn load() -> AppResult<Self> {
        let config: Self = Self::base_figment()
            .merge(Env::prefixed("MOTORCTL_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::base_figment()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MOTORCTL_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn base_figment() -> Figment {
        Figment::from(Serialized::defaults(MotorConfig::default()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(MotorError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(MotorError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_FORMATS.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(MotorError::Configuration(
                "baud_rate must be greater than zero".to_string(),
            ));
        }

        if self.serial.line_terminator.is_empty() {
            return Err(MotorError::Configuration(
                "line_terminator must not be empty".to_string(),
            ));
        }

        if self.serial.poll_interval_ms == 0 {
            return Err(MotorError::Configuration(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.mailbox.capacity == 0 {
            return Err(MotorError::Configuration(
                "mailbox capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
