//! Log subscriber setup for `motorctl` and for embedders.
//!
//! The serial reader and writer log inside their own spans. `RUST_LOG`, when
//! set, replaces the level from `[application] log_level`.
//!
//! # Example
//! ```no_run
//! use motor_controller::{config::MotorConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MotorConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!(port = "/dev/ttyACM0", "Connecting");
//! # Ok(())
//! # }
//! ```

use crate::config::MotorConfig;
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed format with colors (for interactive use)
    Pretty,
    /// Compact single-line format without colors
    Compact,
    /// JSON format for log aggregation
    Json,
}

/// Subscriber settings derived from `[application]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Maximum level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Colors for the pretty format; off when stderr is redirected
    pub with_ansi: bool,
}

impl TracingConfig {
    /// Read level and format from the application configuration
    pub fn from_config(config: &MotorConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: parse_format(&config.application.log_format)?,
            with_ansi: std::io::stderr().is_terminal(),
        })
    }
}

/// Install the global subscriber described by the application configuration
pub fn init_from_config(config: &MotorConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// A subscriber that is already installed (tests, an embedding application)
/// is left in place and `Ok(())` is returned.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let output = fmt::layer().with_writer(std::io::stderr).with_target(true);
    let layer = match config.format {
        OutputFormat::Pretty => output.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => output.compact().with_ansi(false).boxed(),
        OutputFormat::Json => output.json().with_current_span(true).boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(format!("Failed to initialize tracing: {}", e)),
    }
}

/// Parse log level string into tracing Level
fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

fn parse_format(format: &str) -> Result<OutputFormat, String> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        _ => Err(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        )),
    }
}
