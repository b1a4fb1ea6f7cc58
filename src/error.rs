//! Custom error types for the motor controller.
//!
//! `MotorError` is the single error type of the library. It covers the fault
//! taxonomy of the controller core:
//!
//! - **`Connection`**: the serial device could not be opened. Reported to
//!   subscribers as a `connection_changed` event as well; never fatal.
//! - **`ProtocolParse`**: a `POSITION:` line carried a payload that is not a
//!   number. Logged by the reader; the previous position is retained.
//! - **`IllegalTransition`**: a mode trigger was fired from a mode it does not
//!   accept. No state changes and no event is published.
//! - **`TriggerInCallback`**: a subscriber fired a mode trigger while an
//!   event was being delivered to it. Refused so the pair in flight stays
//!   whole; queries from callbacks are fine.
//! - **`InvalidTarget`**: a non-finite target distance was supplied.
//! - **`Config`** / **`Configuration`**: loading or validating [`MotorConfig`]
//!   failed.
//!
//! Device-reported `ERROR:` lines are not represented here: they are ordinary
//! inbound messages that return the controller to rest.
//!
//! [`MotorConfig`]: crate::config::MotorConfig

use crate::controller::{Mode, Trigger};
use std::num::ParseFloatError;
use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, MotorError>;

#[derive(Error, Debug)]
pub enum MotorError {
    #[error("Failed to open serial port '{port}': {source}")]
    Connection {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Malformed position payload '{payload}': {source}")]
    ProtocolParse {
        payload: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("Trigger '{trigger}' is not allowed from mode {mode}")]
    IllegalTransition { trigger: Trigger, mode: Mode },

    #[error("Trigger '{trigger}' fired from inside an event callback")]
    TriggerInCallback { trigger: Trigger },

    #[error("Target distance must be a finite number, got {0}")]
    InvalidTarget(f64),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Failed to enumerate serial ports: {0}")]
    PortEnumeration(#[source] serialport::Error),

}

impl MotorError {
    /// Human-readable reason used in `connection_changed` events.
    pub fn reason(&self) -> String {
        match self {
            MotorError::Connection { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<figment::Error> for MotorError {
    fn from(value: figment::Error) -> Self {
        MotorError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_transition_names_trigger_and_mode() {
        let err = MotorError::IllegalTransition {
            trigger: Trigger::StartCalibration,
            mode: Mode::ManualControl,
        };
        let msg = err.to_string();
        assert!(msg.contains("start_calibration"));
        assert!(msg.contains("Manual Control"));
    }

    #[test]
    fn trigger_in_callback_names_trigger() {
        let err = MotorError::TriggerInCallback {
            trigger: Trigger::GoRest,
        };
        assert!(err.to_string().contains("go_rest"));
    }

    #[test]
    fn protocol_parse_keeps_payload() {
        let source = "abc".parse::<f64>().unwrap_err();
        let err = MotorError::ProtocolParse {
            payload: "abc".into(),
            source,
        };
        assert!(err.to_string().contains("'abc'"));
    }

    #[test]
    fn connection_reason_is_underlying_cause() {
        let err = MotorError::Connection {
            port: "/dev/ttyACM0".into(),
            source: tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "no such device"),
        };
        assert_eq!(err.reason(), "no such device");
        assert!(err.to_string().contains("/dev/ttyACM0"));
    }
}
