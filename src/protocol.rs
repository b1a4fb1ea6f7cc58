//! Line protocol spoken with the motor firmware.
//!
//! Protocol Overview:
//! - Format: newline-terminated ASCII, one message per line
//! - Inbound: `TAG:payload` with TAG one of ERROR, WARNING, STATUS, POSITION;
//!   anything else is passed through unstructured
//! - Outbound: `CALIBRATE`, `TARGET:<mm, 6 decimals>`, `MANUAL:<READY|CW|CCW|STOP|COMPLETE>`, `REST`
//!
//! Command payloads must not contain the terminator themselves; nothing here
//! escapes them.

use crate::error::{AppResult, MotorError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of an inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    /// `ERROR:<text>`
    Error,
    /// `WARNING:<text>`
    Warning,
    /// `STATUS:<value>`
    Status,
    /// `POSITION:<float>`
    Position,
    /// Anything else
    Unformatted,
}

/// Terminal conditions reported through `STATUS:` lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    CalibrationComplete,
    CalibrationTimeout,
    TargetComplete,
    ManualComplete,
    /// Accepted but carries no meaning for the controller.
    Other(String),
}

impl DeviceStatus {
    fn parse(value: &str) -> Self {
        match value {
            "CALIBRATION_COMPLETE" => DeviceStatus::CalibrationComplete,
            "CALIBRATION_TIMEOUT" => DeviceStatus::CalibrationTimeout,
            "TARGET_COMPLETE" => DeviceStatus::TargetComplete,
            "MANUAL_COMPLETE" => DeviceStatus::ManualComplete,
            other => DeviceStatus::Other(other.to_string()),
        }
    }

    /// Whether this status ends the current mode.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeviceStatus::Other(_))
    }
}

/// Typed payload of an inbound line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageKind {
    Error(String),
    Warning(String),
    Status(DeviceStatus),
    Position(f64),
    Unformatted,
}

/// One classified line received from the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The line as received, surrounding whitespace removed
    pub raw: String,
    /// Parsed payload
    pub kind: MessageKind,
}

impl InboundMessage {
    /// Classify a single line.
    ///
    /// Only a `POSITION:` line whose payload is not a float fails; every
    /// other line yields a message, possibly `Unformatted`.
    pub fn parse(line: &str) -> AppResult<Self> {
        let raw = line.trim();
        let kind = match raw.split_once(':') {
            Some(("ERROR", text)) => MessageKind::Error(text.to_string()),
            Some(("WARNING", text)) => MessageKind::Warning(text.to_string()),
            Some(("STATUS", value)) => MessageKind::Status(DeviceStatus::parse(value)),
            Some(("POSITION", value)) => {
                let value = value.trim();
                let position = value
                    .parse::<f64>()
                    .map_err(|source| MotorError::ProtocolParse {
                        payload: value.to_string(),
                        source,
                    })?;
                MessageKind::Position(position)
            }
            _ => MessageKind::Unformatted,
        };

        Ok(Self {
            raw: raw.to_string(),
            kind,
        })
    }

    /// Category of this message
    pub fn category(&self) -> MessageCategory {
        match self.kind {
            MessageKind::Error(_) => MessageCategory::Error,
            MessageKind::Warning(_) => MessageCategory::Warning,
            MessageKind::Status(_) => MessageCategory::Status,
            MessageKind::Position(_) => MessageCategory::Position,
            MessageKind::Unformatted => MessageCategory::Unformatted,
        }
    }

    /// Whether the device is telling us the active mode is over.
    pub fn forces_rest(&self) -> bool {
        match &self.kind {
            MessageKind::Error(_) => true,
            MessageKind::Status(status) => status.is_terminal(),
            _ => false,
        }
    }
}

/// Jog and lifecycle commands understood while in manual control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualCommand {
    Ready,
    /// Start rotating clockwise
    Cw,
    /// Start rotating counter-clockwise
    Ccw,
    Stop,
    /// Leave manual control on the device side
    Complete,
}

impl ManualCommand {
    fn as_str(self) -> &'static str {
        match self {
            ManualCommand::Ready => "READY",
            ManualCommand::Cw => "CW",
            ManualCommand::Ccw => "CCW",
            ManualCommand::Stop => "STOP",
            ManualCommand::Complete => "COMPLETE",
        }
    }
}

/// Outbound command, rendered without its terminator by `Display`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Calibrate,
    /// Move to an absolute distance in millimetres
    Target(f64),
    Manual(ManualCommand),
    Rest,
    /// Passed through verbatim
    Raw(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Calibrate => f.write_str("CALIBRATE"),
            Command::Target(mm) => write!(f, "TARGET:{:.6}", mm),
            Command::Manual(cmd) => write!(f, "MANUAL:{}", cmd.as_str()),
            Command::Rest => f.write_str("REST"),
            Command::Raw(line) => f.write_str(line),
        }
    }
}

/// Render one outbound line as it goes on the wire.
pub fn frame(line: &str, terminator: &str) -> String {
    format!("{}{}", line, terminator)
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Command::Raw(line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tagged_lines() {
        let msg = InboundMessage::parse("ERROR:stall detected\r\n").unwrap();
        assert_eq!(msg.kind, MessageKind::Error("stall detected".into()));
        assert_eq!(msg.raw, "ERROR:stall detected");
        assert!(msg.forces_rest());

        let msg = InboundMessage::parse("WARNING:limit near").unwrap();
        assert_eq!(msg.category(), MessageCategory::Warning);
        assert!(!msg.forces_rest());

        let msg = InboundMessage::parse("STATUS:TARGET_COMPLETE").unwrap();
        assert_eq!(msg.kind, MessageKind::Status(DeviceStatus::TargetComplete));
        assert!(msg.forces_rest());
    }

    #[test]
    fn every_terminal_status_forces_rest() {
        for value in [
            "CALIBRATION_COMPLETE",
            "CALIBRATION_TIMEOUT",
            "TARGET_COMPLETE",
            "MANUAL_COMPLETE",
        ] {
            let msg = InboundMessage::parse(&format!("STATUS:{value}")).unwrap();
            assert!(msg.forces_rest(), "{value} should end the mode");
        }
    }

    #[test]
    fn unknown_status_is_accepted_but_inert() {
        let msg = InboundMessage::parse("STATUS:HOMING").unwrap();
        assert_eq!(msg.category(), MessageCategory::Status);
        assert_eq!(
            msg.kind,
            MessageKind::Status(DeviceStatus::Other("HOMING".into()))
        );
        assert!(!msg.forces_rest());
    }

    #[test]
    fn parses_position_payload() {
        let msg = InboundMessage::parse("POSITION: 12.345000 ").unwrap();
        assert_eq!(msg.kind, MessageKind::Position(12.345));
    }

    #[test]
    fn malformed_position_is_a_protocol_error() {
        let err = InboundMessage::parse("POSITION:abc").unwrap_err();
        assert!(matches!(err, MotorError::ProtocolParse { ref payload, .. } if payload == "abc"));
    }

    #[test]
    fn untagged_lines_are_unformatted() {
        for line in ["Arduino ready", "position:1.0", "FOO:bar", ""] {
            let msg = InboundMessage::parse(line).unwrap();
            assert_eq!(msg.category(), MessageCategory::Unformatted, "{line:?}");
            assert!(!msg.forces_rest());
        }
    }

    #[test]
    fn renders_outbound_commands() {
        assert_eq!(frame(&Command::Calibrate.to_string(), "\n"), "CALIBRATE\n");
        assert_eq!(
            frame(&Command::Target(12.5).to_string(), "\n"),
            "TARGET:12.500000\n"
        );
        assert_eq!(Command::Target(0.1234567).to_string(), "TARGET:0.123457");
        assert_eq!(Command::Manual(ManualCommand::Ready).to_string(), "MANUAL:READY");
        assert_eq!(Command::Manual(ManualCommand::Ccw).to_string(), "MANUAL:CCW");
        assert_eq!(frame(&Command::Rest.to_string(), "\r\n"), "REST\r\n");
        assert_eq!(Command::from("MANUAL:CW").to_string(), "MANUAL:CW");
    }
}
