//! Serial port discovery.
//!
//! Enumerates the ports the OS knows about and pairs each device identifier
//! with a human-readable label. Only the identifier is needed to connect.

use crate::error::{AppResult, MotorError};
use serde::Serialize;
use serialport::SerialPortType;

/// A discovered serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Identifier passed to `connect` (e.g. "/dev/ttyACM0", "COM3")
    pub device: String,
    /// Display label, "<device> - <description>" when a description is known
    pub label: String,
}

impl PortInfo {
    /// Build a port entry from its identifier and optional description.
    pub fn new(device: impl Into<String>, description: Option<&str>) -> Self {
        let device = device.into();
        let label = match description.map(str::trim) {
            Some(text) if !text.is_empty() => format!("{} - {}", device, text),
            _ => device.clone(),
        };
        Self { device, label }
    }
}

/// List the serial ports currently present on this machine.
pub fn available_ports() -> AppResult<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(MotorError::PortEnumeration)?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let description = describe(&port.port_type);
            PortInfo::new(port.port_name, description.as_deref())
        })
        .collect())
}

fn describe(port_type: &SerialPortType) -> Option<String> {
    match port_type {
        SerialPortType::UsbPort(info) => info
            .product
            .clone()
            .or_else(|| info.manufacturer.clone()),
        SerialPortType::BluetoothPort => Some("Bluetooth".to_string()),
        SerialPortType::PciPort | SerialPortType::Unknown => None,
    }
}
