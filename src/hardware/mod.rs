//! Hardware communication: the serial link to the motor firmware and
//! serial port discovery.

pub mod ports;
pub mod serial_link;

pub use ports::{available_ports, PortInfo};
pub use serial_link::{open_serial, DynSerial, LineSink, SerialLink, SerialPortIO};
