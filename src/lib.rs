//! # Motor Controller Library
//!
//! Drives a single motorized actuator over a line-oriented serial protocol.
//! The embedded device runs the motion itself and reports completion,
//! errors, warnings, and position on its own; this crate keeps the host-side
//! mode state in step with it and fans changes out to any number of
//! subscribers.
//!
//! ## Crate Structure
//!
//! - **`config`**: `MotorConfig`, loaded with figment from defaults, an
//!   optional TOML file, and `MOTORCTL_*` environment variables.
//! - **`controller`**: the `MotorController` facade, its four-mode state
//!   machine, the event bus, the command dispatcher, and the inbound mailbox.
//! - **`error`**: the `MotorError` enum shared by every module.
//! - **`hardware`**: the serial link (reader and writer tasks) and port
//!   discovery.
//! - **`logging`**: tracing subscriber setup.
//! - **`protocol`**: parsing of inbound device lines and rendering of
//!   outbound commands.
//!
//! ## Example
//!
//! ```no_run
//! use motor_controller::{config::MotorConfig, controller::MotorController};
//!
//! # async fn run() -> motor_controller::error::AppResult<()> {
//! let config = MotorConfig::load()?;
//! let controller = MotorController::new(&config);
//! let _handle = controller.subscribe(|event: &motor_controller::controller::ControllerEvent| {
//!     println!("{event:?}");
//! });
//!
//! controller.connect("/dev/ttyACM0").await?;
//! controller.start_calibration()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod protocol;

pub use controller::{ControllerEvent, Mode, MotorController};
pub use error::{AppResult, MotorError};
