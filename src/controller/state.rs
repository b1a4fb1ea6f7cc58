//! Controller state: the active mode, the last reported position, the
//! pending target distance, and the connection status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position value meaning "not yet calibrated".
pub const UNCALIBRATED_POSITION: f64 = -999.0;

/// Operating mode. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Rest,
    Calibration,
    ManualControl,
    TargetDistance,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Rest => "Rest",
            Mode::Calibration => "Calibration",
            Mode::ManualControl => "Manual Control",
            Mode::TargetDistance => "Target Distance",
        })
    }
}

/// Link status as reported to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
    /// Last connection attempt failed with the given reason
    Failed(String),
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
            ConnectionStatus::Connected => f.write_str("connected"),
            ConnectionStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Mutable controller state, only reachable through the state machine.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ControllerState {
    pub mode: Mode,
    pub position_mm: f64,
    pub target_distance: Option<f64>,
    pub connection: ConnectionStatus,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            mode: Mode::Rest,
            position_mm: UNCALIBRATED_POSITION,
            target_distance: None,
            connection: ConnectionStatus::Disconnected,
        }
    }
}

impl ControllerState {
    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            mode: self.mode,
            position_mm: self.position_mm,
            calibrated: is_calibrated(self.position_mm),
            target_distance: self.target_distance,
            connection: self.connection.clone(),
        }
    }
}

/// Point-in-time copy of the controller state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    /// Active mode
    pub mode: Mode,
    /// Last reported position, `UNCALIBRATED_POSITION` until the device reports one
    pub position_mm: f64,
    /// Whether `position_mm` holds a real reading
    pub calibrated: bool,
    /// Distance the next `target_move` will send
    pub target_distance: Option<f64>,
    /// Link status
    pub connection: ConnectionStatus,
}

pub(crate) fn is_calibrated(position_mm: f64) -> bool {
    position_mm != UNCALIBRATED_POSITION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_rest_uncalibrated_disconnected() {
        let snapshot = ControllerState::default().snapshot();
        assert_eq!(snapshot.mode, Mode::Rest);
        assert_eq!(snapshot.position_mm, UNCALIBRATED_POSITION);
        assert!(!snapshot.calibrated);
        assert_eq!(snapshot.target_distance, None);
        assert_eq!(snapshot.connection, ConnectionStatus::Disconnected);
    }

    #[test]
    fn mode_names_match_operator_wording() {
        assert_eq!(Mode::ManualControl.to_string(), "Manual Control");
        assert_eq!(Mode::TargetDistance.to_string(), "Target Distance");
        assert_eq!(
            ConnectionStatus::Failed("busy".into()).to_string(),
            "failed: busy"
        );
    }
}
