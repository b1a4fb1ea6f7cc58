//! Mode state machine.
//!
//! | Trigger             | Source | Destination    | Entry action                          |
//! |---------------------|--------|----------------|---------------------------------------|
//! | `start_calibration` | Rest   | Calibration    | send `CALIBRATE`                      |
//! | `target_move`       | Rest   | TargetDistance | send `TARGET:<mm>`, or fall back to rest |
//! | `manual_mode`       | Rest   | ManualControl  | send `MANUAL:READY`                   |
//! | `go_rest`           | any    | Rest           | send `REST`                           |
//!
//! Every accepted trigger publishes a `Before` event carrying the mode being
//! left and an `After` event carrying the mode entered, then runs the entry
//! action. Pairs from concurrent triggers (user calls and the serial reader)
//! never interleave. Entry actions only queue a command; the device may not
//! have seen it when the trigger returns.

use super::dispatcher::CommandDispatcher;
use super::events::{ControllerEvent, EventBus, TransitionPhase};
use super::state::{ConnectionStatus, ControllerSnapshot, ControllerState, Mode};
use crate::error::{AppResult, MotorError};
use crate::protocol::{Command, InboundMessage, ManualCommand, MessageKind};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Named request to change mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Rest → Calibration
    StartCalibration,
    /// Rest → TargetDistance
    TargetMove,
    /// Rest → ManualControl
    ManualMode,
    /// Any → Rest
    GoRest,
}

impl Trigger {
    /// Every trigger, in table order
    pub const ALL: [Trigger; 4] = [
        Trigger::StartCalibration,
        Trigger::TargetMove,
        Trigger::ManualMode,
        Trigger::GoRest,
    ];

    /// The transition this trigger requests.
    pub const fn rule(self) -> TransitionRule {
        match self {
            Trigger::StartCalibration => TransitionRule {
                sources: Sources::Only(Mode::Rest),
                destination: Mode::Calibration,
                entry: EntryAction::Calibrate,
            },
            Trigger::TargetMove => TransitionRule {
                sources: Sources::Only(Mode::Rest),
                destination: Mode::TargetDistance,
                entry: EntryAction::MoveToTarget,
            },
            Trigger::ManualMode => TransitionRule {
                sources: Sources::Only(Mode::Rest),
                destination: Mode::ManualControl,
                entry: EntryAction::ManualReady,
            },
            Trigger::GoRest => TransitionRule {
                sources: Sources::Any,
                destination: Mode::Rest,
                entry: EntryAction::Rest,
            },
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::StartCalibration => "start_calibration",
            Trigger::TargetMove => "target_move",
            Trigger::ManualMode => "manual_mode",
            Trigger::GoRest => "go_rest",
        })
    }
}

/// Modes a trigger may fire from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sources {
    Any,
    Only(Mode),
}

/// Work done after entering the destination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    /// Send `CALIBRATE`
    Calibrate,
    /// Send `TARGET:<mm>` for the pending distance, or return to rest
    MoveToTarget,
    /// Send `MANUAL:READY`
    ManualReady,
    /// Send `REST`
    Rest,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    /// Allowed source modes
    pub sources: Sources,
    /// Mode entered
    pub destination: Mode,
    /// Action run after entering
    pub entry: EntryAction,
}

impl TransitionRule {
    /// Whether the rule accepts `mode` as its source
    pub fn allows(&self, mode: Mode) -> bool {
        match self.sources {
            Sources::Any => true,
            Sources::Only(source) => source == mode,
        }
    }
}

/// Synchronized owner of the controller state.
///
/// Two locks: `gate` serializes everything that publishes (transitions,
/// position and connection updates) and is held across a whole
/// `Before`/`After` pair; `state` is only held for the instant a field is
/// read or written and never while subscribers run. Subscribers can
/// therefore query the controller from their callbacks. The flag inside
/// `gate` marks a publish in progress on the owning thread, which is how a
/// trigger fired from a callback is detected and refused instead of
/// splitting the pair being delivered.
pub(crate) struct StateMachine {
    state: Mutex<ControllerState>,
    gate: ReentrantMutex<Cell<bool>>,
    bus: Arc<EventBus>,
    dispatcher: CommandDispatcher,
}

impl StateMachine {
    pub fn new(bus: Arc<EventBus>, dispatcher: CommandDispatcher) -> Self {
        Self {
            state: Mutex::new(ControllerState::default()),
            gate: ReentrantMutex::new(Cell::new(false)),
            bus,
            dispatcher,
        }
    }

    pub fn fire(&self, trigger: Trigger) -> AppResult<()> {
        let gate = self.gate.lock();
        if gate.get() {
            warn!(trigger = %trigger, "Trigger fired from an event callback; refused");
            return Err(MotorError::TriggerInCallback { trigger });
        }
        self.transition(&gate, trigger)
    }

    /// Device-driven return to rest; a no-op when already at rest.
    pub fn force_rest(&self, cause: &str) -> bool {
        let gate = self.gate.lock();
        let mode = self.state.lock().mode;
        if mode == Mode::Rest {
            debug!(cause, "Already at rest; ignoring device completion");
            return false;
        }
        info!(cause, from = %mode, "Device ended the active mode");
        self.transition(&gate, Trigger::GoRest).is_ok()
    }

    pub fn handle_message(&self, message: &InboundMessage) {
        match &message.kind {
            MessageKind::Error(text) => error!(device_error = %text, "Device reported an error"),
            MessageKind::Warning(text) => warn!(device_warning = %text, "Device warning"),
            MessageKind::Status(status) if !status.is_terminal() => {
                debug!(?status, "Status carries no transition");
            }
            MessageKind::Status(_) => {}
            MessageKind::Position(mm) => self.update_position(*mm),
            MessageKind::Unformatted => {
                debug!(line = %message.raw, "Unformatted device output");
            }
        }

        if message.forces_rest() {
            self.force_rest(&message.raw);
        }
    }

    pub fn update_position(&self, mm: f64) {
        let gate = self.gate.lock();
        self.state.lock().position_mm = mm;
        self.publish(&gate, ControllerEvent::PositionChanged { value: mm });
    }

    pub fn set_connection(&self, status: ConnectionStatus, detail: Option<String>) {
        let gate = self.gate.lock();
        self.state.lock().connection = status.clone();
        self.publish(&gate, ControllerEvent::ConnectionChanged { status, detail });
    }

    pub fn set_target_distance(&self, mm: f64) -> AppResult<()> {
        if !mm.is_finite() {
            return Err(MotorError::InvalidTarget(mm));
        }
        self.state.lock().target_distance = Some(mm);
        Ok(())
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.state.lock().snapshot()
    }

    // Caller holds the gate, so the mode cannot change underneath us.
    fn transition(&self, gate: &Cell<bool>, trigger: Trigger) -> AppResult<()> {
        let rule = trigger.rule();
        let from = self.state.lock().mode;
        if !rule.allows(from) {
            debug!(trigger = %trigger, mode = %from, "Rejected trigger");
            return Err(MotorError::IllegalTransition {
                trigger,
                mode: from,
            });
        }

        info!(trigger = %trigger, from = %from, to = %rule.destination, "Mode transition");

        self.publish(
            gate,
            ControllerEvent::StateChanged {
                mode: from,
                phase: TransitionPhase::Before,
            },
        );
        self.state.lock().mode = rule.destination;
        self.publish(
            gate,
            ControllerEvent::StateChanged {
                mode: rule.destination,
                phase: TransitionPhase::After,
            },
        );

        self.run_entry_action(gate, rule.entry);
        Ok(())
    }

    fn run_entry_action(&self, gate: &Cell<bool>, action: EntryAction) {
        let command = match action {
            EntryAction::Calibrate => Command::Calibrate,
            EntryAction::ManualReady => Command::Manual(ManualCommand::Ready),
            EntryAction::Rest => Command::Rest,
            EntryAction::MoveToTarget => {
                let pending = self.state.lock().target_distance.take();
                match pending {
                    Some(mm) => Command::Target(mm),
                    None => {
                        warn!("No target distance set; returning to rest");
                        // go_rest accepts every source
                        let _ = self.transition(gate, Trigger::GoRest);
                        return;
                    }
                }
            }
        };
        self.dispatcher.dispatch(&command);
    }

    fn publish(&self, gate: &Cell<bool>, event: ControllerEvent) {
        let outer = gate.replace(true);
        self.bus.notify(&event);
        gate.set(outer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialConfig;
    use crate::controller::events::ChannelSubscriber;
    use crate::hardware::SerialLink;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn machine() -> (StateMachine, UnboundedReceiver<ControllerEvent>) {
        let bus = Arc::new(EventBus::new());
        let (subscriber, rx) = ChannelSubscriber::channel();
        bus.attach(subscriber);
        let link = Arc::new(SerialLink::new(SerialConfig::default()));
        (StateMachine::new(bus, CommandDispatcher::new(link)), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn pair(from: Mode, to: Mode) -> Vec<ControllerEvent> {
        vec![
            ControllerEvent::StateChanged {
                mode: from,
                phase: TransitionPhase::Before,
            },
            ControllerEvent::StateChanged {
                mode: to,
                phase: TransitionPhase::After,
            },
        ]
    }

    #[test]
    fn table_matches_documented_transitions() {
        for trigger in Trigger::ALL {
            let rule = trigger.rule();
            match trigger {
                Trigger::GoRest => {
                    assert_eq!(rule.sources, Sources::Any);
                    assert_eq!(rule.destination, Mode::Rest);
                }
                _ => assert_eq!(rule.sources, Sources::Only(Mode::Rest)),
            }
        }
        assert_eq!(Trigger::ManualMode.rule().destination, Mode::ManualControl);
        assert_eq!(Trigger::TargetMove.rule().entry, EntryAction::MoveToTarget);
    }

    #[test]
    fn mode_entry_triggers_rejected_outside_rest() {
        let (machine, mut rx) = machine();
        machine.fire(Trigger::StartCalibration).unwrap();
        drain(&mut rx);

        for trigger in [
            Trigger::StartCalibration,
            Trigger::ManualMode,
            Trigger::TargetMove,
        ] {
            let err = machine.fire(trigger).unwrap_err();
            assert!(matches!(
                err,
                MotorError::IllegalTransition { mode: Mode::Calibration, .. }
            ));
        }
        assert_eq!(machine.snapshot().mode, Mode::Calibration);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn go_rest_from_rest_is_a_full_transition() {
        let (machine, mut rx) = machine();
        machine.fire(Trigger::GoRest).unwrap();
        assert_eq!(drain(&mut rx), pair(Mode::Rest, Mode::Rest));
    }

    #[test]
    fn go_rest_accepted_from_every_mode() {
        let (machine, mut rx) = machine();
        for entry in [
            Trigger::StartCalibration,
            Trigger::ManualMode,
            Trigger::TargetMove,
        ] {
            machine.set_target_distance(1.0).unwrap();
            machine.fire(entry).unwrap();
            let mode = machine.snapshot().mode;
            drain(&mut rx);

            machine.fire(Trigger::GoRest).unwrap();
            assert_eq!(drain(&mut rx), pair(mode, Mode::Rest));
        }
    }

    #[test]
    fn target_move_without_distance_falls_back_to_rest() {
        let (machine, mut rx) = machine();
        machine.fire(Trigger::TargetMove).unwrap();

        let mut expected = pair(Mode::Rest, Mode::TargetDistance);
        expected.extend(pair(Mode::TargetDistance, Mode::Rest));
        assert_eq!(drain(&mut rx), expected);
        assert_eq!(machine.snapshot().mode, Mode::Rest);
    }

    #[test]
    fn target_distance_is_consumed_on_entry() {
        let (machine, _rx) = machine();
        machine.set_target_distance(4.2).unwrap();
        machine.fire(Trigger::TargetMove).unwrap();
        assert_eq!(machine.snapshot().mode, Mode::TargetDistance);
        assert_eq!(machine.snapshot().target_distance, None);
    }

    #[test]
    fn rejects_non_finite_target() {
        let (machine, _rx) = machine();
        assert!(matches!(
            machine.set_target_distance(f64::NAN),
            Err(MotorError::InvalidTarget(_))
        ));
        assert_eq!(machine.snapshot().target_distance, None);
    }

    #[test]
    fn terminal_status_returns_to_rest_once() {
        let (machine, mut rx) = machine();
        machine.fire(Trigger::StartCalibration).unwrap();
        drain(&mut rx);

        let done = InboundMessage::parse("STATUS:CALIBRATION_COMPLETE").unwrap();
        machine.handle_message(&done);
        assert_eq!(drain(&mut rx), pair(Mode::Calibration, Mode::Rest));

        // Already at rest: nothing further
        machine.handle_message(&done);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn warnings_and_unknown_status_leave_mode_alone() {
        let (machine, mut rx) = machine();
        machine.fire(Trigger::ManualMode).unwrap();
        drain(&mut rx);

        for line in ["WARNING:hot", "STATUS:HOMING", "hello"] {
            machine.handle_message(&InboundMessage::parse(line).unwrap());
        }
        assert_eq!(machine.snapshot().mode, Mode::ManualControl);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn position_update_publishes_once() {
        let (machine, mut rx) = machine();
        machine.handle_message(&InboundMessage::parse("POSITION:12.345000").unwrap());

        assert_eq!(machine.snapshot().position_mm, 12.345);
        assert!(machine.snapshot().calibrated);
        assert_eq!(
            drain(&mut rx),
            vec![ControllerEvent::PositionChanged { value: 12.345 }]
        );
    }

    #[test]
    fn subscribers_read_state_and_cannot_trigger_from_callbacks() {
        let bus = Arc::new(EventBus::new());
        let link = Arc::new(SerialLink::new(SerialConfig::default()));
        let machine = Arc::new(StateMachine::new(bus.clone(), CommandDispatcher::new(link)));

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let weak = Arc::downgrade(&machine);
            let seen = seen.clone();
            bus.subscribe(move |event: &ControllerEvent| {
                if let Some(machine) = weak.upgrade() {
                    let mode = machine.snapshot().mode;
                    let nested = machine.fire(Trigger::GoRest);
                    let refused = matches!(nested, Err(MotorError::TriggerInCallback { .. }));
                    seen.lock().push((event.clone(), mode, refused));
                }
            });
        }

        // Worker thread so a lock cycle fails the test instead of hanging it
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        {
            let machine = machine.clone();
            std::thread::spawn(move || {
                let fired = machine.fire(Trigger::StartCalibration);
                machine.update_position(1.5);
                let _ = done_tx.send(fired.is_ok());
            });
        }
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(3)), Ok(true));

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![
                (pair(Mode::Rest, Mode::Calibration)[0].clone(), Mode::Rest, true),
                (pair(Mode::Rest, Mode::Calibration)[1].clone(), Mode::Calibration, true),
                (ControllerEvent::PositionChanged { value: 1.5 }, Mode::Calibration, true),
            ]
        );
        assert_eq!(machine.snapshot().mode, Mode::Calibration);
    }

    #[test]
    fn concurrent_triggers_never_interleave_pairs() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = log.clone();
            bus.subscribe(move |event: &ControllerEvent| {
                if let ControllerEvent::StateChanged { phase, .. } = event {
                    log.lock().push(*phase);
                    std::thread::yield_now();
                }
            });
        }
        let link = Arc::new(SerialLink::new(SerialConfig::default()));
        let machine = Arc::new(StateMachine::new(bus, CommandDispatcher::new(link)));

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let machine = machine.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i % 2 == 0 {
                            let _ = machine.fire(Trigger::ManualMode);
                        } else {
                            machine.force_rest("STATUS:MANUAL_COMPLETE");
                        }
                        let _ = machine.fire(Trigger::GoRest);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let log = log.lock();
        assert_eq!(log.len() % 2, 0);
        for chunk in log.chunks(2) {
            assert_eq!(chunk, [TransitionPhase::Before, TransitionPhase::After]);
        }
    }
}
