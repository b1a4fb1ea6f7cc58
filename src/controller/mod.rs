//! Motor controller core.
//!
//! [`MotorController`] ties the pieces together: the serial link feeds
//! device lines into the mailbox and the protocol parser, parsed messages
//! drive the state machine, and the state machine publishes on the event bus
//! and writes commands through the dispatcher.
//!
//! ```text
//! device ─▶ SerialLink reader ─▶ Core (mailbox, parse) ─▶ StateMachine ─▶ EventBus
//!                                                            │
//! trigger ──────────────────────────────────────────────────▶┘─▶ CommandDispatcher ─▶ SerialLink writer ─▶ device
//! ```

pub mod dispatcher;
pub mod events;
mod machine;
pub mod mailbox;
pub mod state;

pub use dispatcher::CommandDispatcher;
pub use events::{
    ChannelSubscriber, ControllerEvent, EventBus, Subscriber, SubscriberHandle, TransitionPhase,
};
pub use machine::{EntryAction, Sources, TransitionRule, Trigger};
pub use mailbox::{Mailbox, ReceivedLine};
pub use state::{ConnectionStatus, ControllerSnapshot, Mode, UNCALIBRATED_POSITION};

use crate::config::MotorConfig;
use crate::error::AppResult;
use crate::hardware::{open_serial, DynSerial, LineSink, SerialLink};
use crate::protocol::{Command, InboundMessage};
use machine::StateMachine;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, instrument, warn};

/// Detail carried by the event emitted when the device hangs up.
pub const DEVICE_CLOSED_DETAIL: &str = "device closed the connection";

/// Reader-side half of the controller.
struct Core {
    machine: StateMachine,
    mailbox: Mailbox,
}

impl LineSink for Core {
    fn on_line(&self, line: &str) {
        self.mailbox.push(line);
        match InboundMessage::parse(line) {
            Ok(message) => self.machine.handle_message(&message),
            Err(err) => warn!(line, error = %err, "Ignoring malformed device line"),
        }
    }

    fn on_link_closed(&self, _port: &str) {
        self.machine.set_connection(
            ConnectionStatus::Disconnected,
            Some(DEVICE_CLOSED_DETAIL.to_string()),
        );
    }
}

/// Controller for a single serially attached motor.
///
/// Mode triggers and queries are synchronous and may be called from any
/// thread. Connecting and closing are async and must run inside a Tokio
/// runtime, since the link spawns its reader and writer tasks there.
pub struct MotorController {
    core: Arc<Core>,
    bus: Arc<EventBus>,
    link: Arc<SerialLink>,
    dispatcher: CommandDispatcher,
    // Serializes connect/close so two lifecycles never overlap
    lifecycle: tokio::sync::Mutex<()>,
}

impl MotorController {
    /// Create a disconnected controller at rest with an uncalibrated position.
    pub fn new(config: &MotorConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let link = Arc::new(SerialLink::new(config.serial.clone()));
        let dispatcher = CommandDispatcher::new(link.clone());
        let core = Arc::new(Core {
            machine: StateMachine::new(bus.clone(), dispatcher.clone()),
            mailbox: Mailbox::new(config.mailbox.capacity),
        });

        Self {
            core,
            bus,
            link,
            dispatcher,
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open `port` and start reading from it.
    ///
    /// Any link already open is closed first. An open failure is published
    /// as `connection_changed{Failed}` and returned; the controller stays
    /// usable and a later `connect` may retry.
    #[instrument(skip(self))]
    pub async fn connect(&self, port: &str) -> AppResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.close_locked().await;

        let stream = match open_serial(port, self.link.config()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "Connection failed");
                self.core
                    .machine
                    .set_connection(ConnectionStatus::Failed(err.reason()), Some(port.to_string()));
                return Err(err);
            }
        };

        self.start(port, stream).await;
        Ok(())
    }

    /// Attach an already open stream under the name `port`.
    ///
    /// Runs the same settle, reader, and event sequence as [`connect`](Self::connect).
    pub async fn connect_stream(&self, port: &str, stream: DynSerial) {
        let _guard = self.lifecycle.lock().await;
        self.close_locked().await;
        self.start(port, stream).await;
    }

    /// Stop the reader and release the link. Safe to call when closed.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        self.close_locked().await;
    }

    /// Return to rest, then close the link.
    pub async fn shutdown(&self) {
        if let Err(err) = self.go_rest() {
            warn!(error = %err, "Could not return to rest before closing");
        }
        self.close().await;
    }

    async fn start(&self, port: &str, stream: DynSerial) {
        let settle = self.link.config().settle_delay();
        if !settle.is_zero() {
            info!(port, settle_ms = settle.as_millis() as u64, "Waiting for device reset");
            tokio::time::sleep(settle).await;
        }

        let sink: Arc<dyn LineSink> = self.core.clone();
        self.link.attach(port, stream, sink);
        self.core
            .machine
            .set_connection(ConnectionStatus::Connected, Some(port.to_string()));
        info!(port, "Connected");
    }

    async fn close_locked(&self) {
        let port = self.link.port_name();
        if !self.link.close().await {
            return;
        }
        // EOF already reported the disconnect
        if self.connection_status() != ConnectionStatus::Disconnected {
            self.core
                .machine
                .set_connection(ConnectionStatus::Disconnected, port);
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Queue a raw line for the device. A no-op when no link is open.
    pub fn send(&self, raw: &str) -> bool {
        self.dispatcher.send(raw)
    }

    /// Queue a typed command. A no-op when no link is open.
    pub fn send_command(&self, command: &Command) -> bool {
        self.dispatcher.dispatch(command)
    }

    /// Rest → Calibration, sends `CALIBRATE`.
    pub fn start_calibration(&self) -> AppResult<()> {
        self.fire(Trigger::StartCalibration)
    }

    /// Rest → ManualControl, sends `MANUAL:READY`.
    pub fn manual_mode(&self) -> AppResult<()> {
        self.fire(Trigger::ManualMode)
    }

    /// Rest → TargetDistance, sends `TARGET:<mm>` for the distance set with
    /// [`set_target_distance`](Self::set_target_distance).
    ///
    /// Without a pending distance the controller goes straight back to rest.
    pub fn target_move(&self) -> AppResult<()> {
        self.fire(Trigger::TargetMove)
    }

    /// Any mode → Rest, sends `REST`.
    pub fn go_rest(&self) -> AppResult<()> {
        self.fire(Trigger::GoRest)
    }

    /// Fire `trigger`; rejected with `IllegalTransition` from a disallowed mode.
    pub fn fire(&self, trigger: Trigger) -> AppResult<()> {
        self.core.machine.fire(trigger)
    }

    /// Distance used by the next `target_move`.
    pub fn set_target_distance(&self, mm: f64) -> AppResult<()> {
        self.core.machine.set_target_distance(mm)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Pending target distance, if any
    pub fn target_distance(&self) -> Option<f64> {
        self.snapshot().target_distance
    }

    /// Active mode
    pub fn mode(&self) -> Mode {
        self.snapshot().mode
    }

    /// Last reported position in mm
    pub fn position_mm(&self) -> f64 {
        self.snapshot().position_mm
    }

    /// Whether the device has reported a position
    pub fn is_calibrated(&self) -> bool {
        self.snapshot().calibrated
    }

    /// Current link status
    pub fn connection_status(&self) -> ConnectionStatus {
        self.snapshot().connection
    }

    /// Copy of the full controller state
    pub fn snapshot(&self) -> ControllerSnapshot {
        self.core.machine.snapshot()
    }

    /// Every line received since the last drain, oldest first.
    pub fn drain_messages(&self) -> Vec<ReceivedLine> {
        self.core.mailbox.drain()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Attach a closure or other subscriber; keep the handle to unsubscribe.
    pub fn subscribe<S>(&self, subscriber: S) -> SubscriberHandle
    where
        S: Subscriber + 'static,
    {
        self.bus.subscribe(subscriber)
    }

    /// Attach an existing handle. Returns `false` if already attached.
    pub fn attach(&self, subscriber: SubscriberHandle) -> bool {
        self.bus.attach(subscriber)
    }

    /// Detach a handle. Returns `false` if it was not attached.
    pub fn unsubscribe(&self, subscriber: &SubscriberHandle) -> bool {
        self.bus.detach(subscriber)
    }

    /// Receive events asynchronously through a channel.
    pub fn event_stream(&self) -> UnboundedReceiver<ControllerEvent> {
        let (subscriber, rx) = ChannelSubscriber::channel();
        self.bus.attach(subscriber);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tracing_test::traced_test;

    fn controller() -> MotorController {
        let mut config = MotorConfig::default();
        config.serial.settle_delay_ms = 0;
        config.serial.read_timeout_ms = 20;
        MotorController::new(&config)
    }

    #[test]
    fn starts_at_rest_uncalibrated_and_disconnected() {
        let controller = controller();
        assert_eq!(controller.mode(), Mode::Rest);
        assert_eq!(controller.position_mm(), UNCALIBRATED_POSITION);
        assert!(!controller.is_calibrated());
        assert_eq!(controller.connection_status(), ConnectionStatus::Disconnected);
        assert!(controller.drain_messages().is_empty());
    }

    #[test]
    fn triggers_work_without_a_link() {
        let controller = controller();
        controller.manual_mode().unwrap();
        assert!(!controller.send("MANUAL:CW"));
        controller.go_rest().unwrap();
        assert_eq!(controller.mode(), Mode::Rest);
    }

    #[tokio::test]
    #[traced_test]
    async fn malformed_position_is_logged_and_mailboxed() {
        let controller = controller();
        let mut events = controller.event_stream();
        let (mut host, device) = tokio::io::duplex(256);
        controller.connect_stream("duplex", Box::new(device)).await;
        let _ = events.recv().await;

        host.write_all(b"POSITION:abc\n").await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !logs_contain("Ignoring malformed device line") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(controller.position_mm(), UNCALIBRATED_POSITION);
        assert_eq!(controller.drain_messages()[0].text, "POSITION:abc");
        assert!(events.try_recv().is_err());

        controller.close().await;
    }
}
