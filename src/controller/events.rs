//! Synchronous publish/subscribe for controller events.
//!
//! Subscribers are notified in registration order on the thread that caused
//! the event. `notify` iterates a snapshot of the subscriber list, so a
//! subscriber may attach or detach (itself or others) from inside its own
//! callback without disturbing delivery for the current event.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = EventBus::new();
//! let handle = bus.subscribe(|event: &ControllerEvent| println!("{event:?}"));
//! bus.notify(&ControllerEvent::PositionChanged { value: 1.0 });
//! bus.detach(&handle);
//! ```

use super::state::{ConnectionStatus, Mode};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which half of a transition a `StateChanged` event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    /// Carries the mode being left
    Before,
    /// Carries the mode just entered
    After,
}

/// Events published by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// Emitted twice per transition, `Before` then `After`
    StateChanged { mode: Mode, phase: TransitionPhase },
    /// A `POSITION:` line was parsed
    PositionChanged { value: f64 },
    /// The link was opened, closed, or failed to open
    ConnectionChanged {
        status: ConnectionStatus,
        detail: Option<String>,
    },
}

/// Receiver of controller events.
///
/// Callbacks may query the controller and attach or detach subscribers.
/// Mode triggers fired from a callback are refused with
/// `MotorError::TriggerInCallback`; react from another task instead (see
/// [`ChannelSubscriber`]).
pub trait Subscriber: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: &ControllerEvent);
}

impl<F> Subscriber for F
where
    F: Fn(&ControllerEvent) + Send + Sync,
{
    fn on_event(&self, event: &ControllerEvent) {
        self(event)
    }
}

/// Shared handle identifying an attached subscriber.
pub type SubscriberHandle = Arc<dyn Subscriber>;

/// Insertion-ordered set of subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<SubscriberHandle>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscriber. Returns `false` if it was already attached.
    pub fn attach(&self, subscriber: SubscriberHandle) -> bool {
        let mut subscribers = self.subscribers.lock();
        if subscribers.iter().any(|s| same_subscriber(s, &subscriber)) {
            return false;
        }
        subscribers.push(subscriber);
        true
    }

    /// Wrap a closure (or any subscriber) and attach it.
    pub fn subscribe<S>(&self, subscriber: S) -> SubscriberHandle
    where
        S: Subscriber + 'static,
    {
        let handle: SubscriberHandle = Arc::new(subscriber);
        self.attach(handle.clone());
        handle
    }

    /// Detach a subscriber. Returns `false` if it was not attached.
    pub fn detach(&self, subscriber: &SubscriberHandle) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| !same_subscriber(s, subscriber));
        subscribers.len() != before
    }

    /// Deliver `event` to every subscriber attached when the call started.
    pub fn notify(&self, event: &ControllerEvent) {
        let snapshot = self.subscribers.lock().clone();
        for subscriber in &snapshot {
            subscriber.on_event(event);
        }
    }

    /// Number of attached subscribers
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Whether no subscriber is attached
    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

fn same_subscriber(a: &SubscriberHandle, b: &SubscriberHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Subscriber that forwards events into an unbounded channel.
///
/// Lets async consumers await events instead of running inside the
/// notifying thread. Events sent after the receiver is dropped are discarded.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ChannelSubscriber {
    /// Create the subscriber and the receiving end of its channel.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_event(&self, event: &ControllerEvent) {
        let _ = self.tx.send(event.clone());
    }
}
