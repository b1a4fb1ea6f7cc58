//! Sole writer of outbound commands.
//!
//! Used by mode entry actions and by out-of-band raw commands such as jog
//! requests. Dispatch is fire-and-forget: it only queues the line on the
//! serial link and never waits for the device.

use crate::hardware::SerialLink;
use crate::protocol::Command;
use std::sync::Arc;
use tracing::debug;

/// Forwards commands to the serial link.
#[derive(Clone)]
pub struct CommandDispatcher {
    link: Arc<SerialLink>,
}

impl CommandDispatcher {
    /// Create a dispatcher writing to `link`
    pub fn new(link: Arc<SerialLink>) -> Self {
        Self { link }
    }

    /// Queue a typed command. Returns whether a link was open to take it.
    pub fn dispatch(&self, command: &Command) -> bool {
        self.send(&command.to_string())
    }

    /// Queue a raw line. Silently dropped when no link is open.
    pub fn send(&self, line: &str) -> bool {
        let queued = self.link.send(line);
        if queued {
            debug!(command = %line, "-> Queued");
        } else {
            debug!(command = %line, "Dropped command; serial link not open");
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerialConfig;
    use crate::hardware::LineSink;
    use crate::protocol::ManualCommand;
    use tokio::io::AsyncReadExt;

    struct Discard;

    impl LineSink for Discard {
        fn on_line(&self, _line: &str) {}
    }

    #[tokio::test]
    async fn dispatch_without_link_is_dropped() {
        let dispatcher = CommandDispatcher::new(Arc::new(SerialLink::new(SerialConfig::default())));
        assert!(!dispatcher.dispatch(&Command::Rest));
        assert!(!dispatcher.send("MANUAL:CW"));
    }

    #[tokio::test]
    async fn dispatch_renders_typed_commands() {
        let link = Arc::new(SerialLink::new(SerialConfig::default()));
        let (mut host, device) = tokio::io::duplex(128);
        link.attach("duplex", Box::new(device), Arc::new(Discard));

        let dispatcher = CommandDispatcher::new(link.clone());
        assert!(dispatcher.dispatch(&Command::Target(3.25)));
        assert!(dispatcher.dispatch(&Command::Manual(ManualCommand::Stop)));
        link.close().await;

        let mut sent = String::new();
        host.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "TARGET:3.250000\nMANUAL:STOP\n");
    }
}
