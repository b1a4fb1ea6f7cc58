//! FIFO of raw device lines awaiting a periodic consumer (e.g. a log drain).

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// A line as received from the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedLine {
    /// Arrival time
    pub timestamp: DateTime<Local>,
    /// Line text, terminator removed
    pub text: String,
}

/// Thread-safe, bounded arrival-order queue.
///
/// When full, the oldest line is discarded to make room.
pub struct Mailbox {
    queue: Mutex<VecDeque<ReceivedLine>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` lines (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a line.
    pub fn push(&self, text: &str) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(ReceivedLine {
            timestamp: Local::now(),
            text: text.to_string(),
        });
    }

    /// Take every queued line at once, oldest first.
    pub fn drain(&self) -> Vec<ReceivedLine> {
        let mut queue = self.queue.lock();
        queue.drain(..).collect()
    }

    /// Number of queued lines
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Lines discarded because the mailbox was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
