//! Unbounded FIFO mailbox between the worker and polling callers
//!
//! There is no capacity bound: a caller that never polls makes the queue
//! grow without limit. Draining it is the caller's job.

use crate::notification::Notification;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::Duration;

/// Thread-safe notification queue
///
/// Clones share the same underlying queue.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: Sender<Notification>,
    rx: Receiver<Notification>,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append a notification; never blocks
    pub fn push(&self, notification: Notification) {
        // Cannot fail: `self` keeps the receiving end alive
        let _ = self.tx.send(notification);
    }

    /// Take the oldest notification, if any; never blocks
    pub fn pop(&self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Take the oldest notification, waiting up to `timeout` for one
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Notification> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Number of queued notifications
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
