//! Control channel from caller threads into the worker
//!
//! Callers never touch OS handles. They enqueue a command and wake the
//! worker, which applies commands strictly in FIFO order.

use crate::platform::Wake;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use dirwatch_core::{OsError, WatchId};
use std::path::PathBuf;
use std::sync::Arc;

/// Request for the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Open and start a watch under a pre-allocated id
    Add(WatchId, PathBuf),
    /// Cancel a watch
    Remove(WatchId),
    /// Cancel everything and exit once every task is closed
    Terminate,
}

/// Sending side, held by the service
#[derive(Clone)]
pub struct ControlChannel {
    tx: Sender<ControlCommand>,
    waker: Arc<dyn Wake>,
}

/// Receiving side, held by the worker
#[derive(Debug)]
pub struct ControlReceiver {
    rx: Receiver<ControlCommand>,
}

/// Next step for the worker's command drain
#[derive(Debug, PartialEq, Eq)]
pub enum Polled {
    /// A command to apply
    Command(ControlCommand),
    /// Nothing pending
    Empty,
    /// Every sender is gone
    Closed,
}

/// Create a connected channel whose enqueues wake through `waker`
pub fn control_channel(waker: Arc<dyn Wake>) -> (ControlChannel, ControlReceiver) {
    let (tx, rx) = unbounded();
    (ControlChannel { tx, waker }, ControlReceiver { rx })
}

impl ControlChannel {
    /// Queue a command and wake the worker
    ///
    /// The command is queued even if the wake fails; the error tells the
    /// caller the worker may not notice it promptly.
    pub fn enqueue(&self, command: ControlCommand) -> Result<(), OsError> {
        // Cannot fail while the worker holds the receiver; after it exits
        // nothing is listening anyway
        let _ = self.tx.send(command);
        self.wake()
    }

    /// Force the worker's wait to return
    pub fn wake(&self) -> Result<(), OsError> {
        self.waker.wake()
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("pending", &self.tx.len())
            .finish()
    }
}

impl ControlReceiver {
    /// Pop the next command without blocking
    pub fn poll(&self) -> Polled {
        match self.rx.try_recv() {
            Ok(command) => Polled::Command(command),
            Err(TryRecvError::Empty) => Polled::Empty,
            Err(TryRecvError::Disconnected) => Polled::Closed,
        }
    }
}
