//! Platform-specific change-notification backends
//!
//! Every backend exposes the same four capabilities: open a directory,
//! arm one asynchronous read, cancel it, and report its completion. The
//! worker thread is the only caller of any of them.

use crate::config::WatchConfig;
use crossbeam_channel::{bounded, Receiver, Sender};
use dirwatch_core::{OsError, RecordFormat, WatchId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(windows)]
pub mod windows;

#[cfg(not(any(target_os = "linux", windows)))]
pub mod unsupported;

#[cfg(test)]
pub(crate) mod scripted;

/// Backend used by [`WatchService::new`](crate::WatchService::new)
#[cfg(target_os = "linux")]
pub type NativeBackend = linux::InotifyBackend;

/// Backend used by [`WatchService::new`](crate::WatchService::new)
#[cfg(windows)]
pub type NativeBackend = windows::DirectoryChangesBackend;

/// Backend used by [`WatchService::new`](crate::WatchService::new)
#[cfg(not(any(target_os = "linux", windows)))]
pub type NativeBackend = unsupported::UnsupportedBackend;

/// Outcome of polling an armed read
#[derive(Debug)]
pub enum Completion {
    /// Still in flight (or not armed)
    Pending,
    /// Finished; this many bytes were copied into the caller's buffer
    Transferred(usize),
    /// Retired by `cancel`
    Aborted,
    /// Finished with any other error
    Failed(OsError),
}

/// Interrupts the worker's blocking wait from any thread
pub trait Wake: Send + Sync {
    /// Make the current or next `Backend::wait` return promptly
    fn wake(&self) -> Result<(), OsError>;
}

/// OS change-notification capability
pub trait Backend: Send + 'static {
    /// One open directory plus its in-flight read
    type Handle: Send + 'static;

    /// Layout of the batches this backend produces
    const FORMAT: RecordFormat;

    /// Build the backend and its wake primitive
    fn create(config: &WatchConfig) -> Result<Self, OsError>
    where
        Self: Sized;

    /// Wake primitive for the control channel
    fn waker(&self) -> Arc<dyn Wake>;

    /// Open an absolute directory path for change notification
    fn open(&mut self, id: WatchId, path: &Path) -> Result<Self::Handle, OsError>;

    /// Arm one read; at most one may be outstanding per handle
    fn arm(&mut self, handle: &mut Self::Handle) -> Result<(), OsError>;

    /// Non-blocking check of the armed read; on `Transferred(n)` the batch
    /// is in `out[..n]`
    fn poll(&mut self, handle: &mut Self::Handle, out: &mut [u8]) -> Completion;

    /// Abort the pending read and close the directory; idempotent
    fn cancel(&mut self, handle: &mut Self::Handle);

    /// Block until woken or until some armed handle may have completed
    fn wait<'a, I>(&mut self, handles: I) -> Result<(), OsError>
    where
        I: IntoIterator<Item = &'a Self::Handle>,
        Self::Handle: 'a;
}

/// Waker backed by a one-slot channel, for backends without an OS-level
/// wait primitive
#[derive(Debug, Clone)]
pub struct ChannelWaker {
    tx: Sender<()>,
}

/// Receiving side of a [`ChannelWaker`]
#[derive(Debug)]
pub struct ChannelWait {
    rx: Receiver<()>,
}

/// Create a connected waker and wait pair
pub fn channel_waker() -> (ChannelWaker, ChannelWait) {
    let (tx, rx) = bounded(1);
    (ChannelWaker { tx }, ChannelWait { rx })
}

impl Wake for ChannelWaker {
    fn wake(&self) -> Result<(), OsError> {
        // A full slot already guarantees the next wait returns
        let _ = self.tx.try_send(());
        Ok(())
    }
}

impl ChannelWait {
    /// Block until woken, or until `timeout` if given
    pub fn wait(&self, timeout: Option<Duration>) {
        match timeout {
            Some(timeout) => {
                let _ = self.rx.recv_timeout(timeout);
            }
            None => {
                let _ = self.rx.recv();
            }
        }
    }
}
