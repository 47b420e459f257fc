//! Per-subscription watch task
//!
//! Lifecycle: `Idle → Opening → Watching → Cancelling → Closed`.
//!
//! A completed read is handled in three steps, in this order:
//! 1. the backend copies the filled region into the secondary buffer
//! 2. a fresh read is armed into the primary buffer
//! 3. the secondary copy is decoded into notifications
//!
//! Re-arming before decoding lets the OS keep capturing changes while the
//! previous batch is decoded from memory it no longer writes to.

use crate::platform::{Backend, Completion};
use dirwatch_core::record::Action;
use dirwatch_core::{
    DecodeError, Notification, NotificationKind, NotificationQueue, WatchError, WatchId,
};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where a task is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, nothing opened
    Idle,
    /// Directory handle open, no read armed yet
    Opening,
    /// A read is armed
    Watching,
    /// Handle closed, waiting for the pending read to retire
    Cancelling,
    /// Done; the service evicts it
    Closed,
}

/// One directory subscription, owned by the worker
pub struct WatchTask<B: Backend> {
    id: WatchId,
    path: PathBuf,
    handle: Option<B::Handle>,
    backup: Box<[u8]>,
    state: TaskState,
}

impl<B: Backend> WatchTask<B> {
    /// Create an idle task with a secondary buffer of `capacity` bytes
    pub fn new(id: WatchId, capacity: usize) -> Self {
        Self {
            id,
            path: PathBuf::new(),
            handle: None,
            backup: vec![0u8; capacity].into_boxed_slice(),
            state: TaskState::Idle,
        }
    }

    /// Task id
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Resolved absolute directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Directory handle, while one is held
    pub fn handle(&self) -> Option<&B::Handle> {
        self.handle.as_ref()
    }

    /// Resolve `path` and open it; `Idle → Opening`
    ///
    /// Calling it on an already-open task is a no-op.
    pub fn open(&mut self, backend: &mut B, path: &Path) -> Result<(), WatchError> {
        if self.handle.is_some() {
            return Ok(());
        }

        self.path = std::path::absolute(path).map_err(|source| WatchError::PathResolution {
            path: path.to_path_buf(),
            source,
        })?;

        let handle = backend
            .open(self.id, &self.path)
            .map_err(|source| WatchError::Open {
                path: self.path.clone(),
                source,
            })?;

        self.handle = Some(handle);
        self.state = TaskState::Opening;
        Ok(())
    }

    /// Arm a read; `Opening → Watching`
    ///
    /// On failure the handle is closed and the task is `Closed`.
    pub fn start(&mut self, backend: &mut B) -> Result<(), WatchError> {
        let Some(handle) = self.handle.as_mut() else {
            self.state = TaskState::Closed;
            return Err(WatchError::ArmRead {
                path: self.path.clone(),
                source: dirwatch_core::OsError::new(
                    "arm",
                    std::io::Error::new(std::io::ErrorKind::NotConnected, "watch is not open"),
                ),
            });
        };

        match backend.arm(handle) {
            Ok(()) => {
                self.state = TaskState::Watching;
                Ok(())
            }
            Err(source) => {
                backend.cancel(handle);
                self.handle = None;
                self.state = TaskState::Closed;
                Err(WatchError::ArmRead {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    /// Abort the pending read and close the handle; idempotent
    ///
    /// No new read is armed afterwards. The task reaches `Closed` once the
    /// backend reports the read retired.
    pub fn cancel(&mut self, backend: &mut B) {
        match self.state {
            TaskState::Opening | TaskState::Watching => {
                if let Some(handle) = self.handle.as_mut() {
                    backend.cancel(handle);
                }
                debug!(id = %self.id, "watch cancelling");
                self.state = TaskState::Cancelling;
            }
            TaskState::Idle => self.state = TaskState::Closed,
            TaskState::Cancelling | TaskState::Closed => {}
        }
    }

    /// Whether the service should evict this task
    pub fn is_closed(&self) -> bool {
        self.state == TaskState::Closed
    }

    /// Collect the outcome of the pending read, if any, and act on it
    ///
    /// Returns the task's state afterwards.
    pub fn pump(&mut self, backend: &mut B, queue: &NotificationQueue) -> TaskState {
        let Some(handle) = self.handle.as_mut() else {
            self.state = TaskState::Closed;
            return self.state;
        };

        match backend.poll(handle, &mut self.backup) {
            Completion::Pending => {}
            Completion::Aborted => {
                debug!("{}", WatchError::Aborted { id: self.id });
                self.close(backend);
            }
            Completion::Failed(source) => {
                let err = WatchError::UnexpectedCompletion {
                    id: self.id,
                    path: self.path.clone(),
                    source,
                };
                self.report(backend, queue, err);
                // The failed read is already retired
                self.close(backend);
            }
            Completion::Transferred(0) => {
                // Nothing to decode; keep listening
                if self.state == TaskState::Watching {
                    self.rearm(backend, queue);
                } else {
                    self.close(backend);
                }
            }
            Completion::Transferred(len) => {
                let watching = self.state == TaskState::Watching;
                if watching {
                    self.rearm(backend, queue);
                }

                match self.decode(len) {
                    Ok(records) => self.publish(backend, queue, records),
                    Err(source) => {
                        let err = WatchError::Protocol {
                            path: self.path.clone(),
                            source,
                        };
                        self.report(backend, queue, err);
                    }
                }

                if !watching {
                    self.close(backend);
                }
            }
        }

        self.state
    }

    fn decode(&self, len: usize) -> Result<Vec<dirwatch_core::Record>, DecodeError> {
        if len > self.backup.len() {
            return Err(DecodeError::Oversized {
                len,
                capacity: self.backup.len(),
            });
        }
        B::FORMAT.decode(&self.backup[..len])
    }

    fn rearm(&mut self, backend: &mut B, queue: &NotificationQueue) {
        if let Err(err) = self.start(backend) {
            self.report(backend, queue, err);
        }
    }

    /// Queue `err` for the caller; an error that ends the task is reported
    /// as a removal and cancels the task
    fn report(&mut self, backend: &mut B, queue: &NotificationQueue, err: WatchError) {
        if err.is_task_fatal() {
            warn!(id = %self.id, error = %err, "watch ended");
            queue.push(Notification::task_removed(self.id, err.to_string()));
            self.cancel(backend);
        } else {
            warn!(id = %self.id, error = %err, "watch degraded");
            queue.push(Notification::error(self.id, err.to_string()));
        }
    }

    fn publish(
        &mut self,
        backend: &mut B,
        queue: &NotificationQueue,
        records: Vec<dirwatch_core::Record>,
    ) {
        debug!(id = %self.id, count = records.len(), "decoded change batch");

        for record in records {
            let kind = match record.action {
                Action::Added => NotificationKind::Create,
                Action::Removed => NotificationKind::Delete,
                Action::Modified => NotificationKind::Modify,
                Action::RenamedFrom | Action::RenamedTo => NotificationKind::Rename,
                Action::Overflow => {
                    let err = WatchError::Overflow {
                        path: self.path.clone(),
                    };
                    self.report(backend, queue, err);
                    continue;
                }
                Action::Invalidated => {
                    // Only the first one ends the task
                    if matches!(self.state, TaskState::Opening | TaskState::Watching) {
                        let err = WatchError::Invalidated {
                            id: self.id,
                            path: self.path.clone(),
                        };
                        self.report(backend, queue, err);
                    }
                    continue;
                }
            };
            queue.push(Notification::change(self.id, kind, self.path.join(&record.name)));
        }
    }

    fn close(&mut self, backend: &mut B) {
        if let Some(mut handle) = self.handle.take() {
            backend.cancel(&mut handle);
        }
        self.state = TaskState::Closed;
    }
}
