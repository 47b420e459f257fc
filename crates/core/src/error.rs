//! Error taxonomy for watch operations
//!
//! None of these errors cross the public service API as a `Result`: the
//! worker renders them into `Error`/`TaskRemove` notifications instead.

use crate::id::WatchId;
use crate::record::DecodeError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// An OS call that failed, with the name of the operation
///
/// Renders as "`<op>` failed: <OS message>".
#[derive(Debug, Error)]
#[error("`{op}` failed: {source}")]
pub struct OsError {
    /// Name of the failing OS operation
    pub op: &'static str,
    /// Underlying OS error
    pub source: io::Error,
}

impl OsError {
    /// Wrap an existing I/O error
    pub fn new(op: &'static str, source: io::Error) -> Self {
        Self { op, source }
    }

    /// Capture the calling thread's last OS error
    pub fn last(op: &'static str) -> Self {
        Self::new(op, io::Error::last_os_error())
    }

    /// Build from a raw OS error code
    pub fn from_code(op: &'static str, code: i32) -> Self {
        Self::new(op, io::Error::from_raw_os_error(code))
    }

    /// Raw OS error code, if there is one
    pub fn code(&self) -> Option<i32> {
        self.source.raw_os_error()
    }
}

/// Everything that can go wrong with one watch
#[derive(Debug, Error)]
pub enum WatchError {
    /// The requested path could not be made absolute
    #[error("failed to resolve absolute path for {}: {source}", path.display())]
    PathResolution {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The directory could not be opened for change notification
    #[error("failed to open {} for change notification: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: OsError,
    },

    /// The OS rejected the asynchronous read request
    #[error("failed to arm change read on {}: {source}", path.display())]
    ArmRead {
        path: PathBuf,
        #[source]
        source: OsError,
    },

    /// A change batch violated the record format
    #[error("malformed change records from {}: {source}", path.display())]
    Protocol {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// The pending read was cancelled; only used for task teardown
    #[error("watch {id} was aborted")]
    Aborted { id: WatchId },

    /// The pending read finished with an unexpected error
    #[error("watch {id} on {} ended unexpectedly: {source}", path.display())]
    UnexpectedCompletion {
        id: WatchId,
        path: PathBuf,
        #[source]
        source: OsError,
    },

    /// The OS dropped change records
    #[error("change queue for {} overflowed; events were lost", path.display())]
    Overflow { path: PathBuf },

    /// The watched directory itself went away
    #[error("watch {id} on {} stopped: directory is no longer available", path.display())]
    Invalidated { id: WatchId, path: PathBuf },
}

impl WatchError {
    /// Whether this error ends the task it happened on
    pub fn is_task_fatal(&self) -> bool {
        !matches!(self, WatchError::Protocol { .. } | WatchError::Overflow { .. })
    }
}
