//! Notifications delivered to callers

use crate::id::WatchId;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Entry created
    Create,
    /// Entry deleted
    Delete,
    /// Entry contents changed
    Modify,
    /// One half of a rename (old or new name)
    Rename,
    /// A watch-level failure; the payload describes it
    Error,
    /// A watch was registered
    TaskAdd,
    /// A watch ended on its own
    TaskRemove,
    /// The service shut down; always the last notification
    TaskTerminate,
}

impl NotificationKind {
    /// Whether this kind carries a changed path
    pub fn is_change(self) -> bool {
        matches!(
            self,
            NotificationKind::Create
                | NotificationKind::Delete
                | NotificationKind::Modify
                | NotificationKind::Rename
        )
    }

    /// Lowercase name used in CLI output
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Create => "create",
            NotificationKind::Delete => "delete",
            NotificationKind::Modify => "modify",
            NotificationKind::Rename => "rename",
            NotificationKind::Error => "error",
            NotificationKind::TaskAdd => "task_add",
            NotificationKind::TaskRemove => "task_remove",
            NotificationKind::TaskTerminate => "task_terminate",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Absolute path of the changed entry
    Path(PathBuf),
    /// Free-form diagnostic text
    Message(String),
    /// No payload (TaskTerminate)
    Empty,
}

/// A decoded event, owned by whoever popped it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Task that produced it (`INVALID` for TaskTerminate)
    pub id: WatchId,
    /// What happened
    pub kind: NotificationKind,
    /// Path or diagnostic
    pub payload: Payload,
}

impl Notification {
    /// A change to `path` reported by task `id`
    pub fn change(id: WatchId, kind: NotificationKind, path: PathBuf) -> Self {
        debug_assert!(kind.is_change());
        Self {
            id,
            kind,
            payload: Payload::Path(path),
        }
    }

    /// A watch-level error
    pub fn error(id: WatchId, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: NotificationKind::Error,
            payload: Payload::Message(message.into()),
        }
    }

    /// Registration acknowledgment, formatted as `(<id>)<path>`
    pub fn task_added(id: WatchId, requested: &Path) -> Self {
        Self {
            id,
            kind: NotificationKind::TaskAdd,
            payload: Payload::Message(format!("({}){}", id, requested.display())),
        }
    }

    /// A task that ended without being asked to
    pub fn task_removed(id: WatchId, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: NotificationKind::TaskRemove,
            payload: Payload::Message(message.into()),
        }
    }

    /// Service shutdown marker
    pub fn terminated() -> Self {
        Self {
            id: WatchId::INVALID,
            kind: NotificationKind::TaskTerminate,
            payload: Payload::Empty,
        }
    }

    /// Changed path, for change kinds
    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Diagnostic text, for Error/TaskAdd/TaskRemove
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Payload::Message(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Path(path) => write!(f, "[{}] {} {}", self.id, self.kind, path.display()),
            Payload::Message(message) => write!(f, "[{}] {} {}", self.id, self.kind, message),
            Payload::Empty => write!(f, "{}", self.kind),
        }
    }
}
