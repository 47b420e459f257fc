//! Data model for the dirwatch directory-change service
//!
//! This crate provides:
//! - Watch ids and their monotonic allocator
//! - Notifications and the thread-safe notification queue
//! - Bounds-checked decoding of raw change-record batches
//! - The error taxonomy shared by every backend

pub mod error;
pub mod id;
pub mod notification;
pub mod queue;
pub mod record;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-exports
pub use error::{OsError, WatchError};
pub use id::{IdAllocator, WatchId};
pub use notification::{Notification, NotificationKind, Payload};
pub use queue::NotificationQueue;
pub use record::{Action, DecodeError, Record, RecordFormat};
