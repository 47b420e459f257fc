//! Asynchronous directory watching
//!
//! [`WatchService`] lets any thread subscribe to directories and poll for
//! typed change notifications. One worker thread owns every OS handle and
//! receive buffer; callers only talk to it through a control channel and
//! read results from a notification queue.
//!
//! ```no_run
//! use dirwatch::{WatchConfig, WatchService};
//! use std::time::Duration;
//!
//! let service = WatchService::new(WatchConfig::default())?;
//! let id = service.add("/tmp");
//! while let Some(notification) = service.select_timeout(Duration::from_secs(1)) {
//!     println!("{notification}");
//! }
//! service.remove(id);
//! service.stop();
//! # Ok::<(), dirwatch::ConfigError>(())
//! ```
//!
//! # Caller responsibilities
//!
//! - Watch-level failures are notifications, not return values. A caller
//!   that ignores `Error` and `TaskRemove` notifications simply stops
//!   hearing about the affected directory.
//! - The notification queue is unbounded. A caller that never polls makes
//!   it grow without limit.
//! - `remove` is asynchronous. A few notifications for the removed id may
//!   still arrive if they were produced before the removal was applied.
//! - Events are not debounced or coalesced; every decoded record becomes
//!   one notification. The two halves of a rename are two unrelated
//!   `Rename` notifications.
//! - On Linux only the top level of a directory is watched.

pub mod config;
pub mod control;
pub mod platform;
pub mod service;
pub mod task;

pub use config::{ConfigError, WatchConfig};
pub use platform::{Backend, Completion, NativeBackend, Wake};
pub use service::WatchService;
pub use task::{TaskState, WatchTask};

pub use dirwatch_core::{Notification, NotificationKind, Payload, WatchId};
