//! Watch identifiers and their allocator

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one watch subscription
///
/// Ids are allocated by a single [`IdAllocator`] per service and are never
/// reused, so a stale id can never be confused with a newer task.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct WatchId(u64);

impl WatchId {
    /// Sentinel returned when the service cannot accept a watch
    pub const INVALID: WatchId = WatchId(0);

    /// Wrap a raw id value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Check whether this is a real, allocated id
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WatchId({})", self.0)
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source, safe to share between caller threads
#[derive(Debug, Default)]
pub struct IdAllocator {
    last: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator whose first id is 1
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Allocate the next id (pre-incremented, so never `INVALID`)
    pub fn next(&self) -> WatchId {
        WatchId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Most recently allocated id, or `INVALID` if none yet
    pub fn last(&self) -> WatchId {
        WatchId(self.last.load(Ordering::SeqCst))
    }
}
