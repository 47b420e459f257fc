//! Fallback for targets without a native backend
//!
//! The service still runs; every `add` ends in an Error notification.

use super::{channel_waker, Backend, ChannelWait, ChannelWaker, Completion, Wake};
use crate::config::WatchConfig;
use dirwatch_core::{OsError, RecordFormat, WatchId};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Handle type that is never constructed
#[derive(Debug)]
pub struct NoHandle;

/// Backend that refuses every watch
pub struct UnsupportedBackend {
    waker: Arc<ChannelWaker>,
    wait: ChannelWait,
}

impl Backend for UnsupportedBackend {
    type Handle = NoHandle;

    const FORMAT: RecordFormat = RecordFormat::NotifyInformation;

    fn create(_config: &WatchConfig) -> Result<Self, OsError> {
        let (waker, wait) = channel_waker();
        Ok(Self {
            waker: Arc::new(waker),
            wait,
        })
    }

    fn waker(&self) -> Arc<dyn Wake> {
        self.waker.clone()
    }

    fn open(&mut self, _id: WatchId, _path: &Path) -> Result<NoHandle, OsError> {
        Err(OsError::new(
            "open",
            io::Error::new(
                io::ErrorKind::Unsupported,
                "directory watching is not supported on this platform",
            ),
        ))
    }

    fn arm(&mut self, _handle: &mut NoHandle) -> Result<(), OsError> {
        Ok(())
    }

    fn poll(&mut self, _handle: &mut NoHandle, _out: &mut [u8]) -> Completion {
        Completion::Aborted
    }

    fn cancel(&mut self, _handle: &mut NoHandle) {}

    fn wait<'a, I>(&mut self, _handles: I) -> Result<(), OsError>
    where
        I: IntoIterator<Item = &'a NoHandle>,
    {
        self.wait.wait(None);
        Ok(())
    }
}
