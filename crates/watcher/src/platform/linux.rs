//! inotify backend
//!
//! Each task gets its own inotify instance watching one directory, so a
//! task's file descriptor plays the role of its directory handle. The
//! kernel queues events between reads, which means there is no in-flight
//! receive buffer: a completed read copies straight into the task's
//! secondary buffer. inotify has no subtree mode and this backend does not
//! emulate one.

use super::{Backend, Completion, Wake};
use crate::config::WatchConfig;
use dirwatch_core::{OsError, RecordFormat, WatchId};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn watch_mask() -> AddWatchFlags {
    AddWatchFlags::IN_CREATE
        | AddWatchFlags::IN_DELETE
        | AddWatchFlags::IN_MODIFY
        | AddWatchFlags::IN_ATTRIB
        | AddWatchFlags::IN_MOVED_FROM
        | AddWatchFlags::IN_MOVED_TO
        | AddWatchFlags::IN_DELETE_SELF
        | AddWatchFlags::IN_MOVE_SELF
        | AddWatchFlags::IN_ONLYDIR
}

fn os_error(op: &'static str, errno: Errno) -> OsError {
    OsError::new(op, io::Error::from(errno))
}

/// Open inotify instance for one task
#[derive(Debug)]
pub struct InotifyHandle {
    inotify: Option<Inotify>,
    armed: bool,
}

/// Waker writing to an eventfd the worker polls alongside every task
#[derive(Debug)]
struct EventFdWaker {
    fd: EventFd,
}

impl Wake for EventFdWaker {
    fn wake(&self) -> Result<(), OsError> {
        match self.fd.write(1) {
            // Counter saturated: the worker is already due to wake
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(errno) => Err(os_error("write(eventfd)", errno)),
        }
    }
}

impl EventFdWaker {
    fn reset(&self) {
        match self.fd.read() {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(errno) => warn!(error = %errno, "failed to reset worker eventfd"),
        }
    }
}

/// inotify-based backend
pub struct InotifyBackend {
    waker: Arc<EventFdWaker>,
}

impl Backend for InotifyBackend {
    type Handle = InotifyHandle;

    const FORMAT: RecordFormat = RecordFormat::Inotify;

    fn create(config: &WatchConfig) -> Result<Self, OsError> {
        let fd = EventFd::from_flags(EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)
            .map_err(|errno| os_error("eventfd", errno))?;

        if config.recursive {
            info!("inotify has no subtree mode; only top-level changes will be reported");
        }

        Ok(Self {
            waker: Arc::new(EventFdWaker { fd }),
        })
    }

    fn waker(&self) -> Arc<dyn Wake> {
        self.waker.clone()
    }

    fn open(&mut self, id: WatchId, path: &Path) -> Result<InotifyHandle, OsError> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(|errno| os_error("inotify_init1", errno))?;
        inotify
            .add_watch(path, watch_mask())
            .map_err(|errno| os_error("inotify_add_watch", errno))?;

        debug!(
            %id,
            fd = inotify.as_fd().as_raw_fd(),
            path = %path.display(),
            "inotify watch opened"
        );
        Ok(InotifyHandle {
            inotify: Some(inotify),
            armed: false,
        })
    }

    fn arm(&mut self, handle: &mut InotifyHandle) -> Result<(), OsError> {
        if handle.inotify.is_none() {
            return Err(OsError::new(
                "inotify arm",
                io::Error::new(io::ErrorKind::NotConnected, "watch handle is closed"),
            ));
        }
        handle.armed = true;
        Ok(())
    }

    fn poll(&mut self, handle: &mut InotifyHandle, out: &mut [u8]) -> Completion {
        let fd = match &handle.inotify {
            Some(inotify) => inotify.as_fd().as_raw_fd(),
            // Closing the descriptor retires the read at once
            None => return Completion::Aborted,
        };
        if !handle.armed {
            return Completion::Pending;
        }

        match nix::unistd::read(fd, out) {
            Ok(n) => {
                handle.armed = false;
                Completion::Transferred(n)
            }
            Err(Errno::EAGAIN | Errno::EINTR) => Completion::Pending,
            Err(errno) => {
                handle.armed = false;
                Completion::Failed(os_error("read(inotify)", errno))
            }
        }
    }

    fn cancel(&mut self, handle: &mut InotifyHandle) {
        if let Some(inotify) = handle.inotify.take() {
            debug!(fd = inotify.as_fd().as_raw_fd(), "closing inotify watch");
        }
    }

    fn wait<'a, I>(&mut self, handles: I) -> Result<(), OsError>
    where
        I: IntoIterator<Item = &'a InotifyHandle>,
    {
        let mut fds = vec![PollFd::new(self.waker.fd.as_fd(), PollFlags::POLLIN)];
        for handle in handles {
            match &handle.inotify {
                Some(inotify) if handle.armed => {
                    fds.push(PollFd::new(inotify.as_fd(), PollFlags::POLLIN));
                }
                Some(_) => {}
                // An abort is waiting to be collected
                None => return Ok(()),
            }
        }

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) | Err(Errno::EINTR) => {}
            Err(errno) => return Err(os_error("poll", errno)),
        }

        let woken = fds[0]
            .revents()
            .is_some_and(|events| events.contains(PollFlags::POLLIN));
        if woken {
            self.waker.reset();
        }
        Ok(())
    }
}
