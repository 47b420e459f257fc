//! `ReadDirectoryChangesW` backend
//!
//! Each handle owns its primary receive buffer and an event-signalled
//! OVERLAPPED, both boxed so their addresses stay fixed while the kernel
//! writes into them. A handle must not be dropped while a read is in
//! flight; the task keeps it until `poll` reports the read retired.
//!
//! For more information see the [ReadDirectoryChangesW reference][ref].
//!
//! [ref]: https://learn.microsoft.com/en-us/windows/win32/api/winbase/nf-winbase-readdirectorychangesw

use super::{Backend, Completion, Wake};
use crate::config::WatchConfig;
use dirwatch_core::{OsError, RecordFormat, WatchId};
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use tracing::debug;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_INVALID_HANDLE, ERROR_IO_INCOMPLETE, ERROR_OPERATION_ABORTED,
    FALSE, HANDLE, INVALID_HANDLE_VALUE, TRUE, WAIT_FAILED,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, ReadDirectoryChangesW, FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OVERLAPPED,
    FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE_CREATION, FILE_NOTIFY_CHANGE_DIR_NAME,
    FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_SHARE_DELETE,
    FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, WaitForSingleObject, INFINITE,
};
use windows_sys::Win32::System::IO::{CancelIo, GetOverlappedResult, OVERLAPPED};

/// `STATUS_PENDING`, left in `OVERLAPPED::Internal` while a read is in flight
const STATUS_PENDING: usize = 0x103;

/// `WaitForMultipleObjects` limit
const MAXIMUM_WAIT_OBJECTS: usize = 64;

/// Poll interval once there are more armed tasks than one wait can cover
const OVERFLOW_POLL_MS: u32 = 50;

const NOTIFY_FILTER: u32 = FILE_NOTIFY_CHANGE_FILE_NAME
    | FILE_NOTIFY_CHANGE_DIR_NAME
    | FILE_NOTIFY_CHANGE_LAST_WRITE
    | FILE_NOTIFY_CHANGE_CREATION;

/// Owned Win32 event handle
#[derive(Debug)]
struct Event(HANDLE);

// The event is only ever signalled, reset or waited on, all thread-safe
unsafe impl Send for Event {}
unsafe impl Sync for Event {}

impl Event {
    fn new(manual_reset: bool) -> Result<Self, OsError> {
        let handle = unsafe {
            CreateEventW(
                ptr::null(),
                if manual_reset { TRUE } else { FALSE },
                FALSE,
                ptr::null(),
            )
        };
        if handle.is_null() {
            return Err(OsError::last("CreateEventW"));
        }
        Ok(Self(handle))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0) };
    }
}

impl Wake for Event {
    fn wake(&self) -> Result<(), OsError> {
        if unsafe { SetEvent(self.0) } == 0 {
            return Err(OsError::last("SetEvent"));
        }
        Ok(())
    }
}

/// Open directory plus its in-flight read
pub struct DirectoryHandle {
    directory: HANDLE,
    overlapped: Box<OVERLAPPED>,
    event: Event,
    buffer: Box<[u8]>,
    armed: bool,
}

// Only the worker thread touches a handle
unsafe impl Send for DirectoryHandle {}

impl DirectoryHandle {
    fn retired(&self) -> bool {
        let status = unsafe { ptr::read_volatile(&self.overlapped.Internal) };
        status != STATUS_PENDING
    }
}

impl Drop for DirectoryHandle {
    fn drop(&mut self) {
        unsafe {
            if self.directory != INVALID_HANDLE_VALUE {
                CancelIo(self.directory);
                CloseHandle(self.directory);
                self.directory = INVALID_HANDLE_VALUE;
            }
            // The kernel must be done with the buffer before it is freed
            if self.armed && !self.retired() {
                WaitForSingleObject(self.event.0, INFINITE);
            }
        }
    }
}

/// `ReadDirectoryChangesW` backend
pub struct DirectoryChangesBackend {
    wake: Arc<Event>,
    buffer_size: usize,
    recursive: bool,
}

impl Backend for DirectoryChangesBackend {
    type Handle = DirectoryHandle;

    const FORMAT: RecordFormat = RecordFormat::NotifyInformation;

    fn create(config: &WatchConfig) -> Result<Self, OsError> {
        Ok(Self {
            wake: Arc::new(Event::new(false)?),
            buffer_size: config.buffer_size,
            recursive: config.recursive,
        })
    }

    fn waker(&self) -> Arc<dyn Wake> {
        self.wake.clone()
    }

    fn open(&mut self, id: WatchId, path: &Path) -> Result<DirectoryHandle, OsError> {
        let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();

        let directory = unsafe {
            CreateFileW(
                wide.as_ptr(),
                FILE_LIST_DIRECTORY,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if directory == INVALID_HANDLE_VALUE {
            return Err(OsError::last("CreateFileW"));
        }

        let event = match Event::new(true) {
            Ok(event) => event,
            Err(err) => {
                unsafe { CloseHandle(directory) };
                return Err(err);
            }
        };

        debug!(%id, path = %path.display(), "directory handle opened");
        Ok(DirectoryHandle {
            directory,
            overlapped: Box::new(unsafe { std::mem::zeroed() }),
            event,
            buffer: vec![0u8; self.buffer_size].into_boxed_slice(),
            armed: false,
        })
    }

    fn arm(&mut self, handle: &mut DirectoryHandle) -> Result<(), OsError> {
        if handle.directory == INVALID_HANDLE_VALUE {
            return Err(OsError::from_code(
                "ReadDirectoryChangesW",
                ERROR_INVALID_HANDLE as i32,
            ));
        }
        if unsafe { ResetEvent(handle.event.0) } == 0 {
            return Err(OsError::last("ResetEvent"));
        }

        *handle.overlapped = unsafe { std::mem::zeroed() };
        handle.overlapped.hEvent = handle.event.0;

        let ok = unsafe {
            ReadDirectoryChangesW(
                handle.directory,
                handle.buffer.as_mut_ptr() as *mut c_void,
                handle.buffer.len() as u32,
                if self.recursive { TRUE } else { FALSE },
                NOTIFY_FILTER,
                ptr::null_mut(),
                &mut *handle.overlapped,
                None,
            )
        };
        if ok == 0 {
            return Err(OsError::last("ReadDirectoryChangesW"));
        }

        handle.armed = true;
        Ok(())
    }

    fn poll(&mut self, handle: &mut DirectoryHandle, out: &mut [u8]) -> Completion {
        if handle.directory == INVALID_HANDLE_VALUE {
            // Cancelled: wait for the kernel to let go of the buffer
            if handle.armed && !handle.retired() {
                return Completion::Pending;
            }
            handle.armed = false;
            return Completion::Aborted;
        }
        if !handle.armed {
            return Completion::Pending;
        }

        let mut transferred: u32 = 0;
        let ok = unsafe {
            GetOverlappedResult(handle.directory, &*handle.overlapped, &mut transferred, FALSE)
        };
        if ok == 0 {
            let code = unsafe { GetLastError() };
            if code == ERROR_IO_INCOMPLETE {
                return Completion::Pending;
            }
            handle.armed = false;
            if code == ERROR_OPERATION_ABORTED {
                return Completion::Aborted;
            }
            return Completion::Failed(OsError::from_code("GetOverlappedResult", code as i32));
        }

        handle.armed = false;
        let n = (transferred as usize).min(handle.buffer.len()).min(out.len());
        out[..n].copy_from_slice(&handle.buffer[..n]);
        Completion::Transferred(transferred as usize)
    }

    fn cancel(&mut self, handle: &mut DirectoryHandle) {
        if handle.directory == INVALID_HANDLE_VALUE {
            return;
        }
        unsafe {
            CancelIo(handle.directory);
            CloseHandle(handle.directory);
        }
        handle.directory = INVALID_HANDLE_VALUE;
    }

    fn wait<'a, I>(&mut self, handles: I) -> Result<(), OsError>
    where
        I: IntoIterator<Item = &'a DirectoryHandle>,
    {
        let mut events: Vec<HANDLE> = vec![self.wake.0];
        for handle in handles {
            if handle.armed {
                events.push(handle.event.0);
            }
        }

        let result = if events.len() <= MAXIMUM_WAIT_OBJECTS {
            unsafe { WaitForMultipleObjects(events.len() as u32, events.as_ptr(), FALSE, INFINITE) }
        } else {
            unsafe { WaitForSingleObject(self.wake.0, OVERFLOW_POLL_MS) }
        };

        if result == WAIT_FAILED {
            return Err(OsError::last("WaitForMultipleObjects"));
        }
        Ok(())
    }
}
