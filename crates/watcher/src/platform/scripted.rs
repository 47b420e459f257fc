//! In-memory backend for driving tasks and the service deterministically
//!
//! Tests hold a [`Script`] and feed raw batches to individual watches; the
//! backend hands each batch out as the completion of that watch's next
//! armed read.

use super::{channel_waker, Backend, ChannelWait, ChannelWaker, Completion, Wake};
use crate::config::WatchConfig;
use dirwatch_core::record::{inotify_mask, Action};
use dirwatch_core::testing::InotifyWriter;
use dirwatch_core::{OsError, RecordFormat, WatchId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
enum Delivery {
    Bytes(Vec<u8>),
    Fail(i32),
}

#[derive(Debug, Default)]
struct ScriptState {
    fail_open: HashSet<PathBuf>,
    fail_arm: HashSet<PathBuf>,
    deliveries: HashMap<WatchId, VecDeque<Delivery>>,
    arms: HashMap<WatchId, usize>,
    open_handles: usize,
    fail_wake: bool,
}

/// Test-side control over a [`ScriptedBackend`]
#[derive(Clone)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
    waker: ChannelWaker,
}

/// Waker handed to the control channel; can be told to fail
struct ScriptedWaker {
    state: Arc<Mutex<ScriptState>>,
    waker: ChannelWaker,
}

impl Wake for ScriptedWaker {
    fn wake(&self) -> Result<(), OsError> {
        if self.state.lock().fail_wake {
            return Err(OsError::from_code("scripted wake", 5));
        }
        self.waker.wake()
    }
}

/// Handle for one scripted watch
#[derive(Debug)]
pub struct ScriptedHandle {
    id: WatchId,
    path: PathBuf,
    open: bool,
    armed: bool,
}

/// Backend whose completions come from a [`Script`]
pub struct ScriptedBackend {
    script: Script,
    wait: ChannelWait,
}

impl Script {
    /// A fresh script and the backend it drives
    pub fn new() -> (Script, ScriptedBackend) {
        let (waker, wait) = channel_waker();
        let script = Script {
            state: Arc::new(Mutex::new(ScriptState::default())),
            waker,
        };
        let backend = ScriptedBackend {
            script: script.clone(),
            wait,
        };
        (script, backend)
    }

    /// Make `open` fail for any path ending in `path`
    pub fn fail_open(&self, path: impl Into<PathBuf>) {
        self.state.lock().fail_open.insert(path.into());
    }

    /// Make `arm` fail for any path ending in `path`
    pub fn fail_arm(&self, path: impl Into<PathBuf>) {
        self.state.lock().fail_arm.insert(path.into());
    }

    /// Make every control-channel wake fail
    ///
    /// The worker still notices commands at its next timed wait.
    pub fn fail_wake(&self) {
        self.state.lock().fail_wake = true;
    }

    /// Queue a raw batch for `id`'s next read
    pub fn deliver(&self, id: WatchId, bytes: Vec<u8>) {
        self.push(id, Delivery::Bytes(bytes));
    }

    /// Queue a batch built from unnamed records for `id`'s next read
    pub fn deliver_records(&self, id: WatchId, actions: Vec<Action>) {
        let mut writer = InotifyWriter::new();
        for action in actions {
            let mask = match action {
                Action::Added => inotify_mask::IN_CREATE,
                Action::Removed => inotify_mask::IN_DELETE,
                Action::Modified => inotify_mask::IN_MODIFY,
                Action::RenamedFrom => inotify_mask::IN_MOVED_FROM,
                Action::RenamedTo => inotify_mask::IN_MOVED_TO,
                Action::Overflow => inotify_mask::IN_Q_OVERFLOW,
                Action::Invalidated => inotify_mask::IN_DELETE_SELF,
            };
            writer = writer.event(mask, "");
        }
        self.deliver(id, writer.finish());
    }

    /// Make `id`'s next read complete with OS error `code`
    pub fn fail(&self, id: WatchId, code: i32) {
        self.push(id, Delivery::Fail(code));
    }

    /// How many reads have been armed for `id`
    pub fn armed(&self, id: WatchId) -> usize {
        self.state.lock().arms.get(&id).copied().unwrap_or(0)
    }

    /// Handles opened and not yet cancelled
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    fn push(&self, id: WatchId, delivery: Delivery) {
        self.state
            .lock()
            .deliveries
            .entry(id)
            .or_default()
            .push_back(delivery);
        let _ = self.waker.wake();
    }
}

fn matches_any(set: &HashSet<PathBuf>, path: &Path) -> bool {
    set.iter().any(|suffix| path.ends_with(suffix))
}

impl Backend for ScriptedBackend {
    type Handle = ScriptedHandle;

    const FORMAT: RecordFormat = RecordFormat::Inotify;

    fn create(_config: &WatchConfig) -> Result<Self, OsError> {
        Ok(Script::new().1)
    }

    fn waker(&self) -> Arc<dyn Wake> {
        Arc::new(ScriptedWaker {
            state: self.script.state.clone(),
            waker: self.script.waker.clone(),
        })
    }

    fn open(&mut self, id: WatchId, path: &Path) -> Result<ScriptedHandle, OsError> {
        let mut state = self.script.state.lock();
        if matches_any(&state.fail_open, path) {
            return Err(OsError::from_code("scripted open", 2));
        }
        state.open_handles += 1;
        Ok(ScriptedHandle {
            id,
            path: path.to_path_buf(),
            open: true,
            armed: false,
        })
    }

    fn arm(&mut self, handle: &mut ScriptedHandle) -> Result<(), OsError> {
        let mut state = self.script.state.lock();
        if !handle.open || matches_any(&state.fail_arm, &handle.path) {
            return Err(OsError::from_code("scripted arm", 9));
        }
        *state.arms.entry(handle.id).or_default() += 1;
        handle.armed = true;
        Ok(())
    }

    fn poll(&mut self, handle: &mut ScriptedHandle, out: &mut [u8]) -> Completion {
        if !handle.open {
            handle.armed = false;
            return Completion::Aborted;
        }
        if !handle.armed {
            return Completion::Pending;
        }

        let next = self
            .script
            .state
            .lock()
            .deliveries
            .get_mut(&handle.id)
            .and_then(VecDeque::pop_front);
        match next {
            None => Completion::Pending,
            Some(Delivery::Bytes(bytes)) => {
                handle.armed = false;
                let n = bytes.len().min(out.len());
                out[..n].copy_from_slice(&bytes[..n]);
                Completion::Transferred(bytes.len())
            }
            Some(Delivery::Fail(code)) => {
                handle.armed = false;
                Completion::Failed(OsError::from_code("scripted read", code))
            }
        }
    }

    fn cancel(&mut self, handle: &mut ScriptedHandle) {
        if handle.open {
            handle.open = false;
            self.script.state.lock().open_handles -= 1;
        }
    }

    fn wait<'a, I>(&mut self, handles: I) -> Result<(), OsError>
    where
        I: IntoIterator<Item = &'a ScriptedHandle>,
    {
        {
            let state = self.script.state.lock();
            for handle in handles {
                let ready = state
                    .deliveries
                    .get(&handle.id)
                    .is_some_and(|queue| !queue.is_empty());
                if !handle.open || (handle.armed && ready) {
                    return Ok(());
                }
            }
        }
        self.wait.wait(Some(Duration::from_millis(100)));
        Ok(())
    }
}
