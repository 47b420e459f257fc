//! Watch service and its worker thread
//!
//! The service is a thin front: it allocates ids, enqueues control
//! commands and pops notifications. Everything that touches a directory
//! handle happens on one worker thread, spawned by the first `add`.

use crate::config::{ConfigError, WatchConfig};
use crate::control::{control_channel, ControlChannel, ControlCommand, ControlReceiver, Polled};
use crate::platform::{Backend, NativeBackend};
use crate::task::{TaskState, WatchTask};
use ahash::AHashMap;
use dirwatch_core::{IdAllocator, Notification, NotificationQueue, WatchId};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WAKE_RETRIES: u32 = 3;
const WAKE_RETRY_DELAY: Duration = Duration::from_millis(10);

enum ServiceState<B> {
    /// No worker yet; holds a backend supplied up front, if any
    Idle(Option<B>),
    Running {
        control: ControlChannel,
        worker: JoinHandle<()>,
    },
    /// Terminated for good
    Stopped,
}

/// Directory watch service
///
/// `add`, `remove` and `select` never block on I/O and never fail because
/// of a problem with one watch; such problems arrive later as
/// [`NotificationKind::Error`](dirwatch_core::NotificationKind::Error) or
/// [`NotificationKind::TaskRemove`](dirwatch_core::NotificationKind::TaskRemove)
/// notifications.
pub struct WatchService<B: Backend = NativeBackend> {
    config: WatchConfig,
    ids: IdAllocator,
    queue: NotificationQueue,
    state: Mutex<ServiceState<B>>,
}

impl WatchService<NativeBackend> {
    /// Service on this platform's native backend
    pub fn new(config: WatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, None))
    }
}

impl<B: Backend> WatchService<B> {
    /// Service on an already constructed backend
    pub fn with_backend(config: WatchConfig, backend: B) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, Some(backend)))
    }

    fn build(config: WatchConfig, backend: Option<B>) -> Self {
        Self {
            config,
            ids: IdAllocator::new(),
            queue: NotificationQueue::new(),
            state: Mutex::new(ServiceState::Idle(backend)),
        }
    }

    /// Configuration the service was built with
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Start watching `path`
    ///
    /// Returns the new watch's id at once; a TaskAdd or Error notification
    /// carrying that id follows. Returns [`WatchId::INVALID`] if the worker
    /// cannot be started or the service has been stopped.
    pub fn add(&self, path: impl AsRef<Path>) -> WatchId {
        let mut state = self.state.lock();
        let Some(control) = self.ensure_running(&mut state) else {
            return WatchId::INVALID;
        };

        let id = self.ids.next();
        if let Err(err) = control.enqueue(ControlCommand::Add(id, path.as_ref().to_path_buf())) {
            warn!(%id, error = %err, "failed to wake worker after add");
        }
        id
    }

    /// Stop watching `id`
    ///
    /// Returns false if the worker is not running. Removal is asynchronous:
    /// notifications already queued for `id` are still delivered, and
    /// removing an unknown or already removed id does nothing.
    pub fn remove(&self, id: WatchId) -> bool {
        let state = self.state.lock();
        let ServiceState::Running { control, worker } = &*state else {
            return false;
        };
        if worker.is_finished() {
            return false;
        }

        if let Err(err) = control.enqueue(ControlCommand::Remove(id)) {
            warn!(%id, error = %err, "failed to wake worker after remove");
        }
        true
    }

    /// Cancel every watch and wait for the worker to exit
    ///
    /// Idempotent. Afterwards no directory handle is open, the service
    /// accepts no new watches, and exactly one TaskTerminate notification
    /// has been queued over the service's lifetime. If the worker cannot be
    /// woken this blocks until its next wait returns on its own.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, ServiceState::Stopped) {
            ServiceState::Stopped => {}
            ServiceState::Idle(_) => {
                self.queue.push(Notification::terminated());
                info!("Watch service stopped");
            }
            ServiceState::Running { control, worker } => {
                if let Err(err) = control.enqueue(ControlCommand::Terminate) {
                    warn!(error = %err, "failed to wake worker for terminate");
                    retry_wake(&control);
                }
                if worker.join().is_err() {
                    error!("watch worker panicked");
                    self.queue.push(Notification::terminated());
                }
                info!("Watch service stopped");
            }
        }
    }

    /// Whether the worker thread is alive
    pub fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), ServiceState::Running { worker, .. } if !worker.is_finished())
    }

    /// Pop the next notification without blocking
    pub fn select(&self) -> Option<Notification> {
        self.queue.pop()
    }

    /// Pop the next notification, waiting up to `timeout`
    pub fn select_timeout(&self, timeout: Duration) -> Option<Notification> {
        self.queue.pop_timeout(timeout)
    }

    /// Pop everything queued right now
    pub fn drain(&self) -> Vec<Notification> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    fn ensure_running(&self, state: &mut ServiceState<B>) -> Option<ControlChannel> {
        match state {
            ServiceState::Running { control, worker } => {
                if !worker.is_finished() {
                    return Some(control.clone());
                }
                // The worker gave up on its own and already said so
                if let ServiceState::Running { worker, .. } =
                    std::mem::replace(state, ServiceState::Stopped)
                {
                    let _ = worker.join();
                }
                None
            }
            ServiceState::Stopped => None,
            ServiceState::Idle(backend) => {
                let backend = match backend.take() {
                    Some(backend) => backend,
                    None => match B::create(&self.config) {
                        Ok(backend) => backend,
                        Err(err) => {
                            error!(error = %err, "failed to create watch backend");
                            return None;
                        }
                    },
                };

                let (control, receiver) = control_channel(backend.waker());
                let worker = Worker {
                    backend,
                    control: receiver,
                    queue: self.queue.clone(),
                    tasks: AHashMap::new(),
                    buffer_size: self.config.buffer_size,
                    terminating: false,
                };

                let spawned = thread::Builder::new()
                    .name(self.config.thread_name.clone())
                    .spawn(move || worker.run());
                match spawned {
                    Ok(worker) => {
                        info!(thread = %self.config.thread_name, "Watch service started");
                        *state = ServiceState::Running {
                            control: control.clone(),
                            worker,
                        };
                        Some(control)
                    }
                    Err(err) => {
                        error!(error = %err, "failed to spawn watch worker");
                        None
                    }
                }
            }
        }
    }
}

impl<B: Backend> Drop for WatchService<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Terminate is already queued; without a wake the worker still sees it
/// once its next wait returns
fn retry_wake(control: &ControlChannel) {
    for attempt in 1..=WAKE_RETRIES {
        thread::sleep(WAKE_RETRY_DELAY * attempt);
        match control.wake() {
            Ok(()) => return,
            Err(err) => warn!(attempt, error = %err, "failed to wake worker for terminate"),
        }
    }
    error!("watch worker cannot be woken; waiting for it to notice terminate");
}

/// State owned by the worker thread
struct Worker<B: Backend> {
    backend: B,
    control: ControlReceiver,
    queue: NotificationQueue,
    tasks: AHashMap<WatchId, WatchTask<B>>,
    buffer_size: usize,
    terminating: bool,
}

impl<B: Backend> Worker<B> {
    fn run(mut self) {
        debug!("watch worker running");

        loop {
            if !self.terminating {
                self.apply_commands();
            }
            self.pump();

            if self.terminating && self.tasks.is_empty() {
                break;
            }

            let handles = self.tasks.values().filter_map(WatchTask::handle);
            if let Err(err) = self.backend.wait(handles) {
                error!(error = %err, "watch worker wait failed");
                self.queue.push(Notification::error(
                    WatchId::INVALID,
                    format!("watch worker failed: {err}"),
                ));
                self.terminate();
                // Dropping a handle waits out its pending read
                self.tasks.clear();
                break;
            }
        }

        debug!("watch worker exiting");
        self.queue.push(Notification::terminated());
    }

    /// Apply every queued command in order, up to and including Terminate
    fn apply_commands(&mut self) {
        loop {
            match self.control.poll() {
                Polled::Command(ControlCommand::Add(id, path)) => self.add(id, path),
                Polled::Command(ControlCommand::Remove(id)) => self.remove(id),
                Polled::Command(ControlCommand::Terminate) | Polled::Closed => {
                    self.terminate();
                    return;
                }
                Polled::Empty => return,
            }
        }
    }

    fn add(&mut self, id: WatchId, requested: PathBuf) {
        let mut task = WatchTask::new(id, self.buffer_size);
        let started = task
            .open(&mut self.backend, &requested)
            .and_then(|()| task.start(&mut self.backend));

        match started {
            Ok(()) => {
                info!(%id, path = %task.path().display(), "Watching directory");
                self.queue.push(Notification::task_added(id, &requested));
                self.tasks.insert(id, task);
            }
            Err(err) => {
                warn!(%id, error = %err, "failed to add watch");
                self.queue.push(Notification::error(id, err.to_string()));
            }
        }
    }

    fn remove(&mut self, id: WatchId) {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                info!(%id, path = %task.path().display(), "Removing watch");
                task.cancel(&mut self.backend);
            }
            None => debug!(%id, "remove for unknown watch ignored"),
        }
    }

    fn terminate(&mut self) {
        if !self.terminating {
            info!(tasks = self.tasks.len(), "Terminating watch worker");
        }
        self.terminating = true;
        for task in self.tasks.values_mut() {
            task.cancel(&mut self.backend);
        }
    }

    /// Handle every completion that is ready and evict closed tasks
    fn pump(&mut self) {
        let backend = &mut self.backend;
        let queue = &self.queue;
        self.tasks
            .retain(|_, task| task.pump(backend, queue) != TaskState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::scripted::{Script, ScriptedBackend};
    use dirwatch_core::record::inotify_mask::{IN_CREATE, IN_DELETE};
    use dirwatch_core::testing::InotifyWriter;
    use dirwatch_core::NotificationKind;
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn service() -> (Script, WatchService<ScriptedBackend>) {
        let (script, backend) = Script::new();
        let service = WatchService::with_backend(WatchConfig::default(), backend).unwrap();
        (script, service)
    }

    fn next(service: &WatchService<ScriptedBackend>) -> Notification {
        service
            .select_timeout(TIMEOUT)
            .expect("timed out waiting for a notification")
    }

    fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn added(service: &WatchService<ScriptedBackend>, path: &str) -> WatchId {
        let id = service.add(path);
        assert!(id.is_valid());
        let ack = next(service);
        assert_eq!(ack.kind, NotificationKind::TaskAdd);
        assert_eq!(ack.id, id);
        id
    }

    fn create(name: &str) -> Vec<u8> {
        InotifyWriter::new().event(IN_CREATE, name).finish()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (_script, backend) = Script::new();
        let config = WatchConfig {
            buffer_size: 16,
            ..WatchConfig::default()
        };
        assert!(WatchService::with_backend(config, backend).is_err());
    }

    #[test]
    fn test_add_acknowledges_before_events() {
        let (script, service) = service();
        assert!(!service.is_running());

        let id = service.add("d");
        assert_eq!(id, WatchId::from_raw(1));
        assert!(service.is_running());

        let ack = next(&service);
        assert_eq!(ack.kind, NotificationKind::TaskAdd);
        assert_eq!(ack.message(), Some("(1)d"));

        script.deliver(id, create("a.txt"));
        let change = next(&service);
        assert_eq!(change.kind, NotificationKind::Create);
        assert_eq!(change.id, id);
        let path = change.path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("d/a.txt"));
    }

    #[test]
    fn test_open_failure_reports_error_and_registers_nothing() {
        let (script, service) = service();
        script.fail_open("missing");

        let id = service.add("missing");
        let err = next(&service);
        assert_eq!(err.kind, NotificationKind::Error);
        assert_eq!(err.id, id);
        assert!(err.message().unwrap().contains("failed to open"));
        assert_eq!(script.open_handles(), 0);

        // The worker is still serving other watches
        added(&service, "present");
    }

    #[test]
    fn test_arm_failure_reports_error() {
        let (script, service) = service();
        script.fail_arm("d");

        let id = service.add("d");
        let err = next(&service);
        assert_eq!(err.kind, NotificationKind::Error);
        assert_eq!(err.id, id);
        assert_eq!(script.open_handles(), 0);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let (_script, service) = service();
        let first = added(&service, "a");
        let second = added(&service, "b");
        assert!(service.remove(first));
        let third = added(&service, "a");

        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 2);
        assert_eq!(third.get(), 3);
    }

    #[test]
    fn test_remove_before_start_returns_false() {
        let (_script, service) = service();
        assert!(!service.remove(WatchId::from_raw(1)));
    }

    #[test]
    fn test_remove_is_idempotent_and_silences_the_watch() {
        let (script, service) = service();
        let id = added(&service, "d");

        assert!(service.remove(id));
        assert!(service.remove(id));
        assert!(eventually(|| script.open_handles() == 0));

        script.deliver(id, create("late.txt"));
        assert!(service.select_timeout(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn test_tasks_on_the_same_directory_are_independent() {
        let (script, service) = service();
        let first = added(&service, "d");
        let second = added(&service, "d");
        assert_eq!(script.open_handles(), 2);

        script.deliver(first, create("one.txt"));
        script.deliver(second, create("one.txt"));
        let mut ids = vec![next(&service).id, next(&service).id];
        ids.sort();
        assert_eq!(ids, vec![first, second]);

        service.remove(first);
        assert!(eventually(|| script.open_handles() == 1));

        script.deliver(second, InotifyWriter::new().event(IN_DELETE, "one.txt").finish());
        let change = next(&service);
        assert_eq!(change.id, second);
        assert_eq!(change.kind, NotificationKind::Delete);
    }

    #[test]
    fn test_malformed_batch_keeps_task_alive() {
        let (script, service) = service();
        let id = added(&service, "d");

        let mut broken = create("a.txt");
        broken.truncate(broken.len() - 1);
        script.deliver(id, broken);
        assert_eq!(next(&service).kind, NotificationKind::Error);

        script.deliver(id, create("b.txt"));
        let change = next(&service);
        assert_eq!(change.kind, NotificationKind::Create);
        assert!(change.path().unwrap().ends_with("b.txt"));
    }

    #[test]
    fn test_failed_read_removes_task() {
        let (script, service) = service();
        let id = added(&service, "d");

        script.fail(id, 5);
        let removed = next(&service);
        assert_eq!(removed.kind, NotificationKind::TaskRemove);
        assert_eq!(removed.id, id);
        assert!(eventually(|| script.open_handles() == 0));
    }

    #[test]
    fn test_stop_terminates_exactly_once() {
        let (script, service) = service();
        for dir in ["a", "b", "c"] {
            added(&service, dir);
        }
        assert_eq!(script.open_handles(), 3);

        service.stop();
        assert!(!service.is_running());
        assert_eq!(script.open_handles(), 0);

        service.stop();
        let notes = service.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::TaskTerminate);
        assert_eq!(notes[0].id, WatchId::INVALID);

        assert_eq!(service.add("d"), WatchId::INVALID);
        assert!(!service.remove(WatchId::from_raw(1)));
        assert!(service.select().is_none());
    }

    #[test]
    fn test_stop_without_worker_still_terminates() {
        let (_script, service) = service();
        service.stop();
        service.stop();

        let notes = service.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::TaskTerminate);
        assert_eq!(service.add("d"), WatchId::INVALID);
    }

    #[test]
    fn test_terminate_is_last() {
        let (script, service) = service();
        let id = added(&service, "d");
        script.deliver(id, create("a.txt"));
        assert_eq!(next(&service).kind, NotificationKind::Create);

        service.remove(id);
        service.stop();
        let notes = service.drain();
        assert_eq!(notes.last().map(|n| n.kind), Some(NotificationKind::TaskTerminate));
    }

    #[test]
    fn test_stop_joins_worker_when_wake_fails() {
        let (script, service) = service();
        script.fail_wake();
        added(&service, "d");
        assert_eq!(script.open_handles(), 1);

        service.stop();
        assert!(!service.is_running());
        assert_eq!(script.open_handles(), 0);

        let notes = service.drain();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].kind, NotificationKind::TaskTerminate);
    }
}
