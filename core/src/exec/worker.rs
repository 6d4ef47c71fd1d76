use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use super::ThreadError;

struct ControlState {
    keep_running: bool,
    started: bool,
}

/// Shared run-state of a worker thread: a mutex-guarded pair of flags and
/// a condition variable.
///
/// The loop body polls [`RunControl::keep_running`] and parks itself in
/// [`RunControl::wait_for`] / [`RunControl::wait_until`]; `stop` flips the
/// flag and notifies, waking any such wait immediately. Blocking I/O (the
/// transports) accepts an optional `&RunControl` for the same reason - a
/// sleeping bus read must not outlive its thread's stop request.
pub struct RunControl {
    state: Mutex<ControlState>,
    condition: Condvar,
}

impl RunControl {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState {
                keep_running: false,
                started: false,
            }),
            condition: Condvar::new(),
        }
    }

    /// True until `stop` was requested.
    pub fn keep_running(&self) -> bool {
        self.state.lock().unwrap().keep_running
    }

    /// True while the loop body is executing.
    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().started
    }

    /// Sleep up to `timeout` or until notified. Returns the value of
    /// `keep_running` on wake-up, so loop bodies can run
    /// `while control.wait_for(period) { ... }`.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        if !state.keep_running {
            return false;
        }
        let (state, _) = self.condition.wait_timeout(state, timeout).unwrap();
        state.keep_running
    }

    /// Sleep until `deadline` or until notified. Returns `keep_running`.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            let state = self.state.lock().unwrap();
            if !state.keep_running {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (state, _) = self
                .condition
                .wait_timeout(state, deadline - now)
                .unwrap();
            if !state.keep_running {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
        }
    }

    /// Wake every waiter.
    pub fn notify(&self) {
        self.condition.notify_all();
    }

    fn set_started(&self, started: bool) {
        self.state.lock().unwrap().started = started;
        self.condition.notify_all();
    }

    fn wait_started(&self, value: bool, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, result) = self
            .condition
            .wait_timeout_while(state, timeout, |s| s.started != value)
            .unwrap();
        drop(state);
        !result.timed_out()
    }
}

/// Body of a worker thread. `run` shall loop for as long as
/// `control.keep_running()` holds and park itself in the control's wait
/// methods between rounds.
pub trait WorkerLoop: Send + 'static {
    fn run(&mut self, control: &RunControl);
}

/// Start/stop/join wrapper around a worker thread.
///
/// `start` blocks until the spawned thread has signalled it is up; `stop`
/// requests termination and waits for the loop to exit. Stop may be called
/// from several threads at once - one caller wins the join, the others
/// either observe the thread already gone (fine) or time out with
/// [`ThreadError::CannotStop`]. The loop body survives a stop and can be
/// started again.
pub struct Worker {
    control: Arc<RunControl>,
    body: Mutex<Option<Box<dyn WorkerLoop>>>,
    handle: Mutex<Option<JoinHandle<Box<dyn WorkerLoop>>>>,
}

impl Worker {
    pub fn new(body: impl WorkerLoop) -> Self {
        Self {
            control: Arc::new(RunControl::new()),
            body: Mutex::new(Some(Box::new(body))),
            handle: Mutex::new(None),
        }
    }

    /// Shared run control, for handing into blocking calls made on behalf
    /// of this thread.
    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    /// Spawn the thread and wait up to `timeout` for the loop to signal
    /// startup.
    pub fn start(&self, timeout: Duration) -> Result<(), ThreadError> {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return Err(ThreadError::AlreadyRunning);
        }
        let Some(mut body) = self.body.lock().unwrap().take() else {
            return Err(ThreadError::AlreadyRunning);
        };

        {
            let mut state = self.control.state.lock().unwrap();
            state.keep_running = true;
            state.started = false;
        }

        let control = self.control.clone();
        *handle = Some(std::thread::spawn(move || {
            control.set_started(true);
            debug!("worker thread started");
            body.run(&control);
            debug!("worker thread completed");
            control.set_started(false);
            body
        }));
        drop(handle);

        if !self.control.wait_started(true, timeout) {
            return Err(ThreadError::NotStarted {
                timeout_ms: timeout.as_millis(),
            });
        }
        Ok(())
    }

    /// Request termination and wait up to `timeout` for the loop to exit.
    pub fn stop(&self, timeout: Duration) -> Result<(), ThreadError> {
        {
            let mut state = self.control.state.lock().unwrap();
            state.keep_running = false;
        }
        self.control.notify();

        if !self.control.wait_started(false, timeout) {
            return Err(ThreadError::CannotStop {
                timeout_ms: timeout.as_millis(),
            });
        }
        self.join();
        Ok(())
    }

    /// Wait for the thread to exit and reclaim the loop body. A no-op when
    /// the thread is not running.
    pub fn join(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle
            && let Ok(body) = handle.join()
        {
            *self.body.lock().unwrap() = Some(body);
        }
    }

    /// True when a thread exists that has not been joined yet.
    pub fn joinable(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }

    /// True while the loop body is executing.
    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.joinable() {
            let _ = self.stop(Duration::from_secs(2));
        }
    }
}
