use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::interrupt::InterruptHandler;
use super::task::{Reschedule, Task, TaskError, TaskQueue};
use super::ThreadError;

struct ControllerState {
    queue: TaskQueue,
    keep_running: bool,
    running: bool,
}

struct ControllerInner {
    state: Mutex<ControllerState>,
    condition: Condvar,
    handlers: Mutex<HashMap<u8, Arc<dyn InterruptHandler>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// The single task executor.
///
/// One background thread pops due tasks off the time-ordered queue and
/// runs them strictly one at a time - earlier due times first, ties in
/// insertion order. Tasks run with the queue lock released, so a running
/// task may enqueue further work; the serial-execution guarantee holds
/// because only this thread ever calls `run`.
///
/// The handle is cheaply cloneable; [`ControllerThread::instance`] holds
/// the process-wide one most applications use.
#[derive(Clone)]
pub struct ControllerThread {
    inner: Arc<ControllerInner>,
}

impl Default for ControllerThread {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerThread {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(ControllerState {
                    queue: TaskQueue::new(),
                    keep_running: false,
                    running: false,
                }),
                condition: Condvar::new(),
                handlers: Mutex::new(HashMap::new()),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Process-wide controller thread.
    pub fn instance() -> ControllerThread {
        static INSTANCE: OnceLock<ControllerThread> = OnceLock::new();
        INSTANCE.get_or_init(ControllerThread::new).clone()
    }

    /// Start the executor thread. Starting a running controller is illegal
    /// and fails with [`ThreadError::AlreadyRunning`].
    pub fn start(&self) -> Result<(), ThreadError> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.running {
                return Err(ThreadError::AlreadyRunning);
            }
            state.running = true;
            state.keep_running = true;
        }

        let inner = self.inner.clone();
        let handle = std::thread::spawn(move || {
            debug!("controller thread: run");
            Self::run(&inner);
            debug!("controller thread: completed");
        });
        *self.inner.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signal the executor, wake it, join it and drop the queue.
    pub fn stop(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.keep_running = false;
        }
        self.inner.condition.notify_all();

        let handle = self.inner.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let mut state = self.inner.state.lock().unwrap();
        state.queue.clear();
        state.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().unwrap().running
    }

    /// Enqueue a task to run as soon as the executor gets to it.
    pub fn enqueue(&self, task: Arc<dyn Task>) {
        self.enqueue_at(task, Instant::now() + Duration::from_millis(1));
    }

    /// Enqueue a task due at an absolute time. Tasks failing validation
    /// are dropped, with the failure routed to `report_exception`.
    pub fn enqueue_at(&self, task: Arc<dyn Task>, when: Instant) {
        trace!("controller thread: enqueue");
        if !task.validate() {
            task.report_exception(&TaskError::ValidationFailed);
            return;
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            state.queue.push(task, when);
        }
        self.inner.condition.notify_one();
    }

    /// Remove a queued task. Returns true when it was queued.
    pub fn remove(&self, task: &Arc<dyn Task>) -> bool {
        self.inner.state.lock().unwrap().queue.remove(task)
    }

    /// Number of queued (not yet running) tasks.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    /// Register the handler dispatched for the given interrupt bit.
    pub fn set_interrupt_handler(&self, interrupt: u8, handler: Arc<dyn InterruptHandler>) {
        self.inner.handlers.lock().unwrap().insert(interrupt, handler);
    }

    /// Dispatch every set bit of `triggered` to its registered handler.
    pub fn check_interrupts(&self, triggered: u32) {
        let handlers = self.inner.handlers.lock().unwrap();
        for bit in 0..32 {
            if triggered & (1 << bit) != 0
                && let Some(handler) = handlers.get(&bit)
            {
                handler.handle_interrupt(bit);
            }
        }
    }

    fn run(inner: &Arc<ControllerInner>) {
        let mut state = inner.state.lock().unwrap();
        loop {
            let due = state.queue.pop_due(Instant::now());
            if !due.is_empty() {
                // run with the queue unlocked - tasks may enqueue
                drop(state);
                let mut rescheduled = Vec::new();
                for task in due {
                    match task.run() {
                        Ok(Reschedule::After(delay)) => {
                            rescheduled.push((task, Instant::now() + delay));
                        }
                        Ok(Reschedule::DontReschedule) => {}
                        Err(error) => task.report_exception(&error),
                    }
                }
                state = inner.state.lock().unwrap();
                for (task, when) in rescheduled {
                    state.queue.push(task, when);
                }
                continue;
            }

            if !state.keep_running {
                break;
            }

            state = match state.queue.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        continue;
                    }
                    inner
                        .condition
                        .wait_timeout(state, deadline - now)
                        .unwrap()
                        .0
                }
                None => inner.condition.wait(state).unwrap(),
            };
        }
    }
}
