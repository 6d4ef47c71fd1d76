use std::sync::Arc;
use std::time::Duration;

use super::controller::ControllerThread;
use super::task::{Reschedule, Task, TaskError};
use super::worker::{RunControl, Worker, WorkerLoop};
use super::ThreadError;

/// Handler dispatched by the controller thread for one interrupt bit.
/// The design lets a [`Task`] double as an interrupt handler.
pub trait InterruptHandler: Send + Sync {
    fn handle_interrupt(&self, interrupt: u8);
}

/// FPGA interrupt source. The cRIO vendor binding implements this
/// elsewhere; tests script it.
pub trait FpgaIrq: Send + Sync {
    /// Block until any interrupt in `mask` fires or `timeout` expires.
    /// Returns the triggered bitmask, or None on timeout.
    fn wait_on_irqs(&self, mask: u32, timeout: Duration) -> Option<u32>;

    /// Acknowledge the given interrupts.
    fn ack_irqs(&self, mask: u32);
}

/// How long one IRQ wait blocks before re-checking the stop flag.
const IRQ_TIMEOUT: Duration = Duration::from_millis(20);

/// Task carrying a triggered interrupt bitmask from the watcher thread to
/// the controller thread, which dispatches it to the registered handlers.
pub struct InterruptWatcherTask {
    triggered: u32,
    controller: ControllerThread,
}

impl InterruptWatcherTask {
    pub fn new(triggered: u32, controller: ControllerThread) -> Self {
        Self {
            triggered,
            controller,
        }
    }
}

impl Task for InterruptWatcherTask {
    fn run(&self) -> Result<Reschedule, TaskError> {
        self.controller.check_interrupts(self.triggered);
        Ok(Reschedule::DontReschedule)
    }
}

struct WatcherLoop {
    fpga: Arc<dyn FpgaIrq>,
    controller: ControllerThread,
}

impl WorkerLoop for WatcherLoop {
    fn run(&mut self, control: &RunControl) {
        while control.keep_running() {
            if let Some(triggered) = self.fpga.wait_on_irqs(0xFFFF_FFFF, IRQ_TIMEOUT) {
                self.controller.enqueue(Arc::new(InterruptWatcherTask::new(
                    triggered,
                    self.controller.clone(),
                )));
            }
        }
    }
}

/// Thread blocking on FPGA interrupts.
///
/// Each wait runs with a 20 ms timeout so a stop request is honored
/// promptly; every triggered bitmask is enqueued as an
/// [`InterruptWatcherTask`] onto the controller thread.
pub struct InterruptWatcher {
    worker: Worker,
}

impl InterruptWatcher {
    pub fn new(fpga: Arc<dyn FpgaIrq>, controller: ControllerThread) -> Self {
        Self {
            worker: Worker::new(WatcherLoop { fpga, controller }),
        }
    }

    pub fn start(&self, timeout: Duration) -> Result<(), ThreadError> {
        self.worker.start(timeout)
    }

    pub fn stop(&self, timeout: Duration) -> Result<(), ThreadError> {
        self.worker.stop(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}
