//! Task scheduling and worker threads.
//!
//! A small number of long-lived threads with explicit start/stop, plus
//! cooperative blocking I/O - there is no async runtime. The
//! [`ControllerThread`] is the single task executor; [`Worker`] is the
//! start/stop/join primitive the other threads (interrupt watcher, bus
//! pollers in higher layers) are built from.

pub mod controller;
pub mod interrupt;
pub mod task;
pub mod worker;

pub use controller::ControllerThread;
pub use interrupt::{FpgaIrq, InterruptHandler, InterruptWatcher, InterruptWatcherTask};
pub use task::{Reschedule, Task, TaskError, TaskQueue};
pub use worker::{RunControl, Worker, WorkerLoop};

use thiserror::Error;

/// Worker thread lifecycle failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThreadError {
    /// The thread did not signal startup within the allowed time.
    #[error("thread was not started within {timeout_ms} ms")]
    NotStarted { timeout_ms: u128 },

    /// The thread did not exit within the allowed time.
    #[error("cannot stop thread within {timeout_ms} ms")]
    CannotStop { timeout_ms: u128 },

    /// `start` called while the thread is already running.
    #[error("thread is already running")]
    AlreadyRunning,
}
