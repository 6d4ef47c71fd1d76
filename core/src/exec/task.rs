use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::modbus::ModbusError;
use crate::transport::TransportError;

/// What to do with a task after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// Drop the task.
    DontReschedule,
    /// Run again after the given delay.
    After(Duration),
}

/// Failure reported from a task run or validation.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task validation failed")]
    ValidationFailed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Modbus(#[from] ModbusError),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A unit of work owned jointly by its enqueuer and the controller
/// thread's queue (whichever holds the `Arc` longer).
///
/// `run` failures never terminate the controller thread: the error is
/// handed to [`Task::report_exception`] and the task is dropped.
pub trait Task: Send + Sync {
    /// Checked before the task enters the queue; returning false drops the
    /// task and reports [`TaskError::ValidationFailed`].
    fn validate(&self) -> bool {
        true
    }

    /// Execute the task. The returned value decides rescheduling.
    fn run(&self) -> Result<Reschedule, TaskError>;

    /// Called with any error `run` (or validation) produced.
    fn report_exception(&self, _error: &TaskError) {}
}

struct TaskEntry {
    when: Instant,
    seq: u64,
    task: Arc<dyn Task>,
}

impl PartialEq for TaskEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for TaskEntry {}

impl PartialOrd for TaskEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskEntry {
    // reversed: BinaryHeap is a max-heap, the queue needs the earliest
    // entry on top; ties go to the lower insertion sequence
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of tasks keyed on absolute due time, ties broken by insertion
/// order.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<TaskEntry>,
    seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task due at `when`.
    pub fn push(&mut self, task: Arc<dyn Task>, when: Instant) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(TaskEntry { when, seq, task });
    }

    /// Due time of the earliest entry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.when)
    }

    /// Pop every task due at `now` or earlier, in due-time order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Arc<dyn Task>> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|e| e.when <= now) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry.task);
            }
        }
        due
    }

    /// Remove every queued entry holding the given task. Returns true when
    /// at least one entry was removed.
    pub fn remove(&mut self, task: &Arc<dyn Task>) -> bool {
        let before = self.heap.len();
        let entries: Vec<_> = std::mem::take(&mut self.heap)
            .into_iter()
            .filter(|e| !Arc::ptr_eq(&e.task, task))
            .collect();
        self.heap = entries.into();
        before != self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
