// src/task.rs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// --- TaskHandle ---
/// Identifier issued by the pool manager for each submitted task.
///
/// Handles start at 1, increase with every submission and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub(crate) u64);

impl TaskHandle {
    /// A handle value that is never issued.
    pub const NONE: TaskHandle = TaskHandle(0);

    /// Returns the inner u64 value of the handle.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskHandle {
    fn from(value: u64) -> Self {
        TaskHandle(value)
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

// --- TaskStatus ---
/// Where a submitted task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Waiting in the manager for a free worker.
    Queued,
    /// Assigned to a worker.
    Active,
    /// No longer tracked: it ran to completion or was discarded at shutdown.
    Completed,
    /// The handle was never issued.
    Unknown,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Active => "active",
            TaskStatus::Completed => "completed",
            TaskStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// --- StopToken ---
/// Shared cancellation flag handed to every running task.
///
/// Cancellation is cooperative: a task that never looks at the token runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the pool has been asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

// --- Task ---
/// A unit of work run synchronously on a pool worker.
///
/// `work` must return promptly once `stop.is_stopped()` turns `true`.
pub trait Task: Send {
    fn work(&mut self, stop: &StopToken);
}

impl<F> Task for F
where
    F: FnMut(&StopToken) + Send,
{
    fn work(&mut self, stop: &StopToken) {
        self(stop)
    }
}

pub(crate) fn panic_payload_to_string(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload type".to_string()
    }
}
