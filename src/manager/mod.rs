//! The `manager` module provides the [`PoolManager`], which queues submitted
//! tasks and feeds them to a [`WorkerPool`] from a supervisor thread.
//!
//! Callers never block on the pool: `submit` records the task, wakes the
//! supervisor and returns a [`TaskHandle`] at once. The supervisor dispatches
//! queued tasks in ascending handle order whenever a worker frees up, and
//! forgets tasks once their worker has finished them.

// --- Submodules ---
pub mod builder;

// --- Public Re-exports ---
pub use builder::PoolManagerBuilder;

// --- Internal Imports ---
use crate::error::PoolError;
use crate::signals::Wakeup;
use crate::task::{StopToken, Task, TaskHandle, TaskStatus};
use crate::worker::WorkerPool;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What happens to tasks still queued when the manager shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Queued tasks are discarded without running. Running tasks see the stop
    /// token raised immediately.
    #[default]
    Drop,
    /// Queued tasks are still dispatched, and the workers stop only once
    /// every tracked task has finished.
    Drain,
}

/// One tracked task. `task` is `Some` while queued; `slot` is `Some` once a
/// worker has accepted it.
struct TaskRecord {
    task: Option<Box<dyn Task>>,
    slot: Option<usize>,
}

impl TaskRecord {
    fn status(&self) -> TaskStatus {
        if self.slot.is_some() {
            TaskStatus::Active
        } else {
            TaskStatus::Queued
        }
    }
}

/// Handle counter plus every task that is queued or running.
struct Ledger {
    next: u64,
    records: BTreeMap<u64, TaskRecord>,
}

/// State shared between the manager and its supervisor thread.
struct Shared {
    ledger: Mutex<Ledger>,
    wakeup: Arc<Wakeup>,
    stopping: AtomicBool,
    stop_token: StopToken,
    policy: ShutdownPolicy,
    retry_interval: Duration,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Queues tasks and supervises a worker pool.
///
/// Dropping the manager performs [`PoolManager::shutdown`].
pub struct PoolManager {
    shared: Arc<Shared>,
    supervisor: Option<JoinHandle<()>>,
    workers: usize,
}

impl PoolManager {
    /// Returns a new `PoolManagerBuilder` for configuring and creating a
    /// `PoolManager`.
    ///
    /// # Examples
    ///
    /// ```
    /// use line_server::manager::{PoolManager, ShutdownPolicy};
    ///
    /// let manager = PoolManager::builder()
    ///     .with_workers(2)
    ///     .with_shutdown_policy(ShutdownPolicy::Drain)
    ///     .build()
    ///     .unwrap();
    /// let handle = manager.submit(|_: &line_server::task::StopToken| {});
    /// assert_ne!(manager.status(handle), line_server::task::TaskStatus::Unknown);
    /// ```
    pub fn builder() -> PoolManagerBuilder {
        PoolManagerBuilder::new()
    }

    /// A manager over `workers` threads with the default shutdown policy.
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        Self::builder().with_workers(workers).build()
    }

    /// Spawns the pool and the supervisor thread. Called by the builder.
    pub(crate) fn new_internal(
        workers: usize,
        policy: ShutdownPolicy,
        retry_interval: Duration,
    ) -> Result<Self, PoolError> {
        let wakeup = Arc::new(Wakeup::new());
        let pool = WorkerPool::new(workers, Arc::clone(&wakeup))?;
        let shared = Arc::new(Shared {
            ledger: Mutex::new(Ledger {
                next: 1,
                records: BTreeMap::new(),
            }),
            wakeup,
            stopping: AtomicBool::new(false),
            stop_token: pool.stop_token().clone(),
            policy,
            retry_interval,
        });

        let name = "pool-supervisor".to_string();
        let context = Arc::clone(&shared);
        let supervisor = thread::Builder::new()
            .name(name.clone())
            .spawn(move || supervise(pool, context))
            .map_err(|source| PoolError::Spawn { name, source })?;

        Ok(Self {
            shared,
            supervisor: Some(supervisor),
            workers,
        })
    }

    /// Queues `task` and returns its handle without waiting for a worker.
    ///
    /// After shutdown the task is discarded; the handle is still issued and
    /// reports `Completed`.
    pub fn submit<T: Task + 'static>(&self, task: T) -> TaskHandle {
        self.submit_boxed(Box::new(task))
    }

    pub fn submit_boxed(&self, task: Box<dyn Task>) -> TaskHandle {
        let handle = {
            let mut ledger = self.shared.ledger();
            let handle = TaskHandle(ledger.next);
            ledger.next += 1;
            if self.shared.stopping.load(Ordering::Acquire) {
                tracing::warn!("{handle} submitted after shutdown, discarded");
                return handle;
            }
            ledger.records.insert(
                handle.0,
                TaskRecord {
                    task: Some(task),
                    slot: None,
                },
            );
            handle
        };
        tracing::trace!("{handle} queued");
        self.shared.wakeup.notify();
        handle
    }

    /// Current status of `handle`.
    pub fn status(&self, handle: TaskHandle) -> TaskStatus {
        let ledger = self.shared.ledger();
        if handle.0 == 0 || handle.0 >= ledger.next {
            return TaskStatus::Unknown;
        }
        ledger
            .records
            .get(&handle.0)
            .map_or(TaskStatus::Completed, TaskRecord::status)
    }

    /// Number of tasks still queued or running.
    pub fn pending(&self) -> usize {
        self.shared.ledger().records.len()
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn policy(&self) -> ShutdownPolicy {
        self.shared.policy
    }

    /// Stops the supervisor and the workers and waits for them to exit.
    /// Running tasks are never interrupted; see [`ShutdownPolicy`] for what
    /// happens to queued ones. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        let Some(supervisor) = self.supervisor.take() else {
            return;
        };
        tracing::info!(policy = ?self.shared.policy, pending = self.pending(), "pool manager shutting down");
        self.shared.stopping.store(true, Ordering::Release);
        if self.shared.policy == ShutdownPolicy::Drop {
            self.shared.stop_token.raise();
        }
        self.shared.wakeup.notify();
        if supervisor.join().is_err() {
            tracing::error!("supervisor thread exited by panic");
        }
        let dropped = {
            let mut ledger = self.shared.ledger();
            let dropped = ledger.records.len();
            ledger.records.clear();
            dropped
        };
        if dropped > 0 {
            tracing::warn!(dropped, "queued tasks discarded at shutdown");
        }
        tracing::info!("pool manager stopped");
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// --- Supervisor ---

/// Supervisor thread body. Owns the pool; dropping it at the end stops and
/// joins the workers.
fn supervise(pool: WorkerPool, shared: Arc<Shared>) {
    tracing::debug!("supervisor started");
    loop {
        let stopping = shared.stopping.load(Ordering::Acquire);
        if stopping && shared.policy == ShutdownPolicy::Drop {
            break;
        }
        let remaining = dispatch_pass(&pool, &shared);
        if stopping && remaining == 0 {
            break;
        }
        // A worker that finishes while its slot lock is contested, or an
        // assignment refused by try-lock, would otherwise wait for the next
        // unrelated wake-up.
        let timeout = (remaining > 0).then_some(shared.retry_interval);
        shared.wakeup.wait(timeout);
    }
    drop(pool);
    tracing::debug!("supervisor stopped");
}

/// One pass over the ledger in handle order: reap finished tasks and hand
/// queued ones to the pool. After the first refusal no later task is
/// offered, so dispatch order follows submission order. Returns the number
/// of records left.
fn dispatch_pass(pool: &WorkerPool, shared: &Shared) -> usize {
    let mut ledger = shared.ledger();
    let mut admitting = true;
    let mut finished = Vec::new();

    for (&id, record) in ledger.records.iter_mut() {
        let handle = TaskHandle(id);
        if let Some(slot) = record.slot {
            if !pool.is_task_active(slot, handle) {
                finished.push(id);
            }
            continue;
        }
        if !admitting {
            continue;
        }
        let Some(task) = record.task.take() else {
            continue;
        };
        match pool.submit(handle, task) {
            Ok(slot) => {
                record.slot = Some(slot);
                tracing::debug!(worker = slot, "{handle} dispatched");
            }
            Err(task) => {
                record.task = Some(task);
                admitting = false;
            }
        }
    }

    for id in finished {
        ledger.records.remove(&id);
        tracing::trace!("{} completed", TaskHandle(id));
    }
    ledger.records.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_for(manager: &PoolManager, handle: TaskHandle, status: TaskStatus) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.status(handle) != status {
            assert!(Instant::now() < deadline, "{handle} never became {status}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn unissued_handles_are_unknown() {
        let manager = PoolManager::new(1).unwrap();
        assert_eq!(manager.status(TaskHandle::NONE), TaskStatus::Unknown);
        assert_eq!(manager.status(TaskHandle(1)), TaskStatus::Unknown);
        let handle = manager.submit(|_: &StopToken| {});
        assert_eq!(handle, TaskHandle(1));
        assert_eq!(manager.status(TaskHandle(2)), TaskStatus::Unknown);
    }

    #[test]
    fn handles_increase() {
        let manager = PoolManager::new(2).unwrap();
        let a = manager.submit(|_: &StopToken| {});
        let b = manager.submit(|_: &StopToken| {});
        let c = manager.submit(|_: &StopToken| {});
        assert!(a < b && b < c);
        wait_for(&manager, c, TaskStatus::Completed);
    }

    #[test]
    fn queued_then_active_then_completed() {
        let manager = PoolManager::new(1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let first = manager.submit(move |_: &StopToken| {
            let _ = release_rx.recv();
        });
        let second = manager.submit(|_: &StopToken| {});

        wait_for(&manager, first, TaskStatus::Active);
        assert_eq!(manager.status(second), TaskStatus::Queued);
        assert_eq!(manager.pending(), 2);

        release_tx.send(()).unwrap();
        wait_for(&manager, first, TaskStatus::Completed);
        wait_for(&manager, second, TaskStatus::Completed);
        assert_eq!(manager.pending(), 0);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut manager = PoolManager::new(1).unwrap();
        manager.shutdown();
        manager.shutdown();
        let late = manager.submit(|_: &StopToken| {});
        assert_eq!(manager.status(late), TaskStatus::Completed);
        assert_eq!(manager.pending(), 0);
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(matches!(PoolManager::new(0), Err(PoolError::NoWorkers)));
    }
}
