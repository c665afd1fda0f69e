//! Defines the `WorkerPool`, a fixed set of worker threads with one task slot
//! each.
//!
//! The pool keeps no queue. [`WorkerPool::submit`] places a task into the first
//! idle slot that can be claimed without waiting, or hands it back. Queuing
//! and retry belong to the [`PoolManager`](crate::manager::PoolManager).

use crate::error::PoolError;
use crate::signals::Wakeup;
use crate::task::{panic_payload_to_string, StopToken, Task, TaskHandle};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};

/// Mutable state of one slot, guarded by the slot's mutex.
#[derive(Default)]
struct SlotState {
    /// Handle of the task assigned to this slot, from assignment until the
    /// worker has finished running it.
    current: Option<TaskHandle>,
    /// The assigned task, until the worker picks it up.
    pending: Option<Box<dyn Task>>,
    /// Raised once when the pool stops.
    stop: bool,
}

/// One worker's assignment state plus the condition variable it sleeps on.
#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
    cond: Condvar,
}

impl Slot {
    /// Non-blocking assignment. Fails if the lock is contested, the slot is
    /// busy or the pool is stopping; the task is handed back in every case.
    fn try_assign(&self, handle: TaskHandle, task: Box<dyn Task>) -> Result<(), Box<dyn Task>> {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(task),
        };
        if state.stop || state.current.is_some() {
            return Err(task);
        }
        state.current = Some(handle);
        state.pending = Some(task);
        self.cond.notify_one();
        Ok(())
    }

    /// `None` when the lock is contested.
    fn peek_current(&self) -> Option<Option<TaskHandle>> {
        match self.state.try_lock() {
            Ok(state) => Some(state.current),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().current),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.stop = true;
        self.cond.notify_all();
    }
}

// --- Worker thread ---

struct WorkerContext {
    index: usize,
    slot: Arc<Slot>,
    wakeup: Arc<Wakeup>,
    stop_token: StopToken,
}

impl WorkerContext {
    fn run_loop(self) {
        tracing::debug!(worker = self.index, "worker started");
        loop {
            let assignment = {
                let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
                loop {
                    if let Some(task) = state.pending.take() {
                        break state.current.map(|handle| (handle, task));
                    }
                    if state.stop {
                        break None;
                    }
                    state = self.slot.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            };

            let Some((handle, task)) = assignment else {
                break;
            };
            self.process_task(handle, task);

            self.slot
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .current = None;
            self.wakeup.notify();
        }
        tracing::debug!(worker = self.index, "worker stopped");
    }

    fn process_task(&self, handle: TaskHandle, mut task: Box<dyn Task>) {
        tracing::trace!(worker = self.index, "{handle} started");
        let outcome = catch_unwind(AssertUnwindSafe(|| task.work(&self.stop_token)));
        match outcome {
            Ok(()) => tracing::trace!(worker = self.index, "{handle} finished"),
            Err(payload) => tracing::error!(
                worker = self.index,
                "{handle} panicked: {}",
                panic_payload_to_string(payload)
            ),
        }
    }
}

// --- WorkerPool ---
/// A fixed number of worker threads, one task slot each.
///
/// Dropping the pool raises the stop token, wakes idle workers and joins every
/// thread; running tasks finish first.
pub struct WorkerPool {
    slots: Vec<Arc<Slot>>,
    workers: Vec<JoinHandle<()>>,
    stop_token: StopToken,
}

impl WorkerPool {
    /// Spawns `count` workers. Each one signals `wakeup` after every task it
    /// completes.
    ///
    /// # Errors
    ///
    /// [`PoolError::NoWorkers`] for a count of zero, or [`PoolError::Spawn`] if
    /// the OS refuses a thread (workers spawned so far are stopped and joined).
    pub fn new(count: usize, wakeup: Arc<Wakeup>) -> Result<Self, PoolError> {
        if count == 0 {
            return Err(PoolError::NoWorkers);
        }
        let mut pool = Self {
            slots: Vec::with_capacity(count),
            workers: Vec::with_capacity(count),
            stop_token: StopToken::new(),
        };

        for index in 0..count {
            let slot = Arc::new(Slot::default());
            let context = WorkerContext {
                index,
                slot: Arc::clone(&slot),
                wakeup: Arc::clone(&wakeup),
                stop_token: pool.stop_token.clone(),
            };
            let name = format!("pool-worker-{index}");
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || context.run_loop())
                .map_err(|source| PoolError::Spawn { name, source })?;
            pool.slots.push(slot);
            pool.workers.push(handle);
        }

        tracing::info!(workers = count, "worker pool started");
        Ok(pool)
    }

    /// Offers `task` to the slots in order and assigns it to the first idle
    /// one that can be claimed without blocking. Returns the slot index, or
    /// the task back if every slot refused.
    pub fn submit(&self, handle: TaskHandle, task: Box<dyn Task>) -> Result<usize, Box<dyn Task>> {
        let mut task = task;
        for (index, slot) in self.slots.iter().enumerate() {
            match slot.try_assign(handle, task) {
                Ok(()) => {
                    tracing::trace!(worker = index, "{handle} assigned");
                    return Ok(index);
                }
                Err(returned) => task = returned,
            }
        }
        Err(task)
    }

    /// Best-effort check whether `slot` holds a task. A contested slot counts
    /// as active; an out-of-range index as idle.
    pub fn is_active(&self, slot: usize) -> bool {
        match self.slots.get(slot) {
            Some(slot) => slot.peek_current().map_or(true, |current| current.is_some()),
            None => false,
        }
    }

    /// Like [`WorkerPool::is_active`], but only while `slot` still holds the
    /// task identified by `handle`.
    pub fn is_task_active(&self, slot: usize, handle: TaskHandle) -> bool {
        match self.slots.get(slot) {
            Some(slot) => slot
                .peek_current()
                .map_or(true, |current| current == Some(handle)),
            None => false,
        }
    }

    /// Number of worker slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The token passed to every task run by this pool.
    pub fn stop_token(&self) -> &StopToken {
        &self.stop_token
    }

    /// Raises the stop token and tells every worker to exit once idle.
    pub fn stop(&self) {
        self.stop_token.raise();
        for slot in &self.slots {
            slot.stop();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread exited by panic");
            }
        }
        tracing::debug!("worker pool joined");
    }
}
