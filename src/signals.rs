//! Wake-up signal shared by the pool workers and the supervisor.
//!
//! Workers raise it each time they finish a task; `submit` and `shutdown`
//! raise it too. The flag is latched, so a signal sent while the supervisor
//! is busy with a dispatch pass is not lost.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Wakeup {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches the flag and wakes every waiter.
    pub fn notify(&self) {
        let mut signaled = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        *signaled = true;
        self.cond.notify_all();
    }

    /// Blocks until the flag is raised or `timeout` elapses (`None` waits
    /// indefinitely), then clears it. Returns whether a signal arrived.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = self.signaled.lock().unwrap_or_else(PoisonError::into_inner);
        let mut guard = match timeout {
            Some(timeout) => {
                self.cond
                    .wait_timeout_while(guard, timeout, |signaled| !*signaled)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .cond
                .wait_while(guard, |signaled| !*signaled)
                .unwrap_or_else(PoisonError::into_inner),
        };
        std::mem::replace(&mut *guard, false)
    }
}
