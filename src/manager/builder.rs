//! Provides a builder for constructing and configuring the `PoolManager`.

use crate::error::PoolError;
use crate::manager::{PoolManager, ShutdownPolicy};
use std::time::Duration;

/// The default number of worker threads.
pub const DEFAULT_WORKERS: usize = 3;
/// How long the supervisor sleeps between passes while tasks are tracked.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// A builder for creating a `PoolManager`.
#[derive(Debug, Default)]
pub struct PoolManagerBuilder {
    /// The number of worker threads (one task slot each).
    workers: Option<usize>,
    /// What happens to queued tasks at shutdown.
    policy: Option<ShutdownPolicy>,
    /// Upper bound on the supervisor's sleep while it still tracks tasks.
    retry_interval: Option<Duration>,
}

impl PoolManagerBuilder {
    /// Creates a new `PoolManagerBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads.
    pub fn with_workers(mut self, count: usize) -> Self {
        self.workers = Some(count);
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets how often the supervisor re-scans while tasks are queued or
    /// running, in addition to the wake-ups workers send on completion.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Spawns the workers and the supervisor.
    ///
    /// # Errors
    /// Returns [`PoolError::NoWorkers`] for a worker count of zero and
    /// [`PoolError::Spawn`] if a thread cannot be created.
    pub fn build(self) -> Result<PoolManager, PoolError> {
        let workers = self.workers.unwrap_or(DEFAULT_WORKERS);
        let policy = self.policy.unwrap_or_default();
        let retry_interval = self
            .retry_interval
            .unwrap_or(DEFAULT_RETRY_INTERVAL)
            .max(Duration::from_millis(1));
        PoolManager::new_internal(workers, policy, retry_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let manager = PoolManagerBuilder::new().build().unwrap();
        assert_eq!(manager.workers(), DEFAULT_WORKERS);
        assert_eq!(manager.policy(), ShutdownPolicy::Drop);
    }

    #[test]
    fn overrides() {
        let manager = PoolManagerBuilder::new()
            .with_workers(5)
            .with_shutdown_policy(ShutdownPolicy::Drain)
            .with_retry_interval(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(manager.workers(), 5);
        assert_eq!(manager.policy(), ShutdownPolicy::Drain);
    }
}
