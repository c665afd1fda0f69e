// src/net/subsystem.rs

//! Reference-counted bookkeeping for the OS networking subsystem.
//!
//! Every object that owns an OS socket (and the multiplexer) holds a
//! [`SubsystemGuard`]. The first guard taken while no guard is live runs the
//! platform start-up hook; dropping the last live guard runs the tear-down
//! hook. The live set, the id counter and the hook calls all sit behind one
//! mutex, so the "is the set empty?" check can never race with the insert or
//! erase that follows it.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Process-wide registry of live socket-bearing objects.
#[derive(Debug, Default)]
pub struct Subsystem {
    registry: Mutex<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    live: HashSet<u64>,
    next_id: u64,
    startups: u64,
    teardowns: u64,
}

static GLOBAL: OnceLock<Subsystem> = OnceLock::new();

impl Subsystem {
    /// Creates an independent registry. Sockets always use [`Subsystem::global`];
    /// separate instances exist so the counting can be exercised in isolation.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every socket in the process.
    pub fn global() -> &'static Subsystem {
        GLOBAL.get_or_init(Subsystem::new)
    }

    /// Registers a new live instance, starting the subsystem if it was idle.
    pub fn acquire(&self) -> SubsystemGuard<'_> {
        let mut registry = self.lock();
        if registry.live.is_empty() {
            match platform_startup() {
                Ok(()) => registry.startups += 1,
                Err(errno) => tracing::error!(errno, "network subsystem start-up failed"),
            }
        }
        registry.next_id += 1;
        let id = registry.next_id;
        registry.live.insert(id);
        SubsystemGuard { owner: self, id }
    }

    fn release(&self, id: u64) {
        let mut registry = self.lock();
        if registry.live.remove(&id) && registry.live.is_empty() {
            platform_teardown();
            registry.teardowns += 1;
        }
    }

    /// Number of guards currently alive.
    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// How many times the start-up hook has run.
    pub fn startups(&self) -> u64 {
        self.lock().startups
    }

    /// How many times the tear-down hook has run.
    pub fn teardowns(&self) -> u64 {
        self.lock().teardowns
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership token in a [`Subsystem`]; releases its slot on drop.
#[derive(Debug)]
pub struct SubsystemGuard<'a> {
    owner: &'a Subsystem,
    id: u64,
}

impl SubsystemGuard<'_> {
    /// The unique id this instance was registered under.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SubsystemGuard<'_> {
    fn drop(&mut self) {
        self.owner.release(self.id);
    }
}

// Unix sockets need no process-wide initialization; the hooks only mark the
// transitions.
fn platform_startup() -> Result<(), i32> {
    tracing::trace!("network subsystem up");
    Ok(())
}

fn platform_teardown() {
    tracing::trace!("network subsystem down");
}
