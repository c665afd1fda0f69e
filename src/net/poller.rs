// src/net/poller.rs

// Readiness multiplexing over poll(2).

use super::subsystem::{Subsystem, SubsystemGuard};
use super::HasSocket;
use std::collections::BTreeSet;
use std::io;
use std::os::unix::io::RawFd;

/// What a registered descriptor is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Waiting to become writable.
    Send,
    /// Waiting for data.
    Receive,
    /// A listening server waiting for a connection.
    Accept,
    /// A client waiting for a non-blocking connect to finish.
    Connect,
}

impl Role {
    const ALL: [Role; 4] = [Role::Send, Role::Receive, Role::Accept, Role::Connect];

    fn index(self) -> usize {
        match self {
            Role::Send => 0,
            Role::Receive => 1,
            Role::Accept => 2,
            Role::Connect => 3,
        }
    }

    fn interest(self) -> libc::c_short {
        match self {
            Role::Send | Role::Connect => libc::POLLOUT,
            Role::Receive | Role::Accept => libc::POLLIN,
        }
    }
}

/// Error conditions poll reports regardless of the requested events. They
/// count as readiness so the owner sees the failure on its next call.
const FAILURE_EVENTS: libc::c_short = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;

/// Watches sockets in four roles and reports which became ready.
///
/// The multiplexer holds descriptors, not sockets: callers keep ownership and
/// must deregister a socket before closing it. Readiness answers refer to the
/// most recent [`Multiplexer::work`] call only.
pub struct Multiplexer {
    registered: [BTreeSet<RawFd>; 4],
    ready: [BTreeSet<RawFd>; 4],
    fds: Vec<libc::pollfd>,
    roles: Vec<Role>,
    dirty: bool,
    _net: SubsystemGuard<'static>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-sizes the poll array for `capacity` registrations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registered: Default::default(),
            ready: Default::default(),
            fds: Vec::with_capacity(capacity),
            roles: Vec::with_capacity(capacity),
            dirty: false,
            _net: Subsystem::global().acquire(),
        }
    }

    // --- Registration ---

    /// Registers `socket` for `role`, switching it to non-blocking mode.
    ///
    /// Fails if the socket is not open or cannot be made non-blocking.
    /// Registering twice for the same role is a no-op that succeeds.
    pub fn add<S: HasSocket + ?Sized>(&mut self, role: Role, socket: &mut S) -> bool {
        let socket = socket.socket_mut();
        if !socket.check_valid("multiplexer registration") {
            return false;
        }
        if !socket.set_nonblocking() {
            return false;
        }
        if self.registered[role.index()].insert(socket.raw_fd()) {
            self.dirty = true;
        }
        true
    }

    /// Removes `socket` from `role`. Returns whether it was registered.
    pub fn remove<S: HasSocket + ?Sized>(&mut self, role: Role, socket: &S) -> bool {
        let fd = socket.socket().raw_fd();
        let removed = self.registered[role.index()].remove(&fd);
        if removed {
            self.ready[role.index()].remove(&fd);
            self.dirty = true;
        }
        removed
    }

    pub fn add_sender<S: HasSocket + ?Sized>(&mut self, socket: &mut S) -> bool {
        self.add(Role::Send, socket)
    }

    pub fn delete_sender<S: HasSocket + ?Sized>(&mut self, socket: &S) -> bool {
        self.remove(Role::Send, socket)
    }

    pub fn add_reader<S: HasSocket + ?Sized>(&mut self, socket: &mut S) -> bool {
        self.add(Role::Receive, socket)
    }

    pub fn delete_reader<S: HasSocket + ?Sized>(&mut self, socket: &S) -> bool {
        self.remove(Role::Receive, socket)
    }

    pub fn add_server<S: HasSocket + ?Sized>(&mut self, socket: &mut S) -> bool {
        self.add(Role::Accept, socket)
    }

    pub fn delete_server<S: HasSocket + ?Sized>(&mut self, socket: &S) -> bool {
        self.remove(Role::Accept, socket)
    }

    pub fn add_client<S: HasSocket + ?Sized>(&mut self, socket: &mut S) -> bool {
        self.add(Role::Connect, socket)
    }

    pub fn delete_client<S: HasSocket + ?Sized>(&mut self, socket: &S) -> bool {
        self.remove(Role::Connect, socket)
    }

    // --- Polling ---

    /// Flattens the four registries into the poll array.
    fn rebuild(&mut self) {
        self.fds.clear();
        self.roles.clear();
        for role in Role::ALL {
            for &fd in &self.registered[role.index()] {
                self.fds.push(libc::pollfd {
                    fd,
                    events: role.interest(),
                    revents: 0,
                });
                self.roles.push(role);
            }
        }
        self.dirty = false;
        tracing::trace!(entries = self.fds.len(), "poll array rebuilt");
    }

    /// One `poll(2)` call over every registration, waiting at most
    /// `timeout_ms` (-1 waits forever). Returns the number of descriptors with
    /// events; 0 on timeout or when interrupted by a signal. Any other OS
    /// error is logged here with its `errno`.
    pub fn poll(&mut self, timeout_ms: i32) -> io::Result<usize> {
        if self.dirty {
            self.rebuild();
        }
        for entry in &mut self.fds {
            entry.revents = 0;
        }
        // SAFETY: fds is a live, correctly sized array of pollfd.
        let count = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if count < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            let errno = err.raw_os_error().unwrap_or(0);
            tracing::error!(errno, entries = self.fds.len(), "poll failed");
            return Err(err);
        }
        Ok(count as usize)
    }

    /// Polls once and sorts the signaled descriptors into per-role ready
    /// sets. Returns whether anything became ready.
    pub fn work(&mut self, timeout_ms: i32) -> bool {
        for set in &mut self.ready {
            set.clear();
        }
        match self.poll(timeout_ms) {
            Ok(0) => return false,
            Ok(_) => {}
            Err(_) => return false,
        }
        for (entry, role) in self.fds.iter().zip(&self.roles) {
            if entry.revents & (role.interest() | FAILURE_EVENTS) != 0 {
                self.ready[role.index()].insert(entry.fd);
            }
        }
        self.ready_count() > 0
    }

    // --- Readiness queries ---

    /// Whether `socket` was ready for `role` in the last [`Multiplexer::work`].
    pub fn is_ready<S: HasSocket + ?Sized>(&self, role: Role, socket: &S) -> bool {
        self.ready[role.index()].contains(&socket.socket().raw_fd())
    }

    pub fn is_ready_sender<S: HasSocket + ?Sized>(&self, socket: &S) -> bool {
        self.is_ready(Role::Send, socket)
    }

    pub fn is_ready_reader<S: HasSocket + ?Sized>(&self, socket: &S) -> bool {
        self.is_ready(Role::Receive, socket)
    }

    pub fn is_ready_server<S: HasSocket + ?Sized>(&self, socket: &S) -> bool {
        self.is_ready(Role::Accept, socket)
    }

    pub fn is_ready_client<S: HasSocket + ?Sized>(&self, socket: &S) -> bool {
        self.is_ready(Role::Connect, socket)
    }

    /// Number of registrations across all roles.
    pub fn len(&self) -> usize {
        self.registered.iter().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of (descriptor, role) pairs ready after the last `work`.
    pub fn ready_count(&self) -> usize {
        self.ready.iter().map(BTreeSet::len).sum()
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}
