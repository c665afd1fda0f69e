// src/net/socket.rs

//! [`Socket`]: exclusive owner of one OS socket descriptor.
//!
//! A `Socket` is never `Clone`. Ownership moves between objects only through
//! [`Socket::take_from`], which leaves the source holding the invalid
//! sentinel, or through [`Socket::adopt`] for a descriptor the OS just handed
//! out. Dropping a valid `Socket` closes its descriptor.

use super::address::Endpoint;
use super::subsystem::{Subsystem, SubsystemGuard};
use super::{last_error, INVALID_SOCKET};
use std::fmt;
use std::mem;
use std::os::unix::io::RawFd;

/// Transport type for [`Socket::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Datagram,
}

impl SocketKind {
    fn as_raw(self) -> libc::c_int {
        match self {
            SocketKind::Stream => libc::SOCK_STREAM,
            SocketKind::Datagram => libc::SOCK_DGRAM,
        }
    }
}

/// One OS socket descriptor plus its local binding.
pub struct Socket {
    fd: RawFd,
    local: Endpoint,
    nonblocking: bool,
    _net: SubsystemGuard<'static>,
}

impl Socket {
    /// A socket object holding no descriptor.
    pub fn empty() -> Self {
        Self {
            fd: INVALID_SOCKET,
            local: Endpoint::new(),
            nonblocking: false,
            _net: Subsystem::global().acquire(),
        }
    }

    /// Opens an IPv4 socket of the given kind. On failure the error is
    /// logged and the object stays empty.
    pub fn open(kind: SocketKind) -> Self {
        let mut socket = Self::empty();
        // SAFETY: plain syscall, no pointers involved.
        let fd = unsafe { libc::socket(libc::AF_INET, kind.as_raw() | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            let errno = last_error();
            tracing::error!(errno, ?kind, "socket() failed");
        } else {
            socket.fd = fd;
        }
        socket
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_valid(&self) -> bool {
        self.fd != INVALID_SOCKET
    }

    /// Like [`Socket::is_valid`], but logs when the descriptor is missing.
    pub(crate) fn check_valid(&self, context: &str) -> bool {
        let valid = self.is_valid();
        if !valid {
            tracing::warn!("{context}: socket is not open");
        }
        valid
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// The local address this socket is bound to (empty until bound or
    /// connected).
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Puts the socket into non-blocking mode. Returns whether it is now
    /// non-blocking.
    pub fn set_nonblocking(&mut self) -> bool {
        if !self.nonblocking && self.is_valid() {
            self.nonblocking = super::set_nonblocking(self.fd);
        }
        self.nonblocking
    }

    /// Enables `SO_REUSEADDR` so a restarted listener can rebind at once.
    pub fn set_reuse_address(&mut self) -> bool {
        if !self.check_valid("set_reuse_address") {
            return false;
        }
        let enable: libc::c_int = 1;
        // SAFETY: the option value points at a live c_int of the stated size.
        let rc = unsafe {
            libc::setsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &enable as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            let errno = last_error();
            tracing::error!(errno, "setsockopt(SO_REUSEADDR) failed");
            return false;
        }
        true
    }

    /// Binds to `endpoint`. Port 0 lets the OS choose; the local endpoint is
    /// refreshed from the OS afterwards either way.
    pub fn bind(&mut self, endpoint: &Endpoint) -> bool {
        if !self.check_valid("bind") {
            return false;
        }
        if !endpoint.is_set() {
            tracing::warn!("bind called without an address");
            return false;
        }
        let (addr, len) = endpoint.as_raw();
        // SAFETY: addr/len describe the endpoint's live sockaddr_in.
        if unsafe { libc::bind(self.fd, addr, len) } != 0 {
            let errno = last_error();
            tracing::error!(errno, "bind to {endpoint} failed");
            return false;
        }
        self.local = endpoint.clone();
        self.refresh_local();
        tracing::debug!("bound to {}", self.local);
        true
    }

    /// Parses `ip`/`port` and binds to it.
    pub fn bind_text(&mut self, ip: &str, port: u16) -> bool {
        match Endpoint::from_text(ip, port) {
            Ok(endpoint) => self.bind(&endpoint),
            Err(_) => false,
        }
    }

    /// Closes the descriptor if one is held. Returns `false` if the OS
    /// reported an error; the descriptor is released either way.
    pub fn close(&mut self) -> bool {
        if !self.is_valid() {
            return true;
        }
        // SAFETY: we own fd exclusively and forget it right after.
        let rc = unsafe { libc::close(self.fd) };
        let closed_cleanly = rc == 0;
        if !closed_cleanly {
            let errno = last_error();
            tracing::error!(errno, fd = self.fd, "close() failed");
        }
        self.fd = INVALID_SOCKET;
        self.nonblocking = false;
        self.local.clear();
        closed_cleanly
    }

    /// Takes ownership of a descriptor produced elsewhere (e.g. by
    /// `accept`), closing whatever this object held before.
    pub fn adopt(&mut self, fd: RawFd, nonblocking: bool) -> bool {
        if fd == INVALID_SOCKET {
            return false;
        }
        self.close();
        self.fd = fd;
        self.nonblocking = nonblocking;
        self.refresh_local();
        true
    }

    /// Moves `source`'s descriptor into `self`, closing `self`'s previous
    /// one. `source` is left empty.
    pub fn take_from(&mut self, source: &mut Socket) {
        if std::ptr::eq(self, source) {
            return;
        }
        self.close();
        self.fd = mem::replace(&mut source.fd, INVALID_SOCKET);
        self.nonblocking = mem::replace(&mut source.nonblocking, false);
        self.local = mem::take(&mut source.local);
    }

    /// Re-reads the local address from the OS (`getsockname`).
    pub(crate) fn refresh_local(&mut self) {
        let (addr, len) = self.local.as_raw_mut();
        // SAFETY: addr/len point into self.local's raw storage.
        if unsafe { libc::getsockname(self.fd, addr, len) } == 0 {
            self.local.refresh_from_raw();
        } else {
            let errno = last_error();
            tracing::error!(errno, "getsockname failed");
        }
    }

    /// Reads and clears the pending socket error (`SO_ERROR`).
    pub(crate) fn take_error(&self) -> i32 {
        let mut error: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: error/len are live locals of the sizes passed.
        let rc = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut error as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return last_error();
        }
        error
    }

    /// Reads an integer `SOL_SOCKET` option.
    pub(crate) fn int_option(&self, option: libc::c_int) -> Option<libc::c_int> {
        let mut value: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: value/len are live locals of the sizes passed.
        let rc = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                option,
                &mut value as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            let errno = last_error();
            tracing::error!(errno, option, "getsockopt failed");
            return None;
        }
        Some(value)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("fd", &self.fd)
            .field("local", &self.local)
            .field("nonblocking", &self.nonblocking)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_socket_is_invalid() {
        let mut socket = Socket::empty();
        assert!(!socket.is_valid());
        assert!(!socket.set_nonblocking());
        assert!(socket.close());
    }

    #[test]
    fn bind_to_ephemeral_port_reports_real_port() {
        let mut socket = Socket::open(SocketKind::Datagram);
        assert!(socket.is_valid());
        assert!(socket.bind_text("127.0.0.1", 0));
        assert_eq!(socket.local_endpoint().ip(), "127.0.0.1");
        assert_ne!(socket.local_endpoint().port(), 0);
    }

    #[test]
    fn bind_rejects_bad_text() {
        let mut socket = Socket::open(SocketKind::Stream);
        assert!(!socket.bind_text("not-an-ip", 0));
        assert!(!socket.local_endpoint().is_set());
    }

    #[test]
    fn take_from_leaves_source_empty() {
        let mut source = Socket::open(SocketKind::Stream);
        assert!(source.set_nonblocking());
        let fd = source.raw_fd();

        let mut target = Socket::open(SocketKind::Stream);
        target.take_from(&mut source);

        assert_eq!(target.raw_fd(), fd);
        assert!(target.is_nonblocking());
        assert!(!source.is_valid());
        assert!(!source.is_nonblocking());
    }

    #[test]
    fn adopt_replaces_and_refreshes() {
        let mut bound = Socket::open(SocketKind::Datagram);
        assert!(bound.bind_text("127.0.0.1", 0));
        let port = bound.local_endpoint().port();
        let mut donor = Socket::empty();
        donor.take_from(&mut bound);

        let mut target = Socket::empty();
        let fd = mem::replace(&mut donor.fd, INVALID_SOCKET);
        assert!(target.adopt(fd, false));
        assert_eq!(target.local_endpoint().port(), port);
        assert!(!target.adopt(INVALID_SOCKET, false));
        assert!(target.is_valid());
    }
}
