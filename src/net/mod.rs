// src/net/mod.rs

//! The socket layer: move-only OS socket ownership, the IPv4 address
//! descriptor, TCP/UDP operations and a `poll(2)` multiplexer.
//!
//! Nothing in here panics or returns `Err` for expected network conditions.
//! I/O calls report a status enum, and OS failures are logged through
//! `tracing` with the platform error code in an `errno` field.

use std::io;
use std::os::unix::io::RawFd;

pub mod address;
pub mod framing;
pub mod poller;
pub mod socket;
pub mod subsystem;
pub mod tcp;
pub mod udp;

pub use address::Endpoint;
pub use framing::MessageEnd;
pub use poller::{Multiplexer, Role};
pub use socket::{Socket, SocketKind};
pub use subsystem::{Subsystem, SubsystemGuard};
pub use tcp::{AcceptStatus, ConnectionState, IoStatus, TcpClient, TcpServer};
pub use udp::{DatagramStatus, UdpSocket};

/// Sentinel for "no descriptor".
pub const INVALID_SOCKET: RawFd = -1;

/// Size of the scratch buffer used for each OS-level read.
pub(crate) const READ_CHUNK: usize = 2048;

// --- Shared OS helpers ---

/// The platform error code of the last failed OS call on this thread.
pub fn last_error() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Switches `fd` to non-blocking mode.
///
/// On failure the error is logged and the descriptor stays blocking.
pub fn set_nonblocking(fd: RawFd) -> bool {
    // SAFETY: fcntl on an arbitrary integer is memory safe; an invalid
    // descriptor just fails with EBADF.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        let errno = last_error();
        tracing::error!(errno, fd, "fcntl(F_GETFL) failed");
        return false;
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        let errno = last_error();
        tracing::error!(errno, fd, "fcntl(F_SETFL, O_NONBLOCK) failed");
        return false;
    }
    true
}

pub(crate) fn is_would_block(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

// --- HasSocket ---

/// Anything built on a [`Socket`]. The multiplexer registers sockets
/// through this trait.
pub trait HasSocket {
    fn socket(&self) -> &Socket;
    fn socket_mut(&mut self) -> &mut Socket;
}

impl HasSocket for Socket {
    fn socket(&self) -> &Socket {
        self
    }

    fn socket_mut(&mut self) -> &mut Socket {
        self
    }
}
