// src/net/tcp.rs

//! TCP client and server sockets.
//!
//! Blocking sockets loop inside `receive`/`send` until the message is
//! complete; non-blocking sockets make exactly one attempt per call and
//! report how far they got.

use super::address::Endpoint;
use super::framing::MessageEnd;
use super::socket::{Socket, SocketKind};
use super::{is_would_block, last_error, HasSocket, READ_CHUNK};
use std::os::unix::io::RawFd;

// --- IoStatus ---
/// Outcome of a TCP `receive` or `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The whole message was transferred.
    Complete,
    /// Only part of the message moved in this call (non-blocking only);
    /// carries the byte count of the call.
    Partial(usize),
    /// The OS call failed. The connection is now closed.
    SystemError,
    /// The peer closed the connection, or it was not open to begin with.
    PeerClosed,
    /// Non-blocking socket with nothing to transfer yet.
    WouldBlock,
}

impl IoStatus {
    /// Numeric form: `0`, `n`, `-1`, `-2`, `-3`.
    pub fn code(self) -> i32 {
        match self {
            IoStatus::Complete => 0,
            IoStatus::Partial(n) => n as i32,
            IoStatus::SystemError => -1,
            IoStatus::PeerClosed => -2,
            IoStatus::WouldBlock => -3,
        }
    }

    pub fn is_complete(self) -> bool {
        self == IoStatus::Complete
    }
}

// --- AcceptStatus ---
/// Outcome of [`TcpServer::add_client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptStatus {
    /// A connection was accepted and moved into the client object.
    Accepted,
    /// Non-blocking server with no pending connection.
    NoPendingConnection,
    /// `accept` failed.
    SystemError,
    /// The client object already holds a socket, or the server is unusable.
    InvalidArgument,
}

impl AcceptStatus {
    /// Numeric form: `0`, `-2`, `-1`, `-3`.
    pub fn code(self) -> i32 {
        match self {
            AcceptStatus::Accepted => 0,
            AcceptStatus::NoPendingConnection => -2,
            AcceptStatus::SystemError => -1,
            AcceptStatus::InvalidArgument => -3,
        }
    }
}

// --- ConnectionState ---
/// Lifecycle of a [`TcpClient`]. `Closed` is terminal for the descriptor it
/// was reached on; only a new descriptor (adopt/take_from) leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Closed,
}

// --- TcpClient ---
/// A TCP stream socket together with its peer address.
#[derive(Debug)]
pub struct TcpClient {
    socket: Socket,
    state: ConnectionState,
    peer: Endpoint,
}

impl TcpClient {
    /// A client object with no descriptor; the usual target for
    /// [`TcpServer::add_client`].
    pub fn new() -> Self {
        Self {
            socket: Socket::empty(),
            state: ConnectionState::Unconnected,
            peer: Endpoint::new(),
        }
    }

    /// Opens a stream socket aimed at `peer` without connecting yet, so it
    /// can be made non-blocking first.
    pub fn open(peer: &Endpoint) -> Self {
        Self {
            socket: Socket::open(SocketKind::Stream),
            state: ConnectionState::Unconnected,
            peer: peer.clone(),
        }
    }

    /// Opens a stream socket and connects it to `peer` (blocking).
    pub fn connect_to(peer: &Endpoint) -> Self {
        let mut client = Self::open(peer);
        client.connect();
        client
    }

    /// Parses `ip`/`port` and connects. A malformed address leaves the
    /// client unconnected.
    pub fn connect_text(ip: &str, port: u16) -> Self {
        match Endpoint::from_text(ip, port) {
            Ok(peer) => Self::connect_to(&peer),
            Err(_) => Self::new(),
        }
    }

    /// Connects to the stored peer address.
    ///
    /// Idempotent once connected. A non-blocking socket moves to
    /// `Connecting` and returns `false`; finish with
    /// [`TcpClient::finish_connect`] once the socket polls writable. A failed
    /// attempt is logged and leaves the client `Unconnected`.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected => return true,
            ConnectionState::Connecting => return self.finish_connect(),
            ConnectionState::Closed => return false,
            ConnectionState::Unconnected => {}
        }
        if !self.socket.check_valid("connect") || !self.peer.is_set() {
            return false;
        }

        let (addr, len) = self.peer.as_raw();
        // SAFETY: addr/len describe the peer's live sockaddr_in.
        if unsafe { libc::connect(self.socket.raw_fd(), addr, len) } == 0 {
            self.mark_connected();
            return true;
        }

        let errno = last_error();
        if self.socket.is_nonblocking() && errno == libc::EINPROGRESS {
            tracing::debug!("connect to {} in progress", self.peer);
            self.state = ConnectionState::Connecting;
        } else {
            tracing::error!(errno, "connect to {} failed", self.peer);
        }
        false
    }

    /// Completes a non-blocking connect. Returns `true` once connected;
    /// `false` while still in progress or after a logged failure (the client
    /// is then `Unconnected` again).
    pub fn finish_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected => return true,
            ConnectionState::Connecting => {}
            _ => return false,
        }
        let errno = self.socket.take_error();
        if errno != 0 {
            tracing::error!(errno, "connect to {} failed", self.peer);
            self.state = ConnectionState::Unconnected;
            return false;
        }
        let mut remote = Endpoint::new();
        let (addr, len) = remote.as_raw_mut();
        // SAFETY: addr/len point into remote's raw storage.
        if unsafe { libc::getpeername(self.socket.raw_fd(), addr, len) } != 0 {
            // ENOTCONN: the handshake has not finished yet.
            return false;
        }
        self.mark_connected();
        true
    }

    fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        // The OS picked our local endpoint implicitly.
        self.socket.refresh_local();
        tracing::debug!("connected {} -> {}", self.socket.local_endpoint(), self.peer);
    }

    /// Reads one message into `buffer` (cleared first) according to `end`.
    ///
    /// A blocking socket keeps reading until `end` is satisfied; a
    /// non-blocking one reads once. A zero-byte read means the peer closed.
    pub fn receive(&mut self, buffer: &mut Vec<u8>, end: &MessageEnd) -> IoStatus {
        if self.state != ConnectionState::Connected || !self.socket.is_valid() {
            return IoStatus::PeerClosed;
        }
        buffer.clear();
        let nonblocking = self.socket.is_nonblocking();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            // SAFETY: chunk is a live buffer of the length passed.
            let received = unsafe {
                libc::recv(
                    self.socket.raw_fd(),
                    chunk.as_mut_ptr() as *mut libc::c_void,
                    chunk.len(),
                    0,
                )
            };

            if received > 0 {
                let received = received as usize;
                buffer.extend_from_slice(&chunk[..received]);
                tracing::trace!(bytes = received, "received from {}", self.peer);
                if end.is_satisfied(buffer) {
                    return IoStatus::Complete;
                }
                if nonblocking {
                    return IoStatus::Partial(received);
                }
            } else if received == 0 {
                self.state = ConnectionState::Closed;
                return IoStatus::PeerClosed;
            } else {
                let errno = last_error();
                if errno == libc::EINTR && !nonblocking {
                    continue;
                }
                if nonblocking && is_would_block(errno) {
                    return IoStatus::WouldBlock;
                }
                tracing::error!(errno, "recv from {} failed", self.peer);
                self.state = ConnectionState::Closed;
                return IoStatus::SystemError;
            }
        }
    }

    /// Sends all of `data` (blocking) or as much as the OS takes in one call
    /// (non-blocking). An empty `data` succeeds immediately.
    pub fn send(&mut self, data: &[u8]) -> IoStatus {
        if self.state != ConnectionState::Connected || !self.socket.is_valid() {
            return IoStatus::PeerClosed;
        }
        let nonblocking = self.socket.is_nonblocking();
        let mut sent = 0usize;

        loop {
            let rest = &data[sent..];
            // SAFETY: rest is a live slice of the length passed.
            let written = unsafe {
                libc::send(
                    self.socket.raw_fd(),
                    rest.as_ptr() as *const libc::c_void,
                    rest.len(),
                    libc::MSG_NOSIGNAL,
                )
            };

            if written > 0 {
                sent += written as usize;
                if sent == data.len() {
                    return IoStatus::Complete;
                }
                if nonblocking {
                    return IoStatus::Partial(sent);
                }
            } else if written == 0 {
                return if data.is_empty() {
                    IoStatus::Complete
                } else {
                    IoStatus::SystemError
                };
            } else {
                let errno = last_error();
                if errno == libc::EINTR && !nonblocking {
                    continue;
                }
                if nonblocking && is_would_block(errno) {
                    return if sent == 0 {
                        IoStatus::WouldBlock
                    } else {
                        IoStatus::Partial(sent)
                    };
                }
                tracing::error!(errno, "send to {} failed", self.peer);
                self.state = ConnectionState::Closed;
                return IoStatus::SystemError;
            }
        }
    }

    /// Moves `source`'s descriptor, connection state and peer address into
    /// `self`, closing `self`'s previous descriptor. `source` ends up empty
    /// and `Unconnected`.
    pub fn take_from(&mut self, source: &mut TcpClient) {
        self.socket.take_from(&mut source.socket);
        self.state = std::mem::replace(&mut source.state, ConnectionState::Unconnected);
        self.peer = std::mem::take(&mut source.peer);
    }

    /// Installs a freshly accepted descriptor. Only the server calls this.
    pub(crate) fn adopt_accepted(&mut self, fd: RawFd, peer: Endpoint) -> bool {
        if !self.socket.adopt(fd, false) {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.peer = peer;
        true
    }

    /// Closes the descriptor and forgets the peer.
    pub fn close(&mut self) {
        self.socket.close();
        self.state = ConnectionState::Closed;
        self.peer.clear();
    }

    /// Puts the socket into non-blocking mode.
    pub fn set_nonblocking(&mut self) -> bool {
        self.socket.set_nonblocking()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    pub fn peer_endpoint(&self) -> &Endpoint {
        &self.peer
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        self.socket.local_endpoint()
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HasSocket for TcpClient {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

// --- TcpServer ---
/// A bound, listening TCP socket.
///
/// Construction never fails outright: if bind or listen fails the error is
/// logged and the server is left without a descriptor, so every
/// `add_client` call returns [`AcceptStatus::InvalidArgument`].
#[derive(Debug)]
pub struct TcpServer {
    socket: Socket,
}

impl TcpServer {
    /// Binds to `ip:port` and listens. Port 0 picks an ephemeral port; read
    /// it back from [`TcpServer::local_endpoint`].
    pub fn bind(ip: &str, port: u16) -> Self {
        match Endpoint::from_text(ip, port) {
            Ok(endpoint) => Self::bind_endpoint(&endpoint),
            Err(_) => Self {
                socket: Socket::empty(),
            },
        }
    }

    pub fn bind_endpoint(endpoint: &Endpoint) -> Self {
        let mut socket = Socket::open(SocketKind::Stream);
        if socket.is_valid() {
            socket.set_reuse_address();
            if !socket.bind(endpoint) {
                socket.close();
            }
        }
        if socket.is_valid() {
            // SAFETY: plain syscall on a descriptor we own.
            if unsafe { libc::listen(socket.raw_fd(), libc::SOMAXCONN) } != 0 {
                let errno = last_error();
                tracing::error!(errno, "listen on {endpoint} failed");
                socket.close();
            } else {
                tracing::info!("listening on {}", socket.local_endpoint());
            }
        }
        Self { socket }
    }

    /// Accepts one connection into `client`.
    ///
    /// `client` must not already hold a descriptor. On success it becomes
    /// `Connected` with the accepted peer's address.
    pub fn add_client(&self, client: &mut TcpClient) -> AcceptStatus {
        if client.is_valid() || !self.socket.is_valid() {
            return AcceptStatus::InvalidArgument;
        }

        let mut peer = Endpoint::new();
        let fd = loop {
            let (addr, len) = peer.as_raw_mut();
            // SAFETY: addr/len point into peer's raw storage.
            let fd = unsafe { libc::accept(self.socket.raw_fd(), addr, len) };
            if fd >= 0 {
                break fd;
            }
            let errno = last_error();
            if errno == libc::EINTR && !self.socket.is_nonblocking() {
                continue;
            }
            if self.socket.is_nonblocking() && is_would_block(errno) {
                return AcceptStatus::NoPendingConnection;
            }
            tracing::error!(errno, "accept on {} failed", self.socket.local_endpoint());
            return AcceptStatus::SystemError;
        };

        peer.refresh_from_raw();
        if !client.adopt_accepted(fd, peer) {
            tracing::error!("could not install accepted descriptor {fd}");
            return AcceptStatus::SystemError;
        }
        tracing::debug!("accepted client {}", client.peer_endpoint());
        AcceptStatus::Accepted
    }

    pub fn set_nonblocking(&mut self) -> bool {
        self.socket.set_nonblocking()
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        self.socket.local_endpoint()
    }
}

impl HasSocket for TcpServer {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}
