// src/net/udp.rs

//! Connectionless datagram socket.

use super::address::Endpoint;
use super::framing::MessageEnd;
use super::socket::{Socket, SocketKind};
use super::{is_would_block, last_error, HasSocket};

/// Largest IPv4 UDP payload (65535 - 8 byte UDP header - 20 byte IP header).
pub const MAX_DATAGRAM: usize = 65_507;

// --- DatagramStatus ---
/// Outcome of a UDP `send_to` or `recv_from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramStatus {
    /// The whole datagram was sent, or the received datagram completes the
    /// message.
    Complete,
    /// Byte count of a short send, or of a received datagram that does not
    /// satisfy the end-of-message rule.
    Partial(usize),
    /// The OS call failed.
    SystemError,
    /// Payload of at least MTU bytes, or the socket is not open. No OS call
    /// was made.
    Rejected,
    /// Non-blocking socket not ready.
    WouldBlock,
}

impl DatagramStatus {
    /// Numeric form: `0`, `n`, `-1`, `-2`, `-3`.
    pub fn code(self) -> i32 {
        match self {
            DatagramStatus::Complete => 0,
            DatagramStatus::Partial(n) => n as i32,
            DatagramStatus::SystemError => -1,
            DatagramStatus::Rejected => -2,
            DatagramStatus::WouldBlock => -3,
        }
    }
}

// --- UdpSocket ---
/// A datagram socket that remembers the last peer it talked to.
///
/// The MTU is read from the OS once, when the socket is created. If that
/// fails the MTU is 0 and every send is rejected.
#[derive(Debug)]
pub struct UdpSocket {
    socket: Socket,
    mtu: usize,
    last_peer: Endpoint,
}

impl UdpSocket {
    /// An unbound datagram socket; the OS assigns a local port on first send.
    pub fn new() -> Self {
        let socket = Socket::open(SocketKind::Datagram);
        let mtu = query_mtu(&socket);
        Self {
            socket,
            mtu,
            last_peer: Endpoint::new(),
        }
    }

    /// A datagram socket bound to `ip:port`. A bind failure is logged and the
    /// socket is closed.
    pub fn bind(ip: &str, port: u16) -> Self {
        match Endpoint::from_text(ip, port) {
            Ok(endpoint) => Self::bind_endpoint(&endpoint),
            Err(_) => Self {
                socket: Socket::empty(),
                mtu: 0,
                last_peer: Endpoint::new(),
            },
        }
    }

    pub fn bind_endpoint(endpoint: &Endpoint) -> Self {
        let mut udp = Self::new();
        if udp.socket.is_valid() && !udp.socket.bind(endpoint) {
            udp.socket.close();
        }
        udp
    }

    /// Sends `data` as one datagram to `target`.
    ///
    /// `target` becomes the last peer whatever the outcome.
    pub fn send_to(&mut self, data: &[u8], target: &Endpoint) -> DatagramStatus {
        if self.last_peer != *target {
            self.last_peer = target.clone();
        }
        self.send_to_last(data)
    }

    /// Sends `data` to the last peer this socket exchanged datagrams with.
    pub fn send_to_last(&mut self, data: &[u8]) -> DatagramStatus {
        if !self.socket.is_valid() || data.len() >= self.mtu {
            return DatagramStatus::Rejected;
        }
        if !self.last_peer.is_set() {
            tracing::warn!("send_to without a peer address");
            return DatagramStatus::SystemError;
        }

        let (addr, len) = self.last_peer.as_raw();
        // SAFETY: data and the peer address are live for the duration of the call.
        let sent = unsafe {
            libc::sendto(
                self.socket.raw_fd(),
                data.as_ptr() as *const libc::c_void,
                data.len(),
                libc::MSG_NOSIGNAL,
                addr,
                len,
            )
        };

        if sent > 0 {
            let sent = sent as usize;
            tracing::trace!(bytes = sent, "sendto {}", self.last_peer);
            if sent == data.len() {
                DatagramStatus::Complete
            } else {
                DatagramStatus::Partial(sent)
            }
        } else if sent == 0 {
            if data.is_empty() {
                DatagramStatus::Complete
            } else {
                DatagramStatus::SystemError
            }
        } else {
            let errno = last_error();
            if self.socket.is_nonblocking() && is_would_block(errno) {
                return DatagramStatus::WouldBlock;
            }
            tracing::error!(errno, "sendto {} failed", self.last_peer);
            DatagramStatus::SystemError
        }
    }

    /// Parses `ip`/`port` into the last peer and sends there. A malformed
    /// address is a `SystemError` and leaves the last peer unchanged.
    pub fn send_to_text(&mut self, data: &[u8], ip: &str, port: u16) -> DatagramStatus {
        if self.last_peer.set_from_text(ip, port).is_err() {
            return DatagramStatus::SystemError;
        }
        self.send_to_last(data)
    }

    /// Receives one datagram into `buffer` (cleared first) and records its
    /// sender as the last peer.
    ///
    /// One datagram per call, whatever the socket mode; `end` decides whether
    /// it counts as a complete message. An empty datagram is complete.
    pub fn recv_from(&mut self, buffer: &mut Vec<u8>, end: &MessageEnd) -> DatagramStatus {
        if !self.socket.is_valid() {
            return DatagramStatus::Rejected;
        }
        buffer.clear();
        buffer.resize(MAX_DATAGRAM, 0);

        let mut sender = Endpoint::new();
        let received = loop {
            let (addr, len) = sender.as_raw_mut();
            // SAFETY: buffer and sender storage are live and sized as passed.
            let received = unsafe {
                libc::recvfrom(
                    self.socket.raw_fd(),
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                    0,
                    addr,
                    len,
                )
            };
            if received >= 0 {
                break received as usize;
            }
            buffer.clear();
            let errno = last_error();
            if errno == libc::EINTR && !self.socket.is_nonblocking() {
                buffer.resize(MAX_DATAGRAM, 0);
                continue;
            }
            if self.socket.is_nonblocking() && is_would_block(errno) {
                return DatagramStatus::WouldBlock;
            }
            tracing::error!(errno, "recvfrom failed");
            return DatagramStatus::SystemError;
        };

        buffer.truncate(received);
        sender.refresh_from_raw();
        tracing::trace!(bytes = received, "recvfrom {sender}");
        self.last_peer = sender;

        if received == 0 || end.is_satisfied(buffer) {
            DatagramStatus::Complete
        } else {
            DatagramStatus::Partial(received)
        }
    }

    /// Moves `source`'s descriptor, MTU and last peer into `self`.
    pub fn take_from(&mut self, source: &mut UdpSocket) {
        self.socket.take_from(&mut source.socket);
        self.mtu = std::mem::take(&mut source.mtu);
        self.last_peer = std::mem::take(&mut source.last_peer);
    }

    pub fn set_nonblocking(&mut self) -> bool {
        self.socket.set_nonblocking()
    }

    pub fn is_valid(&self) -> bool {
        self.socket.is_valid()
    }

    /// Payloads must be strictly smaller than this.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn last_peer(&self) -> &Endpoint {
        &self.last_peer
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        self.socket.local_endpoint()
    }
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl HasSocket for UdpSocket {
    fn socket(&self) -> &Socket {
        &self.socket
    }

    fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }
}

/// Largest datagram the socket accepts: the send buffer size, capped at the
/// protocol maximum.
fn query_mtu(socket: &Socket) -> usize {
    if !socket.is_valid() {
        return 0;
    }
    match socket.int_option(libc::SO_SNDBUF) {
        Some(size) if size > 0 => (size as usize).min(MAX_DATAGRAM),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_is_capped() {
        let udp = UdpSocket::new();
        assert!(udp.is_valid());
        assert!(udp.mtu() > 0);
        assert!(udp.mtu() <= MAX_DATAGRAM);
    }

    #[test]
    fn oversized_payload_is_rejected_before_sending() {
        let mut udp = UdpSocket::new();
        let target = Endpoint::from_text("127.0.0.1", 9).unwrap();
        let payload = vec![0u8; udp.mtu()];
        assert_eq!(udp.send_to(&payload, &target), DatagramStatus::Rejected);
        // The target is remembered even for a rejected send.
        assert_eq!(udp.last_peer(), &target);
    }

    #[test]
    fn closed_socket_rejects() {
        let mut udp = UdpSocket::bind("not-an-ip", 0);
        assert!(!udp.is_valid());
        let mut buffer = Vec::new();
        assert_eq!(udp.recv_from(&mut buffer, &MessageEnd::any_read()), DatagramStatus::Rejected);
        assert_eq!(udp.send_to_last(b"x"), DatagramStatus::Rejected);
    }

    #[test]
    fn bad_text_target_keeps_last_peer() {
        let mut udp = UdpSocket::new();
        let target = Endpoint::from_text("127.0.0.1", 9).unwrap();
        udp.send_to(&[0u8; 0], &target);
        assert_eq!(udp.send_to_text(b"x", "nope", 1), DatagramStatus::SystemError);
        assert_eq!(udp.last_peer(), &target);
    }

    #[test]
    fn status_codes() {
        assert_eq!(DatagramStatus::Complete.code(), 0);
        assert_eq!(DatagramStatus::Partial(5).code(), 5);
        assert_eq!(DatagramStatus::SystemError.code(), -1);
        assert_eq!(DatagramStatus::Rejected.code(), -2);
        assert_eq!(DatagramStatus::WouldBlock.code(), -3);
    }
}
