// src/net/address.rs

//! The address descriptor shared by every socket type.
//!
//! An [`Endpoint`] keeps two views of one IPv4 endpoint: the textual
//! `ip`/`port` pair and the raw `sockaddr_in` handed to the OS. Writers that
//! go through the raw storage (accept, recvfrom, getsockname) must call
//! [`Endpoint::refresh_from_raw`] before the textual view is trusted again.
//! The descriptor is not internally synchronized.

use crate::error::AddressError;
use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};

const SOCKADDR_IN_LEN: libc::socklen_t = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

/// Raw OS address storage plus the length the OS last reported.
#[derive(Clone, Copy)]
struct RawAddr {
    addr: libc::sockaddr_in,
    len: libc::socklen_t,
}

impl RawAddr {
    fn zeroed() -> Self {
        // SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
        let addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        Self {
            addr,
            len: SOCKADDR_IN_LEN,
        }
    }
}

/// A resolved network endpoint: textual IP, port and raw OS address.
#[derive(Clone)]
pub struct Endpoint {
    ip: String,
    port: u16,
    raw: RawAddr,
}

impl Endpoint {
    /// An empty descriptor (no IP, port 0, zeroed raw storage).
    pub fn new() -> Self {
        Self {
            ip: String::new(),
            port: 0,
            raw: RawAddr::zeroed(),
        }
    }

    /// Builds a descriptor from text, e.g. `Endpoint::from_text("127.0.0.1", 8080)`.
    pub fn from_text(ip: &str, port: u16) -> Result<Self, AddressError> {
        let mut endpoint = Self::new();
        endpoint.set_from_text(ip, port)?;
        Ok(endpoint)
    }

    /// Builds a descriptor from a std socket address.
    pub fn from_socket_addr(addr: SocketAddrV4) -> Self {
        let mut raw = RawAddr::zeroed();
        raw.addr.sin_family = libc::AF_INET as libc::sa_family_t;
        raw.addr.sin_port = addr.port().to_be();
        raw.addr.sin_addr = libc::in_addr {
            s_addr: u32::from(*addr.ip()).to_be(),
        };
        Self {
            ip: addr.ip().to_string(),
            port: addr.port(),
            raw,
        }
    }

    /// Parses `ip` as dotted-quad IPv4 and stores it with `port`.
    ///
    /// On failure the descriptor keeps its previous value. Text that is not
    /// an IPv4 address is `Malformed`; text that cannot be handed to the OS
    /// at all (an interior NUL) is a `Conversion` failure, logged with
    /// `EINVAL`.
    pub fn set_from_text(&mut self, ip: &str, port: u16) -> Result<(), AddressError> {
        if ip.contains('\0') {
            let errno = libc::EINVAL;
            tracing::error!(errno, "cannot convert {ip:?}: interior NUL");
            return Err(AddressError::Conversion {
                ip: ip.to_string(),
                errno,
            });
        }

        let addr = match ip.parse::<Ipv4Addr>() {
            Ok(addr) => addr,
            Err(_) => {
                tracing::warn!("invalid IP {ip:?}");
                return Err(AddressError::Malformed(ip.to_string()));
            }
        };

        let mut raw = RawAddr::zeroed();
        raw.addr.sin_family = libc::AF_INET as libc::sa_family_t;
        raw.addr.sin_port = port.to_be();
        raw.addr.sin_addr = libc::in_addr {
            s_addr: u32::from(addr).to_be(),
        };
        self.raw = raw;
        self.ip = ip.to_string();
        self.port = port;
        tracing::trace!("endpoint set to {ip}:{port}");
        Ok(())
    }

    /// Recomputes `ip`/`port` from the raw storage.
    ///
    /// Leaves the textual fields empty (and logs) if the raw storage does not
    /// hold an IPv4 address.
    pub fn refresh_from_raw(&mut self) {
        self.ip.clear();
        self.port = 0;
        if self.raw.addr.sin_family != libc::AF_INET as libc::sa_family_t {
            tracing::warn!(
                family = self.raw.addr.sin_family,
                "cannot render non-IPv4 address"
            );
            return;
        }
        let ip = Ipv4Addr::from(u32::from_be(self.raw.addr.sin_addr.s_addr));
        self.ip = ip.to_string();
        self.port = u16::from_be(self.raw.addr.sin_port);
    }

    /// Resets both views to the empty descriptor.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `true` once an IP has been stored (port 0 is allowed: it asks the OS
    /// for an ephemeral port at bind time).
    pub fn is_set(&self) -> bool {
        !self.ip.is_empty()
    }

    /// The std form of this endpoint, if it holds one.
    pub fn to_socket_addr(&self) -> Option<SocketAddrV4> {
        self.ip
            .parse::<Ipv4Addr>()
            .ok()
            .map(|ip| SocketAddrV4::new(ip, self.port))
    }

    /// `true` if both descriptors are the very same storage.
    pub fn same_storage(&self, other: &Endpoint) -> bool {
        std::ptr::eq(self, other)
    }

    // --- Raw access for the socket layer ---

    pub(crate) fn as_raw(&self) -> (*const libc::sockaddr, libc::socklen_t) {
        (
            &self.raw.addr as *const libc::sockaddr_in as *const libc::sockaddr,
            self.raw.len,
        )
    }

    /// Pointer/length pair for an OS call that writes an address. The length
    /// is reset to the full capacity first; call `refresh_from_raw` afterwards.
    pub(crate) fn as_raw_mut(&mut self) -> (*mut libc::sockaddr, *mut libc::socklen_t) {
        self.raw.len = SOCKADDR_IN_LEN;
        (
            &mut self.raw.addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut self.raw.len,
        )
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.raw.addr.sin_family == other.raw.addr.sin_family
            && self.raw.addr.sin_addr.s_addr == other.raw.addr.sin_addr.s_addr
            && self.raw.addr.sin_port == other.raw.addr.sin_port
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("raw_len", &self.raw.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip() {
        for (ip, port) in [("127.0.0.1", 80), ("0.0.0.0", 0), ("10.1.2.3", 65535), ("255.255.255.255", 1)] {
            let endpoint = Endpoint::from_text(ip, port).unwrap();
            assert_eq!(endpoint.ip(), ip);
            assert_eq!(endpoint.port(), port);
            assert_eq!(endpoint.to_string(), format!("{ip}:{port}"));
        }
    }

    #[test]
    fn malformed_text_keeps_previous_value() {
        let mut endpoint = Endpoint::from_text("192.168.0.1", 4000).unwrap();
        for bad in ["", "localhost", "256.1.1.1", "1.2.3", "1.2.3.4.5", "::1", " 1.2.3.4"] {
            let err = endpoint.set_from_text(bad, 9).unwrap_err();
            assert_eq!(err, AddressError::Malformed(bad.to_string()));
            assert_eq!(endpoint.ip(), "192.168.0.1");
            assert_eq!(endpoint.port(), 4000);
        }
        assert_eq!(endpoint, Endpoint::from_text("192.168.0.1", 4000).unwrap());
    }

    #[test]
    fn interior_nul_is_a_conversion_failure() {
        let mut endpoint = Endpoint::from_text("10.0.0.1", 25).unwrap();
        let err = endpoint.set_from_text("10.0.0.2\0", 26).unwrap_err();
        assert_eq!(
            err,
            AddressError::Conversion {
                ip: "10.0.0.2\0".to_string(),
                errno: libc::EINVAL,
            }
        );
        assert_eq!(endpoint.to_string(), "10.0.0.1:25");
    }

    #[test]
    fn raw_view_stays_in_sync() {
        let mut endpoint = Endpoint::from_text("172.16.5.4", 1234).unwrap();
        endpoint.ip.clear();
        endpoint.port = 0;
        endpoint.refresh_from_raw();
        assert_eq!(endpoint.ip(), "172.16.5.4");
        assert_eq!(endpoint.port(), 1234);
    }

    #[test]
    fn refresh_of_zeroed_storage_clears_text() {
        let mut endpoint = Endpoint::from_text("1.1.1.1", 53).unwrap();
        endpoint.raw = RawAddr::zeroed();
        endpoint.refresh_from_raw();
        assert!(!endpoint.is_set());
        assert_eq!(endpoint.port(), 0);
    }

    #[test]
    fn equality_compares_values_not_storage() {
        let a = Endpoint::from_text("127.0.0.1", 7000).unwrap();
        let b = Endpoint::from_text("127.0.0.1", 7000).unwrap();
        let c = Endpoint::from_text("127.0.0.1", 7001).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.same_storage(&b));
        assert!(a.same_storage(&a));
    }

    #[test]
    fn std_conversion_agrees_with_text() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 7), 8443);
        let endpoint = Endpoint::from_socket_addr(addr);
        assert_eq!(endpoint, Endpoint::from_text("192.0.2.7", 8443).unwrap());
        assert_eq!(endpoint.to_socket_addr(), Some(addr));
        assert_eq!(Endpoint::new().to_socket_addr(), None);
    }
}
