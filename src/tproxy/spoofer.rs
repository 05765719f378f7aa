//! Spoofed reply sender
//!
//! Answers redirected probes as if the original destination had replied
//! itself: each reply is a complete IPv4+UDP datagram whose source address
//! is the probe's original destination, written through a raw
//! header-included socket. The kernel routes the finished packet without
//! touching its headers.
//!
//! One spoofer instance exists per server and is written from a single
//! sequential loop, so no locking is involved.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::os::unix::io::IntoRawFd;

use socket2::Socket;
use tracing::trace;

use super::packet::build_udp_datagram;
use super::socket::{close_fd, create_raw_reply_socket};
use crate::endpoint::Endpoint;
use crate::error::{SpoofError, TproxyError};

/// Raw IPv4 socket that transmits application-built datagrams.
#[derive(Debug)]
pub struct ReplySpoofer {
    socket: Socket,
}

impl ReplySpoofer {
    /// Open the raw reply socket.
    ///
    /// # Errors
    ///
    /// Returns `TproxyError::PermissionDenied` without `CAP_NET_RAW`.
    pub fn open() -> Result<Self, TproxyError> {
        Ok(Self {
            socket: create_raw_reply_socket()?,
        })
    }

    /// Build and transmit one spoofed datagram.
    ///
    /// `spoofed_src` becomes the packet's source address and port —
    /// typically the original destination of a redirected probe.
    /// Returns the number of bytes written (headers included).
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAddressFamily` if either endpoint is not IPv4
    /// (checked before anything is built), `Serialization` if the packet
    /// cannot be constructed, or `Send` if the kernel rejects the write.
    /// In the first two cases nothing reaches the network.
    pub fn send(
        &self,
        payload: &[u8],
        spoofed_src: Endpoint,
        dst: Endpoint,
    ) -> Result<usize, SpoofError> {
        let src = require_ipv4(spoofed_src)?;
        let dst = require_ipv4(dst)?;

        let pkt = build_udp_datagram(payload, src, dst)?;

        // The kernel routes by the sockaddr destination; the port in it is
        // ignored for IPPROTO_RAW.
        let target = SocketAddr::V4(SocketAddrV4::new(*dst.ip(), 0));
        let written = self
            .socket
            .send_to(&pkt, &target.into())
            .map_err(SpoofError::Send)?;

        trace!("spoofed {} byte reply {} -> {}", written, src, dst);
        Ok(written)
    }

    /// Close the spoofer, surfacing the `close(2)` result.
    ///
    /// # Errors
    ///
    /// Returns the error from releasing the descriptor.
    pub fn close(self) -> io::Result<()> {
        close_fd(self.socket.into_raw_fd())
    }
}

fn require_ipv4(endpoint: Endpoint) -> Result<SocketAddrV4, SpoofError> {
    match endpoint.as_ipv4() {
        Some(ip) => Ok(SocketAddrV4::new(ip, endpoint.port())),
        None => Err(SpoofError::UnsupportedAddressFamily {
            addr: endpoint.addr(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_require_ipv4_accepts_v4_and_mapped() {
        let plain = Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 443);
        assert_eq!(
            require_ipv4(plain).unwrap(),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 443)
        );

        // Mapped form normalizes to IPv4 on Endpoint construction
        let mapped = Endpoint::new("::ffff:10.0.0.1".parse().unwrap(), 443);
        assert!(require_ipv4(mapped).is_ok());
    }

    #[test]
    fn test_require_ipv4_rejects_v6() {
        let v6 = Endpoint::new("2001:db8::1".parse().unwrap(), 443);
        let err = require_ipv4(v6).unwrap_err();
        assert!(matches!(err, SpoofError::UnsupportedAddressFamily { .. }));
    }

    #[test]
    fn test_open_without_cap() {
        match ReplySpoofer::open() {
            Ok(spoofer) => {
                // Privileged environment: exercise a real loopback send
                let src = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 18200);
                let dst = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999);
                let written = spoofer.send(b"PONG", src, dst).expect("loopback send");
                assert_eq!(written, 20 + 8 + 4);
                spoofer.close().expect("close");
            }
            Err(TproxyError::PermissionDenied) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_send_rejects_v6_before_writing() {
        // The family guard runs before the socket is touched, so it is
        // testable regardless of privileges only when open succeeds.
        if let Ok(spoofer) = ReplySpoofer::open() {
            let v6 = Endpoint::new("2001:db8::1".parse().unwrap(), 443);
            let v4 = Endpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999);
            let err = spoofer.send(b"PONG", v6, v4).unwrap_err();
            assert!(matches!(err, SpoofError::UnsupportedAddressFamily { .. }));
        }
    }
}
