//! Transparent receive and raw spoofed send
//!
//! The decoy server's kernel-facing half: a datagram socket that accepts
//! traffic redirected to it by TPROXY rules and recovers each packet's
//! original destination, plus a raw header-included socket that answers
//! with the original destination as the reply's source address.
//!
//! # Platform
//!
//! Both capabilities are Linux-only. The backend is chosen at build time:
//! on other platforms the same types exist but fail fast at construction
//! with [`TproxyError::Unsupported`](crate::error::TproxyError::Unsupported).
//!
//! # Requirements (Linux)
//!
//! - `CAP_NET_ADMIN` (transparent receive) and `CAP_NET_RAW` (raw send),
//!   or root
//! - TPROXY redirection configured outside this process, e.g.:
//!
//! ```bash
//! iptables -t mangle -A PREROUTING -p udp --dport 1820 -j TPROXY \
//!     --on-ip 127.0.0.1 --on-port 1820 --tproxy-mark 0x1
//! ip rule add fwmark 0x1 lookup 100
//! ip route add local 0.0.0.0/0 dev lo table 100
//! ```
//!
//! Depending on the path probes take, `rp_filter` may also need to be
//! relaxed on the ingress interface.

mod packet;

#[cfg(target_os = "linux")]
mod listener;
#[cfg(target_os = "linux")]
mod socket;
#[cfg(target_os = "linux")]
mod spoofer;

#[cfg(not(target_os = "linux"))]
mod unsupported;

use bytes::Bytes;

use crate::endpoint::Endpoint;

pub use packet::{build_udp_datagram, PacketError, IPV4_HEADER_LEN, UDP_HEADER_LEN};

#[cfg(target_os = "linux")]
pub use listener::TransparentListener;
#[cfg(target_os = "linux")]
pub use socket::{
    IPV6_RECVORIGDSTADDR, IPV6_TRANSPARENT, IP_RECVORIGDSTADDR, IP_TRANSPARENT,
};
#[cfg(target_os = "linux")]
pub use spoofer::ReplySpoofer;

#[cfg(not(target_os = "linux"))]
pub use unsupported::{ReplySpoofer, TransparentListener};

/// Largest datagram the listener will accept
pub const MAX_DATAGRAM: usize = 65535;

/// One redirected datagram: payload, sender, and where it was originally
/// addressed before redirection.
///
/// Constructed per receive call and consumed immediately; the server keeps
/// no cross-packet state.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// Packet payload
    pub payload: Bytes,
    /// Sender of the datagram
    pub peer: Endpoint,
    /// Original destination recovered from ancillary data
    pub original_dst: Endpoint,
}

impl Datagram {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Check if running as root (effective UID 0).
///
/// Transparent receive and raw send need capabilities that usually come
/// from root; the server warns at startup when this returns false.
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_datagram_accessors() {
        let datagram = Datagram {
            payload: Bytes::from_static(b"PING"),
            peer: Endpoint::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)), 12345),
            original_dst: Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1820),
        };

        assert_eq!(datagram.len(), 4);
        assert!(!datagram.is_empty());
    }

    #[test]
    fn test_is_root_does_not_crash() {
        let _ = is_root();
    }
}
