//! Transparent UDP listener
//!
//! Receives datagrams that firewall/policy-routing rules redirected to this
//! socket even though they were addressed elsewhere, and recovers each
//! datagram's original destination from the `IP_RECVORIGDSTADDR` /
//! `IPV6_RECVORIGDSTADDR` control message. The original destination is what
//! the decoy server later spoofs as the reply source.
//!
//! The redirection itself (TPROXY rule, fwmark routing table) is host
//! configuration and assumed in place, e.g.:
//!
//! ```bash
//! iptables -t mangle -A PREROUTING -p udp --dport 1820 -j TPROXY \
//!     --on-ip 127.0.0.1 --on-port 1820 --tproxy-mark 0x1
//! ip rule add fwmark 0x1 lookup 100
//! ip route add local 0.0.0.0/0 dev lo table 100
//! ```

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{info, trace};

use super::socket::{
    close_fd, create_transparent_udp_socket, IPV6_RECVORIGDSTADDR, IP_RECVORIGDSTADDR,
};
use super::Datagram;
use crate::endpoint::Endpoint;
use crate::error::TproxyError;

/// Control message buffer size; enough for a `sockaddr_in6` record with
/// cmsg header and alignment.
const CMSG_BUFFER_SIZE: usize = 64;

/// A UDP socket in transparent mode that reports original destinations.
#[derive(Debug)]
pub struct TransparentListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl TransparentListener {
    /// Create and bind a transparent listener.
    ///
    /// # Errors
    ///
    /// Returns `TproxyError` if socket creation, option setting, or binding
    /// fails; `PermissionDenied` without `CAP_NET_ADMIN`.
    pub fn bind(addr: SocketAddr) -> Result<Self, TproxyError> {
        let socket = create_transparent_udp_socket(addr)?;

        let local_addr = socket
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket())
            .unwrap_or(addr);

        // Hand the configured fd to tokio
        let std_socket = unsafe { std::net::UdpSocket::from_raw_fd(socket.into_raw_fd()) };
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TproxyError::socket_option("from_std", e.to_string()))?;

        info!("transparent UDP listener ready on {}", local_addr);

        Ok(Self { socket, local_addr })
    }

    /// Receive one redirected datagram.
    ///
    /// Blocks until a datagram arrives, then returns its payload together
    /// with the sender and the recovered original destination, both
    /// normalized to plain-IPv4 form where applicable.
    ///
    /// # Errors
    ///
    /// Returns `MissingOriginalDestination` when the kernel supplied no
    /// original-destination record, `ControlTruncated` when the cmsg buffer
    /// overflowed, or the underlying I/O error. All of these mean the
    /// receive contract can no longer be met for this datagram.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<Datagram, TproxyError> {
        // Loop instead of recursing on spurious readiness wakeups
        loop {
            self.socket.readable().await.map_err(TproxyError::IoError)?;

            match recv_with_original_dst(self.socket.as_raw_fd(), buf) {
                Ok((n, peer, original_dst)) => {
                    let peer = Endpoint::from(peer);
                    let original_dst = Endpoint::from(original_dst);
                    trace!("udp packet: {} -> {} ({} bytes)", peer, original_dst, n);
                    return Ok(Datagram {
                        payload: Bytes::copy_from_slice(&buf[..n]),
                        peer,
                        original_dst,
                    });
                }
                Err(TproxyError::IoError(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Socket wasn't actually ready; wait again
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener, surfacing the `close(2)` result.
    ///
    /// # Errors
    ///
    /// Returns the error from releasing the descriptor.
    pub fn close(self) -> io::Result<()> {
        let std_socket = self.socket.into_std()?;
        close_fd(std_socket.into_raw_fd())
    }
}

/// `recvmsg` with an ancillary-data buffer, returning payload length,
/// source address, and the original destination extracted from cmsg.
#[allow(clippy::cast_possible_truncation)] // socklen_t is always u32
#[allow(clippy::cast_ptr_alignment)] // CMSG_DATA alignment is handled by the kernel
#[allow(clippy::cast_sign_loss)] // n is checked non-negative
fn recv_with_original_dst(
    fd: RawFd,
    buf: &mut [u8],
) -> Result<(usize, SocketAddr, SocketAddr), TproxyError> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: buf.len(),
    };

    // sockaddr_storage holds either address family
    let mut src_addr: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut cmsg_buf = [0u8; CMSG_BUFFER_SIZE];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = std::ptr::addr_of_mut!(src_addr).cast::<libc::c_void>();
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = std::ptr::addr_of_mut!(iov);
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = CMSG_BUFFER_SIZE;

    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(TproxyError::IoError(io::Error::last_os_error()));
    }

    // A truncated control buffer may have dropped the original-destination
    // record; treat it the same as a missing one.
    if (msg.msg_flags & libc::MSG_CTRUNC) != 0 {
        return Err(TproxyError::ControlTruncated);
    }

    let peer = sockaddr_to_socket_addr(&src_addr).ok_or_else(|| {
        TproxyError::IoError(io::Error::new(
            io::ErrorKind::InvalidData,
            "unrecognized source address family",
        ))
    })?;

    let mut original_dst: Option<SocketAddr> = None;
    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    while !cmsg.is_null() {
        let cmsg_ref = unsafe { &*cmsg };

        if cmsg_ref.cmsg_level == libc::SOL_IP && cmsg_ref.cmsg_type == IP_RECVORIGDSTADDR {
            let addr = unsafe { &*libc::CMSG_DATA(cmsg).cast::<libc::sockaddr_in>() };
            original_dst = Some(sockaddr_in_to_socket_addr(addr));
            break;
        }

        if cmsg_ref.cmsg_level == libc::SOL_IPV6 && cmsg_ref.cmsg_type == IPV6_RECVORIGDSTADDR {
            let addr = unsafe { &*libc::CMSG_DATA(cmsg).cast::<libc::sockaddr_in6>() };
            original_dst = Some(sockaddr_in6_to_socket_addr(addr));
            break;
        }

        cmsg = unsafe { libc::CMSG_NXTHDR(&msg, cmsg) };
    }

    let original_dst = original_dst.ok_or(TproxyError::MissingOriginalDestination)?;

    Ok((n as usize, peer, original_dst))
}

fn sockaddr_to_socket_addr(storage: &libc::sockaddr_storage) -> Option<SocketAddr> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            let addr = unsafe { &*std::ptr::addr_of!(*storage).cast::<libc::sockaddr_in>() };
            Some(sockaddr_in_to_socket_addr(addr))
        }
        libc::AF_INET6 => {
            let addr = unsafe { &*std::ptr::addr_of!(*storage).cast::<libc::sockaddr_in6>() };
            Some(sockaddr_in6_to_socket_addr(addr))
        }
        _ => None,
    }
}

fn sockaddr_in_to_socket_addr(addr: &libc::sockaddr_in) -> SocketAddr {
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    let port = u16::from_be(addr.sin_port);
    SocketAddr::V4(SocketAddrV4::new(ip, port))
}

fn sockaddr_in6_to_socket_addr(addr: &libc::sockaddr_in6) -> SocketAddr {
    let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
    let port = u16::from_be(addr.sin6_port);
    SocketAddr::V6(SocketAddrV6::new(
        ip,
        port,
        addr.sin6_flowinfo,
        addr.sin6_scope_id,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_without_cap() {
        // With CAP_NET_ADMIN the bind succeeds; without it the error must
        // be a clean PermissionDenied.
        match TransparentListener::bind("127.0.0.1:0".parse().unwrap()) {
            Ok(listener) => {
                assert_ne!(listener.local_addr().port(), 0);
                listener.close().expect("close");
            }
            Err(TproxyError::PermissionDenied) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_sockaddr_in_conversion() {
        let mut raw: libc::sockaddr_in = unsafe { mem::zeroed() };
        raw.sin_family = libc::AF_INET as libc::sa_family_t;
        raw.sin_port = 18200u16.to_be();
        raw.sin_addr.s_addr = u32::from(Ipv4Addr::new(127, 0, 0, 1)).to_be();

        let addr = sockaddr_in_to_socket_addr(&raw);
        assert_eq!(addr, "127.0.0.1:18200".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_sockaddr_in6_conversion() {
        let mut raw: libc::sockaddr_in6 = unsafe { mem::zeroed() };
        raw.sin6_family = libc::AF_INET6 as libc::sa_family_t;
        raw.sin6_port = 443u16.to_be();
        raw.sin6_addr.s6_addr = "2001:db8::1".parse::<Ipv6Addr>().unwrap().octets();

        let addr = sockaddr_in6_to_socket_addr(&raw);
        assert_eq!(addr, "[2001:db8::1]:443".parse::<SocketAddr>().unwrap());
    }
}
