//! Socket plumbing for the transparent backend
//!
//! Low-level socket creation for the two halves of the decoy server:
//! - the transparent receive socket (`IP_TRANSPARENT` + `IP_RECVORIGDSTADDR`,
//!   or the `IPV6_*` equivalents), which accepts datagrams addressed to
//!   destinations this host does not own and reports where each one was
//!   originally headed, and
//! - the raw reply socket (`SOCK_RAW`/`IPPROTO_RAW` with `IP_HDRINCL`), which
//!   transmits fully application-built IPv4 datagrams without kernel header
//!   rewriting.
//!
//! Both require elevated privileges (`CAP_NET_ADMIN` / `CAP_NET_RAW`).

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::TproxyError;

/// Linux kernel constant: `IP_TRANSPARENT` (`SOL_IP` level).
/// Allows binding to non-local addresses and receiving redirected traffic.
pub const IP_TRANSPARENT: libc::c_int = 19;

/// Linux kernel constant: `IP_RECVORIGDSTADDR` (`SOL_IP` level).
/// Delivers each datagram's original destination in ancillary data (cmsg).
pub const IP_RECVORIGDSTADDR: libc::c_int = 20;

/// Linux kernel constant: `IPV6_TRANSPARENT` (`SOL_IPV6` level)
pub const IPV6_TRANSPARENT: libc::c_int = 75;

/// Linux kernel constant: `IPV6_RECVORIGDSTADDR` (`SOL_IPV6` level)
pub const IPV6_RECVORIGDSTADDR: libc::c_int = 74;

/// Create and bind the transparent UDP receive socket.
///
/// The returned socket has transparent mode and original-destination
/// delivery enabled for the bind address's family, `SO_REUSEADDR` set, and
/// is non-blocking (ready for tokio registration).
///
/// # Errors
///
/// Returns `TproxyError::PermissionDenied` when `CAP_NET_ADMIN` is missing,
/// and `SocketCreation`/`SocketOption`/`BindError` otherwise.
pub fn create_transparent_udp_socket(addr: SocketAddr) -> Result<Socket, TproxyError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TproxyError::SocketCreation(e.to_string()))?;

    if addr.is_ipv6() {
        set_opt(&socket, libc::SOL_IPV6, IPV6_TRANSPARENT, "IPV6_TRANSPARENT")?;
        set_opt(
            &socket,
            libc::SOL_IPV6,
            IPV6_RECVORIGDSTADDR,
            "IPV6_RECVORIGDSTADDR",
        )?;
    } else {
        set_opt(&socket, libc::SOL_IP, IP_TRANSPARENT, "IP_TRANSPARENT")?;
        set_opt(&socket, libc::SOL_IP, IP_RECVORIGDSTADDR, "IP_RECVORIGDSTADDR")?;
    }

    socket
        .set_reuse_address(true)
        .map_err(|e| TproxyError::socket_option("SO_REUSEADDR", e.to_string()))?;

    socket
        .set_nonblocking(true)
        .map_err(|e| TproxyError::socket_option("O_NONBLOCK", e.to_string()))?;

    socket
        .bind(&addr.into())
        .map_err(|e| TproxyError::bind(addr, e.to_string()))?;

    debug!("created transparent UDP socket on {}", addr);
    Ok(socket)
}

/// Create the raw header-included IPv4 reply socket.
///
/// `IPPROTO_RAW` sockets are send-only; every datagram written to one must
/// carry a complete IPv4 header, which `IP_HDRINCL` makes explicit.
///
/// # Errors
///
/// Returns `TproxyError::PermissionDenied` when `CAP_NET_RAW` is missing.
pub fn create_raw_reply_socket() -> Result<Socket, TproxyError> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(libc::IPPROTO_RAW)))
        .map_err(|e| {
            if e.raw_os_error() == Some(libc::EPERM) {
                TproxyError::PermissionDenied
            } else {
                TproxyError::SocketCreation(e.to_string())
            }
        })?;

    set_opt(&socket, libc::IPPROTO_IP, libc::IP_HDRINCL, "IP_HDRINCL")?;

    debug!("created raw reply socket (IP_HDRINCL)");
    Ok(socket)
}

/// Set an integer socket option to 1.
#[allow(clippy::cast_possible_truncation)] // socklen_t is always u32
fn set_opt(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    label: &'static str,
) -> Result<(), TproxyError> {
    let fd = socket.as_raw_fd();
    let one: libc::c_int = 1;

    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            std::ptr::addr_of!(one).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            return Err(TproxyError::PermissionDenied);
        }
        return Err(TproxyError::socket_option(label, err.to_string()));
    }

    Ok(())
}

/// Close a raw descriptor, surfacing the `close(2)` result.
///
/// `Drop` on the socket wrappers swallows close errors; shutdown goes
/// through this instead so failures can be aggregated and reported.
pub(crate) fn close_fd(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::close(fd) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(IP_TRANSPARENT, 19);
        assert_eq!(IP_RECVORIGDSTADDR, 20);
        assert_eq!(IPV6_TRANSPARENT, 75);
        assert_eq!(IPV6_RECVORIGDSTADDR, 74);
    }

    #[test]
    fn test_transparent_socket_creation_without_cap() {
        // With CAP_NET_ADMIN this succeeds; without it we expect a clean
        // PermissionDenied, never a panic.
        match create_transparent_udp_socket("127.0.0.1:0".parse().unwrap()) {
            Ok(_) | Err(TproxyError::PermissionDenied) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_raw_socket_creation_without_cap() {
        match create_raw_reply_socket() {
            Ok(_) | Err(TproxyError::PermissionDenied) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
