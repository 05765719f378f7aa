//! Endpoint value type
//!
//! A dual-stack datagram socket reports IPv4 peers as IPv4-mapped IPv6
//! addresses (`::ffff:a.b.c.d`), while the original-destination control
//! message carries the plain form. [`Endpoint`] unmaps on construction so
//! that equality checks, log output, and packet construction all see one
//! canonical representation regardless of which path an address arrived on.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// An IP address and port pair, normalized on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    addr: IpAddr,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint, collapsing an IPv4-mapped IPv6 address to plain IPv4.
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self {
            addr: unmap(addr),
            port,
        }
    }

    /// The normalized address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The address as IPv4, if it is one after normalization.
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self.addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        }
    }

    /// Convert back to a `SocketAddr` for socket APIs.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SocketAddr handles the `[v6]:port` bracket form
        self.socket_addr().fmt(f)
    }
}

fn unmap(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(_) => addr,
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => addr,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_mapped_and_plain_forms_compare_equal() {
        let plain = Endpoint::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)), 9999);
        let mapped = Endpoint::new("::ffff:192.168.1.5".parse().unwrap(), 9999);

        assert_eq!(plain, mapped);
        assert_eq!(plain.to_string(), mapped.to_string());
        assert_eq!(mapped.to_string(), "192.168.1.5:9999");
    }

    #[test]
    fn test_mapped_address_is_ipv4() {
        let mapped = Endpoint::new("::ffff:10.0.0.1".parse().unwrap(), 443);
        assert_eq!(mapped.as_ipv4(), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_plain_ipv6_stays_ipv6() {
        let v6 = Endpoint::new("2001:db8::1".parse().unwrap(), 53);
        assert_eq!(v6.as_ipv4(), None);
        assert_eq!(v6.addr(), IpAddr::V6("2001:db8::1".parse::<Ipv6Addr>().unwrap()));
        assert_eq!(v6.to_string(), "[2001:db8::1]:53");
    }

    #[test]
    fn test_socket_addr_round_trip() {
        let addr: SocketAddr = "127.0.0.1:18200".parse().unwrap();
        let endpoint = Endpoint::from(addr);
        assert_eq!(SocketAddr::from(endpoint), addr);
        assert_eq!(endpoint.port(), 18200);
    }
}
