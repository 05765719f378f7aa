//! Probe client
//!
//! Dials a connected UDP socket from a fixed local port and performs
//! cancellable request/response exchanges. The local port matters: the
//! server's spoofed reply is addressed to it, and only a socket still bound
//! there will receive it.
//!
//! Cancellation is structured: `exchange` races the pending receive against
//! the token inside one `select!`, so a cancelled call unblocks promptly and
//! leaves no task touching the socket. The client is safe to reuse serially
//! for any number of exchanges.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;

/// Receive buffer size; probe payloads are small.
const RECV_BUFFER_SIZE: usize = 4096;

/// A connected datagram client for probing a decoy server.
#[derive(Debug)]
pub struct ProbeClient {
    socket: UdpSocket,
    request: Bytes,
    response: Bytes,
}

impl ProbeClient {
    /// Bind the fixed local port and connect to the remote endpoint.
    ///
    /// The wildcard address of the remote's family is used locally. Port 0
    /// asks the OS for an ephemeral port, which is only useful for tests —
    /// a real probe must use the port the protected service would use.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Dial`] if binding or connecting fails.
    pub async fn dial(
        local_port: u16,
        remote: SocketAddr,
        request: Bytes,
        response: Bytes,
    ) -> Result<Self, ClientError> {
        let local: SocketAddr = if remote.is_ipv4() {
            (IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port).into()
        } else {
            (IpAddr::V6(Ipv6Addr::UNSPECIFIED), local_port).into()
        };

        let socket = UdpSocket::bind(local).await.map_err(|e| ClientError::Dial {
            addr: remote,
            reason: format!("bind to {local}: {e}"),
        })?;
        socket.connect(remote).await.map_err(|e| ClientError::Dial {
            addr: remote,
            reason: e.to_string(),
        })?;

        debug!("probe client dialed {} from {}", remote, local);

        Ok(Self {
            socket,
            request,
            response,
        })
    }

    /// The bound local address.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the socket cannot report it.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Perform one request/response exchange.
    ///
    /// Sends the request exactly once, then receives until a datagram
    /// matches the expected response byte-for-byte; non-matching datagrams
    /// are skipped. Returns as soon as a match arrives.
    ///
    /// # Errors
    ///
    /// [`ClientError::Cancelled`] if the token fires before a match,
    /// [`ClientError::Send`]/[`ClientError::Recv`] for socket failures.
    /// No state survives a failed exchange; the client remains usable.
    pub async fn exchange(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        self.socket
            .send(&self.request)
            .await
            .map_err(ClientError::Send)?;

        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(ClientError::Cancelled),
                received = self.socket.recv(&mut buf) => {
                    let n = received.map_err(ClientError::Recv)?;
                    if buf[..n] == self.response[..] {
                        return Ok(());
                    }
                    debug!("ignoring {n} byte datagram that is not the expected response");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_binds_requested_local_port() {
        // Pick a port by binding an ephemeral socket first, then release it
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let client = ProbeClient::dial(
            port,
            "127.0.0.1:18200".parse().unwrap(),
            Bytes::from_static(b"PING"),
            Bytes::from_static(b"PONG"),
        )
        .await
        .expect("dial");

        assert_eq!(client.local_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn test_dial_error_reports_remote() {
        // Port 1 is almost certainly bound or privileged; force a bind
        // failure by occupying the port first.
        let holder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        // Binding 0.0.0.0:port collides with the holder on Linux only if
        // the address overlaps; use the same wildcard to guarantee it.
        let wildcard_holder = UdpSocket::bind(("0.0.0.0", 0)).await.unwrap();
        let taken = wildcard_holder.local_addr().unwrap().port();

        let result = ProbeClient::dial(
            taken,
            "127.0.0.1:18200".parse().unwrap(),
            Bytes::from_static(b"PING"),
            Bytes::from_static(b"PONG"),
        )
        .await;

        match result {
            Err(ClientError::Dial { addr, .. }) => {
                assert_eq!(addr, "127.0.0.1:18200".parse().unwrap());
            }
            Ok(_) => panic!("bind to an occupied port unexpectedly succeeded"),
            Err(e) => panic!("unexpected error: {e}"),
        }

        drop(holder);
        drop(wildcard_holder);
        let _ = port;
    }
}
