//! Decoy server orchestration
//!
//! Owns one transparent listener and one reply spoofer and runs a single
//! sequential receive -> match -> reply loop. Each datagram is handled
//! independently; a reply failure is logged and the loop moves on, while a
//! receive failure ends the loop, since the listener contract can no longer
//! be met.

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::error::{CloseError, TproxyError};
use crate::tproxy::{ReplySpoofer, TransparentListener, MAX_DATAGRAM};

/// The decoy server: answers exact-match probes addressed to a redirected
/// port as if the original destination had answered.
#[derive(Debug)]
pub struct DecoyServer {
    listener: TransparentListener,
    spoofer: ReplySpoofer,
    request: Bytes,
    response: Bytes,
}

impl DecoyServer {
    /// Open both sockets.
    ///
    /// If the spoofer fails to open, the already-bound listener is released
    /// before returning (drop closes it), so a partial construction leaks
    /// no descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first construction failure; `PermissionDenied` without
    /// the required capabilities.
    pub fn new(
        bind_addr: SocketAddr,
        request: Bytes,
        response: Bytes,
    ) -> Result<Self, TproxyError> {
        let listener = TransparentListener::bind(bind_addr)?;
        let spoofer = ReplySpoofer::open()?;

        info!("decoy server listening on {}", listener.local_addr());

        Ok(Self {
            listener,
            spoofer,
            request,
            response,
        })
    }

    /// Run the receive loop until receiving fails.
    ///
    /// For every redirected datagram whose payload equals the configured
    /// request, exactly one spoofed reply is sent: source = the probe's
    /// original destination, destination = the probe's sender. Everything
    /// else is logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns the receive failure that ended the loop. Callers should
    /// [`close`](Self::close) afterwards.
    pub async fn run(&self) -> Result<(), TproxyError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let datagram = match self.listener.recv(&mut buf).await {
                Ok(datagram) => datagram,
                Err(e) => {
                    error!("udp recv failed: {e}");
                    return Err(e);
                }
            };

            debug!(
                "got {} byte packet from {} to {}",
                datagram.len(),
                datagram.peer,
                datagram.original_dst
            );

            if datagram.payload != self.request {
                debug!("payload from {} does not match probe request", datagram.peer);
                continue;
            }

            info!(
                "answering probe from {} as {}",
                datagram.peer, datagram.original_dst
            );
            match self
                .spoofer
                .send(&self.response, datagram.original_dst, datagram.peer)
            {
                Ok(written) => debug!("sent {written} byte spoofed reply"),
                // Reply failures affect only this packet; keep receiving
                Err(e) => warn!("reply to {} failed: {e}", datagram.peer),
            }
        }
    }

    /// Close both sockets, reporting every release failure.
    ///
    /// # Errors
    ///
    /// Returns a [`CloseError`] aggregating all failed closes; one failed
    /// close does not hide the other.
    pub fn close(self) -> Result<(), CloseError> {
        let mut failures = Vec::new();

        if let Err(e) = self.listener.close() {
            failures.push(("listener", e));
        }
        if let Err(e) = self.spoofer.close() {
            failures.push(("spoofer", e));
        }

        match CloseError::from_failures(failures) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_without_cap() {
        // With privileges the full construct/close cycle works; without
        // them the error is a clean PermissionDenied (or Unsupported off
        // Linux), never a panic or a leaked half-open server.
        match DecoyServer::new(
            "127.0.0.1:0".parse().unwrap(),
            Bytes::from_static(b"PING"),
            Bytes::from_static(b"PONG"),
        ) {
            Ok(server) => server.close().expect("close"),
            Err(TproxyError::PermissionDenied | TproxyError::Unsupported) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
