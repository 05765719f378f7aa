//! decoy-probe: transparent-redirect verification for camouflaged UDP ports
//!
//! A probe/decoy pair for checking that firewall and policy-routing rules in
//! front of a wrapped service (e.g. a VPN endpoint) really do redirect
//! inbound traffic to a decoy instead of the service itself.
//!
//! # How it works
//!
//! ```text
//! client ──probe──▶ network ──TPROXY redirect──▶ transparent listener
//!                                                       │ recovers original
//!                                                       │ destination (cmsg)
//! client ◀──reply spoofed from original destination── raw socket
//! ```
//!
//! The server receives redirected datagrams on a transparent socket,
//! recovers where each one was originally addressed, and answers
//! exact-match probe payloads through a raw header-included socket with the
//! original destination as the reply's source. The client sends the probe
//! from a fixed local port and waits for the spoofed reply to arrive there.
//!
//! # Quick start
//!
//! ```no_run
//! use bytes::Bytes;
//! use decoy_probe::{DecoyServer, ProbeClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Server side (requires CAP_NET_ADMIN / CAP_NET_RAW)
//! let server = DecoyServer::new(
//!     "127.0.0.1:1820".parse()?,
//!     Bytes::from_static(b"PING"),
//!     Bytes::from_static(b"PONG"),
//! )?;
//! tokio::spawn(async move { server.run().await });
//!
//! // Client side
//! let client = ProbeClient::dial(
//!     51820,
//!     "192.0.2.10:1820".parse()?,
//!     Bytes::from_static(b"PING"),
//!     Bytes::from_static(b"PONG"),
//! )
//! .await?;
//! client.exchange(&CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: configuration types and loading
//! - [`client`]: probe client
//! - [`endpoint`]: normalized address/port value type
//! - [`error`]: error types
//! - [`server`]: decoy server orchestration
//! - [`tproxy`]: transparent receive and raw spoofed send

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod server;
pub mod tproxy;

// Re-export commonly used types at the crate root
pub use client::ProbeClient;
pub use config::Config;
pub use endpoint::Endpoint;
pub use error::{ClientError, CloseError, ConfigError, SpoofError, TproxyError};
pub use server::DecoyServer;
pub use tproxy::{Datagram, ReplySpoofer, TransparentListener};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
