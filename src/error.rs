//! Error types for decoy-probe
//!
//! Errors are categorized by subsystem: configuration, the transparent
//! listener/raw sender pair, spoofed reply sending, and the probe client.
//! Socket-release failures during shutdown are aggregated in [`CloseError`]
//! so that callers observe every failed close, not just the first.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::tproxy::PacketError;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, inconsistent fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// Transparent-socket and raw-socket errors
///
/// Covers construction of both the transparent receive socket and the raw
/// reply socket, and the receive path. Any of these ends the server: a
/// failed construction aborts startup, a failed receive terminates the loop.
#[derive(Debug, Error)]
pub enum TproxyError {
    /// Failed to create socket
    #[error("Failed to create socket: {0}")]
    SocketCreation(String),

    /// Failed to set socket option (IP_TRANSPARENT, etc.)
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Permission denied (CAP_NET_ADMIN / CAP_NET_RAW required)
    #[error("Permission denied: transparent receive and raw send require CAP_NET_ADMIN and CAP_NET_RAW")]
    PermissionDenied,

    /// Datagram arrived without an original-destination control message.
    ///
    /// Without it the redirected destination cannot be recovered, so the
    /// receive contract cannot be satisfied.
    #[error("Original destination not found in control messages - traffic not redirected by TPROXY?")]
    MissingOriginalDestination,

    /// Control message buffer was truncated (MSG_CTRUNC); the
    /// original-destination record may be missing or corrupt.
    #[error("Control message truncated (MSG_CTRUNC) - cmsg buffer too small")]
    ControlTruncated,

    /// Transparent sockets are only available on Linux
    #[error("Transparent receive and raw spoofing are not implemented on this platform")]
    Unsupported,

    /// I/O error
    #[error("Socket I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TproxyError {
    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Errors from sending one spoofed reply.
///
/// These are per-packet: the server logs them and keeps receiving.
#[derive(Debug, Error)]
pub enum SpoofError {
    /// The spoofed source or the destination is not IPv4.
    ///
    /// The raw send path builds IPv4 headers only; refusing up front avoids
    /// emitting a corrupt packet. Nothing is written to the network.
    #[error("Cannot spoof reply for non-IPv4 address {addr}")]
    UnsupportedAddressFamily { addr: IpAddr },

    /// Packet construction failed; nothing was written to the network.
    #[error("Reply serialization failed: {0}")]
    Serialization(#[from] PacketError),

    /// The kernel rejected the raw send
    #[error("Raw send failed: {0}")]
    Send(#[source] io::Error),
}

/// Probe client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Binding the local port or connecting to the remote failed
    #[error("Failed to dial {addr}: {reason}")]
    Dial { addr: SocketAddr, reason: String },

    /// Sending the request failed
    #[error("Request send failed: {0}")]
    Send(#[source] io::Error),

    /// Receiving a response failed
    #[error("Response receive failed: {0}")]
    Recv(#[source] io::Error),

    /// The exchange was cancelled before a matching response arrived
    #[error("Exchange cancelled before a matching response arrived")]
    Cancelled,
}

/// Aggregate of socket-release failures during shutdown.
///
/// Closing the server tears down two descriptors; if both fail the caller
/// sees both failures, labeled by socket role.
#[derive(Debug)]
pub struct CloseError {
    failures: Vec<(&'static str, io::Error)>,
}

impl CloseError {
    /// Wrap collected failures, or `None` when every close succeeded.
    pub(crate) fn from_failures(failures: Vec<(&'static str, io::Error)>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    /// The individual release failures, in close order.
    pub fn failures(&self) -> &[(&'static str, io::Error)] {
        &self.failures
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shutdown failed: ")?;
        for (i, (role, err)) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "closing {role}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_error_reports_all_failures() {
        let failures = vec![
            ("listener", io::Error::new(io::ErrorKind::Other, "bad fd")),
            ("spoofer", io::Error::new(io::ErrorKind::Other, "also bad")),
        ];
        let err = CloseError::from_failures(failures).expect("two failures");

        assert_eq!(err.failures().len(), 2);
        let msg = err.to_string();
        assert!(msg.contains("listener"));
        assert!(msg.contains("spoofer"));
        assert!(msg.contains("bad fd"));
        assert!(msg.contains("also bad"));
    }

    #[test]
    fn test_close_error_empty_is_none() {
        assert!(CloseError::from_failures(Vec::new()).is_none());
    }

    #[test]
    fn test_tproxy_error_display() {
        let err = TproxyError::bind("127.0.0.1:1820".parse().unwrap(), "address in use");
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:1820"));
        assert!(msg.contains("address in use"));

        let err = TproxyError::PermissionDenied;
        assert!(err.to_string().contains("CAP_NET_ADMIN"));
    }

    #[test]
    fn test_spoof_error_names_offending_address() {
        let err = SpoofError::UnsupportedAddressFamily {
            addr: "2001:db8::1".parse().unwrap(),
        };
        assert!(err.to_string().contains("2001:db8::1"));
    }
}
