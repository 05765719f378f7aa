//! Stub backend for platforms without transparent sockets
//!
//! Transparent receive (`IP_TRANSPARENT`) and raw header-included spoofing
//! are Linux kernel features. Elsewhere the same API exists but every
//! constructor fails fast with `TproxyError::Unsupported`; the types are
//! uninhabited, so the other methods are statically unreachable.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;

use super::Datagram;
use crate::endpoint::Endpoint;
use crate::error::{SpoofError, TproxyError};

/// Transparent listener stub; cannot be constructed on this platform.
#[derive(Debug)]
pub struct TransparentListener {
    never: Infallible,
}

impl TransparentListener {
    /// Always fails with `TproxyError::Unsupported`.
    ///
    /// # Errors
    ///
    /// Unconditionally.
    pub fn bind(_addr: SocketAddr) -> Result<Self, TproxyError> {
        Err(TproxyError::Unsupported)
    }

    /// Unreachable; no listener can exist here.
    pub async fn recv(&self, _buf: &mut [u8]) -> Result<Datagram, TproxyError> {
        match self.never {}
    }

    /// Unreachable; no listener can exist here.
    pub fn local_addr(&self) -> SocketAddr {
        match self.never {}
    }

    /// Unreachable; no listener can exist here.
    pub fn close(self) -> io::Result<()> {
        match self.never {}
    }
}

/// Reply spoofer stub; cannot be constructed on this platform.
#[derive(Debug)]
pub struct ReplySpoofer {
    never: Infallible,
}

impl ReplySpoofer {
    /// Always fails with `TproxyError::Unsupported`.
    ///
    /// # Errors
    ///
    /// Unconditionally.
    pub fn open() -> Result<Self, TproxyError> {
        Err(TproxyError::Unsupported)
    }

    /// Unreachable; no spoofer can exist here.
    pub fn send(
        &self,
        _payload: &[u8],
        _spoofed_src: Endpoint,
        _dst: Endpoint,
    ) -> Result<usize, SpoofError> {
        match self.never {}
    }

    /// Unreachable; no spoofer can exist here.
    pub fn close(self) -> io::Result<()> {
        match self.never {}
    }
}
