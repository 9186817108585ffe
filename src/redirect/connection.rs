//! Redirected connection representation
//!
//! Pairs an accepted TCP stream with the destination its client originally
//! asked for.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::debug;

use super::socket::OriginalDstResolver;
use crate::error::BridgeError;

/// An accepted connection whose original destination is known
#[derive(Debug)]
pub struct RedirectedConnection {
    stream: TcpStream,
    client_addr: SocketAddr,
    local_addr: SocketAddr,
    original_dst: SocketAddr,
    accepted_at: Instant,
}

impl RedirectedConnection {
    /// Recover the original destination of `stream` through `resolver`.
    ///
    /// A destination equal to the stream's own local address means the client
    /// connected to the proxy port directly; dialing it would loop back into
    /// the listener, so it is rejected.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::NoOriginalDestination` if the lookup fails or
    /// points back at the proxy. The stream is dropped (closed) in that case.
    pub fn resolve(
        stream: TcpStream,
        client_addr: SocketAddr,
        resolver: &dyn OriginalDstResolver,
    ) -> Result<Self, BridgeError> {
        let local_addr = stream
            .local_addr()
            .map_err(|e| BridgeError::no_original_destination(format!("local_addr: {e}")))?;

        let original_dst = resolver.original_dst(&stream)?;

        if original_dst == local_addr {
            return Err(BridgeError::no_original_destination(format!(
                "original destination {original_dst} is the proxy itself"
            )));
        }

        debug!("Redirected connection: {} -> {} (original)", client_addr, original_dst);

        Ok(Self {
            stream,
            client_addr,
            local_addr,
            original_dst,
            accepted_at: Instant::now(),
        })
    }

    /// Get the client's source address
    #[must_use]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Get the local (proxy-side) address of the inbound connection
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the original destination address
    #[must_use]
    pub const fn original_dst(&self) -> SocketAddr {
        self.original_dst
    }

    /// Get the connection age
    #[must_use]
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Consume the connection and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl AsRawFd for RedirectedConnection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
