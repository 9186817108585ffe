//! REDIRECT TCP Listener
//!
//! Accepts connections that a packet-filter `REDIRECT` rule steered to this
//! process. Original destination lookup happens afterwards, per connection.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use super::socket::create_listener_socket;
use crate::config::ListenConfig;
use crate::connection::Acceptor;
use crate::error::BridgeError;

/// A bound TCP listener for redirected connections
#[derive(Debug)]
pub struct RedirectListener {
    /// The underlying tokio TCP listener
    listener: TcpListener,

    /// Actual bound address (port resolved if 0 was requested)
    listen_addr: SocketAddr,
}

impl RedirectListener {
    /// Create and bind a new listener.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ListenFailed` if the socket cannot be created,
    /// bound or registered with the runtime.
    pub fn bind(config: &ListenConfig) -> Result<Self, BridgeError> {
        info!("Creating TCP listener on {}", config.address);

        let socket = create_listener_socket(config)?;

        let listener = TcpListener::from_std(socket.into())
            .map_err(|e| BridgeError::listen_failed(config.address, e.to_string()))?;

        let listen_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::listen_failed(config.address, e.to_string()))?;

        info!(
            "TCP listener ready on {} (backlog={})",
            listen_addr, config.backlog
        );

        Ok(Self {
            listener,
            listen_addr,
        })
    }

    /// Get the bound address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Get a reference to the underlying tokio `TcpListener`.
    #[must_use]
    pub const fn inner(&self) -> &TcpListener {
        &self.listener
    }
}

#[async_trait]
impl Acceptor for RedirectListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }
}
