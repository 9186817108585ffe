//! Upstream dial
//!
//! Opens the proxy's own connection to a recovered original destination.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::error::BridgeError;

/// Dial parameters
#[derive(Debug, Clone, Copy)]
pub struct DialOptions {
    pub connect_timeout: Duration,
    /// `SO_MARK` for the upstream socket
    pub routing_mark: Option<u32>,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            routing_mark: None,
        }
    }
}

impl From<&ConnectionConfig> for DialOptions {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            routing_mark: config.routing_mark,
        }
    }
}

/// Create a non-blocking socket for `addr`'s family
fn create_socket(addr: SocketAddr, options: &DialOptions) -> Result<Socket, BridgeError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| BridgeError::upstream_dial_failed(addr, format!("socket: {e}")))?;

    if let Some(mark) = options.routing_mark {
        set_routing_mark(&socket, mark)
            .map_err(|e| BridgeError::upstream_dial_failed(addr, format!("SO_MARK {mark}: {e}")))?;
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| BridgeError::upstream_dial_failed(addr, format!("O_NONBLOCK: {e}")))?;

    Ok(socket)
}

/// Set `SO_MARK` so packet-filter rules can recognise proxy traffic.
///
/// Needs `CAP_NET_ADMIN`.
fn set_routing_mark(socket: &Socket, mark: u32) -> io::Result<()> {
    // SAFETY: `mark` lives for the duration of the call and the length matches.
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_MARK,
            std::ptr::addr_of!(mark).cast::<libc::c_void>(),
            mem::size_of::<u32>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    debug!("Set routing mark: {}", mark);
    Ok(())
}

/// Connect to `addr` within `options.connect_timeout`.
///
/// On success the stream has `TCP_NODELAY` set.
///
/// # Errors
///
/// Returns `BridgeError::UpstreamDialFailed` on socket setup failure,
/// connection refusal or timeout. No descriptor outlives a failure.
pub async fn dial_upstream(
    addr: SocketAddr,
    options: &DialOptions,
) -> Result<TcpStream, BridgeError> {
    let socket = create_socket(addr, options)?;

    // EINPROGRESS is expected for non-blocking sockets
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(BridgeError::upstream_dial_failed(addr, e.to_string())),
    }

    // Hand ownership to tokio right away so the fd is closed on every path
    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream)
        .map_err(|e| BridgeError::upstream_dial_failed(addr, e.to_string()))?;

    let connect_result = timeout(options.connect_timeout, async {
        stream
            .writable()
            .await
            .map_err(|e| BridgeError::upstream_dial_failed(addr, e.to_string()))?;

        match stream.take_error() {
            Ok(Some(e)) | Err(e) => Err(BridgeError::upstream_dial_failed(addr, e.to_string())),
            Ok(None) => Ok(()),
        }
    })
    .await;

    match connect_result {
        Ok(Ok(())) => {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
            debug!("Connected upstream to {}", addr);
            Ok(stream)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BridgeError::upstream_dial_failed(
            addr,
            format!("timed out after {:?}", options.connect_timeout),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_options_from_config() {
        let config = ConnectionConfig {
            connect_timeout_ms: 1500,
            routing_mark: Some(0x1),
            ..ConnectionConfig::default()
        };
        let options = DialOptions::from(&config);
        assert_eq!(options.connect_timeout, Duration::from_millis(1500));
        assert_eq!(options.routing_mark, Some(0x1));
    }

    #[tokio::test]
    async fn test_dial_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = dial_upstream(addr, &DialOptions::default()).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_dial_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let err = dial_upstream(addr, &DialOptions::default()).await.unwrap_err();
        assert!(matches!(err, BridgeError::UpstreamDialFailed { addr: a, .. } if a == addr));
    }

    #[tokio::test]
    async fn test_dial_unroutable_fails() {
        // TEST-NET-1 is reserved for documentation: either unreachable or a timeout
        let options = DialOptions {
            connect_timeout: Duration::from_millis(100),
            routing_mark: None,
        };
        let result = dial_upstream("192.0.2.1:12345".parse().unwrap(), &options).await;
        assert!(result.is_err(), "Expected connection to fail");
    }
}
