//! REDIRECT socket utilities
//!
//! Low-level socket operations for transparent proxying behind an iptables
//! `REDIRECT` (DNAT to a local port) rule:
//! - `SO_ORIGINAL_DST`: recovers the pre-NAT destination of an accepted connection
//! - listener socket creation with `SO_REUSEADDR` / `SO_REUSEPORT`
//!
//! # Resolver trait
//!
//! Original-destination lookup goes through [`OriginalDstResolver`]. Production
//! code uses [`KernelResolver`]; tests and fixed-target forwarding use
//! [`StaticResolver`].

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ListenConfig;
use crate::error::BridgeError;

/// Linux kernel constant: `SO_ORIGINAL_DST` (`SOL_IP` level)
///
/// Used with getsockopt to retrieve the destination a connection had before
/// netfilter NAT rewrote it.
pub const SO_ORIGINAL_DST: libc::c_int = 80;

/// Size of the `sockaddr_in` the kernel fills in
pub const SOCKADDR_IN_LEN: usize = 16;

// =============================================================================
// Original destination resolver
// =============================================================================

/// Recovers the destination a redirected connection was originally sent to.
///
/// Implementations borrow the stream; they never take ownership of its
/// descriptor.
pub trait OriginalDstResolver: Send + Sync {
    /// Look up the original destination of `stream`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::NoOriginalDestination` if it cannot be recovered.
    fn original_dst(&self, stream: &TcpStream) -> Result<SocketAddr, BridgeError>;
}

/// Resolver backed by `getsockopt(SOL_IP, SO_ORIGINAL_DST)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelResolver;

impl KernelResolver {
    /// Create a new kernel resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl OriginalDstResolver for KernelResolver {
    fn original_dst(&self, stream: &TcpStream) -> Result<SocketAddr, BridgeError> {
        get_original_dst(stream.as_raw_fd())
    }
}

/// Resolver that always returns the same destination.
#[derive(Debug, Clone, Copy)]
pub struct StaticResolver {
    destination: SocketAddr,
}

impl StaticResolver {
    /// Create a resolver that answers `destination` for every connection.
    #[must_use]
    pub const fn new(destination: SocketAddr) -> Self {
        Self { destination }
    }

    /// The fixed destination
    #[must_use]
    pub const fn destination(&self) -> SocketAddr {
        self.destination
    }
}

impl OriginalDstResolver for StaticResolver {
    fn original_dst(&self, _stream: &TcpStream) -> Result<SocketAddr, BridgeError> {
        Ok(self.destination)
    }
}

/// Get the default resolver (kernel lookup).
#[must_use]
pub fn default_resolver() -> Arc<dyn OriginalDstResolver> {
    Arc::new(KernelResolver::new())
}

// =============================================================================
// SO_ORIGINAL_DST
// =============================================================================

/// Get the original destination of a REDIRECT-ed IPv4 connection.
///
/// `fd` is only borrowed for the duration of the call.
///
/// # Errors
///
/// Returns `BridgeError::NoOriginalDestination` if:
/// - the connection was not NAT-ed (ENOENT / ENOPROTOOPT)
/// - the socket is not IPv4
/// - getsockopt fails for any other reason
pub fn get_original_dst(fd: RawFd) -> Result<SocketAddr, BridgeError> {
    let mut buf = [0u8; SOCKADDR_IN_LEN];
    #[allow(clippy::cast_possible_truncation)]
    let mut len = SOCKADDR_IN_LEN as libc::socklen_t;

    // SAFETY: buf is valid for `len` bytes and outlives the call.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            buf.as_mut_ptr().cast::<libc::c_void>(),
            &mut len,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::ENOENT | libc::ENOPROTOOPT) => BridgeError::no_original_destination(
                format!("SO_ORIGINAL_DST not set, connection was not redirected ({err})"),
            ),
            _ => BridgeError::no_original_destination(format!(
                "getsockopt SO_ORIGINAL_DST failed: {err}"
            )),
        });
    }

    parse_original_dst(&buf[..len as usize])
}

/// Interpret a `sockaddr_in` returned by `SO_ORIGINAL_DST`.
///
/// | offset | width | meaning                           |
/// |--------|-------|-----------------------------------|
/// | 0-1    | 2     | address family (host order)       |
/// | 2-3    | 2     | port, network order               |
/// | 4-7    | 4     | IPv4 address, network order       |
/// | 8-15   | 8     | zero padding                      |
///
/// # Errors
///
/// Returns `BridgeError::NoOriginalDestination` if the buffer is shorter than
/// 8 bytes or the family is not `AF_INET`.
pub fn parse_original_dst(buf: &[u8]) -> Result<SocketAddr, BridgeError> {
    if buf.len() < 8 {
        return Err(BridgeError::no_original_destination(format!(
            "sockaddr_in truncated to {} bytes",
            buf.len()
        )));
    }

    let family = u16::from_ne_bytes([buf[0], buf[1]]);
    if libc::c_int::from(family) != libc::AF_INET {
        return Err(BridgeError::no_original_destination(format!(
            "unsupported address family {family}, only AF_INET is recovered"
        )));
    }

    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);

    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

// =============================================================================
// Listener socket
// =============================================================================

/// Create a bound, listening, non-blocking TCP socket.
///
/// # Errors
///
/// Returns `BridgeError::ListenFailed` if any step fails.
pub fn create_listener_socket(config: &ListenConfig) -> Result<Socket, BridgeError> {
    let addr = config.address;
    let fail = |step: &str, e: io::Error| BridgeError::listen_failed(addr, format!("{step}: {e}"));

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| fail("socket", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| fail("SO_REUSEADDR", e))?;

    if config.reuse_port {
        socket
            .set_reuse_port(true)
            .map_err(|e| fail("SO_REUSEPORT", e))?;
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| fail("O_NONBLOCK", e))?;

    socket.bind(&addr.into()).map_err(|e| fail("bind", e))?;

    let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(|e| fail("listen", e))?;

    debug!(
        "Created listener socket on {} (backlog={}, reuse_port={})",
        addr, config.backlog, config.reuse_port
    );

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sockaddr_in(family: u16, port: u16, ip: [u8; 4]) -> [u8; SOCKADDR_IN_LEN] {
        let mut buf = [0u8; SOCKADDR_IN_LEN];
        buf[0..2].copy_from_slice(&family.to_ne_bytes());
        buf[2..4].copy_from_slice(&port.to_be_bytes());
        buf[4..8].copy_from_slice(&ip);
        buf
    }

    #[test]
    fn test_constants() {
        assert_eq!(SO_ORIGINAL_DST, 80);
        assert_eq!(SOCKADDR_IN_LEN, std::mem::size_of::<libc::sockaddr_in>());
    }

    #[test]
    fn test_parse_original_dst() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let buf = sockaddr_in(libc::AF_INET as u16, 443, [93, 184, 216, 34]);
        let addr = parse_original_dst(&buf).unwrap();
        assert_eq!(addr, "93.184.216.34:443".parse().unwrap());
    }

    #[test]
    fn test_parse_original_dst_rejects_ipv6_family() {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let buf = sockaddr_in(libc::AF_INET6 as u16, 443, [0; 4]);
        assert!(matches!(
            parse_original_dst(&buf),
            Err(BridgeError::NoOriginalDestination(_))
        ));
    }

    #[test]
    fn test_parse_original_dst_rejects_short_buffer() {
        assert!(parse_original_dst(&[2, 0, 0, 80]).is_err());
    }

    #[tokio::test]
    async fn test_kernel_resolver_without_redirect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        // Plain loopback connection: either no conntrack entry, or the entry
        // reports the real destination. Both are acceptable, a panic is not.
        match KernelResolver::new().original_dst(&server) {
            Ok(dst) => assert_eq!(dst, addr),
            Err(e) => assert!(matches!(e, BridgeError::NoOriginalDestination(_))),
        }
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let target: SocketAddr = "10.1.2.3:8443".parse().unwrap();
        let resolver: Arc<dyn OriginalDstResolver> = Arc::new(StaticResolver::new(target));
        assert_eq!(resolver.original_dst(&server).unwrap(), target);
    }

    #[test]
    fn test_create_listener_socket() {
        let config = ListenConfig::new("127.0.0.1:0".parse().unwrap());
        let socket = create_listener_socket(&config).unwrap();
        let local = socket.local_addr().unwrap().as_socket().unwrap();
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn test_create_listener_socket_addr_in_use() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ListenConfig::new(first.local_addr().unwrap());
        assert!(matches!(
            create_listener_socket(&config),
            Err(BridgeError::ListenFailed { .. })
        ));
    }
}
