//! ya-proxy: transparent TCP proxy for netfilter `REDIRECT`
//!
//! Connections redirected to the proxy by the kernel NAT table are accepted,
//! their pre-redirect destination is recovered with `SO_ORIGINAL_DST`, and
//! bytes are spliced to that destination in both directions.
//!
//! The crate also contains a TCP header codec used by the `tcp_monitor`
//! diagnostic binary.
//!
//! # Architecture
//!
//! ```text
//! Client → iptables REDIRECT → Bridge (accept loop) → Session
//!                                                       ↓
//!                                            SO_ORIGINAL_DST lookup
//!                                                       ↓
//!                                    upstream dial → splice (2 copy tasks)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use ya_proxy::config::load_config;
//! use ya_proxy::connection::Bridge;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/ya-proxy/config.json")?;
//!
//! let bridge = Bridge::bind(&config.listen, &config.connection)?;
//! let handle = bridge.handle();
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.stop();
//! });
//!
//! bridge.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`codec`]: TCP header decode/encode
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Accept loop, sessions, upstream dial and statistics
//! - [`error`]: Error types
//! - [`io`]: Bidirectional splice
//! - [`pidfile`]: Single-instance PID file
//! - [`redirect`]: Listener and original-destination recovery

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod io;
pub mod pidfile;
pub mod redirect;

// Re-export commonly used types at the crate root
pub use codec::{decode, encode, TcpFlags, TcpHeader, TcpOption};
pub use config::{Config, ConnectionConfig, ListenConfig};
pub use connection::{run, Bridge, BridgeHandle, ConnectionStats, StatsSnapshot};
pub use error::{BridgeError, ConfigError, DecodeError, PidFileError, ProxyError};
pub use pidfile::PidFile;
pub use redirect::{KernelResolver, OriginalDstResolver, RedirectListener, StaticResolver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Program name matched against `/proc/<pid>/cmdline` by the PID file check
pub const PROGRAM_NAME: &str = "ya-proxy";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_listen_matches_config() {
        assert_eq!(
            Config::default().listen.address,
            config::DEFAULT_LISTEN_ADDR
        );
    }
}
