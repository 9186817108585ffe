//! REDIRECT module for transparent proxying
//!
//! Listener creation and original-destination recovery for connections that
//! netfilter NAT (`REDIRECT` target) steered to this process.
//!
//! # IPv4 Only
//!
//! `SO_ORIGINAL_DST` is read at `SOL_IP` level, so only IPv4 connections are
//! supported. The listen address must be IPv4.
//!
//! # Requirements
//!
//! - Linux with `nf_conntrack` and the `REDIRECT` target (`xt_REDIRECT`)
//! - No special capability for the proxy itself; `iptables` needs root
//!
//! ## Example iptables Setup
//!
//! ```bash
//! # Redirect locally generated TCP to the proxy, except the proxy's own
//! # upstream traffic (marked via connection.routing_mark = 0xff)
//! iptables -t nat -N YA_PROXY
//! iptables -t nat -A YA_PROXY -m mark --mark 0xff -j RETURN
//! iptables -t nat -A YA_PROXY -d 127.0.0.0/8 -j RETURN
//! iptables -t nat -A YA_PROXY -p tcp -j REDIRECT --to-ports 8081
//! iptables -t nat -A OUTPUT -p tcp -j YA_PROXY
//!
//! # Or for forwarded traffic from a LAN interface
//! iptables -t nat -A PREROUTING -i eth1 -p tcp -j REDIRECT --to-ports 8081
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use ya_proxy::config::ListenConfig;
//! use ya_proxy::connection::Acceptor;
//! use ya_proxy::redirect::{KernelResolver, RedirectListener, RedirectedConnection};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut listener = RedirectListener::bind(&ListenConfig::default())?;
//! let (stream, client) = listener.accept().await?;
//! let conn = RedirectedConnection::resolve(stream, client, &KernelResolver::new())?;
//! println!("{} wanted {}", conn.client_addr(), conn.original_dst());
//! # Ok(())
//! # }
//! ```

mod connection;
mod listener;
mod socket;

pub use connection::RedirectedConnection;
pub use listener::RedirectListener;
pub use socket::{
    create_listener_socket, default_resolver, get_original_dst, parse_original_dst,
    KernelResolver, OriginalDstResolver, StaticResolver, SOCKADDR_IN_LEN, SO_ORIGINAL_DST,
};
