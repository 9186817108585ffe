//! Connection handling module
//!
//! This module provides:
//! - The accept loop with bounded back-off ([`Bridge`], [`accept_with_backoff`])
//! - Per-connection sessions ([`Session`])
//! - Upstream dialing ([`dial_upstream`])
//! - Statistics collection

mod backoff;
mod manager;
mod session;
mod stats;
mod upstream;

pub use backoff::{
    accept_with_backoff, is_transient_accept_error, AcceptBackoff, Acceptor,
    INITIAL_ACCEPT_BACKOFF, MAX_ACCEPT_BACKOFF,
};
pub use manager::{run, Bridge, BridgeHandle};
pub use session::{Session, SessionContext, SessionReport, SessionState};
pub use stats::{ConnectionStats, StatsSnapshot};
pub use upstream::{dial_upstream, DialOptions};
