//! Accept loop back-off
//!
//! Transient accept failures (descriptor exhaustion, interrupted calls) are
//! retried after a delay that starts at 5 ms, doubles on each consecutive
//! failure and saturates at 1 s. A successful accept resets it.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::stats::ConnectionStats;
use crate::error::BridgeError;

/// First back-off delay
pub const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

/// Back-off ceiling
pub const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Source of accepted connections.
///
/// Implemented by [`RedirectListener`](crate::redirect::RedirectListener);
/// tests substitute synthetic sources.
#[async_trait]
pub trait Acceptor: Send {
    /// Stream type produced by a successful accept
    type Stream: Send + 'static;

    /// Wait for the next connection.
    async fn accept(&mut self) -> io::Result<(Self::Stream, SocketAddr)>;
}

/// Doubling delay between transient accept failures
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl AcceptBackoff {
    /// Back-off with the standard 5 ms .. 1 s schedule
    #[must_use]
    pub const fn new() -> Self {
        Self::with_bounds(INITIAL_ACCEPT_BACKOFF, MAX_ACCEPT_BACKOFF)
    }

    /// Back-off with custom bounds
    #[must_use]
    pub const fn with_bounds(initial: Duration, max: Duration) -> Self {
        Self {
            current: Duration::ZERO,
            initial,
            max,
        }
    }

    /// Delay to sleep before the next retry; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let next = if self.current.is_zero() {
            self.initial
        } else {
            self.current.saturating_mul(2)
        };
        self.current = next.min(self.max);
        self.current
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    /// Delay handed out last, zero after a reset
    #[must_use]
    pub const fn current(&self) -> Duration {
        self.current
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an accept error leaves the listener usable.
///
/// Transient: would-block, interrupted, resource exhaustion
/// (`EMFILE`, `ENFILE`, `ENOBUFS`, `ENOMEM`) and connections that failed
/// before accept completed (`ECONNABORTED`, `EPROTO`). Everything else
/// (`EBADF`, `EINVAL`, ...) is permanent.
#[must_use]
pub fn is_transient_accept_error(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    ) {
        return true;
    }

    matches!(
        err.raw_os_error(),
        Some(
            libc::EAGAIN
                | libc::EINTR
                | libc::EMFILE
                | libc::ENFILE
                | libc::ENOBUFS
                | libc::ENOMEM
                | libc::ECONNABORTED
                | libc::EPROTO
        )
    )
}

/// Accept one connection, sleeping through transient failures.
///
/// # Errors
///
/// Returns `BridgeError::PermanentAccept` on the first non-transient error.
pub async fn accept_with_backoff<A: Acceptor>(
    acceptor: &mut A,
    backoff: &mut AcceptBackoff,
    stats: &ConnectionStats,
) -> Result<(A::Stream, SocketAddr), BridgeError> {
    loop {
        match acceptor.accept().await {
            Ok(accepted) => {
                backoff.reset();
                return Ok(accepted);
            }
            Err(e) if is_transient_accept_error(&e) => {
                stats.record_transient_accept_error();
                let delay = backoff.next_delay();
                warn!("Accept error: {}; retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(BridgeError::PermanentAccept(e)),
        }
    }
}
