//! Per-connection session
//!
//! A session owns one accepted client stream and, once dialed, one upstream
//! stream. It walks a fixed state machine:
//!
//! ```text
//! Accepted -> Resolving -> Dialing -> Bridging -> Closed
//!                 |            |
//!                 +------------+---------------> Closed (error)
//! ```
//!
//! Both sockets are owned by the session and closed exactly once, when the
//! session drops them.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::stats::ConnectionStats;
use super::upstream::{dial_upstream, DialOptions};
use crate::error::BridgeError;
use crate::io::{splice, SpliceOptions, Termination};
use crate::redirect::{OriginalDstResolver, RedirectedConnection};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Accepted,
    Resolving,
    Dialing,
    Bridging,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Accepted, Self::Resolving)
                | (Self::Resolving, Self::Dialing | Self::Closed)
                | (Self::Dialing, Self::Bridging | Self::Closed)
                | (Self::Bridging, Self::Closed)
        )
    }

    /// `Closed` is terminal
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "accepted",
            Self::Resolving => "resolving",
            Self::Dialing => "dialing",
            Self::Bridging => "bridging",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared, read-only inputs every session needs
#[derive(Clone)]
pub struct SessionContext {
    pub resolver: Arc<dyn OriginalDstResolver>,
    pub dial: DialOptions,
    pub splice: SpliceOptions,
    pub stats: Arc<ConnectionStats>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("dial", &self.dial)
            .field("splice", &self.splice)
            .finish_non_exhaustive()
    }
}

/// Outcome of a finished session
#[derive(Debug)]
pub struct SessionReport {
    pub id: u64,
    pub client_addr: SocketAddr,
    pub original_dst: Option<SocketAddr>,
    /// Local address of the upstream socket, as the upstream sees the proxy
    pub upstream_local: Option<SocketAddr>,
    pub forward_bytes: u64,
    pub reverse_bytes: u64,
    /// Every state visited, in order
    pub states: Vec<SessionState>,
    pub result: Result<Termination, BridgeError>,
}

impl SessionReport {
    /// Whether the session bridged and ended without error
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Final state
    #[must_use]
    pub fn final_state(&self) -> Option<SessionState> {
        self.states.last().copied()
    }
}

/// One accepted connection on its way to (and through) its upstream
#[derive(Debug)]
pub struct Session {
    id: u64,
    stream: TcpStream,
    client_addr: SocketAddr,
    states: Vec<SessionState>,
}

impl Session {
    /// Start a session for a freshly accepted stream
    #[must_use]
    pub fn new(stream: TcpStream, client_addr: SocketAddr) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            client_addr,
            states: vec![SessionState::Accepted],
        }
    }

    /// Session id, unique within the process
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Client's source address
    #[must_use]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    fn transition(states: &mut Vec<SessionState>, next: SessionState) {
        let current = states.last().copied().unwrap_or(SessionState::Accepted);
        debug_assert!(
            current.can_transition_to(next),
            "illegal session transition {current} -> {next}"
        );
        debug!("Session state {} -> {}", current, next);
        states.push(next);
    }

    /// Resolve, dial and bridge until the session ends.
    ///
    /// Never fails: the outcome, including any error, is in the report.
    pub async fn run(self, ctx: &SessionContext) -> SessionReport {
        let Self {
            id,
            stream,
            client_addr,
            mut states,
        } = self;

        let report = |states: Vec<SessionState>, result| SessionReport {
            id,
            client_addr,
            original_dst: None,
            upstream_local: None,
            forward_bytes: 0,
            reverse_bytes: 0,
            states,
            result,
        };

        Self::transition(&mut states, SessionState::Resolving);
        let conn = match RedirectedConnection::resolve(stream, client_addr, ctx.resolver.as_ref()) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("No original destination for {}: {}", client_addr, e);
                ctx.stats.record_no_original_dst();
                Self::transition(&mut states, SessionState::Closed);
                return report(states, Err(e));
            }
        };
        let original_dst = conn.original_dst();

        Self::transition(&mut states, SessionState::Dialing);
        let upstream = match dial_upstream(original_dst, &ctx.dial).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("{}", e);
                ctx.stats.record_dial_failure();
                drop(conn);
                Self::transition(&mut states, SessionState::Closed);
                let mut failed = report(states, Err(e));
                failed.original_dst = Some(original_dst);
                return failed;
            }
        };
        let upstream_local = upstream.local_addr().ok();

        Self::transition(&mut states, SessionState::Bridging);
        info!(
            "Bridging {} -> {} via {}",
            client_addr,
            original_dst,
            upstream_local.map_or_else(|| "?".to_string(), |a| a.to_string())
        );

        let spliced = splice(conn.into_stream(), upstream, &ctx.splice).await;
        Self::transition(&mut states, SessionState::Closed);

        let result = match spliced.error {
            Some(e) => {
                debug!("Session aborted: {}", e);
                ctx.stats
                    .record_copy_aborted(spliced.forward_bytes, spliced.reverse_bytes);
                Err(e)
            }
            None => {
                ctx.stats
                    .record_completed(spliced.forward_bytes, spliced.reverse_bytes);
                Ok(spliced.termination)
            }
        };

        info!(
            "Session closed: {} bytes up, {} bytes down ({:?})",
            spliced.forward_bytes, spliced.reverse_bytes, spliced.termination
        );

        SessionReport {
            id,
            client_addr,
            original_dst: Some(original_dst),
            upstream_local,
            forward_bytes: spliced.forward_bytes,
            reverse_bytes: spliced.reverse_bytes,
            states,
            result,
        }
    }
}
