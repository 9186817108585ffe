//! Connection statistics tracking
//!
//! Lock-free counters shared by the accept loop and every session.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic connection statistics
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total connections accepted
    total_accepted: AtomicU64,
    /// Sessions currently running
    active: AtomicU64,
    /// Sessions that bridged and ended without a copy error
    completed: AtomicU64,
    /// Sessions that ended with any error
    errored: AtomicU64,
    /// Sessions whose original destination could not be recovered
    no_original_dst: AtomicU64,
    /// Sessions whose upstream dial failed
    dial_failures: AtomicU64,
    /// Sessions torn down by a copy error
    copy_aborts: AtomicU64,
    /// Accept failures handled by back-off
    transient_accept_errors: AtomicU64,
    /// Total bytes client -> upstream
    bytes_forward: AtomicU64,
    /// Total bytes upstream -> client
    bytes_reverse: AtomicU64,
}

impl ConnectionStats {
    /// Create new connection statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new accepted connection
    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session that bridged and ended cleanly
    pub fn record_completed(&self, bytes_forward: u64, bytes_reverse: u64) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(bytes_forward, bytes_reverse);
    }

    /// Record a session that failed before bridging
    pub fn record_no_original_dst(&self) {
        self.no_original_dst.fetch_add(1, Ordering::Relaxed);
        self.record_error();
    }

    /// Record a session whose upstream dial failed
    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
        self.record_error();
    }

    /// Record a session torn down by a copy error
    pub fn record_copy_aborted(&self, bytes_forward: u64, bytes_reverse: u64) {
        self.copy_aborts.fetch_add(1, Ordering::Relaxed);
        self.add_bytes(bytes_forward, bytes_reverse);
        self.record_error();
    }

    /// Record a transient accept failure
    pub fn record_transient_accept_error(&self) {
        self.transient_accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes(&self, forward: u64, reverse: u64) {
        self.bytes_forward.fetch_add(forward, Ordering::Relaxed);
        self.bytes_reverse.fetch_add(reverse, Ordering::Relaxed);
    }

    /// Get total accepted connections
    #[must_use]
    pub fn total_accepted(&self) -> u64 {
        self.total_accepted.load(Ordering::Relaxed)
    }

    /// Get currently active sessions
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Get completed sessions
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get errored sessions
    #[must_use]
    pub fn errored(&self) -> u64 {
        self.errored.load(Ordering::Relaxed)
    }

    /// Get sessions without an original destination
    #[must_use]
    pub fn no_original_dst(&self) -> u64 {
        self.no_original_dst.load(Ordering::Relaxed)
    }

    /// Get failed upstream dials
    #[must_use]
    pub fn dial_failures(&self) -> u64 {
        self.dial_failures.load(Ordering::Relaxed)
    }

    /// Get copy aborts
    #[must_use]
    pub fn copy_aborts(&self) -> u64 {
        self.copy_aborts.load(Ordering::Relaxed)
    }

    /// Get transient accept errors
    #[must_use]
    pub fn transient_accept_errors(&self) -> u64 {
        self.transient_accept_errors.load(Ordering::Relaxed)
    }

    /// Get total bytes client -> upstream
    #[must_use]
    pub fn bytes_forward(&self) -> u64 {
        self.bytes_forward.load(Ordering::Relaxed)
    }

    /// Get total bytes upstream -> client
    #[must_use]
    pub fn bytes_reverse(&self) -> u64 {
        self.bytes_reverse.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all statistics
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&self) -> StatsSnapshot {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        StatsSnapshot {
            total_accepted: self.total_accepted(),
            active: self.active(),
            completed: self.completed(),
            errored: self.errored(),
            no_original_dst: self.no_original_dst(),
            dial_failures: self.dial_failures(),
            copy_aborts: self.copy_aborts(),
            transient_accept_errors: self.transient_accept_errors(),
            bytes_forward: self.bytes_forward(),
            bytes_reverse: self.bytes_reverse(),
            timestamp_ms,
        }
    }
}

/// Snapshot of connection statistics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_accepted: u64,
    pub active: u64,
    pub completed: u64,
    pub errored: u64,
    pub no_original_dst: u64,
    pub dial_failures: u64,
    pub copy_aborts: u64,
    pub transient_accept_errors: u64,
    pub bytes_forward: u64,
    pub bytes_reverse: u64,
    /// Timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl StatsSnapshot {
    /// Get total bytes transferred (both directions)
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.bytes_forward + self.bytes_reverse
    }
}
