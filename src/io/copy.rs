//! Bidirectional splice between two streams
//!
//! Each direction runs in its own task and reports a [`CopyOutcome`] on a
//! shared channel of capacity two. The coordinator acts on the first report:
//!
//! - an error tears the session down immediately
//! - a clean end-of-stream has already been forwarded as a FIN (writer
//!   shutdown); the other direction keeps running until it finishes or
//!   goes `half_close_timeout` without moving a byte
//!
//! The idle limit is shared: a read only times out once neither direction
//! has made progress for `idle_timeout`, so a one-way download never trips
//! it on the silent side.
//!
//! Teardown aborts whatever is still running, awaits both tasks so every
//! stream half is dropped, then drains late reports without blocking.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::config::ConnectionConfig;
use crate::error::BridgeError;

/// Default per-direction buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default linger after the first clean end-of-stream
pub const DEFAULT_HALF_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Direction of a one-way copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to upstream
    Forward,
    /// Upstream to client
    Reverse,
}

impl Direction {
    /// The other direction
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("client->upstream"),
            Self::Reverse => f.write_str("upstream->client"),
        }
    }
}

/// Completion report of one copy task
#[derive(Debug)]
pub struct CopyOutcome {
    pub direction: Direction,
    /// Bytes written to the destination before the task ended
    pub bytes: u64,
    /// `None` for a clean end-of-stream
    pub error: Option<io::Error>,
}

impl CopyOutcome {
    /// Whether the task ended with end-of-stream
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// How a splice ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Both directions reached end-of-stream
    Completed,
    /// First clean end-of-stream with no linger configured
    FirstCompletion,
    /// One side half-closed and the other went quiet for the whole linger
    LingerExpired,
    /// A direction failed
    Aborted,
}

/// Tunables for [`splice`]
#[derive(Debug, Clone)]
pub struct SpliceOptions {
    pub buffer_size: usize,
    /// Limit on time without progress in either direction; `None` waits forever
    pub idle_timeout: Option<Duration>,
    /// After the first clean end-of-stream, how long the other direction may
    /// go without progress; zero tears down at once
    pub half_close_timeout: Duration,
}

impl Default for SpliceOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_timeout: None,
            half_close_timeout: DEFAULT_HALF_CLOSE_TIMEOUT,
        }
    }
}

impl From<&ConnectionConfig> for SpliceOptions {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            buffer_size: config.buffer_size,
            idle_timeout: config.idle_timeout(),
            half_close_timeout: config.half_close_timeout(),
        }
    }
}

/// Result of a finished splice
#[derive(Debug)]
pub struct SpliceReport {
    /// Bytes copied client -> upstream
    pub forward_bytes: u64,
    /// Bytes copied upstream -> client
    pub reverse_bytes: u64,
    /// Direction that reported first
    pub first: Direction,
    pub termination: Termination,
    /// `CopyAborted` for the first direction that failed, if any
    pub error: Option<BridgeError>,
}

impl SpliceReport {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.forward_bytes + self.reverse_bytes
    }
}

/// Last time either direction of a splice moved data
#[derive(Debug)]
struct Activity {
    start: Instant,
    /// Milliseconds since `start`
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn touch(&self) {
        let now = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        Instant::now().saturating_duration_since(last)
    }

    /// Time left before `limit` of inactivity is reached, `None` once it is
    fn remaining(&self, limit: Duration) -> Option<Duration> {
        let left = limit.saturating_sub(self.idle_for());
        (!left.is_zero()).then_some(left)
    }
}

/// Copy `reader` into `writer` until end-of-stream, then shut `writer` down.
async fn copy_one<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    idle_timeout: Option<Duration>,
    counter: &AtomicU64,
    activity: &Activity,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match idle_timeout {
            Some(limit) => loop {
                // `read` is cancel safe: an elapsed wait loses no data
                let Some(wait) = activity.remaining(limit) else {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"));
                };
                if let Ok(read) = timeout(wait, reader.read(&mut buf)).await {
                    break read?;
                }
            },
            None => reader.read(&mut buf).await?,
        };
        if n == 0 {
            break;
        }
        activity.touch();
        writer.write_all(&buf[..n]).await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
        activity.touch();
    }

    writer.flush().await?;
    writer.shutdown().await
}

fn spawn_copy<R, W>(
    direction: Direction,
    reader: R,
    writer: W,
    options: &SpliceOptions,
    counter: Arc<AtomicU64>,
    activity: Arc<Activity>,
    tx: mpsc::Sender<CopyOutcome>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let buffer_size = options.buffer_size;
    let idle_timeout = options.idle_timeout;

    tokio::spawn(async move {
        let result =
            copy_one(reader, writer, buffer_size, idle_timeout, &counter, &activity).await;
        let bytes = counter.load(Ordering::Relaxed);
        trace!("Copy {} finished after {} bytes: {:?}", direction, bytes, result);
        // Capacity 2 and one send per task: never blocks
        let _ = tx
            .send(CopyOutcome {
                direction,
                bytes,
                error: result.err(),
            })
            .await;
    })
}

/// Stand-in for a task that ended without sending its outcome
fn lost_report(direction: Direction) -> CopyOutcome {
    CopyOutcome {
        direction,
        bytes: 0,
        error: Some(io::Error::new(
            io::ErrorKind::Other,
            "copy task exited without reporting",
        )),
    }
}

/// Wait for the `remaining` direction to report, re-arming while it makes
/// progress. Expires once it has been quiet for `limit`.
async fn linger(
    rx: &mut mpsc::Receiver<CopyOutcome>,
    activity: &Activity,
    limit: Duration,
    remaining: Direction,
    outcomes: &mut Vec<CopyOutcome>,
) -> Termination {
    loop {
        let Some(wait) = activity.remaining(limit) else {
            return Termination::LingerExpired;
        };
        match timeout(wait, rx.recv()).await {
            Ok(Some(second)) => {
                let termination = if second.is_clean() {
                    Termination::Completed
                } else {
                    Termination::Aborted
                };
                outcomes.push(second);
                return termination;
            }
            Ok(None) => {
                outcomes.push(lost_report(remaining));
                return Termination::Aborted;
            }
            Err(_) => {
                trace!("{} still active {:?} ago", remaining, activity.idle_for());
            }
        }
    }
}

/// Shuttle bytes between `client` and `upstream` until the session ends.
///
/// Both streams are consumed; they are closed when this returns.
pub async fn splice<A, B>(client: A, upstream: B, options: &SpliceOptions) -> SpliceReport
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let forward_bytes = Arc::new(AtomicU64::new(0));
    let reverse_bytes = Arc::new(AtomicU64::new(0));
    let activity = Arc::new(Activity::new());
    let (tx, mut rx) = mpsc::channel(2);

    let forward = spawn_copy(
        Direction::Forward,
        client_read,
        upstream_write,
        options,
        Arc::clone(&forward_bytes),
        Arc::clone(&activity),
        tx.clone(),
    );
    let reverse = spawn_copy(
        Direction::Reverse,
        upstream_read,
        client_write,
        options,
        Arc::clone(&reverse_bytes),
        Arc::clone(&activity),
        tx,
    );

    // Both senders gone without a report: nothing says which failed first
    let first = rx
        .recv()
        .await
        .unwrap_or_else(|| lost_report(Direction::Forward));
    let first_direction = first.direction;
    let mut outcomes = vec![first];

    let termination = if !outcomes[0].is_clean() {
        Termination::Aborted
    } else if options.half_close_timeout.is_zero() {
        Termination::FirstCompletion
    } else {
        debug!(
            "{} reached end-of-stream, lingering while {} moves data (idle bound {:?})",
            first_direction,
            first_direction.opposite(),
            options.half_close_timeout
        );
        activity.touch();
        linger(
            &mut rx,
            &activity,
            options.half_close_timeout,
            first_direction.opposite(),
            &mut outcomes,
        )
        .await
    };

    forward.abort();
    reverse.abort();
    // Cancelled tasks yield a JoinError; the halves they held are dropped either way
    let _ = forward.await;
    let _ = reverse.await;

    while let Ok(late) = rx.try_recv() {
        outcomes.push(late);
    }

    let error = outcomes.iter().find_map(|o| {
        o.error
            .as_ref()
            .map(|e| BridgeError::copy_aborted(o.direction, e.to_string()))
    });

    let report = SpliceReport {
        forward_bytes: forward_bytes.load(Ordering::Relaxed),
        reverse_bytes: reverse_bytes.load(Ordering::Relaxed),
        first: first_direction,
        termination,
        error,
    };

    debug!(
        "Splice finished: {:?}, {} bytes forward, {} bytes reverse",
        report.termination, report.forward_bytes, report.reverse_bytes
    );

    report
}
