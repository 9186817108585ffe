//! Bridge: accept loop and session dispatch
//!
//! A [`Bridge`] owns exactly one listener. [`Bridge::run`] accepts until it
//! is stopped through a [`BridgeHandle`] or the listener fails permanently,
//! spawning one [`Session`] task per connection. Sessions are independent
//! and outlive the loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, Instrument};

use super::backoff::{accept_with_backoff, AcceptBackoff};
use super::session::{Session, SessionContext};
use super::stats::{ConnectionStats, StatsSnapshot};
use super::upstream::DialOptions;
use crate::config::{ConnectionConfig, ListenConfig};
use crate::error::BridgeError;
use crate::io::SpliceOptions;
use crate::redirect::{KernelResolver, OriginalDstResolver, RedirectListener, StaticResolver};

/// Stop flag plus wake-up for a pending accept
#[derive(Debug)]
struct Shutdown {
    running: AtomicBool,
    tx: broadcast::Sender<()>,
}

/// Cloneable handle that stops a running [`Bridge`]
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    shutdown: Arc<Shutdown>,
}

impl BridgeHandle {
    /// Stop accepting. The listener is closed; in-flight sessions keep running.
    pub fn stop(&self) {
        if self.shutdown.running.swap(false, Ordering::SeqCst) {
            info!("Bridge stop requested");
        }
        // No receiver just means run() has not started or already returned
        let _ = self.shutdown.tx.send(());
    }

    /// Whether stop has not been requested yet
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shutdown.running.load(Ordering::SeqCst)
    }
}

/// Transparent TCP bridge bound to one listening endpoint
pub struct Bridge {
    listener: RedirectListener,
    ctx: SessionContext,
    shutdown: Arc<Shutdown>,
}

impl Bridge {
    /// Bind a listener and build a bridge from configuration.
    ///
    /// With `connection.static_destination` set, every connection goes there
    /// instead of its original destination.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::ListenFailed` if the endpoint cannot be bound.
    pub fn bind(listen: &ListenConfig, connection: &ConnectionConfig) -> Result<Self, BridgeError> {
        let listener = RedirectListener::bind(listen)?;
        Ok(Self::new(listener, connection))
    }

    /// Build a bridge around an existing listener.
    #[must_use]
    pub fn new(listener: RedirectListener, connection: &ConnectionConfig) -> Self {
        let resolver: Arc<dyn OriginalDstResolver> = match connection.static_destination {
            Some(dst) => {
                info!("Forwarding every connection to static destination {}", dst);
                Arc::new(StaticResolver::new(dst))
            }
            None => Arc::new(KernelResolver::new()),
        };

        let (tx, _) = broadcast::channel(1);

        Self {
            listener,
            ctx: SessionContext {
                resolver,
                dial: DialOptions::from(connection),
                splice: SpliceOptions::from(connection),
                stats: Arc::new(ConnectionStats::new()),
            },
            shutdown: Arc::new(Shutdown {
                running: AtomicBool::new(true),
                tx,
            }),
        }
    }

    /// Replace the original-destination resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn OriginalDstResolver>) -> Self {
        self.ctx.resolver = resolver;
        self
    }

    /// Handle for stopping the bridge from another task
    #[must_use]
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Shared statistics
    #[must_use]
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Current statistics snapshot
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Bound listening address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.listener.listen_addr()
    }

    /// Run the accept loop.
    ///
    /// Returns `Ok(())` after [`BridgeHandle::stop`]; the listener is closed on
    /// return in every case.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::PermanentAccept` if the listener fails in a way
    /// back-off cannot fix.
    pub async fn run(self) -> Result<(), BridgeError> {
        let Self {
            mut listener,
            ctx,
            shutdown,
        } = self;
        let ctx = Arc::new(ctx);
        let listen_addr = listener.listen_addr();

        // Subscribe before the first flag check so a stop is never missed
        let mut shutdown_rx = shutdown.tx.subscribe();
        let mut backoff = AcceptBackoff::new();

        info!("Starting accept loop on {}", listen_addr);

        let result = loop {
            if !shutdown.running.load(Ordering::SeqCst) {
                break Ok(());
            }

            let accepted = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => continue,
                accepted = accept_with_backoff(&mut listener, &mut backoff, &ctx.stats) => accepted,
            };

            match accepted {
                Ok((stream, client_addr)) => {
                    ctx.stats.record_accepted();
                    let session = Session::new(stream, client_addr);
                    let span = info_span!("session", id = session.id(), client = %client_addr);
                    let ctx = Arc::clone(&ctx);

                    tokio::spawn(
                        async move {
                            let report = session.run(&ctx).await;
                            debug!("Session report: {:?}", report.result);
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    error!("Accept loop on {} failed: {}", listen_addr, e);
                    break Err(e);
                }
            }
        };

        drop(listener);
        info!("Accept loop on {} stopped, listener closed", listen_addr);
        result
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("listener", &self.listener)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Bind `listen` with default connection settings and run until a permanent
/// accept error.
///
/// # Errors
///
/// Returns `BridgeError::ListenFailed` or `BridgeError::PermanentAccept`.
pub async fn run(listen: SocketAddr) -> Result<(), BridgeError> {
    Bridge::bind(&ListenConfig::new(listen), &ConnectionConfig::default())?
        .run()
        .await
}
