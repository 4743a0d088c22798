//! Connection driver and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Own the socket and feed its bytes through the connection's pipeline
//! - Arm the idle deadline and deliver timeouts as lifecycle events
//! - React to server shutdown
//! - Track live connections so `stop()` can wait for them
//!
//! # Design Decisions
//! - One task per connection; reads, timer fires and shutdown are multiplexed
//!   with `select!`, so a connection's events are handled strictly in order
//! - Every exit path runs the same teardown: `Closed` lifecycle event, timer
//!   cancelled, socket shut down, metrics updated

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;

use crate::lifecycle::ShutdownSignal;
use crate::net::idle::IdleTimer;
use crate::net::listener::ConnectionPermit;
use crate::observability::metrics;
use crate::pipeline::{CloseReason, Inbound, Lifecycle, Pipeline, PipelineOutput, ProtocolError};

const READ_BUFFER_BYTES: usize = 8 * 1024;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is sufficient since only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection ended abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("no inbound traffic within the idle timeout")]
    IdleTimeout,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tracks active connections for graceful shutdown.
///
/// The count lives in a watch channel so shutdown can wait for it to reach
/// zero without polling.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let mut active = 0;
        self.active.send_modify(|count| {
            *count += 1;
            active = *count;
        });
        metrics::set_active_connections(active);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    /// Get the number of active connections.
    pub fn active_count(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolve once every tracked connection has closed.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<usize>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get the ID of the tracked connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut active = 0;
        self.active.send_modify(|count| {
            *count = count.saturating_sub(1);
            active = *count;
        });
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}

/// One accepted socket and everything that lives exactly as long as it.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    pipeline: Pipeline,
    timer: IdleTimer,
    shutdown: ShutdownSignal,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        pipeline: Pipeline,
        timer: IdleTimer,
        shutdown: ShutdownSignal,
        guard: ConnectionGuard,
        permit: ConnectionPermit,
    ) -> Self {
        Self {
            stream,
            peer,
            pipeline,
            timer,
            shutdown,
            guard,
            _permit: permit,
        }
    }

    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    /// Drive the connection until it closes.
    ///
    /// Normal endings (peer hang-up, completed close handshake, server
    /// shutdown) return `Ok`; idle timeouts, protocol violations and socket
    /// failures are returned as errors after the connection has been torn down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let span = tracing::debug_span!("connection", conn_id = %self.id(), peer = %self.peer);
        async move {
            tracing::debug!("Connection opened");
            let outcome = self.drive().await;
            self.teardown(&outcome).await;
            match outcome {
                Ok(CloseReason::IdleTimeout) => Err(ConnectionError::IdleTimeout),
                Ok(CloseReason::Protocol(e)) => Err(ConnectionError::Protocol(e)),
                Ok(_) => Ok(()),
                Err(e) => Err(ConnectionError::Io(e)),
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> std::io::Result<CloseReason> {
        let output = self.pipeline.fire_lifecycle(Lifecycle::Active);
        let mut close = self.flush(output).await?;
        let mut buf = BytesMut::with_capacity(READ_BUFFER_BYTES);

        loop {
            if let Some(reason) = close.take() {
                return Ok(reason);
            }
            buf.reserve(READ_BUFFER_BYTES);
            let deadline = self.timer.deadline();

            tokio::select! {
                biased;

                _ = self.shutdown.wait() => {
                    let output = self.pipeline.fire_lifecycle(Lifecycle::Shutdown);
                    close = Some(self.flush(output).await?.unwrap_or(CloseReason::ServerShutdown));
                }

                read = self.stream.read_buf(&mut buf) => {
                    if read? == 0 {
                        return Ok(CloseReason::PeerClosed);
                    }
                    let mut output = self.pipeline.fire_inbound(Inbound::Bytes(buf.split().freeze()));
                    output.merge(self.pipeline.fire_lifecycle(Lifecycle::ReadComplete));
                    close = self.flush(output).await?;
                }

                _ = idle_deadline(deadline) => {
                    if self.timer.try_fire(Instant::now()) {
                        let output = self.pipeline.fire_lifecycle(Lifecycle::IdleTimeout);
                        close = self.flush(output).await?;
                    }
                }
            }
        }
    }

    /// Write pipeline output to the socket; returns the close request, if any.
    async fn flush(&mut self, output: PipelineOutput) -> std::io::Result<Option<CloseReason>> {
        for bytes in &output.writes {
            self.stream.write_all(bytes).await?;
        }
        Ok(output.close)
    }

    async fn teardown(&mut self, outcome: &std::io::Result<CloseReason>) {
        let output = self.pipeline.fire_lifecycle(Lifecycle::Closed);
        self.timer.cancel();
        if outcome.is_ok() {
            for bytes in &output.writes {
                if self.stream.write_all(bytes).await.is_err() {
                    break;
                }
            }
        }
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(error = %e, "Socket shutdown failed");
        }

        match outcome {
            Ok(reason) => {
                metrics::connection_closed(reason.label());
                match reason {
                    CloseReason::Protocol(e) => tracing::debug!(error = %e, "Connection closed"),
                    reason => tracing::debug!(%reason, "Connection closed"),
                }
            }
            Err(e) => {
                metrics::connection_closed("io_error");
                tracing::debug!(error = %e, "Connection failed");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer", &self.peer)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

async fn idle_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
