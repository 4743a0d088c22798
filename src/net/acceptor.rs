//! Accept loop.
//!
//! # Responsibilities
//! - Accept connections while the server runs, within the connection limit
//! - Give each connection its own pipeline and idle timer
//! - Move each socket onto the worker pool and spawn its driver there
//!
//! # Design Decisions
//! - Accept errors never end the loop; they are logged and retried after a
//!   short back-off
//! - Sockets are detached from the acceptor's reactor before the hand-off, so
//!   they outlive the acceptor pool during shutdown

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::runtime::Handle;

use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{Connection, ConnectionTracker};
use crate::net::idle::IdleTimer;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;
use crate::pipeline::PipelineBuilder;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Acceptor {
    listener: Listener,
    builder: PipelineBuilder,
    idle_timeout: Duration,
    tracker: ConnectionTracker,
    shutdown: ShutdownSignal,
    workers: Handle,
}

impl Acceptor {
    pub fn new(
        listener: Listener,
        builder: PipelineBuilder,
        idle_timeout: Duration,
        tracker: ConnectionTracker,
        shutdown: ShutdownSignal,
        workers: Handle,
    ) -> Self {
        Self {
            listener,
            builder,
            idle_timeout,
            tracker,
            shutdown,
            workers,
        }
    }

    /// Accept until shutdown. The listening socket is closed on return.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.wait() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.dispatch(stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed, backing off");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
        tracing::info!("Accept loop stopped");
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        metrics::connection_accepted();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer_addr = %peer, error = %e, "Failed to detach accepted socket");
                return;
            }
        };

        let guard = self.tracker.track();
        let timer = IdleTimer::start(self.idle_timeout);
        let pipeline = self.builder.build(timer.clone());
        let shutdown = self.shutdown.clone();

        self.workers.spawn(async move {
            let stream = match TcpStream::from_std(stream) {
                Ok(stream) => stream,
                Err(e) => {
                    timer.cancel();
                    tracing::warn!(peer_addr = %peer, error = %e, "Failed to register socket with worker pool");
                    return;
                }
            };
            let connection = Connection::new(stream, peer, pipeline, timer, shutdown, guard, permit);
            let id = connection.id();
            if let Err(e) = connection.run().await {
                tracing::trace!(conn_id = %id, error = %e, "Connection ended with error");
            }
        });
    }
}
