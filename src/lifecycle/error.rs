//! Server-scoped errors, returned synchronously from `start()` and `stop()`.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StartError {
    /// The address is in use, not permitted, or could not be resolved.
    #[error("failed to bind listening socket: {0}")]
    BindFailed(#[source] io::Error),

    #[error("server is already running on {addr}")]
    AlreadyRunning { addr: SocketAddr },

    /// An execution pool could not be created.
    #[error("failed to build execution pools: {0}")]
    Runtime(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum StopError {
    /// Connections were still open when the grace period ran out. They have
    /// been dropped and the server is stopped regardless.
    #[error("{open_connections} connection(s) still open after the shutdown grace period")]
    ShutdownTimeout { open_connections: usize },
}
