//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! start() (server.rs):
//!     Bind socket → Build pools (pools.rs) → Spawn accept loop → Running
//!
//! stop() (server.rs, shutdown.rs):
//!     Trigger shutdown → Close listener → Connections send 1001 → Drain → Drop pools
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → caller invokes stop()
//! ```
//!
//! # Design Decisions
//! - Ordered startup: socket first, pools only after a successful bind
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has a deadline: stragglers are dropped with the pools

pub mod error;
pub mod pools;
pub mod server;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use error::{StartError, StopError};
pub use pools::ExecutionPools;
pub use server::{ListeningHandle, WebSocketServer};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::wait_for_signal;
pub use state::ServerState;
