//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → acceptor.rs (pipeline + idle timer, hand-off to worker pool)
//!     → connection.rs (socket ⇄ pipeline driver, lifecycle tracking)
//!     → idle.rs (read-idle deadline)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Accepting and connection work run on separate runtimes

pub mod acceptor;
pub mod connection;
pub mod idle;
pub mod listener;

pub use acceptor::Acceptor;
pub use connection::{Connection, ConnectionError, ConnectionGuard, ConnectionId, ConnectionTracker};
pub use idle::IdleTimer;
pub use listener::{bind, ConnectionPermit, Listener, ListenerError};
