//! Per-connection processing pipeline.
//!
//! # Responsibilities
//! - Define the [`Stage`] interface (inbound, outbound, lifecycle)
//! - Assemble the fixed six-stage chain for every accepted connection
//! - Carry protocol errors back to the connection driver as close requests
//!
//! # Data Flow
//! ```text
//! socket ──→ http-codec ──→ size-guard ──→ websocket ──→ rpc-handler ──→ rpc-formatter ──→ idle-state
//! socket ←── http-codec ←── size-guard ←── websocket ←── rpc-formatter
//! ```
//!
//! # Design Decisions
//! - Stages are plain state machines with no I/O; the connection driver owns the
//!   socket and feeds them events
//! - The stage order is a constant ([`STAGE_ORDER`]), never configured

pub mod builder;
pub mod error;
pub mod event;
pub mod http;
pub mod idle;
pub mod limit;
pub mod rpc;
pub mod stage;
pub mod websocket;

pub use builder::{PipelineBuilder, STAGE_ORDER};
pub use error::ProtocolError;
pub use event::{CloseReason, Inbound, Lifecycle, Outbound};
pub use stage::{Pipeline, PipelineOutput, Stage, StageContext};
