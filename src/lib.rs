//! WebSocket JSON-RPC server library.
//!
//! Accepts TCP connections, upgrades them to WebSocket on `/websocket`, and
//! runs every message through a fixed per-connection pipeline ending in a
//! pluggable [`RpcHandler`].

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pipeline;
pub mod rpc;

pub use config::{GatewayConfig, ServerConfig};
pub use lifecycle::{ListeningHandle, ServerState, StartError, StopError, WebSocketServer};
pub use pipeline::{ProtocolError, STAGE_ORDER};
pub use rpc::{JsonFormatter, MethodRegistry, ResponseFormatter, RpcError, RpcHandler, RpcRequest};
