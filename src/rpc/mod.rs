//! JSON-RPC 2.0 types, collaborator traits and the default method registry.

pub mod handler;
pub mod registry;
pub mod types;

pub use handler::{dispatch, JsonFormatter, ResponseFormatter, RpcHandler};
pub use registry::MethodRegistry;
pub use types::{Outcome, RpcError, RpcReply, RpcRequest, RpcResponse};
