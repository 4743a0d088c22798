//! Pluggable RPC collaborators and request dispatch.
//!
//! # Responsibilities
//! - Define the seams an embedding application fills in: [`RpcHandler`]
//!   executes calls, [`ResponseFormatter`] turns replies into messages
//! - Decode single and batch payloads, answer protocol-level failures
//!   (parse error, invalid request) without consulting the handler
//!
//! # Design Decisions
//! - Handlers are synchronous; they run on the connection's task and must not block
//! - A panicking handler is reported to the client as an internal error
//!   instead of tearing down the connection

use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::observability::metrics;
use crate::pipeline::ProtocolError;
use crate::rpc::types::{RpcError, RpcReply, RpcRequest, RpcResponse, JSONRPC_VERSION};

/// Executes one JSON-RPC call.
pub trait RpcHandler: Send + Sync {
    fn handle(&self, request: &RpcRequest) -> Result<Value, RpcError>;
}

/// Turns a reply into the WebSocket message sent back to the client.
pub trait ResponseFormatter: Send + Sync {
    fn format(&self, reply: &RpcReply) -> Result<Message, ProtocolError>;
}

/// Serializes replies as JSON text frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl ResponseFormatter for JsonFormatter {
    fn format(&self, reply: &RpcReply) -> Result<Message, ProtocolError> {
        serde_json::to_string(reply)
            .map(Message::text)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}

/// Decode `payload` and run every call it contains through `handler`.
///
/// Returns `None` when nothing needs to be sent back, i.e. the payload held
/// only notifications.
pub fn dispatch(handler: &dyn RpcHandler, payload: &[u8]) -> Option<RpcReply> {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Unparsable JSON-RPC payload");
            return Some(RpcReply::Single(RpcResponse::failure(
                Value::Null,
                RpcError::parse_error(),
            )));
        }
    };

    match value {
        Value::Array(calls) if calls.is_empty() => Some(RpcReply::Single(RpcResponse::failure(
            Value::Null,
            RpcError::invalid_request(),
        ))),
        Value::Array(calls) => {
            let responses: Vec<RpcResponse> = calls
                .into_iter()
                .filter_map(|call| dispatch_one(handler, call))
                .collect();
            if responses.is_empty() {
                None
            } else {
                Some(RpcReply::Batch(responses))
            }
        }
        call => dispatch_one(handler, call).map(RpcReply::Single),
    }
}

fn dispatch_one(handler: &dyn RpcHandler, call: Value) -> Option<RpcResponse> {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let request: RpcRequest = match serde_json::from_value(call) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed JSON-RPC request");
            return Some(RpcResponse::failure(id, RpcError::invalid_request()));
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Some(RpcResponse::failure(id, RpcError::invalid_request()));
    }

    metrics::rpc_request();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&request)))
        .unwrap_or_else(|_| {
            tracing::error!(method = %request.method, "RPC handler panicked");
            Err(RpcError::internal("Internal error"))
        });

    if request.is_notification() {
        if let Err(e) = outcome {
            tracing::debug!(method = %request.method, error = %e, "Notification failed");
        }
        return None;
    }

    Some(match outcome {
        Ok(result) => RpcResponse::success(id, result),
        Err(error) => RpcResponse::failure(id, error),
    })
}
