//! Events that travel through a connection's pipeline.
//!
//! Inbound events move from the socket toward the application (stage 0 → N),
//! outbound events move from the application toward the socket (N → 0), and
//! lifecycle events are offered to every stage in order.

use bytes::Bytes;
use http::{request, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::pipeline::error::ProtocolError;
use crate::rpc::RpcReply;

/// A parsed HTTP request head and the body length it announced.
#[derive(Debug)]
pub struct HttpHead {
    pub parts: request::Parts,
    pub content_length: usize,
}

#[derive(Debug)]
pub enum Inbound {
    /// Raw bytes read from the socket.
    Bytes(Bytes),
    /// Start of an HTTP request.
    HttpHead(HttpHead),
    /// A slice of the current request body.
    HttpBody(Bytes),
    /// The current request is complete.
    HttpEnd,
    /// A fully aggregated HTTP request.
    HttpRequest(Request<Bytes>),
    /// A complete WebSocket data message.
    Message(Message),
    /// Output of the RPC handler, waiting to be formatted.
    Reply(RpcReply),
}

#[derive(Debug)]
pub enum Outbound {
    /// Encoded bytes ready for the socket.
    Bytes(Bytes),
    /// An HTTP response to serialize.
    HttpResponse(Response<Bytes>),
    /// A WebSocket message to frame.
    Message(Message),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The connection has been accepted and its driver is running.
    Active,
    /// A socket read has been fully pushed through the pipeline.
    ReadComplete,
    /// The idle timer expired.
    IdleTimeout,
    /// The server is stopping.
    Shutdown,
    /// The connection is closing; last event any stage sees.
    Closed,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the TCP stream.
    PeerClosed,
    /// The WebSocket close handshake finished.
    Completed,
    /// No inbound traffic within the idle window.
    IdleTimeout,
    /// A protocol violation.
    Protocol(ProtocolError),
    /// The server is stopping.
    ServerShutdown,
}

impl CloseReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::Completed => "completed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::Protocol(_) => "protocol_error",
            CloseReason::ServerShutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Protocol(e) => write!(f, "protocol error: {}", e),
            other => f.write_str(other.label()),
        }
    }
}
