//! Connection-scoped protocol errors.

use http::StatusCode;
use thiserror::Error;

/// A protocol violation that terminates one connection and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// An aggregated HTTP message or a WebSocket message exceeded the configured limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    OversizedMessage { limit: usize, size: usize },

    /// The request was not an acceptable WebSocket upgrade.
    #[error("WebSocket handshake rejected with {status}: {reason}")]
    HandshakeRejected { status: StatusCode, reason: String },

    /// The byte stream could not be parsed as an HTTP/1.x request.
    #[error("malformed HTTP request: {0}")]
    MalformedHttp(String),

    /// The peer violated WebSocket framing rules.
    #[error("WebSocket protocol violation: {0}")]
    WebSocket(String),

    /// A response could not be encoded for the wire.
    #[error("failed to encode response: {0}")]
    Encode(String),
}
