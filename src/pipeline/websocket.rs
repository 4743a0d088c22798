//! WebSocket upgrade and framing.
//!
//! # Responsibilities
//! - Validate upgrade requests against the configured path and RFC 6455 rules
//! - Answer `101 Switching Protocols` with the derived accept key
//! - Deframe inbound bytes into messages, frame outbound messages
//! - Handle ping/pong and the close handshake without involving the application
//!
//! # Data Flow
//! ```text
//! HttpRequest ──validate──→ 101 / 4xx + close
//! Bytes ──→ WireBuffer.input ──tungstenite──→ Message ──→ next stage
//! Message ──tungstenite──→ WireBuffer.output ──→ Bytes ──→ previous stage
//! ```
//!
//! # Design Decisions
//! - tungstenite runs sans-io over an in-memory buffer; the connection driver
//!   stays the only owner of the socket
//! - Message size is capped with the same limit as HTTP aggregation

use std::io::{self, Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message, WebSocket};

use crate::observability::metrics;
use crate::pipeline::error::ProtocolError;
use crate::pipeline::event::{CloseReason, Inbound, Lifecycle, Outbound};
use crate::pipeline::http::closing_response;
use crate::pipeline::stage::{Stage, StageContext};

/// In-memory transport handed to tungstenite.
///
/// Reads drain `input` and report `WouldBlock` once it is empty; writes append
/// to `output`, which the stage forwards toward the socket.
#[derive(Debug, Default)]
pub struct WireBuffer {
    input: BytesMut,
    output: BytesMut,
}

impl WireBuffer {
    fn feed(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
    }

    fn take_output(&mut self) -> Option<Bytes> {
        if self.output.is_empty() {
            None
        } else {
            Some(self.output.split().freeze())
        }
    }
}

impl Read for WireBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.input.len());
        buf[..n].copy_from_slice(&self.input[..n]);
        self.input.advance(n);
        Ok(n)
    }
}

impl Write for WireBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum WsState {
    Handshake,
    Open(Box<WebSocket<WireBuffer>>),
    Closed,
}

pub struct WebSocketProtocol {
    upgrade_path: String,
    max_message_bytes: usize,
    state: WsState,
}

impl WebSocketProtocol {
    pub const NAME: &'static str = "websocket";

    pub fn new(upgrade_path: impl Into<String>, max_message_bytes: usize) -> Self {
        Self {
            upgrade_path: upgrade_path.into(),
            max_message_bytes,
            state: WsState::Handshake,
        }
    }

    fn handshake(&mut self, ctx: &mut StageContext, request: &Request<Bytes>) {
        match validate_upgrade(request, &self.upgrade_path) {
            Ok(accept) => {
                let mut response = Response::new(Bytes::new());
                *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
                let headers = response.headers_mut();
                headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
                headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
                headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
                ctx.write(Outbound::HttpResponse(response));

                let mut config = WebSocketConfig::default();
                config.max_message_size = Some(self.max_message_bytes);
                config.max_frame_size = Some(self.max_message_bytes);
                self.state = WsState::Open(Box::new(WebSocket::from_raw_socket(
                    WireBuffer::default(),
                    Role::Server,
                    Some(config),
                )));
                metrics::handshake("accepted");
                tracing::debug!(path = %request.uri().path(), "WebSocket handshake complete");
            }
            Err(rejection) => {
                metrics::handshake("rejected");
                tracing::debug!(
                    path = %request.uri().path(),
                    status = %rejection.status,
                    reason = %rejection.reason,
                    "WebSocket handshake rejected"
                );
                let mut response = closing_response(rejection.status, &rejection.reason);
                if rejection.status == StatusCode::UPGRADE_REQUIRED {
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
                }
                ctx.write(Outbound::HttpResponse(response));
                ctx.close(CloseReason::Protocol(ProtocolError::HandshakeRejected {
                    status: rejection.status,
                    reason: rejection.reason,
                }));
                self.state = WsState::Closed;
            }
        }
    }

    fn deframe(&mut self, ctx: &mut StageContext, bytes: &[u8]) -> Result<(), ProtocolError> {
        let WsState::Open(socket) = &mut self.state else {
            return Ok(());
        };
        socket.get_mut().feed(bytes);

        let mut completed = false;
        let result = loop {
            match socket.read() {
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "Peer started close handshake");
                    // Flushing queues our close reply; tungstenite then reports the
                    // server side of the handshake as finished.
                    match socket.flush() {
                        Ok(()) | Err(tungstenite::Error::ConnectionClosed) => {}
                        Err(e) => break Err(map_error(e)),
                    }
                    completed = true;
                    break Ok(());
                }
                Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                    ctx.fire_inbound(Inbound::Message(message));
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    // Pong replies to pings are queued during read.
                    if let Err(e) = socket.flush() {
                        break Err(map_error(e));
                    }
                    break Ok(());
                }
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    completed = true;
                    break Ok(());
                }
                Err(e) => break Err(map_error(e)),
            }
        };

        if let Some(bytes) = socket.get_mut().take_output() {
            ctx.write(Outbound::Bytes(bytes));
        }
        if completed {
            self.state = WsState::Closed;
            ctx.close(CloseReason::Completed);
        }
        result
    }

    fn frame(&mut self, ctx: &mut StageContext, message: Message) -> Result<(), ProtocolError> {
        let WsState::Open(socket) = &mut self.state else {
            tracing::debug!("Dropping outbound message on a connection that is not open");
            return Ok(());
        };
        let result = socket.send(message).map_err(map_error);
        if let Some(bytes) = socket.get_mut().take_output() {
            ctx.write(Outbound::Bytes(bytes));
        }
        result
    }

    fn going_away(&mut self, ctx: &mut StageContext) {
        if let WsState::Open(socket) = &mut self.state {
            let frame = CloseFrame {
                code: CloseCode::Away,
                reason: "server shutting down".into(),
            };
            if let Err(e) = socket.close(Some(frame)) {
                tracing::trace!(error = %e, "Close frame not sent");
            }
            if let Some(bytes) = socket.get_mut().take_output() {
                ctx.write(Outbound::Bytes(bytes));
            }
        }
        self.state = WsState::Closed;
        ctx.close(CloseReason::ServerShutdown);
    }
}

impl Stage for WebSocketProtocol {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
        match event {
            Inbound::HttpRequest(request) => {
                if matches!(self.state, WsState::Handshake) {
                    self.handshake(ctx, &request);
                }
                Ok(())
            }
            Inbound::Bytes(bytes) => self.deframe(ctx, &bytes),
            other => {
                ctx.fire_inbound(other);
                Ok(())
            }
        }
    }

    fn on_outbound(&mut self, ctx: &mut StageContext, event: Outbound) -> Result<(), ProtocolError> {
        match event {
            Outbound::Message(message) => self.frame(ctx, message),
            other => {
                ctx.write(other);
                Ok(())
            }
        }
    }

    fn on_lifecycle(&mut self, ctx: &mut StageContext, event: Lifecycle) -> Result<(), ProtocolError> {
        if event == Lifecycle::Shutdown {
            self.going_away(ctx);
        }
        Ok(())
    }
}

fn map_error(error: tungstenite::Error) -> ProtocolError {
    match error {
        tungstenite::Error::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            ProtocolError::OversizedMessage {
                limit: max_size,
                size,
            }
        }
        other => ProtocolError::WebSocket(other.to_string()),
    }
}

#[derive(Debug)]
struct Rejection {
    status: StatusCode,
    reason: String,
}

impl Rejection {
    fn new(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
        }
    }
}

/// Check an aggregated request against the upgrade rules and derive the accept key.
fn validate_upgrade(request: &Request<Bytes>, upgrade_path: &str) -> Result<HeaderValue, Rejection> {
    if request.uri().path() != upgrade_path {
        return Err(Rejection::new(
            StatusCode::NOT_FOUND,
            format!("no WebSocket endpoint at {}", request.uri().path()),
        ));
    }
    if request.method() != Method::GET {
        return Err(Rejection::new(StatusCode::BAD_REQUEST, "upgrade requires GET"));
    }

    let headers = request.headers();
    if !header_has_token(headers, UPGRADE, "websocket") {
        return Err(Rejection::new(StatusCode::BAD_REQUEST, "missing Upgrade: websocket"));
    }
    if !header_has_token(headers, CONNECTION, "upgrade") {
        return Err(Rejection::new(StatusCode::BAD_REQUEST, "missing Connection: upgrade"));
    }
    if headers.get(SEC_WEBSOCKET_VERSION).map(|v| v.as_bytes()) != Some(b"13".as_slice()) {
        return Err(Rejection::new(
            StatusCode::UPGRADE_REQUIRED,
            "unsupported WebSocket version",
        ));
    }
    let Some(key) = headers.get(SEC_WEBSOCKET_KEY) else {
        return Err(Rejection::new(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key"));
    };

    HeaderValue::from_str(&derive_accept_key(key.as_bytes()))
        .map_err(|e| Rejection::new(StatusCode::BAD_REQUEST, e.to_string()))
}

fn header_has_token(headers: &HeaderMap, name: http::header::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(path: &str) -> http::request::Builder {
        Request::get(path)
            .header("host", "localhost")
            .header("upgrade", "websocket")
            .header("connection", "keep-alive, Upgrade")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
    }

    /// A masked client frame, as browsers send them.
    fn client_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() < 126);
        let mask = [0x11, 0x22, 0x33, 0x44];
        let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
        frame.extend_from_slice(&mask);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
        frame
    }

    fn open_stage() -> WebSocketProtocol {
        let mut stage = WebSocketProtocol::new("/websocket", 1024);
        let mut ctx = StageContext::default();
        let request = upgrade_request("/websocket").body(Bytes::new()).unwrap();
        stage.on_inbound(&mut ctx, Inbound::HttpRequest(request)).unwrap();
        assert!(ctx.close_reason().is_none());
        stage
    }

    #[test]
    fn accepts_rfc_sample_key() {
        let request = upgrade_request("/websocket").body(Bytes::new()).unwrap();
        let accept = validate_upgrade(&request, "/websocket").unwrap();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn wrong_path_is_not_found() {
        let request = upgrade_request("/ws").body(Bytes::new()).unwrap();
        let rejection = validate_upgrade(&request, "/websocket").unwrap_err();
        assert_eq!(rejection.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn plain_get_is_bad_request() {
        let request = Request::get("/websocket").body(Bytes::new()).unwrap();
        let rejection = validate_upgrade(&request, "/websocket").unwrap_err();
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn old_version_requires_upgrade() {
        let request = upgrade_request("/websocket").body(Bytes::new()).unwrap();
        let (mut parts, body) = request.into_parts();
        parts
            .headers
            .insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        let request = Request::from_parts(parts, body);

        let rejection = validate_upgrade(&request, "/websocket").unwrap_err();
        assert_eq!(rejection.status, StatusCode::UPGRADE_REQUIRED);
    }

    #[test]
    fn rejection_closes_connection() {
        let mut stage = WebSocketProtocol::new("/websocket", 1024);
        let mut ctx = StageContext::default();
        let request = upgrade_request("/elsewhere").body(Bytes::new()).unwrap();
        stage.on_inbound(&mut ctx, Inbound::HttpRequest(request)).unwrap();

        assert!(matches!(
            ctx.close_reason(),
            Some(CloseReason::Protocol(ProtocolError::HandshakeRejected { status, .. }))
                if *status == StatusCode::NOT_FOUND
        ));
    }

    #[test]
    fn deframes_text_message() {
        let mut stage = open_stage();
        let mut ctx = StageContext::default();
        let frame = client_frame(0x1, br#"{"jsonrpc":"2.0"}"#);
        stage.on_inbound(&mut ctx, Inbound::Bytes(frame.into())).unwrap();

        let (inbound, _) = ctx.into_events();
        match inbound.as_slice() {
            [Inbound::Message(message)] => {
                assert_eq!(message.to_text().unwrap(), r#"{"jsonrpc":"2.0"}"#)
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn ping_is_answered_internally() {
        let mut stage = open_stage();
        let mut ctx = StageContext::default();
        stage
            .on_inbound(&mut ctx, Inbound::Bytes(client_frame(0x9, b"hi").into()))
            .unwrap();

        let (inbound, outbound) = ctx.into_events();
        assert!(inbound.is_empty());
        match outbound.as_slice() {
            // Unmasked server pong carrying the ping payload.
            [Outbound::Bytes(bytes)] => assert_eq!(&bytes[..], &[0x8A, 0x02, b'h', b'i'][..]),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn close_frame_completes_connection() {
        let mut stage = open_stage();
        let mut ctx = StageContext::default();
        stage
            .on_inbound(&mut ctx, Inbound::Bytes(client_frame(0x8, &[0x03, 0xE8]).into()))
            .unwrap();

        assert_eq!(ctx.close_reason(), Some(&CloseReason::Completed));
        let (_, outbound) = ctx.into_events();
        assert!(matches!(outbound.as_slice(), [Outbound::Bytes(reply)] if reply[0] == 0x88));
    }

    #[test]
    fn frames_outbound_text() {
        let mut stage = open_stage();
        let mut ctx = StageContext::default();
        stage
            .on_outbound(&mut ctx, Outbound::Message(Message::text("ok")))
            .unwrap();

        let (_, outbound) = ctx.into_events();
        assert!(matches!(outbound.as_slice(), [Outbound::Bytes(b)] if b[..] == [0x81, 0x02, b'o', b'k']));
    }

    #[test]
    fn oversized_message_is_protocol_error() {
        let mut stage = WebSocketProtocol::new("/websocket", 4);
        let mut ctx = StageContext::default();
        let request = upgrade_request("/websocket").body(Bytes::new()).unwrap();
        stage.on_inbound(&mut ctx, Inbound::HttpRequest(request)).unwrap();

        let mut ctx = StageContext::default();
        let err = stage
            .on_inbound(&mut ctx, Inbound::Bytes(client_frame(0x1, b"too long").into()))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedMessage { .. } | ProtocolError::WebSocket(_)));
    }

    #[test]
    fn shutdown_sends_going_away() {
        let mut stage = open_stage();
        let mut ctx = StageContext::default();
        stage.on_lifecycle(&mut ctx, Lifecycle::Shutdown).unwrap();

        assert_eq!(ctx.close_reason(), Some(&CloseReason::ServerShutdown));
        let (_, outbound) = ctx.into_events();
        // 0x88 close opcode, status 1001.
        assert!(matches!(outbound.as_slice(), [Outbound::Bytes(b)] if b[0] == 0x88 && b[2..4] == [0x03, 0xE9]));
    }
}
