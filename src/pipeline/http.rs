//! HTTP/1.x request codec.
//!
//! # Responsibilities
//! - Parse request heads out of the raw byte stream
//! - Slice `Content-Length` bodies into chunks without buffering them whole
//! - Serialize outbound HTTP responses
//! - Become a raw byte pass-through once a `101 Switching Protocols` is sent
//!
//! # Design Decisions
//! - Request heads are bounded; an unterminated head larger than the bound is rejected
//! - Chunked request bodies are not supported (WebSocket upgrades never carry one)
//! - Bytes that arrive after an upgrade request but before its response are held
//!   back, so an early first frame is never mistaken for a new request

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderValue, Response, StatusCode, Version};

use crate::pipeline::error::ProtocolError;
use crate::pipeline::event::{HttpHead, Inbound, Outbound};
use crate::pipeline::stage::{Stage, StageContext};

/// Largest request head (request line plus headers) accepted.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecState {
    Head,
    Body { remaining: usize, upgrade: bool },
    AwaitingUpgrade,
    Upgraded,
}

/// First stage: bytes ⇄ HTTP messages.
#[derive(Debug)]
pub struct HttpCodec {
    state: CodecState,
    buffer: BytesMut,
}

impl HttpCodec {
    pub const NAME: &'static str = "http-codec";

    pub fn new() -> Self {
        Self {
            state: CodecState::Head,
            buffer: BytesMut::new(),
        }
    }

    fn decode(&mut self, ctx: &mut StageContext) -> Result<(), ProtocolError> {
        loop {
            match self.state {
                CodecState::Head => {
                    let Some((head, consumed)) = parse_head(&self.buffer)? else {
                        if self.buffer.len() > MAX_HEAD_BYTES {
                            return Err(ProtocolError::MalformedHttp(format!(
                                "request head exceeds {} bytes",
                                MAX_HEAD_BYTES
                            )));
                        }
                        return Ok(());
                    };
                    self.buffer.advance(consumed);

                    let upgrade = head.parts.headers.contains_key(UPGRADE);
                    let remaining = head.content_length;
                    ctx.fire_inbound(Inbound::HttpHead(head));
                    self.state = if remaining > 0 {
                        CodecState::Body { remaining, upgrade }
                    } else {
                        finish_request(ctx, upgrade)
                    };
                }
                CodecState::Body { remaining, upgrade } => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(self.buffer.len());
                    ctx.fire_inbound(Inbound::HttpBody(self.buffer.split_to(take).freeze()));
                    self.state = match remaining - take {
                        0 => finish_request(ctx, upgrade),
                        remaining => CodecState::Body { remaining, upgrade },
                    };
                }
                CodecState::AwaitingUpgrade | CodecState::Upgraded => return Ok(()),
            }
        }
    }
}

impl Default for HttpCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn finish_request(ctx: &mut StageContext, upgrade: bool) -> CodecState {
    ctx.fire_inbound(Inbound::HttpEnd);
    if upgrade {
        CodecState::AwaitingUpgrade
    } else {
        CodecState::Head
    }
}

impl Stage for HttpCodec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
        match event {
            Inbound::Bytes(bytes) if self.state == CodecState::Upgraded => {
                ctx.fire_inbound(Inbound::Bytes(bytes));
                Ok(())
            }
            Inbound::Bytes(bytes) => {
                self.buffer.extend_from_slice(&bytes);
                self.decode(ctx)
            }
            other => {
                ctx.fire_inbound(other);
                Ok(())
            }
        }
    }

    fn on_outbound(&mut self, ctx: &mut StageContext, event: Outbound) -> Result<(), ProtocolError> {
        match event {
            Outbound::HttpResponse(response) => {
                let switching = response.status() == StatusCode::SWITCHING_PROTOCOLS;
                ctx.write(Outbound::Bytes(encode_response(&response)));

                if switching {
                    self.state = CodecState::Upgraded;
                    if !self.buffer.is_empty() {
                        ctx.fire_inbound(Inbound::Bytes(self.buffer.split().freeze()));
                    }
                } else if self.state == CodecState::AwaitingUpgrade {
                    self.state = CodecState::Head;
                    self.decode(ctx)?;
                }
                Ok(())
            }
            other => {
                ctx.write(other);
                Ok(())
            }
        }
    }
}

/// Parse one request head. `Ok(None)` means more bytes are needed.
fn parse_head(buffer: &[u8]) -> Result<Option<(HttpHead, usize)>, ProtocolError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let consumed = match request.parse(buffer) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProtocolError::MalformedHttp(e.to_string())),
    };

    let (Some(method), Some(path), Some(version)) = (request.method, request.path, request.version)
    else {
        return Err(ProtocolError::MalformedHttp("incomplete request line".into()));
    };

    let mut builder = http::Request::builder()
        .method(method)
        .uri(path)
        .version(if version == 0 { Version::HTTP_10 } else { Version::HTTP_11 });
    for header in request.headers.iter() {
        builder = builder.header(header.name, header.value);
    }
    let (parts, ()) = builder
        .body(())
        .map_err(|e| ProtocolError::MalformedHttp(e.to_string()))?
        .into_parts();

    if parts.headers.contains_key(TRANSFER_ENCODING) {
        return Err(ProtocolError::MalformedHttp(
            "transfer-encoding is not supported".into(),
        ));
    }

    let content_length = match parts.headers.get(CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| ProtocolError::MalformedHttp("invalid content-length".into()))?,
        None => 0,
    };

    Ok(Some((HttpHead { parts, content_length }, consumed)))
}

/// Serialize a response as HTTP/1.1.
pub fn encode_response(response: &Response<Bytes>) -> Bytes {
    let status = response.status();
    let body = response.body();
    let mut out = BytesMut::with_capacity(128 + body.len());

    out.extend_from_slice(
        format!(
            "HTTP/1.1 {} {}\r\n",
            status.as_str(),
            status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    if status != StatusCode::SWITCHING_PROTOCOLS && !response.headers().contains_key(CONTENT_LENGTH) {
        out.extend_from_slice(format!("content-length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out.freeze()
}

/// A plain-text response that also tells the client the connection is closing.
pub fn closing_response(status: StatusCode, reason: &str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::copy_from_slice(reason.as_bytes()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
