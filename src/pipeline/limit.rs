//! Aggregated message size guard.
//!
//! # Responsibilities
//! - Join an HTTP head and its body chunks into one request
//! - Refuse any request whose announced or actual size exceeds the limit
//!
//! # Design Decisions
//! - The announced `Content-Length` is checked before a single body byte is
//!   buffered, so an oversized upload costs nothing
//! - Buffers grow with the bytes actually received, never with the announced length
//! - Rejection answers `413 Payload Too Large` and closes the connection

use bytes::BytesMut;
use http::request::Parts;
use http::{Request, StatusCode};

use crate::pipeline::error::ProtocolError;
use crate::pipeline::event::{CloseReason, Inbound, Outbound};
use crate::pipeline::http::closing_response;
use crate::pipeline::stage::{Stage, StageContext};

/// Body buffers start at most this large and grow as chunks arrive.
const INITIAL_BODY_CAPACITY: usize = 8 * 1024;

#[derive(Debug)]
pub struct MessageSizeGuard {
    limit: usize,
    pending: Option<(Parts, BytesMut)>,
}

impl MessageSizeGuard {
    pub const NAME: &'static str = "size-guard";

    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            pending: None,
        }
    }

    fn reject(&mut self, ctx: &mut StageContext, size: usize) {
        self.pending = None;
        tracing::debug!(size, limit = self.limit, "Rejecting oversized HTTP message");
        ctx.write(Outbound::HttpResponse(closing_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "request entity too large",
        )));
        ctx.close(CloseReason::Protocol(ProtocolError::OversizedMessage {
            limit: self.limit,
            size,
        }));
    }
}

impl Stage for MessageSizeGuard {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
        match event {
            Inbound::HttpHead(head) => {
                if head.content_length > self.limit {
                    self.reject(ctx, head.content_length);
                } else {
                    let capacity = head.content_length.min(INITIAL_BODY_CAPACITY);
                    self.pending = Some((head.parts, BytesMut::with_capacity(capacity)));
                }
            }
            Inbound::HttpBody(chunk) => {
                let Some((_, body)) = self.pending.as_mut() else {
                    return Ok(());
                };
                let size = body.len() + chunk.len();
                if size > self.limit {
                    self.reject(ctx, size);
                } else {
                    body.extend_from_slice(&chunk);
                }
            }
            Inbound::HttpEnd => {
                if let Some((parts, body)) = self.pending.take() {
                    ctx.fire_inbound(Inbound::HttpRequest(Request::from_parts(parts, body.freeze())));
                }
            }
            other => ctx.fire_inbound(other),
        }
        Ok(())
    }
}
