//! Application stages: JSON-RPC dispatch and reply formatting.

use std::sync::Arc;

use tokio_tungstenite::tungstenite::Message;

use crate::pipeline::error::ProtocolError;
use crate::pipeline::event::{Inbound, Outbound};
use crate::pipeline::stage::{Stage, StageContext};
use crate::rpc::{self, ResponseFormatter, RpcHandler};

/// Runs every inbound data message through the [`RpcHandler`].
pub struct RpcDispatch {
    handler: Arc<dyn RpcHandler>,
}

impl RpcDispatch {
    pub const NAME: &'static str = "rpc-handler";

    pub fn new(handler: Arc<dyn RpcHandler>) -> Self {
        Self { handler }
    }
}

impl Stage for RpcDispatch {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
        match event {
            Inbound::Message(message @ (Message::Text(_) | Message::Binary(_))) => {
                let payload = message.into_data();
                if let Some(reply) = rpc::dispatch(&*self.handler, &payload) {
                    ctx.fire_inbound(Inbound::Reply(reply));
                }
            }
            other => ctx.fire_inbound(other),
        }
        Ok(())
    }
}

/// Hands replies to the [`ResponseFormatter`] and writes the result outbound.
pub struct ReplyFormatter {
    formatter: Arc<dyn ResponseFormatter>,
}

impl ReplyFormatter {
    pub const NAME: &'static str = "rpc-formatter";

    pub fn new(formatter: Arc<dyn ResponseFormatter>) -> Self {
        Self { formatter }
    }
}

impl Stage for ReplyFormatter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
        match event {
            Inbound::Reply(reply) => ctx.write(Outbound::Message(self.formatter.format(&reply)?)),
            other => ctx.fire_inbound(other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{JsonFormatter, MethodRegistry, RpcReply, RpcResponse};
    use serde_json::{json, Value};

    #[test]
    fn text_message_becomes_reply() {
        let mut stage = RpcDispatch::new(Arc::new(MethodRegistry::standard()));
        let mut ctx = StageContext::default();
        let request = r#"{"jsonrpc":"2.0","id":1,"method":"net_listening"}"#;
        stage
            .on_inbound(&mut ctx, Inbound::Message(Message::text(request)))
            .unwrap();

        match ctx.into_events().0.as_slice() {
            [Inbound::Reply(RpcReply::Single(response))] => {
                assert_eq!(response.result(), Some(&json!(true)))
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn notification_produces_nothing() {
        let mut stage = RpcDispatch::new(Arc::new(MethodRegistry::standard()));
        let mut ctx = StageContext::default();
        let request = r#"{"jsonrpc":"2.0","method":"net_listening"}"#;
        stage
            .on_inbound(&mut ctx, Inbound::Message(Message::binary(request.as_bytes().to_vec())))
            .unwrap();
        assert!(ctx.into_events().0.is_empty());
    }

    #[test]
    fn formatter_writes_message_outbound() {
        let mut stage = ReplyFormatter::new(Arc::new(JsonFormatter));
        let mut ctx = StageContext::default();
        let reply = RpcReply::Single(RpcResponse::success(json!(4), json!("x")));
        stage.on_inbound(&mut ctx, Inbound::Reply(reply)).unwrap();

        let (inbound, outbound) = ctx.into_events();
        assert!(inbound.is_empty());
        match outbound.as_slice() {
            [Outbound::Message(message)] => {
                let value: Value = serde_json::from_str(message.to_text().unwrap()).unwrap();
                assert_eq!(value["id"], json!(4));
            }
            other => panic!("unexpected events {:?}", other),
        }
    }
}
