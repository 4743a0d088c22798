//! Per-connection pipeline assembly.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::net::IdleTimer;
use crate::pipeline::http::HttpCodec;
use crate::pipeline::idle::IdleStateStage;
use crate::pipeline::limit::MessageSizeGuard;
use crate::pipeline::rpc::{ReplyFormatter, RpcDispatch};
use crate::pipeline::stage::{Pipeline, Stage};
use crate::pipeline::websocket::WebSocketProtocol;
use crate::rpc::{ResponseFormatter, RpcHandler};

/// Stage names, socket side first. Every pipeline has exactly this shape.
pub const STAGE_ORDER: [&str; 6] = [
    HttpCodec::NAME,
    MessageSizeGuard::NAME,
    WebSocketProtocol::NAME,
    RpcDispatch::NAME,
    ReplyFormatter::NAME,
    IdleStateStage::NAME,
];

/// Builds a fresh [`Pipeline`] for each accepted connection.
///
/// Holds only shared, immutable inputs; all per-connection state lives in the
/// stages it creates.
#[derive(Clone)]
pub struct PipelineBuilder {
    upgrade_path: String,
    max_message_bytes: usize,
    handler: Arc<dyn RpcHandler>,
    formatter: Arc<dyn ResponseFormatter>,
}

impl PipelineBuilder {
    pub fn new(
        config: &ServerConfig,
        handler: Arc<dyn RpcHandler>,
        formatter: Arc<dyn ResponseFormatter>,
    ) -> Self {
        Self {
            upgrade_path: config.upgrade_path.clone(),
            max_message_bytes: config.max_message_bytes,
            handler,
            formatter,
        }
    }

    pub fn build(&self, timer: IdleTimer) -> Pipeline {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(HttpCodec::new()),
            Box::new(MessageSizeGuard::new(self.max_message_bytes)),
            Box::new(WebSocketProtocol::new(
                self.upgrade_path.clone(),
                self.max_message_bytes,
            )),
            Box::new(RpcDispatch::new(Arc::clone(&self.handler))),
            Box::new(ReplyFormatter::new(Arc::clone(&self.formatter))),
            Box::new(IdleStateStage::new(timer)),
        ];
        Pipeline::new(stages)
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("upgrade_path", &self.upgrade_path)
            .field("max_message_bytes", &self.max_message_bytes)
            .finish_non_exhaustive()
    }
}
