//! Read-idle enforcement stage.

use crate::net::IdleTimer;
use crate::pipeline::error::ProtocolError;
use crate::pipeline::event::{CloseReason, Lifecycle};
use crate::pipeline::stage::{Stage, StageContext};

/// Last stage of every pipeline. Keeps the connection's [`IdleTimer`] in step
/// with inbound traffic and closes the connection when the timer fires.
#[derive(Debug)]
pub struct IdleStateStage {
    timer: IdleTimer,
}

impl IdleStateStage {
    pub const NAME: &'static str = "idle-state";

    pub fn new(timer: IdleTimer) -> Self {
        Self { timer }
    }
}

impl Stage for IdleStateStage {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn on_lifecycle(&mut self, ctx: &mut StageContext, event: Lifecycle) -> Result<(), ProtocolError> {
        match event {
            Lifecycle::Active | Lifecycle::ReadComplete => self.timer.reset(),
            Lifecycle::IdleTimeout => {
                tracing::debug!(timeout = ?self.timer.timeout(), "Connection idle, closing");
                ctx.close(CloseReason::IdleTimeout);
            }
            Lifecycle::Shutdown | Lifecycle::Closed => self.timer.cancel(),
        }
        Ok(())
    }
}
