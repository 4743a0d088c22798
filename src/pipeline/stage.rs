//! Stage interface and the per-connection event loop that drives it.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::pipeline::error::ProtocolError;
use crate::pipeline::event::{CloseReason, Inbound, Lifecycle, Outbound};

/// One processing step in a connection's pipeline.
///
/// Every capability has a default: inbound and outbound events are passed
/// along unchanged, lifecycle events are ignored. A returned error closes the
/// connection with [`CloseReason::Protocol`].
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
        ctx.fire_inbound(event);
        Ok(())
    }

    fn on_outbound(&mut self, ctx: &mut StageContext, event: Outbound) -> Result<(), ProtocolError> {
        ctx.write(event);
        Ok(())
    }

    fn on_lifecycle(&mut self, _ctx: &mut StageContext, _event: Lifecycle) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[derive(Debug)]
enum Emitted {
    Inbound(Inbound),
    Outbound(Outbound),
}

/// What a stage asks the pipeline to do next.
#[derive(Debug, Default)]
pub struct StageContext {
    emitted: Vec<Emitted>,
    close: Option<CloseReason>,
}

impl StageContext {
    /// Hand an event to the next stage toward the application.
    pub fn fire_inbound(&mut self, event: Inbound) {
        self.emitted.push(Emitted::Inbound(event));
    }

    /// Hand an event to the previous stage toward the socket.
    pub fn write(&mut self, event: Outbound) {
        self.emitted.push(Emitted::Outbound(event));
    }

    /// Request that the connection be closed once pending writes are flushed.
    /// The first reason recorded wins.
    pub fn close(&mut self, reason: CloseReason) {
        self.close.get_or_insert(reason);
    }

    #[cfg(test)]
    pub(crate) fn into_events(self) -> (Vec<Inbound>, Vec<Outbound>) {
        let mut inbound = Vec::new();
        let mut outbound = Vec::new();
        for emitted in self.emitted {
            match emitted {
                Emitted::Inbound(event) => inbound.push(event),
                Emitted::Outbound(event) => outbound.push(event),
            }
        }
        (inbound, outbound)
    }

    #[cfg(test)]
    pub(crate) fn close_reason(&self) -> Option<&CloseReason> {
        self.close.as_ref()
    }
}

/// Result of pushing one event through the pipeline.
#[derive(Debug, Default)]
pub struct PipelineOutput {
    /// Encoded bytes to write to the socket, in order.
    pub writes: Vec<Bytes>,
    /// Set when some stage asked for the connection to close.
    pub close: Option<CloseReason>,
}

impl PipelineOutput {
    pub fn merge(&mut self, other: PipelineOutput) {
        self.writes.extend(other.writes);
        if self.close.is_none() {
            self.close = other.close;
        }
    }
}

enum Pending {
    Inbound(usize, Inbound),
    /// `None` means the event has passed stage 0 and belongs to the socket.
    Outbound(Option<usize>, Outbound),
    Lifecycle(usize, Lifecycle),
}

/// An ordered, immutable chain of stages owned by a single connection.
///
/// Events are processed breadth-first in the order they were emitted, so a
/// connection's traffic is handled strictly in arrival order. Once a close has
/// been requested, remaining inbound events are discarded while outbound and
/// lifecycle events still run so that final responses reach the socket.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub(crate) fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Stage names in pipeline order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Deliver an event to the first stage.
    pub fn fire_inbound(&mut self, event: Inbound) -> PipelineOutput {
        self.run(Pending::Inbound(0, event))
    }

    /// Deliver an event to the last stage, travelling toward the socket.
    pub fn write(&mut self, event: Outbound) -> PipelineOutput {
        let last = self.stages.len().checked_sub(1);
        self.run(Pending::Outbound(last, event))
    }

    /// Offer a lifecycle event to every stage in order.
    pub fn fire_lifecycle(&mut self, event: Lifecycle) -> PipelineOutput {
        self.run(Pending::Lifecycle(0, event))
    }

    fn run(&mut self, first: Pending) -> PipelineOutput {
        let mut output = PipelineOutput::default();
        let mut queue = VecDeque::from([first]);

        while let Some(pending) = queue.pop_front() {
            let (index, next_lifecycle) = match &pending {
                Pending::Inbound(index, _) => (*index, None),
                Pending::Outbound(Some(index), _) => (*index, None),
                Pending::Outbound(None, _) => (0, None),
                Pending::Lifecycle(index, event) => (*index, Some(*event)),
            };

            let mut ctx = StageContext::default();
            let result = match pending {
                Pending::Inbound(_, event) => {
                    if output.close.is_some() {
                        tracing::trace!(?event, "Dropping inbound event after close");
                        continue;
                    }
                    let Some(stage) = self.stages.get_mut(index) else {
                        tracing::trace!(?event, "Inbound event reached the end of the pipeline");
                        continue;
                    };
                    stage.on_inbound(&mut ctx, event).map_err(|e| (stage.name(), e))
                }
                Pending::Outbound(None, event) => {
                    match event {
                        Outbound::Bytes(bytes) => output.writes.push(bytes),
                        other => tracing::warn!(event = ?other, "Unencoded outbound event reached the socket"),
                    }
                    continue;
                }
                Pending::Outbound(Some(_), event) => {
                    let stage = &mut self.stages[index];
                    stage.on_outbound(&mut ctx, event).map_err(|e| (stage.name(), e))
                }
                Pending::Lifecycle(_, event) => {
                    let Some(stage) = self.stages.get_mut(index) else {
                        continue;
                    };
                    stage.on_lifecycle(&mut ctx, event).map_err(|e| (stage.name(), e))
                }
            };

            if let Err((stage, error)) = result {
                tracing::debug!(stage, %error, "Pipeline stage failed");
                output.close.get_or_insert(CloseReason::Protocol(error));
            }
            if let Some(reason) = ctx.close {
                output.close.get_or_insert(reason);
            }
            for emitted in ctx.emitted {
                queue.push_back(match emitted {
                    Emitted::Inbound(event) => Pending::Inbound(index + 1, event),
                    Emitted::Outbound(event) => Pending::Outbound(index.checked_sub(1), event),
                });
            }
            if let Some(event) = next_lifecycle {
                queue.push_back(Pending::Lifecycle(index + 1, event));
            }
        }

        output
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records what it sees and forwards everything.
    struct Recorder {
        name: &'static str,
        log: Log,
    }

    impl Stage for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
            self.log.lock().unwrap().push(format!("{}:in", self.name));
            ctx.fire_inbound(event);
            Ok(())
        }

        fn on_outbound(&mut self, ctx: &mut StageContext, event: Outbound) -> Result<(), ProtocolError> {
            self.log.lock().unwrap().push(format!("{}:out", self.name));
            ctx.write(event);
            Ok(())
        }

        fn on_lifecycle(&mut self, _ctx: &mut StageContext, event: Lifecycle) -> Result<(), ProtocolError> {
            self.log.lock().unwrap().push(format!("{}:{:?}", self.name, event));
            Ok(())
        }
    }

    /// Answers every inbound byte chunk with the same bytes.
    struct Echo;

    impl Stage for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn on_inbound(&mut self, ctx: &mut StageContext, event: Inbound) -> Result<(), ProtocolError> {
            if let Inbound::Bytes(bytes) = event {
                ctx.write(Outbound::Bytes(bytes));
            }
            Ok(())
        }
    }

    struct Failing;

    impl Stage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn on_inbound(&mut self, _ctx: &mut StageContext, _event: Inbound) -> Result<(), ProtocolError> {
            Err(ProtocolError::MalformedHttp("bad".into()))
        }
    }

    fn recorder(name: &'static str, log: &Log) -> Box<dyn Stage> {
        Box::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn inbound_forward_outbound_reverse() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(vec![recorder("a", &log), recorder("b", &log), Box::new(Echo)]);

        let output = pipeline.fire_inbound(Inbound::Bytes(Bytes::from_static(b"ping")));

        assert_eq!(output.writes, vec![Bytes::from_static(b"ping")]);
        assert!(output.close.is_none());
        assert_eq!(*log.lock().unwrap(), vec!["a:in", "b:in", "b:out", "a:out"]);
    }

    #[test]
    fn lifecycle_reaches_every_stage_in_order() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(vec![recorder("a", &log), recorder("b", &log)]);

        pipeline.fire_lifecycle(Lifecycle::IdleTimeout);

        assert_eq!(*log.lock().unwrap(), vec!["a:IdleTimeout", "b:IdleTimeout"]);
    }

    #[test]
    fn stage_error_closes_and_drops_later_inbound() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(vec![Box::new(Failing), recorder("after", &log)]);

        let output = pipeline.fire_inbound(Inbound::HttpEnd);

        assert!(matches!(
            output.close,
            Some(CloseReason::Protocol(ProtocolError::MalformedHttp(_)))
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn write_from_application_side_reaches_socket() {
        let log = Log::default();
        let mut pipeline = Pipeline::new(vec![recorder("a", &log), recorder("b", &log)]);

        let output = pipeline.write(Outbound::Bytes(Bytes::from_static(b"x")));

        assert_eq!(output.writes.len(), 1);
        assert_eq!(*log.lock().unwrap(), vec!["b:out", "a:out"]);
    }

    #[test]
    fn merge_keeps_first_close_reason() {
        let mut first = PipelineOutput {
            writes: vec![Bytes::from_static(b"1")],
            close: Some(CloseReason::IdleTimeout),
        };
        first.merge(PipelineOutput {
            writes: vec![Bytes::from_static(b"2")],
            close: Some(CloseReason::PeerClosed),
        });
        assert_eq!(first.writes.len(), 2);
        assert_eq!(first.close, Some(CloseReason::IdleTimeout));
    }
}
