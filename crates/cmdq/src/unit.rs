//! Per-subsystem task runtime
//!
//! Every unit runs the same loop: receive an envelope, read the command it
//! points at, let the handler produce a response payload, post the response
//! with the original sequence tag, then acknowledge and sweep. The envelope
//! is not touched again after the sweep.

use crate::error::TransportError;
use crate::inbox::InboxReceiver;
use crate::queue::CommandQueue;
use crate::response::ResponseQueue;
use crate::types::{CommandHeader, DispatchEnvelope, EventKind, UnitId};
use std::sync::Arc;

/// Subsystem business logic behind one unit id
pub trait UnitHandler: Send {
    /// Produce the response payload for one command.
    fn handle(&mut self, header: &CommandHeader, payload: &[u8]) -> Vec<u8>;
}

impl<F> UnitHandler for F
where
    F: FnMut(&CommandHeader, &[u8]) -> Vec<u8> + Send,
{
    fn handle(&mut self, header: &CommandHeader, payload: &[u8]) -> Vec<u8> {
        self(header, payload)
    }
}

pub struct UnitTask<H> {
    unit: UnitId,
    inbox: InboxReceiver,
    queue: Arc<CommandQueue>,
    responses: Arc<ResponseQueue>,
    handler: H,
    handled: u64,
}

impl<H: UnitHandler> UnitTask<H> {
    pub fn new(
        inbox: InboxReceiver,
        queue: Arc<CommandQueue>,
        responses: Arc<ResponseQueue>,
        handler: H,
    ) -> Self {
        Self {
            unit: inbox.unit(),
            inbox,
            queue,
            responses,
            handler,
            handled: 0,
        }
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Serve the inbox until shutdown. Hands the handler back so callers can
    /// inspect its final state.
    pub fn run(mut self) -> Result<H, TransportError> {
        log::debug!("{} task started", self.unit);
        while let Some(envelope) = self.inbox.recv() {
            if envelope.event_kind == EventKind::Shutdown {
                break;
            }
            if let Err(e) = self.handle_envelope(envelope) {
                if e.is_fatal() {
                    log::error!("{} task halted: {}", self.unit, e);
                    return Err(e);
                }
                log::warn!("{} failed to handle envelope: {}", self.unit, e);
            }
        }
        log::debug!("{} task stopped after {} command(s)", self.unit, self.handled);
        Ok(self.handler)
    }

    /// Process one command envelope end to end.
    pub fn handle_envelope(&mut self, envelope: DispatchEnvelope) -> Result<(), TransportError> {
        let window = self.queue.window();
        let offset = window.translator().to_host(envelope.command)?;
        if envelope.queue_id != self.queue.descriptor().queue_id() {
            return Err(self.queue.desync(offset, "envelope for a foreign queue"));
        }
        self.queue.ensure_synchronized()?;

        let header = window
            .read_header(envelope.command)
            .map_err(|_| self.queue.desync(offset, "envelope header outside window"))?;
        if header.unit_id != self.unit {
            log::warn!(
                "{} received command addressed to {} (seq={})",
                self.unit,
                header.unit_id,
                header.seq_num_id
            );
        }
        let payload = window
            .read_payload(envelope.command, &header)
            .map_err(|_| self.queue.desync(offset, "envelope payload outside window"))?;

        let response = self.handler.handle(&header, &payload);
        self.handled += 1;

        if let Err(e) = self.responses.post(header.unit_id, header.seq_num_id, &response) {
            log::error!(
                "{} seq={}: response not delivered: {}",
                self.unit,
                header.seq_num_id,
                e
            );
        }

        self.queue.sweep(envelope.command)?;
        Ok(())
    }
}
