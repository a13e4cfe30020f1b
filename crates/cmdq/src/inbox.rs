//! Per-unit bounded inboxes

use crate::error::TransportError;
use crate::types::{DispatchEnvelope, UnitId};
use crossbeam_channel::{Receiver, RecvError, SendTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Sending half, held by the dispatcher's route table
#[derive(Clone)]
pub struct UnitInbox {
    unit: UnitId,
    name: Arc<str>,
    capacity: usize,
    tx: Sender<DispatchEnvelope>,
}

/// Receiving half, owned by the unit task
pub struct InboxReceiver {
    unit: UnitId,
    rx: Receiver<DispatchEnvelope>,
}

/// Create a bounded inbox for `unit` holding at most `capacity` envelopes.
pub fn unit_inbox(unit: UnitId, name: &str, capacity: usize) -> (UnitInbox, InboxReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        UnitInbox {
            unit,
            name: Arc::from(name),
            capacity,
            tx,
        },
        InboxReceiver { unit, rx },
    )
}

impl UnitInbox {
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Envelopes queued but not yet received.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Hand an envelope to the unit.
    ///
    /// With `timeout == None` this blocks for as long as the inbox is full.
    pub fn send(
        &self,
        envelope: DispatchEnvelope,
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        match timeout {
            None => self
                .tx
                .send(envelope)
                .map_err(|_| TransportError::InboxDisconnected(self.unit)),
            Some(timeout) => self.tx.send_timeout(envelope, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => TransportError::InboxTimeout {
                    unit: self.unit,
                    timeout,
                },
                SendTimeoutError::Disconnected(_) => TransportError::InboxDisconnected(self.unit),
            }),
        }
    }
}

impl std::fmt::Debug for UnitInbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitInbox")
            .field("unit", &self.unit)
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl InboxReceiver {
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Block until an envelope arrives; `None` once every sender is gone.
    pub fn recv(&self) -> Option<DispatchEnvelope> {
        match self.rx.recv() {
            Ok(envelope) => Some(envelope),
            Err(RecvError) => None,
        }
    }

    pub fn try_recv(&self) -> Option<DispatchEnvelope> {
        match self.rx.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<DispatchEnvelope> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<DispatchEnvelope> {
        self.rx.try_iter().collect()
    }
}
