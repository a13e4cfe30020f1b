//! Simulated host side of the channel
//!
//! Produces into the command ring and consumes from the response ring over
//! the in-memory registers, obeying the same placement rules as the
//! controller. Used by the integration tests and the host simulator.

use crate::config::{RingConfig, TransportConfig};
use crate::error::TransportError;
use crate::hal::fake::FakeQueueRegisters;
use crate::hal::{io_barrier, QueueRegisters};
use crate::queue::QueueDescriptor;
use crate::ring;
use crate::transport::Transport;
use crate::types::{align_up, CommandHeader, UnitId, HEADER_SIZE};
use crate::window::{LocalAddr, SharedWindow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// One record read back from the response ring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub unit_id: UnitId,
    pub seq_num_id: u16,
    pub payload: Vec<u8>,
}

pub struct HostEndpoint {
    window: Arc<SharedWindow>,
    command: QueueDescriptor,
    command_regs: Arc<FakeQueueRegisters>,
    response: QueueDescriptor,
    response_regs: Arc<FakeQueueRegisters>,
    next_seq: u16,
    // Written but not yet published head of the command ring
    staged_head: Option<u32>,
}

impl HostEndpoint {
    pub fn new(
        window: Arc<SharedWindow>,
        command_ring: &RingConfig,
        command_regs: Arc<FakeQueueRegisters>,
        response_ring: &RingConfig,
        response_regs: Arc<FakeQueueRegisters>,
    ) -> Self {
        Self {
            window,
            command: QueueDescriptor::new(command_ring, command_regs.clone()),
            command_regs,
            response: QueueDescriptor::new(response_ring, response_regs.clone()),
            response_regs,
            next_seq: 1,
            staged_head: None,
        }
    }

    pub fn command_regs(&self) -> &Arc<FakeQueueRegisters> {
        &self.command_regs
    }

    pub fn response_regs(&self) -> &Arc<FakeQueueRegisters> {
        &self.response_regs
    }

    pub fn window(&self) -> &Arc<SharedWindow> {
        &self.window
    }

    fn alloc_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Write a command without publishing it. Returns its sequence tag and
    /// host offset.
    pub fn stage(&mut self, unit: UnitId, payload: &[u8]) -> Result<(u16, u32), TransportError> {
        let seq = self.alloc_seq();
        let header = CommandHeader::new(unit, seq, payload.len() as u32);
        let offset = self.stage_header(&header, payload)?;
        Ok((seq, offset))
    }

    /// Write an explicit header; `header.size` decides the stride.
    pub fn stage_header(&mut self, header: &CommandHeader, payload: &[u8]) -> Result<u32, TransportError> {
        let head = self
            .staged_head
            .unwrap_or_else(|| self.command_regs.read_head());
        let tail = self.command_regs.read_tail();
        let new_head = ring::write_record(&self.window, &self.command, head, tail, header, payload)?;
        self.staged_head = Some(new_head);
        Ok(new_head - align_up(header.size))
    }

    /// Publish everything staged with a single head write and doorbell.
    pub fn publish(&mut self) {
        if let Some(head) = self.staged_head.take() {
            io_barrier();
            self.command_regs.host_write_head(head);
        }
    }

    /// Stage and publish one command.
    pub fn submit(&mut self, unit: UnitId, payload: &[u8]) -> Result<u16, TransportError> {
        let (seq, _) = self.stage(unit, payload)?;
        self.publish();
        Ok(seq)
    }

    /// Whether a published command has not been reclaimed yet.
    pub fn command_in_flight(&self) -> bool {
        self.command_regs.read_head() != self.command_regs.read_tail()
    }

    /// Take the next response, if one is published.
    pub fn poll_response(&mut self) -> Result<Option<Response>, TransportError> {
        loop {
            let head = self.response_regs.read_head();
            let mut tail = self.response_regs.read_tail();
            if tail == head {
                return Ok(None);
            }

            let addr = self.response_addr(tail)?;
            let header = self.window.read_header(addr)?;
            if header.unit_id.is_rewind() {
                self.response_regs.host_write_tail(self.response.base());
                continue;
            }
            if header.size < HEADER_SIZE
                || tail as u64 + header.aligned_size() as u64 > self.response.end() as u64
            {
                return Err(TransportError::Desync {
                    queue: self.response.queue_id(),
                    offset: tail,
                    reason: "implausible response size",
                });
            }

            let payload = self.window.read_payload(addr, &header)?;
            tail += header.aligned_size();
            self.response_regs.host_write_tail(tail);
            return Ok(Some(Response {
                unit_id: header.unit_id,
                seq_num_id: header.seq_num_id,
                payload,
            }));
        }
    }

    /// Poll until a response arrives or `timeout` passes.
    pub fn wait_response(&mut self, timeout: Duration) -> Result<Option<Response>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(resp) = self.poll_response()? {
                return Ok(Some(resp));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Wait until the controller has reclaimed every published command.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.command_in_flight() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn response_addr(&self, offset: u32) -> Result<LocalAddr, TransportError> {
        if !self.response.contains(offset) {
            return Err(TransportError::Desync {
                queue: self.response.queue_id(),
                offset,
                reason: "response tail outside ring",
            });
        }
        self.window.translator().to_local(offset)
    }
}

/// A transport wired to a simulated host over in-memory registers.
pub fn loopback(config: TransportConfig) -> Result<(Transport, HostEndpoint), TransportError> {
    config.validate()?;
    let window = Arc::new(SharedWindow::new(&config.window)?);

    let command_regs = Arc::new(FakeQueueRegisters::new(
        config.command_queue.queue_id(),
        config.command_queue.offset,
    ));
    let response_regs = Arc::new(FakeQueueRegisters::new(
        config.response_queue.queue_id(),
        config.response_queue.offset,
    ));

    let host = HostEndpoint::new(
        window.clone(),
        &config.command_queue,
        command_regs.clone(),
        &config.response_queue,
        response_regs.clone(),
    );
    let transport = Transport::new(config, window, command_regs.clone(), response_regs)?;
    command_regs.connect(transport.notifier().clone());

    Ok((transport, host))
}
