//! Outbound response ring
//!
//! The controller produces here and the host consumes, so the register
//! roles flip: the controller owns `head`, the host frees by moving `tail`.
//! A full ring pushes back on the poster the same way a full inbox pushes
//! back on the dispatcher.

use crate::error::TransportError;
use crate::hal::io_barrier;
use crate::queue::QueueDescriptor;
use crate::ring;
use crate::stats::TransportStats;
use crate::types::{align_up, CommandHeader, UnitId};
use crate::window::SharedWindow;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const BACKOFF_START: Duration = Duration::from_micros(50);
const BACKOFF_MAX: Duration = Duration::from_millis(2);

/// Outcome of one placement attempt
enum Attempt {
    Posted,
    /// No room; `empty` means the host has nothing left to free
    Full { empty: bool },
}

pub struct ResponseQueue {
    desc: QueueDescriptor,
    window: Arc<SharedWindow>,
    // Serializes producers; the dispatcher and every unit task post here.
    lock: Mutex<()>,
    post_timeout: Option<Duration>,
    closed: AtomicBool,
    stats: Arc<TransportStats>,
}

impl ResponseQueue {
    pub fn new(desc: QueueDescriptor, window: Arc<SharedWindow>, stats: Arc<TransportStats>) -> Self {
        log::info!(
            "Response queue {:?}: [0x{:08x}, 0x{:08x})",
            desc.queue_id(),
            desc.base(),
            desc.end()
        );
        Self {
            desc,
            window,
            lock: Mutex::new(()),
            post_timeout: None,
            closed: AtomicBool::new(false),
            stats,
        }
    }

    /// Bound how long `post` waits for the host to free space.
    pub fn with_post_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.post_timeout = timeout;
        self
    }

    pub fn descriptor(&self) -> &QueueDescriptor {
        &self.desc
    }

    /// Stop waiting on the host: posters blocked on a full ring give up.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::debug!("Response queue {:?} closed", self.desc.queue_id());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Post one response, waiting while the ring is full.
    ///
    /// Gives up with `QueueFull` when the record cannot fit even an empty
    /// ring, when the post timeout elapses, or once the queue is closed.
    pub fn post(&self, unit: UnitId, seq_num_id: u16, payload: &[u8]) -> Result<(), TransportError> {
        let header = CommandHeader::new(unit, seq_num_id, payload.len() as u32);
        let deadline = self.post_timeout.map(|t| Instant::now() + t);
        let mut backoff = BACKOFF_START;
        let mut waited = false;

        loop {
            match self.attempt(&header, payload)? {
                Attempt::Posted => return Ok(()),
                Attempt::Full { empty } => {
                    let expired = deadline.is_some_and(|d| Instant::now() >= d);
                    if empty || expired || self.is_closed() {
                        return Err(self.refuse(&header));
                    }
                }
            }

            if !waited {
                log::debug!(
                    "Response ring full; {} seq={} waiting for the host",
                    unit,
                    seq_num_id
                );
                waited = true;
            }
            thread::sleep(backoff);
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    }

    /// Post one response; never blocks on a full ring.
    pub fn try_post(&self, unit: UnitId, seq_num_id: u16, payload: &[u8]) -> Result<(), TransportError> {
        let header = CommandHeader::new(unit, seq_num_id, payload.len() as u32);
        match self.attempt(&header, payload)? {
            Attempt::Posted => Ok(()),
            Attempt::Full { .. } => Err(self.refuse(&header)),
        }
    }

    fn attempt(&self, header: &CommandHeader, payload: &[u8]) -> Result<Attempt, TransportError> {
        let _guard = self.lock.lock();
        let regs = self.desc.regs();
        let head = regs.read_head();
        let tail = regs.read_tail();

        match ring::write_record(&self.window, &self.desc, head, tail, header, payload) {
            Ok(new_head) => {
                io_barrier();
                regs.write_head(new_head);
                io_barrier();
                self.stats.record_response(true);
                log::trace!(
                    "Response {} seq={} posted; head=0x{:08x}",
                    header.unit_id,
                    header.seq_num_id,
                    new_head
                );
                Ok(Attempt::Posted)
            }
            Err(TransportError::QueueFull { .. }) => Ok(Attempt::Full { empty: head == tail }),
            Err(e) => {
                self.stats.record_response(false);
                log::warn!(
                    "Dropping response {} seq={}: {}",
                    header.unit_id,
                    header.seq_num_id,
                    e
                );
                Err(e)
            }
        }
    }

    fn refuse(&self, header: &CommandHeader) -> TransportError {
        let err = TransportError::QueueFull {
            queue: self.desc.queue_id(),
            needed: align_up(header.size),
        };
        self.stats.record_response(false);
        log::warn!(
            "Dropping response {} seq={}: {}",
            header.unit_id,
            header.seq_num_id,
            err
        );
        err
    }
}
