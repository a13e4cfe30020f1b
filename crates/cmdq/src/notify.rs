//! Interrupt -> task wake glue
//!
//! `Notifier` stands in for the scheduler's task-notification bits: the
//! interrupt side raises a bit keyed by queue id, the dispatcher task blocks
//! until its bit is set. `StartupGate` is the one-shot synchronization the
//! dispatcher must acquire, with a bounded wait, before serving any ring.

use crate::error::TransportError;
use crate::types::QueueId;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

const SHUTDOWN_BIT: u32 = 1 << 31;

/// Outcome of a blocking notification wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The queue's bit was raised (possibly spuriously)
    Signaled,
    /// The owning transport is stopping
    Shutdown,
}

/// Task-notification bits keyed by queue identity
#[derive(Default)]
pub struct Notifier {
    pending: Mutex<u32>,
    cond: Condvar,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn bit(queue: QueueId) -> u32 {
        1u32 << (queue.0 & 0x1F).min(30)
    }

    /// Interrupt side: mark `queue` as having new data.
    pub fn raise(&self, queue: QueueId) {
        *self.pending.lock() |= Self::bit(queue);
        self.cond.notify_all();
    }

    /// Wake every waiter with [`Wake::Shutdown`]; sticky.
    pub fn shutdown(&self) {
        *self.pending.lock() |= SHUTDOWN_BIT;
        self.cond.notify_all();
    }

    pub fn is_raised(&self, queue: QueueId) -> bool {
        *self.pending.lock() & Self::bit(queue) != 0
    }

    /// Block until `queue` is raised or shutdown is requested. No timeout.
    pub fn wait(&self, queue: QueueId) -> Wake {
        let bit = Self::bit(queue);
        let mut pending = self.pending.lock();
        loop {
            if *pending & SHUTDOWN_BIT != 0 {
                return Wake::Shutdown;
            }
            if *pending & bit != 0 {
                *pending &= !bit;
                return Wake::Signaled;
            }
            self.cond.wait(&mut pending);
        }
    }

    /// Bounded variant of [`Notifier::wait`]; `None` on timeout.
    pub fn wait_timeout(&self, queue: QueueId, timeout: Duration) -> Option<Wake> {
        let bit = Self::bit(queue);
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        loop {
            if *pending & SHUTDOWN_BIT != 0 {
                return Some(Wake::Shutdown);
            }
            if *pending & bit != 0 {
                *pending &= !bit;
                return Some(Wake::Signaled);
            }
            if self.cond.wait_until(&mut pending, deadline).timed_out() {
                return None;
            }
        }
    }
}

/// One-shot startup synchronization
#[derive(Default)]
pub struct StartupGate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl StartupGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release every current and future `acquire`.
    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    /// Wait at most `timeout` for the gate; failure is a setup error.
    pub fn acquire(&self, timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.cond.wait_until(&mut open, deadline).timed_out() && !*open {
                return Err(TransportError::Setup(
                    "startup gate not released before timeout",
                ));
            }
        }
        Ok(())
    }
}
