//! In-memory queue registers
//!
//! Behaves like an edge-triggered interrupt line: a host head write raises
//! the notifier only while it is armed, and raising disarms it until the
//! controller re-arms. A head write that lands while disarmed is therefore
//! not signalled, which is the race the dispatcher's post-arm re-check exists
//! to close.

use super::QueueRegisters;
use crate::notify::Notifier;
use crate::types::QueueId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub struct FakeQueueRegisters {
    queue_id: QueueId,
    head: AtomicU32,
    tail: AtomicU32,
    armed: AtomicBool,
    notifier: Mutex<Option<Arc<Notifier>>>,
    arm_count: AtomicU64,
    notifier_writes: AtomicU64,
    tail_writes: Mutex<Vec<u32>>,
}

impl FakeQueueRegisters {
    /// Both cursors start at `base` (empty ring), notifier disarmed.
    pub fn new(queue_id: QueueId, base: u32) -> Self {
        Self {
            queue_id,
            head: AtomicU32::new(base),
            tail: AtomicU32::new(base),
            armed: AtomicBool::new(false),
            notifier: Mutex::new(None),
            arm_count: AtomicU64::new(0),
            notifier_writes: AtomicU64::new(0),
            tail_writes: Mutex::new(Vec::new()),
        }
    }

    /// Route this ring's interrupt to `notifier`.
    pub fn connect(&self, notifier: Arc<Notifier>) {
        *self.notifier.lock() = Some(notifier);
    }

    /// Host side: publish a new head and signal if armed.
    pub fn host_write_head(&self, value: u32) {
        self.head.store(value, Ordering::SeqCst);
        super::io_barrier();
        self.host_signal();
    }

    /// Host side: doorbell without moving head (spurious if nothing is new).
    pub fn host_signal(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            if let Some(notifier) = self.notifier.lock().as_ref() {
                notifier.raise(self.queue_id);
            }
        }
    }

    /// Host side: consume from a ring the controller produces into.
    pub fn host_write_tail(&self, value: u32) {
        self.tail.store(value, Ordering::SeqCst);
        super::io_barrier();
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Number of times the controller armed the notifier.
    pub fn arm_count(&self) -> u64 {
        self.arm_count.load(Ordering::SeqCst)
    }

    /// Number of arm and disarm writes together.
    pub fn notifier_writes(&self) -> u64 {
        self.notifier_writes.load(Ordering::SeqCst)
    }

    /// Every value the controller wrote to `tail`, oldest first.
    pub fn tail_history(&self) -> Vec<u32> {
        self.tail_writes.lock().clone()
    }
}

impl QueueRegisters for FakeQueueRegisters {
    fn read_head(&self) -> u32 {
        self.head.load(Ordering::SeqCst)
    }

    fn write_head(&self, value: u32) {
        self.head.store(value, Ordering::SeqCst);
    }

    fn read_tail(&self) -> u32 {
        self.tail.load(Ordering::SeqCst)
    }

    fn write_tail(&self, value: u32) {
        self.tail.store(value, Ordering::SeqCst);
        self.tail_writes.lock().push(value);
    }

    fn enable_notifier(&self, enable: bool) {
        self.notifier_writes.fetch_add(1, Ordering::SeqCst);
        if enable {
            self.arm_count.fetch_add(1, Ordering::SeqCst);
        }
        self.armed.store(enable, Ordering::SeqCst);
    }
}
