/// Hardware Abstraction Layer - "The Registers"
///
/// The transport only ever touches hardware through a per-ring pair of
/// 32-bit cursor registers and an interrupt-enable bit. Keeping that surface
/// behind a trait lets the sweep and dispatch algorithms run unchanged
/// against the in-memory fake in [`fake`].

pub mod fake;

use std::sync::atomic::{fence, Ordering};

/// Head/tail/notifier registers of one ring
///
/// Each cursor has a single writer: the producer owns `head`, the consumer
/// owns `tail`. Both sides may read either register at any time.
pub trait QueueRegisters: Send + Sync {
    /// Producer cursor, host-relative.
    fn read_head(&self) -> u32;

    /// Only called by the controller on rings it produces into.
    fn write_head(&self, value: u32);

    /// Consumer cursor, host-relative.
    fn read_tail(&self) -> u32;

    /// Only called by the controller on rings it consumes from.
    fn write_tail(&self, value: u32);

    /// Arm or disarm the "new data" interrupt for this ring.
    fn enable_notifier(&self, enable: bool);
}

/// Order every preceding register/window write before anything that follows.
pub fn io_barrier() {
    fence(Ordering::SeqCst);
}
