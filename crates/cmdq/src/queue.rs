/// Command Queue - "The Inbound Ring"
///
/// `QueueDescriptor` names one ring: its registers, base offset and
/// capacity. `CommandQueue` is the explicitly owned context shared by the
/// dispatcher and every task that can sweep: it embeds the lock that
/// serializes the `tail` register and the last-handled cursor.

use crate::config::RingConfig;
use crate::error::TransportError;
use crate::hal::QueueRegisters;
use crate::stats::TransportStats;
use crate::types::{CommandHeader, QueueId, HEADER_SIZE};
use crate::window::{LocalAddr, SharedWindow};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registers plus placement of one ring
#[derive(Clone)]
pub struct QueueDescriptor {
    queue_id: QueueId,
    base: u32,
    size: u32,
    regs: Arc<dyn QueueRegisters>,
}

impl QueueDescriptor {
    pub fn new(config: &RingConfig, regs: Arc<dyn QueueRegisters>) -> Self {
        Self {
            queue_id: config.queue_id(),
            base: config.offset,
            size: config.size,
            regs,
        }
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Host-relative base offset
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// One past the last ring byte, host-relative
    pub fn end(&self) -> u32 {
        self.base.saturating_add(self.size)
    }

    pub fn regs(&self) -> &dyn QueueRegisters {
        self.regs.as_ref()
    }

    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.base && offset < self.end()
    }
}

/// Cursor state guarded by the queue lock
pub(crate) struct Cursors {
    pub(crate) last_handled: u32,
}

/// A command the dispatcher has just stepped over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Wrap marker; `last_handled` is now back at base
    Rewind { addr: LocalAddr },
    /// Ordinary command; `last_handled` already points past it
    Command { addr: LocalAddr, header: CommandHeader },
}

/// Shared context of the inbound command ring
pub struct CommandQueue {
    desc: QueueDescriptor,
    window: Arc<SharedWindow>,
    pub(crate) cursors: Mutex<Cursors>,
    desynced: AtomicBool,
    pub(crate) stats: Arc<TransportStats>,
}

impl CommandQueue {
    /// The ring is assumed empty: `last_handled` starts at the current tail.
    pub fn new(desc: QueueDescriptor, window: Arc<SharedWindow>, stats: Arc<TransportStats>) -> Self {
        let tail = desc.regs().read_tail();
        log::info!(
            "Command queue {:?}: [0x{:08x}, 0x{:08x}) tail=0x{:08x}",
            desc.queue_id(),
            desc.base(),
            desc.end(),
            tail
        );

        Self {
            desc,
            window,
            cursors: Mutex::new(Cursors { last_handled: tail }),
            desynced: AtomicBool::new(false),
            stats,
        }
    }

    pub fn descriptor(&self) -> &QueueDescriptor {
        &self.desc
    }

    pub fn window(&self) -> &Arc<SharedWindow> {
        &self.window
    }

    pub fn last_handled(&self) -> u32 {
        self.cursors.lock().last_handled
    }

    /// Whether the dispatcher still has commands to decode.
    pub fn has_undecoded(&self) -> bool {
        self.cursors.lock().last_handled != self.desc.regs().read_head()
    }

    pub fn is_desynchronized(&self) -> bool {
        self.desynced.load(Ordering::SeqCst)
    }

    /// Latch the ring as unusable and build the error to halt on.
    pub(crate) fn desync(&self, offset: u32, reason: &'static str) -> TransportError {
        if !self.desynced.swap(true, Ordering::SeqCst) {
            log::error!(
                "CRITICAL: command queue {:?} desynchronized at 0x{:08x}: {}",
                self.desc.queue_id(),
                offset,
                reason
            );
        }
        TransportError::Desync {
            queue: self.desc.queue_id(),
            offset,
            reason,
        }
    }

    pub(crate) fn ensure_synchronized(&self) -> Result<(), TransportError> {
        if self.is_desynchronized() {
            return Err(TransportError::Desync {
                queue: self.desc.queue_id(),
                offset: self.desc.regs().read_tail(),
                reason: "queue previously desynchronized",
            });
        }
        Ok(())
    }

    /// Read and sanity-check the record at `offset`, bounded by `head`.
    pub(crate) fn header_at(
        &self,
        offset: u32,
        head: u32,
    ) -> Result<(LocalAddr, CommandHeader), TransportError> {
        let end = self.desc.end();
        if !self.desc.contains(offset) || offset.saturating_add(HEADER_SIZE) > end {
            return Err(self.desync(offset, "cursor outside ring"));
        }
        let addr = self
            .window
            .translator()
            .to_local(offset)
            .map_err(|_| self.desync(offset, "cursor outside window"))?;
        let header = self
            .window
            .read_header(addr)
            .map_err(|_| self.desync(offset, "header outside window"))?;

        if header.unit_id.is_rewind() {
            // A writer only wraps once the ring base is free again, so a
            // genuine marker sits past base with `head` already behind it.
            if offset == self.desc.base() || head >= offset {
                return Err(self.desync(offset, "unexpected REWIND"));
            }
            return Ok((addr, header));
        }
        if header.size < HEADER_SIZE {
            return Err(self.desync(offset, "size below header size"));
        }
        let next = offset as u64 + header.aligned_size() as u64;
        if next > end as u64 {
            return Err(self.desync(offset, "command runs past ring end"));
        }
        if head >= offset && next > head as u64 {
            return Err(self.desync(offset, "command runs past head"));
        }
        Ok((addr, header))
    }

    /// Step the last-handled cursor over the next command, if any.
    ///
    /// `head` is re-read on every call. The cursor is advanced before the
    /// caller acts on the command so a failure cannot cause re-processing.
    pub fn next_command(&self) -> Result<Option<Decoded>, TransportError> {
        self.ensure_synchronized()?;

        let mut cursors = self.cursors.lock();
        let head = self.desc.regs().read_head();
        if cursors.last_handled == head {
            return Ok(None);
        }

        let offset = cursors.last_handled;
        let (addr, header) = self.header_at(offset, head)?;
        if header.unit_id.is_rewind() {
            cursors.last_handled = self.desc.base();
            return Ok(Some(Decoded::Rewind { addr }));
        }

        cursors.last_handled = offset + header.aligned_size();
        Ok(Some(Decoded::Command { addr, header }))
    }
}
