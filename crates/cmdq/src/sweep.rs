//! Sweep / reclaim
//!
//! Frees ring space by moving `tail` across the longest run of acknowledged
//! commands that starts exactly at `tail`. `tail` never passes a command
//! whose ACK bit is clear, whatever order acknowledgments arrive in.

use crate::error::TransportError;
use crate::hal::io_barrier;
use crate::queue::CommandQueue;
use crate::window::LocalAddr;

impl CommandQueue {
    /// Acknowledge the command at `command` and reclaim what can be reclaimed.
    ///
    /// Returns the number of records (commands and wrap markers) freed.
    /// `head` is re-sampled after every tail step, so a pass keeps going
    /// while the host keeps publishing; it never runs past the dispatcher's
    /// last-handled cursor.
    pub fn sweep(&self, command: LocalAddr) -> Result<usize, TransportError> {
        self.ensure_synchronized()?;

        let regs = self.descriptor().regs();
        let cmd_offset = self
            .window()
            .translator()
            .to_host(command)
            .map_err(|_| self.desync(command.0, "acknowledged command outside window"))?;
        if !self.descriptor().contains(cmd_offset) {
            return Err(self.desync(cmd_offset, "acknowledged command outside ring"));
        }

        let cursors = self.cursors.lock();
        let mut tail = regs.read_tail();
        let mut head = regs.read_head();

        self.window()
            .set_ack(command)
            .map_err(|_| self.desync(cmd_offset, "cannot set ack bit"))?;

        if cmd_offset != tail {
            log::trace!(
                "Sweep deferred: ack at 0x{:08x}, tail still at 0x{:08x}",
                cmd_offset,
                tail
            );
            return Ok(0);
        }

        let mut freed = 0usize;
        // Nothing past last_handled has been decoded, so nothing there can
        // have been acknowledged by us.
        while tail != head && tail != cursors.last_handled {
            let (_, header) = self.header_at(tail, head)?;
            if !header.is_acked() {
                break;
            }

            tail = if header.unit_id.is_rewind() {
                self.descriptor().base()
            } else {
                tail + header.aligned_size()
            };
            regs.write_tail(tail);
            io_barrier();
            freed += 1;

            head = regs.read_head();
        }

        if freed > 0 {
            log::trace!("Sweep freed {} record(s); tail=0x{:08x}", freed, tail);
            self.stats.record_swept(freed as u64);
        }
        Ok(freed)
    }
}
