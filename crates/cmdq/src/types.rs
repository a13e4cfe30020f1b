/// Core wire types for the command transport
///
/// Everything that crosses the shared window or a task boundary is defined
/// here: the command header, reserved unit ids, control flags and the
/// dispatch envelope handed to unit inboxes.

use crate::window::LocalAddr;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Size of a command/response header in bytes.
pub const HEADER_SIZE: u32 = 8;

/// Commands are packed on this boundary.
pub const ALIGNMENT: u32 = 4;

/// Byte offset of `ctrl_flags` inside an encoded header.
pub const CTRL_FLAGS_OFFSET: u32 = 1;

/// Round `size` up to the ring alignment unit.
pub fn align_up(size: u32) -> u32 {
    size.saturating_add(ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Destination subsystem of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u8);

impl UnitId {
    /// Administrative no-op; answered immediately by the dispatcher.
    pub const NULL: UnitId = UnitId(0x00);
    /// Wrap marker: the next record starts at the ring base.
    pub const REWIND: UnitId = UnitId(0x01);
    /// Explicit unload request; answered immediately by the dispatcher.
    pub const UNLOAD: UnitId = UnitId(0x02);

    pub fn is_rewind(self) -> bool {
        self == Self::REWIND
    }

    /// Reserved ids can never be registered as unit inboxes.
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::NULL | Self::REWIND | Self::UNLOAD)
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::NULL => write!(f, "NULL"),
            Self::REWIND => write!(f, "REWIND"),
            Self::UNLOAD => write!(f, "UNLOAD"),
            UnitId(id) => write!(f, "unit#{id}"),
        }
    }
}

/// Identity of a ring; also selects the notification bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(pub u8);

bitflags! {
    /// Per-command control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CtrlFlags: u8 {
        /// Command has been consumed and may be reclaimed by sweep
        const ACK = 1 << 0;
    }
}

/// Fixed header prefixed to every command and response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub unit_id: UnitId,
    pub ctrl_flags: CtrlFlags,
    /// Host correlation tag, echoed verbatim in responses
    pub seq_num_id: u16,
    /// Header + payload length in bytes (unaligned)
    pub size: u32,
}

impl CommandHeader {
    pub fn new(unit_id: UnitId, seq_num_id: u16, payload_len: u32) -> Self {
        Self {
            unit_id,
            ctrl_flags: CtrlFlags::empty(),
            seq_num_id,
            size: HEADER_SIZE.saturating_add(payload_len),
        }
    }

    /// The wrap pseudo-command.
    pub fn rewind() -> Self {
        Self::new(UnitId::REWIND, 0, 0)
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE as usize]) -> Self {
        Self {
            unit_id: UnitId(bytes[0]),
            ctrl_flags: CtrlFlags::from_bits_retain(bytes[1]),
            seq_num_id: u16::from_le_bytes([bytes[2], bytes[3]]),
            size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let seq = self.seq_num_id.to_le_bytes();
        let size = self.size.to_le_bytes();
        [
            self.unit_id.0,
            self.ctrl_flags.bits(),
            seq[0],
            seq[1],
            size[0],
            size[1],
            size[2],
            size[3],
        ]
    }

    /// Stride to the next record in the ring.
    pub fn aligned_size(&self) -> u32 {
        align_up(self.size)
    }

    pub fn payload_len(&self) -> u32 {
        self.size.saturating_sub(HEADER_SIZE)
    }

    pub fn is_acked(&self) -> bool {
        self.ctrl_flags.contains(CtrlFlags::ACK)
    }
}

/// Why a unit inbox is being woken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `command` references a host command resident in the ring
    Command,
    /// Stop the unit task; `command` is meaningless
    Shutdown,
}

/// Cross-task handoff of a command still resident in the ring
///
/// Owns no data. `command` stays valid until the command is acknowledged
/// and swept; receivers must not keep it past that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchEnvelope {
    pub event_kind: EventKind,
    pub queue_id: QueueId,
    pub command: LocalAddr,
}

impl DispatchEnvelope {
    pub fn command(queue_id: QueueId, command: LocalAddr) -> Self {
        Self {
            event_kind: EventKind::Command,
            queue_id,
            command,
        }
    }

    pub fn shutdown(queue_id: QueueId) -> Self {
        Self {
            event_kind: EventKind::Shutdown,
            queue_id,
            command: LocalAddr(0),
        }
    }
}
