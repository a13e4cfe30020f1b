//! Transport error taxonomy

use crate::types::{QueueId, UnitId};
use std::time::Duration;

/// Errors raised by the transport core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Host offset does not fall inside the shared window
    #[error("host offset 0x{offset:08x} outside shared window [0x{base:08x}, +0x{size:x})")]
    OffsetOutOfRange { offset: u32, base: u32, size: u32 },

    /// Local address (or access span) does not fall inside the shared window
    #[error("local address 0x{addr:08x} (+{len}) outside shared window [0x{base:08x}, +0x{size:x})")]
    AddressOutOfRange {
        addr: u32,
        len: u32,
        base: u32,
        size: u32,
    },

    /// Host and controller disagree about ring contents
    #[error("queue {queue:?} desynchronized at 0x{offset:08x}: {reason}")]
    Desync {
        queue: QueueId,
        offset: u32,
        reason: &'static str,
    },

    #[error("inbox for {0} is disconnected")]
    InboxDisconnected(UnitId),

    #[error("inbox for {unit} did not accept envelope within {timeout:?}")]
    InboxTimeout { unit: UnitId, timeout: Duration },

    #[error("{unit} cannot be registered: {reason}")]
    Registration { unit: UnitId, reason: &'static str },

    /// Not enough contiguous space to place a record
    #[error("queue {queue:?} full: {needed} bytes needed")]
    QueueFull { queue: QueueId, needed: u32 },

    /// Initial synchronization could not be established
    #[error("setup failed: {0}")]
    Setup(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A transport thread could not be started or panicked
    #[error("task '{0}' failed")]
    Task(String),
}

impl TransportError {
    /// Fatal errors halt the task that observes them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Desync { .. } | Self::Setup(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_desync_and_setup_are_fatal() {
        let desync = TransportError::Desync {
            queue: QueueId(0),
            offset: 0x1000,
            reason: "size below header",
        };
        assert!(desync.is_fatal());
        assert!(TransportError::Setup("gate").is_fatal());
        assert!(!TransportError::InboxDisconnected(UnitId(9)).is_fatal());
        assert!(!TransportError::QueueFull {
            queue: QueueId(1),
            needed: 16
        }
        .is_fatal());
    }

    #[test]
    fn messages_carry_offsets_in_hex() {
        let err = TransportError::OffsetOutOfRange {
            offset: 0x1400,
            base: 0x1000,
            size: 0x400,
        };
        assert_eq!(
            err.to_string(),
            "host offset 0x00001400 outside shared window [0x00001000, +0x400)"
        );
    }
}
