/// Class-Indexed Object Router - "The Board"
///
/// Every subsystem task applies the same convention to its commands: the
/// first byte names an object class, the class table maps it to a Set
/// handler (construct/update a versioned collection) and a GetStatus handler
/// (serialize a subset of that collection). Adding a class is a table entry,
/// not a new branch.

pub mod group;
pub mod wire;

pub use group::{BoardObject, ObjectGroup};
pub use wire::{
    encode_get_status, encode_set, ByteReader, ClassRequest, ClassResponse, CommandKind, SetEntry,
    SetHeader,
};

use crate::types::CommandHeader;
use crate::unit::UnitHandler;

/// One bit per object index
pub type ObjMask = u32;

/// Capacity of every collection (width of [`ObjMask`])
pub const MAX_OBJECTS: usize = 32;

/// Entry index asking for the lowest free slot
pub const NEXT_FREE_INDEX: u8 = 0xFF;

/// Status byte of a class response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClassStatus {
    Ok = 0,
    UnknownClass = 1,
    Malformed = 2,
    BadIndex = 3,
    Immutable = 4,
    InvalidMask = 5,
    VersionMismatch = 6,
    Full = 7,
    InvalidEntry = 8,
}

impl TryFrom<u8> for ClassStatus {
    type Error = ClassError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::UnknownClass,
            2 => Self::Malformed,
            3 => Self::BadIndex,
            4 => Self::Immutable,
            5 => Self::InvalidMask,
            6 => Self::VersionMismatch,
            7 => Self::Full,
            8 => Self::InvalidEntry,
            _ => return Err(ClassError::Malformed("unknown status code")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassError {
    #[error("unknown class id {0}")]
    UnknownClass(u8),

    #[error("malformed request: {0}")]
    Malformed(&'static str),

    #[error("object index {0} out of range")]
    BadIndex(u8),

    #[error("field '{field}' is immutable after construction (index {index:?})")]
    Immutable {
        index: Option<u8>,
        field: &'static str,
    },

    #[error("request mask 0x{requested:08x} not a subset of live mask 0x{live:08x}")]
    InvalidMask { requested: ObjMask, live: ObjMask },

    #[error("set version {found} does not match collection version {expected}")]
    VersionMismatch { expected: u8, found: u8 },

    #[error("collection full")]
    Full,

    #[error("invalid entry (index {index:?}): {reason}")]
    InvalidEntry {
        index: Option<u8>,
        reason: &'static str,
    },
}

impl ClassError {
    pub fn status(&self) -> ClassStatus {
        match self {
            Self::UnknownClass(_) => ClassStatus::UnknownClass,
            Self::Malformed(_) => ClassStatus::Malformed,
            Self::BadIndex(_) => ClassStatus::BadIndex,
            Self::Immutable { .. } => ClassStatus::Immutable,
            Self::InvalidMask { .. } => ClassStatus::InvalidMask,
            Self::VersionMismatch { .. } => ClassStatus::VersionMismatch,
            Self::Full => ClassStatus::Full,
            Self::InvalidEntry { .. } => ClassStatus::InvalidEntry,
        }
    }

    /// Attach the entry index to object-level errors that lack one.
    pub fn at_index(self, index: u8) -> Self {
        match self {
            Self::Immutable { index: None, field } => Self::Immutable {
                index: Some(index),
                field,
            },
            Self::InvalidEntry { index: None, reason } => Self::InvalidEntry {
                index: Some(index),
                reason,
            },
            other => other,
        }
    }
}

pub type SetFn<S> = fn(&mut S, &[u8]) -> Result<(), ClassError>;
pub type GetStatusFn<S> = fn(&S, ObjMask, &mut Vec<u8>) -> Result<(), ClassError>;

/// Handlers for one object class of a subsystem state `S`
pub struct ClassEntry<S> {
    pub class_id: u8,
    pub set: SetFn<S>,
    pub get_status: GetStatusFn<S>,
}

/// Read-only class table, built once
pub struct ClassTable<S: 'static> {
    entries: &'static [ClassEntry<S>],
}

impl<S: 'static> ClassTable<S> {
    pub const fn new(entries: &'static [ClassEntry<S>]) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, class_id: u8) -> Result<&ClassEntry<S>, ClassError> {
        self.entries
            .iter()
            .find(|e| e.class_id == class_id)
            .ok_or(ClassError::UnknownClass(class_id))
    }

    pub fn class_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.iter().map(|e| e.class_id)
    }

    /// Decode `request`, run the matching handler against `state`.
    pub fn handle(&self, state: &mut S, request: &[u8]) -> ClassResponse {
        match self.dispatch(state, request) {
            Ok(data) => ClassResponse::ok(data),
            Err(e) => {
                log::warn!("Class request rejected: {}", e);
                ClassResponse::error(&e)
            }
        }
    }

    fn dispatch(&self, state: &mut S, request: &[u8]) -> Result<Vec<u8>, ClassError> {
        let request = ClassRequest::parse(request)?;
        let entry = self.lookup(request.class_id)?;
        match request.kind {
            CommandKind::Set => {
                (entry.set)(state, request.payload)?;
                Ok(Vec::new())
            }
            CommandKind::GetStatus => {
                let mask = wire::parse_get_status(request.payload)?;
                let mut out = Vec::new();
                (entry.get_status)(state, mask, &mut out)?;
                Ok(out)
            }
        }
    }
}

/// A unit whose every command goes through a class table
pub struct ClassUnit<S: 'static> {
    table: &'static ClassTable<S>,
    state: S,
}

impl<S: Send + 'static> ClassUnit<S> {
    pub fn new(table: &'static ClassTable<S>, state: S) -> Self {
        Self { table, state }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }
}

impl<S: Send + 'static> UnitHandler for ClassUnit<S> {
    fn handle(&mut self, header: &CommandHeader, payload: &[u8]) -> Vec<u8> {
        log::trace!(
            "{} seq={}: class request of {} byte(s)",
            header.unit_id,
            header.seq_num_id,
            payload.len()
        );
        self.table.handle(&mut self.state, payload).encode()
    }
}
