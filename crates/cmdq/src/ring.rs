//! Producer-side placement rules shared by every ring writer
//!
//! A writer places a record at `head` only if a wrap marker still fits
//! behind it, otherwise it drops a REWIND at `head` and starts again at the
//! ring base. `head` never catches `tail` from behind, so equal cursors
//! always mean an empty ring.

use crate::error::TransportError;
use crate::queue::QueueDescriptor;
use crate::types::{align_up, CommandHeader, HEADER_SIZE};
use crate::window::SharedWindow;

/// Where a record of a given length goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    /// A REWIND marker must be written here first
    pub rewind_at: Option<u32>,
    pub offset: u32,
}

pub(crate) fn place(base: u32, end: u32, head: u32, tail: u32, needed: u32) -> Option<Placement> {
    let needed = needed as u64;
    let (base64, end64, head64, tail64) = (base as u64, end as u64, head as u64, tail as u64);

    if head >= tail {
        if head64 + needed + HEADER_SIZE as u64 <= end64 {
            return Some(Placement {
                rewind_at: None,
                offset: head,
            });
        }
        if base64 + needed < tail64 && head64 + HEADER_SIZE as u64 <= end64 {
            return Some(Placement {
                rewind_at: Some(head),
                offset: base,
            });
        }
        return None;
    }

    if head64 + needed < tail64 {
        Some(Placement {
            rewind_at: None,
            offset: head,
        })
    } else {
        None
    }
}

/// Write `header` + `payload` into the ring described by `desc`.
///
/// Returns the new head; publishing it is left to the caller because host
/// and controller signal differently.
pub(crate) fn write_record(
    window: &SharedWindow,
    desc: &QueueDescriptor,
    head: u32,
    tail: u32,
    header: &CommandHeader,
    payload: &[u8],
) -> Result<u32, TransportError> {
    let needed = align_up(header.size);
    let placement = place(desc.base(), desc.end(), head, tail, needed).ok_or(
        TransportError::QueueFull {
            queue: desc.queue_id(),
            needed,
        },
    )?;

    let translator = window.translator();
    if let Some(at) = placement.rewind_at {
        window.write_header(translator.to_local(at)?, &CommandHeader::rewind())?;
    }

    let addr = translator.to_local(placement.offset)?;
    window.write_header(addr, header)?;
    if !payload.is_empty() {
        window.write(crate::window::LocalAddr(addr.0 + HEADER_SIZE), payload)?;
    }

    Ok(placement.offset + needed)
}
