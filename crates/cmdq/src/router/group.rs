//! Versioned, fixed-capacity object collections

use super::wire::{parse_set, SetEntry};
use super::{ClassError, ObjMask, MAX_OBJECTS};

/// A runtime object a Set can construct or update
///
/// `update` must refuse to change anything fixed at construction time and
/// must leave `self` unchanged when it refuses.
pub trait BoardObject: Clone {
    fn construct(obj_type: u8, body: &[u8]) -> Result<Self, ClassError>;

    fn update(&mut self, obj_type: u8, body: &[u8]) -> Result<(), ClassError>;

    /// Append the dynamic state only; construction-time fields stay out.
    fn write_status(&self, out: &mut Vec<u8>);
}

/// Dense-indexed collection with a live bitmask
#[derive(Debug, Clone)]
pub struct ObjectGroup<T> {
    version: u8,
    params: u32,
    live: ObjMask,
    generation: u64,
    slots: Vec<Option<T>>,
}

impl<T: BoardObject> ObjectGroup<T> {
    /// Empty collection accepting Set payloads of `version`.
    pub fn new(version: u8) -> Self {
        Self {
            version,
            params: 0,
            live: 0,
            generation: 0,
            slots: vec![None; MAX_OBJECTS],
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Global parameters from the last applied Set header
    pub fn params(&self) -> u32 {
        self.params
    }

    pub fn live_mask(&self) -> ObjMask {
        self.live
    }

    /// Number of Sets applied so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.live.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, index: u8) -> Option<&T> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    /// Mutable access for the owning subsystem's own bookkeeping.
    pub fn get_mut(&mut self, index: u8) -> Option<&mut T> {
        self.slots.get_mut(index as usize).and_then(Option::as_mut)
    }

    /// Live objects in index order
    pub fn iter(&self) -> impl Iterator<Item = (u8, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|obj| (i as u8, obj)))
    }

    /// Apply a Set payload. All or nothing: on error the collection is
    /// exactly as it was.
    pub fn apply_set(&mut self, payload: &[u8]) -> Result<(), ClassError> {
        let (header, entries) = parse_set(payload)?;
        if header.version != self.version {
            return Err(ClassError::VersionMismatch {
                expected: self.version,
                found: header.version,
            });
        }

        let mut slots = self.slots.clone();
        let mut live = self.live;
        for entry in &entries {
            Self::apply_entry(&mut slots, &mut live, entry)?;
        }

        self.slots = slots;
        self.live = live;
        self.params = header.params;
        self.generation += 1;
        log::debug!(
            "Object group v{} gen {}: {} entr(ies), live=0x{:08x}",
            self.version,
            self.generation,
            entries.len(),
            self.live
        );
        Ok(())
    }

    fn apply_entry(
        slots: &mut [Option<T>],
        live: &mut ObjMask,
        entry: &SetEntry<'_>,
    ) -> Result<(), ClassError> {
        let index = match entry.index {
            Some(i) if (i as usize) < MAX_OBJECTS => i,
            Some(i) => return Err(ClassError::BadIndex(i)),
            None => {
                let free = (!*live).trailing_zeros() as usize;
                if free >= MAX_OBJECTS {
                    return Err(ClassError::Full);
                }
                free as u8
            }
        };

        match slots[index as usize].as_mut() {
            Some(obj) => obj
                .update(entry.obj_type, entry.body)
                .map_err(|e| e.at_index(index))?,
            None => {
                let obj = T::construct(entry.obj_type, entry.body).map_err(|e| e.at_index(index))?;
                slots[index as usize] = Some(obj);
                *live |= 1 << index;
            }
        }
        Ok(())
    }

    /// Serialize the echoed mask then every selected object in index order.
    pub fn get_status(&self, mask: ObjMask, out: &mut Vec<u8>) -> Result<(), ClassError> {
        if mask & !self.live != 0 {
            return Err(ClassError::InvalidMask {
                requested: mask,
                live: self.live,
            });
        }
        out.extend_from_slice(&mask.to_le_bytes());
        for (index, obj) in self.iter() {
            if mask & (1 << index) != 0 {
                obj.write_status(out);
            }
        }
        Ok(())
    }
}
