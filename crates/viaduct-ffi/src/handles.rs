//! Durable managed references
//!
//! Native code cannot hold a garbage-collected reference, so managed
//! objects that must survive a native round trip are anchored in a handle
//! table and addressed by a [`ManagedRef`]: a typed opaque handle packing
//! a slot index and a generation counter. The generation makes use of a
//! released handle a detected error rather than silent aliasing.
//!
//! Every retain must be matched by exactly one release, or the object is
//! pinned for the lifetime of the runtime.

use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

/// Handle misuse errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandleError {
    /// The handle was released, never issued, or reconstructed from
    /// garbage
    #[error("stale managed reference")]
    Stale,
}

/// A managed object anchored for native-side use.
pub type ManagedObject = Arc<dyn Any + Send + Sync>;

/// Durable, cross-call-safe reference to a managed object.
///
/// `as_raw`/`from_raw` let a native structure carry the handle as a plain
/// integer (e.g. in a user-data field); resolving it goes back through the
/// issuing runtime, which validates the generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagedRef {
    index: u32,
    generation: u32,
}

impl ManagedRef {
    /// Pack into a raw integer for native transport.
    pub fn as_raw(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Reconstruct from a raw integer previously produced by [`as_raw`].
    ///
    /// A value that never came from `as_raw` resolves to
    /// [`HandleError::Stale`], not undefined behavior.
    ///
    /// [`as_raw`]: ManagedRef::as_raw
    pub fn from_raw(raw: u64) -> Self {
        Self {
            index: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }
}

struct Slot {
    value: Option<ManagedObject>,
    generation: u32,
}

/// Generation-checked slot table behind [`crate::runtime::Runtime`]'s
/// retain/release/resolve surface.
#[derive(Default)]
pub(crate) struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl HandleTable {
    pub(crate) fn retain(&mut self, object: ManagedObject) -> ManagedRef {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(object);
            ManagedRef {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                value: Some(object),
                generation: 0,
            });
            ManagedRef {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn resolve(&self, handle: ManagedRef) -> Result<ManagedObject, HandleError> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .ok_or(HandleError::Stale)?;
        if slot.generation != handle.generation {
            return Err(HandleError::Stale);
        }
        slot.value.clone().ok_or(HandleError::Stale)
    }

    pub(crate) fn release(&mut self, handle: ManagedRef) -> Result<(), HandleError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(HandleError::Stale)?;
        if slot.generation != handle.generation || slot.value.is_none() {
            return Err(HandleError::Stale);
        }
        slot.value = None;
        // Invalidate every copy of this handle.
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(())
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }
}
