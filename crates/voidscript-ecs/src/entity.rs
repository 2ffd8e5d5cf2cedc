//! Entity handles and the slot allocator behind them.
//!
//! An [`Entity`] packs a slot index (low 32 bits) and that slot's generation
//! (high 32 bits). Freeing a slot bumps its generation, so a handle held past
//! despawn reads as stale instead of aliasing whichever entity reuses the
//! slot. Handles are runtime-only: scene documents renumber them to
//! document-local IDs, and only world snapshots keep them verbatim, together
//! with the [`AllocatorState`] that makes them valid again.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EcsError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A generational entity handle. Carries no data of its own.
///
/// Serializes as the raw `u64`, which is how entity-reference properties
/// look in component JSON before the scene serializer renumbers them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(u64);

impl Entity {
    /// Pack a slot index and generation.
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    /// Allocator slot.
    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// Times the slot had been freed when this handle was issued.
    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({self})")
    }
}

/// `index` `v` `generation`, e.g. `4v2`.
impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// AllocatorState
// ---------------------------------------------------------------------------

/// Allocator contents as stored in a world snapshot.
///
/// A slot is free exactly when its index is listed in `free`, so liveness is
/// not stored separately and cannot disagree with the free list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorState {
    /// Current generation of every slot ever handed out.
    pub generations: Vec<u32>,
    /// Free slots, in the order they will be reused.
    pub free: Vec<u32>,
}

// ---------------------------------------------------------------------------
// EntityAllocator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    generation: u32,
    alive: bool,
}

/// Hands out [`Entity`] handles and recycles the slots of despawned ones.
///
/// Freed slots are reused oldest first.
#[derive(Debug, Clone, Default)]
pub struct EntityAllocator {
    slots: Vec<Slot>,
    free: VecDeque<u32>,
    live: usize,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle, reusing the oldest free slot when there is one.
    pub fn allocate(&mut self) -> Entity {
        let index = match self.free.pop_front() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.alive = true;
        self.live += 1;
        Entity::new(index, slot.generation)
    }

    /// Free a handle's slot. Returns `false` if the handle was not live.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        let Some(slot) = self
            .slots
            .get_mut(entity.index() as usize)
            .filter(|s| s.alive && s.generation == entity.generation())
        else {
            return false;
        };
        slot.alive = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push_back(entity.index());
        self.live -= 1;
        true
    }

    /// Whether `entity` is live and its generation is current.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index() as usize)
            .is_some_and(|s| s.alive && s.generation == entity.generation())
    }

    pub fn alive_count(&self) -> usize {
        self.live
    }

    /// Capture the slots and free list for a world snapshot.
    pub fn state(&self) -> AllocatorState {
        AllocatorState {
            generations: self.slots.iter().map(|s| s.generation).collect(),
            free: self.free.iter().copied().collect(),
        }
    }

    /// Rebuild an allocator so that it hands out exactly the handles the
    /// captured one would have.
    ///
    /// Fails with [`EcsError::InvalidSnapshot`] if `free` names a slot that
    /// does not exist or names one twice.
    pub fn from_state(state: &AllocatorState) -> Result<Self, EcsError> {
        let mut slots: Vec<Slot> = state
            .generations
            .iter()
            .map(|&generation| Slot { generation, alive: true })
            .collect();
        for &index in &state.free {
            let slot = slots.get_mut(index as usize).ok_or_else(|| EcsError::InvalidSnapshot {
                details: format!("free slot {index} out of bounds ({} slots)", state.generations.len()),
            })?;
            if !slot.alive {
                return Err(EcsError::InvalidSnapshot {
                    details: format!("free slot {index} listed twice"),
                });
            }
            slot.alive = false;
        }
        Ok(Self {
            live: slots.len() - state.free.len(),
            slots,
            free: state.free.iter().copied().collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
