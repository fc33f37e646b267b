// Copyright 2025 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Entity handles and the entity table.
//!
//! An [`Entity`] is a 64-bit handle: a 32-bit slot index plus a 32-bit
//! generation. A handle is alive iff its generation matches the table's
//! stored generation for that slot and the slot is occupied; a stale handle
//! is inert, never an error. Generation 0 is reserved for "never issued" —
//! fresh slots start at 0 and the generation is bumped both when a slot is
//! issued and when it is freed.

/// A 64-bit entity handle: `{ index, generation }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a `u64` (generation in the high bits).
    #[inline]
    pub fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

/// Where an alive entity's data lives: `(archetype index, row)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: u32,
    pub row: u32,
}

impl EntityLocation {
    const PLACEHOLDER: EntityLocation = EntityLocation {
        archetype: 0,
        row: u32::MAX,
    };
}

#[derive(Debug, Clone, Copy)]
struct EntitySlot {
    generation: u32,
    alive: bool,
    location: EntityLocation,
}

/// Generation 0 means "never issued", so the bump skips it on wraparound.
#[inline]
fn next_generation(generation: u32) -> u32 {
    let next = generation.wrapping_add(1);
    if next == 0 {
        1
    } else {
        next
    }
}

/// The entity table: slots with generation counters plus a free-list stack
/// of recycled indices.
///
/// Mutated only during the single-threaded structural phase; no locks.
pub struct Entities {
    slots: Vec<EntitySlot>,
    free: Vec<u32>,
    alive_count: usize,
}

impl Entities {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            alive_count: 0,
        }
    }

    /// Issue a fresh handle, recycling a freed index if one is available.
    ///
    /// The location is a placeholder until the caller stores the entity in
    /// an archetype and calls [`set_location`](Self::set_location).
    pub(crate) fn allocate(&mut self) -> Entity {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                assert!(
                    self.slots.len() < u32::MAX as usize,
                    "entity index space exhausted"
                );
                self.slots.push(EntitySlot {
                    generation: 0,
                    alive: false,
                    location: EntityLocation::PLACEHOLDER,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(!slot.alive, "allocated an occupied slot");
        slot.generation = next_generation(slot.generation);
        slot.alive = true;
        slot.location = EntityLocation::PLACEHOLDER;
        self.alive_count += 1;

        Entity::new(index, slot.generation)
    }

    /// Free an alive entity's slot: bump the generation (staling all
    /// outstanding handles) and push the index onto the free list.
    pub(crate) fn free(&mut self, entity: Entity) {
        let slot = &mut self.slots[entity.index() as usize];
        debug_assert!(slot.alive && slot.generation == entity.generation());
        slot.generation = next_generation(slot.generation);
        slot.alive = false;
        self.free.push(entity.index());
        self.alive_count -= 1;
    }

    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index() as usize)
            .map(|slot| slot.alive && slot.generation == entity.generation())
            .unwrap_or(false)
    }

    /// The archetype/row of an alive entity, `None` otherwise.
    #[inline]
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        let slot = self.slots.get(entity.index() as usize)?;
        if slot.alive && slot.generation == entity.generation() {
            Some(slot.location)
        } else {
            None
        }
    }

    /// Trusted fix-up callback after an archetype move or swap-remove.
    pub(crate) fn set_location(&mut self, index: u32, location: EntityLocation) {
        self.slots[index as usize].location = location;
    }

    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Total slots ever allocated (alive + recycled).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_list(&self) -> &[u32] {
        &self.free
    }

    pub(crate) fn generation_at(&self, index: usize) -> u32 {
        self.slots[index].generation
    }

    pub(crate) fn alive_at(&self, index: usize) -> bool {
        self.slots[index].alive
    }

    /// Rebuild a table from snapshot state. Locations are placeholders until
    /// the loader walks the archetype entity columns.
    pub(crate) fn restore(generations: &[u32], alive: &[bool], free: &[u32]) -> Self {
        debug_assert_eq!(generations.len(), alive.len());
        let slots: Vec<EntitySlot> = generations
            .iter()
            .zip(alive.iter())
            .map(|(&generation, &alive)| EntitySlot {
                generation,
                alive,
                location: EntityLocation::PLACEHOLDER,
            })
            .collect();
        let alive_count = slots.iter().filter(|slot| slot.alive).count();
        Self {
            slots,
            free: free.to_vec(),
            alive_count,
        }
    }
}
