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

//! Deferred structural changes: the world's global queues and the
//! per-system command buffers that feed them.
//!
//! The four global queues are multi-producer (any thread may enqueue),
//! single-consumer (the world drains them on its thread during the
//! structural phase). Command buffers are private to one system execution;
//! their contents transfer into the global queues when the system's batch
//! completes, in a fixed order: creates, destroys, adds, removes.

use parking_lot::Mutex;

use crate::component::{EntityBlueprint, ErasedValue};
use crate::entity::Entity;
use crate::registry::{ComponentRegistry, ComponentTypeId};

/// The world's four deferred-change queues.
///
/// Draining swaps the queue's backing vector with a reusable scratch buffer
/// (ping-pong), so steady-state ticks shuffle pointers instead of
/// allocating.
#[derive(Default)]
pub(crate) struct StructuralQueues {
    creates: Mutex<Vec<EntityBlueprint>>,
    destroys: Mutex<Vec<Entity>>,
    adds: Mutex<Vec<(Entity, ErasedValue)>>,
    removes: Mutex<Vec<(Entity, ComponentTypeId)>>,
}

impl StructuralQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_create(&self, blueprint: EntityBlueprint) {
        self.creates.lock().push(blueprint);
    }

    pub(crate) fn push_destroy(&self, entity: Entity) {
        self.destroys.lock().push(entity);
    }

    pub(crate) fn push_add(&self, entity: Entity, value: ErasedValue) {
        self.adds.lock().push((entity, value));
    }

    pub(crate) fn push_remove(&self, entity: Entity, type_id: ComponentTypeId) {
        self.removes.lock().push((entity, type_id));
    }

    pub(crate) fn swap_creates(&self, scratch: &mut Vec<EntityBlueprint>) {
        debug_assert!(scratch.is_empty());
        std::mem::swap(&mut *self.creates.lock(), scratch);
    }

    pub(crate) fn swap_destroys(&self, scratch: &mut Vec<Entity>) {
        debug_assert!(scratch.is_empty());
        std::mem::swap(&mut *self.destroys.lock(), scratch);
    }

    pub(crate) fn swap_adds(&self, scratch: &mut Vec<(Entity, ErasedValue)>) {
        debug_assert!(scratch.is_empty());
        std::mem::swap(&mut *self.adds.lock(), scratch);
    }

    pub(crate) fn swap_removes(&self, scratch: &mut Vec<(Entity, ComponentTypeId)>) {
        debug_assert!(scratch.is_empty());
        std::mem::swap(&mut *self.removes.lock(), scratch);
    }

    /// Transfer a command buffer's recordings, preserving the defined
    /// kind order.
    pub(crate) fn absorb(&self, buffer: &mut CommandBuffer) {
        if !buffer.creates.is_empty() {
            self.creates.lock().append(&mut buffer.creates);
        }
        if !buffer.destroys.is_empty() {
            self.destroys.lock().append(&mut buffer.destroys);
        }
        if !buffer.adds.is_empty() {
            self.adds.lock().append(&mut buffer.adds);
        }
        if !buffer.removes.is_empty() {
            self.removes.lock().append(&mut buffer.removes);
        }
    }

    /// Total queued operations across all four queues.
    pub(crate) fn pending(&self) -> usize {
        self.creates.lock().len()
            + self.destroys.lock().len()
            + self.adds.lock().len()
            + self.removes.lock().len()
    }
}

/// A recording surface for structural changes, usable from inside a system
/// while the world is borrowed shared.
///
/// Commands are tagged by kind at record time; `World` drains them into the
/// global queues after the recording system's batch completes, never
/// between systems of one batch. Buffers are recycled through a pool to
/// keep steady-state ticks allocation-free.
#[derive(Default)]
pub struct CommandBuffer {
    creates: Vec<EntityBlueprint>,
    destroys: Vec<Entity>,
    adds: Vec<(Entity, ErasedValue)>,
    removes: Vec<(Entity, ComponentTypeId)>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deferred entity creation.
    pub fn create_entity(&mut self, blueprint: EntityBlueprint) {
        self.creates.push(blueprint);
    }

    /// Record a deferred entity destruction.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.destroys.push(entity);
    }

    /// Record a deferred component add.
    pub fn add_component<T: crate::component::Component>(
        &mut self,
        registry: &ComponentRegistry,
        entity: Entity,
        value: T,
    ) {
        self.adds.push((entity, ErasedValue::new(registry, value)));
    }

    /// Record a deferred add of an already-erased value.
    pub fn add_component_erased(&mut self, entity: Entity, value: ErasedValue) {
        self.adds.push((entity, value));
    }

    /// Record a deferred component remove.
    pub fn remove_component<T: crate::component::Component>(
        &mut self,
        registry: &ComponentRegistry,
        entity: Entity,
    ) {
        self.removes.push((entity, registry.id_of::<T>()));
    }

    /// Record a deferred remove by type id.
    pub fn remove_component_by_id(&mut self, entity: Entity, type_id: ComponentTypeId) {
        self.removes.push((entity, type_id));
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.creates.len() + self.destroys.len() + self.adds.len() + self.removes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all recordings, keeping capacity.
    pub fn clear(&mut self) {
        self.creates.clear();
        self.destroys.clear();
        self.adds.clear();
        self.removes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Health(u32);

    #[test]
    fn buffer_records_by_kind() {
        let registry = ComponentRegistry::new();
        let mut buffer = CommandBuffer::new();
        assert!(buffer.is_empty());

        let entity = Entity::new(0, 1);
        buffer.destroy_entity(entity);
        buffer.add_component(&registry, entity, Health(10));
        buffer.remove_component::<Health>(&registry, entity);
        buffer.create_entity(EntityBlueprint::new());
        assert_eq!(buffer.len(), 4);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn absorb_moves_everything() {
        let registry = ComponentRegistry::new();
        let queues = StructuralQueues::new();
        let mut buffer = CommandBuffer::new();

        let entity = Entity::new(3, 1);
        buffer.create_entity(EntityBlueprint::new());
        buffer.destroy_entity(entity);
        buffer.add_component(&registry, entity, Health(1));
        buffer.remove_component::<Health>(&registry, entity);

        queues.absorb(&mut buffer);
        assert!(buffer.is_empty());
        assert_eq!(queues.pending(), 4);
    }

    #[test]
    fn swap_drains_and_recycles_capacity() {
        let queues = StructuralQueues::new();
        for i in 0..100 {
            queues.push_destroy(Entity::new(i, 1));
        }

        let mut scratch = Vec::new();
        queues.swap_destroys(&mut scratch);
        assert_eq!(scratch.len(), 100);
        assert_eq!(queues.pending(), 0);

        scratch.clear();
        // The next swap hands the capacity back to the queue side.
        queues.swap_destroys(&mut scratch);
        assert!(scratch.is_empty());
    }
}
