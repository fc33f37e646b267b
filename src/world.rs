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

//! World: owner of all managers, the worker pool, and the frame loop.
//!
//! `tick(delta)` runs one frame in a fixed phase order: advance time, drain
//! destroys, drain creates, drain component adds then removes, (debug)
//! validate invariants, run due systems in conflict-free batches, advance
//! the frame counter. Structural changes enqueued during frame N — from any
//! thread or from systems via command buffers — are observed by systems in
//! frame N+1 and never earlier.

use std::mem;

#[cfg(feature = "profiling")]
use tracing::info_span;

use crate::archetype::Archetype;
use crate::archetypes::{Archetypes, QueryIter, EMPTY_ARCHETYPE};
use crate::command::StructuralQueues;
use crate::component::{Component, EntityBlueprint, ErasedValue};
use crate::diagnostics::Diagnostics;
use crate::entity::{Entities, Entity, EntityLocation};
use crate::error::{EcsError, Result};
use crate::executor::WorkerPool;
use crate::registry::{ComponentRegistry, ComponentTypeId};
use crate::schedule::TickScheduler;
use crate::signature::Signature;
use crate::system::{BoxedSystem, SystemId};

/// World construction knobs. Everything has a sensible default.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Worker threads for system batches. `None` = logical cores − 1
    /// (minimum 1). Zero runs every batch inline on the world thread.
    pub worker_threads: Option<usize>,
    /// Initial entity-table reservation.
    pub entity_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            entity_capacity: 1024,
        }
    }
}

/// Pure observer hooks invoked synchronously at fixed points of the frame.
///
/// Observers receive shared references only and must not enqueue
/// structural changes.
pub trait WorldObserver: Send + Sync {
    fn on_before_tick(&self, _world: &World) {}
    fn on_after_tick(&self, _world: &World) {}
    fn on_entities_created(&self, _entities: &[Entity]) {}
    fn on_entities_destroyed(&self, _entities: &[Entity]) {}
}

/// Central ECS world: entity table, archetypes, deferred queues, scheduler,
/// and worker pool.
pub struct World {
    registry: ComponentRegistry,
    entities: Entities,
    archetypes: Archetypes,
    queues: StructuralQueues,
    scheduler: TickScheduler,
    pool: WorkerPool,
    diagnostics: Diagnostics,
    observers: Vec<Box<dyn WorldObserver>>,
    /// Simulation clock in seconds, advanced only by `tick`.
    time: f64,
    frame: u64,
    // Ping-pong partners of the structural queues plus per-frame hook
    // scratch; retained across frames so steady-state ticks do not
    // allocate.
    create_scratch: Vec<EntityBlueprint>,
    destroy_scratch: Vec<Entity>,
    add_scratch: Vec<(Entity, ErasedValue)>,
    remove_scratch: Vec<(Entity, ComponentTypeId)>,
    created_this_frame: Vec<Entity>,
    destroyed_this_frame: Vec<Entity>,
}

impl World {
    /// Create a world with default configuration.
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    pub fn with_config(config: WorldConfig) -> Self {
        let threads = config.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        });

        let registry = ComponentRegistry::new();
        let archetypes = Archetypes::new(&registry);

        Self {
            registry,
            entities: Entities::with_capacity(config.entity_capacity),
            archetypes,
            queues: StructuralQueues::new(),
            scheduler: TickScheduler::default(),
            pool: WorkerPool::new(threads),
            diagnostics: Diagnostics::new(),
            observers: Vec::new(),
            time: 0.0,
            frame: 0,
            create_scratch: Vec::new(),
            destroy_scratch: Vec::new(),
            add_scratch: Vec::new(),
            remove_scratch: Vec::new(),
            created_this_frame: Vec::new(),
            destroyed_this_frame: Vec::new(),
        }
    }

    // ========== Accessors ==========

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Dense id for `T`, registering it on first use.
    pub fn component_id<T: Component>(&self) -> ComponentTypeId {
        self.registry.id_of::<T>()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Simulation time in seconds (sum of tick deltas).
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Completed frames.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Alive entities.
    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Operations waiting in the deferred queues.
    pub fn queued_changes(&self) -> usize {
        self.queues.pending()
    }

    pub(crate) fn queues(&self) -> &StructuralQueues {
        &self.queues
    }

    pub(crate) fn worker_pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub(crate) fn entities(&self) -> &Entities {
        &self.entities
    }

    pub(crate) fn archetypes_store(&self) -> &Archetypes {
        &self.archetypes
    }

    /// Swap in rebuilt storage (snapshot load). Any pending deferred
    /// operations target the old storage and are discarded with it.
    pub(crate) fn set_storage(&mut self, entities: Entities, archetypes: Archetypes) {
        self.entities = entities;
        self.archetypes = archetypes;
        self.queues = StructuralQueues::new();
    }

    #[cfg(test)]
    pub(crate) fn scheduler_ref(&self) -> &TickScheduler {
        &self.scheduler
    }

    // ========== Entities ==========

    /// Create an entity immediately, in the empty archetype.
    ///
    /// Only callable outside the system phase: systems hold `&World`, and
    /// this requires `&mut World`.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.entities.allocate();
        let archetype = self
            .archetypes
            .get_mut(EMPTY_ARCHETYPE)
            .expect("empty archetype always exists");
        let row = archetype.push_row(entity, std::iter::empty());
        self.entities.set_location(
            entity.index(),
            EntityLocation {
                archetype: EMPTY_ARCHETYPE,
                row,
            },
        );
        entity
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Archetype/row of an alive entity.
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.locate(entity)
    }

    /// Queue an entity creation; it materializes during the next tick's
    /// structural phase.
    pub fn enqueue_create_entity(&self, blueprint: EntityBlueprint) {
        self.queues.push_create(blueprint);
    }

    /// Queue an entity destruction. Stale handles are skipped at drain
    /// time.
    pub fn enqueue_destroy_entity(&self, entity: Entity) {
        self.queues.push_destroy(entity);
    }

    /// Queue a component add.
    pub fn enqueue_add_component<T: Component>(&self, entity: Entity, value: T) {
        self.queues
            .push_add(entity, ErasedValue::new(&self.registry, value));
    }

    /// Queue a pre-erased component add (the opaque payload boundary).
    pub fn enqueue_add_component_erased(&self, entity: Entity, value: ErasedValue) {
        self.queues.push_add(entity, value);
    }

    /// Queue a component remove.
    pub fn enqueue_remove_component<T: Component>(&self, entity: Entity) {
        self.queues.push_remove(entity, self.registry.id_of::<T>());
    }

    /// Queue a component remove by type id.
    pub fn enqueue_remove_component_by_id(&self, entity: Entity, type_id: ComponentTypeId) {
        self.queues.push_remove(entity, type_id);
    }

    // ========== Component access ==========

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        let Some(id) = self.registry.lookup::<T>() else {
            return false;
        };
        self.entities
            .locate(entity)
            .and_then(|location| self.archetypes.get(location.archetype))
            .map(|archetype| archetype.has_component(id))
            .unwrap_or(false)
    }

    /// Read one component of one entity.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.registry.lookup::<T>()?;
        let location = self.entities.locate(entity)?;
        let archetype = self.archetypes.get(location.archetype)?;
        archetype
            .column_slice::<T>(id)?
            .get(location.row as usize)
    }

    /// Mutate one component of one entity (host-side; requires `&mut`).
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.registry.lookup::<T>()?;
        let location = self.entities.locate(entity)?;
        let archetype = self.archetypes.get_mut(location.archetype)?;
        archetype
            .column_slice_mut::<T>(id)?
            .get_mut(location.row as usize)
    }

    // ========== Queries ==========

    /// All archetypes whose signatures contain every listed type.
    pub fn query(&self, required: &[ComponentTypeId]) -> QueryIter<'_> {
        let matches = self.archetypes.query_indices(Signature::from_ids(required));
        QueryIter::new(&self.archetypes, matches)
    }

    pub fn archetype(&self, id: u32) -> Option<&Archetype> {
        self.archetypes.get(id)
    }

    // ========== Systems ==========

    /// Register a system; its `initialize` hook runs immediately.
    pub fn register_system(&mut self, mut system: BoxedSystem) -> Result<SystemId> {
        system.initialize(&*self)?;
        let id = self.scheduler.register(system);
        self.pool.ensure_capacity(self.scheduler.len());
        Ok(id)
    }

    /// Remove a system; its `shutdown` hook runs before the system drops.
    pub fn unregister_system(&mut self, id: SystemId) -> Result<()> {
        let mut system = self
            .scheduler
            .unregister(id)
            .ok_or(EcsError::SystemNotFound)?;
        if let Err(err) = system.shutdown(&*self) {
            tracing::warn!(system = system.name(), "shutdown hook failed: {err}");
        }
        Ok(())
    }

    /// Toggle a system's participation in future frames. Disabling does not
    /// drain commands it already recorded.
    pub fn set_system_enabled(&mut self, id: SystemId, enabled: bool) -> Result<()> {
        self.scheduler.set_enabled(id, enabled)
    }

    /// Run a system once, immediately, outside the batch machinery.
    pub fn run_manual(&mut self, id: SystemId) -> Result<()> {
        let mut scheduler = mem::take(&mut self.scheduler);
        let result = scheduler.run_manual(&*self, id);
        self.scheduler = scheduler;
        result
    }

    pub fn add_observer(&mut self, observer: Box<dyn WorldObserver>) {
        self.observers.push(observer);
    }

    // ========== The frame ==========

    /// Run one frame. `delta` is host-supplied seconds since the previous
    /// tick; the core never reads the wall clock.
    pub fn tick(&mut self, delta: f64) {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.tick", frame = self.frame);
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        for observer in &self.observers {
            observer.on_before_tick(self);
        }

        self.time += delta;

        self.drain_destroys();
        self.drain_creates();
        self.drain_adds();
        self.drain_removes();

        #[cfg(debug_assertions)]
        if let Err(message) = self.check_invariants() {
            panic!("world invariant violated after structural phase: {message}");
        }

        // The scheduler leaves the world for the frame so systems can
        // borrow it shared across worker threads; structural APIs needing
        // `&mut World` are thereby unreachable until it returns.
        let mut scheduler = mem::take(&mut self.scheduler);
        scheduler.run_frame(&*self, delta);
        self.scheduler = scheduler;

        self.frame += 1;

        for observer in &self.observers {
            observer.on_after_tick(self);
        }
    }

    fn drain_destroys(&mut self) {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.drain_destroys");
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.destroyed_this_frame.clear();
        self.queues.swap_destroys(&mut self.destroy_scratch);

        for entity in self.destroy_scratch.drain(..) {
            if !self.entities.is_alive(entity) {
                // Expected: destroyed earlier this frame, or a stale handle.
                self.diagnostics.count_stale_destroy();
                continue;
            }
            let location = self.entities.locate(entity).expect("alive entity has a location");
            let archetype = self
                .archetypes
                .get_mut(location.archetype)
                .expect("location points at a live archetype");
            if let Some(relocated) = archetype.swap_remove_row(location.row as usize) {
                self.entities.set_location(relocated.index(), location);
            }
            self.entities.free(entity);
            self.destroyed_this_frame.push(entity);
        }

        if !self.destroyed_this_frame.is_empty() {
            for observer in &self.observers {
                observer.on_entities_destroyed(&self.destroyed_this_frame);
            }
        }
    }

    fn drain_creates(&mut self) {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.drain_creates");
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.created_this_frame.clear();
        self.queues.swap_creates(&mut self.create_scratch);

        for blueprint in self.create_scratch.drain(..) {
            let entity = self.entities.allocate();
            let signature = blueprint.signature();
            let archetype_id = self.archetypes.get_or_create(signature, &self.registry);
            let archetype = self
                .archetypes
                .get_mut(archetype_id)
                .expect("archetype just resolved");
            // One append straight into the final archetype; no
            // intermediate hops.
            let row = archetype.push_row(entity, blueprint.into_values());
            self.entities.set_location(
                entity.index(),
                EntityLocation {
                    archetype: archetype_id,
                    row,
                },
            );
            self.created_this_frame.push(entity);
        }

        if !self.created_this_frame.is_empty() {
            for observer in &self.observers {
                observer.on_entities_created(&self.created_this_frame);
            }
        }
    }

    fn drain_adds(&mut self) {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.drain_adds");
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.queues.swap_adds(&mut self.add_scratch);

        for (entity, value) in self.add_scratch.drain(..) {
            if !self.entities.is_alive(entity) {
                // The destroy earlier this frame already bumped the
                // generation; the queued value drops itself.
                self.diagnostics.count_stale_add();
                continue;
            }
            let type_id = value.type_id();
            if !self.registry.is_registered(type_id) {
                tracing::warn!(?type_id, "component add with unregistered type id");
                self.diagnostics.count_invalid_type();
                continue;
            }
            let location = self.entities.locate(entity).expect("alive entity has a location");

            let source = location.archetype;
            let already_has = self
                .archetypes
                .get(source)
                .expect("location points at a live archetype")
                .has_component(type_id);
            if already_has {
                // Double-add: signature no-op, last write wins.
                self.archetypes
                    .get_mut(source)
                    .expect("archetype exists")
                    .overwrite_component(location.row as usize, value);
                continue;
            }

            let target = self
                .archetypes
                .transition_target(source, type_id, true, &self.registry);
            let (row, relocated) =
                self.archetypes
                    .move_entity(source, location.row, target, Some(value));
            if let Some(swapped) = relocated {
                self.entities.set_location(swapped.index(), location);
            }
            self.entities.set_location(
                entity.index(),
                EntityLocation {
                    archetype: target,
                    row,
                },
            );
        }
    }

    fn drain_removes(&mut self) {
        #[cfg(feature = "profiling")]
        let span = info_span!("world.drain_removes");
        #[cfg(feature = "profiling")]
        let _span_guard = span.enter();

        self.queues.swap_removes(&mut self.remove_scratch);

        for (entity, type_id) in self.remove_scratch.drain(..) {
            if !self.entities.is_alive(entity) {
                self.diagnostics.count_stale_remove();
                continue;
            }
            if !self.registry.is_registered(type_id) {
                tracing::warn!(?type_id, "component remove with unregistered type id");
                self.diagnostics.count_invalid_type();
                continue;
            }
            let location = self.entities.locate(entity).expect("alive entity has a location");

            let source = location.archetype;
            let present = self
                .archetypes
                .get(source)
                .expect("location points at a live archetype")
                .has_component(type_id);
            if !present {
                // Redundant remove: no-op.
                continue;
            }

            let target = self
                .archetypes
                .transition_target(source, type_id, false, &self.registry);
            let (row, relocated) = self.archetypes.move_entity(source, location.row, target, None);
            if let Some(swapped) = relocated {
                self.entities.set_location(swapped.index(), location);
            }
            self.entities.set_location(
                entity.index(),
                EntityLocation {
                    archetype: target,
                    row,
                },
            );
        }
    }

    // ========== Diagnostics ==========

    /// Verify the structural invariants: archetype rows and the entity
    /// table agree, all columns are dense, and the free list plus alive
    /// slots partition the index space.
    ///
    /// Checked automatically after the structural phase in debug builds.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (archetype_index, archetype) in self.archetypes.iter().enumerate() {
            if !archetype.columns_consistent() {
                return Err(format!(
                    "archetype {archetype_index}: column lengths diverge from entity column"
                ));
            }
            for (row, &entity) in archetype.entity_column().iter().enumerate() {
                if !self.entities.is_alive(entity) {
                    return Err(format!(
                        "archetype {archetype_index} row {row}: stored entity {entity:?} is not alive"
                    ));
                }
                match self.entities.locate(entity) {
                    Some(location)
                        if location.archetype as usize == archetype_index
                            && location.row as usize == row => {}
                    other => {
                        return Err(format!(
                            "archetype {archetype_index} row {row}: entity {entity:?} located at {other:?}"
                        ));
                    }
                }
            }
        }

        let alive = self.entities.alive_count();
        let free = self.entities.free_list().len();
        let slots = self.entities.slot_count();
        if alive + free != slots {
            return Err(format!(
                "entity table partition broken: {alive} alive + {free} free != {slots} slots"
            ));
        }
        Ok(())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        let mut scheduler = mem::take(&mut self.scheduler);
        scheduler.shutdown_all(&*self);
        // The worker pool joins its threads in its own Drop.
    }
}
