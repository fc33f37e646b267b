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

//! Cadence ECS - archetype ECS core with tick-rate scheduling
//!
//! Entities live in structure-of-arrays archetypes keyed by their component
//! signature. Structural changes (create/destroy entities, add/remove
//! components) are deferred into queues and drained in a fixed order at the
//! start of every frame; systems then run in conflict-free parallel batches
//! on a fixed worker pool, each at its own tick rate.
//!
//! ```no_run
//! use cadence_ecs::{EntityBlueprint, World};
//!
//! #[derive(Clone, Copy)]
//! struct Position { x: f32, y: f32 }
//!
//! let mut world = World::new();
//! let mut blueprint = EntityBlueprint::new();
//! blueprint.set(world.registry(), Position { x: 0.0, y: 0.0 });
//! world.enqueue_create_entity(blueprint);
//! world.tick(0.016); // the entity materializes here
//! ```

pub mod archetype;
pub mod archetypes;
pub mod command;
pub mod component;
pub mod diagnostics;
pub mod entity;
pub mod error;
pub mod registry;
pub mod signature;
pub mod snapshot;
pub mod world;

// Scheduling and execution
pub mod executor;
pub mod schedule;
pub mod system;

// Re-exports for convenience
pub use archetype::Archetype;
pub use archetypes::QueryIter;
pub use command::CommandBuffer;
pub use component::{Component, EntityBlueprint, ErasedValue};
pub use diagnostics::{DiagnosticRecord, Diagnostics};
pub use entity::{Entities, Entity, EntityLocation};
pub use error::{EcsError, Result};
pub use registry::{ComponentInfo, ComponentRegistry, ComponentTypeId, MAX_COMPONENT_TYPES};
pub use signature::Signature;
pub use snapshot::{ArchetypeSnapshot, ColumnSnapshot, EntityTableSnapshot, WorldSnapshot};
pub use world::{World, WorldConfig, WorldObserver};

pub use executor::WorkerPool;
pub use system::{
    BoxedSystem, FnSystem, System, SystemAccess, SystemContext, SystemId, TickRate,
};

#[cfg(test)]
mod tests;
