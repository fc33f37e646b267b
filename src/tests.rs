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

//! End-to-end tests: entity lifecycle, deferred queues, scheduling cadence,
//! parallel batches, and the persistence protocol.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::component::EntityBlueprint;
use crate::registry::ComponentTypeId;
use crate::signature::Signature;
use crate::system::{FnSystem, SystemAccess, TickRate};
use crate::world::{World, WorldConfig, WorldObserver};
use crate::Entity;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pulse {
    strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Glow {
    level: f32,
}

/// Structural tests run every batch inline for determinism.
fn serial_world() -> World {
    World::with_config(WorldConfig {
        worker_threads: Some(0),
        ..Default::default()
    })
}

fn parallel_world() -> World {
    World::with_config(WorldConfig {
        worker_threads: Some(4),
        ..Default::default()
    })
}

/// Entities stored in the archetype whose signature is exactly `ids`.
fn exact_count(world: &World, ids: &[ComponentTypeId]) -> usize {
    let signature = Signature::from_ids(ids);
    world
        .query(ids)
        .filter(|archetype| *archetype.signature() == signature)
        .map(|archetype| archetype.count())
        .sum()
}

// ========== Scenario: create, move, destroy ==========

#[test]
fn create_move_destroy() {
    let mut world = serial_world();
    let p = world.component_id::<Position>();
    let v = world.component_id::<Velocity>();

    let mut blueprint = EntityBlueprint::new();
    blueprint.set(world.registry(), Position { x: 1.0, y: 2.0, z: 3.0 });
    world.enqueue_create_entity(blueprint);
    world.tick(0.016);

    assert_eq!(world.entity_count(), 1);
    assert_eq!(exact_count(&world, &[p]), 1);
    let e0 = {
        let archetype = world
            .query(&[p])
            .find(|a| a.signature().len() == 1)
            .unwrap();
        assert_eq!(
            archetype.column_slice::<Position>(p).unwrap()[0],
            Position { x: 1.0, y: 2.0, z: 3.0 }
        );
        archetype.entity_column()[0]
    };
    assert!(world.is_alive(e0));

    world.enqueue_add_component(e0, Velocity { x: 0.0, y: 1.0, z: 0.0 });
    world.tick(0.016);

    assert_eq!(exact_count(&world, &[p]), 0);
    assert_eq!(exact_count(&world, &[p, v]), 1);
    let archetype = world
        .query(&[p, v])
        .find(|a| a.signature().len() == 2)
        .unwrap();
    assert_eq!(
        archetype.column_slice::<Position>(p).unwrap()[0],
        Position { x: 1.0, y: 2.0, z: 3.0 }
    );
    assert_eq!(
        archetype.column_slice::<Velocity>(v).unwrap()[0],
        Velocity { x: 0.0, y: 1.0, z: 0.0 }
    );

    world.enqueue_destroy_entity(e0);
    world.tick(0.016);

    assert_eq!(exact_count(&world, &[p, v]), 0);
    assert!(!world.is_alive(e0));
    assert!(world.entities().free_list().contains(&e0.index()));
}

// ========== Scenario: batch creation throughput ==========

#[test]
fn creates_drain_in_fifo_order() {
    let mut world = serial_world();
    let p = world.component_id::<Position>();

    for i in 0..10_000 {
        let mut blueprint = EntityBlueprint::new();
        blueprint.set(world.registry(), Position { x: i as f32, y: 0.0, z: 0.0 });
        world.enqueue_create_entity(blueprint);
    }
    world.tick(0.016);

    assert_eq!(exact_count(&world, &[p]), 10_000);
    let archetype = world
        .query(&[p])
        .find(|a| a.signature().len() == 1)
        .unwrap();
    let positions = archetype.column_slice::<Position>(p).unwrap();
    for (slot, position) in positions.iter().enumerate() {
        assert_eq!(position.x, slot as f32);
    }

    let entities = archetype.entity_column();
    let mut unique: Vec<u64> = entities.iter().map(|e| e.to_bits()).collect();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 10_000);
    for &entity in entities {
        assert!(world.is_alive(entity));
    }
}

// ========== Scenario: parallel batch, no data races ==========

#[test]
fn disjoint_systems_share_a_batch_and_update_in_parallel() {
    const ENTITIES: usize = 20_000;
    const DT: f64 = 0.016;

    let mut world = parallel_world();
    let p = world.component_id::<Position>();
    let v = world.component_id::<Velocity>();
    let pu = world.component_id::<Pulse>();
    let g = world.component_id::<Glow>();

    for i in 0..ENTITIES {
        let mut blueprint = EntityBlueprint::new();
        blueprint.set(world.registry(), Position { x: i as f32, y: 0.0, z: 0.0 });
        blueprint.set(world.registry(), Velocity { x: 1.0, y: 2.0, z: 0.0 });
        blueprint.set(world.registry(), Pulse { strength: 0.5 });
        blueprint.set(world.registry(), Glow { level: 0.0 });
        world.enqueue_create_entity(blueprint);
    }

    let move_id = world
        .register_system(Box::new(FnSystem::new(
            "move",
            TickRate::EveryFrame,
            SystemAccess::empty().read(v).write(p),
            move |world: &World, ctx: &mut crate::system::SystemContext| {
                let dt = ctx.delta() as f32;
                for archetype in world.query(&[p, v]) {
                    let velocities = ctx.read::<Velocity>(archetype, v).unwrap();
                    let positions = ctx.write::<Position>(archetype, p).unwrap();
                    for (position, velocity) in positions.iter_mut().zip(velocities.iter()) {
                        position.x += velocity.x * dt;
                        position.y += velocity.y * dt;
                        position.z += velocity.z * dt;
                    }
                }
                Ok(())
            },
        )))
        .unwrap();
    let glow_id = world
        .register_system(Box::new(FnSystem::new(
            "glow",
            TickRate::EveryFrame,
            SystemAccess::empty().read(pu).write(g),
            move |world: &World, ctx: &mut crate::system::SystemContext| {
                let dt = ctx.delta() as f32;
                for archetype in world.query(&[pu, g]) {
                    let pulses = ctx.read::<Pulse>(archetype, pu).unwrap();
                    let glows = ctx.write::<Glow>(archetype, g).unwrap();
                    for (glow, pulse) in glows.iter_mut().zip(pulses.iter()) {
                        glow.level += pulse.strength * dt;
                    }
                }
                Ok(())
            },
        )))
        .unwrap();

    world.tick(DT);

    // Disjoint access sets: one batch, two systems.
    assert_eq!(
        world.scheduler_ref().last_batches(),
        vec![vec![move_id, glow_id]]
    );

    let archetype = world.query(&[p, v, pu, g]).next().unwrap();
    assert_eq!(archetype.count(), ENTITIES);
    let positions = archetype.column_slice::<Position>(p).unwrap();
    let glows = archetype.column_slice::<Glow>(g).unwrap();
    for (slot, position) in positions.iter().enumerate() {
        assert!((position.x - (slot as f32 + 1.0 * DT as f32)).abs() < 1e-3);
        assert!((position.y - 2.0 * DT as f32).abs() < 1e-3);
    }
    for glow in glows {
        assert!((glow.level - 0.5 * DT as f32).abs() < 1e-6);
    }
    for &entity in archetype.entity_column() {
        assert!(world.is_alive(entity));
    }
    assert_eq!(world.entity_count(), ENTITIES);
}

#[test]
fn read_write_overlap_serializes_into_two_batches() {
    let mut world = parallel_world();
    let p = world.component_id::<Position>();
    let v = world.component_id::<Velocity>();
    let pu = world.component_id::<Pulse>();

    // "move" reads V; "pulse" writes V: the pair conflicts, so the batches
    // must be sequential, in registration order.
    let move_id = world
        .register_system(Box::new(FnSystem::new(
            "move",
            TickRate::EveryFrame,
            SystemAccess::empty().read(v).write(p),
            |_, _| Ok(()),
        )))
        .unwrap();
    let pulse_id = world
        .register_system(Box::new(FnSystem::new(
            "pulse",
            TickRate::EveryFrame,
            SystemAccess::empty().read(pu).write(v),
            |_, _| Ok(()),
        )))
        .unwrap();

    world.tick(0.016);
    assert_eq!(
        world.scheduler_ref().last_batches(),
        vec![vec![move_id], vec![pulse_id]]
    );
}

// ========== Scenario: stale handle safety ==========

#[test]
fn stale_component_add_is_skipped_and_counted() {
    let mut world = serial_world();
    world.component_id::<Position>();

    let entity = world.create_entity();
    world.enqueue_add_component(entity, Position { x: 1.0, y: 1.0, z: 1.0 });
    world.enqueue_destroy_entity(entity);
    world.tick(0.016);

    assert!(!world.is_alive(entity));
    for archetype in world.query(&[]) {
        assert!(!archetype.entity_column().contains(&entity));
    }
    assert_eq!(world.diagnostics().stale_adds(), 1);
    assert_eq!(world.queued_changes(), 0);
}

#[test]
fn double_destroy_is_idempotent() {
    let mut world = serial_world();
    let entity = world.create_entity();

    world.enqueue_destroy_entity(entity);
    world.enqueue_destroy_entity(entity);
    world.tick(0.016);

    assert!(!world.is_alive(entity));
    assert_eq!(world.diagnostics().stale_destroys(), 1);

    // The slot is recycled with a strictly greater generation.
    let recycled = world.create_entity();
    assert_eq!(recycled.index(), entity.index());
    assert!(recycled.generation() > entity.generation());
}

// ========== Scenario: manual systems ==========

#[test]
fn manual_system_runs_only_on_request() {
    let mut world = serial_world();
    let runs = Arc::new(AtomicUsize::new(0));
    let deltas: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    let id = {
        let runs = Arc::clone(&runs);
        let deltas = Arc::clone(&deltas);
        world
            .register_system(Box::new(FnSystem::new(
                "manual",
                TickRate::Manual,
                SystemAccess::empty(),
                move |_world: &World, ctx: &mut crate::system::SystemContext| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    deltas.lock().push(ctx.delta());
                    Ok(())
                },
            )))
            .unwrap()
    };

    for _ in 0..600 {
        world.tick(0.016);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    world.run_manual(id).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // Delta is the time since world start for a first invocation.
    let first_delta = deltas.lock()[0];
    assert!((first_delta - 600.0 * 0.016).abs() < 1e-6);

    for _ in 0..100 {
        world.tick(0.016);
    }
    world.run_manual(id).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let second_delta = deltas.lock()[1];
    assert!((second_delta - 100.0 * 0.016).abs() < 1e-6);
}

#[test]
fn run_manual_unknown_id_errors() {
    let mut world = serial_world();
    assert!(matches!(
        world.run_manual(crate::system::SystemId(42)),
        Err(crate::error::EcsError::SystemNotFound)
    ));
}

// ========== Scenario: tick-rate cadence ==========

#[test]
fn one_second_bucket_fires_with_accumulated_delta() {
    let mut world = serial_world();
    let runs = Arc::new(AtomicUsize::new(0));
    let deltas: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let runs = Arc::clone(&runs);
        let deltas = Arc::clone(&deltas);
        world
            .register_system(Box::new(FnSystem::new(
                "slow",
                TickRate::Sec1,
                SystemAccess::empty(),
                move |_world: &World, ctx: &mut crate::system::SystemContext| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    deltas.lock().push(ctx.delta());
                    Ok(())
                },
            )))
            .unwrap();
    }

    for _ in 0..60 {
        world.tick(0.016);
    }
    // ~0.96s accumulated: not due yet.
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    world.tick(0.016); // ~0.976
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    world.tick(0.016); // ~0.992
    world.tick(0.016); // ~1.008: due
    world.tick(0.016); // ~0.024 residue: not due
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // Effective delta is the accumulated second, not the frame delta.
    let delta = deltas.lock()[0];
    assert!(delta >= 1.0 && delta < 1.05, "effective delta was {delta}");
}

#[test]
fn subtracting_period_keeps_long_term_rate_exact() {
    let mut world = serial_world();
    let runs = Arc::new(AtomicUsize::new(0));

    {
        let runs = Arc::clone(&runs);
        world
            .register_system(Box::new(FnSystem::new(
                "slow",
                TickRate::Sec1,
                SystemAccess::empty(),
                move |_world: &World, _ctx: &mut crate::system::SystemContext| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )))
            .unwrap();
    }

    // 625 frames * 16ms = 10 simulated seconds.
    for _ in 0..625 {
        world.tick(0.016);
    }
    let count = runs.load(Ordering::SeqCst);
    assert!((9..=10).contains(&count), "ran {count} times in 10s");
}

#[test]
fn every_frame_systems_see_the_frame_delta() {
    let mut world = serial_world();
    let deltas: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let deltas = Arc::clone(&deltas);
        world
            .register_system(Box::new(FnSystem::new(
                "fast",
                TickRate::EveryFrame,
                SystemAccess::empty(),
                move |_world: &World, ctx: &mut crate::system::SystemContext| {
                    deltas.lock().push(ctx.delta());
                    Ok(())
                },
            )))
            .unwrap();
    }

    world.tick(0.016);
    world.tick(0.033);
    world.tick(0.008);
    let recorded = deltas.lock().clone();
    assert_eq!(recorded, vec![0.016, 0.033, 0.008]);
}

// ========== Deferred queues and ordering laws ==========

#[test]
fn add_then_remove_round_trips_to_original_archetype() {
    let mut world = serial_world();
    let p = world.component_id::<Position>();
    world.component_id::<Velocity>();

    let mut blueprint = EntityBlueprint::new();
    blueprint.set(world.registry(), Position { x: 0.0, y: 0.0, z: 0.0 });
    world.enqueue_create_entity(blueprint);
    world.tick(0.016);

    let entity = world
        .query(&[p])
        .next()
        .unwrap()
        .entity_column()[0];

    // Adds drain before removes, so the entity passes through {P,V} and
    // comes back.
    world.enqueue_add_component(entity, Velocity { x: 1.0, y: 0.0, z: 0.0 });
    world.enqueue_remove_component::<Velocity>(entity);
    world.tick(0.016);

    assert!(world.is_alive(entity));
    assert!(!world.has_component::<Velocity>(entity));
    assert_eq!(exact_count(&world, &[p]), 1);
    assert_eq!(world.entity_count(), 1);
}

#[test]
fn double_add_overwrites_without_moving() {
    let mut world = serial_world();
    let p = world.component_id::<Position>();

    let mut blueprint = EntityBlueprint::new();
    blueprint.set(world.registry(), Position { x: 1.0, y: 0.0, z: 0.0 });
    world.enqueue_create_entity(blueprint);
    world.tick(0.016);
    let entity = world.query(&[p]).next().unwrap().entity_column()[0];
    let before = world.archetype_count();

    world.enqueue_add_component(entity, Position { x: 9.0, y: 9.0, z: 9.0 });
    world.tick(0.016);

    assert_eq!(world.archetype_count(), before);
    assert_eq!(exact_count(&world, &[p]), 1);
    assert_eq!(
        world.get_component::<Position>(entity),
        Some(&Position { x: 9.0, y: 9.0, z: 9.0 })
    );
}

#[test]
fn redundant_remove_is_a_no_op() {
    let mut world = serial_world();
    world.component_id::<Velocity>();
    let entity = world.create_entity();

    world.enqueue_remove_component::<Velocity>(entity);
    world.tick(0.016);

    assert!(world.is_alive(entity));
    assert!(world.check_invariants().is_ok());
}

#[test]
fn unregistered_type_id_is_logged_and_skipped() {
    let mut world = serial_world();
    let entity = world.create_entity();

    world.enqueue_remove_component_by_id(entity, ComponentTypeId::from_index(99));
    world.tick(0.016);

    assert_eq!(world.diagnostics().invalid_type_ops(), 1);
    assert!(world.is_alive(entity));
}

#[test]
fn queues_are_empty_after_every_tick() {
    let mut world = serial_world();
    let p = world.component_id::<Position>();

    for i in 0..50 {
        let mut blueprint = EntityBlueprint::new();
        blueprint.set(world.registry(), Position { x: i as f32, y: 0.0, z: 0.0 });
        world.enqueue_create_entity(blueprint);
    }
    world.tick(0.016);
    assert_eq!(world.queued_changes(), 0);

    let victims: Vec<Entity> = world
        .query(&[p])
        .next()
        .unwrap()
        .entity_column()
        .iter()
        .copied()
        .take(10)
        .collect();
    for entity in victims {
        world.enqueue_destroy_entity(entity);
        world.enqueue_add_component(entity, Velocity { x: 0.0, y: 0.0, z: 0.0 });
    }
    world.tick(0.016);

    assert_eq!(world.queued_changes(), 0);
    assert!(world.check_invariants().is_ok());
    assert_eq!(world.entity_count(), 40);
    // All ten adds chased destroyed entities.
    assert_eq!(world.diagnostics().stale_adds(), 10);
}

#[test]
fn destroyed_slots_are_recycled_by_later_creates() {
    let mut world = serial_world();
    world.component_id::<Position>();

    let doomed = world.create_entity();
    world.enqueue_destroy_entity(doomed);
    let mut blueprint = EntityBlueprint::new();
    blueprint.set(world.registry(), Position { x: 0.0, y: 0.0, z: 0.0 });
    world.enqueue_create_entity(blueprint);
    // Destroys drain before creates, so the create reuses the freed slot.
    world.tick(0.016);

    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.entities().slot_count(), 1);
}

// ========== Command buffers ==========

#[test]
fn commands_recorded_in_frame_n_apply_in_frame_n_plus_one() {
    let mut world = serial_world();
    let p = world.component_id::<Position>();

    world
        .register_system(Box::new(FnSystem::new(
            "spawner",
            TickRate::EveryFrame,
            SystemAccess::empty(),
            move |world: &World, ctx: &mut crate::system::SystemContext| {
                let mut blueprint = EntityBlueprint::new();
                blueprint.set(world.registry(), Position { x: 0.0, y: 0.0, z: 0.0 });
                ctx.commands().create_entity(blueprint);
                Ok(())
            },
        )))
        .unwrap();

    world.tick(0.016);
    // The spawn is queued, not applied: systems of frame N never observe
    // their own structural changes.
    assert_eq!(world.entity_count(), 0);
    assert_eq!(world.queued_changes(), 1);

    world.tick(0.016);
    assert_eq!(world.entity_count(), 1);
    assert_eq!(exact_count(&world, &[p]), 1);
}

#[test]
fn command_buffer_destroy_beats_sibling_add() {
    let mut world = serial_world();
    world.component_id::<Position>();
    let entity = world.create_entity();

    {
        let target = entity;
        world
            .register_system(Box::new(FnSystem::new(
                "adder",
                TickRate::EveryFrame,
                SystemAccess::empty(),
                move |world: &World, ctx: &mut crate::system::SystemContext| {
                    ctx.commands().add_component(
                        world.registry(),
                        target,
                        Position { x: 1.0, y: 0.0, z: 0.0 },
                    );
                    Ok(())
                },
            )))
            .unwrap();
    }
    {
        let target = entity;
        world
            .register_system(Box::new(FnSystem::new(
                "reaper",
                TickRate::EveryFrame,
                SystemAccess::empty(),
                move |_world: &World, ctx: &mut crate::system::SystemContext| {
                    ctx.commands().destroy_entity(target);
                    Ok(())
                },
            )))
            .unwrap();
    }

    world.tick(0.016); // both commands recorded
    world.tick(0.016); // destroy drains first; the add sees a stale handle

    assert!(!world.is_alive(entity));
    assert_eq!(world.diagnostics().stale_adds(), 1);
    assert!(world.check_invariants().is_ok());
}

// ========== Failure containment ==========

#[test]
fn panicking_system_is_contained_and_counted() {
    let mut world = parallel_world();
    let p = world.component_id::<Position>();
    let survivor_runs = Arc::new(AtomicUsize::new(0));

    world
        .register_system(Box::new(FnSystem::new(
            "faulty",
            TickRate::EveryFrame,
            SystemAccess::empty().write(p),
            |_world: &World, _ctx: &mut crate::system::SystemContext| {
                panic!("deliberate test panic");
            },
        )))
        .unwrap();
    {
        let survivor_runs = Arc::clone(&survivor_runs);
        // Conflicts with "faulty": runs in the following batch.
        world
            .register_system(Box::new(FnSystem::new(
                "survivor",
                TickRate::EveryFrame,
                SystemAccess::empty().read(p),
                move |_world: &World, _ctx: &mut crate::system::SystemContext| {
                    survivor_runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )))
            .unwrap();
    }

    world.tick(0.016);
    assert_eq!(world.diagnostics().system_failures(), 1);
    assert_eq!(survivor_runs.load(Ordering::SeqCst), 1);

    // No auto-disable: the failure repeats.
    world.tick(0.016);
    assert_eq!(world.diagnostics().system_failures(), 2);
    assert_eq!(survivor_runs.load(Ordering::SeqCst), 2);

    let log = world.diagnostics().recent();
    assert!(log.iter().any(|record| record.message.contains("faulty")));
}

#[test]
fn erroring_system_is_logged_and_frame_continues() {
    let mut world = serial_world();

    world
        .register_system(Box::new(FnSystem::new(
            "failing",
            TickRate::EveryFrame,
            SystemAccess::empty(),
            |_world: &World, _ctx: &mut crate::system::SystemContext| {
                Err(crate::error::EcsError::SystemError("bad state".into()))
            },
        )))
        .unwrap();

    world.tick(0.016);
    world.tick(0.016);
    assert_eq!(world.diagnostics().system_failures(), 2);
    assert_eq!(world.frame(), 2);
}

// ========== Registration, enable/disable, boundaries ==========

#[test]
fn zero_systems_tick_only_drains() {
    let mut world = serial_world();
    world.component_id::<Position>();
    let mut blueprint = EntityBlueprint::new();
    blueprint.set(world.registry(), Position { x: 0.0, y: 0.0, z: 0.0 });
    world.enqueue_create_entity(blueprint);

    world.tick(0.016);
    assert_eq!(world.entity_count(), 1);
    assert_eq!(world.frame(), 1);
}

#[test]
fn disabled_systems_are_excluded_until_reenabled() {
    let mut world = serial_world();
    let runs = Arc::new(AtomicUsize::new(0));

    let id = {
        let runs = Arc::clone(&runs);
        world
            .register_system(Box::new(FnSystem::new(
                "toggle",
                TickRate::EveryFrame,
                SystemAccess::empty(),
                move |_world: &World, _ctx: &mut crate::system::SystemContext| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )))
            .unwrap()
    };

    world.tick(0.016);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    world.set_system_enabled(id, false).unwrap();
    world.tick(0.016);
    world.tick(0.016);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    world.set_system_enabled(id, true).unwrap();
    world.tick(0.016);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn lifecycle_hooks_fire_on_register_and_unregister() {
    let mut world = serial_world();
    let initialized = Arc::new(AtomicUsize::new(0));
    let shut_down = Arc::new(AtomicUsize::new(0));

    let id = {
        let initialized = Arc::clone(&initialized);
        let shut_down = Arc::clone(&shut_down);
        let system = FnSystem::new(
            "hooked",
            TickRate::EveryFrame,
            SystemAccess::empty(),
            |_world: &World, _ctx: &mut crate::system::SystemContext| Ok(()),
        )
        .on_initialize({
            let initialized = Arc::clone(&initialized);
            move |_| {
                initialized.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .on_shutdown(move |_| {
            shut_down.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        world.register_system(Box::new(system)).unwrap()
    };

    assert_eq!(initialized.load(Ordering::SeqCst), 1);
    world.unregister_system(id).unwrap();
    assert_eq!(shut_down.load(Ordering::SeqCst), 1);
    assert!(world.unregister_system(id).is_err());
}

#[test]
fn immediate_creation_lands_in_the_empty_archetype() {
    let mut world = serial_world();
    let entity = world.create_entity();

    assert!(world.is_alive(entity));
    let location = world.locate(entity).unwrap();
    assert_eq!(location.archetype, 0);
    assert!(world.archetype(0).unwrap().signature().is_empty());
    assert!(world.check_invariants().is_ok());
}

// ========== Observers ==========

#[derive(Default)]
struct CountingObserver {
    before: AtomicUsize,
    after: AtomicUsize,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl WorldObserver for Arc<CountingObserver> {
    fn on_before_tick(&self, _world: &World) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }
    fn on_after_tick(&self, _world: &World) {
        self.after.fetch_add(1, Ordering::SeqCst);
    }
    fn on_entities_created(&self, entities: &[Entity]) {
        self.created.fetch_add(entities.len(), Ordering::SeqCst);
    }
    fn on_entities_destroyed(&self, entities: &[Entity]) {
        self.destroyed.fetch_add(entities.len(), Ordering::SeqCst);
    }
}

#[test]
fn observers_see_tick_and_lifecycle_batches() {
    let mut world = serial_world();
    world.component_id::<Position>();
    let observer = Arc::new(CountingObserver::default());
    world.add_observer(Box::new(Arc::clone(&observer)));

    for _ in 0..3 {
        let mut blueprint = EntityBlueprint::new();
        blueprint.set(world.registry(), Position { x: 0.0, y: 0.0, z: 0.0 });
        world.enqueue_create_entity(blueprint);
    }
    world.tick(0.016);
    assert_eq!(observer.before.load(Ordering::SeqCst), 1);
    assert_eq!(observer.after.load(Ordering::SeqCst), 1);
    assert_eq!(observer.created.load(Ordering::SeqCst), 3);

    let victims: Vec<Entity> = world
        .query(&[])
        .flat_map(|a| a.entity_column().to_vec())
        .collect();
    for entity in victims {
        world.enqueue_destroy_entity(entity);
    }
    world.tick(0.016);
    assert_eq!(observer.destroyed.load(Ordering::SeqCst), 3);
}

// ========== Erased payload boundary ==========

#[test]
fn raw_payloads_route_through_the_add_queue() {
    let mut world = serial_world();
    let p = world.component_id::<Position>();
    let entity = world.create_entity();

    let source = Position { x: 4.0, y: 5.0, z: 6.0 };
    let bytes = unsafe {
        std::slice::from_raw_parts(
            &source as *const Position as *const u8,
            std::mem::size_of::<Position>(),
        )
    };
    let value = unsafe { crate::ErasedValue::from_raw_parts(world.registry(), p, bytes) };
    world.enqueue_add_component_erased(entity, value);
    world.tick(0.016);

    assert_eq!(world.get_component::<Position>(entity), Some(&source));
}
