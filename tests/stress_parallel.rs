//! Stress: many entities, several disjoint systems, many frames.

use cadence_ecs::{
    EntityBlueprint, FnSystem, SystemAccess, SystemContext, TickRate, World, WorldConfig,
};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Heat(f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fuel(f32);

const ENTITIES: usize = 50_000;
const FRAMES: usize = 30;
const DT: f64 = 0.016;

#[test]
fn parallel_systems_stay_consistent_over_many_frames() {
    let mut world = World::with_config(WorldConfig {
        worker_threads: Some(4),
        ..Default::default()
    });
    let p = world.component_id::<Position>();
    let v = world.component_id::<Velocity>();
    let h = world.component_id::<Heat>();
    let f = world.component_id::<Fuel>();

    for i in 0..ENTITIES {
        let mut blueprint = EntityBlueprint::new();
        blueprint.set(world.registry(), Position { x: i as f32, y: 0.0 });
        blueprint.set(world.registry(), Velocity { x: 1.0, y: -1.0 });
        blueprint.set(world.registry(), Heat(0.0));
        blueprint.set(world.registry(), Fuel(100.0));
        world.enqueue_create_entity(blueprint);
    }

    world
        .register_system(Box::new(FnSystem::new(
            "integrate",
            TickRate::EveryFrame,
            SystemAccess::empty().read(v).write(p),
            move |world: &World, ctx: &mut SystemContext| {
                let dt = ctx.delta() as f32;
                for archetype in world.query(&[p, v]) {
                    let velocities = ctx.read::<Velocity>(archetype, v).unwrap();
                    let positions = ctx.write::<Position>(archetype, p).unwrap();
                    for (position, velocity) in positions.iter_mut().zip(velocities) {
                        position.x += velocity.x * dt;
                        position.y += velocity.y * dt;
                    }
                }
                Ok(())
            },
        )))
        .unwrap();
    world
        .register_system(Box::new(FnSystem::new(
            "burn",
            TickRate::EveryFrame,
            SystemAccess::empty().read(f).write(h),
            move |world: &World, ctx: &mut SystemContext| {
                let dt = ctx.delta() as f32;
                for archetype in world.query(&[f, h]) {
                    let fuel = ctx.read::<Fuel>(archetype, f).unwrap();
                    let heat = ctx.write::<Heat>(archetype, h).unwrap();
                    for (heat, fuel) in heat.iter_mut().zip(fuel) {
                        heat.0 += fuel.0 * 0.01 * dt;
                    }
                }
                Ok(())
            },
        )))
        .unwrap();

    for _ in 0..FRAMES {
        world.tick(DT);
    }

    assert_eq!(world.entity_count(), ENTITIES);
    assert_eq!(world.diagnostics().system_failures(), 0);
    assert!(world.check_invariants().is_ok());

    let travelled = FRAMES as f32 * DT as f32;
    let archetype = world.query(&[p, v, h, f]).next().unwrap();
    assert_eq!(archetype.count(), ENTITIES);
    let positions = archetype.column_slice::<Position>(p).unwrap();
    let heats = archetype.column_slice::<Heat>(h).unwrap();
    for (slot, position) in positions.iter().enumerate() {
        assert!((position.x - (slot as f32 + travelled)).abs() < 1e-2);
        assert!((position.y + travelled).abs() < 1e-2);
    }
    let expected_heat = 100.0 * 0.01 * travelled;
    for heat in heats {
        assert!((heat.0 - expected_heat).abs() < 1e-2);
    }
}

#[test]
fn structural_churn_under_load() {
    let mut world = World::with_config(WorldConfig {
        worker_threads: Some(2),
        ..Default::default()
    });
    let p = world.component_id::<Position>();

    for round in 0..10 {
        for i in 0..1_000 {
            let mut blueprint = EntityBlueprint::new();
            blueprint.set(
                world.registry(),
                Position { x: (round * 1_000 + i) as f32, y: 0.0 },
            );
            world.enqueue_create_entity(blueprint);
        }
        world.tick(0.016);

        // Destroy every other entity of the archetype.
        let victims: Vec<_> = world
            .query(&[p])
            .flat_map(|archetype| archetype.entity_column().to_vec())
            .step_by(2)
            .collect();
        for entity in victims {
            world.enqueue_destroy_entity(entity);
        }
        world.tick(0.016);
        assert!(world.check_invariants().is_ok());
        assert_eq!(world.queued_changes(), 0);
    }
}
