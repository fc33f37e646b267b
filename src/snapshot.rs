//! Persistence protocol: world snapshots as plain data.
//!
//! The core does not define a file format. A [`WorldSnapshot`] is the
//! protocol contract for external persistence code: the entity table
//! (generations, alive flags, free list), and per archetype its signature,
//! entity column, and each component column as a tagged byte payload.
//! Round-trip is guaranteed when the source and destination worlds
//! registered the same component types in the same order; the registered
//! type-name manifest carried in the snapshot verifies that.
//!
//! Component types with a non-trivial drop are refused: duplicating their
//! bytes would double-own heap data.

use crate::entity::{Entities, Entity, EntityLocation};
use crate::error::{EcsError, Result};
use crate::registry::ComponentTypeId;
use crate::signature::Signature;
use crate::world::World;

/// Entity-table state: one generation/alive pair per slot plus the
/// free-list stack.
#[derive(Debug, Clone, Default)]
pub struct EntityTableSnapshot {
    pub generations: Vec<u32>,
    pub alive: Vec<bool>,
    pub free_list: Vec<u32>,
}

/// One component column: the dense type id and the raw value bytes
/// (`count * size` of them).
#[derive(Debug, Clone)]
pub struct ColumnSnapshot {
    pub type_id: ComponentTypeId,
    pub bytes: Vec<u8>,
}

/// One archetype: its signature as type ids, its entity column, and its
/// component columns.
#[derive(Debug, Clone)]
pub struct ArchetypeSnapshot {
    pub type_ids: Vec<ComponentTypeId>,
    pub entities: Vec<Entity>,
    pub columns: Vec<ColumnSnapshot>,
}

/// A complete structural snapshot of a world.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    /// Registered type names in registration order; the compatibility
    /// manifest.
    pub types: Vec<&'static str>,
    pub entities: EntityTableSnapshot,
    pub archetypes: Vec<ArchetypeSnapshot>,
}

impl World {
    /// Capture the world's structural state.
    ///
    /// Fails with [`EcsError::SnapshotUnsupportedType`] if any registered
    /// component type has a non-trivial drop.
    pub fn snapshot(&self) -> Result<WorldSnapshot> {
        if let Some(name) = self.registry().first_drop_type() {
            return Err(EcsError::SnapshotUnsupportedType(name));
        }

        let entities = self.entities();
        let slots = entities.slot_count();
        let table = EntityTableSnapshot {
            generations: (0..slots).map(|i| entities.generation_at(i)).collect(),
            alive: (0..slots).map(|i| entities.alive_at(i)).collect(),
            free_list: entities.free_list().to_vec(),
        };

        let archetypes = self
            .archetypes_store()
            .iter()
            .map(|archetype| {
                let type_ids: Vec<ComponentTypeId> = archetype.signature().iter().collect();
                let columns = type_ids
                    .iter()
                    .map(|&type_id| ColumnSnapshot {
                        type_id,
                        bytes: archetype
                            .column_bytes(type_id)
                            .expect("signature member has a column")
                            .to_vec(),
                    })
                    .collect();
                ArchetypeSnapshot {
                    type_ids,
                    entities: archetype.entity_column().to_vec(),
                    columns,
                }
            })
            .collect();

        Ok(WorldSnapshot {
            types: self.registry().type_names(),
            entities: table,
            archetypes,
        })
    }

    /// Replace this world's entities and archetypes with a snapshot's,
    /// rebuilding the entity lookup from the archetype entity columns.
    ///
    /// The caller must have registered the same component types in the same
    /// order as the snapshotted world (verified against the manifest).
    /// Registered systems, observers, and the clock are untouched; pending
    /// deferred operations are discarded with the old storage.
    pub fn load_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<()> {
        let names = self.registry().type_names();
        if names != snapshot.types {
            return Err(EcsError::SnapshotMismatch(format!(
                "registered types {:?} do not match snapshot types {:?}",
                names, snapshot.types
            )));
        }
        if let Some(name) = self.registry().first_drop_type() {
            return Err(EcsError::SnapshotUnsupportedType(name));
        }
        if snapshot.entities.generations.len() != snapshot.entities.alive.len() {
            return Err(EcsError::SnapshotMismatch(
                "entity table generation/alive length mismatch".into(),
            ));
        }

        self.replace_storage(snapshot)?;

        // The loaded state must satisfy the same invariants as a live one.
        self.check_invariants().map_err(EcsError::SnapshotMismatch)
    }

    fn replace_storage(&mut self, snapshot: &WorldSnapshot) -> Result<()> {
        let mut entities = Entities::restore(
            &snapshot.entities.generations,
            &snapshot.entities.alive,
            &snapshot.entities.free_list,
        );
        let mut archetypes = crate::archetypes::Archetypes::new(self.registry());

        for archetype_snapshot in &snapshot.archetypes {
            let signature = Signature::from_ids(&archetype_snapshot.type_ids);
            let archetype_id = archetypes.get_or_create(signature, self.registry());
            let archetype = archetypes
                .get_mut(archetype_id)
                .expect("archetype just resolved");

            let columns: Vec<(ComponentTypeId, &[u8])> = archetype_snapshot
                .columns
                .iter()
                .map(|column| (column.type_id, column.bytes.as_slice()))
                .collect();
            let base_row = archetype.count();
            archetype.load_rows(&archetype_snapshot.entities, &columns)?;

            for (offset, &entity) in archetype_snapshot.entities.iter().enumerate() {
                if !entities.is_alive(entity) {
                    return Err(EcsError::SnapshotMismatch(format!(
                        "archetype stores entity {entity:?} the table says is dead"
                    )));
                }
                entities.set_location(
                    entity.index(),
                    EntityLocation {
                        archetype: archetype_id,
                        row: (base_row + offset) as u32,
                    },
                );
            }
        }

        self.set_storage(entities, archetypes);
        Ok(())
    }
}
