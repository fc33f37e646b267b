//! Archetype manager: signature-keyed archetype storage, transition edges,
//! and the superset query cache.
//!
//! Archetypes are created lazily on first demand and never destroyed during
//! a session; their columns shrink on removal but the archetypes persist,
//! which keeps query-cache entries and transition edges valid for the
//! world's lifetime.

use std::sync::Arc;

use ahash::AHashMap;

use parking_lot::RwLock;

use crate::archetype::Archetype;
use crate::component::ErasedValue;
use crate::entity::Entity;
use crate::registry::{ComponentRegistry, ComponentTypeId};
use crate::signature::Signature;

/// The empty signature's archetype, always present.
pub(crate) const EMPTY_ARCHETYPE: u32 = 0;

/// Hard cap on archetype count; hitting it means runaway signature
/// fragmentation, not normal use.
const MAX_ARCHETYPES: usize = 10_000;

/// One cached query: the archetypes whose signatures are supersets of the
/// required set. Updated incrementally — only archetypes created since the
/// last refresh are scanned.
struct CachedQuery {
    required: Signature,
    matches: Arc<[u32]>,
    seen_archetypes: usize,
}

impl CachedQuery {
    fn new(required: Signature, archetypes: &[Archetype]) -> Self {
        let matches: Vec<u32> = archetypes
            .iter()
            .enumerate()
            .filter(|(_, arch)| arch.signature().is_superset_of(&required))
            .map(|(index, _)| index as u32)
            .collect();
        Self {
            required,
            matches: matches.into(),
            seen_archetypes: archetypes.len(),
        }
    }

    fn refresh(&mut self, archetypes: &[Archetype]) {
        if self.seen_archetypes == archetypes.len() {
            return;
        }
        let new_matches: Vec<u32> = archetypes[self.seen_archetypes..]
            .iter()
            .enumerate()
            .filter(|(_, arch)| arch.signature().is_superset_of(&self.required))
            .map(|(offset, _)| (self.seen_archetypes + offset) as u32)
            .collect();
        if !new_matches.is_empty() {
            let mut all = self.matches.to_vec();
            all.extend(new_matches);
            // Snapshot swap: readers holding the old Arc stay valid.
            self.matches = all.into();
        }
        self.seen_archetypes = archetypes.len();
    }
}

/// Owns every archetype, indexed by signature.
pub struct Archetypes {
    archetypes: Vec<Archetype>,
    index: AHashMap<Signature, u32>,
    /// `(archetype, type, added?) → archetype` edges, so repeated
    /// add/remove transitions skip the signature rebuild.
    transitions: AHashMap<(u32, ComponentTypeId, bool), u32>,
    query_cache: RwLock<AHashMap<Signature, CachedQuery>>,
}

impl Archetypes {
    pub(crate) fn new(registry: &ComponentRegistry) -> Self {
        let mut archetypes = Self {
            archetypes: Vec::with_capacity(64),
            index: AHashMap::with_capacity(64),
            transitions: AHashMap::with_capacity(128),
            query_cache: RwLock::new(AHashMap::with_capacity(32)),
        };
        // Archetype 0 is the empty signature, always present.
        let id = archetypes.get_or_create(Signature::EMPTY, registry);
        debug_assert_eq!(id, EMPTY_ARCHETYPE);
        archetypes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&Archetype> {
        self.archetypes.get(id as usize)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Signature-keyed lookup, creating (and caching) the archetype if
    /// absent.
    pub(crate) fn get_or_create(
        &mut self,
        signature: Signature,
        registry: &ComponentRegistry,
    ) -> u32 {
        if let Some(&id) = self.index.get(&signature) {
            return id;
        }
        assert!(
            self.archetypes.len() < MAX_ARCHETYPES,
            "archetype limit exceeded ({MAX_ARCHETYPES}) - runaway signature fragmentation"
        );

        let archetype = Archetype::new(signature, registry);
        self.archetypes.push(archetype);
        let id = (self.archetypes.len() - 1) as u32;
        self.index.insert(signature, id);
        id
    }

    /// The archetype an entity lands in after adding/removing one component
    /// type, through the transition edge cache.
    pub(crate) fn transition_target(
        &mut self,
        from: u32,
        type_id: ComponentTypeId,
        added: bool,
        registry: &ComponentRegistry,
    ) -> u32 {
        if let Some(&to) = self.transitions.get(&(from, type_id, added)) {
            return to;
        }
        let signature = *self.archetypes[from as usize].signature();
        let signature = if added {
            signature.with(type_id)
        } else {
            signature.without(type_id)
        };
        let to = self.get_or_create(signature, registry);
        self.transitions.insert((from, type_id, added), to);
        to
    }

    /// Cross-archetype row move. Returns the destination row and the entity
    /// (if any) that was swapped into the vacated source slot; the caller
    /// fixes up the entity table for both.
    pub(crate) fn move_entity(
        &mut self,
        src: u32,
        src_row: u32,
        dst: u32,
        extra: Option<ErasedValue>,
    ) -> (u32, Option<Entity>) {
        debug_assert_ne!(src, dst, "move between identical archetypes");
        let (src_arch, dst_arch) = if src < dst {
            let (left, right) = self.archetypes.split_at_mut(dst as usize);
            (&mut left[src as usize], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(src as usize);
            (&mut right[0], &mut left[dst as usize])
        };
        src_arch.move_row_to(src_row as usize, dst_arch, extra)
    }

    /// Archetypes whose signatures are supersets of `required`, as a cheap
    /// cloned snapshot.
    pub(crate) fn query_indices(&self, required: Signature) -> Arc<[u32]> {
        {
            let cache = self.query_cache.read();
            if let Some(cached) = cache.get(&required) {
                if cached.seen_archetypes == self.archetypes.len() {
                    return Arc::clone(&cached.matches);
                }
            }
        }

        let mut cache = self.query_cache.write();
        let cached = cache
            .entry(required)
            .or_insert_with(|| CachedQuery::new(required, &self.archetypes));
        cached.refresh(&self.archetypes);
        Arc::clone(&cached.matches)
    }
}

/// Iterator over the archetypes matching a query.
pub struct QueryIter<'w> {
    archetypes: &'w Archetypes,
    matches: Arc<[u32]>,
    position: usize,
}

impl<'w> QueryIter<'w> {
    pub(crate) fn new(archetypes: &'w Archetypes, matches: Arc<[u32]>) -> Self {
        Self {
            archetypes,
            matches,
            position: 0,
        }
    }
}

impl<'w> Iterator for QueryIter<'w> {
    type Item = &'w Archetype;

    fn next(&mut self) -> Option<Self::Item> {
        let index = *self.matches.get(self.position)?;
        self.position += 1;
        self.archetypes.get(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.matches.len() - self.position;
        (remaining, Some(remaining))
    }
}
