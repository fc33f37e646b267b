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

//! Component type registry.
//!
//! Mints one dense [`ComponentTypeId`] per Rust component type on first use
//! and holds its immutable metadata. Dense ids index directly into
//! [`Signature`](crate::signature::Signature) bitsets and archetype column
//! tables, unlike `std::any::TypeId` which is opaque.
//!
//! Registration is thread-safe (double-checked under a `RwLock`); after the
//! world's warm-up frames every call is a read-lock lookup.

use std::any::TypeId;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::component::Component;

/// Upper bound on distinct component types per world.
///
/// Sized so a [`Signature`](crate::signature::Signature) stays four words.
/// Exceeding it is a fatal configuration error.
pub const MAX_COMPONENT_TYPES: usize = 256;

/// Dense component type id, starting at 0 in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentTypeId(u32);

impl ComponentTypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_COMPONENT_TYPES);
        Self(index as u32)
    }
}

/// Immutable per-type metadata, fixed at registration.
#[derive(Clone, Copy)]
pub struct ComponentInfo {
    pub id: ComponentTypeId,
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    /// Drop a single value in place. `None` for trivially-droppable types.
    pub drop_fn: Option<unsafe fn(*mut u8)>,
    /// The Rust type behind this id, for typed-access validation.
    pub(crate) rust_type: TypeId,
}

impl std::fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("needs_drop", &self.drop_fn.is_some())
            .finish()
    }
}

unsafe fn drop_in_place_erased<T>(ptr: *mut u8) {
    unsafe { std::ptr::drop_in_place(ptr as *mut T) }
}

#[derive(Default)]
struct RegistryInner {
    by_rust_type: FxHashMap<TypeId, ComponentTypeId>,
    infos: Vec<ComponentInfo>,
}

/// Thread-safe dense type id registry.
pub struct ComponentRegistry {
    inner: RwLock<RegistryInner>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Return the dense id for `T`, registering it on first use.
    ///
    /// # Panics
    /// Panics if more than [`MAX_COMPONENT_TYPES`] types are registered.
    pub fn id_of<T: Component>(&self) -> ComponentTypeId {
        let rust_type = TypeId::of::<T>();

        if let Some(&id) = self.inner.read().by_rust_type.get(&rust_type) {
            return id;
        }

        let mut inner = self.inner.write();
        // Double-check: another thread may have registered between locks.
        if let Some(&id) = inner.by_rust_type.get(&rust_type) {
            return id;
        }

        let index = inner.infos.len();
        if index >= MAX_COMPONENT_TYPES {
            tracing::error!(
                type_name = std::any::type_name::<T>(),
                "component type space exhausted ({MAX_COMPONENT_TYPES} types)"
            );
            panic!("component type space exhausted ({MAX_COMPONENT_TYPES} types)");
        }

        let id = ComponentTypeId(index as u32);
        inner.infos.push(ComponentInfo {
            id,
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(drop_in_place_erased::<T>)
            } else {
                None
            },
            rust_type,
        });
        inner.by_rust_type.insert(rust_type, id);
        id
    }

    /// Look up the id of an already-registered type without registering it.
    pub fn lookup<T: Component>(&self) -> Option<ComponentTypeId> {
        self.inner.read().by_rust_type.get(&TypeId::of::<T>()).copied()
    }

    /// Metadata for a registered id.
    pub fn info(&self, id: ComponentTypeId) -> Option<ComponentInfo> {
        self.inner.read().infos.get(id.index()).copied()
    }

    pub fn is_registered(&self, id: ComponentTypeId) -> bool {
        id.index() < self.type_count()
    }

    /// Number of registered component types.
    pub fn type_count(&self) -> usize {
        self.inner.read().infos.len()
    }

    /// Registered type names in registration order (the snapshot manifest).
    pub(crate) fn type_names(&self) -> Vec<&'static str> {
        self.inner.read().infos.iter().map(|info| info.name).collect()
    }

    /// True if any registered type has a non-trivial drop.
    pub(crate) fn first_drop_type(&self) -> Option<&'static str> {
        self.inner
            .read()
            .infos
            .iter()
            .find(|info| info.drop_fn.is_some())
            .map(|info| info.name)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
