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

//! Component trait, type-erased values, and entity blueprints.
//!
//! Structural-change queues carry component values as [`ErasedValue`]s: a
//! dense type id plus the value's bytes. Values up to
//! [`INLINE_VALUE_BYTES`] with alignment ≤ 16 live inline in the queue
//! entry; larger or over-aligned values spill to a dedicated aligned heap
//! allocation. Either way the value carries its own drop function, so a
//! payload that is never consumed (its target entity died first) is cleaned
//! up correctly when the queue entry is dropped.

use std::alloc::{self, Layout};
use std::mem::ManuallyDrop;
use std::ptr::{self, NonNull};

use smallvec::SmallVec;

use crate::registry::{ComponentRegistry, ComponentTypeId};
use crate::signature::Signature;

/// Marker trait for components.
///
/// Components must be `'static` (no borrowed data) and sendable across the
/// worker pool.
pub trait Component: 'static + Send + Sync {}

/// Automatically implement Component for all valid types
impl<T: 'static + Send + Sync> Component for T {}

/// Values at most this many bytes (and at most 16-aligned) are stored inline
/// in queue entries.
pub const INLINE_VALUE_BYTES: usize = 64;

const INLINE_VALUE_ALIGN: usize = 16;

#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct InlineBuf {
    bytes: [u8; INLINE_VALUE_BYTES],
}

#[derive(Clone, Copy)]
enum ValueRepr {
    Inline(InlineBuf),
    Spilled(NonNull<u8>),
}

/// A type-erased component value: the payload of the add-component and
/// create-entity queues.
pub struct ErasedValue {
    type_id: ComponentTypeId,
    size: usize,
    align: usize,
    drop_fn: Option<unsafe fn(*mut u8)>,
    repr: ValueRepr,
}

// SAFETY: the payload is always a `T: Component` (Send + Sync), the value
// has no interior mutability, and the spilled pointer is an
// exclusively-owned allocation.
unsafe impl Send for ErasedValue {}
unsafe impl Sync for ErasedValue {}

impl ErasedValue {
    /// Erase `value`, registering `T` if needed.
    pub fn new<T: Component>(registry: &ComponentRegistry, value: T) -> Self {
        let type_id = registry.id_of::<T>();
        let size = std::mem::size_of::<T>();
        let align = std::mem::align_of::<T>();
        let drop_fn = registry.info(type_id).and_then(|info| info.drop_fn);

        let repr = if size == 0 || (size <= INLINE_VALUE_BYTES && align <= INLINE_VALUE_ALIGN) {
            let mut buf = InlineBuf {
                bytes: [0; INLINE_VALUE_BYTES],
            };
            // SAFETY: the buffer is 16-aligned and large enough; size == 0
            // writes nothing through the (then dangling-but-aligned) pointer.
            unsafe {
                ptr::write(Self::inline_ptr::<T>(&mut buf), value);
            }
            ValueRepr::Inline(buf)
        } else {
            // SAFETY: size > 0 here, so the layout is non-zero-sized.
            unsafe {
                let layout = Layout::new::<T>();
                let data = alloc::alloc(layout);
                let Some(data) = NonNull::new(data) else {
                    alloc::handle_alloc_error(layout);
                };
                ptr::write(data.as_ptr().cast::<T>(), value);
                ValueRepr::Spilled(data)
            }
        };

        Self {
            type_id,
            size,
            align,
            drop_fn,
            repr,
        }
    }

    fn inline_ptr<T>(buf: &mut InlineBuf) -> *mut T {
        if std::mem::size_of::<T>() == 0 {
            std::mem::align_of::<T>() as *mut T
        } else {
            buf.bytes.as_mut_ptr().cast::<T>()
        }
    }

    /// Build a value from raw bytes tagged with a registered type id.
    ///
    /// This is the opaque-payload boundary for host code (and the snapshot
    /// loader): the bytes are copied into the queue-entry representation.
    ///
    /// # Safety
    /// `bytes` must be the exact byte representation of a valid, initialized
    /// value of the type registered under `id`, and logical ownership of
    /// that value transfers to the returned `ErasedValue` (the caller must
    /// not drop the original).
    ///
    /// # Panics
    /// Panics if `id` is not registered or `bytes` has the wrong length.
    pub unsafe fn from_raw_parts(
        registry: &ComponentRegistry,
        id: ComponentTypeId,
        bytes: &[u8],
    ) -> Self {
        let info = registry.info(id).expect("component type not registered");
        assert_eq!(bytes.len(), info.size, "payload size mismatch for {}", info.name);

        let repr = if info.size == 0
            || (info.size <= INLINE_VALUE_BYTES && info.align <= INLINE_VALUE_ALIGN)
        {
            let mut buf = InlineBuf {
                bytes: [0; INLINE_VALUE_BYTES],
            };
            buf.bytes[..info.size].copy_from_slice(bytes);
            ValueRepr::Inline(buf)
        } else {
            let layout = Layout::from_size_align(info.size, info.align)
                .expect("invalid component layout");
            let data = alloc::alloc(layout);
            let Some(data) = NonNull::new(data) else {
                alloc::handle_alloc_error(layout);
            };
            ptr::copy_nonoverlapping(bytes.as_ptr(), data.as_ptr(), info.size);
            ValueRepr::Spilled(data)
        };

        Self {
            type_id: id,
            size: info.size,
            align: info.align,
            drop_fn: info.drop_fn,
            repr,
        }
    }

    #[inline]
    pub fn type_id(&self) -> ComponentTypeId {
        self.type_id
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    fn payload_ptr(&self) -> *const u8 {
        if self.size == 0 {
            return self.align as *const u8;
        }
        match &self.repr {
            ValueRepr::Inline(buf) => buf.bytes.as_ptr(),
            ValueRepr::Spilled(data) => data.as_ptr(),
        }
    }

    /// Move the payload into `dst`, consuming the value without dropping it.
    ///
    /// # Safety
    /// `dst` must be valid for `self.size()` bytes, properly aligned for the
    /// erased type, and must not overlap the payload. The destination takes
    /// over ownership of the value.
    pub(crate) unsafe fn write_to(self, dst: *mut u8) {
        let me = ManuallyDrop::new(self);
        if me.size > 0 {
            ptr::copy_nonoverlapping(me.payload_ptr(), dst, me.size);
        }
        if let ValueRepr::Spilled(data) = me.repr {
            // The bytes moved out; free the spill allocation only.
            alloc::dealloc(
                data.as_ptr(),
                Layout::from_size_align_unchecked(me.size, me.align),
            );
        }
    }
}

impl Drop for ErasedValue {
    fn drop(&mut self) {
        unsafe {
            if let Some(drop_fn) = self.drop_fn {
                drop_fn(self.payload_ptr() as *mut u8);
            }
            if let ValueRepr::Spilled(data) = self.repr {
                if self.size > 0 {
                    alloc::dealloc(
                        data.as_ptr(),
                        Layout::from_size_align_unchecked(self.size, self.align),
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for ErasedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedValue")
            .field("type_id", &self.type_id)
            .field("size", &self.size)
            .finish()
    }
}

/// Components a blueprint can hold inline before heap spill.
pub const MAX_BLUEPRINT_COMPONENTS: usize = 8;

/// A data-oriented recipe for a deferred entity creation: the component
/// values the new entity starts with.
///
/// Setting the same component type twice replaces the earlier value.
#[derive(Default, Debug)]
pub struct EntityBlueprint {
    values: SmallVec<[ErasedValue; MAX_BLUEPRINT_COMPONENTS]>,
}

impl EntityBlueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a component value.
    pub fn set<T: Component>(&mut self, registry: &ComponentRegistry, value: T) -> &mut Self {
        self.set_erased(ErasedValue::new(registry, value));
        self
    }

    /// Builder-style [`set`](Self::set).
    pub fn with<T: Component>(mut self, registry: &ComponentRegistry, value: T) -> Self {
        self.set(registry, value);
        self
    }

    /// Add (or replace) an already-erased value.
    pub fn set_erased(&mut self, value: ErasedValue) -> &mut Self {
        if let Some(existing) = self
            .values
            .iter_mut()
            .find(|v| v.type_id() == value.type_id())
        {
            *existing = value;
        } else {
            self.values.push(value);
        }
        self
    }

    /// The signature the new entity will materialize with.
    pub fn signature(&self) -> Signature {
        let mut sig = Signature::new();
        for value in &self.values {
            sig.insert(value.type_id());
        }
        sig
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn into_values(self) -> SmallVec<[ErasedValue; MAX_BLUEPRINT_COMPONENTS]> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Small {
        a: u64,
        b: u64,
    }

    // 128 bytes: forces the spill path.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Large {
        data: [u64; 16],
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn inline_round_trip() {
        let registry = ComponentRegistry::new();
        let value = ErasedValue::new(&registry, Small { a: 7, b: 9 });
        assert_eq!(value.size(), 16);

        let mut out = Small { a: 0, b: 0 };
        unsafe { value.write_to(&mut out as *mut Small as *mut u8) };
        assert_eq!(out, Small { a: 7, b: 9 });
    }

    #[test]
    fn spilled_round_trip() {
        let registry = ComponentRegistry::new();
        let source = Large { data: [3; 16] };
        let value = ErasedValue::new(&registry, source);
        assert_eq!(value.size(), 128);

        let mut out = Large { data: [0; 16] };
        unsafe { value.write_to(&mut out as *mut Large as *mut u8) };
        assert_eq!(out, source);
    }

    #[test]
    fn unconsumed_value_is_dropped() {
        let registry = ComponentRegistry::new();
        let drops = Arc::new(AtomicUsize::new(0));
        let value = ErasedValue::new(&registry, DropCounter(Arc::clone(&drops)));
        drop(value);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn consumed_value_is_not_double_dropped() {
        let registry = ComponentRegistry::new();
        let drops = Arc::new(AtomicUsize::new(0));
        let value = ErasedValue::new(&registry, DropCounter(Arc::clone(&drops)));

        let mut slot = std::mem::MaybeUninit::<DropCounter>::uninit();
        unsafe {
            value.write_to(slot.as_mut_ptr() as *mut u8);
            // Ownership moved into the slot; dropping it is the only drop.
            slot.assume_init_drop();
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_sized_components() {
        #[derive(Debug, Clone, Copy)]
        struct Tag;

        let registry = ComponentRegistry::new();
        let value = ErasedValue::new(&registry, Tag);
        assert_eq!(value.size(), 0);
        let mut out = std::mem::MaybeUninit::<Tag>::uninit();
        unsafe { value.write_to(out.as_mut_ptr() as *mut u8) };
    }

    #[test]
    fn blueprint_replaces_duplicate_types() {
        let registry = ComponentRegistry::new();
        let mut blueprint = EntityBlueprint::new();
        blueprint.set(&registry, Small { a: 1, b: 1 });
        blueprint.set(&registry, Small { a: 2, b: 2 });
        assert_eq!(blueprint.len(), 1);
        assert_eq!(blueprint.signature().len(), 1);

        let values = blueprint.into_values();
        let mut out = Small { a: 0, b: 0 };
        unsafe {
            values
                .into_iter()
                .next()
                .unwrap()
                .write_to(&mut out as *mut Small as *mut u8)
        };
        assert_eq!(out, Small { a: 2, b: 2 });
    }

    #[test]
    fn from_raw_parts_copies_bytes() {
        let registry = ComponentRegistry::new();
        let id = registry.id_of::<Small>();
        let source = Small { a: 11, b: 13 };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                &source as *const Small as *const u8,
                std::mem::size_of::<Small>(),
            )
        };
        let value = unsafe { ErasedValue::from_raw_parts(&registry, id, bytes) };
        let mut out = Small { a: 0, b: 0 };
        unsafe { value.write_to(&mut out as *mut Small as *mut u8) };
        assert_eq!(out, source);
    }
}
