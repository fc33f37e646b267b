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

//! Archetype storage: structure-of-arrays, one column per component type.
//!
//! An [`Archetype`] holds exactly the entities whose component set equals
//! its signature: one densely packed [`Column`] per component type plus a
//! parallel entity-handle column. Columns are sorted by ascending
//! [`ComponentTypeId`] and looked up by binary search.
//!
//! # Safety
//!
//! Columns are manually managed byte buffers laid out for the stored
//! component type (size *and* alignment from its [`ComponentInfo`]). Typed
//! access validates the requested Rust type against the registered type, so
//! the safe accessors cannot type-confuse; the remaining `unsafe` surface is
//! the aliasing contract of shared-reference mutable column access during
//! parallel system execution, upheld by the scheduler's conflict analysis.

use std::alloc::{self, Layout};
use std::ptr;

use smallvec::SmallVec;

use crate::component::ErasedValue;
use crate::entity::Entity;
use crate::registry::{ComponentInfo, ComponentRegistry, ComponentTypeId};
use crate::signature::Signature;

/// A type-erased, densely packed, properly aligned array of component
/// values of a single type.
pub struct Column {
    data: *mut u8,
    len: usize,
    capacity: usize,
    info: ComponentInfo,
}

// SAFETY: the buffer is an exclusively-owned allocation and every stored
// type is `Component` (Send + Sync); sharing follows the archetype's rules.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    pub(crate) fn new(info: ComponentInfo) -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
            capacity: 0,
            info,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    fn layout_for_capacity(&self, capacity: usize) -> Option<Layout> {
        if self.info.size == 0 || capacity == 0 {
            return None;
        }
        Layout::from_size_align(self.info.size * capacity, self.info.align).ok()
    }

    fn grow_if_needed(&mut self) {
        if self.len < self.capacity {
            return;
        }
        self.grow_to(if self.capacity == 0 {
            4
        } else {
            self.capacity * 2
        });
    }

    fn grow_to(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity > self.capacity);
        if self.info.size == 0 {
            // ZST: bookkeeping only, no allocation.
            self.capacity = new_capacity;
            return;
        }
        let new_layout = self
            .layout_for_capacity(new_capacity)
            .expect("column layout overflow");
        // SAFETY: layouts are derived from the registered size/align; the
        // old pointer (if any) came from the same allocator with the old
        // layout.
        unsafe {
            let new_data = if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                let old_layout = self
                    .layout_for_capacity(self.capacity)
                    .expect("old layout must be valid");
                alloc::realloc(self.data, old_layout, new_layout.size())
            };
            if new_data.is_null() {
                alloc::handle_alloc_error(new_layout);
            }
            self.data = new_data;
        }
        self.capacity = new_capacity;
    }

    fn reserve(&mut self, additional: usize) {
        let needed = self.len + additional;
        if needed <= self.capacity {
            return;
        }
        let mut target = if self.capacity == 0 { 4 } else { self.capacity };
        while target < needed {
            target *= 2;
        }
        self.grow_to(target);
    }

    #[inline]
    pub(crate) fn ptr_at(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len);
        if self.info.size == 0 {
            // ZST: dangling but aligned.
            return self.info.align as *mut u8;
        }
        // SAFETY: index < len <= capacity keeps the offset in-bounds.
        unsafe { self.data.add(index * self.info.size) }
    }

    /// Reserve one slot at the end and return its pointer; the caller must
    /// initialize it before any other column operation.
    pub(crate) fn push_slot(&mut self) -> *mut u8 {
        self.grow_if_needed();
        let index = self.len;
        self.len += 1;
        if self.info.size == 0 {
            return self.info.align as *mut u8;
        }
        // SAFETY: grow_if_needed guarantees index < capacity.
        unsafe { self.data.add(index * self.info.size) }
    }

    /// Swap-remove `index`, dropping the removed value.
    pub(crate) fn swap_remove_drop(&mut self, index: usize) {
        debug_assert!(index < self.len);
        // SAFETY: the value at `index` is initialized; after the drop its
        // bytes are dead and may be overwritten by the last row.
        unsafe {
            if let Some(drop_fn) = self.info.drop_fn {
                drop_fn(self.ptr_at(index));
            }
            self.swap_down(index);
        }
        self.len -= 1;
    }

    /// Swap-remove `index` without dropping: the caller has already moved
    /// the value out.
    pub(crate) fn swap_remove_forget(&mut self, index: usize) {
        debug_assert!(index < self.len);
        // SAFETY: caller owns the value formerly at `index`.
        unsafe {
            self.swap_down(index);
        }
        self.len -= 1;
    }

    /// Move the last element's bytes into `index` (no-op if it is the last).
    unsafe fn swap_down(&mut self, index: usize) {
        let last = self.len - 1;
        if self.info.size > 0 && index != last {
            let src = self.data.add(last * self.info.size);
            let dst = self.data.add(index * self.info.size);
            ptr::copy_nonoverlapping(src, dst, self.info.size);
        }
    }

    /// Typed view of the whole column.
    ///
    /// # Safety
    /// `T` must be the type registered under this column's id (the archetype
    /// accessors verify this).
    pub(crate) unsafe fn as_slice<T>(&self) -> &[T] {
        if self.info.size == 0 {
            return std::slice::from_raw_parts(ptr::NonNull::dangling().as_ptr(), self.len);
        }
        std::slice::from_raw_parts(self.data as *const T, self.len)
    }

    /// Mutable typed view through a shared column reference.
    ///
    /// # Safety
    /// `T` must be the registered type, and the caller must guarantee the
    /// returned slice is the only live view of this column (the scheduler's
    /// conflict analysis provides this during batch execution).
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn as_mut_slice_shared<T>(&self) -> &mut [T] {
        if self.info.size == 0 {
            return std::slice::from_raw_parts_mut(ptr::NonNull::dangling().as_ptr(), self.len);
        }
        std::slice::from_raw_parts_mut(self.data as *mut T, self.len)
    }

    /// The column's raw bytes (`len * size`), for the persistence protocol.
    pub(crate) fn bytes(&self) -> &[u8] {
        if self.info.size == 0 || self.len == 0 {
            return &[];
        }
        // SAFETY: the first `len` items are initialized.
        unsafe { std::slice::from_raw_parts(self.data, self.len * self.info.size) }
    }

    /// Append `count` values from raw bytes (bulk load).
    ///
    /// # Safety
    /// `bytes` must hold exactly `count` valid values of the column's type,
    /// and ownership of those values transfers to the column.
    pub(crate) unsafe fn extend_from_bytes(&mut self, bytes: &[u8], count: usize) {
        debug_assert_eq!(bytes.len(), count * self.info.size);
        self.reserve(count);
        if self.info.size > 0 {
            let dst = self.data.add(self.len * self.info.size);
            ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        self.len += count;
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        unsafe {
            if let Some(drop_fn) = self.info.drop_fn {
                for i in 0..self.len {
                    drop_fn(self.ptr_at(i));
                }
            }
            if let Some(layout) = self.layout_for_capacity(self.capacity) {
                alloc::dealloc(self.data, layout);
            }
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("type", &self.info.name)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Storage for all entities sharing one signature.
pub struct Archetype {
    signature: Signature,
    entities: Vec<Entity>,
    /// One column per signature member, ascending by type id.
    columns: SmallVec<[Column; 8]>,
}

impl Archetype {
    /// Create an empty archetype, pre-allocating one column per type in the
    /// signature.
    pub(crate) fn new(signature: Signature, registry: &ComponentRegistry) -> Self {
        let columns = signature
            .iter()
            .map(|id| {
                let info = registry
                    .info(id)
                    .expect("signature references unregistered component type");
                Column::new(info)
            })
            .collect();
        Self {
            signature,
            entities: Vec::new(),
            columns,
        }
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of entities (== length of every column).
    #[inline]
    pub fn count(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Row capacity of the entity column.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.entities.capacity()
    }

    /// The entity-identity column.
    #[inline]
    pub fn entity_column(&self) -> &[Entity] {
        &self.entities
    }

    #[inline]
    fn column_position(&self, id: ComponentTypeId) -> Option<usize> {
        self.columns
            .binary_search_by_key(&id, |column| column.info().id)
            .ok()
    }

    #[inline]
    pub fn has_component(&self, id: ComponentTypeId) -> bool {
        self.signature.contains(id)
    }

    pub(crate) fn column(&self, id: ComponentTypeId) -> Option<&Column> {
        let position = self.column_position(id)?;
        Some(&self.columns[position])
    }

    fn column_by_id_mut(&mut self, id: ComponentTypeId) -> Option<&mut Column> {
        let position = self.column_position(id)?;
        Some(&mut self.columns[position])
    }

    #[inline]
    fn check_type<T: crate::component::Component>(info: &ComponentInfo) {
        assert_eq!(
            info.rust_type,
            std::any::TypeId::of::<T>(),
            "column for {} accessed as {}",
            info.name,
            std::any::type_name::<T>()
        );
    }

    /// Typed read-only view of a component column.
    ///
    /// Returns `None` if the archetype has no such column.
    ///
    /// # Panics
    /// Panics if `T` is not the type registered under `id`.
    pub fn column_slice<T: crate::component::Component>(
        &self,
        id: ComponentTypeId,
    ) -> Option<&[T]> {
        let column = self.column(id)?;
        Self::check_type::<T>(column.info());
        // SAFETY: type verified against the registry.
        Some(unsafe { column.as_slice::<T>() })
    }

    /// Typed mutable view of a component column.
    pub fn column_slice_mut<T: crate::component::Component>(
        &mut self,
        id: ComponentTypeId,
    ) -> Option<&mut [T]> {
        let position = self.column_position(id)?;
        let column = &self.columns[position];
        Self::check_type::<T>(column.info());
        // SAFETY: type verified; exclusivity from `&mut self`.
        Some(unsafe { column.as_mut_slice_shared::<T>() })
    }

    /// Mutable column view through a shared archetype reference, for use
    /// during parallel batch execution.
    ///
    /// # Safety
    /// The caller must guarantee no other live view of this column exists.
    /// Within a batch that is the scheduler's conflict analysis: at most one
    /// system writes a given component type.
    pub(crate) unsafe fn column_slice_mut_shared<T: crate::component::Component>(
        &self,
        id: ComponentTypeId,
    ) -> Option<&mut [T]> {
        let column = self.column(id)?;
        Self::check_type::<T>(column.info());
        Some(column.as_mut_slice_shared::<T>())
    }

    /// Raw column bytes for the persistence protocol.
    pub fn column_bytes(&self, id: ComponentTypeId) -> Option<&[u8]> {
        Some(self.column(id)?.bytes())
    }

    /// Append one row: the entity plus exactly one value per signature type,
    /// in any order (columns are resolved by type id).
    pub(crate) fn push_row(
        &mut self,
        entity: Entity,
        values: impl IntoIterator<Item = ErasedValue>,
    ) -> u32 {
        let row = self.entities.len();
        self.entities.push(entity);

        let mut filled = 0usize;
        for value in values {
            let position = self
                .column_position(value.type_id())
                .expect("component value not in archetype signature");
            let slot = self.columns[position].push_slot();
            // SAFETY: the slot was just reserved with the column's layout
            // and the value's type id matches the column.
            unsafe {
                value.write_to(slot);
            }
            filled += 1;
        }
        debug_assert_eq!(filled, self.columns.len(), "row is missing component values");
        row as u32
    }

    /// Swap-and-pop the row, dropping its component values. Returns the
    /// entity that was relocated into `row`, if any, so the entity table
    /// can be fixed up.
    pub(crate) fn swap_remove_row(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            column.swap_remove_drop(row);
        }
        self.entities.swap_remove(row);
        if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Replace the value at `row` for `value`'s component type in place
    /// (the double-add path: signature unchanged, last write wins).
    pub(crate) fn overwrite_component(&mut self, row: usize, value: ErasedValue) {
        let column = self
            .column_by_id_mut(value.type_id())
            .expect("overwrite of component not in archetype");
        // SAFETY: old value dropped exactly once, then the slot is dead
        // bytes that the incoming value takes over.
        unsafe {
            if let Some(drop_fn) = column.info().drop_fn {
                drop_fn(column.ptr_at(row));
            }
            value.write_to(column.ptr_at(row));
        }
    }

    /// Move the row into `target`: copy the values for the signature
    /// intersection, write `extra` into any column `target` has that `self`
    /// lacks, drop values whose types `target` lacks, then swap-and-pop the
    /// source row.
    ///
    /// Returns `(target_row, entity_swapped_into_source_row)`.
    pub(crate) fn move_row_to(
        &mut self,
        row: usize,
        target: &mut Archetype,
        extra: Option<ErasedValue>,
    ) -> (u32, Option<Entity>) {
        debug_assert!(row < self.entities.len());
        let entity = self.entities[row];
        let target_row = target.entities.len();
        target.entities.push(entity);

        let mut extra = extra;
        for column in target.columns.iter_mut() {
            let id = column.info().id;
            match self.column_position(id) {
                Some(position) => {
                    let src = self.columns[position].ptr_at(row);
                    let dst = column.push_slot();
                    // SAFETY: same type on both sides; ownership of the
                    // source bytes transfers (the source slot is forgotten
                    // below).
                    unsafe {
                        ptr::copy_nonoverlapping(src, dst, column.info().size);
                    }
                }
                None => {
                    let value = extra
                        .take()
                        .expect("transition adds a column but no value was supplied");
                    debug_assert_eq!(value.type_id(), id);
                    let dst = column.push_slot();
                    // SAFETY: slot reserved for exactly this type.
                    unsafe {
                        value.write_to(dst);
                    }
                }
            }
        }
        debug_assert!(extra.is_none(), "extra component value was not consumed");

        for column in self.columns.iter_mut() {
            if target.signature.contains(column.info().id) {
                column.swap_remove_forget(row);
            } else {
                // Component removed by this transition.
                column.swap_remove_drop(row);
            }
        }
        self.entities.swap_remove(row);

        let swapped = if row < self.entities.len() {
            Some(self.entities[row])
        } else {
            None
        };
        (target_row as u32, swapped)
    }

    /// Bulk-append rows from snapshot payloads.
    ///
    /// `columns` must provide one byte payload per signature type, each
    /// holding exactly `entities.len()` values.
    pub(crate) fn load_rows(
        &mut self,
        entities: &[Entity],
        columns: &[(ComponentTypeId, &[u8])],
    ) -> crate::error::Result<()> {
        use crate::error::EcsError;

        if columns.len() != self.columns.len() {
            return Err(EcsError::SnapshotMismatch(format!(
                "archetype expects {} columns, snapshot has {}",
                self.columns.len(),
                columns.len()
            )));
        }
        for &(id, bytes) in columns {
            let Some(position) = self.column_position(id) else {
                return Err(EcsError::SnapshotMismatch(format!(
                    "snapshot column type {:?} not in archetype signature",
                    id
                )));
            };
            let column = &self.columns[position];
            if bytes.len() != entities.len() * column.info().size {
                return Err(EcsError::SnapshotMismatch(format!(
                    "column {} payload is {} bytes, expected {}",
                    column.info().name,
                    bytes.len(),
                    entities.len() * column.info().size
                )));
            }
        }

        self.entities.extend_from_slice(entities);
        for &(id, bytes) in columns {
            let position = self.column_position(id).unwrap();
            // SAFETY: sizes validated above; snapshot payloads are valid
            // values per the load contract (drop-free types only).
            unsafe {
                self.columns[position].extend_from_bytes(bytes, entities.len());
            }
        }
        Ok(())
    }

    /// Debug check: every column has the same length as the entity column
    /// and capacity covering it.
    pub(crate) fn columns_consistent(&self) -> bool {
        self.columns.iter().all(|column| {
            column.len() == self.entities.len()
                && (column.info().size == 0 || column.capacity() >= column.len())
        })
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("types", &self.signature.len())
            .field("count", &self.entities.len())
            .finish()
    }
}
