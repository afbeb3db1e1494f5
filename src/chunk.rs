// Copyright 2024 Saptak Santra
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

//! Archetypes and the chunk that stores their rows column-major.
//!
//! Per spec §4.5(b) this implementation allocates a single chunk per
//! archetype and grows it via `resize` rather than spawning additional
//! fixed-capacity chunks once full (a deliberate simplification of the
//! original's `1<<16`-byte, fixed-capacity `ArchetypeChunk`).

use rustc_hash::FxHashMap;

use crate::config::EcsConfig;
use crate::entity::Entity;
use crate::job::JobHandle;
use crate::mask::ArchetypeMask;
use crate::type_registry::ComponentType;

/// The exact set of component types attached to an entity, addressed by a
/// mask. Value-typed; two archetypes are equal iff `(mask, row_size)` are
/// equal (spec §3).
#[derive(Debug, Clone)]
pub struct EntityArchetype {
    /// Ordered as supplied by the creator; semantic equality ignores order
    /// (it is carried by `mask`).
    pub component_types: Vec<ComponentType>,
    pub mask: ArchetypeMask,
    /// Sum of component sizes plus the fixed `Entity` slot every row
    /// carries inline.
    pub row_size: u32,
}

impl EntityArchetype {
    pub fn new(component_types: Vec<ComponentType>) -> Self {
        let mut mask = ArchetypeMask::new();
        let mut row_size = std::mem::size_of::<Entity>() as u32;
        for ct in &component_types {
            mask.enable(ct.type_id);
            row_size += ct.size;
        }
        Self {
            component_types,
            mask,
            row_size,
        }
    }

    pub fn column_index(&self, type_id: u32) -> Option<usize> {
        self.component_types.iter().position(|ct| ct.type_id == type_id)
    }
}

impl PartialEq for EntityArchetype {
    fn eq(&self, other: &Self) -> bool {
        self.mask == other.mask && self.row_size == other.row_size
    }
}
impl Eq for EntityArchetype {}

/// One component's growable byte array plus its scheduling handles.
struct ComponentColumn {
    type_id: u32,
    item_size: usize,
    data: Vec<u8>,
    dtor: Option<unsafe fn(*mut u8)>,
    write_handle: JobHandle,
    read_handle: JobHandle,
}

impl ComponentColumn {
    fn new(ct: &ComponentType, capacity: usize) -> Self {
        Self {
            type_id: ct.type_id,
            item_size: ct.size as usize,
            data: vec![0u8; ct.size as usize * capacity],
            dtor: ct.dtor,
            write_handle: JobHandle::NONE,
            read_handle: JobHandle::NONE,
        }
    }

    fn grow_to(&mut self, capacity: usize) {
        self.data.resize(self.item_size * capacity, 0);
    }

    unsafe fn ptr_mut(&mut self, row: usize) -> *mut u8 {
        self.data.as_mut_ptr().add(row * self.item_size)
    }

    unsafe fn ptr(&self, row: usize) -> *const u8 {
        self.data.as_ptr().add(row * self.item_size)
    }

    unsafe fn drop_row(&mut self, row: usize) {
        if let Some(dtor) = self.dtor {
            let p = self.ptr_mut(row);
            dtor(p);
        }
    }

    unsafe fn copy_row(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let (src, dst);
        unsafe {
            src = self.ptr(from);
            dst = self.ptr_mut(to);
            std::ptr::copy_nonoverlapping(src, dst, self.item_size);
        }
    }
}

/// SoA storage for one archetype. Owns every column's byte buffer plus the
/// inline `Entity` column, and a per-column `(write_handle, read_handle)`
/// scheduling slot.
pub struct ArchetypeChunk {
    archetype: EntityArchetype,
    entities: Vec<Entity>,
    columns: Vec<ComponentColumn>,
    column_lookup: FxHashMap<u32, usize>,
    count: u32,
    capacity: u32,
}

impl ArchetypeChunk {
    pub fn new(archetype: EntityArchetype, config: &EcsConfig) -> Self {
        let capacity = (config.chunk_bytes / archetype.row_size.max(1) as usize).max(1);
        let mut column_lookup = FxHashMap::default();
        let columns = archetype
            .component_types
            .iter()
            .enumerate()
            .map(|(i, ct)| {
                column_lookup.insert(ct.type_id, i);
                ComponentColumn::new(ct, capacity)
            })
            .collect();
        Self {
            archetype,
            entities: Vec::with_capacity(capacity),
            columns,
            column_lookup,
            count: 0,
            capacity: capacity as u32,
        }
    }

    /// Rebuild a chunk wholesale from deserialized rows (spec §6's
    /// `transfer` contract). `column_data[i]` must hold exactly
    /// `entities.len() * archetype.component_types[i].size` bytes, in row
    /// order.
    pub fn from_rows(archetype: EntityArchetype, entities: &[Entity], column_data: &[Vec<u8>], config: &EcsConfig) -> Self {
        let types = archetype.component_types.clone();
        let mut chunk = ArchetypeChunk::new(archetype, config);
        for (row_idx, &entity) in entities.iter().enumerate() {
            let row = chunk.push_back();
            chunk.set_entity(row, entity);
            for (ct, bytes) in types.iter().zip(column_data.iter()) {
                let item_size = ct.size as usize;
                let src = &bytes[row_idx * item_size..(row_idx + 1) * item_size];
                unsafe { chunk.init_raw(ct.type_id, row, src.as_ptr()) };
            }
        }
        chunk
    }

    pub fn archetype(&self) -> &EntityArchetype {
        &self.archetype
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities[..self.count as usize]
    }

    /// Reserve a new row, growing the backing buffers if full. Content is
    /// uninitialized (including the entity slot, which the caller must set
    /// via [`Self::set_entity`]). Returns the row index.
    pub fn push_back(&mut self) -> u32 {
        if self.count == self.capacity {
            let new_capacity = (self.capacity.max(1) * 2) as usize;
            for col in &mut self.columns {
                col.grow_to(new_capacity);
            }
            self.capacity = new_capacity as u32;
        }
        let row = self.count;
        if (row as usize) == self.entities.len() {
            self.entities.push(Entity::new(0, 0));
        }
        self.count += 1;
        row
    }

    pub fn set_entity(&mut self, row: u32, entity: Entity) {
        self.entities[row as usize] = entity;
    }

    pub fn column_index(&self, type_id: u32) -> Option<usize> {
        self.column_lookup.get(&type_id).copied()
    }

    /// Raw byte copy of `size(type)` bytes into `row`'s slot for `type_id`,
    /// first dropping whatever value already lives there. Only valid when
    /// `row` already holds a live value for `type_id` (a genuine re-set);
    /// for first-time initialization of a row just returned by
    /// [`Self::push_back`], use [`Self::init_raw`] instead — the row's bytes
    /// are only zero-filled there, not a valid `T`, and dropping them is UB.
    ///
    /// # Safety
    /// `src` must point to at least `item_size` readable bytes, and the
    /// caller is responsible for not creating aliasing typed references
    /// into the destination while this call is in flight.
    pub unsafe fn set_raw(&mut self, type_id: u32, row: u32, src: *const u8) {
        let idx = self.column_index(type_id).expect("component not present in chunk's archetype");
        let col = &mut self.columns[idx];
        unsafe {
            col.drop_row(row as usize);
            let dst = col.ptr_mut(row as usize);
            std::ptr::copy_nonoverlapping(src, dst, col.item_size);
        }
    }

    /// Raw byte copy of `size(type)` bytes into `row`'s slot for `type_id`,
    /// without dropping any prior value. Use this to populate a row that was
    /// just reserved via [`Self::push_back`] (or otherwise does not yet hold
    /// a live `T`) — the destination bytes are zero-filled, not a valid
    /// value, so running a destructor over them first is undefined behavior.
    ///
    /// # Safety
    /// `src` must point to at least `item_size` readable bytes, `row` must
    /// not already hold a live value for `type_id`, and the caller is
    /// responsible for not creating aliasing typed references into the
    /// destination while this call is in flight.
    pub unsafe fn init_raw(&mut self, type_id: u32, row: u32, src: *const u8) {
        let idx = self.column_index(type_id).expect("component not present in chunk's archetype");
        let col = &mut self.columns[idx];
        unsafe {
            let dst = col.ptr_mut(row as usize);
            std::ptr::copy_nonoverlapping(src, dst, col.item_size);
        }
    }

    /// # Safety
    /// Caller must ensure `row < count` and that no other reference to this
    /// column aliases the returned pointer mutably.
    pub unsafe fn get_raw(&self, type_id: u32, row: u32) -> *const u8 {
        let idx = self.column_index(type_id).expect("component not present in chunk's archetype");
        unsafe { self.columns[idx].ptr(row as usize) }
    }

    /// # Safety
    /// Caller must ensure `row < count` and exclusive access.
    pub unsafe fn get_raw_mut(&mut self, type_id: u32, row: u32) -> *mut u8 {
        let idx = self.column_index(type_id).expect("component not present in chunk's archetype");
        unsafe { self.columns[idx].ptr_mut(row as usize) }
    }

    /// Calls each column's destructor on `row` if present, then byte-copies
    /// the last row into `row` for every column (and the entity slot).
    /// `count -= 1`. Returns the entity that occupied the last row before
    /// the swap, if that differs from the removed row's entity (the caller
    /// is responsible for updating that entity's indexer entry).
    pub fn remove_swap_back(&mut self, row: u32) -> Option<Entity> {
        assert!(row < self.count, "remove_swap_back: row out of bounds");
        let last = self.count - 1;
        for col in &mut self.columns {
            unsafe {
                col.drop_row(row as usize);
                if row != last {
                    col.copy_row(last as usize, row as usize);
                }
            }
        }
        let moved = if row != last {
            let e = self.entities[last as usize];
            self.entities[row as usize] = e;
            Some(e)
        } else {
            None
        };
        self.count -= 1;
        moved
    }

    /// Run `type_id`'s destructor on `row` without touching any other
    /// column. Used by structural migration (`add_component`/
    /// `remove_component`) to dispose of the one column that is not being
    /// carried over to the destination archetype, before [`Self::relocate_out`]
    /// reclaims the row.
    pub fn drop_column_value(&mut self, type_id: u32, row: u32) {
        if let Some(idx) = self.column_index(type_id) {
            unsafe { self.columns[idx].drop_row(row as usize) };
        }
    }

    /// Same swap-back mechanics as [`Self::remove_swap_back`] but runs no
    /// destructors: every column's bytes at `row` have already been moved
    /// (byte-copied) to a row in another chunk by the caller, so dropping
    /// them here would destroy a resource the destination row now also
    /// references. Returns the entity that occupied the last row, if the
    /// swap moved one.
    pub fn relocate_out(&mut self, row: u32) -> Option<Entity> {
        assert!(row < self.count, "relocate_out: row out of bounds");
        let last = self.count - 1;
        if row != last {
            for col in &mut self.columns {
                unsafe { col.copy_row(last as usize, row as usize) };
            }
        }
        let moved = if row != last {
            let e = self.entities[last as usize];
            self.entities[row as usize] = e;
            Some(e)
        } else {
            None
        };
        self.count -= 1;
        moved
    }

    /// Raw bytes for `type_id`'s column over the live `[0, count)` range, in
    /// row order. Used by [`crate::serialize`] to bulk-transfer a column
    /// without per-element dispatch.
    pub fn column_bytes(&self, type_id: u32) -> Option<&[u8]> {
        let idx = self.column_index(type_id)?;
        let col = &self.columns[idx];
        Some(&col.data[..self.count as usize * col.item_size])
    }

    /// Per-column handle pair for job scheduling.
    pub fn handles(&mut self, type_id: u32) -> Option<(&mut JobHandle, &mut JobHandle)> {
        let idx = self.column_index(type_id)?;
        let col = &mut self.columns[idx];
        Some((&mut col.write_handle, &mut col.read_handle))
    }

    pub fn write_handle(&self, type_id: u32) -> Option<JobHandle> {
        let idx = self.column_index(type_id)?;
        Some(self.columns[idx].write_handle)
    }

    pub fn read_handle(&self, type_id: u32) -> Option<JobHandle> {
        let idx = self.column_index(type_id)?;
        Some(self.columns[idx].read_handle)
    }

    pub fn set_write_handle(&mut self, type_id: u32, handle: JobHandle) {
        if let Some(idx) = self.column_index(type_id) {
            self.columns[idx].write_handle = handle;
        }
    }

    pub fn set_read_handle(&mut self, type_id: u32, handle: JobHandle) {
        if let Some(idx) = self.column_index(type_id) {
            self.columns[idx].read_handle = handle;
        }
    }

    /// Archetype-equal and per-column byte-equal over the live `[0,
    /// count)` range (spec §4.2's equality operator, consistently using
    /// full archetype equality per §9's resolved open question).
    pub fn live_equals(&self, other: &ArchetypeChunk) -> bool {
        if self.archetype != other.archetype || self.count != other.count {
            return false;
        }
        if self.entities() != other.entities() {
            return false;
        }
        for (a, b) in self.columns.iter().zip(other.columns.iter()) {
            let len = self.count as usize * a.item_size;
            if a.data[..len] != b.data[..len] {
                return false;
            }
        }
        true
    }
}

impl Drop for ArchetypeChunk {
    fn drop(&mut self) {
        for col in &mut self.columns {
            for row in 0..self.count as usize {
                unsafe { col.drop_row(row) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_registry::TypeRegistry;

    struct A(i32);

    fn archetype_a(reg: &mut TypeRegistry) -> EntityArchetype {
        EntityArchetype::new(vec![reg.get_or_register::<A>()])
    }

    #[test]
    fn push_back_and_raw_roundtrip() {
        let mut reg = TypeRegistry::new();
        let ct = reg.get_or_register::<A>();
        let archetype = archetype_a(&mut reg);
        let mut chunk = ArchetypeChunk::new(archetype, &EcsConfig::default());
        let e = Entity::new(0, 0);
        let row = chunk.push_back();
        chunk.set_entity(row, e);
        let value = A(42);
        unsafe {
            chunk.init_raw(ct.type_id, row, &value as *const A as *const u8);
        }
        std::mem::forget(value);
        let got = unsafe { &*(chunk.get_raw(ct.type_id, row) as *const A) };
        assert_eq!(got.0, 42);
    }

    #[test]
    fn remove_swap_back_moves_last_row() {
        let mut reg = TypeRegistry::new();
        let ct = reg.get_or_register::<A>();
        let archetype = archetype_a(&mut reg);
        let mut chunk = ArchetypeChunk::new(archetype, &EcsConfig::default());
        let e0 = Entity::new(0, 0);
        let e1 = Entity::new(1, 0);
        let e2 = Entity::new(2, 0);
        for (e, v) in [(e0, 10), (e1, 20), (e2, 30)] {
            let row = chunk.push_back();
            chunk.set_entity(row, e);
            let value = A(v);
            unsafe { chunk.init_raw(ct.type_id, row, &value as *const A as *const u8) };
            std::mem::forget(value);
        }
        // remove row 0 (e0); e2 (last) should swap into row 0.
        let moved = chunk.remove_swap_back(0);
        assert_eq!(moved, Some(e2));
        assert_eq!(chunk.count(), 2);
        assert_eq!(chunk.entities(), &[e2, e1]);
        let v0 = unsafe { &*(chunk.get_raw(ct.type_id, 0) as *const A) };
        assert_eq!(v0.0, 30);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut reg = TypeRegistry::new();
        let _ct = reg.get_or_register::<A>();
        let archetype = archetype_a(&mut reg);
        let mut config = EcsConfig::default();
        config.chunk_bytes = 32; // force a tiny initial capacity
        let mut chunk = ArchetypeChunk::new(archetype, &config);
        let initial_cap = chunk.capacity();
        for i in 0..(initial_cap as i32 * 3) {
            let row = chunk.push_back();
            chunk.set_entity(row, Entity::new(i as u32, 0));
        }
        assert!(chunk.capacity() >= initial_cap * 2);
        assert_eq!(chunk.count(), initial_cap * 3);
    }
}
