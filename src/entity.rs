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

//! Entity identity and the indexer that maps an entity to its row.

/// A stable entity identity: a dense `index` plus a `version` that is
/// bumped on every destroy/recycle so stale handles can be detected in
/// O(1). Two entities are equal iff both fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub index: u32,
    pub version: u32,
}

impl Entity {
    pub(crate) fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }
}

/// Where a live entity's row currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub chunk_idx: u32,
    pub row: u32,
    pub version: u32,
}

/// Dense vector of slots plus a LIFO free-list of recycled indices.
///
/// Invariants: a live entity's slot points to a chunk-row whose inline
/// `Entity` value equals the entity; destroying bumps the slot's version by
/// one, so stale handles fail [`EntityIndexer::is_live`] forever. The
/// free-list is LIFO so recently-destroyed indices are reused first,
/// keeping `index` dense.
#[derive(Debug, Default)]
pub struct EntityIndexer {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EntityIndexer {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Allocate a new entity pointing at `(chunk_idx, row)`.
    pub fn create(&mut self, chunk_idx: u32, row: u32) -> Entity {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.chunk_idx = chunk_idx;
            slot.row = row;
            Entity::new(index, slot.version)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                chunk_idx,
                row,
                version: 0,
            });
            Entity::new(index, 0)
        }
    }

    /// Destroy `entity`. No-op (per spec §7's silent stale-entity policy)
    /// if `entity` is not currently live.
    pub fn destroy(&mut self, entity: Entity) {
        if !self.is_live(entity) {
            return;
        }
        let slot = &mut self.slots[entity.index as usize];
        slot.version = slot.version.wrapping_add(1);
        self.free.push(entity.index);
    }

    pub fn is_live(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index as usize)
            .is_some_and(|s| s.version == entity.version)
    }

    /// Current `(chunk_idx, row)` for a live entity.
    pub fn locate(&self, entity: Entity) -> Option<(u32, u32)> {
        if !self.is_live(entity) {
            return None;
        }
        let slot = &self.slots[entity.index as usize];
        Some((slot.chunk_idx, slot.row))
    }

    /// Update the row component of a live entity's slot. No-op on stale
    /// handles.
    pub fn set_row(&mut self, entity: Entity, row: u32) {
        if !self.is_live(entity) {
            return;
        }
        self.slots[entity.index as usize].row = row;
    }

    /// Update the chunk component of a live entity's slot. No-op on stale
    /// handles.
    pub fn set_chunk(&mut self, entity: Entity, chunk_idx: u32) {
        if !self.is_live(entity) {
            return;
        }
        self.slots[entity.index as usize].chunk_idx = chunk_idx;
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn free_list(&self) -> &[u32] {
        &self.free
    }

    /// Rebuild an indexer from serialized parts (used by `transfer`/load).
    pub(crate) fn from_parts(slots: Vec<Slot>, free: Vec<u32>) -> Self {
        Self { slots, free }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_recycles_index_with_bumped_version() {
        let mut idx = EntityIndexer::new();
        let e1 = idx.create(0, 0);
        assert!(idx.is_live(e1));
        idx.destroy(e1);
        assert!(!idx.is_live(e1));

        let e2 = idx.create(0, 0);
        assert_eq!(e1.index, e2.index);
        assert!(e2.version > e1.version);
        assert!(idx.is_live(e2));
        assert!(!idx.is_live(e1));
    }

    #[test]
    fn double_destroy_is_noop() {
        let mut idx = EntityIndexer::new();
        let e = idx.create(0, 0);
        idx.destroy(e);
        idx.destroy(e); // must not panic or double-bump
        let e2 = idx.create(1, 2);
        assert_eq!(e.index, e2.index);
        assert_eq!(e.version + 1, e2.version);
    }

    #[test]
    fn free_list_is_lifo() {
        let mut idx = EntityIndexer::new();
        let a = idx.create(0, 0);
        let b = idx.create(0, 1);
        idx.destroy(a);
        idx.destroy(b);
        let reused = idx.create(0, 2);
        assert_eq!(reused.index, b.index);
    }
}
