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

//! `EntityStore`: the archetype index, chunk table, entity indexer, type
//! registry and job graph bundled into the one object that owns a world's
//! data (spec §4.5).
//!
//! Structural edits (`add_component`/`remove_component`/`destroy_entity`)
//! follow spec §7's stale-entity policy: destroying or mutating a stale
//! entity is a silent no-op, while reading one (`get_component`) is a
//! precondition violation. `add_component`/`remove_component` migrate the
//! entity's row to the chunk for its new archetype by byte-copying every
//! carried-over column and reclaiming the old row with
//! [`crate::chunk::ArchetypeChunk::relocate_out`], which runs no destructors
//! -- only the column genuinely discarded by `remove_component` is dropped
//! explicitly first, so a component with a real `Drop` impl is moved, not
//! duplicated. The same genuine-discard points (plus `destroy_entity` and
//! overwriting an already-live value via `set_component`/`add_component`)
//! release any blob guids the discarded value carries through the owned
//! [`crate::blob::BlobStore`] (spec §8 property 6), via each component
//! type's optional `blob_guids` hook.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::blob::BlobStore;
use crate::chunk::{ArchetypeChunk, EntityArchetype};
use crate::config::EcsConfig;
use crate::entity::{Entity, EntityIndexer};
use crate::job::{JobGraph, WorkerManager};
use crate::mask::ArchetypeMask;
use crate::type_registry::{Component, ComponentType, TypeRegistry};

/// Maximum number of components a [`Bundle`] tuple may carry.
pub const MAX_BUNDLE_COMPONENTS: usize = 8;

/// A tuple of component values that can be spawned together in one call.
/// Mirrors the teacher's `Bundle` convenience trait; `EntityStore::spawn`
/// is sugar over `create_archetype` + `create_entity` + `set_component`.
pub trait Bundle: Send + Sync + 'static {
    fn component_types(registry: &mut TypeRegistry) -> SmallVec<[ComponentType; MAX_BUNDLE_COMPONENTS]>;

    /// # Safety
    /// `chunk`'s archetype must contain every type returned by
    /// `component_types`, and `row` must be a freshly reserved, otherwise
    /// uninitialized row in that chunk.
    unsafe fn write(self, registry: &mut TypeRegistry, chunk: &mut ArchetypeChunk, row: u32);
}

macro_rules! impl_bundle {
    ($($T:ident : $t:ident),+) => {
        impl<$($T: Component),+> Bundle for ($($T,)+) {
            fn component_types(registry: &mut TypeRegistry) -> SmallVec<[ComponentType; MAX_BUNDLE_COMPONENTS]> {
                let mut v = SmallVec::new();
                $(v.push(registry.get_or_register::<$T>());)+
                v
            }

            unsafe fn write(self, registry: &mut TypeRegistry, chunk: &mut ArchetypeChunk, row: u32) {
                #[allow(non_snake_case)]
                let ($($t,)+) = self;
                $(
                    let type_id = registry.get_or_register::<$T>().type_id;
                    unsafe { chunk.init_raw(type_id, row, &$t as *const $T as *const u8) };
                    std::mem::forget($t);
                )+
            }
        }
    };
}

impl_bundle!(A: a);
impl_bundle!(A: a, B: b);
impl_bundle!(A: a, B: b, C: c);
impl_bundle!(A: a, B: b, C: c, D: d);

/// Owns every piece of a world's data: the type registry, the archetype
/// index (keyed by mask, since `row_size` is derived purely from member
/// types), the chunk table, the entity indexer and a job graph.
pub struct EntityStore {
    registry: TypeRegistry,
    archetype_index: FxHashMap<ArchetypeMask, u32>,
    chunks: Vec<ArchetypeChunk>,
    indexer: EntityIndexer,
    workers: WorkerManager,
    config: EcsConfig,
    blobs: BlobStore,
}

impl EntityStore {
    pub fn new(config: EcsConfig) -> Self {
        Self {
            registry: TypeRegistry::new(),
            archetype_index: FxHashMap::default(),
            chunks: Vec::new(),
            indexer: EntityIndexer::new(),
            workers: WorkerManager::new(),
            config,
            blobs: BlobStore::new(),
        }
    }

    pub fn config(&self) -> &EcsConfig {
        &self.config
    }

    /// The blob table backing any component registered via
    /// [`crate::type_registry::TypeRegistry::get_or_register_with_blobs`].
    /// Genuine discards through this store (`destroy_entity`,
    /// `remove_component`, and overwriting an already-live value via
    /// `set_component`/`add_component`) automatically call
    /// [`BlobStore::dec`] for such components; a caller that knowingly
    /// attaches the *same* blob guid to a second component is still
    /// responsible for calling [`BlobStore::acquire`] itself first (spec §9:
    /// [`crate::blob::BlobReference`] is a bitwise `Copy` value with no
    /// implicit accounting, so only an explicit call site can know a
    /// duplication, rather than a fresh attachment, is happening).
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn blobs_mut(&mut self) -> &mut BlobStore {
        &mut self.blobs
    }

    /// Release every blob guid `type_id`'s value at `(chunk_idx, row)`
    /// carries, via its registered [`crate::type_registry::ComponentType::blob_guids`]
    /// hook (a no-op if the type carries none). Must run before the value's
    /// bytes are dropped or overwritten.
    fn dec_blob_refs(&mut self, chunk_idx: u32, type_id: u32, row: u32) {
        let Some(hook) = self.registry.lookup(type_id).and_then(|ct| ct.blob_guids) else {
            return;
        };
        let ptr = unsafe { self.chunks[chunk_idx as usize].get_raw(type_id, row) };
        for guid in unsafe { hook(ptr) } {
            self.blobs.dec(guid);
        }
    }

    /// The job graph workers drain. Scheduling a job before
    /// [`Self::start_workers`] has been called will deadlock on `complete`,
    /// since nothing dequeues it (spec §4.8: jobs are driven by an explicit
    /// worker pool, not an ambient executor).
    pub fn job_graph(&self) -> &JobGraph {
        self.workers.graph()
    }

    /// Spawn `count` worker threads (or the configured default if `0`).
    /// Must be called at most once per store.
    pub fn start_workers(&mut self, count: usize) {
        let config = self.config;
        self.workers.start(&config, count);
    }

    pub fn type_id_of<T: Component>(&mut self) -> u32 {
        self.registry.get_or_register::<T>().type_id
    }

    /// Register `T` (if not already registered) with a [`crate::type_registry::BlobRefs`]
    /// hook, so later `spawn`/`add_component`/`set_component`/
    /// `destroy_entity` calls on entities carrying `T` find and release its
    /// blob guids automatically. Call this before `T`'s first use; a `T`
    /// already registered through a plain [`Self::type_id_of`]/`spawn` call
    /// keeps whatever hook (or lack of one) it was first registered with.
    pub fn register_blob_component<T: Component + crate::type_registry::BlobRefs>(&mut self) {
        self.registry.get_or_register_with_blobs::<T>();
    }

    pub fn chunk(&self, idx: u32) -> Option<&ArchetypeChunk> {
        self.chunks.get(idx as usize)
    }

    pub fn chunk_mut(&mut self, idx: u32) -> Option<&mut ArchetypeChunk> {
        self.chunks.get_mut(idx as usize)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whole-store accessors used by [`crate::serialize`] to walk every
    /// chunk/indexer slot when saving.
    pub(crate) fn chunks(&self) -> &[ArchetypeChunk] {
        &self.chunks
    }

    pub(crate) fn indexer(&self) -> &EntityIndexer {
        &self.indexer
    }

    pub(crate) fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Rebuild a store wholesale from deserialized parts (used by
    /// [`crate::serialize::load_store`]). `registry` must already have every
    /// persistent component type this world uses registered, so their
    /// `type_id`/`dtor` can be resolved by GUID.
    pub(crate) fn from_parts(
        config: EcsConfig,
        registry: TypeRegistry,
        chunks: Vec<ArchetypeChunk>,
        indexer: EntityIndexer,
    ) -> Self {
        let mut archetype_index = FxHashMap::default();
        for (i, chunk) in chunks.iter().enumerate() {
            archetype_index.insert(chunk.archetype().mask, i as u32);
        }
        Self {
            registry,
            archetype_index,
            chunks,
            indexer,
            workers: WorkerManager::new(),
            config,
            blobs: BlobStore::new(),
        }
    }

    /// Declare (or look up) the archetype for exactly this set of component
    /// types. Two archetypes built from the same set of types (in any
    /// order) share the same chunk, keyed by mask.
    pub fn create_archetype(&mut self, component_types: Vec<ComponentType>) -> EntityArchetype {
        let archetype = EntityArchetype::new(component_types);
        self.get_or_create_chunk_index(archetype.mask, || archetype.component_types.clone());
        archetype
    }

    fn get_or_create_chunk_index(&mut self, mask: ArchetypeMask, build_types: impl FnOnce() -> Vec<ComponentType>) -> u32 {
        if let Some(&idx) = self.archetype_index.get(&mask) {
            return idx;
        }
        assert!(
            self.chunks.len() < self.config.max_archetypes,
            "archetype limit exceeded: more than {} distinct archetypes",
            self.config.max_archetypes
        );
        let archetype = EntityArchetype::new(build_types());
        let chunk = ArchetypeChunk::new(archetype, &self.config);
        let idx = self.chunks.len() as u32;
        self.chunks.push(chunk);
        self.archetype_index.insert(mask, idx);
        idx
    }

    /// Borrow two distinct chunks mutably at once (needed while migrating a
    /// row between archetypes).
    fn chunk_pair_mut(&mut self, a: u32, b: u32) -> (&mut ArchetypeChunk, &mut ArchetypeChunk) {
        assert_ne!(a, b, "chunk_pair_mut: indices must differ");
        if a < b {
            let (left, right) = self.chunks.split_at_mut(b as usize);
            (&mut left[a as usize], &mut right[0])
        } else {
            let (left, right) = self.chunks.split_at_mut(a as usize);
            (&mut right[0], &mut left[b as usize])
        }
    }

    pub fn create_entity(&mut self, archetype: &EntityArchetype) -> Entity {
        let chunk_idx = self.get_or_create_chunk_index(archetype.mask, || archetype.component_types.clone());
        let chunk = &mut self.chunks[chunk_idx as usize];
        let row = chunk.push_back();
        let entity = self.indexer.create(chunk_idx, row);
        chunk.set_entity(row, entity);
        entity
    }

    /// Create an archetype for `B`'s component set and spawn one entity
    /// carrying `bundle`'s values.
    pub fn spawn<B: Bundle>(&mut self, bundle: B) -> Entity {
        let types = B::component_types(&mut self.registry);
        let mut mask = ArchetypeMask::new();
        for ct in &types {
            mask.enable(ct.type_id);
        }
        let types_vec: Vec<ComponentType> = types.to_vec();
        let chunk_idx = self.get_or_create_chunk_index(mask, || types_vec);
        let chunk = &mut self.chunks[chunk_idx as usize];
        let row = chunk.push_back();
        let entity = self.indexer.create(chunk_idx, row);
        chunk.set_entity(row, entity);
        unsafe { bundle.write(&mut self.registry, &mut self.chunks[chunk_idx as usize], row) };
        entity
    }

    pub fn is_live(&self, entity: Entity) -> bool {
        self.indexer.is_live(entity)
    }

    /// Silent no-op on a stale entity (spec §7).
    pub fn destroy_entity(&mut self, entity: Entity) {
        let Some((chunk_idx, row)) = self.indexer.locate(entity) else {
            return;
        };
        let type_ids: Vec<u32> = self.chunks[chunk_idx as usize]
            .archetype()
            .component_types
            .iter()
            .map(|ct| ct.type_id)
            .collect();
        for type_id in type_ids {
            self.dec_blob_refs(chunk_idx, type_id, row);
        }
        let moved = self.chunks[chunk_idx as usize].remove_swap_back(row);
        if let Some(moved_entity) = moved {
            self.indexer.set_row(moved_entity, row);
        }
        self.indexer.destroy(entity);
    }

    /// Precondition-fail (panic) on a stale entity or a component not
    /// present on the entity's archetype (spec §7, §9 resolution).
    pub fn get_component<T: Component>(&self, entity: Entity) -> &T {
        let (chunk_idx, row) = self.indexer.locate(entity).expect("get_component: stale entity handle");
        let type_id = self
            .registry
            .lookup_rust_type(std::any::TypeId::of::<T>())
            .expect("get_component: type never registered")
            .type_id;
        let chunk = &self.chunks[chunk_idx as usize];
        assert!(
            chunk.archetype().mask.contains_bit(type_id),
            "get_component: entity's archetype does not carry this component"
        );
        unsafe { &*(chunk.get_raw(type_id, row) as *const T) }
    }

    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> &mut T {
        let (chunk_idx, row) = self.indexer.locate(entity).expect("get_component_mut: stale entity handle");
        let type_id = self.registry.get_or_register::<T>().type_id;
        let chunk = &mut self.chunks[chunk_idx as usize];
        assert!(
            chunk.archetype().mask.contains_bit(type_id),
            "get_component_mut: entity's archetype does not carry this component"
        );
        unsafe { &mut *(chunk.get_raw_mut(type_id, row) as *mut T) }
    }

    /// Overwrite `T`'s value for a live entity. Silent no-op on a stale
    /// entity; panics if the entity is live but its archetype does not
    /// carry `T` (a true precondition violation, not a structural add).
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) {
        let Some((chunk_idx, row)) = self.indexer.locate(entity) else {
            return;
        };
        let type_id = self.registry.get_or_register::<T>().type_id;
        let chunk = &mut self.chunks[chunk_idx as usize];
        assert!(
            chunk.archetype().mask.contains_bit(type_id),
            "set_component: entity's archetype does not carry this component; use add_component instead"
        );
        self.dec_blob_refs(chunk_idx, type_id, row);
        let chunk = &mut self.chunks[chunk_idx as usize];
        unsafe { chunk.set_raw(type_id, row, &value as *const T as *const u8) };
        std::mem::forget(value);
    }

    /// Add `T` to a live entity, migrating it to the archetype `{current
    /// types} ∪ {T}`. If `T` is already present, overwrites it in place
    /// (no migration). Silent no-op on a stale entity.
    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) {
        let Some((src_idx, src_row)) = self.indexer.locate(entity) else {
            return;
        };
        let new_ct = self.registry.get_or_register::<T>();
        let type_id = new_ct.type_id;
        let src_mask = self.chunks[src_idx as usize].archetype().mask;

        if src_mask.contains_bit(type_id) {
            self.dec_blob_refs(src_idx, type_id, src_row);
            let chunk = &mut self.chunks[src_idx as usize];
            unsafe { chunk.set_raw(type_id, src_row, &value as *const T as *const u8) };
            std::mem::forget(value);
            return;
        }

        let target_mask = src_mask.with(type_id);
        let src_types = self.chunks[src_idx as usize].archetype().component_types.clone();
        let target_idx = self.get_or_create_chunk_index(target_mask, || {
            let mut v = src_types.clone();
            v.push(new_ct);
            v
        });

        let target_row;
        {
            let (src_chunk, target_chunk) = self.chunk_pair_mut(src_idx, target_idx);
            target_row = target_chunk.push_back();
            for ct in &src_types {
                let ptr = unsafe { src_chunk.get_raw(ct.type_id, src_row) };
                unsafe { target_chunk.init_raw(ct.type_id, target_row, ptr) };
            }
            unsafe { target_chunk.init_raw(type_id, target_row, &value as *const T as *const u8) };
            target_chunk.set_entity(target_row, entity);
        }
        std::mem::forget(value);

        // Every source column was byte-copied above, so reclaim the row
        // without running any destructors.
        let moved = self.chunks[src_idx as usize].relocate_out(src_row);
        if let Some(moved_entity) = moved {
            self.indexer.set_row(moved_entity, src_row);
        }
        self.indexer.set_chunk(entity, target_idx);
        self.indexer.set_row(entity, target_row);
    }

    /// Remove `T` from a live entity, migrating it to the archetype
    /// `{current types} \ {T}`. Silent no-op on a stale entity; panics if
    /// the entity is live but does not currently carry `T`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        let Some((src_idx, src_row)) = self.indexer.locate(entity) else {
            return;
        };
        let type_id = self.registry.get_or_register::<T>().type_id;
        let src_mask = self.chunks[src_idx as usize].archetype().mask;
        assert!(
            src_mask.contains_bit(type_id),
            "remove_component: entity's archetype does not carry this component"
        );

        let target_mask = src_mask.without(type_id);
        let src_types = self.chunks[src_idx as usize].archetype().component_types.clone();
        let target_types: Vec<ComponentType> = src_types.iter().copied().filter(|ct| ct.type_id != type_id).collect();
        let target_idx = self.get_or_create_chunk_index(target_mask, || target_types.clone());

        // Dispose of the one column genuinely discarded before the carried
        // columns are byte-copied out from under it.
        self.dec_blob_refs(src_idx, type_id, src_row);
        self.chunks[src_idx as usize].drop_column_value(type_id, src_row);

        let target_row;
        {
            let (src_chunk, target_chunk) = self.chunk_pair_mut(src_idx, target_idx);
            target_row = target_chunk.push_back();
            for ct in &target_types {
                let ptr = unsafe { src_chunk.get_raw(ct.type_id, src_row) };
                unsafe { target_chunk.init_raw(ct.type_id, target_row, ptr) };
            }
            target_chunk.set_entity(target_row, entity);
        }

        let moved = self.chunks[src_idx as usize].relocate_out(src_row);
        if let Some(moved_entity) = moved {
            self.indexer.set_row(moved_entity, src_row);
        }
        self.indexer.set_chunk(entity, target_idx);
        self.indexer.set_row(entity, target_row);
    }

    /// Every chunk index whose archetype mask is a superset of `include`
    /// and disjoint from `exclude` (spec §9 resolves the original's
    /// omission of the exclude check).
    pub fn chunk_indices_matching(&self, include: &ArchetypeMask, exclude: &ArchetypeMask) -> Vec<u32> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.archetype().mask.contains_mask(include) && c.archetype().mask.is_disjoint(exclude))
            .map(|(i, _)| i as u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Pos {
        x: i32,
        y: i32,
    }
    struct Vel {
        dx: i32,
    }

    #[test]
    fn create_entity_then_set_and_get_component() {
        let mut store = EntityStore::new(EcsConfig::default());
        let pos_ct = store.registry.get_or_register::<Pos>();
        let archetype = store.create_archetype(vec![pos_ct]);
        let e = store.create_entity(&archetype);
        store.set_component(e, Pos { x: 1, y: 2 });
        assert_eq!(store.get_component::<Pos>(e), &Pos { x: 1, y: 2 });
    }

    #[test]
    fn spawn_bundle_round_trips_values() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Pos { x: 3, y: 4 }, Vel { dx: 5 }));
        assert_eq!(store.get_component::<Pos>(e), &Pos { x: 3, y: 4 });
        assert_eq!(store.get_component::<Vel>(e).dx, 5);
    }

    #[test]
    fn destroy_entity_is_silent_noop_when_stale() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Pos { x: 0, y: 0 },));
        store.destroy_entity(e);
        assert!(!store.is_live(e));
        store.destroy_entity(e); // must not panic
    }

    #[test]
    fn add_component_migrates_and_preserves_existing_values() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Pos { x: 7, y: 8 },));
        store.add_component(e, Vel { dx: 42 });
        assert_eq!(store.get_component::<Pos>(e), &Pos { x: 7, y: 8 });
        assert_eq!(store.get_component::<Vel>(e).dx, 42);
    }

    #[test]
    fn remove_component_migrates_and_drops_removed_value() {
        let dropped = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        struct Marker(std::sync::Arc<std::sync::atomic::AtomicU32>);
        impl Drop for Marker {
            fn drop(&mut self) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Pos { x: 1, y: 1 }, Marker(dropped.clone())));
        store.remove_component::<Marker>(e);
        assert_eq!(dropped.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(store.get_component::<Pos>(e), &Pos { x: 1, y: 1 });
    }

    #[test]
    fn add_component_overwrites_in_place_when_already_present() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Pos { x: 1, y: 1 },));
        store.add_component(e, Pos { x: 9, y: 9 });
        assert_eq!(store.get_component::<Pos>(e), &Pos { x: 9, y: 9 });
    }

    #[test]
    #[should_panic(expected = "stale entity handle")]
    fn get_component_on_stale_entity_panics() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Pos { x: 0, y: 0 },));
        store.destroy_entity(e);
        let _ = store.get_component::<Pos>(e);
    }
}
