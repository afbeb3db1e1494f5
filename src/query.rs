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

//! Query + for-each dispatch.
//!
//! The original dispatcher inspects a C++ lambda's parameter list at
//! compile time to tell reads from writes. Rust has no equivalent
//! reflection, so per spec §9's design note the read/write binding for
//! every parameter is declared explicitly at the call site via the marker
//! types [`R<T>`] (read) and [`W<T>`] (write) passed as generic parameters
//! to `for_each`/`schedule`, e.g. `query.for_each2::<R<A>, W<B>>(|e, a, b|
//! ...)`. Mirrors the original's cap of three lambda parameters.

use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::entity::Entity;
use crate::job::{JobGraph, JobHandle};
use crate::mask::ArchetypeMask;
use crate::store::EntityStore;
use crate::type_registry::Component;

/// A read binding: the chunk's `T` column is a read-column for this job.
pub struct R<T>(PhantomData<T>);
/// A write binding: the chunk's `T` column is a write-column for this job.
pub struct W<T>(PhantomData<T>);

/// One parameter of a `for_each` lambda.
pub trait Binding {
    type Ref<'c>;
    fn is_write() -> bool;
    fn type_id(store: &mut EntityStore) -> u32;
    /// # Safety
    /// `ptr` must point to a live, correctly-typed value for the lifetime
    /// `'c`, with no other live reference to the same row aliasing it
    /// incompatibly.
    unsafe fn fetch<'c>(ptr: *mut u8) -> Self::Ref<'c>;
}

impl<T: Component> Binding for R<T> {
    type Ref<'c> = &'c T;
    fn is_write() -> bool {
        false
    }
    fn type_id(store: &mut EntityStore) -> u32 {
        store.type_id_of::<T>()
    }
    unsafe fn fetch<'c>(ptr: *mut u8) -> &'c T {
        unsafe { &*(ptr as *const T) }
    }
}

impl<T: Component> Binding for W<T> {
    type Ref<'c> = &'c mut T;
    fn is_write() -> bool {
        true
    }
    fn type_id(store: &mut EntityStore) -> u32 {
        store.type_id_of::<T>()
    }
    unsafe fn fetch<'c>(ptr: *mut u8) -> &'c mut T {
        unsafe { &mut *(ptr as *mut T) }
    }
}

/// Accumulates `include_mask`/`exclude_mask` through fluent `with`/
/// `without`, then resolves to a set of matching chunks.
pub struct Query<'w> {
    store: &'w mut EntityStore,
    include: ArchetypeMask,
    exclude: ArchetypeMask,
}

impl<'w> Query<'w> {
    pub fn new(store: &'w mut EntityStore) -> Self {
        Self {
            store,
            include: ArchetypeMask::new(),
            exclude: ArchetypeMask::new(),
        }
    }

    pub fn with<T: Component>(mut self) -> Self {
        let id = self.store.type_id_of::<T>();
        self.include.enable(id);
        self
    }

    pub fn without<T: Component>(mut self) -> Self {
        let id = self.store.type_id_of::<T>();
        self.exclude.enable(id);
        self
    }

    /// Sum of `chunk.count()` over every chunk whose mask is a superset of
    /// `include_mask` and disjoint from `exclude_mask` (spec §9 resolves
    /// the original's omission of the exclude check).
    pub fn count(&self) -> usize {
        self.store
            .chunk_indices_matching(&self.include, &self.exclude)
            .into_iter()
            .filter_map(|idx| self.store.chunk(idx))
            .map(|c| c.count() as usize)
            .sum()
    }

    fn matching_chunk_indices(&self) -> Vec<u32> {
        self.store.chunk_indices_matching(&self.include, &self.exclude)
    }
}

/// A single `(type_id, is_write)` reference this dispatch touches, used to
/// compute the dependency/handle set and enforce the working-set cap.
#[derive(Clone, Copy)]
struct ColumnRef {
    type_id: u32,
    is_write: bool,
}

fn column_refs<B: Binding>(store: &mut EntityStore, out: &mut SmallVec<[ColumnRef; 8]>) {
    out.push(ColumnRef {
        type_id: B::type_id(store),
        is_write: B::is_write(),
    });
}

/// Completes any job currently touching `refs` (write parameters wait on
/// both handles; read parameters wait on the write handle), readying the
/// chunk for an inline `Run` dispatch.
fn complete_prior(store: &mut EntityStore, chunk_idx: u32, refs: &[ColumnRef]) {
    for r in refs {
        let (write, read) = match store.chunk(chunk_idx) {
            Some(chunk) => (
                chunk.write_handle(r.type_id).unwrap_or(JobHandle::NONE),
                chunk.read_handle(r.type_id).unwrap_or(JobHandle::NONE),
            ),
            None => continue,
        };
        store.job_graph().complete(write);
        if r.is_write {
            store.job_graph().complete(read);
        }
    }
}

/// Dependency set for a `Schedule` dispatch: write params depend on both
/// handles, read params on the write handle only.
fn collect_dependencies(store: &EntityStore, chunk_idx: u32, refs: &[ColumnRef]) -> SmallVec<[JobHandle; 16]> {
    let mut deps = SmallVec::new();
    if let Some(chunk) = store.chunk(chunk_idx) {
        for r in refs {
            if let Some(h) = chunk.write_handle(r.type_id) {
                deps.push(h);
            }
            if r.is_write {
                if let Some(h) = chunk.read_handle(r.type_id) {
                    deps.push(h);
                }
            }
        }
    }
    deps
}

fn bind_new_handle(store: &mut EntityStore, chunk_idx: u32, refs: &[ColumnRef], handle: JobHandle) {
    if let Some(chunk) = store.chunk_mut(chunk_idx) {
        for r in refs {
            if r.is_write {
                chunk.set_write_handle(r.type_id, handle);
            } else {
                chunk.set_read_handle(r.type_id, handle);
            }
        }
    }
}

fn check_column_cap(store: &EntityStore, chunk_count: usize, params: usize) {
    let total = chunk_count * params;
    assert!(
        total <= store.config().max_foreach_columns,
        "for_each dispatch touches {total} column references, exceeding the configured cap of {}",
        store.config().max_foreach_columns
    );
}

macro_rules! impl_for_each {
    ($name_run:ident, $name_schedule:ident, [$($B:ident : $b:ident),+]) => {
        impl<'w> Query<'w> {
            /// Run inline on the calling thread after completing any prior
            /// job touching a bound column.
            pub fn $name_run<$($B: Binding),+>(&mut self, mut f: impl FnMut(Entity, $($B::Ref<'_>),+)) {
                let mut refs: SmallVec<[ColumnRef; 8]> = SmallVec::new();
                $(column_refs::<$B>(self.store, &mut refs);)+
                let chunk_indices = self.matching_chunk_indices();
                check_column_cap(self.store, chunk_indices.len(), refs.len());
                for idx in chunk_indices {
                    complete_prior(self.store, idx, &refs);
                    let chunk = match self.store.chunk_mut(idx) {
                        Some(c) => c,
                        None => continue,
                    };
                    let count = chunk.count();
                    for row in 0..count {
                        let entity = chunk.entities()[row as usize];
                        let mut i = 0usize;
                        $(
                            let type_id_for = refs[i].type_id;
                            i += 1;
                            let ptr = unsafe {
                                if $B::is_write() {
                                    chunk.get_raw_mut(type_id_for, row)
                                } else {
                                    chunk.get_raw(type_id_for, row) as *mut u8
                                }
                            };
                            let $b = unsafe { $B::fetch::<'_>(ptr) };
                        )+
                        f(entity, $($b),+);
                    }
                }
            }

            /// Enqueue one job performing the same iteration; returns the
            /// handle written back into each touched column's
            /// `write_handle` (write bindings) or `read_handle` (read
            /// bindings).
            pub fn $name_schedule<$($B: Binding + Send + 'static),+>(
                &mut self,
                graph: &JobGraph,
                mut f: impl FnMut(Entity, $($B::Ref<'_>),+) + Send + 'static,
            ) -> JobHandle {
                let mut refs: SmallVec<[ColumnRef; 8]> = SmallVec::new();
                $(column_refs::<$B>(self.store, &mut refs);)+
                let chunk_indices = self.matching_chunk_indices();
                check_column_cap(self.store, chunk_indices.len(), refs.len());

                let mut deps: SmallVec<[JobHandle; 16]> = SmallVec::new();
                for &idx in &chunk_indices {
                    deps.extend(collect_dependencies(self.store, idx, &refs));
                }

                // SAFETY: chunks outlive the scheduled job because the
                // store is only mutated structurally from the main thread,
                // which must `complete` outstanding handles before any
                // structural op touches these chunks (spec §5).
                struct SendPtr(*mut EntityStore);
                unsafe impl Send for SendPtr {}
                let store_ptr = SendPtr(self.store as *mut EntityStore);
                let refs_for_job = refs.clone();
                let indices_for_job = chunk_indices.clone();

                let handle = graph.enqueue_with_deps(
                    move || {
                        let store: &mut EntityStore = unsafe { &mut *store_ptr.0 };
                        for idx in indices_for_job {
                            let chunk = match store.chunk_mut(idx) {
                                Some(c) => c,
                                None => continue,
                            };
                            let count = chunk.count();
                            for row in 0..count {
                                let entity = chunk.entities()[row as usize];
                                let mut i = 0usize;
                                $(
                                    let type_id_for = refs_for_job[i].type_id;
                                    i += 1;
                                    let ptr = unsafe {
                                        if $B::is_write() {
                                            chunk.get_raw_mut(type_id_for, row)
                                        } else {
                                            chunk.get_raw(type_id_for, row) as *mut u8
                                        }
                                    };
                                    let $b = unsafe { $B::fetch::<'_>(ptr) };
                                )+
                                f(entity, $($b),+);
                            }
                        }
                    },
                    &deps,
                );

                for &idx in &chunk_indices {
                    bind_new_handle(self.store, idx, &refs, handle);
                }
                handle
            }
        }
    };
}

impl_for_each!(for_each1, schedule1, [A: a]);
impl_for_each!(for_each2, schedule2, [A: a, B: b]);
impl_for_each!(for_each3, schedule3, [A: a, B: b, C: c]);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EcsConfig;

    struct Pos {
        value: i32,
    }

    #[test]
    fn single_column_scan_matches_spec_s1() {
        let mut store = EntityStore::new(EcsConfig::default());
        for v in [10, 15, 20] {
            store.spawn((Pos { value: v },));
        }
        let mut query = Query::new(&mut store).with::<Pos>();
        assert_eq!(query.count(), 3);

        let mut total = 0;
        query.for_each1::<R<Pos>>(|_e, pos| total += pos.value);
        assert_eq!(total, 45);
    }
}
