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

//! Deferred structural edits, recorded now and replayed against an
//! [`EntityStore`] later (spec §4.7).
//!
//! The original `EntityCommandBuffer` packs ops into a raw byte stream and
//! replays it forward. Rust's closures give the same "record now, replay
//! forward, in order" contract without hand-rolled encoding, so each op is
//! stored as a boxed `FnOnce(&mut EntityStore)` — the teacher's own
//! `CommandClosure` idiom, just retargeted at `EntityStore`.

use crate::entity::Entity;
use crate::job::JobHandle;
use crate::store::{Bundle, EntityStore};
use crate::type_registry::Component;

type CommandClosure = Box<dyn FnOnce(&mut EntityStore) + Send>;

/// A packed sequence of structural edits, applied in recording order.
#[derive(Default)]
pub struct CommandBuffer {
    ops: Vec<CommandClosure>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    pub fn destroy_entity(&mut self, entity: Entity) {
        self.ops.push(Box::new(move |store| store.destroy_entity(entity)));
    }

    pub fn add_component<T: Component>(&mut self, entity: Entity, value: T) {
        self.ops.push(Box::new(move |store| store.add_component(entity, value)));
    }

    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        self.ops.push(Box::new(move |store| store.remove_component::<T>(entity)));
    }

    /// Queue a new entity's creation. The entity handle is not observable to
    /// the recorder; use [`Self::custom`] if the caller needs it (e.g. to
    /// stash it in a shared slot).
    pub fn spawn<B: Bundle>(&mut self, bundle: B) {
        self.ops.push(Box::new(move |store| {
            store.spawn(bundle);
        }));
    }

    /// Queue an arbitrary store mutation.
    pub fn custom(&mut self, f: impl FnOnce(&mut EntityStore) + Send + 'static) {
        self.ops.push(Box::new(f));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Replay every queued op against `store`, in recording order, then
    /// empty the buffer.
    pub fn apply(&mut self, store: &mut EntityStore) {
        for op in self.ops.drain(..) {
            op(store);
        }
    }
}

/// Pool of reusable [`CommandBuffer`]s draining into a store once per frame
/// (spec §4.7), grounded on `NodeVision.CommandBuffer.hpp`'s
/// `EndSimulationCommandBufferSystem`.
///
/// The original's `GetBuffer()` falls back to popping `UsedBuffers` instead
/// of a genuine free list when nothing is free, which would hand out a
/// buffer still pending application. This pool keeps `free` and `used`
/// strictly separate: `get_buffer` only ever pops `free` (or allocates), and
/// a buffer only re-enters `free` after [`Self::on_update`] has replayed it.
#[derive(Default)]
pub struct CommandBufferPool {
    free: Vec<CommandBuffer>,
    used: Vec<(CommandBuffer, JobHandle)>,
}

impl CommandBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a buffer for a producer to fill. Reuses one from the free
    /// list if available, else allocates.
    pub fn get_buffer(&mut self) -> CommandBuffer {
        self.free.pop().unwrap_or_default()
    }

    /// Register a filled buffer, gated behind `dependency` (the producing
    /// job's handle; [`JobHandle::NONE`] if it was filled on the calling
    /// thread and needs no wait).
    pub fn add_producer(&mut self, buffer: CommandBuffer, dependency: JobHandle) {
        self.used.push((buffer, dependency));
    }

    /// Complete every producer's dependency, replay its buffer against
    /// `store`, and return it to the free list.
    pub fn on_update(&mut self, store: &mut EntityStore) {
        let pending = std::mem::take(&mut self.used);
        for (mut buffer, dependency) in pending {
            store.job_graph().complete(dependency);
            buffer.apply(store);
            self.free.push(buffer);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.used.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EcsConfig;

    struct Marker(i32);

    #[test]
    fn apply_replays_ops_in_order() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Marker(1),));

        let mut buffer = CommandBuffer::new();
        buffer.add_component(e, Marker(2));
        assert_eq!(buffer.len(), 1);
        buffer.apply(&mut store);
        assert!(buffer.is_empty());
        assert_eq!(store.get_component::<Marker>(e).0, 2);
    }

    #[test]
    fn destroy_recorded_then_applied() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Marker(1),));

        let mut buffer = CommandBuffer::new();
        buffer.destroy_entity(e);
        buffer.apply(&mut store);
        assert!(!store.is_live(e));
    }

    #[test]
    fn pool_reuses_buffers_after_on_update() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((Marker(1),));

        let mut pool = CommandBufferPool::new();
        let mut buffer = pool.get_buffer();
        buffer.add_component(e, Marker(9));
        pool.add_producer(buffer, JobHandle::NONE);
        assert_eq!(pool.pending_count(), 1);

        pool.on_update(&mut store);
        assert_eq!(pool.pending_count(), 0);
        assert_eq!(store.get_component::<Marker>(e).0, 9);

        // The applied buffer should come back out of the free list.
        let reused = pool.get_buffer();
        assert!(reused.is_empty());
    }
}
