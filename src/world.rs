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

//! The update loop that actually drives an [`EntityStore`] end to end.
//!
//! Grounded on `NodeVision.Entities.hpp`'s `World::Update()`/
//! `GetOrCreateSystem<S>()`: a `System` runs once per frame, any command
//! buffers it filled are drained afterward. Per spec §9's design note, the
//! original's global current-manager pointers (`SetBlobManager`,
//! `SetProfileManager`) are rendered here as explicit `&mut World` context
//! plumbing rather than thread-local/global state.

use crate::command::CommandBufferPool;
use crate::config::EcsConfig;
use crate::store::EntityStore;

/// One unit of per-frame logic. Implementors read/write the store directly
/// for inline work, or use `world.command_buffers_mut().get_buffer()` to
/// queue deferred structural edits.
pub trait System: Send {
    fn on_update(&mut self, world: &mut World);
}

/// Bundles an [`EntityStore`] with the command-buffer pool that drains into
/// it once per [`World::update`] call. This is the only place job-graph
/// worker threads are started, since spec §5 requires the store itself stay
/// single-threaded.
pub struct World {
    store: EntityStore,
    command_buffers: CommandBufferPool,
}

impl World {
    pub fn new(config: EcsConfig) -> Self {
        Self {
            store: EntityStore::new(config),
            command_buffers: CommandBufferPool::new(),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn command_buffers_mut(&mut self) -> &mut CommandBufferPool {
        &mut self.command_buffers
    }

    /// Spawn the store's worker pool. Must happen before any system
    /// schedules a job, since `complete` on a handle with no worker to
    /// dequeue it would block forever.
    pub fn start_workers(&mut self, count: usize) {
        self.store.start_workers(count);
    }

    /// Run every system once, in order, then drain any command buffers
    /// they queued against this store.
    pub fn update(&mut self, systems: &mut [Box<dyn System>]) {
        for system in systems {
            system.on_update(self);
        }
        self.command_buffers.on_update(&mut self.store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(i32);

    struct IncrementSystem {
        target: crate::entity::Entity,
    }

    impl System for IncrementSystem {
        fn on_update(&mut self, world: &mut World) {
            let mut buf = world.command_buffers_mut().get_buffer();
            let entity = self.target;
            buf.custom(move |store| {
                let current = store.get_component::<Counter>(entity).0;
                store.set_component(entity, Counter(current + 1));
            });
            world.command_buffers_mut().add_producer(buf, crate::job::JobHandle::NONE);
        }
    }

    #[test]
    fn update_drains_command_buffers_queued_by_systems() {
        let mut world = World::new(EcsConfig::default());
        let e = world.store_mut().spawn((Counter(0),));
        let mut systems: Vec<Box<dyn System>> = vec![Box::new(IncrementSystem { target: e })];
        world.update(&mut systems);
        assert_eq!(world.store().get_component::<Counter>(e).0, 1);
    }
}
