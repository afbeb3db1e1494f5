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

//! Archetype/chunk-family ECS runtime.
//!
//! Entities are grouped into archetypes by their exact component set;
//! each archetype's rows live column-major in one growable
//! [`chunk::ArchetypeChunk`]. Structural edits (spawn, destroy,
//! add/remove component) run single-threaded through [`store::EntityStore`];
//! [`query::Query`]'s `for_each`/`schedule` dispatch reads and writes
//! component payload bytes, optionally deferred onto [`job::JobGraph`]
//! worker threads.

pub mod asset;
pub mod blob;
pub mod chunk;
pub mod command;
pub mod config;
pub mod entity;
pub mod error;
pub mod job;
pub mod mask;
pub mod profiling;
pub mod query;
pub mod serialize;
pub mod store;
pub mod type_registry;
pub mod world;

pub mod prelude;

pub use asset::{Asset, AssetCommandBuffer, AssetImporter, AssetMeta, LoadedAsset};
pub use blob::{BlobBuilder, BlobReference, BlobStore};
pub use chunk::{ArchetypeChunk, EntityArchetype};
pub use command::{CommandBuffer, CommandBufferPool};
pub use config::EcsConfig;
pub use entity::{Entity, EntityIndexer};
pub use error::{EcsError, Result};
pub use job::{JobGraph, JobHandle, WorkerManager};
pub use query::{Query, R, W};
pub use serialize::{ByteReadStream, ByteWriteStream, Stream};
pub use store::{Bundle, EntityStore};
pub use type_registry::{BlobRefs, Component, ComponentType, Guid, Persistent, TypeRegistry};
pub use world::{System, World};
