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

//! Convenient re-exports of commonly used types.
//!
//! ```
//! use chunk_ecs::prelude::*;
//! ```

pub use crate::asset::{Asset, AssetCommandBuffer, AssetImporter, AssetMeta, LoadedAsset};
pub use crate::blob::{BlobBuilder, BlobReference, BlobStore};
pub use crate::command::{CommandBuffer, CommandBufferPool};
pub use crate::config::EcsConfig;
pub use crate::entity::Entity;
pub use crate::error::{EcsError, Result};
pub use crate::job::{JobGraph, JobHandle};
pub use crate::query::{Query, R, W};
pub use crate::serialize::{ByteReadStream, ByteWriteStream, Stream};
pub use crate::store::{Bundle, EntityStore};
pub use crate::type_registry::{BlobRefs, Component, Guid, Persistent};
pub use crate::world::{System, World};
