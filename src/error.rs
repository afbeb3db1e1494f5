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

//! Error types.
//!
//! Precondition violations (typed access to a component outside the
//! archetype, mask overflow, command buffer overflow) are not represented
//! here: per the error taxonomy they are fatal and the call site panics
//! instead of returning `Err`. This enum only carries the recoverable
//! conditions: stale-entity I/O failures that surface as a boolean/Result,
//! and the asset/serialization boundary.

use std::fmt;

/// ECS error type.
#[derive(Debug, Clone)]
pub enum EcsError {
    /// Entity handle does not resolve to a live slot.
    EntityNotFound,

    /// Requested component is not part of the entity's current archetype.
    ComponentNotFound,

    /// Archetype registry has no entry for the requested mask.
    ArchetypeNotFound,

    /// A batch operation requested more rows than the configured limit.
    BatchTooLarge,

    /// Serialization stream produced malformed data on read.
    DeserializationError(String),

    /// Serialization stream failed to open/write.
    SerializationError(String),

    /// Blob store has no entry for the requested GUID.
    BlobNotFound,

    /// Asset import/save failed.
    AssetError(String),

    /// Underlying file I/O failure.
    Io(String),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::EntityNotFound => write!(f, "entity not found"),
            EcsError::ComponentNotFound => write!(f, "component not found on entity's archetype"),
            EcsError::ArchetypeNotFound => write!(f, "archetype not found"),
            EcsError::BatchTooLarge => write!(f, "batch size exceeds configured limit"),
            EcsError::DeserializationError(msg) => write!(f, "deserialization error: {msg}"),
            EcsError::SerializationError(msg) => write!(f, "serialization error: {msg}"),
            EcsError::BlobNotFound => write!(f, "blob not found"),
            EcsError::AssetError(msg) => write!(f, "asset error: {msg}"),
            EcsError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<std::io::Error> for EcsError {
    fn from(err: std::io::Error) -> Self {
        EcsError::Io(err.to_string())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, EcsError>;
