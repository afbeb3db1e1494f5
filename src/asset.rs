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

//! Asset pipeline boundary (spec §6), fleshed out to the seam
//! `NodeVision.Assets.hpp` implies: an [`Asset`] component tagging which
//! entities are backed by a file, an [`AssetCommandBuffer`] recording
//! save/load/update intents the same way [`crate::command::CommandBuffer`]
//! records structural edits, and an [`AssetImporter`] trait the embedding
//! application implements.
//!
//! Filesystem traversal and the concrete file formats stay out of scope
//! (spec §5 Non-goals) — [`AssetImporter`] is the seam an embedder plugs a
//! real importer into, not a scanner this crate ships.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::{EcsError, Result};
use crate::store::EntityStore;

/// Tags an entity as backed by an on-disk asset. `meta_path` mirrors the
/// original's sidecar-metadata-file convention (import settings, thumbnail
/// hashes, ...) kept separate from the asset's own payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub guid: crate::type_registry::Guid,
    pub path: String,
    pub meta_path: String,
}

/// Import-time settings and derived data persisted at `Asset::meta_path`,
/// separate from the payload itself. JSON rather than the binary `Stream`
/// contract in `serialize.rs`: this is embedder-facing sidecar metadata,
/// not hot columnar data, and is meant to be hand-editable on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMeta {
    pub importer_version: u32,
    pub thumbnail_hash: Option<String>,
}

impl AssetMeta {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EcsError::AssetError(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| EcsError::AssetError(e.to_string()))
    }
}

/// Reads and writes an asset's raw payload bytes. The embedding application
/// owns the actual file I/O and format; this crate only sequences calls to
/// it against command-buffer-recorded intents.
pub trait AssetImporter: Send + Sync {
    fn import(&self, asset: &Asset) -> Result<Vec<u8>>;
    fn export(&self, asset: &Asset, payload: &[u8]) -> Result<()>;
}

enum AssetIntent {
    Save { entity: Entity, asset: Asset, payload: Vec<u8> },
    Load { entity: Entity, asset: Asset },
    Update { entity: Entity, asset: Asset, payload: Vec<u8> },
}

/// One payload successfully imported by [`AssetCommandBuffer::apply`],
/// handed back so the caller can turn it into whatever components the
/// asset's format implies.
pub struct LoadedAsset {
    pub entity: Entity,
    pub bytes: Vec<u8>,
}

/// Records save/load/update intents against entities, replayed against an
/// [`AssetImporter`] and an [`EntityStore`] in recorded order — the asset
/// pipeline's analogue of [`crate::command::CommandBuffer`].
#[derive(Default)]
pub struct AssetCommandBuffer {
    ops: Vec<AssetIntent>,
}

impl AssetCommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `payload` through the importer and attach `asset` to `entity`.
    pub fn save(&mut self, entity: Entity, asset: Asset, payload: Vec<u8>) {
        self.ops.push(AssetIntent::Save { entity, asset, payload });
    }

    /// Import `asset`'s bytes and attach it to `entity`; the bytes are
    /// handed back from [`Self::apply`] as a [`LoadedAsset`].
    pub fn load(&mut self, entity: Entity, asset: Asset) {
        self.ops.push(AssetIntent::Load { entity, asset });
    }

    /// Like [`Self::save`] but for an entity that already carries an
    /// `Asset` component; overwrites rather than adds it.
    pub fn update(&mut self, entity: Entity, asset: Asset, payload: Vec<u8>) {
        self.ops.push(AssetIntent::Update { entity, asset, payload });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Replay every recorded intent in order. Stops and returns the first
    /// importer error; any intents after it are dropped rather than
    /// replayed.
    pub fn apply(&mut self, importer: &dyn AssetImporter, store: &mut EntityStore) -> Result<Vec<LoadedAsset>> {
        let mut loaded = Vec::new();
        for op in self.ops.drain(..) {
            match op {
                AssetIntent::Save { entity, asset, payload } => {
                    importer.export(&asset, &payload)?;
                    store.add_component(entity, asset);
                }
                AssetIntent::Update { entity, asset, payload } => {
                    importer.export(&asset, &payload)?;
                    store.add_component(entity, asset);
                }
                AssetIntent::Load { entity, asset } => {
                    let bytes = importer.import(&asset)?;
                    store.add_component(entity, asset);
                    loaded.push(LoadedAsset { entity, bytes });
                }
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EcsConfig;
    use crate::type_registry::Guid;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeImporter {
        exported: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl AssetImporter for FakeImporter {
        fn import(&self, asset: &Asset) -> Result<Vec<u8>> {
            if asset.path == "missing.bin" {
                return Err(crate::error::EcsError::AssetError("not found".to_string()));
            }
            Ok(asset.path.clone().into_bytes())
        }

        fn export(&self, asset: &Asset, payload: &[u8]) -> Result<()> {
            self.exported.lock().unwrap().push((asset.path.clone(), payload.to_vec()));
            Ok(())
        }
    }

    fn asset(path: &str) -> Asset {
        Asset {
            guid: Guid([1, 2, 3, 4]),
            path: path.to_string(),
            meta_path: format!("{path}.meta"),
        }
    }

    #[test]
    fn save_attaches_asset_component_and_exports_payload() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((0u8,));
        let importer = FakeImporter::default();

        let mut cmds = AssetCommandBuffer::new();
        cmds.save(e, asset("model.bin"), vec![1, 2, 3]);
        cmds.apply(&importer, &mut store).unwrap();

        assert_eq!(store.get_component::<Asset>(e).path, "model.bin");
        assert_eq!(importer.exported.lock().unwrap()[0].1, vec![1, 2, 3]);
    }

    #[test]
    fn load_returns_payload_and_attaches_asset() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((0u8,));
        let importer = FakeImporter::default();

        let mut cmds = AssetCommandBuffer::new();
        cmds.load(e, asset("texture.bin"));
        let loaded = cmds.apply(&importer, &mut store).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].bytes, b"texture.bin");
        assert_eq!(store.get_component::<Asset>(e).path, "texture.bin");
    }

    #[test]
    fn apply_surfaces_importer_error() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((0u8,));
        let importer = FakeImporter::default();

        let mut cmds = AssetCommandBuffer::new();
        cmds.load(e, asset("missing.bin"));
        let err = cmds.apply(&importer, &mut store).unwrap_err();
        assert!(matches!(err, crate::error::EcsError::AssetError(_)));
    }

    #[test]
    fn update_overwrites_existing_asset_component() {
        let mut store = EntityStore::new(EcsConfig::default());
        let e = store.spawn((0u8,));
        let importer = FakeImporter::default();

        let mut cmds = AssetCommandBuffer::new();
        cmds.save(e, asset("v1.bin"), vec![1]);
        cmds.apply(&importer, &mut store).unwrap();

        let mut cmds = AssetCommandBuffer::new();
        cmds.update(e, asset("v2.bin"), vec![2]);
        cmds.apply(&importer, &mut store).unwrap();

        assert_eq!(store.get_component::<Asset>(e).path, "v2.bin");
    }

    #[test]
    fn meta_round_trips_through_json() {
        let meta = AssetMeta {
            importer_version: 3,
            thumbnail_hash: Some("abc123".to_string()),
        };
        let json = meta.to_json().unwrap();
        assert_eq!(AssetMeta::from_json(&json).unwrap(), meta);
    }
}
