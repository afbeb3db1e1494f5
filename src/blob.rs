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

//! Reference-counted, GUID-keyed opaque blobs shared across components
//! (spec §4.9).
//!
//! `NodeVision.Blob.hpp` gates `BlobReference` copy/assign accounting behind
//! a process-wide "ref-counting scope active" boolean the store flips
//! around any operation that might duplicate or destroy component payload
//! bytes. Spec §9's redesign note replaces that flag with an explicit
//! ownership distinction: [`BlobReference`] is always a bitwise (`Copy`)
//! value, and it is the call site that duplicates or discards one —
//! [`BlobStore::acquire`]/[`BlobStore::release`], or the store's own
//! structural-migration code — that is responsible for calling `inc`/`dec`.
//! A raw byte relocation (the store's internal row moves) never calls
//! either: it carries the same logical ownership to a new address, so it
//! must not touch the count.

use std::marker::PhantomData;

use rustc_hash::FxHashMap;

use crate::type_registry::Guid;

struct BlobEntry {
    data: Option<Vec<u8>>,
    refcount: u32,
}

/// GUID → `{ data, refcount }` table (spec §3's `BlobStore`).
#[derive(Default)]
pub struct BlobStore {
    entries: FxHashMap<Guid, BlobEntry>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create_blob(guid)`: absent inserts an empty entry at refcount 0;
    /// present increments.
    pub fn create_blob(&mut self, guid: Guid) {
        match self.entries.get_mut(&guid) {
            Some(entry) => entry.refcount += 1,
            None => {
                self.entries.insert(guid, BlobEntry { data: None, refcount: 0 });
            }
        }
    }

    /// `create_blob(guid, payload)`: present installs the payload without
    /// touching refcount; absent inserts at refcount 1 (spec §9 resolution
    /// 5 — the original leaves a freshly built blob at refcount 0 despite
    /// handing back one live reference).
    fn create_blob_with_payload(&mut self, guid: Guid, payload: Vec<u8>) {
        match self.entries.get_mut(&guid) {
            Some(entry) => entry.data = Some(payload),
            None => {
                self.entries.insert(guid, BlobEntry { data: Some(payload), refcount: 1 });
            }
        }
    }

    pub fn inc(&mut self, guid: Guid) {
        if let Some(entry) = self.entries.get_mut(&guid) {
            entry.refcount += 1;
        }
    }

    /// Drop to 0 frees the payload and erases the entry.
    pub fn dec(&mut self, guid: Guid) {
        if let Some(entry) = self.entries.get_mut(&guid) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                self.entries.remove(&guid);
            }
        }
    }

    /// Account for a new logical owner of `reference` (e.g. assigning the
    /// same component value to a second entity).
    pub fn acquire<T>(&mut self, reference: &BlobReference<T>) {
        self.inc(reference.guid);
    }

    /// Account for one logical owner going away (e.g. an entity carrying
    /// `reference` is destroyed).
    pub fn release<T>(&mut self, reference: &BlobReference<T>) {
        self.dec(reference.guid);
    }

    pub fn refcount(&self, guid: Guid) -> u32 {
        self.entries.get(&guid).map(|e| e.refcount).unwrap_or(0)
    }

    pub fn payload(&self, guid: Guid) -> Option<&[u8]> {
        self.entries.get(&guid).and_then(|e| e.data.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A GUID-keyed handle into a [`BlobStore`]. Bitwise-copyable by design
/// (spec §9): no implicit `Drop`/`Clone` accounting, since the store is the
/// single place that calls `inc`/`dec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobReference<T> {
    guid: Guid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BlobReference<T> {
    pub fn guid(&self) -> Guid {
        self.guid
    }
}

impl<T> Default for BlobReference<T> {
    /// A reference to no blob (`Guid::INVALID`), useful as a placeholder
    /// before a component's real reference is assigned.
    fn default() -> Self {
        Self {
            guid: Guid::INVALID,
            _marker: PhantomData,
        }
    }
}

/// Builds a fresh blob under a caller-supplied GUID and installs its
/// payload, returning the first live reference to it.
pub struct BlobBuilder<T> {
    guid: Guid,
    payload: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BlobBuilder<T> {
    pub fn new(guid: Guid) -> Self {
        Self {
            guid,
            payload: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_payload(mut self, bytes: Vec<u8>) -> Self {
        self.payload = bytes;
        self
    }

    /// Installs the payload and returns a reference at refcount 1.
    pub fn build(self, store: &mut BlobStore) -> BlobReference<T> {
        store.create_blob_with_payload(self.guid, self.payload);
        BlobReference {
            guid: self.guid,
            _marker: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_installs_payload_at_refcount_one() {
        let mut blobs = BlobStore::new();
        let guid = Guid([1, 2, 3, 4]);
        let r: BlobReference<u32> = BlobBuilder::new(guid).with_payload(vec![9, 9]).build(&mut blobs);
        assert_eq!(blobs.refcount(guid), 1);
        assert_eq!(blobs.payload(r.guid()), Some(&[9, 9][..]));
    }

    /// Spec §8 scenario S5.
    #[test]
    fn blob_reference_counting_scenario_s5() {
        let mut blobs = BlobStore::new();
        let guid = Guid([1, 2, 3, 4]);

        let r1: BlobReference<u32> = BlobBuilder::new(guid).with_payload(vec![9]).build(&mut blobs);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.refcount(guid), 1);

        let r2 = r1; // bitwise copy, no accounting by itself
        blobs.acquire(&r2); // second entity's component now also counts
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.refcount(guid), 2);

        blobs.release(&r1);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs.refcount(guid), 1);

        blobs.release(&r2);
        assert!(blobs.is_empty());
    }

    #[test]
    fn create_blob_without_payload_starts_at_refcount_zero() {
        let mut blobs = BlobStore::new();
        let guid = Guid([5, 5, 5, 5]);
        blobs.create_blob(guid);
        assert_eq!(blobs.refcount(guid), 0);
        blobs.create_blob(guid);
        assert_eq!(blobs.refcount(guid), 1);
    }
}
