//! Type registry: assigns dense `type_id`s to component types in
//! registration order, recording size and an optional destructor thunk.

use std::any::{Any, TypeId};
use std::mem::{needs_drop, size_of};
use std::sync::atomic::{AtomicU32, Ordering};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::mask::CAPACITY;

/// A 4×i32 GUID used to give a component type a stable identity across
/// process runs (so serialized worlds round-trip stable type-ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid(pub [i32; 4]);

impl Guid {
    pub const INVALID: Guid = Guid([0, 0, 0, 0]);

    pub fn is_valid(&self) -> bool {
        self.0 != [0, 0, 0, 0]
    }
}

/// Marker for component types that should be looked up by [`Guid`] rather
/// than assigned a fresh id every process run.
pub trait Persistent {
    const GUID: Guid;
}

/// Marker for a component type that is a plain `'static + Send + Sync`
/// value. Blanket-implemented like the teacher's `Component` trait.
pub trait Component: 'static + Send + Sync {}
impl<T: 'static + Send + Sync> Component for T {}

/// Marker for a component type that embeds one or more
/// [`crate::blob::BlobReference`] values. Registering `T` via
/// [`TypeRegistry::get_or_register_with_blobs`] records a thunk that reads
/// every guid `T` carries off a raw row pointer, so `EntityStore` can call
/// [`crate::blob::BlobStore::dec`] when a row holding `T` is genuinely
/// discarded (destroy, overwrite, remove) without the caller having to
/// track which columns carry blob references by hand.
pub trait BlobRefs {
    fn blob_guids(&self) -> SmallVec<[Guid; 2]>;
}

/// Raw, type-erased descriptor for a registered component type.
#[derive(Clone, Copy)]
pub struct ComponentType {
    pub type_id: u32,
    pub size: u32,
    pub guid: Guid,
    /// Invoked on a raw pointer to run the value's destructor in place.
    /// `None` when `T` needs no drop glue.
    pub dtor: Option<unsafe fn(*mut u8)>,
    /// Invoked on a raw pointer to list every blob guid the value carries.
    /// `None` unless `T` was registered via
    /// [`TypeRegistry::get_or_register_with_blobs`].
    pub blob_guids: Option<unsafe fn(*const u8) -> SmallVec<[Guid; 2]>>,
}

impl std::fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentType")
            .field("type_id", &self.type_id)
            .field("size", &self.size)
            .field("guid", &self.guid)
            .field("has_dtor", &self.dtor.is_some())
            .field("has_blob_guids", &self.blob_guids.is_some())
            .finish()
    }
}

unsafe fn drop_in_place_thunk<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

unsafe fn blob_guids_thunk<T: BlobRefs>(ptr: *const u8) -> SmallVec<[Guid; 2]> {
    unsafe { (*(ptr as *const T)).blob_guids() }
}

/// Assigns dense integer `type_id`s on first lookup of a native type.
/// Two distinct types never share a `type_id`; once assigned, a type_id is
/// stable for the process's lifetime.
pub struct TypeRegistry {
    by_rust_type: FxHashMap<TypeId, ComponentType>,
    by_type_id: FxHashMap<u32, ComponentType>,
    by_guid: FxHashMap<Guid, u32>,
    counter: AtomicU32,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            by_rust_type: FxHashMap::default(),
            by_type_id: FxHashMap::default(),
            by_guid: FxHashMap::default(),
            counter: AtomicU32::new(0),
        }
    }

    /// Look up (registering on first use) the [`ComponentType`] for `T`.
    pub fn get_or_register<T: Component>(&mut self) -> ComponentType {
        let rust_id = TypeId::of::<T>();
        if let Some(ct) = self.by_rust_type.get(&rust_id) {
            return *ct;
        }
        self.register::<T>(Guid::INVALID, None)
    }

    /// Same as [`Self::get_or_register`], but records a [`BlobRefs`] thunk so
    /// `EntityStore` can find every blob guid `T` carries off a raw row
    /// pointer without the caller tracking it by hand.
    pub fn get_or_register_with_blobs<T: Component + BlobRefs>(&mut self) -> ComponentType {
        let rust_id = TypeId::of::<T>();
        if let Some(ct) = self.by_rust_type.get(&rust_id) {
            return *ct;
        }
        self.register::<T>(Guid::INVALID, Some(blob_guids_thunk::<T> as unsafe fn(*const u8) -> SmallVec<[Guid; 2]>))
    }

    /// Same as [`Self::get_or_register`] but for a type tagged [`Persistent`]:
    /// a previously assigned id for the same GUID is reused so serialized
    /// worlds round-trip stable type-ids.
    pub fn get_or_register_persistent<T: Component + Persistent>(&mut self) -> ComponentType {
        let rust_id = TypeId::of::<T>();
        if let Some(ct) = self.by_rust_type.get(&rust_id) {
            return *ct;
        }
        if let Some(&existing_id) = self.by_guid.get(&T::GUID) {
            let ct = ComponentType {
                type_id: existing_id,
                size: size_of::<T>() as u32,
                guid: T::GUID,
                dtor: needs_drop::<T>().then_some(drop_in_place_thunk::<T> as unsafe fn(*mut u8)),
                blob_guids: None,
            };
            self.by_rust_type.insert(rust_id, ct);
            return ct;
        }
        self.register::<T>(T::GUID, None)
    }

    fn register<T: Component>(&mut self, guid: Guid, blob_guids: Option<unsafe fn(*const u8) -> SmallVec<[Guid; 2]>>) -> ComponentType {
        let type_id = self.counter.fetch_add(1, Ordering::Relaxed);
        assert!(
            type_id < CAPACITY,
            "type registry overflow: more than {CAPACITY} component types registered"
        );
        let dtor = needs_drop::<T>().then_some(drop_in_place_thunk::<T> as unsafe fn(*mut u8));
        let ct = ComponentType {
            type_id,
            size: size_of::<T>() as u32,
            guid,
            dtor,
            blob_guids,
        };
        self.by_rust_type.insert(TypeId::of::<T>(), ct);
        self.by_type_id.insert(type_id, ct);
        if guid.is_valid() {
            self.by_guid.insert(guid, type_id);
        }
        ct
    }

    pub fn lookup(&self, type_id: u32) -> Option<ComponentType> {
        self.by_type_id.get(&type_id).copied()
    }

    pub fn lookup_rust_type(&self, rust_type: TypeId) -> Option<ComponentType> {
        self.by_rust_type.get(&rust_type).copied()
    }

    /// Resolve a [`Persistent`] type's stable `type_id` in *this* registry,
    /// used when loading a serialized world into a different process (spec
    /// §4.1(b)).
    pub fn lookup_guid(&self, guid: Guid) -> Option<u32> {
        self.by_guid.get(&guid).copied()
    }

    pub fn len(&self) -> usize {
        self.by_type_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type_id.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Manual impl since `AtomicU32` has no `Clone`. Used when a serialized
/// world must be deserialized into a registry that already knows the same
/// types (e.g. round-tripping within one process, or loading into a fresh
/// registry that re-registered every persistent type first).
impl Clone for TypeRegistry {
    fn clone(&self) -> Self {
        Self {
            by_rust_type: self.by_rust_type.clone(),
            by_type_id: self.by_type_id.clone(),
            by_guid: self.by_guid.clone(),
            counter: AtomicU32::new(self.counter.load(Ordering::Relaxed)),
        }
    }
}

/// Type-erased storage helper shared by chunks/blobs for `Any` downcasts.
pub(crate) fn type_id_of<T: 'static>() -> TypeId {
    TypeId::of::<T>()
}

#[allow(dead_code)]
pub(crate) fn as_any(x: &dyn Any) -> &dyn Any {
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct Dropper(std::sync::Arc<std::sync::atomic::AtomicU32>);
    impl Drop for Dropper {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn distinct_types_get_distinct_ids() {
        let mut reg = TypeRegistry::new();
        let a = reg.get_or_register::<A>();
        let b = reg.get_or_register::<B>();
        assert_ne!(a.type_id, b.type_id);
        // stable across repeated lookups
        let a2 = reg.get_or_register::<A>();
        assert_eq!(a.type_id, a2.type_id);
    }

    #[test]
    fn dtor_recorded_only_when_needed() {
        let mut reg = TypeRegistry::new();
        let a = reg.get_or_register::<A>();
        assert!(a.dtor.is_none());
        let d = reg.get_or_register::<Dropper>();
        assert!(d.dtor.is_some());
    }
}
