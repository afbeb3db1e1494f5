//! Spec §8's six testable scenarios, run end to end against the public API.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chunk_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct A {
    value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct B {
    value: i32,
    other: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct C {
    value: i32,
}

#[test]
fn s1_single_column_scan() {
    let mut store = EntityStore::new(EcsConfig::default());
    for v in [10, 15, 20] {
        store.spawn((A { value: v },));
    }

    let mut query = Query::new(&mut store).with::<A>();
    assert_eq!(query.count(), 3);

    let mut total = 0;
    query.for_each1::<R<A>>(|_e, a| total += a.value);
    assert_eq!(total, 45);
}

#[test]
fn s2_structural_change_during_destroy() {
    let mut store = EntityStore::new(EcsConfig::default());
    let e1 = store.spawn((A { value: 5 }, B { value: 5, other: 10 }));
    let e2 = store.spawn((A { value: 6 }, B { value: 10, other: 12 }));

    store.destroy_entity(e1);

    assert_eq!(store.get_component::<A>(e2).value, 6);
    assert_eq!(store.get_component::<B>(e2).value, 10);
}

#[test]
fn s3_add_component_migrates() {
    let mut store = EntityStore::new(EcsConfig::default());
    let e = store.spawn((A { value: 7 },));

    store.add_component(e, C { value: 9 });

    let mut query = Query::new(&mut store).with::<A>().with::<C>();
    assert_eq!(query.count(), 1);
    assert_eq!(store.get_component::<C>(e).value, 9);
    assert_eq!(store.get_component::<A>(e).value, 7);
}

#[test]
fn s4_deferred_command_buffer() {
    let mut store = EntityStore::new(EcsConfig::default());
    let e = store.spawn((A { value: 5 },));

    let mut buffer = CommandBuffer::new();
    buffer.add_component(e, B { value: 20, other: 0 });
    buffer.apply(&mut store);

    assert_eq!(store.get_component::<B>(e).value, 20);
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Mesh {
    blob: BlobReference<Mesh>,
}

impl BlobRefs for Mesh {
    fn blob_guids(&self) -> smallvec::SmallVec<[Guid; 2]> {
        smallvec::smallvec![self.blob.guid()]
    }
}

/// Exercises spec §8 property 6 through real store operations rather than
/// `BlobStore` in isolation: two entities attach the same blob guid (the
/// second attachment is an explicit duplication, accounted for by the
/// caller via `acquire`, per `BlobStore`'s own contract), then
/// `destroy_entity`/`set_component` on the store automatically release
/// their share as each entity's row is genuinely discarded.
#[test]
fn s5_blob_reference_counting() {
    let mut store = EntityStore::new(EcsConfig::default());
    store.register_blob_component::<Mesh>();
    let guid = Guid([1, 2, 3, 4]);
    let blob = BlobBuilder::new(guid).with_payload(vec![0]).build(store.blobs_mut());
    assert_eq!(store.blobs().refcount(guid), 1);

    let e1 = store.spawn((Mesh { blob },));
    let e2 = store.spawn((Mesh { blob },));
    store.blobs_mut().acquire(&blob); // e2's copy is an explicit duplication
    assert_eq!(store.blobs().refcount(guid), 2);

    store.destroy_entity(e1);
    assert_eq!(store.blobs().refcount(guid), 1);

    store.set_component(e2, Mesh { blob: BlobReference::<Mesh>::default() });
    assert!(store.blobs().is_empty());
}

#[test]
fn s6_job_combine() {
    let mut workers = chunk_ecs::WorkerManager::new();
    workers.start(&EcsConfig::default(), 2);
    let graph = workers.graph().clone();

    let x = Arc::new(std::sync::atomic::AtomicI64::new(0));
    let y = Arc::new(std::sync::atomic::AtomicI64::new(0));
    let result = Arc::new(std::sync::atomic::AtomicI64::new(0));

    let xh = {
        let x = x.clone();
        graph.enqueue(move || x.store(5 + 2, Ordering::SeqCst))
    };
    let yh = {
        let y = y.clone();
        graph.enqueue(move || y.store(6 + 3, Ordering::SeqCst))
    };
    let combined = graph.combine(&[xh, yh]);
    let mul = {
        let x = x.clone();
        let y = y.clone();
        let result = result.clone();
        graph.enqueue_with_deps(move || result.store(x.load(Ordering::SeqCst) * y.load(Ordering::SeqCst), Ordering::SeqCst), &[combined])
    };

    graph.complete(mul);
    assert_eq!(result.load(Ordering::SeqCst), (5 + 2) * (6 + 3));
    workers.stop();
}
