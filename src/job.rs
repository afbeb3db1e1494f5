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

//! Job graph: a dependency-tracked job queue and worker pool.
//!
//! Grounded on `NodeVision.Jobs.hpp`'s `JobQueue`/`Worker`/`WorkerManager`:
//! versioned handles make the "already complete" check lock-free on the
//! fast path, jobs carry a small inline payload to avoid a heap allocation
//! per dispatch, and completion walks a per-slot dependency chain rather
//! than a central DAG.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::config::EcsConfig;

/// Anything a worker can run. Boxed so the queue can hold heterogeneous
/// jobs; the original's 2560-byte inline-payload cap existed to dodge a
/// per-job `malloc` in C++, which isn't a concern for a boxed closure in
/// Rust, but [`JobGraph::enqueue_with_deps`] still enforces
/// [`EcsConfig::job_inline_payload_bytes`] against the closure's capture
/// size, for parity with the original's precondition.
pub trait Job: Send + 'static {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send + 'static> Job for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Versioned index into a job slot. Active iff the graph's slot at `index`
/// still carries `version`; once the job finishes, the slot's version is
/// incremented, making all outstanding handles for it stale (= complete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub index: u32,
    pub version: u32,
}

impl JobHandle {
    /// A handle that is always already-complete; used as the default
    /// "nothing to wait on" dependency.
    pub const NONE: JobHandle = JobHandle {
        index: u32::MAX,
        version: 0,
    };
}

struct JobSlot {
    version: u32,
    /// Jobs chained behind this one, woken on completion.
    chain: SmallVec<[JobHandle; 4]>,
    dependency_left: u32,
    job: Option<Box<dyn Job>>,
    condvar: Condvar,
}

impl JobSlot {
    fn fresh() -> Self {
        Self {
            version: 0,
            chain: SmallVec::new(),
            dependency_left: 0,
            job: None,
            condvar: Condvar::new(),
        }
    }
}

struct Inner {
    slots: Vec<JobSlot>,
    free_indices: Vec<u32>,
}

impl Inner {
    fn handle_active(&self, h: JobHandle) -> bool {
        h.index != u32::MAX
            && (h.index as usize) < self.slots.len()
            && self.slots[h.index as usize].version == h.version
    }

    fn alloc_slot(&mut self) -> u32 {
        if let Some(i) = self.free_indices.pop() {
            i
        } else {
            self.slots.push(JobSlot::fresh());
            (self.slots.len() - 1) as u32
        }
    }
}

/// The dependency-tracked job queue. The slot table is guarded by one mutex
/// (spec §5's "shared-resource policy"); the ready queue itself is a
/// lock-free MPMC queue so a worker popping its next job never contends
/// with another thread's slot-table bookkeeping. Job *bodies* run unguarded
/// because the handle DAG guarantees no concurrent writers/readers overlap.
pub struct JobGraph {
    inner: Mutex<Inner>,
    ready: SegQueue<u32>,
    wake: Arc<WakeSet>,
    job_inline_payload_bytes: usize,
}

/// One auto-reset-event per worker, used to wake a single idle worker on
/// enqueue (spec §4.8: "a new enqueue wakes one idle worker").
struct WakeSet {
    events: Vec<AutoResetEvent>,
}

struct AutoResetEvent {
    flag: Mutex<bool>,
    condvar: Condvar,
    sleeping: AtomicBool,
}

impl AutoResetEvent {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            condvar: Condvar::new(),
            sleeping: AtomicBool::new(false),
        }
    }

    fn set(&self) {
        let mut guard = self.flag.lock();
        *guard = true;
        self.condvar.notify_one();
    }

    fn wait(&self) {
        self.sleeping.store(true, Ordering::SeqCst);
        let mut guard = self.flag.lock();
        while !*guard {
            self.condvar.wait(&mut guard);
        }
        *guard = false;
        self.sleeping.store(false, Ordering::SeqCst);
    }

    fn idle(&self) -> bool {
        self.sleeping.load(Ordering::SeqCst)
    }
}

impl JobGraph {
    pub fn new() -> Self {
        Self::with_worker_slots(0, EcsConfig::default().job_inline_payload_bytes)
    }

    fn with_worker_slots(worker_count: usize, job_inline_payload_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free_indices: Vec::new(),
            }),
            ready: SegQueue::new(),
            wake: Arc::new(WakeSet {
                events: (0..worker_count).map(|_| AutoResetEvent::new()).collect(),
            }),
            job_inline_payload_bytes,
        }
    }

    /// Enqueue a job with no dependencies.
    pub fn enqueue(&self, job: impl Job) -> JobHandle {
        self.enqueue_with_deps(job, &[])
    }

    /// Enqueue a job that becomes ready once every still-active dependency
    /// in `deps` has completed.
    ///
    /// # Panics
    /// Panics if `job`'s capture size exceeds the configured
    /// [`EcsConfig::job_inline_payload_bytes`] — a precondition violation,
    /// not a recoverable error (spec parity with the original's inline
    /// payload budget; see [`Job`]'s doc comment).
    pub fn enqueue_with_deps(&self, job: impl Job, deps: &[JobHandle]) -> JobHandle {
        assert!(
            std::mem::size_of_val(&job) <= self.job_inline_payload_bytes,
            "job payload ({} bytes) exceeds configured inline limit ({} bytes)",
            std::mem::size_of_val(&job),
            self.job_inline_payload_bytes,
        );
        let mut inner = self.inner.lock();
        let index = inner.alloc_slot();
        let version = inner.slots[index as usize].version;
        inner.slots[index as usize].job = Some(Box::new(job));
        let handle = JobHandle { index, version };
        self.link_and_ready(&mut inner, handle, deps, true);
        drop(inner);
        self.wake_one();
        handle
    }

    /// Combine-only job: no payload, `execute_flag = false`. Completes
    /// immediately (no executor ever runs) once its dependencies are
    /// satisfied.
    pub fn combine(&self, deps: &[JobHandle]) -> JobHandle {
        let mut inner = self.inner.lock();
        let index = inner.alloc_slot();
        let version = inner.slots[index as usize].version;
        let handle = JobHandle { index, version };
        self.link_and_ready(&mut inner, handle, deps, false);
        drop(inner);
        self.wake_one();
        handle
    }

    fn link_and_ready(&self, inner: &mut Inner, handle: JobHandle, deps: &[JobHandle], has_job: bool) {
        let mut dependency_left = 0u32;
        for &dep in deps {
            if inner.handle_active(dep) {
                inner.slots[dep.index as usize].chain.push(handle);
                dependency_left += 1;
            }
        }
        inner.slots[handle.index as usize].dependency_left = dependency_left;
        if dependency_left == 0 {
            if has_job {
                self.ready.push(handle.index);
            } else {
                // Combine-only and already satisfied: complete inline
                // without ever touching the ready queue or an executor.
                self.complete_slot_locked(inner, handle.index);
            }
        }
    }

    /// Block until `handle`'s job (and everything it depends on) has run.
    /// A second call on an already-complete handle returns immediately.
    pub fn complete(&self, handle: JobHandle) {
        if handle.index == u32::MAX {
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.handle_active(handle) {
            return;
        }
        // parking_lot's Condvar::wait takes the guard directly.
        loop {
            if !inner.handle_active(handle) {
                return;
            }
            let slot = &inner.slots[handle.index as usize];
            // SAFETY: `cv` points into `inner.slots`, which cannot be
            // reallocated while we hold the lock; `Condvar::wait` only
            // needs the pointee to outlive the call itself.
            let cv: *const Condvar = &slot.condvar;
            unsafe { (*cv).wait(&mut inner) };
        }
    }

    fn complete_slot_locked(&self, inner: &mut Inner, index: u32) {
        inner.slots[index as usize].version = inner.slots[index as usize].version.wrapping_add(1);
        inner.free_indices.push(index);
        let chain = std::mem::take(&mut inner.slots[index as usize].chain);
        for dep in chain {
            if inner.handle_active(dep) {
                let left = &mut inner.slots[dep.index as usize].dependency_left;
                *left = left.saturating_sub(1);
                if *left == 0 {
                    let has_job = inner.slots[dep.index as usize].job.is_some();
                    if has_job {
                        self.ready.push(dep.index);
                    } else {
                        self.complete_slot_locked(inner, dep.index);
                    }
                }
            }
        }
        inner.slots[index as usize].condvar.notify_all();
    }

    fn try_dequeue(&self) -> Option<(u32, Box<dyn Job>)> {
        let index = self.ready.pop()?;
        let mut inner = self.inner.lock();
        let job = inner.slots[index as usize].job.take();
        Some((index, job.unwrap()))
    }

    fn set_completed(&self, index: u32) {
        let mut inner = self.inner.lock();
        self.complete_slot_locked(&mut inner, index);
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        self.ready.is_empty() && inner.slots.len() == inner.free_indices.len()
    }

    fn wake_one(&self) {
        for ev in &self.wake.events {
            if ev.idle() {
                ev.set();
                return;
            }
        }
    }
}

impl Default for JobGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// A pool of OS threads draining a [`JobGraph`]'s ready queue.
pub struct WorkerManager {
    graph: Arc<JobGraph>,
    handles: Vec<std::thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl WorkerManager {
    /// Construct a manager with no workers started yet. Call [`Self::start`]
    /// to spawn threads before scheduling jobs that need to run in parallel.
    pub fn new() -> Self {
        Self {
            graph: Arc::new(JobGraph::new()),
            handles: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn graph(&self) -> &Arc<JobGraph> {
        &self.graph
    }

    /// Spawn `count` worker threads (or [`EcsConfig::default_worker_count`]
    /// if `count` is `0`). Must be called before the graph has any workers;
    /// replaces the internal job graph with one sized for that many wake
    /// events.
    pub fn start(&mut self, config: &EcsConfig, count: usize) {
        assert!(self.handles.is_empty(), "WorkerManager::start called twice");
        let count = if count == 0 { config.default_worker_count } else { count };
        self.graph = Arc::new(JobGraph::with_worker_slots(count, config.job_inline_payload_bytes));
        self.running.store(true, Ordering::SeqCst);
        for id in 0..count {
            let graph = self.graph.clone();
            let running = self.running.clone();
            self.handles.push(std::thread::spawn(move || Self::run_worker(graph, running, id)));
        }
    }

    fn run_worker(graph: Arc<JobGraph>, running: Arc<AtomicBool>, id: usize) {
        loop {
            if let Some((index, job)) = graph.try_dequeue() {
                job.run();
                graph.set_completed(index);
                continue;
            }
            if !running.load(Ordering::SeqCst) {
                return;
            }
            if let Some(ev) = graph.wake.events.get(id) {
                ev.wait();
            } else {
                std::thread::yield_now();
            }
            if !running.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Block until the ready queue and all in-flight dependency chains
    /// have drained.
    pub fn wait(&self) {
        while !self.graph.is_empty() {
            std::thread::yield_now();
        }
    }

    /// Stop accepting new work, wait for quiescence, and join every worker.
    pub fn stop(mut self) {
        self.wait();
        self.running.store(false, Ordering::SeqCst);
        for ev in &self.graph.wake.events {
            ev.set();
        }
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn combine_only_job_completes_without_executor() {
        let graph = JobGraph::new();
        let a = graph.enqueue(|| {});
        graph.complete(a);
        let combined = graph.combine(&[a]);
        // `a` already complete, so combine is satisfied immediately.
        graph.complete(combined);
    }

    #[test]
    fn dependent_job_sees_effects_of_dependency() {
        let mut wm = WorkerManager::new();
        wm.start(&EcsConfig::default(), 2);
        let result = Arc::new(AtomicI64::new(0));
        let r1 = result.clone();
        let x = wm.graph().enqueue(move || {
            r1.store(7, Ordering::SeqCst);
        });
        let r2 = result.clone();
        let y = wm.graph().enqueue_with_deps(
            move || {
                let v = r2.load(Ordering::SeqCst);
                r2.store(v * 9, Ordering::SeqCst);
            },
            &[x],
        );
        wm.graph().complete(y);
        assert_eq!(result.load(Ordering::SeqCst), 63);
        wm.stop();
    }

    #[test]
    fn complete_is_idempotent() {
        let mut wm = WorkerManager::new();
        wm.start(&EcsConfig::default(), 1);
        let h = wm.graph().enqueue(|| {});
        wm.graph().complete(h);
        wm.graph().complete(h); // second call must not block/panic
        wm.stop();
    }
}
