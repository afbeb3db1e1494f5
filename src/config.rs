//! Runtime tunables.
//!
//! The core has no file-based configuration surface (the CLI is out of
//! scope); embedding applications construct an [`EcsConfig`] directly and
//! pass it to [`crate::store::EntityStore::new`].

/// Tunable limits for a single [`crate::store::EntityStore`].
#[derive(Debug, Clone, Copy)]
pub struct EcsConfig {
    /// Byte budget for a single archetype chunk's backing buffer before it
    /// must grow. Chunks still grow past this via `resize` (see §4.5(b));
    /// this is the initial allocation, not a hard cap.
    pub chunk_bytes: usize,

    /// Maximum bytes a job's capture may occupy before it would need a heap
    /// allocation in the original. Enforced in
    /// [`crate::job::JobGraph::enqueue_with_deps`]: a job whose closure
    /// capture exceeds this is a precondition violation and panics.
    pub job_inline_payload_bytes: usize,

    /// Maximum number of distinct chunk-column references a single
    /// `for_each` dispatch may touch. A soft, liftable working-set limit
    /// (spec §9, open question 4), not a user-visible contract.
    pub max_foreach_columns: usize,

    /// Number of worker threads started by [`crate::job::WorkerManager::start`]
    /// when the caller does not specify a count explicitly.
    pub default_worker_count: usize,

    /// Hard ceiling on the number of distinct archetypes the store will
    /// create, guarding against runaway archetype explosion from pathological
    /// component combinations.
    pub max_archetypes: usize,
}

impl Default for EcsConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 64 * 1024,
            job_inline_payload_bytes: 2560,
            max_foreach_columns: 50,
            default_worker_count: 4,
            max_archetypes: 10_000,
        }
    }
}
