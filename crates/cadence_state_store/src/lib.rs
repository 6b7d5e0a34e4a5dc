//! Cadence state store (orchestrator persistence).
//!
//! Trait-object stores for builds, events, jobs, stages, stage builds and
//! steps, plus an in-memory backend. Conditional writes (`transition_if`,
//! `set_status_unless_terminal`) are single atomic store operations so
//! concurrent completions cannot double-claim a build.

pub mod memory;
pub mod state_store;

pub use memory::MemoryStateStore;
pub use state_store::{
    build_ids_for_jobs, BuildStore, EventStore, JobStore, StageBuildStore, StageStore,
    StateStore, StateStoreBackend, StateStoreUrl, StepStore,
};
