//! Cadence domain model
//!
//! Canonical statuses, entities and the workflow graph snapshot shared by the
//! state store, the orchestrator and the CLI.
//!
//! - [`status`]: closed build/event status enums and membership predicates
//! - [`transition`]: the build transition table and status-message policy
//! - [`model`]: builds, jobs, events, stages, stage builds and steps
//! - [`graph`]: workflow graph snapshot carried by every event
//! - [`meta`]: right-biased deep merge for build/event metadata
//! - [`naming`]: stage and PR job naming conventions

pub mod defaults;
pub mod graph;
pub mod meta;
pub mod model;
pub mod naming;
pub mod status;
pub mod transition;

pub use cadence_ids::{BuildId, EventId, JobId, PipelineId, StageBuildId, StageId, StepId};

pub use graph::{WorkflowEdge, WorkflowGraph, WorkflowNode};
pub use meta::deep_merge;
pub use model::{
    Build, Event, Job, JobState, Meta, NewBuild, NewEvent, NewJob, NewStage, ParentBuild, Stage,
    StageBuild, StatusMessageType, Step,
};
pub use status::{can_overwrite, derive_event_status, is_terminal, BuildStatus, EventStatus};
pub use transition::{
    plan_transition, CompletionEffect, MessageRule, TransitionPlan, TransitionRejection,
};
