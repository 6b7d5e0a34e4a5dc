use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use cadence_protocol::{
    Build, BuildId, BuildStatus, Event, EventId, EventStatus, Job, JobId, NewBuild, NewEvent,
    NewJob, NewStage, PipelineId, Stage, StageBuild, StageId, Step, StepId,
};

use crate::memory::MemoryStateStore;

/// Parsed state store URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateStoreUrl {
    Memory,
}

impl StateStoreUrl {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "memory" | "memory:" | "memory://" => Ok(Self::Memory),
            other => anyhow::bail!("Unsupported state store URL: {other}"),
        }
    }
}

/// Semantic state store wrapper.
///
/// Cheap to clone; every clone talks to the same backend.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<dyn StateStoreBackend>,
}

impl StateStore {
    pub fn open(raw: &str) -> Result<Self> {
        let url = StateStoreUrl::parse(raw)?;
        Ok(Self::from_url(url))
    }

    pub fn from_url(url: StateStoreUrl) -> Self {
        match url {
            StateStoreUrl::Memory => Self::memory(),
        }
    }

    pub fn memory() -> Self {
        Self::from_backend(Arc::new(MemoryStateStore::new()))
    }

    pub fn from_backend(inner: Arc<dyn StateStoreBackend>) -> Self {
        Self { inner }
    }

    pub fn builds(&self) -> &dyn BuildStore {
        self.inner.builds()
    }

    pub fn events(&self) -> &dyn EventStore {
        self.inner.events()
    }

    pub fn jobs(&self) -> &dyn JobStore {
        self.inner.jobs()
    }

    pub fn stages(&self) -> &dyn StageStore {
        self.inner.stages()
    }

    pub fn stage_builds(&self) -> &dyn StageBuildStore {
        self.inner.stage_builds()
    }

    pub fn steps(&self) -> &dyn StepStore {
        self.inner.steps()
    }

    /// Persist a build and its event together: both rows land or neither does.
    pub fn commit_build_and_event(&self, build: &Build, event: &Event) -> Result<()> {
        self.inner.commit_build_and_event(build, event)
    }
}

pub trait StateStoreBackend: Send + Sync {
    fn builds(&self) -> &dyn BuildStore;
    fn events(&self) -> &dyn EventStore;
    fn jobs(&self) -> &dyn JobStore;
    fn stages(&self) -> &dyn StageStore;
    fn stage_builds(&self) -> &dyn StageBuildStore;
    fn steps(&self) -> &dyn StepStore;

    fn commit_build_and_event(&self, build: &Build, event: &Event) -> Result<()>;
}

// ============================================================================
// Builds
// ============================================================================

pub trait BuildStore: Send + Sync {
    fn get(&self, id: BuildId) -> Result<Option<Build>>;

    /// Create a build. There is at most one build per (job, event): creating
    /// a second one returns the existing row untouched.
    fn create(&self, fields: NewBuild) -> Result<Build>;

    /// Persist every field of `build`.
    fn update(&self, build: &Build) -> Result<Build>;

    /// Persist `build` only if the stored status still equals `expected`.
    fn update_if(&self, build: &Build, expected: BuildStatus) -> Result<Option<Build>>;

    /// Atomically move a build from `expected` to `new`.
    ///
    /// Returns `None` when the stored status is no longer `expected`.
    fn transition_if(
        &self,
        id: BuildId,
        expected: BuildStatus,
        new: BuildStatus,
    ) -> Result<Option<Build>>;

    fn find(&self, event_id: EventId, job_id: JobId) -> Result<Option<Build>>;
    fn list_for_event(&self, event_id: EventId) -> Result<Vec<Build>>;

    /// Most recent build of a job in the given status with an id below
    /// `before`, across events.
    fn latest_for_job_before(
        &self,
        job_id: JobId,
        status: BuildStatus,
        before: BuildId,
    ) -> Result<Option<Build>>;
}

// ============================================================================
// Events
// ============================================================================

pub trait EventStore: Send + Sync {
    fn get(&self, id: EventId) -> Result<Option<Event>>;
    fn create(&self, fields: NewEvent) -> Result<Event>;
    fn update(&self, event: &Event) -> Result<Event>;

    /// Write only the aggregate status, leaving meta as currently stored.
    fn update_status(&self, id: EventId, status: EventStatus) -> Result<Option<Event>>;
}

// ============================================================================
// Jobs and stages
// ============================================================================

pub trait JobStore: Send + Sync {
    fn get(&self, id: JobId) -> Result<Option<Job>>;
    fn create(&self, fields: NewJob) -> Result<Job>;
    fn update(&self, job: &Job) -> Result<Job>;
    fn find_by_name(&self, pipeline_id: PipelineId, name: &str) -> Result<Option<Job>>;
}

pub trait StageStore: Send + Sync {
    fn get(&self, id: StageId) -> Result<Option<Stage>>;
    fn create(&self, fields: NewStage) -> Result<Stage>;
    fn find_by_name(&self, pipeline_id: PipelineId, name: &str) -> Result<Option<Stage>>;
}

pub trait StageBuildStore: Send + Sync {
    /// Create the (stage, event) record in CREATED, or return the existing one.
    fn create(&self, stage_id: StageId, event_id: EventId) -> Result<StageBuild>;
    fn find(&self, stage_id: StageId, event_id: EventId) -> Result<Option<StageBuild>>;

    /// Apply first-terminal-wins atomically and return the record as stored
    /// afterwards. `None` when no record exists for the pair.
    fn set_status_unless_terminal(
        &self,
        stage_id: StageId,
        event_id: EventId,
        status: BuildStatus,
    ) -> Result<Option<StageBuild>>;
}

pub trait StepStore: Send + Sync {
    fn create(&self, build_id: BuildId, name: &str) -> Result<Step>;
    fn get(&self, id: StepId) -> Result<Option<Step>>;
    fn find(&self, build_id: BuildId, name: &str) -> Result<Option<Step>>;
    fn update(&self, step: &Step) -> Result<Step>;
}

/// Ids of the builds an event holds for `job_ids`.
pub fn build_ids_for_jobs(
    builds: &dyn BuildStore,
    event_id: EventId,
    job_ids: &BTreeSet<JobId>,
) -> Result<Vec<BuildId>> {
    Ok(builds
        .list_for_event(event_id)?
        .into_iter()
        .filter(|build| job_ids.contains(&build.job_id))
        .map(|build| build.id)
        .collect())
}
