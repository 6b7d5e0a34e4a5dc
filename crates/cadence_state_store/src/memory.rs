//! In-memory backend.
//!
//! All tables sit behind one mutex, which makes every conditional write and
//! the build/event commit atomic with respect to each other.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use cadence_protocol::{
    can_overwrite, Build, BuildId, BuildStatus, Event, EventId, EventStatus, Job, JobId,
    NewBuild, NewEvent, NewJob, NewStage, PipelineId, Stage, StageBuild, StageBuildId, StageId,
    Step, StepId,
};
use chrono::Utc;
use tracing::debug;

use crate::state_store::{
    BuildStore, EventStore, JobStore, StageBuildStore, StageStore, StateStoreBackend, StepStore,
};

#[derive(Default)]
struct Tables {
    next_id: u64,
    builds: BTreeMap<BuildId, Build>,
    events: BTreeMap<EventId, Event>,
    jobs: BTreeMap<JobId, Job>,
    stages: BTreeMap<StageId, Stage>,
    stage_builds: BTreeMap<StageBuildId, StageBuild>,
    steps: BTreeMap<StepId, Step>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit_build_and_event` fail without writing anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory state store lock poisoned"))
    }
}

impl StateStoreBackend for MemoryStateStore {
    fn builds(&self) -> &dyn BuildStore {
        self
    }

    fn events(&self) -> &dyn EventStore {
        self
    }

    fn jobs(&self) -> &dyn JobStore {
        self
    }

    fn stages(&self) -> &dyn StageStore {
        self
    }

    fn stage_builds(&self) -> &dyn StageBuildStore {
        self
    }

    fn steps(&self) -> &dyn StepStore {
        self
    }

    fn commit_build_and_event(&self, build: &Build, event: &Event) -> Result<()> {
        let mut tables = self.lock()?;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            anyhow::bail!("simulated write failure committing build {}", build.id);
        }
        if !tables.builds.contains_key(&build.id) {
            anyhow::bail!("build {} does not exist", build.id);
        }
        if !tables.events.contains_key(&event.id) {
            anyhow::bail!("event {} does not exist", event.id);
        }
        tables.builds.insert(build.id, build.clone());
        tables.events.insert(event.id, event.clone());
        Ok(())
    }
}

impl BuildStore for MemoryStateStore {
    fn get(&self, id: BuildId) -> Result<Option<Build>> {
        Ok(self.lock()?.builds.get(&id).cloned())
    }

    fn create(&self, fields: NewBuild) -> Result<Build> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .builds
            .values()
            .find(|b| b.event_id == fields.event_id && b.job_id == fields.job_id)
        {
            debug!(build_id = %existing.id, job_id = %fields.job_id, "build already exists");
            return Ok(existing.clone());
        }
        let id = BuildId::new(tables.next_id());
        let mut build = Build::new(id, fields.job_id, fields.event_id);
        build.status = fields.status;
        build.parent_builds = fields.parent_builds;
        build.parent_build_ids = fields.parent_build_ids;
        tables.builds.insert(id, build.clone());
        Ok(build)
    }

    fn update(&self, build: &Build) -> Result<Build> {
        let mut tables = self.lock()?;
        let slot = tables
            .builds
            .get_mut(&build.id)
            .ok_or_else(|| anyhow!("build {} does not exist", build.id))?;
        *slot = build.clone();
        Ok(build.clone())
    }

    fn update_if(&self, build: &Build, expected: BuildStatus) -> Result<Option<Build>> {
        let mut tables = self.lock()?;
        let slot = tables
            .builds
            .get_mut(&build.id)
            .ok_or_else(|| anyhow!("build {} does not exist", build.id))?;
        if slot.status != expected {
            return Ok(None);
        }
        *slot = build.clone();
        Ok(Some(build.clone()))
    }

    fn transition_if(
        &self,
        id: BuildId,
        expected: BuildStatus,
        new: BuildStatus,
    ) -> Result<Option<Build>> {
        let mut tables = self.lock()?;
        let Some(slot) = tables.builds.get_mut(&id) else {
            return Ok(None);
        };
        if slot.status != expected {
            return Ok(None);
        }
        slot.status = new;
        Ok(Some(slot.clone()))
    }

    fn find(&self, event_id: EventId, job_id: JobId) -> Result<Option<Build>> {
        Ok(self
            .lock()?
            .builds
            .values()
            .find(|b| b.event_id == event_id && b.job_id == job_id)
            .cloned())
    }

    fn list_for_event(&self, event_id: EventId) -> Result<Vec<Build>> {
        Ok(self
            .lock()?
            .builds
            .values()
            .filter(|b| b.event_id == event_id)
            .cloned()
            .collect())
    }

    fn latest_for_job_before(
        &self,
        job_id: JobId,
        status: BuildStatus,
        before: BuildId,
    ) -> Result<Option<Build>> {
        Ok(self
            .lock()?
            .builds
            .range(..before)
            .rev()
            .map(|(_, b)| b)
            .find(|b| b.job_id == job_id && b.status == status)
            .cloned())
    }
}

impl EventStore for MemoryStateStore {
    fn get(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.lock()?.events.get(&id).cloned())
    }

    fn create(&self, fields: NewEvent) -> Result<Event> {
        let mut tables = self.lock()?;
        let id = EventId::new(tables.next_id());
        let event = Event {
            id,
            pipeline_id: fields.pipeline_id,
            workflow_graph: fields.workflow_graph,
            meta: fields.meta,
            cause_message: fields.cause_message,
            status: EventStatus::Unknown,
            pr_num: fields.pr_num,
            start_from: fields.start_from,
            created_at: Utc::now(),
        };
        tables.events.insert(id, event.clone());
        Ok(event)
    }

    fn update(&self, event: &Event) -> Result<Event> {
        let mut tables = self.lock()?;
        let slot = tables
            .events
            .get_mut(&event.id)
            .ok_or_else(|| anyhow!("event {} does not exist", event.id))?;
        *slot = event.clone();
        Ok(event.clone())
    }

    fn update_status(&self, id: EventId, status: EventStatus) -> Result<Option<Event>> {
        let mut tables = self.lock()?;
        Ok(tables.events.get_mut(&id).map(|event| {
            event.status = status;
            event.clone()
        }))
    }
}

impl JobStore for MemoryStateStore {
    fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    fn create(&self, fields: NewJob) -> Result<Job> {
        let mut tables = self.lock()?;
        if tables
            .jobs
            .values()
            .any(|j| j.pipeline_id == fields.pipeline_id && j.name == fields.name)
        {
            anyhow::bail!(
                "job '{}' already exists in pipeline {}",
                fields.name,
                fields.pipeline_id
            );
        }
        let id = JobId::new(tables.next_id());
        let job = Job {
            id,
            pipeline_id: fields.pipeline_id,
            name: fields.name,
            state: fields.state,
        };
        tables.jobs.insert(id, job.clone());
        Ok(job)
    }

    fn update(&self, job: &Job) -> Result<Job> {
        let mut tables = self.lock()?;
        let slot = tables
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| anyhow!("job {} does not exist", job.id))?;
        *slot = job.clone();
        Ok(job.clone())
    }

    fn find_by_name(&self, pipeline_id: PipelineId, name: &str) -> Result<Option<Job>> {
        Ok(self
            .lock()?
            .jobs
            .values()
            .find(|j| j.pipeline_id == pipeline_id && j.name == name)
            .cloned())
    }
}

impl StageStore for MemoryStateStore {
    fn get(&self, id: StageId) -> Result<Option<Stage>> {
        Ok(self.lock()?.stages.get(&id).cloned())
    }

    fn create(&self, fields: NewStage) -> Result<Stage> {
        let mut tables = self.lock()?;
        let id = StageId::new(tables.next_id());
        let stage = Stage {
            id,
            pipeline_id: fields.pipeline_id,
            name: fields.name,
            job_ids: fields.job_ids,
            setup: fields.setup,
            teardown: fields.teardown,
        };
        tables.stages.insert(id, stage.clone());
        Ok(stage)
    }

    fn find_by_name(&self, pipeline_id: PipelineId, name: &str) -> Result<Option<Stage>> {
        Ok(self
            .lock()?
            .stages
            .values()
            .find(|s| s.pipeline_id == pipeline_id && s.name == name)
            .cloned())
    }
}

impl StageBuildStore for MemoryStateStore {
    fn create(&self, stage_id: StageId, event_id: EventId) -> Result<StageBuild> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .stage_builds
            .values()
            .find(|sb| sb.stage_id == stage_id && sb.event_id == event_id)
        {
            return Ok(*existing);
        }
        let id = StageBuildId::new(tables.next_id());
        let stage_build = StageBuild {
            id,
            stage_id,
            event_id,
            status: BuildStatus::Created,
        };
        tables.stage_builds.insert(id, stage_build);
        Ok(stage_build)
    }

    fn find(&self, stage_id: StageId, event_id: EventId) -> Result<Option<StageBuild>> {
        Ok(self
            .lock()?
            .stage_builds
            .values()
            .find(|sb| sb.stage_id == stage_id && sb.event_id == event_id)
            .copied())
    }

    fn set_status_unless_terminal(
        &self,
        stage_id: StageId,
        event_id: EventId,
        status: BuildStatus,
    ) -> Result<Option<StageBuild>> {
        let mut tables = self.lock()?;
        let Some(stage_build) = tables
            .stage_builds
            .values_mut()
            .find(|sb| sb.stage_id == stage_id && sb.event_id == event_id)
        else {
            return Ok(None);
        };
        if can_overwrite(stage_build.status, status) {
            stage_build.status = status;
        }
        Ok(Some(*stage_build))
    }
}

impl StepStore for MemoryStateStore {
    fn create(&self, build_id: BuildId, name: &str) -> Result<Step> {
        let mut tables = self.lock()?;
        let id = StepId::new(tables.next_id());
        let step = Step {
            id,
            build_id,
            name: name.to_string(),
            start_time: None,
            end_time: None,
            code: None,
        };
        tables.steps.insert(id, step.clone());
        Ok(step)
    }

    fn get(&self, id: StepId) -> Result<Option<Step>> {
        Ok(self.lock()?.steps.get(&id).cloned())
    }

    fn find(&self, build_id: BuildId, name: &str) -> Result<Option<Step>> {
        Ok(self
            .lock()?
            .steps
            .values()
            .find(|s| s.build_id == build_id && s.name == name)
            .cloned())
    }

    fn update(&self, step: &Step) -> Result<Step> {
        let mut tables = self.lock()?;
        let slot = tables
            .steps
            .get_mut(&step.id)
            .ok_or_else(|| anyhow!("step {} does not exist", step.id))?;
        *slot = step.clone();
        Ok(step.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::StateStore;
    use cadence_protocol::WorkflowGraph;
    use std::sync::Arc;

    fn event(store: &StateStore) -> Event {
        store
            .events()
            .create(NewEvent {
                pipeline_id: PipelineId::new(1),
                workflow_graph: WorkflowGraph::default(),
                meta: Default::default(),
                cause_message: "push".into(),
                pr_num: None,
                start_from: "~commit".into(),
            })
            .unwrap()
    }

    #[test]
    fn create_is_unique_per_job_and_event() {
        let store = StateStore::memory();
        let event = event(&store);
        let first = store
            .builds()
            .create(NewBuild::created(JobId::new(50), event.id))
            .unwrap();
        let second = store
            .builds()
            .create(NewBuild::created(JobId::new(50), event.id))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.builds().list_for_event(event.id).unwrap().len(), 1);
    }

    #[test]
    fn transition_if_only_moves_from_expected() {
        let store = StateStore::memory();
        let event = event(&store);
        let build = store
            .builds()
            .create(NewBuild::created(JobId::new(50), event.id))
            .unwrap();

        let claimed = store
            .builds()
            .transition_if(build.id, BuildStatus::Created, BuildStatus::Queued)
            .unwrap();
        assert_eq!(claimed.map(|b| b.status), Some(BuildStatus::Queued));

        let again = store
            .builds()
            .transition_if(build.id, BuildStatus::Created, BuildStatus::Queued)
            .unwrap();
        assert!(again.is_none());
        assert!(store
            .builds()
            .transition_if(BuildId::new(999), BuildStatus::Created, BuildStatus::Queued)
            .unwrap()
            .is_none());
    }

    #[test]
    fn concurrent_claims_succeed_exactly_once() {
        let store = StateStore::memory();
        let event = event(&store);
        let build = store
            .builds()
            .create(NewBuild::created(JobId::new(50), event.id))
            .unwrap();

        let wins: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = store.clone();
                    scope.spawn(move || {
                        store
                            .builds()
                            .transition_if(build.id, BuildStatus::Created, BuildStatus::Queued)
                            .unwrap()
                            .is_some() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(wins, 1);
    }

    #[test]
    fn stage_build_first_terminal_wins() {
        let store = StateStore::memory();
        let event = event(&store);
        let stage_id = StageId::new(7);
        store.stage_builds().create(stage_id, event.id).unwrap();

        let set = |status| {
            store
                .stage_builds()
                .set_status_unless_terminal(stage_id, event.id, status)
                .unwrap()
                .unwrap()
                .status
        };
        assert_eq!(set(BuildStatus::Success), BuildStatus::Success);
        assert_eq!(set(BuildStatus::Failure), BuildStatus::Failure);
        assert_eq!(set(BuildStatus::Success), BuildStatus::Failure);
        assert_eq!(set(BuildStatus::Aborted), BuildStatus::Failure);

        assert!(store
            .stage_builds()
            .set_status_unless_terminal(StageId::new(8), event.id, BuildStatus::Success)
            .unwrap()
            .is_none());
    }

    #[test]
    fn failed_commit_writes_nothing() {
        let memory = Arc::new(MemoryStateStore::new());
        let store = StateStore::from_backend(memory.clone());
        let mut event = event(&store);
        let mut build = store
            .builds()
            .create(NewBuild::created(JobId::new(50), event.id))
            .unwrap();

        build.status = BuildStatus::Success;
        event.cause_message = "changed".into();
        memory.fail_next_commit();
        assert!(store.commit_build_and_event(&build, &event).is_err());
        assert_eq!(
            store.builds().get(build.id).unwrap().unwrap().status,
            BuildStatus::Created
        );
        assert_eq!(store.events().get(event.id).unwrap().unwrap().cause_message, "push");

        store.commit_build_and_event(&build, &event).unwrap();
        assert_eq!(
            store.builds().get(build.id).unwrap().unwrap().status,
            BuildStatus::Success
        );
    }

    #[test]
    fn latest_for_job_before_skips_later_builds() {
        let store = StateStore::memory();
        let job = JobId::new(50);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let event = event(&store);
            let mut build = store.builds().create(NewBuild::created(job, event.id)).unwrap();
            build.status = BuildStatus::Failure;
            store.builds().update(&build).unwrap();
            ids.push(build.id);
        }
        let latest = store
            .builds()
            .latest_for_job_before(job, BuildStatus::Failure, ids[2])
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, ids[1]);
        assert!(store
            .builds()
            .latest_for_job_before(job, BuildStatus::Failure, ids[0])
            .unwrap()
            .is_none());
        assert!(store
            .builds()
            .latest_for_job_before(job, BuildStatus::Success, BuildId::new(u64::MAX))
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_job_names_are_rejected() {
        let store = StateStore::memory();
        store
            .jobs()
            .create(NewJob::enabled(PipelineId::new(1), "main"))
            .unwrap();
        assert!(store
            .jobs()
            .create(NewJob::enabled(PipelineId::new(1), "main"))
            .is_err());
        assert!(store
            .jobs()
            .create(NewJob::enabled(PipelineId::new(2), "main"))
            .is_ok());
    }
}
