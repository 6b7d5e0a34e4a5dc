//! Stage Coordinator
//!
//! Maps jobs to stages, keeps the per-event [`StageBuild`] aggregate and
//! starts the stage teardown once every member and the setup have finished.
//! The teardown is claimed with a conditional CREATED -> QUEUED write, so
//! sibling completions racing through the completion check start it once.

use cadence_protocol::naming::{node_name, scoped_stage_name, stage_name_of};
use cadence_protocol::{Build, BuildStatus, Event, Job, NewBuild, Stage, StageBuild};
use cadence_state_store::build_ids_for_jobs;
use tracing::{debug, info};

use crate::controller::{Orchestrator, UpdateContext};
use crate::error::{OrchestratorError, Result};
use crate::metrics::METRICS;

pub struct StageCoordinator<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> StageCoordinator<'a> {
    pub(crate) fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Stage `job` belongs to in this event, if any.
    ///
    /// The graph node's `stageName` wins; setup and teardown jobs are also
    /// recognised by name. A stage named but not stored is an integrity error.
    pub fn resolve_stage(&self, job: &Job, event: &Event) -> Result<Option<Stage>> {
        let from_graph = event
            .workflow_graph
            .node(node_name(&job.name))
            .and_then(|node| node.stage_name.as_deref())
            .map(|stage_name| scoped_stage_name(&job.name, stage_name));
        let Some(stage_name) = from_graph.or_else(|| stage_name_of(&job.name)) else {
            return Ok(None);
        };

        self.orchestrator
            .store()
            .stages()
            .find_by_name(event.pipeline_id, &stage_name)?
            .map(Some)
            .ok_or_else(|| OrchestratorError::missing("stage", stage_name))
    }

    /// Fold a member's status into the stage build (first terminal wins) and
    /// return the record as stored.
    pub fn record_build_status(
        &self,
        stage: &Stage,
        event: &Event,
        status: BuildStatus,
    ) -> Result<StageBuild> {
        let stage_build = self
            .orchestrator
            .store()
            .stage_builds()
            .set_status_unless_terminal(stage.id, event.id, status)?
            .ok_or_else(|| {
                OrchestratorError::missing("stage build", format!("{}@{}", stage.name, event.id))
            })?;
        debug!(
            stage = %stage.name,
            event_id = %event.id,
            offered = %status,
            status = %stage_build.status,
            "stage build updated"
        );
        Ok(stage_build)
    }

    /// Every member and the setup have a finished build in `event`.
    pub fn is_stage_done(&self, stage: &Stage, event: &Event) -> Result<bool> {
        let builds = self.orchestrator.store().builds();
        for job_id in stage.completion_job_ids() {
            match builds.find(event.id, job_id)? {
                Some(build) if build.status.is_finished() => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Make sure the stage's teardown build exists (CREATED if new).
    pub fn ensure_teardown(&self, stage: &Stage, event: &Event) -> Result<Option<Build>> {
        let Some(teardown) = stage.teardown else {
            return Ok(None);
        };
        let build = self
            .orchestrator
            .store()
            .builds()
            .create(NewBuild::created(teardown, event.id))?;
        Ok(Some(build))
    }

    /// [`StageCoordinator::ensure_teardown`] for the stage a setup or
    /// teardown job name points at. Names outside any stored stage are ignored.
    pub fn ensure_teardown_for(&self, job_name: &str, event: &Event) -> Result<Option<Build>> {
        let Some(stage_name) = stage_name_of(job_name) else {
            return Ok(None);
        };
        match self
            .orchestrator
            .store()
            .stages()
            .find_by_name(event.pipeline_id, &stage_name)?
        {
            Some(stage) => self.ensure_teardown(&stage, event),
            None => Ok(None),
        }
    }

    /// Claim the teardown (CREATED -> QUEUED) and start it.
    ///
    /// Returns `None` when there is no teardown or someone else already
    /// claimed it.
    pub fn start_teardown(
        &self,
        stage: &Stage,
        event: &Event,
        ctx: &UpdateContext,
    ) -> Result<Option<Build>> {
        let Some(teardown) = self.ensure_teardown(stage, event)? else {
            return Ok(None);
        };
        let store = self.orchestrator.store();
        let builds = store.builds();
        let Some(mut claimed) =
            builds.transition_if(teardown.id, BuildStatus::Created, BuildStatus::Queued)?
        else {
            debug!(stage = %stage.name, build_id = %teardown.id, status = %teardown.status, "teardown already claimed");
            return Ok(None);
        };

        claimed.parent_build_ids =
            build_ids_for_jobs(builds, event.id, &stage.completion_job_ids())?;
        let claimed = builds.update(&claimed)?;
        let job = store
            .jobs()
            .get(claimed.job_id)?
            .ok_or_else(|| OrchestratorError::missing("job", claimed.job_id))?;

        METRICS.inc_teardowns_started();
        info!(
            stage = %stage.name,
            event_id = %event.id,
            build_id = %claimed.id,
            "starting stage teardown"
        );
        self.orchestrator
            .resolver()
            .start_claimed(claimed, &job, event, None, ctx)
            .map(Some)
    }

    /// Start the teardown if the stage is complete and the teardown is
    /// still CREATED. Safe to call from every finishing member.
    pub fn start_teardown_if_done(
        &self,
        stage: &Stage,
        event: &Event,
        ctx: &UpdateContext,
    ) -> Result<Option<Build>> {
        if stage.teardown.is_none() {
            return Ok(None);
        }
        self.ensure_teardown(stage, event)?;
        if !self.is_stage_done(stage, event)? {
            return Ok(None);
        }
        self.start_teardown(stage, event, ctx)
    }
}
