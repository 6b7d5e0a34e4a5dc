//! Workflow Trigger Resolver
//!
//! Turns the oracle's "next job names" into builds: reuse the event's build
//! for a job if one exists, create it otherwise, then claim it
//! (CREATED -> QUEUED, conditional) and hand it to the executor. Virtual jobs
//! are completed through the controller instead of being started. Stage
//! teardowns are only materialized here; the stage coordinator starts them.

use std::collections::BTreeSet;

use cadence_protocol::naming::{is_stage_setup, is_stage_teardown, node_name};
use cadence_protocol::{Build, BuildStatus, Event, Job, Meta, NewBuild, ParentBuild};
use tracing::{debug, info, warn};

use crate::controller::{Orchestrator, UpdateContext};
use crate::error::{OrchestratorError, Result};
use crate::metrics::METRICS;
use crate::ports::GraphQuery;

pub struct TriggerResolver<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> TriggerResolver<'a> {
    pub(crate) fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Start whatever `finished` unblocks.
    ///
    /// Siblings are independent: every one is attempted, and a start failure
    /// is reported as [`OrchestratorError::TriggerFailed`] after the rest ran.
    /// Missing rows abort immediately.
    pub fn resolve(
        &self,
        finished: &Build,
        job: &Job,
        event: &Event,
        ctx: &UpdateContext,
    ) -> Result<Vec<Build>> {
        let store = self.orchestrator.store();
        let satisfied = self.satisfied_jobs(event)?;
        let query = GraphQuery {
            graph: &event.workflow_graph,
            trigger: &job.name,
            pr_num: event.pr_num,
            satisfied: &satisfied,
        };
        let next = self.orchestrator.oracle().next_jobs(&query)?;
        if next.is_empty() {
            debug!(build_id = %finished.id, job = %job.name, "nothing downstream");
            return Ok(Vec::new());
        }
        info!(build_id = %finished.id, job = %job.name, next = ?next, "triggering downstream jobs");

        let mut triggered = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;
        for name in next {
            let next_job = store
                .jobs()
                .find_by_name(event.pipeline_id, &name)?
                .ok_or_else(|| OrchestratorError::missing("job", &name))?;
            if !next_job.is_enabled() {
                info!(job = %name, event_id = %event.id, "job disabled, not triggering");
                continue;
            }

            match self.materialize(finished, job, &next_job, event, ctx) {
                Ok(build) => triggered.push(build),
                Err(err) if err.is_retryable() => {
                    warn!(job = %name, event_id = %event.id, error = %err, "downstream start failed");
                    failed.push(name);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        match first_error {
            Some(source) => Err(OrchestratorError::TriggerFailed {
                failed,
                source: Box::new(source),
            }),
            None => Ok(triggered),
        }
    }

    /// Node names of jobs whose builds in `event` reached SUCCESS.
    fn satisfied_jobs(&self, event: &Event) -> Result<BTreeSet<String>> {
        let store = self.orchestrator.store();
        let mut satisfied = BTreeSet::new();
        for build in store.builds().list_for_event(event.id)? {
            if build.status != BuildStatus::Success {
                continue;
            }
            let job = store
                .jobs()
                .get(build.job_id)?
                .ok_or_else(|| OrchestratorError::missing("job", build.job_id))?;
            satisfied.insert(node_name(&job.name).to_string());
        }
        Ok(satisfied)
    }

    fn materialize(
        &self,
        finished: &Build,
        parent_job: &Job,
        next_job: &Job,
        event: &Event,
        ctx: &UpdateContext,
    ) -> Result<Build> {
        let builds = self.orchestrator.store().builds();
        let provenance = ParentBuild {
            event_id: finished.event_id,
            build_id: finished.id,
        };

        let build = match builds.find(event.id, next_job.id)? {
            Some(existing) if existing.status.is_started() => {
                debug!(build_id = %existing.id, job = %next_job.name, "reusing started build");
                return Ok(existing);
            }
            Some(mut existing) => {
                if existing.parent_builds.insert(parent_job.id, provenance).is_none() {
                    existing.parent_build_ids.push(finished.id);
                }
                match builds.update_if(&existing, BuildStatus::Created)? {
                    Some(updated) => updated,
                    None => return self.reload(&existing),
                }
            }
            None => builds.create(
                NewBuild::created(next_job.id, event.id).triggered_by(parent_job.id, finished),
            )?,
        };
        if build.status.is_started() {
            return Ok(build);
        }
        if is_stage_teardown(&next_job.name) {
            debug!(build_id = %build.id, job = %next_job.name, "teardown waits for stage completion");
            return Ok(build);
        }

        if is_stage_setup(&next_job.name) {
            self.orchestrator
                .stages()
                .ensure_teardown_for(&next_job.name, event)?;
        }
        self.launch(build, next_job, event, Some(&finished.meta), ctx)
    }

    /// Claim a CREATED build and start it.
    ///
    /// Losing the claim to a concurrent caller is not an error: the build as
    /// that caller left it is returned.
    pub(crate) fn launch(
        &self,
        build: Build,
        job: &Job,
        event: &Event,
        inherited_meta: Option<&Meta>,
        ctx: &UpdateContext,
    ) -> Result<Build> {
        let claimed = self.orchestrator.store().builds().transition_if(
            build.id,
            BuildStatus::Created,
            BuildStatus::Queued,
        )?;
        match claimed {
            Some(claimed) => self.start_claimed(claimed, job, event, inherited_meta, ctx),
            None => {
                debug!(build_id = %build.id, job = %job.name, "build already claimed");
                self.reload(&build)
            }
        }
    }

    /// Start a build this caller moved to QUEUED. On failure the claim is
    /// released (back to CREATED) so a retry can pick it up.
    pub(crate) fn start_claimed(
        &self,
        claimed: Build,
        job: &Job,
        event: &Event,
        inherited_meta: Option<&Meta>,
        ctx: &UpdateContext,
    ) -> Result<Build> {
        let outcome = if event.workflow_graph.is_virtual(node_name(&job.name)) {
            self.orchestrator
                .complete_virtual(claimed.id, inherited_meta.cloned(), ctx)
        } else {
            self.orchestrator
                .executor()
                .start(&claimed, job)
                .map(|()| claimed.clone())
                .map_err(OrchestratorError::from)
        };

        match outcome {
            Ok(build) => {
                METRICS.inc_builds_triggered();
                info!(build_id = %build.id, job = %job.name, status = %build.status, "build started");
                Ok(build)
            }
            Err(err) => {
                METRICS.inc_trigger_failures();
                self.orchestrator.store().builds().transition_if(
                    claimed.id,
                    BuildStatus::Queued,
                    BuildStatus::Created,
                )?;
                Err(err)
            }
        }
    }

    fn reload(&self, build: &Build) -> Result<Build> {
        self.orchestrator
            .store()
            .builds()
            .get(build.id)?
            .ok_or_else(|| OrchestratorError::missing("build", build.id))
    }
}
