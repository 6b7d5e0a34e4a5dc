//! Join-Failure Handler
//!
//! When a job fails, downstream jobs that can only be reached through it
//! will never run. Their CREATED builds move to COLLAPSED; stage teardowns
//! are ensured instead of collapsed so cleanup still happens.

use cadence_protocol::naming::{is_stage_teardown, split_pr_job_name};
use cadence_protocol::{Build, BuildStatus, Event, Job, Stage};
use tracing::{debug, info};

use crate::controller::{Orchestrator, UpdateContext};
use crate::error::{OrchestratorError, Result};
use crate::metrics::METRICS;

pub struct JoinFailureHandler<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> JoinFailureHandler<'a> {
    pub(crate) fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Collapse what `failed` strands and return the collapsed builds.
    pub fn handle(
        &self,
        failed: &Build,
        job: &Job,
        event: &Event,
        stage: Option<&Stage>,
        ctx: &UpdateContext,
    ) -> Result<Vec<Build>> {
        let store = self.orchestrator.store();
        let stages = self.orchestrator.stages();
        let graph = &event.workflow_graph;
        let (pr_prefix, node) = split_pr_job_name(&job.name);
        let mut collapsed = Vec::new();

        for edge in graph.successors(node) {
            let dest = edge.dest.as_str();
            let dest_job_name = match pr_prefix {
                Some(prefix) => format!("{}:{}", prefix, dest),
                None => dest.to_string(),
            };

            if is_stage_teardown(dest) {
                stages.ensure_teardown_for(&dest_job_name, event)?;
                continue;
            }
            if graph
                .predecessors(dest)
                .any(|pred| !pred.join && pred.src != node)
            {
                debug!(job = %dest, "reachable through another edge, not collapsing");
                continue;
            }

            let dest_job = store
                .jobs()
                .find_by_name(event.pipeline_id, &dest_job_name)?
                .ok_or_else(|| OrchestratorError::missing("job", &dest_job_name))?;
            let Some(existing) = store.builds().find(event.id, dest_job.id)? else {
                continue;
            };
            let Some(build) = store.builds().transition_if(
                existing.id,
                BuildStatus::Created,
                BuildStatus::Collapsed,
            )?
            else {
                debug!(build_id = %existing.id, status = %existing.status, "downstream build already moved on");
                continue;
            };

            METRICS.inc_builds_collapsed();
            info!(
                build_id = %build.id,
                job = %dest_job.name,
                failed_build_id = %failed.id,
                "collapsed stranded build"
            );
            if let Some(dest_stage) = stages.resolve_stage(&dest_job, event)? {
                stages.record_build_status(&dest_stage, event, build.status)?;
                stages.start_teardown_if_done(&dest_stage, event, ctx)?;
            }
            collapsed.push(build);
        }

        if let Some(stage) = stage {
            stages.ensure_teardown(stage, event)?;
        }
        Ok(collapsed)
    }
}

