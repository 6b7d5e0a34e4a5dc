//! Event creation and the virtual-job cascade.

use std::collections::BTreeSet;

use cadence_protocol::defaults::{COMMIT_TRIGGER, PR_TRIGGER};
use cadence_protocol::naming::{is_stage_setup, pr_job_name};
use cadence_protocol::{Event, Meta, NewBuild, NewEvent, PipelineId, WorkflowGraph};
use tracing::{info, warn};

use crate::controller::{Orchestrator, UpdateContext};
use crate::error::{OrchestratorError, Result};
use crate::ports::GraphQuery;

/// What to start: a pipeline, its graph snapshot and the trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSpec {
    pub pipeline_id: PipelineId,
    pub workflow_graph: WorkflowGraph,
    pub meta: Meta,
    pub cause_message: String,
    pub pr_num: Option<u64>,
    pub start_from: String,
}

impl EventSpec {
    /// Commit event starting from `~commit`.
    pub fn new(pipeline_id: PipelineId, workflow_graph: WorkflowGraph) -> Self {
        Self {
            pipeline_id,
            workflow_graph,
            meta: Meta::new(),
            cause_message: String::new(),
            pr_num: None,
            start_from: COMMIT_TRIGGER.to_string(),
        }
    }

    pub fn with_cause(mut self, cause_message: impl Into<String>) -> Self {
        self.cause_message = cause_message.into();
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    /// Pull-request event starting from `~pr`.
    pub fn for_pr(mut self, pr_num: u64) -> Self {
        self.pr_num = Some(pr_num);
        self.start_from = PR_TRIGGER.to_string();
        self
    }

    pub fn starting_from(mut self, trigger: impl Into<String>) -> Self {
        self.start_from = trigger.into();
        self
    }
}

impl From<EventSpec> for NewEvent {
    fn from(spec: EventSpec) -> Self {
        NewEvent {
            pipeline_id: spec.pipeline_id,
            workflow_graph: spec.workflow_graph,
            meta: spec.meta,
            cause_message: spec.cause_message,
            pr_num: spec.pr_num,
            start_from: spec.start_from,
        }
    }
}

pub struct EventLauncher<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> EventLauncher<'a> {
    pub(crate) fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Create the event, its stage builds and its start builds.
    ///
    /// Real start jobs are queued on the executor. Virtual ones are completed
    /// on the spot, so their downstream fires before this returns.
    pub fn create_event(&self, spec: EventSpec, ctx: &UpdateContext) -> Result<Event> {
        let store = self.orchestrator.store();
        let event = store.events().create(spec.into())?;
        info!(
            event_id = %event.id,
            pipeline_id = %event.pipeline_id,
            start_from = %event.start_from,
            "event created"
        );

        for stage_name in event.workflow_graph.stage_names() {
            let scoped = match event.pr_num {
                Some(pr_num) => pr_job_name(pr_num, stage_name),
                None => stage_name.to_string(),
            };
            let stage = store
                .stages()
                .find_by_name(event.pipeline_id, &scoped)?
                .ok_or_else(|| OrchestratorError::missing("stage", &scoped))?;
            store.stage_builds().create(stage.id, event.id)?;
        }

        let satisfied = BTreeSet::new();
        let start_jobs = self.orchestrator.oracle().next_jobs(&GraphQuery {
            graph: &event.workflow_graph,
            trigger: &event.start_from,
            pr_num: event.pr_num,
            satisfied: &satisfied,
        })?;

        let resolver = self.orchestrator.resolver();
        let mut failed = Vec::new();
        let mut first_error = None;
        for name in start_jobs {
            let job = store
                .jobs()
                .find_by_name(event.pipeline_id, &name)?
                .ok_or_else(|| OrchestratorError::missing("job", &name))?;
            if !job.is_enabled() {
                info!(job = %name, event_id = %event.id, "job disabled, not starting");
                continue;
            }

            let build = store.builds().create(NewBuild::created(job.id, event.id))?;
            if is_stage_setup(&job.name) {
                self.orchestrator
                    .stages()
                    .ensure_teardown_for(&job.name, &event)?;
            }
            match resolver.launch(build, &job, &event, None, ctx) {
                Ok(_) => {}
                Err(err) if err.is_retryable() => {
                    warn!(job = %name, event_id = %event.id, error = %err, "start build failed");
                    failed.push(name);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        self.orchestrator.refresh_event_status(event.id)?;
        if let Some(source) = first_error {
            return Err(OrchestratorError::TriggerFailed {
                failed,
                source: Box::new(source),
            });
        }
        store
            .events()
            .get(event.id)?
            .ok_or_else(|| OrchestratorError::missing("event", event.id))
    }
}
