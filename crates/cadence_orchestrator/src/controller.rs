//! Build Status Controller
//!
//! [`Orchestrator::update_build`] is the single entry point for build status
//! changes. It validates the request against the transition table, applies
//! the side effects, commits the build together with its event, and then
//! decides what happens next: downstream triggering, join collapse, stage
//! bookkeeping and teardown start.
//!
//! There is no lock around an event or stage. Concurrent completions rely on
//! conditional store writes (`transition_if`, `set_status_unless_terminal`)
//! for everything that must happen exactly once.

use std::sync::Arc;

use cadence_protocol::defaults::BLOCKED_START_TIME_KEY;
use cadence_protocol::naming::contains_skip_further;
use cadence_protocol::{
    deep_merge, derive_event_status, plan_transition, Build, BuildId, BuildStatus,
    CompletionEffect, Event, EventId, EventStatus, Job, Meta, Stage, StatusMessageType,
};
use cadence_state_store::StateStore;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::join::JoinFailureHandler;
use crate::launcher::EventLauncher;
use crate::metrics::METRICS;
use crate::ports::{BuildStatusNotice, Executor, GraphOracle, Notifier};
use crate::stage::StageCoordinator;
use crate::trigger::TriggerResolver;

/// Who is performing an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateContext {
    pub username: String,
}

impl UpdateContext {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// A requested build change. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildUpdate {
    pub status: Option<BuildStatus>,
    pub status_message: Option<String>,
    pub status_message_type: Option<StatusMessageType>,
    /// Shallow-merged into `build.stats`.
    pub stats: Option<Meta>,
    /// Replaces `build.meta` on SUCCESS, FAILURE and ABORTED.
    pub meta: Option<Meta>,
}

impl BuildUpdate {
    pub fn status(status: BuildStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>, kind: StatusMessageType) -> Self {
        self.status_message = Some(message.into());
        self.status_message_type = Some(kind);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_stats(mut self, stats: Meta) -> Self {
        self.stats = Some(stats);
        self
    }
}

pub struct Orchestrator {
    store: StateStore,
    oracle: Arc<dyn GraphOracle>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        oracle: Arc<dyn GraphOracle>,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            oracle,
            executor,
            notifier,
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub(crate) fn oracle(&self) -> &dyn GraphOracle {
        self.oracle.as_ref()
    }

    pub(crate) fn executor(&self) -> &dyn Executor {
        self.executor.as_ref()
    }

    pub fn resolver(&self) -> TriggerResolver<'_> {
        TriggerResolver::new(self)
    }

    pub fn stages(&self) -> StageCoordinator<'_> {
        StageCoordinator::new(self)
    }

    pub fn joins(&self) -> JoinFailureHandler<'_> {
        JoinFailureHandler::new(self)
    }

    pub fn launcher(&self) -> EventLauncher<'_> {
        EventLauncher::new(self)
    }

    /// External callers may only touch builds that are in flight.
    pub fn ensure_updatable(build: &Build) -> Result<()> {
        if build.status.is_updatable() {
            Ok(())
        } else {
            Err(OrchestratorError::NotUpdatable {
                id: build.id,
                status: build.status,
            })
        }
    }

    /// [`Orchestrator::update_build`] guarded by [`Orchestrator::ensure_updatable`].
    pub fn update_external(
        &self,
        request: BuildUpdate,
        build_id: BuildId,
        ctx: &UpdateContext,
    ) -> Result<Build> {
        let build = self
            .store
            .builds()
            .get(build_id)?
            .ok_or_else(|| OrchestratorError::missing("build", build_id))?;
        if let Err(err) = Self::ensure_updatable(&build) {
            METRICS.inc_transitions_rejected();
            warn!(build_id = %build.id, status = %build.status, "refusing external update");
            return Err(err);
        }
        self.update_build(request, build_id, ctx)
    }

    /// Apply a status change to a build and drive the workflow forward.
    pub fn update_build(
        &self,
        request: BuildUpdate,
        build_id: BuildId,
        ctx: &UpdateContext,
    ) -> Result<Build> {
        let mut build = self
            .store
            .builds()
            .get(build_id)?
            .ok_or_else(|| OrchestratorError::missing("build", build_id))?;
        let job = self
            .store
            .jobs()
            .get(build.job_id)?
            .ok_or_else(|| OrchestratorError::missing("job", build.job_id))?;
        let mut event = self
            .store
            .events()
            .get(build.event_id)?
            .ok_or_else(|| OrchestratorError::missing("event", build.event_id))?;

        let plan = match plan_transition(build.status, request.status) {
            Ok(plan) => plan,
            Err(rejection) => {
                METRICS.inc_transitions_rejected();
                warn!(
                    build_id = %build.id,
                    job = %job.name,
                    current = %build.status,
                    "{}",
                    rejection
                );
                return Err(rejection.into());
            }
        };

        let now = Utc::now();
        if let Some(stats) = &request.stats {
            for (key, value) in stats {
                build.stats.insert(key.clone(), value.clone());
            }
        }
        match plan.effect {
            CompletionEffect::RecordCompletion => {
                build.meta = request.meta.clone().unwrap_or_default();
                deep_merge(&mut event.meta, &build.meta);
                build.end_time = Some(now);
            }
            CompletionEffect::RecordStart => build.start_time = Some(now),
            CompletionEffect::MarkBlockedStart => {
                if !build.stats.contains_key(BLOCKED_START_TIME_KEY) {
                    build.stats.insert(
                        BLOCKED_START_TIME_KEY.to_string(),
                        serde_json::Value::String(now.to_rfc3339()),
                    );
                }
            }
            CompletionEffect::None => {}
        }
        plan.message_rule.apply(
            &mut build,
            request.status_message.as_deref(),
            request.status_message_type,
            &ctx.username,
        );
        build.status = plan.resulting;

        let mut is_fixed = false;
        if plan.requested.is_some() && plan.closes_init_step() {
            self.close_init_step(&build)?;
        } else {
            is_fixed = self.is_fixed_build(&build)?;
            if plan.releases_freeze() {
                self.executor.stop_frozen(&build, &job)?;
            }
        }

        self.store.commit_build_and_event(&build, &event)?;
        METRICS.inc_builds_updated();
        info!(
            build_id = %build.id,
            event_id = %event.id,
            job = %job.name,
            from = %plan.previous,
            to = %build.status,
            "build updated"
        );

        if plan.requested.is_some() {
            self.notify(&build, &job, &event, is_fixed);
        }

        let stages = self.stages();
        let stage = stages.resolve_stage(&job, &event)?;
        let stage_has_failure = match &stage {
            Some(stage) => stages
                .record_build_status(stage, &event, build.status)?
                .status
                .is_terminal(),
            None => false,
        };

        // A failed sibling start must not stop the stage bookkeeping below.
        let outcome = self.continue_workflow(
            &build,
            &job,
            &event,
            stage.as_ref(),
            stage_has_failure,
            ctx,
        );
        let triggered = match outcome {
            Err(err @ OrchestratorError::TriggerFailed { .. }) => Err(err),
            Err(err) => return Err(err),
            Ok(()) => Ok(()),
        };

        if build.status.is_finished() {
            if let Some(stage) = &stage {
                stages.start_teardown_if_done(stage, &event, ctx)?;
            }
        }

        self.refresh_event_status(event.id)?;
        triggered.map(|()| build)
    }

    fn continue_workflow(
        &self,
        build: &Build,
        job: &Job,
        event: &Event,
        stage: Option<&Stage>,
        stage_has_failure: bool,
        ctx: &UpdateContext,
    ) -> Result<()> {
        let is_own_teardown = stage.is_some_and(|stage| stage.teardown == Some(job.id));

        match build.status {
            BuildStatus::Failure => {
                self.joins().handle(build, job, event, stage, ctx)?;
                if let Some(stage) = stage.filter(|_| !is_own_teardown) {
                    self.stages().start_teardown(stage, event, ctx)?;
                }
            }
            BuildStatus::Success if is_own_teardown && stage_has_failure => {
                debug!(build_id = %build.id, job = %job.name, "teardown of failed stage, not fanning out");
                self.joins().handle(build, job, event, stage, ctx)?;
            }
            BuildStatus::Success
                if contains_skip_further(&event.cause_message, &self.config.skip_further_token) =>
            {
                info!(build_id = %build.id, event_id = %event.id, "skip further requested, not triggering");
            }
            BuildStatus::Success => {
                self.resolver().resolve(build, job, event, ctx)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Finish a virtual build: SUCCESS without ever running.
    pub(crate) fn complete_virtual(
        &self,
        build_id: BuildId,
        meta: Option<Meta>,
        ctx: &UpdateContext,
    ) -> Result<Build> {
        let request = BuildUpdate {
            status: Some(BuildStatus::Success),
            status_message: Some(self.config.virtual_status_message.clone()),
            status_message_type: Some(StatusMessageType::Info),
            stats: None,
            meta,
        };
        let build = self.update_build(request, build_id, ctx)?;
        METRICS.inc_virtual_builds_completed();
        info!(build_id = %build.id, event_id = %build.event_id, "virtual build completed");
        Ok(build)
    }

    /// Recompute the event's aggregate status; persists only on change.
    pub fn refresh_event_status(&self, event_id: EventId) -> Result<Option<EventStatus>> {
        let statuses = self
            .store
            .builds()
            .list_for_event(event_id)?
            .into_iter()
            .map(|build| build.status);
        let Some(status) = derive_event_status(statuses) else {
            return Ok(None);
        };

        let current = self
            .store
            .events()
            .get(event_id)?
            .ok_or_else(|| OrchestratorError::missing("event", event_id))?;
        if current.status != status {
            self.store.events().update_status(event_id, status)?;
            debug!(event_id = %event_id, from = %current.status, to = %status, "event status changed");
        }
        Ok(Some(status))
    }

    fn close_init_step(&self, build: &Build) -> Result<()> {
        let steps = self.store.steps();
        let Some(mut step) = steps.find(build.id, &self.config.init_step_name)? else {
            return Ok(());
        };
        step.end_time = build.start_time;
        step.code = Some(0);
        steps.update(&step)?;
        Ok(())
    }

    /// SUCCESS after the job's most recent FAILURE with no SUCCESS in between.
    fn is_fixed_build(&self, build: &Build) -> Result<bool> {
        if build.status != BuildStatus::Success {
            return Ok(false);
        }
        let builds = self.store.builds();
        let Some(failure) =
            builds.latest_for_job_before(build.job_id, BuildStatus::Failure, build.id)?
        else {
            return Ok(false);
        };
        Ok(
            match builds.latest_for_job_before(build.job_id, BuildStatus::Success, build.id)? {
                Some(success) => failure.id > success.id,
                None => true,
            },
        )
    }

    fn notify(&self, build: &Build, job: &Job, event: &Event, is_fixed: bool) {
        let notice = BuildStatusNotice {
            build_id: build.id,
            event_id: event.id,
            pipeline_id: event.pipeline_id,
            job_name: job.name.clone(),
            status: build.status,
            status_message: build.status_message.clone(),
            status_message_type: build.status_message_type,
            is_fixed,
            build_link: self.config.build_link(event.pipeline_id, build.id),
        };
        if let Err(err) = self.notifier.emit(notice) {
            METRICS.inc_notifications_dropped();
            warn!(build_id = %build.id, error = %err, "dropping build_status notification");
        }
    }
}
