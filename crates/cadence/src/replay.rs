//! Drive a scenario through a real orchestrator on an in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cadence_orchestrator::{
    BuildStatusNotice, ChannelNotifier, EdgeOracle, EventSpec, Executor, MetricsSnapshot,
    Orchestrator, OrchestratorConfig, UpdateContext, METRICS,
};
use cadence_protocol::naming::{node_name, pr_job_name, stage_setup_name, stage_teardown_name};
use cadence_protocol::{Build, BuildStatus, Event, Job, JobState, NewJob, NewStage, PipelineId};
use cadence_state_store::StateStore;
use serde::Serialize;
use tracing::{info, warn};

use crate::scenario::{Scenario, Step};

const REPLAY_PIPELINE: PipelineId = PipelineId::new(1);
const REPLAY_USER: &str = "cadence-replay";

/// Accepts every start; the scenario's steps play the executor's part.
struct ScriptExecutor;

impl Executor for ScriptExecutor {
    fn start(&self, build: &Build, job: &Job) -> anyhow::Result<()> {
        info!(build_id = %build.id, job = %job.name, "executor start");
        Ok(())
    }

    fn stop(&self, build: &Build, job: &Job) -> anyhow::Result<()> {
        info!(build_id = %build.id, job = %job.name, "executor stop");
        Ok(())
    }

    fn stop_frozen(&self, build: &Build, job: &Job) -> anyhow::Result<()> {
        info!(build_id = %build.id, job = %job.name, "executor release freeze");
        Ok(())
    }
}

/// A step the orchestrator refused.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// Zero-based index into the scenario's steps.
    pub step: usize,
    pub job: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildRow {
    pub job: String,
    pub build: Build,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub event: Event,
    pub builds: Vec<BuildRow>,
    pub notices: Vec<BuildStatusNotice>,
    pub rejections: Vec<Rejection>,
    pub metrics: MetricsSnapshot,
}

impl ReplayReport {
    pub fn status_of(&self, job: &str) -> Option<BuildStatus> {
        self.builds
            .iter()
            .find(|row| row.job == job)
            .map(|row| row.build.status)
    }
}

/// Register jobs and stages for every node of the graph (and their PR
/// copies when `pr` is set).
fn seed_pipeline(store: &StateStore, scenario: &Scenario) -> Result<()> {
    let disabled: BTreeSet<&str> = scenario.disabled.iter().map(String::as_str).collect();
    let mut names: Vec<String> = scenario
        .graph
        .nodes
        .iter()
        .map(|node| node.name.clone())
        .filter(|name| !name.starts_with('~'))
        .collect();
    for stage in scenario.graph.stage_names() {
        for name in [stage_setup_name(stage), stage_teardown_name(stage)] {
            if scenario.graph.node(&name).is_some() && !names.contains(&name) {
                names.push(name);
            }
        }
    }

    let scopes: Vec<Option<u64>> = match scenario.pr {
        Some(pr_num) => vec![None, Some(pr_num)],
        None => vec![None],
    };
    for scope in &scopes {
        for name in &names {
            let state = if disabled.contains(name.as_str()) {
                JobState::Disabled
            } else {
                JobState::Enabled
            };
            store.jobs().create(NewJob {
                pipeline_id: REPLAY_PIPELINE,
                name: scoped(*scope, name),
                state,
            })?;
        }
        for stage in scenario.graph.stage_names() {
            seed_stage(store, scenario, stage, *scope)?;
        }
    }
    Ok(())
}

fn seed_stage(
    store: &StateStore,
    scenario: &Scenario,
    stage: &str,
    scope: Option<u64>,
) -> Result<()> {
    let setup_name = stage_setup_name(stage);
    let teardown_name = stage_teardown_name(stage);
    let job_id = |name: &str| -> Result<_> {
        store
            .jobs()
            .find_by_name(REPLAY_PIPELINE, &scoped(scope, name))?
            .map(|job| job.id)
            .ok_or_else(|| anyhow!("stage {} references unknown job {}", stage, name))
    };

    let mut job_ids = BTreeSet::new();
    for node in &scenario.graph.nodes {
        let is_member = node.stage_name.as_deref() == Some(stage)
            && node.name != setup_name
            && node.name != teardown_name;
        if is_member {
            job_ids.insert(job_id(&node.name)?);
        }
    }
    let setup = match scenario.graph.node(&setup_name) {
        Some(_) => Some(job_id(&setup_name)?),
        None => None,
    };
    let teardown = match scenario.graph.node(&teardown_name) {
        Some(_) => Some(job_id(&teardown_name)?),
        None => None,
    };

    store.stages().create(NewStage {
        pipeline_id: REPLAY_PIPELINE,
        name: scoped(scope, stage),
        job_ids,
        setup,
        teardown,
    })?;
    Ok(())
}

fn scoped(scope: Option<u64>, name: &str) -> String {
    match scope {
        Some(pr_num) => pr_job_name(pr_num, name),
        None => name.to_string(),
    }
}

/// Create the event, play every step and collect what happened.
///
/// Rejected steps are recorded and skipped. Anything else that fails
/// (missing rows, store errors) aborts the replay.
pub fn replay(scenario: &Scenario, config: OrchestratorConfig) -> Result<ReplayReport> {
    let store = StateStore::memory();
    seed_pipeline(&store, scenario)?;

    let (notifier, notices) = ChannelNotifier::new();
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(EdgeOracle),
        Arc::new(ScriptExecutor),
        Arc::new(notifier),
    )
    .with_config(config);
    let ctx = UpdateContext::new(REPLAY_USER);

    let mut spec = EventSpec::new(REPLAY_PIPELINE, scenario.graph.clone())
        .with_cause(scenario.cause.clone())
        .with_meta(scenario.meta.clone());
    if let Some(pr_num) = scenario.pr {
        spec = spec.for_pr(pr_num);
    }
    if let Some(start_from) = &scenario.start_from {
        spec = spec.starting_from(start_from.clone());
    }
    let event = orchestrator
        .launcher()
        .create_event(spec, &ctx)
        .context("Failed to create event")?;
    info!(event_id = %event.id, steps = scenario.steps.len(), "replaying scenario");

    let mut rejections = Vec::new();
    for (index, step) in scenario.steps.iter().enumerate() {
        match step {
            Step::Stop { stop } => {
                orchestrator.stop_event(event.id, stop)?;
            }
            Step::Update(update) => {
                let job_name = match scenario.pr {
                    Some(pr_num) if !update.job.starts_with("PR-") => {
                        pr_job_name(pr_num, &update.job)
                    }
                    _ => update.job.clone(),
                };
                let Some(build) = find_build(&store, &event, &job_name)? else {
                    warn!(step = index, job = %job_name, "no build to update");
                    rejections.push(Rejection {
                        step: index,
                        job: job_name,
                        reason: "no build exists for this job in the event".to_string(),
                    });
                    continue;
                };
                match orchestrator.update_external(update.to_request(), build.id, &ctx) {
                    Ok(_) => {}
                    Err(err) if err.is_rejection() => {
                        rejections.push(Rejection {
                            step: index,
                            job: job_name,
                            reason: err.to_string(),
                        });
                    }
                    Err(err) => {
                        return Err(err)
                            .with_context(|| format!("Step {} ({}) failed", index, job_name));
                    }
                }
            }
        }
    }

    let event = store
        .events()
        .get(event.id)?
        .ok_or_else(|| anyhow!("event {} disappeared", event.id))?;
    let mut builds = Vec::new();
    for build in store.builds().list_for_event(event.id)? {
        let job = store
            .jobs()
            .get(build.job_id)?
            .ok_or_else(|| anyhow!("job {} not found", build.job_id))?;
        builds.push(BuildRow {
            job: job.name,
            build,
        });
    }

    Ok(ReplayReport {
        event,
        builds,
        notices: notices.try_iter().collect(),
        rejections,
        metrics: METRICS.snapshot(),
    })
}

fn find_build(store: &StateStore, event: &Event, job_name: &str) -> Result<Option<Build>> {
    let Some(job) = store.jobs().find_by_name(event.pipeline_id, job_name)? else {
        return Err(anyhow!("unknown job {} (graph node {})", job_name, node_name(job_name)));
    };
    store.builds().find(event.id, job.id)
}
