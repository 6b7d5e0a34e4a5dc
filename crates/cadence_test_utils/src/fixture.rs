use std::sync::mpsc::Receiver;
use std::sync::Arc;

use cadence_orchestrator::{
    BuildStatusNotice, BuildUpdate, ChannelNotifier, EdgeOracle, EventSpec, GraphOracle,
    Orchestrator, OrchestratorConfig, OrchestratorError, UpdateContext,
};
use cadence_protocol::naming::{pr_job_name, stage_setup_name, stage_teardown_name};
use cadence_protocol::{
    Build, BuildStatus, Event, EventId, JobId, JobState, NewJob, NewStage, PipelineId, Stage,
    StageBuild, WorkflowEdge, WorkflowGraph, WorkflowNode,
};
use cadence_state_store::{MemoryStateStore, StateStore};

/// Builds a pipeline (jobs, stages, graph) inside a memory store.
///
/// Panics on misuse; this is test scaffolding.
pub struct PipelineFixture {
    pub memory: Arc<MemoryStateStore>,
    pub store: StateStore,
    pub pipeline_id: PipelineId,
    pub graph: WorkflowGraph,
}

impl Default for PipelineFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineFixture {
    pub fn new() -> Self {
        let memory = Arc::new(MemoryStateStore::new());
        Self {
            store: StateStore::from_backend(memory.clone()),
            memory,
            pipeline_id: PipelineId::new(1),
            graph: WorkflowGraph::default(),
        }
    }

    fn add_job(&mut self, name: &str, state: JobState, is_virtual: bool) -> JobId {
        let job = self
            .store
            .jobs()
            .create(NewJob {
                pipeline_id: self.pipeline_id,
                name: name.to_string(),
                state,
            })
            .unwrap();
        match self.graph.nodes.iter_mut().find(|node| node.name == name) {
            Some(node) => {
                node.id = Some(job.id);
                node.is_virtual = is_virtual;
            }
            None => {
                let mut node = WorkflowNode::new(name).with_id(job.id);
                node.is_virtual = is_virtual;
                self.graph.nodes.push(node);
            }
        }
        job.id
    }

    pub fn job(&mut self, name: &str) -> JobId {
        self.add_job(name, JobState::Enabled, false)
    }

    pub fn virtual_job(&mut self, name: &str) -> JobId {
        self.add_job(name, JobState::Enabled, true)
    }

    pub fn disabled_job(&mut self, name: &str) -> JobId {
        self.add_job(name, JobState::Disabled, false)
    }

    /// PR copy `PR-<n>:<name>` of a job already in the graph.
    pub fn pr_job(&mut self, pr_num: u64, name: &str) -> JobId {
        self.store
            .jobs()
            .create(NewJob::enabled(self.pipeline_id, pr_job_name(pr_num, name)))
            .unwrap()
            .id
    }

    fn ensure_trigger_node(&mut self, name: &str) {
        if name.starts_with('~') && self.graph.node(name).is_none() {
            self.graph.nodes.push(WorkflowNode::new(name));
        }
    }

    pub fn edge(&mut self, src: &str, dest: &str) -> &mut Self {
        self.ensure_trigger_node(src);
        self.graph.edges.push(WorkflowEdge::new(src, dest));
        self
    }

    pub fn join(&mut self, src: &str, dest: &str) -> &mut Self {
        self.ensure_trigger_node(src);
        self.graph.edges.push(WorkflowEdge::join(src, dest));
        self
    }

    /// Stage with setup `stage@<name>` and teardown `stage@<name>:teardown`.
    ///
    /// `members` must already exist. Member, setup and teardown nodes are
    /// tagged with the stage name.
    pub fn stage(&mut self, name: &str, members: &[&str]) -> Stage {
        let setup = self.job(&stage_setup_name(name));
        let teardown = self.job(&stage_teardown_name(name));
        self.tag_stage(name, members);
        let job_ids = members.iter().map(|member| self.job_id(member)).collect();
        self.store
            .stages()
            .create(NewStage {
                pipeline_id: self.pipeline_id,
                name: name.to_string(),
                job_ids,
                setup: Some(setup),
                teardown: Some(teardown),
            })
            .unwrap()
    }

    /// Stage whose teardown node is virtual.
    pub fn stage_with_virtual_teardown(&mut self, name: &str, members: &[&str]) -> Stage {
        let stage = self.stage(name, members);
        let teardown = stage_teardown_name(name);
        if let Some(node) = self.graph.nodes.iter_mut().find(|node| node.name == teardown) {
            node.is_virtual = true;
        }
        stage
    }

    /// PR copy of a stage already declared with [`PipelineFixture::stage`].
    pub fn pr_stage(&mut self, pr_num: u64, name: &str, members: &[&str]) -> Stage {
        let setup = self.pr_job(pr_num, &stage_setup_name(name));
        let teardown = self.pr_job(pr_num, &stage_teardown_name(name));
        let job_ids = members
            .iter()
            .map(|member| self.job_id(&pr_job_name(pr_num, member)))
            .collect();
        self.store
            .stages()
            .create(NewStage {
                pipeline_id: self.pipeline_id,
                name: pr_job_name(pr_num, name),
                job_ids,
                setup: Some(setup),
                teardown: Some(teardown),
            })
            .unwrap()
    }

    fn tag_stage(&mut self, stage: &str, members: &[&str]) {
        let setup = stage_setup_name(stage);
        let teardown = stage_teardown_name(stage);
        for node in self.graph.nodes.iter_mut() {
            if node.name == setup || node.name == teardown || members.contains(&node.name.as_str()) {
                node.stage_name = Some(stage.to_string());
            }
        }
    }

    pub fn job_id(&self, name: &str) -> JobId {
        self.store
            .jobs()
            .find_by_name(self.pipeline_id, name)
            .unwrap()
            .unwrap_or_else(|| panic!("no job named {name}"))
            .id
    }

    pub fn event_spec(&self) -> EventSpec {
        EventSpec::new(self.pipeline_id, self.graph.clone())
    }

    /// Orchestrator over this store using the edge-walking oracle.
    pub fn harness(&self) -> Harness {
        self.harness_with(Arc::new(EdgeOracle))
    }

    pub fn harness_with(&self, oracle: Arc<dyn GraphOracle>) -> Harness {
        let executor = Arc::new(crate::RecordingExecutor::new());
        let (notifier, notices) = ChannelNotifier::new();
        let orchestrator = Orchestrator::new(
            self.store.clone(),
            oracle,
            executor.clone(),
            Arc::new(notifier),
        )
        .with_config(OrchestratorConfig::default());
        Harness {
            orchestrator,
            executor,
            notices,
            store: self.store.clone(),
            pipeline_id: self.pipeline_id,
            ctx: UpdateContext::new("tester"),
        }
    }
}

/// A wired orchestrator plus handles on its fakes.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub executor: Arc<crate::RecordingExecutor>,
    pub notices: Receiver<BuildStatusNotice>,
    pub store: StateStore,
    pub pipeline_id: PipelineId,
    pub ctx: UpdateContext,
}

impl Harness {
    pub fn start(&self, spec: EventSpec) -> Result<Event, OrchestratorError> {
        self.orchestrator.launcher().create_event(spec, &self.ctx)
    }

    pub fn event(&self, event_id: EventId) -> Event {
        self.store.events().get(event_id).unwrap().unwrap()
    }

    pub fn build(&self, event_id: EventId, job_name: &str) -> Option<Build> {
        let job = self
            .store
            .jobs()
            .find_by_name(self.pipeline_id, job_name)
            .unwrap()
            .unwrap_or_else(|| panic!("no job named {job_name}"));
        self.store.builds().find(event_id, job.id).unwrap()
    }

    pub fn status(&self, event_id: EventId, job_name: &str) -> Option<BuildStatus> {
        self.build(event_id, job_name).map(|build| build.status)
    }

    pub fn stage_build(&self, stage: &Stage, event_id: EventId) -> StageBuild {
        self.store
            .stage_builds()
            .find(stage.id, event_id)
            .unwrap()
            .unwrap()
    }

    pub fn update(
        &self,
        event_id: EventId,
        job_name: &str,
        request: BuildUpdate,
    ) -> Result<Build, OrchestratorError> {
        let build = self
            .build(event_id, job_name)
            .unwrap_or_else(|| panic!("no build for {job_name} in event {event_id}"));
        self.orchestrator.update_build(request, build.id, &self.ctx)
    }

    /// RUNNING, then `status`, as an executor would report it.
    pub fn run_to(
        &self,
        event_id: EventId,
        job_name: &str,
        status: BuildStatus,
    ) -> Result<Build, OrchestratorError> {
        self.update(event_id, job_name, BuildUpdate::status(BuildStatus::Running))?;
        self.update(event_id, job_name, BuildUpdate::status(status))
    }

    pub fn drain_notices(&self) -> Vec<BuildStatusNotice> {
        self.notices.try_iter().collect()
    }
}
