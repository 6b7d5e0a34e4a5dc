//! Outbound ports: graph queries, executor control and notifications.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{anyhow, Result};
use cadence_protocol::naming::{pr_job_name, split_pr_job_name};
use cadence_protocol::{
    Build, BuildId, BuildStatus, EventId, Job, PipelineId, StatusMessageType, WorkflowGraph,
};
use serde::Serialize;

// ============================================================================
// Graph queries
// ============================================================================

/// Input to [`GraphOracle::next_jobs`].
#[derive(Debug, Clone, Copy)]
pub struct GraphQuery<'a> {
    pub graph: &'a WorkflowGraph,
    /// Finished job name, or a trigger such as `~commit`. May carry a PR prefix.
    pub trigger: &'a str,
    pub pr_num: Option<u64>,
    /// Node names whose builds in this event reached SUCCESS.
    pub satisfied: &'a BTreeSet<String>,
}

/// Pure graph query: which jobs become runnable once `trigger` fires.
///
/// Implementations own AND-join satisfaction and must not mutate anything.
pub trait GraphOracle: Send + Sync {
    fn next_jobs(&self, query: &GraphQuery<'_>) -> Result<Vec<String>>;
}

/// Edge-walking oracle.
///
/// OR edges fire as soon as their source finishes; a join edge fires once
/// every join predecessor of its destination is satisfied. For PR events the
/// returned names carry the `PR-<n>:` prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeOracle;

impl GraphOracle for EdgeOracle {
    fn next_jobs(&self, query: &GraphQuery<'_>) -> Result<Vec<String>> {
        let (_, trigger) = split_pr_job_name(query.trigger);
        let mut next: Vec<&str> = Vec::new();

        for edge in query.graph.successors(trigger) {
            if next.contains(&edge.dest.as_str()) {
                continue;
            }
            let fires = !edge.join
                || query
                    .graph
                    .predecessors(&edge.dest)
                    .filter(|pred| pred.join)
                    .all(|pred| pred.src == trigger || query.satisfied.contains(&pred.src));
            if fires {
                next.push(&edge.dest);
            }
        }

        Ok(next
            .into_iter()
            .map(|name| match query.pr_num {
                Some(pr_num) => pr_job_name(pr_num, name),
                None => name.to_string(),
            })
            .collect())
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Hands builds to whatever actually runs them.
pub trait Executor: Send + Sync {
    fn start(&self, build: &Build, job: &Job) -> Result<()>;
    fn stop(&self, build: &Build, job: &Job) -> Result<()>;
    /// Release the freeze-window hold on a build leaving FROZEN.
    fn stop_frozen(&self, build: &Build, job: &Job) -> Result<()>;
}

// ============================================================================
// Notifications
// ============================================================================

/// `build_status` notification payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatusNotice {
    pub build_id: BuildId,
    pub event_id: EventId,
    pub pipeline_id: PipelineId,
    pub job_name: String,
    pub status: BuildStatus,
    pub status_message: Option<String>,
    pub status_message_type: Option<StatusMessageType>,
    /// SUCCESS following the job's most recent FAILURE.
    pub is_fixed: bool,
    pub build_link: String,
}

/// Best-effort outbound sink. Errors are logged by the caller, never retried.
pub trait Notifier: Send + Sync {
    fn emit(&self, notice: BuildStatusNotice) -> Result<()>;
}

/// Writes notices to an in-process queue.
pub struct ChannelNotifier {
    tx: Sender<BuildStatusNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, Receiver<BuildStatusNotice>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, notice: BuildStatusNotice) -> Result<()> {
        self.tx
            .send(notice)
            .map_err(|err| anyhow!("notification receiver dropped: build {}", err.0.build_id))
    }
}

/// Discards every notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn emit(&self, _notice: BuildStatusNotice) -> Result<()> {
        Ok(())
    }
}
