//! Persistent entities.
//!
//! These mirror the rows the state store keeps. The orchestrator mutates an
//! in-memory copy and hands it back to the store to persist every field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use cadence_ids::{BuildId, EventId, JobId, PipelineId, StageBuildId, StageId, StepId};

use crate::graph::WorkflowGraph;
use crate::status::{BuildStatus, EventStatus};

/// Free-form JSON object used for build stats, build meta and event meta.
pub type Meta = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusMessageType {
    Error,
    Warn,
    Info,
}

impl StatusMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusMessageType::Error => "ERROR",
            StatusMessageType::Warn => "WARN",
            StatusMessageType::Info => "INFO",
        }
    }
}

impl fmt::Display for StatusMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StatusMessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ERROR" => Ok(StatusMessageType::Error),
            "WARN" | "WARNING" => Ok(StatusMessageType::Warn),
            "INFO" => Ok(StatusMessageType::Info),
            _ => Err(format!("Invalid status message type: '{}'", s)),
        }
    }
}

/// Provenance of a triggered build: which build of which event fired it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentBuild {
    pub event_id: EventId,
    pub build_id: BuildId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: BuildId,
    pub job_id: JobId,
    pub event_id: EventId,
    pub status: BuildStatus,
    pub status_message: Option<String>,
    pub status_message_type: Option<StatusMessageType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Meta,
    #[serde(default)]
    pub meta: Meta,
    /// Keyed by the upstream job that fired this build.
    #[serde(default)]
    pub parent_builds: BTreeMap<JobId, ParentBuild>,
    #[serde(default)]
    pub parent_build_ids: Vec<BuildId>,
}

impl Build {
    pub fn new(id: BuildId, job_id: JobId, event_id: EventId) -> Self {
        Self {
            id,
            job_id,
            event_id,
            status: BuildStatus::Created,
            status_message: None,
            status_message_type: None,
            start_time: None,
            end_time: None,
            stats: Meta::new(),
            meta: Meta::new(),
            parent_builds: BTreeMap::new(),
            parent_build_ids: Vec::new(),
        }
    }
}

/// Fields for creating a build.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBuild {
    pub job_id: JobId,
    pub event_id: EventId,
    pub status: BuildStatus,
    pub parent_builds: BTreeMap<JobId, ParentBuild>,
    pub parent_build_ids: Vec<BuildId>,
}

impl NewBuild {
    pub fn created(job_id: JobId, event_id: EventId) -> Self {
        Self {
            job_id,
            event_id,
            status: BuildStatus::Created,
            parent_builds: BTreeMap::new(),
            parent_build_ids: Vec::new(),
        }
    }

    pub fn triggered_by(mut self, parent_job: JobId, parent: &Build) -> Self {
        self.parent_builds.insert(
            parent_job,
            ParentBuild {
                event_id: parent.event_id,
                build_id: parent.id,
            },
        );
        self.parent_build_ids.push(parent.id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    #[serde(default)]
    pub state: JobState,
}

impl Job {
    pub fn is_enabled(&self) -> bool {
        self.state == JobState::Enabled
    }
}

/// Fields for creating a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub state: JobState,
}

impl NewJob {
    pub fn enabled(pipeline_id: PipelineId, name: impl Into<String>) -> Self {
        Self {
            pipeline_id,
            name: name.into(),
            state: JobState::Enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub pipeline_id: PipelineId,
    pub workflow_graph: WorkflowGraph,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub cause_message: String,
    #[serde(default)]
    pub status: EventStatus,
    /// Set for pull-request events.
    pub pr_num: Option<u64>,
    /// Trigger the event started from (`~commit`, `~pr`, or a job name).
    pub start_from: String,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating an event.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub pipeline_id: PipelineId,
    pub workflow_graph: WorkflowGraph,
    pub meta: Meta,
    pub cause_message: String,
    pub pr_num: Option<u64>,
    pub start_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: StageId,
    pub pipeline_id: PipelineId,
    pub name: String,
    #[serde(default)]
    pub job_ids: BTreeSet<JobId>,
    pub setup: Option<JobId>,
    pub teardown: Option<JobId>,
}

impl Stage {
    /// Jobs whose builds must finish before the teardown may start:
    /// members plus setup, never the teardown itself.
    pub fn completion_job_ids(&self) -> BTreeSet<JobId> {
        let mut ids = self.job_ids.clone();
        if let Some(setup) = self.setup {
            ids.insert(setup);
        }
        if let Some(teardown) = self.teardown {
            ids.remove(&teardown);
        }
        ids
    }
}

/// Fields for creating a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStage {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub job_ids: BTreeSet<JobId>,
    pub setup: Option<JobId>,
    pub teardown: Option<JobId>,
}

/// Per-event aggregate status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageBuild {
    pub id: StageBuildId,
    pub stage_id: StageId,
    pub event_id: EventId,
    pub status: BuildStatus,
}

/// One step of a build. Only the synthetic init step is touched here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub build_id: BuildId,
    pub name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub code: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_set_includes_setup_and_excludes_teardown() {
        let stage = Stage {
            id: StageId::new(1),
            pipeline_id: PipelineId::new(1),
            name: "canary".into(),
            job_ids: [JobId::new(10), JobId::new(12)].into_iter().collect(),
            setup: Some(JobId::new(11)),
            teardown: Some(JobId::new(12)),
        };
        let ids: Vec<_> = stage.completion_job_ids().into_iter().collect();
        assert_eq!(ids, vec![JobId::new(10), JobId::new(11)]);
    }

    #[test]
    fn triggered_by_records_provenance() {
        let parent = Build::new(BuildId::new(5), JobId::new(1), EventId::new(3));
        let new = NewBuild::created(JobId::new(2), EventId::new(3)).triggered_by(JobId::new(1), &parent);
        assert_eq!(
            new.parent_builds.get(&JobId::new(1)),
            Some(&ParentBuild {
                event_id: EventId::new(3),
                build_id: BuildId::new(5)
            })
        );
        assert_eq!(new.parent_build_ids, vec![BuildId::new(5)]);
    }

    #[test]
    fn build_serializes_camel_case() {
        let build = Build::new(BuildId::new(1), JobId::new(2), EventId::new(3));
        let value = serde_json::to_value(&build).unwrap();
        assert_eq!(value["jobId"], 2);
        assert_eq!(value["status"], "CREATED");
    }
}
