//! Replay scenario files (YAML or JSON).
//!
//! ```yaml
//! cause: "Merge pull request #12"
//! graph:
//!   nodes:
//!     - { name: main }
//!     - { name: job1, stageName: canary }
//!     - { name: stage@canary, stageName: canary }
//!     - { name: stage@canary:teardown, stageName: canary }
//!   edges:
//!     - { src: ~commit, dest: main }
//!     - { src: main, dest: job1 }
//! disabled: [nightly]
//! steps:
//!   - { job: main, status: RUNNING }
//!   - { job: main, status: SUCCESS, meta: { sha: abc123 } }
//!   - { stop: alice }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use cadence_orchestrator::BuildUpdate;
use cadence_protocol::{BuildStatus, Meta, StatusMessageType, WorkflowGraph};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub cause: String,
    #[serde(default)]
    pub meta: Meta,
    /// Run as a pull-request event; jobs get `PR-<n>:` copies.
    #[serde(default)]
    pub pr: Option<u64>,
    /// Trigger to start from; `~commit` or `~pr` when omitted.
    #[serde(default)]
    pub start_from: Option<String>,
    /// Jobs that exist but are switched off.
    #[serde(default)]
    pub disabled: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// Stop the event on behalf of a user.
    Stop { stop: String },
    Update(UpdateStep),
}

/// An external status report for the event's build of `job`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStep {
    pub job: String,
    #[serde(default)]
    pub status: Option<BuildStatus>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub message_type: Option<StatusMessageType>,
    #[serde(default)]
    pub meta: Option<Meta>,
    #[serde(default)]
    pub stats: Option<Meta>,
}

impl UpdateStep {
    pub fn to_request(&self) -> BuildUpdate {
        let message_type = match (&self.message, self.message_type) {
            (Some(_), None) => Some(StatusMessageType::Info),
            (_, kind) => kind,
        };
        BuildUpdate {
            status: self.status,
            status_message: self.message.clone(),
            status_message_type: message_type,
            stats: self.stats.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// Parse by extension: `.json` as JSON, anything else as YAML.
pub fn parse_scenario(content: &str, path: &Path) -> Result<Scenario> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(content)
            .with_context(|| format!("Invalid JSON scenario: {}", path.display()))
    } else {
        serde_yaml::from_str(content)
            .with_context(|| format!("Invalid YAML scenario: {}", path.display()))
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario: {}", path.display()))?;
    parse_scenario(&content, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_parse_as_updates_or_stops() {
        let yaml = r#"
graph:
  nodes: [{ name: main }]
  edges: [{ src: "~commit", dest: main }]
steps:
  - { job: main, status: RUNNING, message: "warming up" }
  - { stop: alice }
"#;
        let scenario = parse_scenario(yaml, Path::new("s.yaml")).unwrap();
        assert_eq!(scenario.steps.len(), 2);
        match &scenario.steps[0] {
            Step::Update(step) => {
                assert_eq!(step.status, Some(BuildStatus::Running));
                let request = step.to_request();
                assert_eq!(request.status_message_type, Some(StatusMessageType::Info));
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(
            scenario.steps[1],
            Step::Stop {
                stop: "alice".into()
            }
        );
    }

    #[test]
    fn json_is_picked_by_extension() {
        let json = r#"{"graph": {"nodes": [{"name": "a", "virtual": true}], "edges": []}, "pr": 3}"#;
        let scenario = parse_scenario(json, Path::new("scenario.JSON")).unwrap();
        assert_eq!(scenario.pr, Some(3));
        assert!(scenario.graph.is_virtual("a"));
    }

    #[test]
    fn bad_status_is_reported_with_the_path() {
        let yaml = "graph: { nodes: [], edges: [] }\nsteps: [{ job: a, status: DONE }]\n";
        let err = parse_scenario(yaml, Path::new("broken.yaml")).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
