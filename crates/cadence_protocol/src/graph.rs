//! Workflow graph snapshot.
//!
//! Every event carries the graph its pipeline had when the event was created.
//! Trigger nodes (`~commit`, `~pr`, ...) appear only as edge sources.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use cadence_ids::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub name: String,
    pub id: Option<JobId>,
    /// Node represents no real compute and resolves to SUCCESS on its own.
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    pub stage_name: Option<String>,
}

impl WorkflowNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            is_virtual: false,
            stage_name: None,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn virtual_node(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn in_stage(mut self, stage_name: impl Into<String>) -> Self {
        self.stage_name = Some(stage_name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub src: String,
    pub dest: String,
    /// AND edge: `dest` needs every join predecessor before it may start.
    #[serde(default)]
    pub join: bool,
}

impl WorkflowEdge {
    pub fn new(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            join: false,
        }
    }

    pub fn join(src: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            join: true,
            ..Self::new(src, dest)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowGraph {
    pub fn node(&self, name: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn node_by_id(&self, id: JobId) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| node.id == Some(id))
    }

    pub fn successors<'a>(&'a self, src: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |edge| edge.src == src)
    }

    pub fn predecessors<'a>(&'a self, dest: &'a str) -> impl Iterator<Item = &'a WorkflowEdge> + 'a {
        self.edges.iter().filter(move |edge| edge.dest == dest)
    }

    /// Names of every stage some node belongs to.
    pub fn stage_names(&self) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .filter_map(|node| node.stage_name.as_deref())
            .collect()
    }

    pub fn is_virtual(&self, name: &str) -> bool {
        self.node(name).is_some_and(|node| node.is_virtual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> WorkflowGraph {
        WorkflowGraph {
            nodes: vec![
                WorkflowNode::new("~commit"),
                WorkflowNode::new("a").with_id(JobId::new(1)),
                WorkflowNode::new("b").with_id(JobId::new(2)).in_stage("canary"),
                WorkflowNode::new("c").with_id(JobId::new(3)).virtual_node(),
            ],
            edges: vec![
                WorkflowEdge::new("~commit", "a"),
                WorkflowEdge::join("a", "c"),
                WorkflowEdge::join("b", "c"),
            ],
        }
    }

    #[test]
    fn lookups() {
        let graph = graph();
        assert_eq!(graph.node_by_id(JobId::new(2)).map(|n| n.name.as_str()), Some("b"));
        assert!(graph.is_virtual("c"));
        assert!(!graph.is_virtual("missing"));
        assert_eq!(graph.successors("a").count(), 1);
        assert_eq!(graph.predecessors("c").count(), 2);
        assert_eq!(graph.stage_names().into_iter().collect::<Vec<_>>(), vec!["canary"]);
    }

    #[test]
    fn deserializes_virtual_flag() {
        let node: WorkflowNode =
            serde_json::from_str(r#"{"name":"gate","id":7,"virtual":true,"stageName":null}"#).unwrap();
        assert!(node.is_virtual);
        assert_eq!(node.id, Some(JobId::new(7)));
    }
}
