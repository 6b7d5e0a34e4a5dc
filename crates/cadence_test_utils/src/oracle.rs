use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use cadence_orchestrator::{GraphOracle, GraphQuery};

/// Oracle answering from a fixed trigger -> jobs table.
///
/// Unscripted triggers yield nothing. Every query is recorded so tests can
/// assert which triggers the orchestrator asked about.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    answers: BTreeMap<String, Vec<String>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, trigger: &str, next: &[&str]) -> Self {
        self.answers.insert(
            trigger.to_string(),
            next.iter().map(|name| name.to_string()).collect(),
        );
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl GraphOracle for ScriptedOracle {
    fn next_jobs(&self, query: &GraphQuery<'_>) -> Result<Vec<String>> {
        self.queries.lock().unwrap().push(query.trigger.to_string());
        Ok(self.answers.get(query.trigger).cloned().unwrap_or_default())
    }
}
