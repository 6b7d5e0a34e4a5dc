use std::collections::BTreeSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use cadence_orchestrator::Executor;
use cadence_protocol::{Build, BuildId, Job};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorCall {
    pub build_id: BuildId,
    pub job_name: String,
}

/// Records every executor call; can be told to fail starts for given jobs.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    started: Mutex<Vec<ExecutorCall>>,
    stopped: Mutex<Vec<ExecutorCall>>,
    unfrozen: Mutex<Vec<ExecutorCall>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail for `job_name` until [`RecordingExecutor::recover`].
    pub fn fail_start_for(&self, job_name: &str) {
        self.failing.lock().unwrap().insert(job_name.to_string());
    }

    pub fn recover(&self, job_name: &str) {
        self.failing.lock().unwrap().remove(job_name);
    }

    pub fn started(&self) -> Vec<ExecutorCall> {
        self.started.lock().unwrap().clone()
    }

    pub fn started_jobs(&self) -> Vec<String> {
        self.started().into_iter().map(|call| call.job_name).collect()
    }

    pub fn start_count(&self, job_name: &str) -> usize {
        self.started()
            .iter()
            .filter(|call| call.job_name == job_name)
            .count()
    }

    pub fn stopped(&self) -> Vec<ExecutorCall> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn unfrozen(&self) -> Vec<ExecutorCall> {
        self.unfrozen.lock().unwrap().clone()
    }
}

fn call(build: &Build, job: &Job) -> ExecutorCall {
    ExecutorCall {
        build_id: build.id,
        job_name: job.name.clone(),
    }
}

impl Executor for RecordingExecutor {
    fn start(&self, build: &Build, job: &Job) -> Result<()> {
        if self.failing.lock().unwrap().contains(&job.name) {
            return Err(anyhow!("executor unavailable for {}", job.name));
        }
        self.started.lock().unwrap().push(call(build, job));
        Ok(())
    }

    fn stop(&self, build: &Build, job: &Job) -> Result<()> {
        self.stopped.lock().unwrap().push(call(build, job));
        Ok(())
    }

    fn stop_frozen(&self, build: &Build, job: &Job) -> Result<()> {
        self.unfrozen.lock().unwrap().push(call(build, job));
        Ok(())
    }
}
