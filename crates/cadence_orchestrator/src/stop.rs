//! Event stop path: abort every unfinished build of an event.

use cadence_protocol::{Build, BuildStatus, EventId};
use chrono::Utc;
use tracing::{debug, info};

use crate::controller::Orchestrator;
use crate::error::{OrchestratorError, Result};
use crate::metrics::METRICS;

impl Orchestrator {
    /// Abort the event's CREATED, QUEUED, RUNNING, BLOCKED and FROZEN builds.
    ///
    /// Each build is written conditionally on the status it was read with, so
    /// a build finishing concurrently keeps its own result. Builds that were
    /// handed to the executor are stopped there. Returns the aborted builds.
    pub fn stop_event(&self, event_id: EventId, username: &str) -> Result<Vec<Build>> {
        let store = self.store();
        store
            .events()
            .get(event_id)?
            .ok_or_else(|| OrchestratorError::missing("event", event_id))?;

        let mut aborted = Vec::new();
        for build in store.builds().list_for_event(event_id)? {
            if !build.status.is_stoppable() {
                continue;
            }
            let previous = build.status;
            let mut next = build;
            next.status = BuildStatus::Aborted;
            next.status_message = Some(format!("Aborted by {}", username));
            if previous == BuildStatus::Running {
                next.end_time = Some(Utc::now());
            }

            let Some(stopped) = store.builds().update_if(&next, previous)? else {
                debug!(build_id = %next.id, "build moved on before it could be aborted");
                continue;
            };
            if previous.is_started() {
                let job = store
                    .jobs()
                    .get(stopped.job_id)?
                    .ok_or_else(|| OrchestratorError::missing("job", stopped.job_id))?;
                if previous == BuildStatus::Frozen {
                    self.executor().stop_frozen(&stopped, &job)?;
                } else {
                    self.executor().stop(&stopped, &job)?;
                }
            }
            aborted.push(stopped);
        }

        METRICS.inc_events_stopped();
        let status = self.refresh_event_status(event_id)?;
        info!(
            event_id = %event_id,
            aborted = aborted.len(),
            user = %username,
            status = ?status,
            "event stopped"
        );
        Ok(aborted)
    }
}
