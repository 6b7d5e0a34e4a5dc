use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Build status - lifecycle of one execution attempt of a job.
/// Shared by every crate that stores or compares a build status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    /// Build materialized but not handed to an executor
    #[default]
    Created,
    /// Build handed to an executor, waiting for capacity
    Queued,
    /// Build waiting on another build (blockedBy)
    Blocked,
    /// Build held by a freeze window
    Frozen,
    /// Build is executing
    Running,
    Success,
    Failure,
    Aborted,
    /// Build finished with warnings; sticky once reached
    Unstable,
    /// Build can never run because an upstream join failed
    Collapsed,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 10] = [
        BuildStatus::Created,
        BuildStatus::Queued,
        BuildStatus::Blocked,
        BuildStatus::Frozen,
        BuildStatus::Running,
        BuildStatus::Success,
        BuildStatus::Failure,
        BuildStatus::Aborted,
        BuildStatus::Unstable,
        BuildStatus::Collapsed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Created => "CREATED",
            BuildStatus::Queued => "QUEUED",
            BuildStatus::Blocked => "BLOCKED",
            BuildStatus::Frozen => "FROZEN",
            BuildStatus::Running => "RUNNING",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::Aborted => "ABORTED",
            BuildStatus::Unstable => "UNSTABLE",
            BuildStatus::Collapsed => "COLLAPSED",
        }
    }

    /// FAILURE, ABORTED, UNSTABLE or COLLAPSED.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Failure
                | BuildStatus::Aborted
                | BuildStatus::Unstable
                | BuildStatus::Collapsed
        )
    }

    /// Terminal statuses plus SUCCESS.
    pub fn is_finished(&self) -> bool {
        self.is_terminal() || *self == BuildStatus::Success
    }

    /// Anything past CREATED has been claimed by a trigger or an executor.
    pub fn is_started(&self) -> bool {
        *self != BuildStatus::Created
    }

    /// Statuses whose entry closes the synthetic initialization step.
    pub fn closes_init_step(&self) -> bool {
        matches!(
            self,
            BuildStatus::Running | BuildStatus::Collapsed | BuildStatus::Frozen
        )
    }

    /// Requested statuses that stamp `endTime` and merge metadata into the event.
    pub fn records_completion(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failure | BuildStatus::Aborted
        )
    }

    /// Statuses an external caller is allowed to update from.
    pub fn is_updatable(&self) -> bool {
        matches!(
            self,
            BuildStatus::Running
                | BuildStatus::Queued
                | BuildStatus::Blocked
                | BuildStatus::Unstable
                | BuildStatus::Frozen
        )
    }

    /// Statuses the event stop path aborts.
    pub fn is_stoppable(&self) -> bool {
        matches!(
            self,
            BuildStatus::Created
                | BuildStatus::Queued
                | BuildStatus::Running
                | BuildStatus::Blocked
                | BuildStatus::Frozen
        )
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        BuildStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| format!("Invalid build status: '{}'", s))
    }
}

/// Standalone form of [`BuildStatus::is_terminal`].
pub fn is_terminal(status: BuildStatus) -> bool {
    status.is_terminal()
}

/// First-terminal-wins rule for aggregate records such as stage builds.
///
/// A record may move to `new` only while its current value is not terminal.
/// SUCCESS is not sticky: a later terminal value from a sibling replaces it.
pub fn can_overwrite(old: BuildStatus, new: BuildStatus) -> bool {
    old != new && !old.is_terminal()
}

/// Aggregate status of an event, derived from its builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Unknown,
    InProgress,
    Aborted,
    Failure,
    Success,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Unknown => "UNKNOWN",
            EventStatus::InProgress => "IN_PROGRESS",
            EventStatus::Aborted => "ABORTED",
            EventStatus::Failure => "FAILURE",
            EventStatus::Success => "SUCCESS",
        }
    }

    fn from_build(status: BuildStatus) -> Option<Self> {
        match status {
            BuildStatus::Queued
            | BuildStatus::Running
            | BuildStatus::Blocked
            | BuildStatus::Frozen => Some(EventStatus::InProgress),
            BuildStatus::Aborted => Some(EventStatus::Aborted),
            BuildStatus::Failure => Some(EventStatus::Failure),
            BuildStatus::Success | BuildStatus::Unstable => Some(EventStatus::Success),
            BuildStatus::Created | BuildStatus::Collapsed => None,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive an event's status from its builds.
///
/// Precedence: IN_PROGRESS > ABORTED > FAILURE > SUCCESS. CREATED and
/// COLLAPSED builds do not count; `None` means nothing counted.
pub fn derive_event_status<I>(statuses: I) -> Option<EventStatus>
where
    I: IntoIterator<Item = BuildStatus>,
{
    let mut seen = [false; 4];
    for status in statuses {
        match EventStatus::from_build(status) {
            Some(EventStatus::InProgress) => seen[0] = true,
            Some(EventStatus::Aborted) => seen[1] = true,
            Some(EventStatus::Failure) => seen[2] = true,
            Some(EventStatus::Success) => seen[3] = true,
            _ => {}
        }
    }

    [
        EventStatus::InProgress,
        EventStatus::Aborted,
        EventStatus::Failure,
        EventStatus::Success,
    ]
    .into_iter()
    .zip(seen)
    .find_map(|(status, hit)| hit.then_some(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_finished_sets() {
        let terminal: Vec<_> = BuildStatus::ALL.into_iter().filter(|s| is_terminal(*s)).collect();
        assert_eq!(
            terminal,
            vec![
                BuildStatus::Failure,
                BuildStatus::Aborted,
                BuildStatus::Unstable,
                BuildStatus::Collapsed
            ]
        );
        assert!(BuildStatus::Success.is_finished());
        assert!(!BuildStatus::Success.is_terminal());
        assert!(!BuildStatus::Running.is_finished());
    }

    #[test]
    fn first_terminal_wins() {
        assert!(can_overwrite(BuildStatus::Running, BuildStatus::Success));
        assert!(can_overwrite(BuildStatus::Success, BuildStatus::Failure));
        assert!(!can_overwrite(BuildStatus::Failure, BuildStatus::Success));
        assert!(!can_overwrite(BuildStatus::Failure, BuildStatus::Aborted));
        assert!(!can_overwrite(BuildStatus::Collapsed, BuildStatus::Running));
        assert!(!can_overwrite(BuildStatus::Running, BuildStatus::Running));
    }

    #[test]
    fn status_strings_round_trip_through_from_str() {
        for status in BuildStatus::ALL {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert_eq!("unstable".parse::<BuildStatus>().unwrap(), BuildStatus::Unstable);
        assert!("DONE".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&BuildStatus::Collapsed).unwrap();
        assert_eq!(json, "\"COLLAPSED\"");
        let event: EventStatus = serde_json::from_str("\"IN_PROGRESS\"").unwrap();
        assert_eq!(event, EventStatus::InProgress);
    }

    #[test]
    fn event_status_precedence() {
        use BuildStatus::*;
        assert_eq!(
            derive_event_status([Success, Failure, Running]),
            Some(EventStatus::InProgress)
        );
        assert_eq!(
            derive_event_status([Success, Failure, Aborted]),
            Some(EventStatus::Aborted)
        );
        assert_eq!(derive_event_status([Success, Failure]), Some(EventStatus::Failure));
        assert_eq!(derive_event_status([Unstable, Success]), Some(EventStatus::Success));
        assert_eq!(derive_event_status([Created, Collapsed]), None);
        assert_eq!(derive_event_status([]), None);
    }
}
