//! Build transition table
//!
//! Every `(current, requested)` pair maps to either a rejection or a
//! [`TransitionPlan`] describing the side effects the controller applies, in
//! order. The match is exhaustive over [`BuildStatus`], so adding a status
//! forces a decision here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Build, StatusMessageType};
use crate::status::BuildStatus;

/// Policy rejection of a requested transition. Nothing is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejection {
    /// Only the system places builds into QUEUED (creation, teardown start).
    #[error("Cannot update builds to QUEUED (current status {current})")]
    QueuedNotAllowed { current: BuildStatus },

    /// A repeated block announcement, usually a redelivered callback.
    #[error("Cannot update builds to BLOCKED: build is already BLOCKED")]
    DuplicateBlocked,
}

/// Timestamp/metadata effect of a transition. At most one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEffect {
    None,
    /// Replace build meta, merge it into the event, stamp `endTime`.
    RecordCompletion,
    /// Stamp `startTime`.
    RecordStart,
    /// Stamp `stats.blockedStartTime` unless already present.
    MarkBlockedStart,
}

/// How `statusMessage`/`statusMessageType` change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRule {
    /// No status requested: patch with supplied values, keep previous otherwise.
    PatchOnly,
    /// `Aborted by {user}`, or `Frozen build aborted by {user}`.
    Aborted { from_frozen: bool },
    /// SUCCESS/FAILURE: overwrite only when the caller supplied a message.
    KeepUnlessSupplied,
    /// Any other status: replace with the caller's values, defaulting to null.
    Replace,
    /// UNSTABLE builds keep their message untouched.
    Keep,
}

impl MessageRule {
    pub fn apply(
        &self,
        build: &mut Build,
        message: Option<&str>,
        message_type: Option<StatusMessageType>,
        username: &str,
    ) {
        match self {
            MessageRule::PatchOnly => {
                if let Some(message) = message.filter(|m| !m.is_empty()) {
                    build.status_message = Some(message.to_string());
                }
                if message_type.is_some() {
                    build.status_message_type = message_type;
                }
            }
            MessageRule::Aborted { from_frozen } => {
                build.status_message = Some(if *from_frozen {
                    format!("Frozen build aborted by {}", username)
                } else {
                    format!("Aborted by {}", username)
                });
            }
            MessageRule::KeepUnlessSupplied => {
                if let Some(message) = message.filter(|m| !m.is_empty()) {
                    build.status_message = Some(message.to_string());
                    build.status_message_type = message_type;
                }
            }
            MessageRule::Replace => {
                build.status_message = message.filter(|m| !m.is_empty()).map(str::to_string);
                build.status_message_type = message_type;
            }
            MessageRule::Keep => {}
        }
    }
}

/// Outcome of an accepted transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub previous: BuildStatus,
    pub requested: Option<BuildStatus>,
    /// Status the build holds after the transition (UNSTABLE is sticky).
    pub resulting: BuildStatus,
    pub effect: CompletionEffect,
    pub message_rule: MessageRule,
}

impl TransitionPlan {
    /// RUNNING, COLLAPSED and FROZEN close out the init step.
    pub fn closes_init_step(&self) -> bool {
        self.resulting.closes_init_step()
    }

    /// Leaving FROZEN on any other path releases the freeze hold.
    pub fn releases_freeze(&self) -> bool {
        !self.closes_init_step() && self.previous == BuildStatus::Frozen
    }
}

/// Validate `requested` against `current` and describe the side effects.
pub fn plan_transition(
    current: BuildStatus,
    requested: Option<BuildStatus>,
) -> Result<TransitionPlan, TransitionRejection> {
    let Some(requested_status) = requested else {
        return Ok(TransitionPlan {
            previous: current,
            requested: None,
            resulting: current,
            effect: CompletionEffect::None,
            message_rule: MessageRule::PatchOnly,
        });
    };

    let effect = match (current, requested_status) {
        (BuildStatus::Queued, BuildStatus::Queued) => CompletionEffect::None,
        (current, BuildStatus::Queued) => {
            return Err(TransitionRejection::QueuedNotAllowed { current });
        }
        (BuildStatus::Blocked, BuildStatus::Blocked) => {
            return Err(TransitionRejection::DuplicateBlocked);
        }
        (_, requested) if requested.records_completion() => CompletionEffect::RecordCompletion,
        (_, BuildStatus::Running) => CompletionEffect::RecordStart,
        (_, BuildStatus::Blocked) => CompletionEffect::MarkBlockedStart,
        _ => CompletionEffect::None,
    };

    let (resulting, message_rule) = if current == BuildStatus::Unstable {
        (BuildStatus::Unstable, MessageRule::Keep)
    } else {
        let rule = match requested_status {
            BuildStatus::Aborted => MessageRule::Aborted {
                from_frozen: current == BuildStatus::Frozen,
            },
            BuildStatus::Success | BuildStatus::Failure => MessageRule::KeepUnlessSupplied,
            BuildStatus::Created
            | BuildStatus::Queued
            | BuildStatus::Blocked
            | BuildStatus::Frozen
            | BuildStatus::Running
            | BuildStatus::Unstable
            | BuildStatus::Collapsed => MessageRule::Replace,
        };
        (requested_status, rule)
    };

    Ok(TransitionPlan {
        previous: current,
        requested,
        resulting,
        effect,
        message_rule,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_ids::{BuildId, EventId, JobId};

    fn build_with(status: BuildStatus) -> Build {
        let mut build = Build::new(BuildId::new(1), JobId::new(1), EventId::new(1));
        build.status = status;
        build
    }

    #[test]
    fn queued_is_rejected_unless_already_queued() {
        for current in BuildStatus::ALL {
            let result = plan_transition(current, Some(BuildStatus::Queued));
            if current == BuildStatus::Queued {
                assert!(result.is_ok());
            } else {
                assert_eq!(result, Err(TransitionRejection::QueuedNotAllowed { current }));
            }
        }
    }

    #[test]
    fn duplicate_blocked_is_rejected() {
        assert_eq!(
            plan_transition(BuildStatus::Blocked, Some(BuildStatus::Blocked)),
            Err(TransitionRejection::DuplicateBlocked)
        );
        let plan = plan_transition(BuildStatus::Running, Some(BuildStatus::Blocked)).unwrap();
        assert_eq!(plan.effect, CompletionEffect::MarkBlockedStart);
    }

    #[test]
    fn finishing_statuses_record_completion() {
        for requested in [BuildStatus::Success, BuildStatus::Failure, BuildStatus::Aborted] {
            let plan = plan_transition(BuildStatus::Running, Some(requested)).unwrap();
            assert_eq!(plan.effect, CompletionEffect::RecordCompletion);
            assert_eq!(plan.resulting, requested);
        }
        for requested in [BuildStatus::Created, BuildStatus::Frozen, BuildStatus::Collapsed] {
            let plan = plan_transition(BuildStatus::Running, Some(requested)).unwrap();
            assert_eq!(plan.effect, CompletionEffect::None);
        }
    }

    #[test]
    fn unstable_is_sticky_but_still_records_completion() {
        let plan = plan_transition(BuildStatus::Unstable, Some(BuildStatus::Success)).unwrap();
        assert_eq!(plan.resulting, BuildStatus::Unstable);
        assert_eq!(plan.effect, CompletionEffect::RecordCompletion);
        assert_eq!(plan.message_rule, MessageRule::Keep);
        assert_eq!(plan.previous, plan.resulting);
    }

    #[test]
    fn init_step_and_freeze_release() {
        let running = plan_transition(BuildStatus::Queued, Some(BuildStatus::Running)).unwrap();
        assert!(running.closes_init_step());
        assert!(!running.releases_freeze());

        let aborted = plan_transition(BuildStatus::Frozen, Some(BuildStatus::Aborted)).unwrap();
        assert!(!aborted.closes_init_step());
        assert!(aborted.releases_freeze());
        assert_eq!(aborted.message_rule, MessageRule::Aborted { from_frozen: true });
    }

    #[test]
    fn no_status_patches_message_only() {
        let plan = plan_transition(BuildStatus::Running, None).unwrap();
        assert_eq!(plan.resulting, BuildStatus::Running);
        assert_eq!(plan.message_rule, MessageRule::PatchOnly);

        let mut build = build_with(BuildStatus::Running);
        build.status_message = Some("old".into());
        build.status_message_type = Some(StatusMessageType::Warn);
        plan.message_rule.apply(&mut build, None, None, "alice");
        assert_eq!(build.status_message.as_deref(), Some("old"));
        plan.message_rule
            .apply(&mut build, Some("new"), None, "alice");
        assert_eq!(build.status_message.as_deref(), Some("new"));
        assert_eq!(build.status_message_type, Some(StatusMessageType::Warn));
    }

    #[test]
    fn message_rules_follow_policy() {
        let mut build = build_with(BuildStatus::Running);
        build.status_message = Some("kept".into());

        MessageRule::KeepUnlessSupplied.apply(&mut build, None, None, "alice");
        assert_eq!(build.status_message.as_deref(), Some("kept"));

        MessageRule::KeepUnlessSupplied.apply(
            &mut build,
            Some("tests failed"),
            Some(StatusMessageType::Error),
            "alice",
        );
        assert_eq!(build.status_message.as_deref(), Some("tests failed"));
        assert_eq!(build.status_message_type, Some(StatusMessageType::Error));

        MessageRule::Replace.apply(&mut build, None, None, "alice");
        assert_eq!(build.status_message, None);
        assert_eq!(build.status_message_type, None);

        MessageRule::Aborted { from_frozen: false }.apply(&mut build, None, None, "alice");
        assert_eq!(build.status_message.as_deref(), Some("Aborted by alice"));

        MessageRule::Aborted { from_frozen: true }.apply(&mut build, None, None, "bob");
        assert_eq!(build.status_message.as_deref(), Some("Frozen build aborted by bob"));
    }

    #[test]
    fn empty_message_counts_as_absent() {
        let mut build = build_with(BuildStatus::Running);
        build.status_message = Some("old".into());

        MessageRule::PatchOnly.apply(&mut build, Some(""), None, "alice");
        assert_eq!(build.status_message.as_deref(), Some("old"));

        MessageRule::Replace.apply(&mut build, Some(""), Some(StatusMessageType::Info), "alice");
        assert_eq!(build.status_message, None);
        assert_eq!(build.status_message_type, Some(StatusMessageType::Info));
    }
}
