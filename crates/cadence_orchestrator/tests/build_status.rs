//! Build Status Controller behaviour: transition policy and side effects.

use cadence_orchestrator::{BuildUpdate, Orchestrator, OrchestratorError};
use cadence_protocol::defaults::BLOCKED_START_TIME_KEY;
use cadence_protocol::{BuildStatus, Meta, StatusMessageType, TransitionRejection};
use cadence_test_utils::PipelineFixture;
use serde_json::{json, Value};

fn meta(value: Value) -> Meta {
    value.as_object().cloned().expect("object literal")
}

fn single_job() -> PipelineFixture {
    let mut fixture = PipelineFixture::new();
    fixture.job("main");
    fixture.edge("~commit", "main");
    fixture
}

#[test]
fn unstable_is_sticky_but_completion_is_recorded() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();

    harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Running))
        .unwrap();
    harness
        .update(
            event.id,
            "main",
            BuildUpdate::status(BuildStatus::Unstable)
                .with_message("2 flaky tests", StatusMessageType::Warn),
        )
        .unwrap();

    let build = harness
        .update(
            event.id,
            "main",
            BuildUpdate::status(BuildStatus::Success)
                .with_message("all green", StatusMessageType::Info)
                .with_meta(meta(json!({"coverage": {"lines": 91}}))),
        )
        .unwrap();

    assert_eq!(build.status, BuildStatus::Unstable);
    assert!(build.end_time.is_some());
    assert_eq!(build.meta, meta(json!({"coverage": {"lines": 91}})));
    assert_eq!(build.status_message.as_deref(), Some("2 flaky tests"));

    let stored = harness.build(event.id, "main").unwrap();
    assert_eq!(stored, build);
    assert_eq!(harness.event(event.id).meta["coverage"]["lines"], 91);
}

#[test]
fn duplicate_blocked_is_rejected_without_mutation() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();

    let blocked = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Blocked))
        .unwrap();
    assert!(blocked.stats.contains_key(BLOCKED_START_TIME_KEY));

    let err = harness
        .update(
            event.id,
            "main",
            BuildUpdate::status(BuildStatus::Blocked).with_message("again", StatusMessageType::Info),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Rejected(TransitionRejection::DuplicateBlocked)
    ));
    assert!(!err.is_retryable());
    assert_eq!(harness.build(event.id, "main").unwrap(), blocked);
}

#[test]
fn blocked_start_time_survives_a_second_block_episode() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();

    let first = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Blocked))
        .unwrap();
    harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Running))
        .unwrap();
    let second = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Blocked))
        .unwrap();

    assert_eq!(
        first.stats[BLOCKED_START_TIME_KEY],
        second.stats[BLOCKED_START_TIME_KEY]
    );
}

#[test]
fn queued_is_rejected_for_running_builds() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();
    harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Running))
        .unwrap();

    let err = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Queued))
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Rejected(TransitionRejection::QueuedNotAllowed {
            current: BuildStatus::Running
        })
    ));
    assert_eq!(harness.status(event.id, "main"), Some(BuildStatus::Running));
}

#[test]
fn running_closes_the_init_step() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();
    let build = harness.build(event.id, "main").unwrap();
    let step = harness.store.steps().create(build.id, "sd-setup-init").unwrap();

    let running = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Running))
        .unwrap();

    let step = harness.store.steps().get(step.id).unwrap().unwrap();
    assert_eq!(step.code, Some(0));
    assert_eq!(step.end_time, running.start_time);
    assert!(step.end_time.is_some());
}

#[test]
fn status_message_policy() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();

    let running = harness
        .update(
            event.id,
            "main",
            BuildUpdate::status(BuildStatus::Running)
                .with_message("compiling", StatusMessageType::Info),
        )
        .unwrap();
    assert_eq!(running.status_message.as_deref(), Some("compiling"));

    // FAILURE without a message keeps the previous one
    let failed = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Failure))
        .unwrap();
    assert_eq!(failed.status_message.as_deref(), Some("compiling"));
    assert_eq!(failed.status_message_type, Some(StatusMessageType::Info));
}

#[test]
fn aborting_a_frozen_build_releases_the_freeze() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();

    harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Frozen))
        .unwrap();
    let aborted = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Aborted))
        .unwrap();

    assert_eq!(aborted.status, BuildStatus::Aborted);
    assert_eq!(
        aborted.status_message.as_deref(),
        Some("Frozen build aborted by tester")
    );
    let unfrozen = harness.executor.unfrozen();
    assert_eq!(unfrozen.len(), 1);
    assert_eq!(unfrozen[0].build_id, aborted.id);
}

#[test]
fn patch_without_status_keeps_status_and_skips_notification() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();
    harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Running))
        .unwrap();
    harness.drain_notices();

    let patched = harness
        .update(
            event.id,
            "main",
            BuildUpdate {
                status_message: Some("50% done".into()),
                stats: Some(meta(json!({"progress": 50}))),
                ..BuildUpdate::default()
            },
        )
        .unwrap();

    assert_eq!(patched.status, BuildStatus::Running);
    assert_eq!(patched.status_message.as_deref(), Some("50% done"));
    assert_eq!(patched.stats["progress"], 50);
    assert!(harness.drain_notices().is_empty());
}

#[test]
fn notifications_carry_link_and_fixed_flag() {
    let fixture = single_job();
    let harness = fixture.harness();

    let first = harness.start(fixture.event_spec()).unwrap();
    harness.run_to(first.id, "main", BuildStatus::Failure).unwrap();
    let second = harness.start(fixture.event_spec()).unwrap();
    harness.run_to(second.id, "main", BuildStatus::Success).unwrap();
    let third = harness.start(fixture.event_spec()).unwrap();
    harness.run_to(third.id, "main", BuildStatus::Success).unwrap();

    let finished: Vec<_> = harness
        .drain_notices()
        .into_iter()
        .filter(|notice| notice.status != BuildStatus::Running)
        .collect();
    assert_eq!(finished.len(), 3);
    assert_eq!(finished[0].status, BuildStatus::Failure);
    assert!(!finished[0].is_fixed);
    assert!(finished[1].is_fixed);
    assert!(!finished[2].is_fixed);

    let build = harness.build(second.id, "main").unwrap();
    assert_eq!(
        finished[1].build_link,
        format!("http://localhost:4200/pipelines/1/builds/{}", build.id)
    );

    harness
        .update(third.id, "main", BuildUpdate::status(BuildStatus::Success))
        .unwrap();
    let redelivered: Vec<_> = harness
        .drain_notices()
        .into_iter()
        .map(|notice| (notice.status, notice.is_fixed))
        .collect();
    assert_eq!(redelivered, vec![(BuildStatus::Success, false)]);
}

#[test]
fn redelivered_fixing_success_stays_fixed() {
    let fixture = single_job();
    let harness = fixture.harness();

    let first = harness.start(fixture.event_spec()).unwrap();
    harness.run_to(first.id, "main", BuildStatus::Failure).unwrap();
    let second = harness.start(fixture.event_spec()).unwrap();
    harness.run_to(second.id, "main", BuildStatus::Success).unwrap();
    harness.drain_notices();

    harness
        .update(second.id, "main", BuildUpdate::status(BuildStatus::Success))
        .unwrap();
    let notices = harness.drain_notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].is_fixed);
}

#[test]
fn failed_commit_leaves_build_untouched_and_can_be_retried() {
    let mut fixture = single_job();
    fixture.job("next");
    fixture.edge("main", "next");
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();
    harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Running))
        .unwrap();

    fixture.memory.fail_next_commit();
    let err = harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Success))
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(harness.status(event.id, "main"), Some(BuildStatus::Running));
    assert!(harness.build(event.id, "next").is_none());

    harness
        .update(event.id, "main", BuildUpdate::status(BuildStatus::Success))
        .unwrap();
    assert_eq!(harness.status(event.id, "next"), Some(BuildStatus::Queued));
}

#[test]
fn external_updates_only_touch_builds_in_flight() {
    let fixture = single_job();
    let harness = fixture.harness();
    let event = harness.start(fixture.event_spec()).unwrap();
    let done = harness.run_to(event.id, "main", BuildStatus::Success).unwrap();

    assert!(matches!(
        Orchestrator::ensure_updatable(&done),
        Err(OrchestratorError::NotUpdatable {
            status: BuildStatus::Success,
            ..
        })
    ));
    let err = harness
        .orchestrator
        .update_external(BuildUpdate::status(BuildStatus::Failure), done.id, &harness.ctx)
        .unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(harness.status(event.id, "main"), Some(BuildStatus::Success));
}

#[test]
fn missing_build_is_an_integrity_error() {
    let fixture = single_job();
    let harness = fixture.harness();
    let err = harness
        .orchestrator
        .update_build(
            BuildUpdate::status(BuildStatus::Running),
            cadence_protocol::BuildId::new(4040),
            &harness.ctx,
        )
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Missing { kind: "build", .. }));
}
