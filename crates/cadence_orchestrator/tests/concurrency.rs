//! Racing completions against the exactly-once guarantees.

use std::thread;

use cadence_orchestrator::BuildUpdate;
use cadence_protocol::{BuildStatus, EventStatus};
use cadence_test_utils::PipelineFixture;

const ROUNDS: usize = 25;

#[test]
fn sibling_completions_start_teardown_once() {
    for round in 0..ROUNDS {
        let mut fixture = PipelineFixture::new();
        let members = ["a", "b", "c", "d"];
        for member in members {
            fixture.job(member);
        }
        let stage = fixture.stage("canary", &members);
        fixture.edge("~commit", "stage@canary");
        for member in members {
            fixture
                .edge("stage@canary", member)
                .join(member, "stage@canary:teardown");
        }
        let harness = fixture.harness();
        let event = harness.start(fixture.event_spec()).unwrap();
        harness
            .run_to(event.id, "stage@canary", BuildStatus::Success)
            .unwrap();

        let mut build_ids = Vec::new();
        for member in members {
            harness
                .update(event.id, member, BuildUpdate::status(BuildStatus::Running))
                .unwrap();
            build_ids.push(harness.build(event.id, member).unwrap().id);
        }

        let orchestrator = &harness.orchestrator;
        let ctx = &harness.ctx;
        thread::scope(|scope| {
            for build_id in &build_ids {
                scope.spawn(move || {
                    orchestrator
                        .update_build(BuildUpdate::status(BuildStatus::Success), *build_id, ctx)
                        .unwrap();
                });
            }
        });

        assert_eq!(
            harness.executor.start_count("stage@canary:teardown"),
            1,
            "round {round}"
        );
        assert_eq!(
            harness.status(event.id, "stage@canary:teardown"),
            Some(BuildStatus::Queued)
        );
        assert_eq!(harness.stage_build(&stage, event.id).status, BuildStatus::Success);
    }
}

#[test]
fn racing_failures_keep_the_first_terminal_status() {
    for round in 0..ROUNDS {
        let mut fixture = PipelineFixture::new();
        fixture.job("a");
        fixture.job("b");
        let stage = fixture.stage("canary", &["a", "b"]);
        fixture
            .edge("~commit", "stage@canary")
            .edge("stage@canary", "a")
            .edge("stage@canary", "b");
        let harness = fixture.harness();
        let event = harness.start(fixture.event_spec()).unwrap();
        harness
            .run_to(event.id, "stage@canary", BuildStatus::Success)
            .unwrap();
        for member in ["a", "b"] {
            harness
                .update(event.id, member, BuildUpdate::status(BuildStatus::Running))
                .unwrap();
        }
        let a = harness.build(event.id, "a").unwrap().id;
        let b = harness.build(event.id, "b").unwrap().id;

        let orchestrator = &harness.orchestrator;
        let ctx = &harness.ctx;
        thread::scope(|scope| {
            scope.spawn(move || {
                orchestrator
                    .update_build(BuildUpdate::status(BuildStatus::Failure), a, ctx)
                    .unwrap();
            });
            scope.spawn(move || {
                orchestrator
                    .update_build(BuildUpdate::status(BuildStatus::Aborted), b, ctx)
                    .unwrap();
            });
        });

        let status = harness.stage_build(&stage, event.id).status;
        assert!(
            matches!(status, BuildStatus::Failure | BuildStatus::Aborted),
            "round {round}: {status}"
        );
        assert_eq!(harness.executor.start_count("stage@canary:teardown"), 1);
        assert_eq!(harness.event(event.id).status, EventStatus::InProgress);
    }
}
