//! Cadence test utilities
//!
//! In-process fakes for the orchestrator's outbound ports plus a fixture that
//! lays out jobs, stages and a workflow graph in a memory store.
//!
//! ```rust,ignore
//! let mut fixture = PipelineFixture::new();
//! fixture.job("main");
//! fixture.edge("~commit", "main");
//! let harness = fixture.harness();
//! let event = harness.start(fixture.event_spec()).unwrap();
//! assert_eq!(harness.executor.started_jobs(), vec!["main"]);
//! ```

pub mod executor;
pub mod fixture;
pub mod oracle;

pub use executor::RecordingExecutor;
pub use fixture::{Harness, PipelineFixture};
pub use oracle::ScriptedOracle;
