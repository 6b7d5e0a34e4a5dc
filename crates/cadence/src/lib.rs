//! Cadence command-line front end.
//!
//! `cadence replay` plays a scenario file against the orchestrator on an
//! in-memory store and reports the resulting builds, notifications and
//! counters.

pub mod output;
pub mod replay;
pub mod scenario;

pub use replay::{replay, BuildRow, Rejection, ReplayReport};
pub use scenario::{load_scenario, parse_scenario, Scenario, Step, UpdateStep};
