//! Cadence orchestrator
//!
//! The build lifecycle state machine and the downstream trigger engine.
//!
//! - [`controller`]: Build Status Controller ([`Orchestrator::update_build`])
//! - [`trigger`]: Workflow Trigger Resolver
//! - [`stage`]: Stage Coordinator
//! - [`join`]: Join-Failure Handler
//! - [`launcher`]: event creation and the virtual-job cascade
//! - [`stop`]: event stop path
//! - [`ports`]: graph oracle, executor and notifier seams
//!
//! Persistence goes through [`cadence_state_store::StateStore`].

pub mod config;
pub mod controller;
pub mod error;
pub mod join;
pub mod launcher;
pub mod metrics;
pub mod ports;
pub mod stage;
pub mod stop;
pub mod trigger;

pub use config::{load_config, ConfigError, OrchestratorConfig};
pub use controller::{BuildUpdate, Orchestrator, UpdateContext};
pub use error::{OrchestratorError, Result};
pub use join::JoinFailureHandler;
pub use launcher::{EventLauncher, EventSpec};
pub use metrics::{MetricsSnapshot, METRICS};
pub use ports::{
    BuildStatusNotice, ChannelNotifier, EdgeOracle, Executor, GraphOracle, GraphQuery, Notifier,
    NullNotifier,
};
pub use stage::StageCoordinator;
pub use trigger::TriggerResolver;
