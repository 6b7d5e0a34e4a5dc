//! Canonical default values shared across the orchestrator and the CLI.

pub const DEFAULT_UI_URI: &str = "http://localhost:4200";
pub const DEFAULT_INIT_STEP_NAME: &str = "sd-setup-init";
pub const SKIP_FURTHER_TOKEN: &str = "[skip further]";
pub const VIRTUAL_JOB_STATUS_MESSAGE: &str = "Skipped execution of the virtual job";
pub const COMMIT_TRIGGER: &str = "~commit";
pub const PR_TRIGGER: &str = "~pr";
/// Stats key recording when a build first entered BLOCKED.
pub const BLOCKED_START_TIME_KEY: &str = "blockedStartTime";
