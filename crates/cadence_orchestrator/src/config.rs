//! Orchestrator configuration
//!
//! Read from the `[orchestrator]` table of `$CADENCE_HOME/config.toml`. Every
//! field has a default, so a missing file or table is not an error.

use cadence_protocol::defaults::{
    DEFAULT_INIT_STEP_NAME, DEFAULT_UI_URI, SKIP_FURTHER_TOKEN, VIRTUAL_JOB_STATUS_MESSAGE,
};
use serde::Deserialize;
use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrchestratorConfig {
    /// Prefix for build links in notifications
    #[serde(default = "default_ui_uri")]
    pub ui_uri: String,

    /// Cause-message substring that suppresses downstream triggering
    #[serde(default = "default_skip_further_token")]
    pub skip_further_token: String,

    /// Synthetic step closed when a build starts running
    #[serde(default = "default_init_step_name")]
    pub init_step_name: String,

    #[serde(default = "default_virtual_status_message")]
    pub virtual_status_message: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ui_uri: default_ui_uri(),
            skip_further_token: default_skip_further_token(),
            init_step_name: default_init_step_name(),
            virtual_status_message: default_virtual_status_message(),
        }
    }
}

impl OrchestratorConfig {
    pub fn build_link(&self, pipeline_id: impl Display, build_id: impl Display) -> String {
        format!(
            "{}/pipelines/{}/builds/{}",
            self.ui_uri.trim_end_matches('/'),
            pipeline_id,
            build_id
        )
    }
}

fn default_ui_uri() -> String {
    DEFAULT_UI_URI.to_string()
}

fn default_skip_further_token() -> String {
    SKIP_FURTHER_TOKEN.to_string()
}

fn default_init_step_name() -> String {
    DEFAULT_INIT_STEP_NAME.to_string()
}

fn default_virtual_status_message() -> String {
    VIRTUAL_JOB_STATUS_MESSAGE.to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RootConfig {
    #[serde(default)]
    orchestrator: Option<OrchestratorConfig>,
}

/// Load orchestrator configuration; a missing file yields defaults.
pub fn load_config(config_path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    if !config_path.exists() {
        return Ok(OrchestratorConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    let root: RootConfig = toml::from_str(&content)?;

    Ok(root.orchestrator.unwrap_or_default())
}
