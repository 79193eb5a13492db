//! config.rs — Run config validation and TOML config files
//!
//! `validate` is the gate every run passes through before a machine exists.
//! Config files wrap a `SimulationConfig` under `[simulation]` plus an
//! optional `[server]` table for the control surface.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use vigil_types::SimulationConfig;

use crate::error::{Result, SimError};
use crate::triggers;

/// Embedded fallback used when no config file is found.
pub const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_ctrl_port")]
    pub ctrl_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { ctrl_port: default_ctrl_port() }
    }
}

fn default_ctrl_port() -> u16 {
    9090
}

fn invalid(msg: impl Into<String>) -> SimError {
    SimError::InvalidConfig(msg.into())
}

/// Reject configs a run cannot start with.
pub fn validate(config: &SimulationConfig) -> Result<()> {
    if !(config.duration.is_finite() && config.duration > 0.0) {
        return Err(invalid(format!("duration must be > 0 (got {})", config.duration)));
    }
    if !(config.event_frequency.is_finite() && config.event_frequency >= 0.0) {
        return Err(invalid(format!(
            "eventFrequency must be >= 0 (got {})",
            config.event_frequency
        )));
    }
    let interference = config.environment_conditions.interference;
    if !(interference.is_finite() && interference >= 0.0) {
        return Err(invalid(format!("interference must be >= 0 (got {interference})")));
    }

    let mut ids = HashSet::new();
    for (si, scenario) in config.scenarios.iter().enumerate() {
        if !scenario.id.is_empty() && !ids.insert(scenario.id.as_str()) {
            return Err(invalid(format!("duplicate scenario id '{}'", scenario.id)));
        }
        for (ti, trigger) in scenario.triggers.iter().enumerate() {
            triggers::validate(&trigger.condition).map_err(|e| {
                invalid(format!("scenario '{}' trigger #{ti}: {e}", scenario.label(si)))
            })?;
        }
    }
    Ok(())
}

pub fn parse(text: &str) -> Result<FileConfig> {
    toml::from_str(text).map_err(|e| SimError::ConfigFile(e.to_string()))
}

/// Read and parse `path`; fall back to [`DEFAULT_CONFIG`] when it does not exist.
pub fn load_file(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        info!("No {} found, using built-in config", path.display());
        return parse(DEFAULT_CONFIG);
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| SimError::ConfigFile(format!("{}: {e}", path.display())))?;
    parse(&text)
}
