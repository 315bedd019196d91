use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "waygate.toml";

/// Engine settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// How long a side query may stay outstanding before the continuation
    /// sees the empty failure sentinel.
    #[serde(default = "default_side_query_timeout_ms")]
    pub side_query_timeout_ms: u64,

    /// Largest side-query payload the engine will put on the wire.
    #[serde(default = "default_max_side_payload")]
    pub max_side_payload: usize,

    /// Worker identifier included in diagnostics.
    #[serde(default)]
    pub worker: u32,
}

impl EngineConfig {
    pub fn side_query_timeout(&self) -> Duration {
        Duration::from_millis(self.side_query_timeout_ms)
    }

    pub fn for_worker(mut self, worker: u32) -> Self {
        self.worker = worker;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            side_query_timeout_ms: default_side_query_timeout_ms(),
            max_side_payload: default_max_side_payload(),
            worker: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found")]
    NotFound,
    #[error("failed to decode config: {0}")]
    Decode(String),
}

/// Load engine settings. A missing file falls back to defaults; a file
/// that fails to decode is fatal at startup.
pub fn load_config(path: &str) -> anyhow::Result<EngineConfig> {
    match decode_from_path(path) {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::NotFound) => Ok(EngineConfig::default()),
        Err(e @ ConfigError::Decode(_)) => Err(e.into()),
    }
}

fn decode_from_path(path: &str) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound)?;
    toml::from_str(&content).map_err(|e| ConfigError::Decode(e.message().into()))
}

fn default_side_query_timeout_ms() -> u64 {
    2000
}

fn default_max_side_payload() -> usize {
    512
}
