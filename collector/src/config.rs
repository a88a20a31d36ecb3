use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::clock::ClockStrategy;
use crate::{CollectorError, Result};

/// Recording configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Base directory under which each run gets its own subdirectory.
    #[serde(default = "default_output_base")]
    pub output_base: PathBuf,

    #[serde(default)]
    pub clock: ClockStrategy,
}

fn default_output_base() -> PathBuf {
    PathBuf::from(".")
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            output_base: default_output_base(),
            clock: ClockStrategy::default(),
        }
    }
}

impl TraceConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CollectorError::Config {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| CollectorError::Config {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}
