//! Configuration file handling

use serde::Deserialize;
use std::path::Path;

use crate::runtime::TestSettings;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Settings applied beneath every scenario
    #[serde(default)]
    pub settings: TestSettings,

    /// Console output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Console output configuration
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Print the per-iteration step summary table
    #[serde(default = "default_summary")]
    pub summary: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            summary: default_summary(),
        }
    }
}

fn default_summary() -> bool {
    true
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.settings.validate()?;
        Ok(config)
    }
}
