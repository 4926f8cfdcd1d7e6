//! Configuration file support for logtrail.
//!
//! Loads `logtrail.toml` from an explicit path or the user config directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use logtrail_core::EngineConfig;

/// The config file name
pub const CONFIG_FILE_NAME: &str = "logtrail.toml";

/// Configuration loaded from `logtrail.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Root directory holding one subdirectory per project
    pub projects_dir: Option<PathBuf>,
    /// SQLite database file
    pub database: Option<PathBuf>,
    /// Transcript file extension
    pub extension: Option<String>,
    pub log_level: Option<String>,
    /// pretty, json or compact
    pub log_format: Option<String>,
    /// Mirror diagnostics to this file (rolled daily)
    pub log_file: Option<PathBuf>,
    /// Append engine events to this file as JSON lines
    pub event_log: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineSection,
}

/// `[engine]` tunables
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default, with = "humantime_serde")]
    pub scan_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub throttle: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub freshness: Option<Duration>,
    pub batch_size: Option<usize>,
    pub preview_chars: Option<usize>,
}

impl AppConfig {
    /// Default location: `~/.config/logtrail/logtrail.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("logtrail").join(CONFIG_FILE_NAME))
    }

    /// Load configuration.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if the file exists and parses successfully
    /// - `Ok(None)` if no path was given and the default file does not exist
    /// - `Err(...)` if an explicit path is missing or any file fails to parse
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(None),
            },
        };

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    /// Engine settings with file values applied over the defaults.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(ref dir) = self.projects_dir {
            config.projects_dir = dir.clone();
        }
        if let Some(ref extension) = self.extension {
            config.extension = extension.clone();
        }

        let engine = &self.engine;
        if let Some(v) = engine.scan_interval {
            config.scan_interval = v;
        }
        if let Some(v) = engine.poll_interval {
            config.poll_interval = v;
        }
        if let Some(v) = engine.throttle {
            config.throttle = v;
        }
        if let Some(v) = engine.freshness {
            config.freshness = v;
        }
        if let Some(v) = engine.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = engine.preview_chars {
            config.preview_chars = v;
        }
        config
    }
}
