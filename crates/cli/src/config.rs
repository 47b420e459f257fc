//! `dw` configuration file
//!
//! Looked up at `$DIRWATCH_CONFIG`, else `<config dir>/dirwatch/config.toml`.
//! A missing file means defaults; a present but invalid one is an error.

use anyhow::{Context, Result};
use dirwatch::WatchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "DIRWATCH_CONFIG";

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Watch service settings
    pub watch: WatchConfig,
    /// Logging settings
    pub log: LogConfig,
    /// Terminal output settings
    pub output: OutputConfig,
}

/// `[log]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Directory for a daily rolling log file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            dir: None,
        }
    }
}

/// `[output]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// One JSON object per line instead of human-readable text
    pub json: bool,
    /// Color human-readable output when stdout is a terminal
    pub color: bool,
    /// How often `dw watch` drains the notification queue
    pub poll_interval_ms: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            json: false,
            color: true,
            poll_interval_ms: 100,
        }
    }
}

impl CliConfig {
    /// Check every value is in range
    pub fn validate(&self) -> Result<()> {
        self.watch.validate().context("Invalid [watch] section")?;
        if !(1..=10_000).contains(&self.output.poll_interval_ms) {
            anyhow::bail!(
                "Invalid [output] section: poll_interval_ms must be between 1 and 10000, got {}",
                self.output.poll_interval_ms
            );
        }
        Ok(())
    }
}

/// Location of the config file, if one can be determined
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("dirwatch").join("config.toml"))
}

/// Load and validate the config file, falling back to defaults
pub fn load() -> Result<CliConfig> {
    match config_file_path() {
        Some(path) if path.exists() => load_from(&path),
        _ => Ok(CliConfig::default()),
    }
}

/// Load and validate a specific config file
pub fn load_from(path: &Path) -> Result<CliConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: CliConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

/// Default configuration rendered as a config file
pub fn example() -> Result<String> {
    toml::to_string_pretty(&CliConfig::default()).context("Failed to render example config")
}
