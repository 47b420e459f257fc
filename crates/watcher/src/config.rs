//! Watch service configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest accepted receive buffer
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;

/// Largest accepted receive buffer
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Invalid configuration values
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("buffer_size must be between 4096 and 1048576 bytes, got {0}")]
    BufferSize(usize),

    #[error("thread_name must not be empty")]
    EmptyThreadName,
}

/// Settings shared by every watch of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Capacity of each receive buffer (each task holds two)
    pub buffer_size: usize,

    /// Watch the whole subtree where the platform supports it natively
    pub recursive: bool,

    /// Name of the worker thread
    pub thread_name: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            recursive: true,
            thread_name: "dirwatch-worker".to_string(),
        }
    }
}

impl WatchConfig {
    /// Check every value is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}
