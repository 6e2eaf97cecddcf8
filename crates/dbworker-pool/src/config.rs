//! Pool configuration (dbworker.toml)
//!
//! ```toml
//! name = "sqlite"
//! worker_count = 4
//! stack_size = 262144
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Smallest worker stack size accepted
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Errors that can occur while loading a pool configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Pool name, used in worker thread names and logs
    pub name: String,

    /// Number of worker threads (0 = one per CPU core)
    pub worker_count: usize,

    /// Worker thread stack size in bytes (None = platform default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "dbworker".to_string(),
            worker_count: 1,
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Load a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: PoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Pool name cannot be empty".to_string(),
            ));
        }

        if self.name.chars().any(char::is_control) {
            return Err(ConfigError::Validation(format!(
                "Invalid pool name: {:?}. Must not contain control characters",
                self.name
            )));
        }

        if let Some(size) = self.stack_size {
            if size < MIN_STACK_SIZE {
                return Err(ConfigError::Validation(format!(
                    "Stack size {} is below the minimum of {} bytes",
                    size, MIN_STACK_SIZE
                )));
            }
        }

        Ok(())
    }

    /// Worker count with `0` resolved to the number of CPU cores
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }
}
