//! Backfill configuration via `postmirror.toml`
//!
//! Page sizes and the retry schedule live in a small TOML file next to the
//! mirror's data. On first start a commented default file is written; edit it
//! and restart to change settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use postmirror_core::{Error, Result};

use crate::retry::BackoffPolicy;

/// Config file name placed in the mirror's data directory.
pub const CONFIG_FILE_NAME: &str = "postmirror.toml";

/// Page size the remote protocol serves by default
pub const DEFAULT_PAGE_SIZE: usize = 100;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_base_ms() -> u64 {
    200
}

fn default_max_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

/// Retry schedule for transient remote failures, the `[backoff]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds (default: 200)
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Delay cap in milliseconds (default: 10000)
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
    /// Total attempts per request, including the first (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Backfill configuration loaded from `postmirror.toml`.
///
/// # Example
///
/// ```toml
/// history_page_size = 100
/// list_page_size = 100
///
/// [backoff]
/// base_ms = 200
/// max_ms = 10000
/// max_attempts = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Messages requested per history page.
    #[serde(default = "default_page_size")]
    pub history_page_size: usize,
    /// Conversations requested per list page.
    #[serde(default = "default_page_size")]
    pub list_page_size: usize,
    /// Retry behaviour of the remote fetch layer
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            history_page_size: DEFAULT_PAGE_SIZE,
            list_page_size: DEFAULT_PAGE_SIZE,
            backoff: BackoffConfig::default(),
        }
    }
}

impl BackfillConfig {
    /// Check that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a zero page size, zero attempts, or a
    /// backoff cap below its base.
    pub fn validate(&self) -> Result<()> {
        if self.history_page_size == 0 {
            return Err(Error::ConfigError(
                "history_page_size must be greater than 0".to_string(),
            ));
        }
        if self.list_page_size == 0 {
            return Err(Error::ConfigError(
                "list_page_size must be greater than 0".to_string(),
            ));
        }
        if self.backoff.max_attempts == 0 {
            return Err(Error::ConfigError(
                "backoff.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(Error::ConfigError(format!(
                "backoff.max_ms ({}) is below backoff.base_ms ({})",
                self.backoff.max_ms, self.backoff.base_ms
            )));
        }
        Ok(())
    }

    /// Retry schedule described by the `[backoff]` section.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff.base_ms),
            max: Duration::from_millis(self.backoff.max_ms),
            max_attempts: self.backoff.max_attempts,
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# postmirror backfill configuration
#
# Messages requested per history page (default: 100)
history_page_size = 100

# Conversations requested per conversation-list page (default: 100)
list_page_size = 100

# Retry schedule for transient remote failures.
# Delays start at base_ms and double up to max_ms.
[backoff]
base_ms = 200
max_ms = 10000
max_attempts = 5
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: BackfillConfig = toml::from_str(&content).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::ConfigError(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
