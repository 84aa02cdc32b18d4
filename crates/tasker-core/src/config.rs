//! Runtime configuration, read from TOML.
//!
//! ```toml
//! [defaults]
//! max_retries = 3
//! lease_secs = 300
//!
//! [logging]
//! filter = "info,tasker_core=debug"
//! ```
//!
//! Every key is optional; missing ones take the defaults below.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::DEFAULT_MAX_RETRIES;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskerConfig {
    pub defaults: TaskDefaults,
    pub logging: LoggingConfig,
}

impl TaskerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

/// Values applied to tasks that do not set their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    pub max_retries: u32,
    /// How long a worker may hold a claimed task before it counts as stale.
    pub lease_secs: u64,
}

impl TaskDefaults {
    pub fn lease(&self) -> TimeDelta {
        i64::try_from(self.lease_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            lease_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
