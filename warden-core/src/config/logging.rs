//! Logging configuration

use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::error::{WardenError, WardenResult};

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for the warden crates when `RUST_LOG` is unset
    pub level: String,

    /// Colored output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("WARDEN_LOG_LEVEL") {
            config.level = level.to_lowercase();
        }
        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(WardenError::configuration(
                "logging.level",
                format!("must be one of {}", LEVELS.join(", ")),
            ));
        }
        Ok(())
    }

    /// Directive for an `EnvFilter`, e.g. `warden_core=info`
    pub fn directives(&self) -> Vec<String> {
        ["warden", "warden_core"]
            .iter()
            .map(|krate| format!("{}={}", krate, self.level))
            .collect()
    }
}
