//! Error classifier configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs_from_env, parse_env};
use crate::error::{WardenError, WardenResult};

/// Error classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Capacity of the in-memory report log
    pub max_reports: usize,

    /// Reports older than this are pruned
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// How many reports are written to persistence
    pub persisted_reports: usize,

    /// Emit a notification for every handled error (callers may still suppress)
    pub show_notifications: bool,

    /// Bound on a single recovery probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_reports: DEFAULT_MAX_ERROR_REPORTS,
            max_age: duration_secs(DEFAULT_ERROR_REPORT_MAX_AGE_SECS),
            persisted_reports: DEFAULT_PERSISTED_ERROR_REPORTS,
            show_notifications: true,
            probe_timeout: duration_secs(DEFAULT_RECOVERY_PROBE_TIMEOUT_SECS),
        }
    }
}

impl ClassifierConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_env("WARDEN_MAX_ERROR_REPORTS")? {
            config.max_reports = v;
        }
        config.max_age = parse_duration_secs_from_env("WARDEN_ERROR_REPORT_MAX_AGE_SECS", config.max_age);
        if let Some(v) = parse_env("WARDEN_SHOW_NOTIFICATIONS")? {
            config.show_notifications = v;
        }
        config.probe_timeout =
            parse_duration_secs_from_env("WARDEN_RECOVERY_PROBE_TIMEOUT_SECS", config.probe_timeout);

        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.max_reports == 0 {
            return Err(WardenError::configuration(
                "classifier.max_reports",
                "must be greater than 0",
            ));
        }
        if self.persisted_reports > self.max_reports {
            return Err(WardenError::configuration(
                "classifier.persisted_reports",
                "cannot exceed max_reports",
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(WardenError::configuration(
                "classifier.probe_timeout",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}
