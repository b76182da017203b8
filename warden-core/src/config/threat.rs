//! Threat detector configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs_from_env, parse_env};
use crate::error::{WardenError, WardenResult};

/// Rate limits and abuse heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatConfig {
    pub max_requests_per_second: u32,
    pub max_requests_per_minute: u32,
    pub max_requests_per_hour: u32,

    /// Length of the temporary block raised by a critical score
    #[serde(with = "humantime_serde")]
    pub block_duration: Duration,

    /// Actions that bypass every check
    pub whitelisted_actions: Vec<String>,

    /// Request metrics older than this are pruned
    #[serde(with = "humantime_serde")]
    pub metric_retention: Duration,

    /// Hard cap on the request metric log
    pub max_metrics: usize,

    /// Identical requests within a minute that saturate the repetition signal
    pub repetition_threshold: u32,

    /// Distinct endpoints within a minute that saturate the scan signal
    pub scan_threshold: u32,

    /// Average latency that saturates the latency signal
    #[serde(with = "humantime_serde")]
    pub slow_response: Duration,

    #[serde(with = "humantime_serde")]
    pub expiry_check_interval: Duration,

    pub security_event_capacity: usize,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: DEFAULT_MAX_REQUESTS_PER_SECOND,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            max_requests_per_hour: DEFAULT_MAX_REQUESTS_PER_HOUR,
            block_duration: duration_secs(DEFAULT_BLOCK_DURATION_SECS),
            whitelisted_actions: DEFAULT_WHITELISTED_ACTIONS.iter().map(|s| s.to_string()).collect(),
            metric_retention: duration_secs(DEFAULT_METRIC_RETENTION_SECS),
            max_metrics: DEFAULT_MAX_REQUEST_METRICS,
            repetition_threshold: DEFAULT_REPETITION_THRESHOLD,
            scan_threshold: DEFAULT_SCAN_THRESHOLD,
            slow_response: duration_millis(DEFAULT_SLOW_RESPONSE_MS),
            expiry_check_interval: duration_secs(DEFAULT_BLOCK_EXPIRY_CHECK_SECS),
            security_event_capacity: DEFAULT_SECURITY_EVENT_CAPACITY,
        }
    }
}

impl ThreatConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_env("WARDEN_MAX_REQUESTS_PER_SECOND")? {
            config.max_requests_per_second = v;
        }
        if let Some(v) = parse_env("WARDEN_MAX_REQUESTS_PER_MINUTE")? {
            config.max_requests_per_minute = v;
        }
        if let Some(v) = parse_env("WARDEN_MAX_REQUESTS_PER_HOUR")? {
            config.max_requests_per_hour = v;
        }
        config.block_duration = parse_duration_secs_from_env("WARDEN_BLOCK_DURATION_SECS", config.block_duration);
        if let Ok(list) = std::env::var("WARDEN_WHITELISTED_ACTIONS") {
            config.whitelisted_actions = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.max_requests_per_second == 0 {
            return Err(WardenError::configuration(
                "threat.max_requests_per_second",
                "must be greater than 0",
            ));
        }
        if self.max_requests_per_minute < self.max_requests_per_second {
            return Err(WardenError::configuration(
                "threat.max_requests_per_minute",
                "must be at least max_requests_per_second",
            ));
        }
        if self.max_requests_per_hour < self.max_requests_per_minute {
            return Err(WardenError::configuration(
                "threat.max_requests_per_hour",
                "must be at least max_requests_per_minute",
            ));
        }
        if self.metric_retention < Duration::from_secs(3600) {
            return Err(WardenError::configuration(
                "threat.metric_retention",
                "must cover the hourly window",
            ));
        }
        if self.repetition_threshold == 0 || self.scan_threshold == 0 {
            return Err(WardenError::configuration(
                "threat.repetition_threshold",
                "heuristic thresholds must be greater than 0",
            ));
        }
        Ok(())
    }
}
