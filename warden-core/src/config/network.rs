//! Network monitor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs_from_env, parse_env};
use crate::error::{WardenError, WardenResult};

/// Connectivity probing, offline queue and recovery ladder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Endpoints probed concurrently on every check
    pub endpoints: Vec<String>,

    /// Interval between periodic quality checks
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Bound on a single endpoint probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Minimum gap between two runs of the same recovery strategy
    #[serde(with = "humantime_serde")]
    pub strategy_cooldown: Duration,

    /// Consecutive poor checks before the recovery ladder runs
    pub poor_checks_before_recovery: u32,

    /// Offline queue capacity
    pub max_queue_size: usize,

    /// How often one queued request may be put back after failing again
    pub max_requeues: u32,

    /// Whether a full reload is allowed as the last recovery step
    pub allow_reload: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_PROBE_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            check_interval: duration_secs(DEFAULT_NETWORK_CHECK_INTERVAL_SECS),
            probe_timeout: duration_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            strategy_cooldown: duration_secs(DEFAULT_STRATEGY_COOLDOWN_SECS),
            poor_checks_before_recovery: DEFAULT_POOR_CHECKS_BEFORE_RECOVERY,
            max_queue_size: DEFAULT_OFFLINE_QUEUE_SIZE,
            max_requeues: DEFAULT_MAX_REQUEUES,
            allow_reload: true,
        }
    }
}

impl NetworkConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();

        if let Ok(list) = std::env::var("WARDEN_PROBE_ENDPOINTS") {
            config.endpoints = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.check_interval =
            parse_duration_secs_from_env("WARDEN_NETWORK_CHECK_INTERVAL_SECS", config.check_interval);
        config.probe_timeout = parse_duration_secs_from_env("WARDEN_PROBE_TIMEOUT_SECS", config.probe_timeout);
        if let Some(v) = parse_env("WARDEN_OFFLINE_QUEUE_SIZE")? {
            config.max_queue_size = v;
        }
        if let Some(v) = parse_env("WARDEN_MAX_REQUEUES")? {
            config.max_requeues = v;
        }
        if let Some(v) = parse_env("WARDEN_ALLOW_RELOAD")? {
            config.allow_reload = v;
        }

        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.endpoints.is_empty() {
            return Err(WardenError::configuration(
                "network.endpoints",
                "at least one probe endpoint is required",
            ));
        }
        for endpoint in &self.endpoints {
            let url = url::Url::parse(endpoint).map_err(|e| {
                WardenError::configuration("network.endpoints", format!("invalid URL '{}': {}", endpoint, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(WardenError::configuration(
                    "network.endpoints",
                    format!("unsupported scheme for '{}'", endpoint),
                ));
            }
        }
        if self.probe_timeout.is_zero() || self.check_interval.is_zero() {
            return Err(WardenError::configuration(
                "network.probe_timeout",
                "probe_timeout and check_interval must be non-zero",
            ));
        }
        if self.max_queue_size == 0 {
            return Err(WardenError::configuration(
                "network.max_queue_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
