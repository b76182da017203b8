//! Circuit breaker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs_from_env, parse_env};
use crate::error::{WardenError, WardenResult};

/// Thresholds for one circuit breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that open the circuit
    pub failure_threshold: u32,

    /// How long the circuit stays open before probing
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Successes in half-open needed to close
    pub success_threshold: u32,

    /// Probe calls admitted while half-open
    pub half_open_max_calls: u32,

    /// Per-call deadline, `None` to disable
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: duration_secs(DEFAULT_RECOVERY_TIMEOUT_SECS),
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
            operation_timeout: Some(duration_secs(DEFAULT_OPERATION_TIMEOUT_SECS)),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_env("WARDEN_CB_FAILURE_THRESHOLD")? {
            config.failure_threshold = v;
        }
        config.recovery_timeout =
            parse_duration_secs_from_env("WARDEN_CB_RECOVERY_TIMEOUT_SECS", config.recovery_timeout);
        if let Some(v) = parse_env("WARDEN_CB_SUCCESS_THRESHOLD")? {
            config.success_threshold = v;
        }
        if let Some(v) = parse_env("WARDEN_CB_HALF_OPEN_MAX_CALLS")? {
            config.half_open_max_calls = v;
        }
        if let Some(secs) = parse_env::<u64>("WARDEN_CB_OPERATION_TIMEOUT_SECS")? {
            config.operation_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.failure_threshold == 0 {
            return Err(WardenError::configuration(
                "circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.success_threshold == 0 {
            return Err(WardenError::configuration(
                "circuit_breaker.success_threshold",
                "must be greater than 0",
            ));
        }
        if self.half_open_max_calls < self.success_threshold {
            return Err(WardenError::configuration(
                "circuit_breaker.half_open_max_calls",
                "must be at least success_threshold or the circuit can never close",
            ));
        }
        Ok(())
    }
}
