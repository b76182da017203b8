//! Transaction retry configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs_from_env, parse_env};
use crate::error::{WardenError, WardenResult};

/// Per-transaction retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionRetryConfig {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Per-attempt fee multiplier, compounded
    pub gas_multiplier: f64,
    /// Ceiling for the compounded fee multiplier
    pub max_gas_multiplier: f64,
    /// Deadline for a single submission
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for TransactionRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_TX_MAX_RETRIES,
            base_delay: duration_millis(DEFAULT_TX_BASE_DELAY_MS),
            max_delay: duration_secs(DEFAULT_TX_MAX_DELAY_SECS),
            backoff_multiplier: DEFAULT_TX_BACKOFF_MULTIPLIER,
            gas_multiplier: DEFAULT_GAS_MULTIPLIER,
            max_gas_multiplier: DEFAULT_MAX_GAS_MULTIPLIER,
            timeout: duration_secs(DEFAULT_TX_TIMEOUT_SECS),
        }
    }
}

impl TransactionRetryConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.backoff_multiplier < 1.0 {
            return Err(WardenError::configuration(
                "transaction_retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.gas_multiplier < 1.0 {
            return Err(WardenError::configuration(
                "transaction_retry.gas_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.max_gas_multiplier < self.gas_multiplier {
            return Err(WardenError::configuration(
                "transaction_retry.max_gas_multiplier",
                "must be at least gas_multiplier",
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(WardenError::configuration(
                "transaction_retry.max_delay",
                "must be at least base_delay",
            ));
        }
        if self.timeout.is_zero() {
            return Err(WardenError::configuration(
                "transaction_retry.timeout",
                "must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Engine-wide settings plus the default per-transaction policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryEngineConfig {
    pub defaults: TransactionRetryConfig,

    /// Retry states kept in memory
    pub max_tracked_states: usize,

    /// Retry states written to persistence
    pub persisted_states: usize,

    /// Completed states older than this are dropped by `cleanup_completed`
    #[serde(with = "humantime_serde")]
    pub completed_retention: Duration,
}

impl Default for RetryEngineConfig {
    fn default() -> Self {
        Self {
            defaults: TransactionRetryConfig::default(),
            max_tracked_states: DEFAULT_MAX_TRACKED_RETRIES,
            persisted_states: DEFAULT_PERSISTED_RETRY_STATES,
            completed_retention: duration_secs(DEFAULT_COMPLETED_RETRY_RETENTION_SECS),
        }
    }
}

impl RetryEngineConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parse_env("WARDEN_TX_MAX_RETRIES")? {
            config.defaults.max_retries = v;
        }
        if let Some(ms) = parse_env::<u64>("WARDEN_TX_BASE_DELAY_MS")? {
            config.defaults.base_delay = Duration::from_millis(ms);
        }
        config.defaults.max_delay =
            parse_duration_secs_from_env("WARDEN_TX_MAX_DELAY_SECS", config.defaults.max_delay);
        if let Some(v) = parse_env("WARDEN_TX_GAS_MULTIPLIER")? {
            config.defaults.gas_multiplier = v;
        }
        if let Some(v) = parse_env("WARDEN_TX_MAX_GAS_MULTIPLIER")? {
            config.defaults.max_gas_multiplier = v;
        }
        config.defaults.timeout = parse_duration_secs_from_env("WARDEN_TX_TIMEOUT_SECS", config.defaults.timeout);

        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        self.defaults.validate()?;
        if self.max_tracked_states == 0 {
            return Err(WardenError::configuration(
                "transaction_retry.max_tracked_states",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
