//! Error analytics configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::parse_duration_secs_from_env;
use crate::error::{WardenError, WardenResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Interval between background analysis passes
    #[serde(with = "humantime_serde")]
    pub analysis_interval: Duration,

    /// Window for spike, new-pattern and correlation detection
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    pub max_patterns: usize,
    pub max_trends: usize,
    pub max_insights: usize,

    /// Per-minute peak over trailing average that counts as a spike
    pub spike_multiplier: f64,
    pub spike_min_errors: usize,

    pub new_pattern_min_frequency: u64,

    pub correlation_min_types: usize,
    pub correlation_min_errors: usize,

    /// Hourly rate over rolling daily average that counts as degradation
    pub degradation_multiplier: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            analysis_interval: duration_secs(DEFAULT_ANALYSIS_INTERVAL_SECS),
            window: duration_secs(DEFAULT_ANALYSIS_WINDOW_SECS),
            max_patterns: DEFAULT_MAX_PATTERNS,
            max_trends: DEFAULT_MAX_TRENDS,
            max_insights: DEFAULT_MAX_INSIGHTS,
            spike_multiplier: DEFAULT_SPIKE_MULTIPLIER,
            spike_min_errors: DEFAULT_SPIKE_MIN_ERRORS,
            new_pattern_min_frequency: DEFAULT_NEW_PATTERN_MIN_FREQUENCY,
            correlation_min_types: DEFAULT_CORRELATION_MIN_TYPES,
            correlation_min_errors: DEFAULT_CORRELATION_MIN_ERRORS,
            degradation_multiplier: DEFAULT_DEGRADATION_MULTIPLIER,
        }
    }
}

impl AnalyticsConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();
        config.analysis_interval =
            parse_duration_secs_from_env("WARDEN_ANALYSIS_INTERVAL_SECS", config.analysis_interval);
        config.window = parse_duration_secs_from_env("WARDEN_ANALYSIS_WINDOW_SECS", config.window);
        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.window < Duration::from_secs(60) {
            return Err(WardenError::configuration(
                "analytics.window",
                "must be at least one minute",
            ));
        }
        if self.spike_multiplier <= 1.0 || self.degradation_multiplier <= 1.0 {
            return Err(WardenError::configuration(
                "analytics.spike_multiplier",
                "multipliers must be greater than 1.0",
            ));
        }
        if self.max_patterns == 0 || self.max_trends < 2 || self.max_insights == 0 {
            return Err(WardenError::configuration(
                "analytics.max_trends",
                "stores must hold at least one pattern, one insight and two trend buckets",
            ));
        }
        Ok(())
    }
}
