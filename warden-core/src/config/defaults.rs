//! Default configuration values for Warden
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Classifier defaults
pub const DEFAULT_MAX_ERROR_REPORTS: usize = 100;
pub const DEFAULT_ERROR_REPORT_MAX_AGE_SECS: u64 = 24 * 3600;
pub const DEFAULT_PERSISTED_ERROR_REPORTS: usize = 50;
pub const DEFAULT_RECOVERY_PROBE_TIMEOUT_SECS: u64 = 10;

// Circuit breaker defaults
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RECOVERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 3;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

// Transaction retry defaults
pub const DEFAULT_TX_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TX_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_TX_MAX_DELAY_SECS: u64 = 30;
pub const DEFAULT_TX_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_GAS_MULTIPLIER: f64 = 1.1;
pub const DEFAULT_MAX_GAS_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_TX_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_TRACKED_RETRIES: usize = 50;
pub const DEFAULT_PERSISTED_RETRY_STATES: usize = 20;
pub const DEFAULT_COMPLETED_RETRY_RETENTION_SECS: u64 = 3600;

// Network monitor defaults
pub const DEFAULT_PROBE_ENDPOINTS: &[&str] = &[
    "https://www.cloudflare.com/cdn-cgi/trace",
    "https://www.google.com/generate_204",
    "https://httpbin.org/status/204",
];
pub const DEFAULT_NETWORK_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_STRATEGY_COOLDOWN_SECS: u64 = 30;
pub const DEFAULT_POOR_CHECKS_BEFORE_RECOVERY: u32 = 3;
pub const DEFAULT_OFFLINE_QUEUE_SIZE: usize = 100;
pub const DEFAULT_MAX_REQUEUES: u32 = 3;

// Threat detector defaults
pub const DEFAULT_MAX_REQUESTS_PER_SECOND: u32 = 10;
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 100;
pub const DEFAULT_MAX_REQUESTS_PER_HOUR: u32 = 1000;
pub const DEFAULT_BLOCK_DURATION_SECS: u64 = 300;
pub const DEFAULT_WHITELISTED_ACTIONS: &[&str] = &["health_check", "page_view", "static_asset"];
pub const DEFAULT_METRIC_RETENTION_SECS: u64 = 3600;
pub const DEFAULT_MAX_REQUEST_METRICS: usize = 10_000;
pub const DEFAULT_REPETITION_THRESHOLD: u32 = 20;
pub const DEFAULT_SCAN_THRESHOLD: u32 = 15;
pub const DEFAULT_SLOW_RESPONSE_MS: u64 = 5000;
pub const DEFAULT_BLOCK_EXPIRY_CHECK_SECS: u64 = 10;
pub const DEFAULT_SECURITY_EVENT_CAPACITY: usize = 100;

// Analytics defaults
pub const DEFAULT_ANALYSIS_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_ANALYSIS_WINDOW_SECS: u64 = 3600;
pub const DEFAULT_MAX_PATTERNS: usize = 500;
pub const DEFAULT_MAX_TRENDS: usize = 168; // one week of hourly buckets
pub const DEFAULT_MAX_INSIGHTS: usize = 50;
pub const DEFAULT_SPIKE_MULTIPLIER: f64 = 3.0;
pub const DEFAULT_SPIKE_MIN_ERRORS: usize = 10;
pub const DEFAULT_NEW_PATTERN_MIN_FREQUENCY: u64 = 3;
pub const DEFAULT_CORRELATION_MIN_TYPES: usize = 3;
pub const DEFAULT_CORRELATION_MIN_ERRORS: usize = 5;
pub const DEFAULT_DEGRADATION_MULTIPLIER: f64 = 2.0;

// Storage defaults
pub const DEFAULT_STORAGE_NAMESPACE: &str = "warden";

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Helper function to create Duration from seconds
pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Helper function to create Duration from milliseconds
pub const fn duration_millis(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
