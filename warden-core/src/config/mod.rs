//! Configuration module for Warden
//!
//! One section per component, sensible defaults from [`defaults`],
//! environment variable overrides (`WARDEN_*`), TOML files, and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WardenError, WardenResult};

pub mod analytics;
pub mod circuit_breaker;
pub mod classifier;
pub mod defaults;
pub mod logging;
pub mod network;
pub mod storage;
pub mod threat;
pub mod transaction_retry;

pub use analytics::AnalyticsConfig;
pub use circuit_breaker::CircuitBreakerConfig;
pub use classifier::ClassifierConfig;
pub use defaults::*;
pub use logging::LoggingConfig;
pub use network::NetworkConfig;
pub use storage::StorageConfig;
pub use threat::ThreatConfig;
pub use transaction_retry::{RetryEngineConfig, TransactionRetryConfig};

/// Root configuration structure for Warden
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub classifier: ClassifierConfig,

    /// Default thresholds for every circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,

    /// Per-dependency overrides, keyed by breaker name
    pub circuit_breakers: HashMap<String, CircuitBreakerConfig>,

    pub transaction_retry: RetryEngineConfig,

    pub network: NetworkConfig,

    pub threat: ThreatConfig,

    pub analytics: AnalyticsConfig,

    pub storage: StorageConfig,

    pub logging: LoggingConfig,
}

impl WardenConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    pub fn from_env() -> WardenResult<Self> {
        let config = Self {
            classifier: ClassifierConfig::from_env()?,
            circuit_breaker: CircuitBreakerConfig::from_env()?,
            circuit_breakers: HashMap::new(),
            transaction_retry: RetryEngineConfig::from_env()?,
            network: NetworkConfig::from_env()?,
            threat: ThreatConfig::from_env()?,
            analytics: AnalyticsConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file. Missing sections take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::configuration("file", format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> WardenResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> WardenResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> WardenResult<()> {
        self.classifier.validate()?;
        self.circuit_breaker.validate()?;
        for (name, breaker) in &self.circuit_breakers {
            breaker.validate().map_err(|e| match e {
                WardenError::ConfigurationError { component, message } => WardenError::configuration(
                    component.replacen("circuit_breaker", &format!("circuit_breakers.{}", name), 1),
                    message,
                ),
                other => other,
            })?;
        }
        self.transaction_retry.validate()?;
        self.network.validate()?;
        self.threat.validate()?;
        self.analytics.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Thresholds for a named breaker, falling back to the defaults
    pub fn breaker_config(&self, name: &str) -> CircuitBreakerConfig {
        self.circuit_breakers
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }

    /// Configuration suited for tests: fast timers, no persistence
    pub fn test() -> Self {
        let mut config = Self::default();
        config.classifier.probe_timeout = Duration::from_millis(200);
        config.network.probe_timeout = Duration::from_millis(200);
        config.network.check_interval = Duration::from_secs(1);
        config.transaction_retry.defaults.base_delay = Duration::from_millis(10);
        config.transaction_retry.defaults.max_delay = Duration::from_millis(100);
        config.storage.path = None;
        config
    }
}

/// Builder for WardenConfig
pub struct WardenConfigBuilder {
    config: WardenConfig,
}

impl WardenConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WardenConfig::default(),
        }
    }

    pub fn classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.config.classifier = classifier;
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = breaker;
        self
    }

    pub fn breaker_override(mut self, name: impl Into<String>, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breakers.insert(name.into(), breaker);
        self
    }

    pub fn transaction_retry(mut self, retry: RetryEngineConfig) -> Self {
        self.config.transaction_retry = retry;
        self
    }

    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.config.network = network;
        self
    }

    pub fn threat(mut self, threat: ThreatConfig) -> Self {
        self.config.threat = threat;
        self
    }

    pub fn analytics(mut self, analytics: AnalyticsConfig) -> Self {
        self.config.analytics = analytics;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn build(self) -> WardenResult<WardenConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for WardenConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an optional environment variable, failing on malformed values
pub(crate) fn parse_env<T: FromStr>(key: &str) -> WardenResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| WardenError::configuration(key, format!("invalid value '{}'", raw))),
        Err(_) => Ok(None),
    }
}

pub(crate) fn parse_duration_secs_from_env(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn test_default_config_validation() {
        assert!(WardenConfig::default().validate().is_ok());
        assert!(WardenConfig::test().validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = WardenConfigBuilder::new()
            .breaker_override(
                "rpc",
                CircuitBreakerConfig {
                    failure_threshold: 3,
                    ..Default::default()
                },
            )
            .build()
            .unwrap();

        assert_eq!(config.breaker_config("rpc").failure_threshold, 3);
        assert_eq!(
            config.breaker_config("ipfs").failure_threshold,
            DEFAULT_FAILURE_THRESHOLD
        );
    }

    #[test]
    fn test_invalid_config() {
        let mut config = WardenConfig::default();
        config.threat.max_requests_per_second = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.network.endpoints = vec!["ftp://example.com".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_override_names_the_breaker() {
        let mut config = WardenConfig::default();
        config.circuit_breakers.insert(
            "rpc".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 0,
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("circuit_breakers.rpc"));
    }

    #[test]
    fn test_toml_roundtrip_with_partial_sections() {
        let config = WardenConfig::from_toml(
            r#"
            [circuit_breaker]
            failure_threshold = 3
            recovery_timeout = "10s"

            [threat]
            block_duration = "2m"
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(10));
        assert_eq!(config.threat.block_duration, Duration::from_secs(120));
        assert_eq!(config.analytics, AnalyticsConfig::default());

        let rendered = config.to_toml().unwrap();
        assert_eq!(WardenConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("WARDEN_MAX_REQUESTS_PER_SECOND", "25");
        std::env::set_var("WARDEN_CB_FAILURE_THRESHOLD", "7");
        let config = WardenConfig::from_env();
        std::env::remove_var("WARDEN_MAX_REQUESTS_PER_SECOND");
        std::env::remove_var("WARDEN_CB_FAILURE_THRESHOLD");

        let config = config.unwrap();
        assert_eq!(config.threat.max_requests_per_second, 25);
        assert_eq!(config.circuit_breaker.failure_threshold, 7);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        std::env::set_var("WARDEN_MAX_REQUEUES", "lots");
        let result = WardenConfig::from_env();
        std::env::remove_var("WARDEN_MAX_REQUEUES");
        assert!(matches!(result, Err(WardenError::ConfigurationError { .. })));
    }
}
