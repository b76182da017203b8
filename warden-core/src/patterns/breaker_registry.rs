//! Named circuit breakers created on demand
//!
//! Every breaker handed out by the registry reports its state transitions
//! back, and the registry writes a snapshot of all breakers to persistence
//! on each transition.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerMetrics, CircuitBreakerState, CircuitState,
};
use crate::abstractions::{Clock, SystemClock};
use crate::classifier::ErrorClassifier;
use crate::config::CircuitBreakerConfig;
use crate::storage::snapshot::{SnapshotStore, CIRCUIT_BREAKERS};

struct RegistryInner {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    classifier: Option<Arc<ErrorClassifier>>,
    snapshots: SnapshotStore,
    /// Persisted states waiting for their breaker to be created
    pending_restore: Mutex<HashMap<String, CircuitBreakerState>>,
}

impl RegistryInner {
    fn persist(&self) {
        if !self.snapshots.is_persistent() {
            return;
        }
        let mut states: Vec<CircuitBreakerState> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        self.snapshots.save_document(CIRCUIT_BREAKERS, &states);
    }
}

/// Manager for per-dependency circuit breakers
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RegistryInner>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_parts(
            default_config,
            HashMap::new(),
            SystemClock::shared(),
            None,
            SnapshotStore::in_memory(),
        )
    }

    pub fn with_parts(
        default_config: CircuitBreakerConfig,
        overrides: HashMap<String, CircuitBreakerConfig>,
        clock: Arc<dyn Clock>,
        classifier: Option<Arc<ErrorClassifier>>,
        snapshots: SnapshotStore,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                breakers: DashMap::new(),
                default_config,
                overrides,
                clock,
                classifier,
                snapshots,
                pending_restore: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Breaker for `name`, created with the default or per-name config
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let config = self
            .inner
            .overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.inner.default_config.clone());
        self.get_or_create_with(name, config)
    }

    /// Breaker for `name`, created with an explicit config. An existing
    /// breaker keeps its original config.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.inner.breakers.get(name) {
            return existing.value().clone();
        }

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let mut builder = CircuitBreakerBuilder::new(name)
            .config(config)
            .clock(self.inner.clock.clone())
            .on_transition(Arc::new(move |breaker: &str, state: CircuitState| {
                debug!(breaker, %state, "Persisting breaker snapshot after transition");
                if let Some(inner) = weak.upgrade() {
                    inner.persist();
                }
            }));
        if let Some(classifier) = &self.inner.classifier {
            builder = builder.classifier(classifier.clone());
        }
        let breaker = builder.build();

        if let Some(saved) = self.inner.pending_restore.lock().remove(name) {
            breaker.restore(&saved);
            info!(breaker = name, state = %saved.state, "Restored circuit breaker state");
        }

        self.inner
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(breaker))
            .value()
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.inner.breakers.get(name).map(|b| b.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.breakers.iter().map(|b| b.key().clone()).collect();
        names.sort();
        names
    }

    /// Metrics for every breaker, sorted by name
    pub fn metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut metrics: Vec<CircuitBreakerMetrics> =
            self.inner.breakers.iter().map(|b| b.value().metrics()).collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> = self.inner.breakers.iter().map(|b| b.value().clone()).collect();
        for breaker in breakers {
            breaker.reset();
        }
        info!(count = self.inner.breakers.len(), "Reset all circuit breakers");
    }

    /// Write every breaker's state now
    pub fn persist(&self) {
        self.inner.persist();
    }

    /// Load persisted states. Existing breakers are updated immediately,
    /// others pick their state up when first created.
    pub fn restore(&self) -> usize {
        let Some(states) = self
            .inner
            .snapshots
            .load_document::<Vec<CircuitBreakerState>>(CIRCUIT_BREAKERS)
        else {
            return 0;
        };
        let count = states.len();
        let mut pending = self.inner.pending_restore.lock();
        for state in states {
            match self.get(&state.name) {
                Some(breaker) => breaker.restore(&state),
                None => {
                    pending.insert(state.name.clone(), state);
                }
            }
        }
        count
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::{MemoryStore, MockClock, PersistencePort};
    use crate::classifier::RawError;

    fn registry(port: Arc<MemoryStore>, clock: MockClock) -> CircuitBreakerRegistry {
        let mut overrides = HashMap::new();
        overrides.insert(
            "rpc".to_string(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                operation_timeout: None,
                ..Default::default()
            },
        );
        CircuitBreakerRegistry::with_parts(
            CircuitBreakerConfig::default(),
            overrides,
            Arc::new(clock),
            None,
            SnapshotStore::new(Some(port), "test"),
        )
    }

    #[tokio::test]
    async fn test_same_name_returns_same_breaker() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get_or_create("ipfs");
        let b = registry.get_or_create("ipfs");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.names(), vec!["ipfs".to_string()]);
    }

    #[tokio::test]
    async fn test_transition_is_persisted_and_restored() {
        let port = Arc::new(MemoryStore::new());
        let clock = MockClock::new();
        let first = registry(port.clone(), clock.clone());

        let rpc = first.get_or_create("rpc");
        assert_eq!(rpc.config().failure_threshold, 1);
        let _ = rpc
            .execute(|| async { Err::<(), _>(RawError::new("Failed to fetch")) })
            .await;
        assert_eq!(rpc.state(), CircuitState::Open);
        assert!(port.get("test:circuit_breakers").unwrap().is_some());

        let second = registry(port, clock);
        assert_eq!(second.restore(), 1);
        assert_eq!(second.get_or_create("rpc").state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_all() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        registry.get_or_create("a").force_open();
        registry.get_or_create("b").force_open();
        registry.reset_all();
        assert!(registry
            .metrics()
            .iter()
            .all(|m| m.state == CircuitState::Closed));
    }
}
