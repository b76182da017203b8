//! Circuit Breaker Pattern for Fault Tolerance
//!
//! The circuit breaker stops calling a dependency that keeps failing, giving
//! it time to recover instead of piling more load onto it.
//!
//! ## States
//!
//! - **Closed**: normal operation, counted failures accumulate
//! - **Open**: failing fast until the recovery timeout elapses
//! - **Half-Open**: a bounded number of probe calls decide between
//!   closing again and reopening
//!
//! Failures are classified through the [`ErrorClassifier`] and an error
//! predicate decides which of them count towards opening the circuit. By
//! default every failure counts except validation and wallet errors, which
//! say nothing about the health of the dependency.
//!
//! ## Usage Example
//!
//! ```rust
//! use std::time::Duration;
//! use warden_core::classifier::RawError;
//! use warden_core::patterns::CircuitBreakerBuilder;
//!
//! # async fn example() -> warden_core::error::WardenResult<()> {
//! let breaker = CircuitBreakerBuilder::new("rpc")
//!     .failure_threshold(3)
//!     .recovery_timeout(Duration::from_secs(30))
//!     .build();
//!
//! let block: u64 = breaker
//!     .execute(|| async { Ok::<_, RawError>(42) })
//!     .await?;
//! assert_eq!(block, 42);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::abstractions::{elapsed_between, to_chrono, Clock, PersistencePort, SystemClock};
use crate::classifier::{rules, ErrorClassifier, ErrorContext, ErrorReport, ErrorType, RawError};
use crate::config::CircuitBreakerConfig;
use crate::error::{WardenError, WardenResult};
use crate::network_monitor::{NetworkRecoveryMonitor, OperationFactory};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests pass through
    Closed,
    /// Failing fast - requests are rejected immediately
    Open,
    /// Testing if the dependency has recovered - limited requests allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Persistable snapshot of one breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub half_open_call_count: u32,
}

/// Point-in-time view for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejections: u64,
    /// Successes over completed calls, 1.0 before the first call
    pub success_rate: f64,
    /// Time spent closed since the last transition into Closed, zero otherwise
    #[serde(with = "humantime_serde")]
    pub uptime: Duration,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
}

/// Decides whether a classified failure counts towards opening the circuit
pub type ErrorPredicate = fn(&ErrorReport) -> bool;

/// Every failure counts except validation and wallet errors
pub fn default_error_predicate(report: &ErrorReport) -> bool {
    !matches!(report.error_type, ErrorType::Validation | ErrorType::Wallet)
}

type TransitionHook = Arc<dyn Fn(&str, CircuitState) + Send + Sync>;

/// Internal state for circuit breaker
struct BreakerCore {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
}

impl BreakerCore {
    fn enter(&mut self, state: CircuitState, now: DateTime<Utc>) {
        self.state = state;
        self.last_state_change = now;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_calls = 0;
    }
}

/// Why a call was not admitted
struct Rejection {
    retry_after: Duration,
    transition: Option<CircuitState>,
}

/// Fallback strategy used by [`CircuitBreaker::execute_with_fallback`]
pub enum Fallback<T> {
    /// Return a fixed value
    StaticDefault(T),
    /// Read a cached value, `None` when the cache has nothing
    Cache(Arc<dyn Fn() -> Option<T> + Send + Sync>),
    /// Call an alternate implementation
    Alternate(OperationFactory<T>),
    /// Defer the operation to the offline queue and wait for it to run
    Enqueue {
        monitor: Arc<NetworkRecoveryMonitor>,
        operation: OperationFactory<T>,
    },
}

impl<T: DeserializeOwned + 'static> Fallback<T> {
    /// Cache fallback reading a JSON document from a persistence port
    pub fn cached(port: Arc<dyn PersistencePort>, key: impl Into<String>) -> Self {
        let key = key.into();
        Fallback::Cache(Arc::new(move || match port.get(&key) {
            Ok(Some(json)) => serde_json::from_str(&json).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(key = %key, error = %e, "Cache fallback read failed");
                None
            }
        }))
    }
}

impl<T: 'static> Fallback<T> {
    pub fn alternate<F, Fut>(operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RawError>> + Send + 'static,
    {
        Fallback::Alternate(Arc::new(move || -> BoxFuture<'static, Result<T, RawError>> {
            Box::pin(operation())
        }))
    }

    fn kind(&self) -> &'static str {
        match self {
            Fallback::StaticDefault(_) => "static_default",
            Fallback::Cache(_) => "cache",
            Fallback::Alternate(_) => "alternate",
            Fallback::Enqueue { .. } => "enqueue",
        }
    }
}

/// Circuit breaker guarding one dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    classifier: Option<Arc<ErrorClassifier>>,
    predicate: ErrorPredicate,
    on_transition: Option<TransitionHook>,
    core: Mutex<BreakerCore>,

    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        CircuitBreakerBuilder::new(name).config(config).build()
    }

    /// Execute an operation through the circuit breaker
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> WardenResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
    {
        match self.admit() {
            Ok(Some(state)) => {
                info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
                self.notify_transition(state);
            }
            Ok(None) => {}
            Err(rejection) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                if let Some(state) = rejection.transition {
                    warn!(breaker = %self.name, "Half-open probe quota exhausted, reopening");
                    self.notify_transition(state);
                }
                debug!(breaker = %self.name, retry_after = ?rejection.retry_after, "Rejected call");
                return Err(WardenError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after: rejection.retry_after,
                });
            }
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.config.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(RawError::new(format!(
                    "Operation '{}' timed out after {:?}",
                    self.name, limit
                ))
                .with_code("TIMEOUT")),
            },
            None => operation().await.map_err(Into::into),
        };

        match outcome {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(raw) => {
                let report = self.classify(&raw);
                self.on_failure((self.predicate)(&report));
                Err(WardenError::operation(report, raw))
            }
        }
    }

    /// Execute with a fallback that runs on any failure, including fail-fast
    /// rejection. If the fallback fails too, the original error is returned.
    pub async fn execute_with_fallback<F, Fut, T, E>(&self, operation: F, fallback: Fallback<T>) -> WardenResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
        T: Send + 'static,
    {
        let original = match self.execute(operation).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let kind = fallback.kind();
        let recovered = match fallback {
            Fallback::StaticDefault(value) => Some(value),
            Fallback::Cache(read) => read(),
            Fallback::Alternate(operation) => operation().await.ok(),
            Fallback::Enqueue { monitor, operation } => monitor.queue_request(operation).await.ok(),
        };

        match recovered {
            Some(value) => {
                info!(breaker = %self.name, fallback = kind, error = %original, "Served fallback");
                Ok(value)
            }
            None => {
                warn!(breaker = %self.name, fallback = kind, "Fallback failed, surfacing original error");
                Err(original)
            }
        }
    }

    fn classify(&self, raw: &RawError) -> ErrorReport {
        let context = ErrorContext::new().component(format!("circuit_breaker:{}", self.name));
        match &self.classifier {
            Some(classifier) => classifier.handle_error(raw.clone(), context, false),
            None => rules::build_report(raw, &context, self.clock.now()),
        }
    }

    /// Check if a request should be allowed based on current state.
    /// Returns the transition the admission caused, if any.
    fn admit(&self) -> Result<Option<CircuitState>, Rejection> {
        let now = self.clock.now();
        let mut core = self.core.lock();

        match core.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                if let Some(next) = core.next_attempt_time.filter(|next| now < *next) {
                    return Err(Rejection {
                        retry_after: elapsed_between(now, next),
                        transition: None,
                    });
                }
                core.enter(CircuitState::HalfOpen, now);
                core.half_open_calls = 1;
                Ok(Some(CircuitState::HalfOpen))
            }
            CircuitState::HalfOpen => {
                if core.half_open_calls < self.config.half_open_max_calls {
                    core.half_open_calls += 1;
                    Ok(None)
                } else {
                    self.trip(&mut core, now);
                    Err(Rejection {
                        retry_after: self.config.recovery_timeout,
                        transition: Some(CircuitState::Open),
                    })
                }
            }
        }
    }

    fn trip(&self, core: &mut BreakerCore, now: DateTime<Utc>) {
        core.enter(CircuitState::Open, now);
        core.next_attempt_time = Some(now + to_chrono(self.config.recovery_timeout));
    }

    fn on_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let transition = {
            let mut core = self.core.lock();
            core.last_success_time = Some(now);
            match core.state {
                CircuitState::Closed => {
                    core.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    core.success_count += 1;
                    if core.success_count >= self.config.success_threshold {
                        core.enter(CircuitState::Closed, now);
                        core.next_attempt_time = None;
                        Some(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // A call admitted before the circuit opened
                CircuitState::Open => None,
            }
        };

        if let Some(state) = transition {
            info!(breaker = %self.name, "Circuit breaker closed after successful probes");
            self.notify_transition(state);
        }
    }

    fn on_failure(&self, counted: bool) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        let transition = {
            let mut core = self.core.lock();
            core.last_failure_time = Some(now);
            if !counted {
                debug!(breaker = %self.name, "Failure not counted towards opening");
                None
            } else {
                match core.state {
                    CircuitState::Closed => {
                        core.failure_count += 1;
                        if core.failure_count >= self.config.failure_threshold {
                            let failures = core.failure_count;
                            self.trip(&mut core, now);
                            warn!(
                                breaker = %self.name,
                                failures,
                                "Circuit breaker opening after consecutive failures"
                            );
                            Some(CircuitState::Open)
                        } else {
                            None
                        }
                    }
                    CircuitState::HalfOpen => {
                        self.trip(&mut core, now);
                        warn!(breaker = %self.name, "Circuit breaker reopening after failure in half-open state");
                        Some(CircuitState::Open)
                    }
                    CircuitState::Open => None,
                }
            }
        };

        if let Some(state) = transition {
            self.notify_transition(state);
        }
    }

    fn notify_transition(&self, state: CircuitState) {
        if let Some(hook) = &self.on_transition {
            hook(&self.name, state);
        }
    }

    /// Get the name of this circuit breaker
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An elapsed Open circuit still reports Open until the
    /// next call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.core.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let core = self.core.lock();
        CircuitBreakerState {
            name: self.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            last_failure_time: core.last_failure_time,
            last_success_time: core.last_success_time,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            next_attempt_time: core.next_attempt_time,
            half_open_call_count: core.half_open_calls,
        }
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let core = self.core.lock();
        let successes = self.total_successes.load(Ordering::Relaxed);
        let failures = self.total_failures.load(Ordering::Relaxed);
        let completed = successes + failures;

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: core.state,
            failure_count: core.failure_count,
            success_count: core.success_count,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_failures: failures,
            total_successes: successes,
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            success_rate: if completed == 0 {
                1.0
            } else {
                successes as f64 / completed as f64
            },
            uptime: if core.state == CircuitState::Closed {
                elapsed_between(core.last_state_change, now)
            } else {
                Duration::ZERO
            },
            next_attempt_time: core.next_attempt_time,
            last_state_change: core.last_state_change,
        }
    }

    /// Force the circuit breaker open (for testing or emergency)
    pub fn force_open(&self) {
        let now = self.clock.now();
        {
            let mut core = self.core.lock();
            self.trip(&mut core, now);
        }
        warn!(breaker = %self.name, "Circuit breaker forcibly opened");
        self.notify_transition(CircuitState::Open);
    }

    /// Force the circuit breaker closed (for testing or recovery)
    pub fn force_close(&self) {
        let now = self.clock.now();
        {
            let mut core = self.core.lock();
            core.enter(CircuitState::Closed, now);
            core.next_attempt_time = None;
        }
        info!(breaker = %self.name, "Circuit breaker forcibly closed");
        self.notify_transition(CircuitState::Closed);
    }

    /// Closed state with all statistics cleared
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_successes.store(0, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
        self.total_rejections.store(0, Ordering::Relaxed);
        let now = self.clock.now();
        {
            let mut core = self.core.lock();
            core.enter(CircuitState::Closed, now);
            core.next_attempt_time = None;
            core.last_failure_time = None;
            core.last_success_time = None;
        }
        self.notify_transition(CircuitState::Closed);
    }

    /// Load state from a persisted snapshot
    pub fn restore(&self, snapshot: &CircuitBreakerState) {
        self.total_requests.store(snapshot.total_requests, Ordering::Relaxed);
        self.total_successes.store(snapshot.total_successes, Ordering::Relaxed);
        self.total_failures.store(snapshot.total_failures, Ordering::Relaxed);
        self.total_rejections.store(snapshot.total_rejections, Ordering::Relaxed);
        let mut core = self.core.lock();
        core.state = snapshot.state;
        core.failure_count = snapshot.failure_count;
        core.success_count = snapshot.success_count;
        core.half_open_calls = snapshot.half_open_call_count;
        core.last_failure_time = snapshot.last_failure_time;
        core.last_success_time = snapshot.last_success_time;
        core.next_attempt_time = snapshot.next_attempt_time;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

/// Circuit breaker builder for easier configuration
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    classifier: Option<Arc<ErrorClassifier>>,
    predicate: ErrorPredicate,
    on_transition: Option<TransitionHook>,
}

impl CircuitBreakerBuilder {
    /// Create a new circuit breaker builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            clock: None,
            classifier: None,
            predicate: default_error_predicate,
            on_transition: None,
        }
    }

    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set how long the circuit stays open
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Set the maximum calls in half-open state
    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Set the operation timeout
    pub fn operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Record failures through a shared classifier
    pub fn classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set custom error checking function
    pub fn error_predicate(mut self, predicate: ErrorPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub(crate) fn on_transition(mut self, hook: TransitionHook) -> Self {
        self.on_transition = Some(hook);
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let now = clock.now();
        CircuitBreaker {
            name: self.name,
            config: self.config,
            clock,
            classifier: self.classifier,
            predicate: self.predicate,
            on_transition: self.on_transition,
            core: Mutex::new(BreakerCore {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                last_failure_time: None,
                last_success_time: None,
                next_attempt_time: None,
                last_state_change: now,
            }),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }
}
