//! Resilience patterns shared by the components
//!
//! Circuit breaking, retry/backoff primitives and tracked background tasks.

pub mod breaker_registry;
pub mod circuit_breaker;
pub mod lifecycle;
pub mod retry;

pub use breaker_registry::CircuitBreakerRegistry;
pub use circuit_breaker::{
    default_error_predicate, CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerMetrics, CircuitBreakerState,
    CircuitState, ErrorPredicate, Fallback,
};
pub use lifecycle::{BackgroundTasks, LifecycleState};
pub use retry::{retry, ExponentialBackoff, RetryConfig};
