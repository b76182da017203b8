//! Warden: client-side resilience core
//!
//! Error classification, circuit breaking, transaction retry with fee
//! escalation, network recovery with an offline queue, client-side threat
//! detection and batch error analytics. [`Warden`] wires them together.

pub mod abstractions;
pub mod analytics;
pub mod classifier;
pub mod common;
pub mod config;
pub mod error;
pub mod network_monitor;
pub mod patterns;
pub mod storage;
pub mod threat_detector;
pub mod transaction_retry;
pub mod warden;

pub use abstractions::{Clock, MockClock, SystemClock};
pub use analytics::{ErrorAnalyticsEngine, ErrorInsight, ErrorPattern, ErrorTrend, SystemHealth};
pub use classifier::{ErrorClassifier, ErrorContext, ErrorReport, ErrorSeverity, ErrorType, RawError};
pub use config::WardenConfig;
pub use error::{WardenError, WardenResult};
pub use network_monitor::{NetworkRecoveryMonitor, QualityLevel};
pub use patterns::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use threat_detector::{RequestCheck, ThreatDetector, ThreatLevel};
pub use transaction_retry::{TransactionParams, TransactionRetryEngine};
pub use warden::{RestoreSummary, Warden, WardenBuilder};
