//! Core error types for Warden
//!
//! This module contains the main WardenError enum with all error variants
//! and associated type aliases for Result types.

use std::time::Duration;
use thiserror::Error;

use crate::classifier::{ErrorReport, RawError};

/// Error type surfaced by the resilience layers
///
/// Operation failures that pass through the circuit breaker or the retry
/// engine are always surfaced fully classified: the variant carries the
/// `ErrorReport` produced by the classifier together with the raw failure.
///
/// # Error Categories
///
/// - **Operation Errors**: the wrapped operation failed (classified)
/// - **Guard Errors**: the call was never made (open circuit, cancellation)
/// - **Queue Errors**: deferred work could not be delivered
/// - **Infrastructure Errors**: storage, serialization, configuration
#[derive(Error, Debug)]
pub enum WardenError {
    // Classified operation failures
    #[error("{} error: {}", .report.error_type, .report.message)]
    Operation {
        report: Box<ErrorReport>,
        #[source]
        source: RawError,
    },

    #[error("Transaction {id} failed after {attempts} attempt(s) ({kind}): {}", .report.message)]
    TransactionFailed {
        id: String,
        attempts: u32,
        kind: String,
        report: Box<ErrorReport>,
        #[source]
        source: RawError,
    },

    // Guard rejections
    #[error("Circuit breaker '{name}' is open, next attempt in {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration },

    #[error("Operation cancelled: {id}")]
    Cancelled { id: String },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // Offline queue
    #[error("Offline queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Offline queue was cleared before the request could run")]
    QueueCleared,

    // Storage & serialization
    #[error("Storage operation '{operation}' failed")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // Configuration
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    // Internal
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, WardenError>;
pub type WardenResult<T> = std::result::Result<T, WardenError>;
