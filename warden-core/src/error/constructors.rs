//! Constructor methods and convenience accessors for WardenError

use super::types::WardenError;
use crate::classifier::{ErrorReport, ErrorType, RawError};

impl WardenError {
    /// Create a classified operation error
    pub fn operation(report: ErrorReport, source: RawError) -> Self {
        WardenError::Operation {
            report: Box::new(report),
            source,
        }
    }

    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use warden_core::error::WardenError;
    ///
    /// let err = WardenError::configuration("threat.max_requests_per_second", "must be positive");
    /// assert!(err.to_string().contains("threat.max_requests_per_second"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        WardenError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a Storage error with a boxed source
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        WardenError::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        WardenError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        WardenError::Internal {
            message: message.into(),
        }
    }

    /// The classification report attached to this error, if any
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            WardenError::Operation { report, .. } => Some(report),
            WardenError::TransactionFailed { report, .. } => Some(report),
            _ => None,
        }
    }

    /// The raw transport failure behind this error, if any
    pub fn raw(&self) -> Option<&RawError> {
        match self {
            WardenError::Operation { source, .. } => Some(source),
            WardenError::TransactionFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Classified error type. Guard rejections map onto the category a caller
    /// would see from the dependency itself.
    pub fn error_type(&self) -> ErrorType {
        match self {
            WardenError::Operation { report, .. } => report.error_type,
            WardenError::TransactionFailed { report, .. } => report.error_type,
            WardenError::CircuitOpen { .. } => ErrorType::Network,
            WardenError::Timeout { .. } => ErrorType::Timeout,
            WardenError::QueueFull { .. } | WardenError::QueueCleared => ErrorType::Network,
            WardenError::ConfigurationError { .. } => ErrorType::Validation,
            _ => ErrorType::Unknown,
        }
    }

    /// Whether retrying the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            WardenError::Operation { report, .. } => report.retryable,
            WardenError::TransactionFailed { .. } => false,
            WardenError::CircuitOpen { .. } | WardenError::Timeout { .. } => true,
            _ => false,
        }
    }
}
