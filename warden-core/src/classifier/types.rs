//! Classification result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::common::Timestamped;

/// Failure category assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    SmartContract,
    Network,
    Api,
    Authentication,
    Validation,
    Transaction,
    Wallet,
    FileUpload,
    RateLimit,
    Timeout,
    Unknown,
}

impl ErrorType {
    pub const ALL: [ErrorType; 11] = [
        ErrorType::SmartContract,
        ErrorType::Network,
        ErrorType::Api,
        ErrorType::Authentication,
        ErrorType::Validation,
        ErrorType::Transaction,
        ErrorType::Wallet,
        ErrorType::FileUpload,
        ErrorType::RateLimit,
        ErrorType::Timeout,
        ErrorType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::SmartContract => "SMART_CONTRACT",
            ErrorType::Network => "NETWORK",
            ErrorType::Api => "API",
            ErrorType::Authentication => "AUTHENTICATION",
            ErrorType::Validation => "VALIDATION",
            ErrorType::Transaction => "TRANSACTION",
            ErrorType::Wallet => "WALLET",
            ErrorType::FileUpload => "FILE_UPLOAD",
            ErrorType::RateLimit => "RATE_LIMIT",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::Unknown => "UNKNOWN",
        }
    }

    /// Short human title used for notifications
    pub fn title(&self) -> &'static str {
        match self {
            ErrorType::SmartContract => "Contract Error",
            ErrorType::Network => "Network Error",
            ErrorType::Api => "Server Error",
            ErrorType::Authentication => "Authentication Error",
            ErrorType::Validation => "Invalid Input",
            ErrorType::Transaction => "Transaction Error",
            ErrorType::Wallet => "Wallet Error",
            ErrorType::FileUpload => "Upload Error",
            ErrorType::RateLimit => "Too Many Requests",
            ErrorType::Timeout => "Request Timed Out",
            ErrorType::Unknown => "Unexpected Error",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        ErrorType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown error type: {}", s))
    }
}

/// Impact of a failure, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Where a failure happened and on whose behalf
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorContext {
    pub component: Option<String>,
    pub action: Option<String>,
    pub user_id: Option<String>,
    pub wallet_address: Option<String>,
    pub tx_hash: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn wallet(mut self, address: impl Into<String>) -> Self {
        self.wallet_address = Some(address.into());
        self
    }

    pub fn tx_hash(mut self, hash: impl Into<String>) -> Self {
        self.tx_hash = Some(hash.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Identity used to count affected users: user id, else wallet address
    pub fn subject(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .or(self.wallet_address.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// A classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: ErrorSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub context: ErrorContext,
    pub user_friendly_message: String,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    pub retryable: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ErrorReport {
    pub fn mark_resolved(&mut self, at: DateTime<Utc>) {
        if !self.resolved {
            self.resolved = true;
            self.resolved_at = Some(at);
        }
    }

    /// Time from creation to resolution
    pub fn resolution_time(&self) -> Option<std::time::Duration> {
        self.resolved_at
            .map(|at| crate::abstractions::elapsed_between(self.timestamp, at))
    }
}

impl Timestamped for ErrorReport {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Aggregate counters over the report log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: usize,
    pub resolved: usize,
    pub retryable: usize,
    pub by_type: HashMap<ErrorType, usize>,
    pub by_severity: HashMap<ErrorSeverity, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_display_and_parse() {
        assert_eq!(ErrorType::SmartContract.to_string(), "SMART_CONTRACT");
        assert_eq!("rate-limit".parse::<ErrorType>(), Ok(ErrorType::RateLimit));
        assert!("bogus".parse::<ErrorType>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::High);
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
    }

    #[test]
    fn test_context_subject_prefers_user_id() {
        let ctx = ErrorContext::new().wallet("0xabc").user("alice");
        assert_eq!(ctx.subject(), Some("alice"));
        assert_eq!(ErrorContext::new().wallet("0xabc").subject(), Some("0xabc"));
        assert_eq!(ErrorContext::new().subject(), None);
    }

    #[test]
    fn test_report_serializes_type_field() {
        let report = crate::classifier::rules::classify_detached(
            &crate::classifier::RawError::with_message("network down"),
            &ErrorContext::default(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "NETWORK");
        assert_eq!(json["severity"], "medium");
    }
}
