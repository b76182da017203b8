//! Raw failure shapes and their normalized form
//!
//! Transport layers hand over failures in loosely structured shapes
//! (`{code, message, response: {status}, reason}`), sometimes nested one level
//! under `error`, sometimes a bare string, sometimes `null`. [`RawError`]
//! absorbs all of them without failing, and [`RawSignal`] is the single
//! normalized view the classification rules read.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use super::types::ErrorContext;

const UNKNOWN_MESSAGE: &str = "Unknown error";

/// Error code as reported by a wallet, RPC node or HTTP client
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Numeric(i64),
    Named(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Numeric(n) => write!(f, "{}", n),
            ErrorCode::Named(s) => f.write_str(s),
        }
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::Numeric(code as i64)
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::Numeric(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::Named(code.to_string())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        ErrorCode::Named(code)
    }
}

/// A failure as produced by the transport or signing layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code: None,
            message: if message.is_empty() {
                UNKNOWN_MESSAGE.to_string()
            } else {
                message
            },
            status: None,
            reason: None,
            tx_hash: None,
        }
    }

    pub fn with_message(message: &str) -> Self {
        Self::new(message)
    }

    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tx_hash(mut self, hash: impl Into<String>) -> Self {
        self.tx_hash = Some(hash.into());
        self
    }

    /// Build from an arbitrary JSON value. Never fails: `null` and other
    /// non-object values become an error carrying their textual form.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::new(UNKNOWN_MESSAGE),
            Value::String(s) => Self::new(s.as_str()),
            Value::Bool(_) | Value::Number(_) | Value::Array(_) => Self::new(value.to_string()),
            Value::Object(_) => Self::from_object(value),
        }
    }

    fn from_object(value: &Value) -> Self {
        let nested = value.get("error").filter(|v| v.is_object());
        let lookup = |key: &str| {
            value
                .get(key)
                .filter(|v| !v.is_null())
                .or_else(|| nested.and_then(|n| n.get(key)).filter(|v| !v.is_null()))
        };

        let message = lookup("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| value.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| UNKNOWN_MESSAGE.to_string());

        let code = lookup("code").and_then(|c| match c {
            Value::Number(n) => n.as_i64().map(ErrorCode::Numeric),
            Value::String(s) if !s.is_empty() => Some(ErrorCode::Named(s.clone())),
            _ => None,
        });

        let status = value
            .get("response")
            .and_then(|r| r.get("status"))
            .or_else(|| lookup("status"))
            .or_else(|| lookup("statusCode"))
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok());

        let reason = lookup("reason")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let tx_hash = lookup("transactionHash")
            .or_else(|| value.get("transaction").and_then(|t| t.get("hash")))
            .or_else(|| value.get("receipt").and_then(|r| r.get("transactionHash")))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            code,
            message: if message.is_empty() {
                UNKNOWN_MESSAGE.to_string()
            } else {
                message
            },
            status,
            reason,
            tx_hash,
        }
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RawError {}

impl<'de> Deserialize<'de> for RawError {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(RawError::from_value(&value))
    }
}

impl From<Value> for RawError {
    fn from(value: Value) -> Self {
        RawError::from_value(&value)
    }
}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        RawError::new(message)
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        RawError::new(message)
    }
}

impl From<std::io::Error> for RawError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
            std::io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            std::io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
            _ => None,
        };
        let raw = RawError::new(err.to_string());
        match code {
            Some(code) => raw.with_code(code),
            None => raw,
        }
    }
}

impl From<reqwest::Error> for RawError {
    fn from(err: reqwest::Error) -> Self {
        let mut raw = RawError::new(err.to_string());
        if err.is_timeout() {
            raw = raw.with_code("TIMEOUT");
        } else if err.is_connect() || err.is_request() {
            raw = raw.with_code("NETWORK_ERROR");
        }
        if let Some(status) = err.status() {
            raw = raw.with_status(status.as_u16());
        }
        raw
    }
}

impl From<tokio::time::error::Elapsed> for RawError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RawError::new("Operation timed out").with_code("TIMEOUT")
    }
}

/// Normalized, lowercased view of a failure
#[derive(Debug, Clone, PartialEq)]
pub struct RawSignal {
    pub code: Option<ErrorCode>,
    pub status: Option<u16>,
    pub message: String,
    pub reason: Option<String>,
    pub has_tx_hash: bool,
}

impl RawSignal {
    pub fn new(raw: &RawError, context: &ErrorContext) -> Self {
        let code = raw.code.as_ref().map(|c| match c {
            ErrorCode::Named(s) => ErrorCode::Named(s.trim().to_ascii_uppercase()),
            numeric => numeric.clone(),
        });
        Self {
            code,
            status: raw.status,
            message: raw.message.to_lowercase(),
            reason: raw.reason.as_ref().map(|r| r.to_lowercase()),
            has_tx_hash: raw.tx_hash.is_some() || context.tx_hash.is_some(),
        }
    }

    pub fn numeric_code_in(&self, codes: &[i64]) -> bool {
        matches!(&self.code, Some(ErrorCode::Numeric(n)) if codes.contains(n))
    }

    pub fn named_code_in(&self, codes: &[&str]) -> bool {
        matches!(&self.code, Some(ErrorCode::Named(s)) if codes.contains(&s.as_str()))
    }

    pub fn message_contains_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.message.contains(n))
    }

    /// Searches the message and the revert reason
    pub fn text_contains_any(&self, needles: &[&str]) -> bool {
        self.message_contains_any(needles)
            || self
                .reason
                .as_deref()
                .map_or(false, |r| needles.iter().any(|n| r.contains(n)))
    }

    pub fn status_in(&self, statuses: &[u16]) -> bool {
        self.status.map_or(false, |s| statuses.contains(&s))
    }

    pub fn is_server_error(&self) -> bool {
        self.status.map_or(false, |s| s >= 500)
    }
}
