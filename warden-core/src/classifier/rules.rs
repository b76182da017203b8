//! Classification rule tables
//!
//! Everything here is a pure function of a [`RawSignal`]. Predicates are
//! evaluated in a fixed order and the first match wins, which resolves the
//! overlaps between the string heuristics (a wallet message mentioning a
//! transaction is still a wallet error).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::signal::{RawError, RawSignal};
use super::types::{ErrorContext, ErrorReport, ErrorSeverity, ErrorType};

const WALLET_NUMERIC_CODES: &[i64] = &[4001, 4100, 4200, 4900, 4901, -32002];
const WALLET_NAMED_CODES: &[&str] = &["ACTION_REJECTED"];
const WALLET_TEXT: &[&str] = &[
    "user rejected",
    "user denied",
    "wallet",
    "metamask",
    "not connected",
    "no provider",
];

const CONTRACT_CODES: &[&str] = &["CALL_EXCEPTION", "UNPREDICTABLE_GAS_LIMIT"];
const CONTRACT_TEXT: &[&str] = &["execution reverted", "revert", "contract"];

const TRANSACTION_CODES: &[&str] = &[
    "INSUFFICIENT_FUNDS",
    "NONCE_EXPIRED",
    "REPLACEMENT_UNDERPRICED",
    "TRANSACTION_REPLACED",
];
const TRANSACTION_TEXT: &[&str] = &["insufficient funds", "nonce", "gas", "underpriced", "transaction"];

const RATE_LIMIT_TEXT: &[&str] = &["rate limit", "too many requests"];

const TIMEOUT_CODES: &[&str] = &["TIMEOUT", "ETIMEDOUT"];
const TIMEOUT_TEXT: &[&str] = &["timeout", "timed out"];

const AUTH_TEXT: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "token expired",
    "invalid token",
    "authentication",
];

const NETWORK_CODES: &[&str] = &[
    "NETWORK_ERROR",
    "SERVER_ERROR",
    "ECONNREFUSED",
    "ECONNRESET",
    "ENOTFOUND",
];
const NETWORK_TEXT: &[&str] = &["network", "failed to fetch", "connection", "offline", "socket"];

const UPLOAD_TEXT: &[&str] = &["upload", "file size", "file type", "ipfs"];

const VALIDATION_TEXT: &[&str] = &["invalid", "validation", "required", "must be"];

const RETRYABLE_API_STATUSES: &[u16] = &[408, 425, 429, 500, 502, 503, 504];

const GAS_TOO_LOW_TEXT: &[&str] = &["gas too low", "intrinsic gas", "out of gas", "gas required exceeds"];

/// Assign a category, first matching predicate wins
pub fn classify(signal: &RawSignal) -> ErrorType {
    if is_wallet(signal) {
        ErrorType::Wallet
    } else if is_contract(signal) {
        ErrorType::SmartContract
    } else if is_transaction(signal) {
        ErrorType::Transaction
    } else if signal.status == Some(429) || signal.message_contains_any(RATE_LIMIT_TEXT) {
        ErrorType::RateLimit
    } else if signal.named_code_in(TIMEOUT_CODES)
        || signal.status_in(&[408, 504])
        || signal.message_contains_any(TIMEOUT_TEXT)
    {
        ErrorType::Timeout
    } else if signal.status_in(&[401, 403]) || signal.message_contains_any(AUTH_TEXT) {
        ErrorType::Authentication
    } else if signal.named_code_in(NETWORK_CODES) || signal.message_contains_any(NETWORK_TEXT) {
        ErrorType::Network
    } else if signal.message_contains_any(UPLOAD_TEXT) {
        ErrorType::FileUpload
    } else if signal.status_in(&[400, 422]) || signal.message_contains_any(VALIDATION_TEXT) {
        ErrorType::Validation
    } else if signal.status.map_or(false, |s| s >= 400) {
        ErrorType::Api
    } else {
        ErrorType::Unknown
    }
}

fn is_wallet(signal: &RawSignal) -> bool {
    signal.numeric_code_in(WALLET_NUMERIC_CODES)
        || signal.named_code_in(WALLET_NAMED_CODES)
        || signal.message_contains_any(WALLET_TEXT)
}

fn is_contract(signal: &RawSignal) -> bool {
    signal.named_code_in(CONTRACT_CODES)
        || signal.reason.is_some()
        || signal.message_contains_any(CONTRACT_TEXT)
}

fn is_transaction(signal: &RawSignal) -> bool {
    signal.named_code_in(TRANSACTION_CODES)
        || signal.message_contains_any(TRANSACTION_TEXT)
        || signal.has_tx_hash
}

pub fn is_user_rejection(signal: &RawSignal) -> bool {
    signal.numeric_code_in(&[4001])
        || signal.named_code_in(WALLET_NAMED_CODES)
        || signal.message_contains_any(&["user rejected", "user denied"])
}

pub fn is_insufficient_funds(signal: &RawSignal) -> bool {
    signal.named_code_in(&["INSUFFICIENT_FUNDS"]) || signal.message_contains_any(&["insufficient funds"])
}

pub fn is_nonce_issue(signal: &RawSignal) -> bool {
    signal.named_code_in(&["NONCE_EXPIRED"]) || signal.message_contains_any(&["nonce"])
}

pub fn is_underpriced(signal: &RawSignal) -> bool {
    signal.named_code_in(&["REPLACEMENT_UNDERPRICED"]) || signal.message_contains_any(&["underpriced"])
}

pub fn is_gas_too_low(signal: &RawSignal) -> bool {
    signal.message_contains_any(GAS_TOO_LOW_TEXT)
}

fn is_revert(signal: &RawSignal) -> bool {
    signal.reason.is_some() || signal.message_contains_any(&["revert"])
}

pub fn severity(signal: &RawSignal, error_type: ErrorType) -> ErrorSeverity {
    match error_type {
        ErrorType::SmartContract if is_revert(signal) => ErrorSeverity::Critical,
        ErrorType::SmartContract => ErrorSeverity::High,
        ErrorType::Transaction if is_insufficient_funds(signal) || signal.has_tx_hash => ErrorSeverity::High,
        ErrorType::Transaction => ErrorSeverity::Medium,
        ErrorType::Wallet if is_user_rejection(signal) => ErrorSeverity::Low,
        ErrorType::Wallet => ErrorSeverity::Medium,
        ErrorType::Network | ErrorType::Api if signal.is_server_error() => ErrorSeverity::High,
        ErrorType::Network | ErrorType::Api => ErrorSeverity::Medium,
        ErrorType::Authentication => ErrorSeverity::High,
        ErrorType::Validation => ErrorSeverity::Low,
        ErrorType::FileUpload => ErrorSeverity::Medium,
        ErrorType::RateLimit | ErrorType::Timeout => ErrorSeverity::Low,
        ErrorType::Unknown => ErrorSeverity::Medium,
    }
}

/// Static allow-list of recoverable failures
pub fn is_retryable(signal: &RawSignal, error_type: ErrorType, retry_count: u32) -> bool {
    match error_type {
        ErrorType::Network | ErrorType::Timeout | ErrorType::RateLimit => true,
        ErrorType::Api => signal.status_in(RETRYABLE_API_STATUSES),
        ErrorType::Transaction => {
            !is_insufficient_funds(signal)
                && (is_nonce_issue(signal) || is_underpriced(signal) || is_gas_too_low(signal))
        }
        ErrorType::Authentication => retry_count == 0,
        _ => false,
    }
}

/// User-facing message and suggested actions
pub fn guidance(signal: &RawSignal, error_type: ErrorType) -> (String, Vec<String>) {
    let (message, actions): (&str, &[&str]) = match error_type {
        ErrorType::SmartContract => contract_guidance(signal),
        ErrorType::Transaction if is_insufficient_funds(signal) => (
            "Your wallet does not have enough funds to cover this transaction and its gas fees.",
            &["Add funds to your wallet", "Reduce the transaction amount"],
        ),
        ErrorType::Transaction if is_nonce_issue(signal) => (
            "The transaction nonce is out of sync with the network.",
            &["Wait for pending transactions to confirm", "Reset your wallet account nonce"],
        ),
        ErrorType::Transaction => (
            "The transaction could not be completed.",
            &["Check the transaction details", "Try again with a higher gas price"],
        ),
        ErrorType::Wallet if is_user_rejection(signal) => (
            "You rejected the request in your wallet.",
            &["Approve the request in your wallet to continue"],
        ),
        ErrorType::Wallet => (
            "There was a problem communicating with your wallet.",
            &["Make sure your wallet is unlocked and connected", "Refresh the page and reconnect"],
        ),
        ErrorType::Network => (
            "Unable to reach the network. Please check your connection.",
            &["Check your internet connection", "Try again in a moment"],
        ),
        ErrorType::Api if signal.is_server_error() => (
            "The server encountered an error. Please try again later.",
            &["Try again in a few minutes", "Contact support if the problem persists"],
        ),
        ErrorType::Api => (
            "The request could not be processed.",
            &["Check your input and try again"],
        ),
        ErrorType::Authentication if signal.message_contains_any(&["expired"]) => (
            "Your session has expired. Please sign in again.",
            &["Sign in again"],
        ),
        ErrorType::Authentication => (
            "You are not authorized to perform this action.",
            &["Sign in again", "Check that your account has the required permissions"],
        ),
        ErrorType::Validation => (
            "Some of the provided information is invalid.",
            &["Review the highlighted fields and try again"],
        ),
        ErrorType::FileUpload if signal.message_contains_any(&["file size", "too large"]) => (
            "The file is too large to upload.",
            &["Choose a smaller file", "Compress the file before uploading"],
        ),
        ErrorType::FileUpload => (
            "The file could not be uploaded.",
            &["Check the file type and try again"],
        ),
        ErrorType::RateLimit => (
            "Too many requests. Please slow down.",
            &["Wait a moment before trying again"],
        ),
        ErrorType::Timeout => (
            "The request took too long to complete.",
            &["Try again", "Check your internet connection"],
        ),
        ErrorType::Unknown => (
            "Something went wrong. Please try again.",
            &["Try again", "Contact support if the problem persists"],
        ),
    };
    (
        message.to_string(),
        actions.iter().map(|a| a.to_string()).collect(),
    )
}

fn contract_guidance(signal: &RawSignal) -> (&'static str, &'static [&'static str]) {
    if signal.text_contains_any(&["insufficient allowance"]) {
        (
            "The contract is not approved to spend this token amount.",
            &["Approve the token spend first", "Increase the allowance and retry"],
        )
    } else if signal.text_contains_any(&["not owner", "ownable"]) {
        (
            "Only the owner can perform this action.",
            &["Switch to the owner account"],
        )
    } else if signal.text_contains_any(&["paused"]) {
        (
            "The contract is currently paused.",
            &["Try again once the contract is unpaused"],
        )
    } else if signal.text_contains_any(&["already"]) {
        (
            "This action has already been performed.",
            &["Refresh to see the latest state"],
        )
    } else if signal.text_contains_any(&["deadline", "expired"]) {
        (
            "The transaction deadline has passed.",
            &["Submit the transaction again"],
        )
    } else {
        (
            "The smart contract rejected the transaction.",
            &["Check the transaction parameters", "Contact support if the problem persists"],
        )
    }
}

/// Classify a raw failure into a full report at a given time
pub fn build_report(raw: &RawError, context: &ErrorContext, now: DateTime<Utc>) -> ErrorReport {
    let signal = RawSignal::new(raw, context);
    let error_type = classify(&signal);
    let (user_friendly_message, suggested_actions) = guidance(&signal, error_type);

    let mut context = context.clone();
    if context.tx_hash.is_none() {
        context.tx_hash = raw.tx_hash.clone();
    }

    ErrorReport {
        id: Uuid::new_v4().to_string(),
        timestamp: now,
        error_type,
        severity: severity(&signal, error_type),
        message: raw.message.clone(),
        code: raw.code.as_ref().map(|c| c.to_string()),
        context,
        user_friendly_message,
        suggested_actions,
        retryable: is_retryable(&signal, error_type, 0),
        retry_count: 0,
        resolved: false,
        resolved_at: None,
    }
}

/// Classify without recording, timestamped with the system clock
pub fn classify_detached(raw: &RawError, context: &ErrorContext) -> ErrorReport {
    build_report(raw, context, Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn classify_raw(raw: RawError) -> ErrorReport {
        classify_detached(&raw, &ErrorContext::default())
    }

    #[test_case(RawError::new("User rejected the request").with_code(4001), ErrorType::Wallet ; "wallet rejection")]
    #[test_case(RawError::new("request pending").with_code(-32002), ErrorType::Wallet ; "wallet pending")]
    #[test_case(RawError::new("execution reverted: Pausable: paused"), ErrorType::SmartContract ; "revert")]
    #[test_case(RawError::new("call failed").with_reason("Ownable: caller is not the owner"), ErrorType::SmartContract ; "reason present")]
    #[test_case(RawError::new("insufficient funds for gas * price + value"), ErrorType::Transaction ; "insufficient funds")]
    #[test_case(RawError::new("nonce too low"), ErrorType::Transaction ; "nonce")]
    #[test_case(RawError::new("slow down").with_status(429), ErrorType::RateLimit ; "429")]
    #[test_case(RawError::new("request timed out"), ErrorType::Timeout ; "timeout text")]
    #[test_case(RawError::new("gateway").with_status(504), ErrorType::Timeout ; "504")]
    #[test_case(RawError::new("nope").with_status(401), ErrorType::Authentication ; "401")]
    #[test_case(RawError::new("Failed to fetch"), ErrorType::Network ; "fetch")]
    #[test_case(RawError::new("boom").with_code("ECONNREFUSED"), ErrorType::Network ; "econnrefused")]
    #[test_case(RawError::new("IPFS pin failed"), ErrorType::FileUpload ; "ipfs")]
    #[test_case(RawError::new("title is required"), ErrorType::Validation ; "required")]
    #[test_case(RawError::new("bad").with_status(422), ErrorType::Validation ; "422")]
    #[test_case(RawError::new("teapot").with_status(418), ErrorType::Api ; "other 4xx")]
    #[test_case(RawError::new("something odd"), ErrorType::Unknown ; "unknown")]
    fn test_classification(raw: RawError, expected: ErrorType) {
        assert_eq!(classify_raw(raw).error_type, expected);
    }

    #[test]
    fn test_wallet_wins_over_transaction_text() {
        let report = classify_raw(RawError::new("MetaMask: user denied transaction signature"));
        assert_eq!(report.error_type, ErrorType::Wallet);
        assert_eq!(report.severity, ErrorSeverity::Low);
        assert!(!report.retryable);
    }

    #[test]
    fn test_tx_hash_in_context_makes_transaction() {
        let ctx = ErrorContext::default().tx_hash("0xabc");
        let report = classify_detached(&RawError::new("status 0"), &ctx);
        assert_eq!(report.error_type, ErrorType::Transaction);
        assert_eq!(report.severity, ErrorSeverity::High);
    }

    #[test]
    fn test_severity_table() {
        assert_eq!(
            classify_raw(RawError::new("execution reverted")).severity,
            ErrorSeverity::Critical
        );
        assert_eq!(
            classify_raw(RawError::new("x").with_code("CALL_EXCEPTION")).severity,
            ErrorSeverity::High
        );
        assert_eq!(
            classify_raw(RawError::new("network error").with_status(502)).severity,
            ErrorSeverity::High
        );
        assert_eq!(
            classify_raw(RawError::new("teapot").with_status(418)).severity,
            ErrorSeverity::Medium
        );
        assert_eq!(classify_raw(RawError::new("timed out")).severity, ErrorSeverity::Low);
    }

    #[test]
    fn test_retryability_allow_list() {
        assert!(classify_raw(RawError::new("network down")).retryable);
        assert!(classify_raw(RawError::new("bad gateway").with_status(503)).retryable);
        assert!(!classify_raw(RawError::new("teapot").with_status(418)).retryable);
        assert!(classify_raw(RawError::new("replacement transaction underpriced")).retryable);
        assert!(classify_raw(RawError::new("intrinsic gas too low")).retryable);
        assert!(!classify_raw(RawError::new("insufficient funds for gas")).retryable);
        assert!(!classify_raw(RawError::new("field must be positive")).retryable);
    }

    #[test]
    fn test_authentication_only_retryable_before_first_attempt() {
        let raw = RawError::new("token expired").with_status(401);
        let signal = RawSignal::new(&raw, &ErrorContext::default());
        assert!(is_retryable(&signal, ErrorType::Authentication, 0));
        assert!(!is_retryable(&signal, ErrorType::Authentication, 1));
    }

    #[test]
    fn test_revert_reason_guidance() {
        let report = classify_raw(RawError::new("execution reverted").with_reason("ERC20: insufficient allowance"));
        assert!(report.user_friendly_message.contains("not approved"));
        assert!(!report.suggested_actions.is_empty());

        let report = classify_raw(RawError::new("token expired").with_status(401));
        assert!(report.user_friendly_message.contains("session has expired"));
    }
}
