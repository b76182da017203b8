//! Bounded retry for state-changing transactions
//!
//! Every failed submission is classified into a [`TransactionFailureKind`]
//! and the parameters of the next attempt are adjusted for it: fee fields are
//! scaled up from the original values (capped), a low gas limit is raised,
//! and nonce problems bump or clear the nonce. Retry states are tracked by
//! id so callers can inspect or cancel a transaction in flight.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::abstractions::{elapsed_between, Clock, Notification, NotificationLevel, NotificationSink, SystemClock};
use crate::classifier::{rules, ErrorClassifier, ErrorContext, ErrorReport, RawError, RawSignal};
use crate::common::Timestamped;
use crate::config::{RetryEngineConfig, TransactionRetryConfig};
use crate::error::{WardenError, WardenResult};
use crate::patterns::ExponentialBackoff;
use crate::storage::snapshot::{Retention, SnapshotStore, TRANSACTION_RETRIES};

/// Flat gas-limit bump applied after a gas-too-low failure, in percent
const GAS_LIMIT_BUMP_PERCENT: u128 = 120;

/// Extra price bump for replacement transactions, in thousandths
const REPLACEMENT_BUMP_MILLIS: u128 = 1500;

/// Mutable numeric-string fields of a transaction request
///
/// Values are decimal or `0x`-prefixed hex strings. Adjusted values are
/// always written back as decimal strings. Unknown fields pass through
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransactionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gas_price(mut self, value: impl Into<String>) -> Self {
        self.gas_price = Some(value.into());
        self
    }

    pub fn max_fee_per_gas(mut self, value: impl Into<String>) -> Self {
        self.max_fee_per_gas = Some(value.into());
        self
    }

    pub fn max_priority_fee_per_gas(mut self, value: impl Into<String>) -> Self {
        self.max_priority_fee_per_gas = Some(value.into());
        self
    }

    pub fn gas_limit(mut self, value: impl Into<String>) -> Self {
        self.gas_limit = Some(value.into());
        self
    }

    pub fn nonce(mut self, value: impl Into<String>) -> Self {
        self.nonce = Some(value.into());
        self
    }

    /// Gas limit as a number; decimal and `0x` hex are accepted
    pub fn gas_limit_value(&self) -> Option<u128> {
        self.gas_limit.as_deref().and_then(parse_quantity)
    }

    pub fn nonce_value(&self) -> Option<u128> {
        self.nonce.as_deref().and_then(parse_quantity)
    }

    fn fee_fields_mut(&mut self) -> [&mut Option<String>; 3] {
        [
            &mut self.gas_price,
            &mut self.max_fee_per_gas,
            &mut self.max_priority_fee_per_gas,
        ]
    }
}

fn parse_quantity(value: &str) -> Option<u128> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Multiply by `millis / 1000`, leaving unparseable values untouched
fn scale_field(field: &mut Option<String>, millis: u128) {
    if let Some(value) = field.as_deref().and_then(parse_quantity) {
        *field = Some((value.saturating_mul(millis) / 1000).to_string());
    }
}

/// Why a submission failed, as far as parameter adjustment is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionFailureKind {
    InsufficientFunds,
    GasTooLow,
    NonceTooLow,
    NonceTooHigh,
    ReplacementUnderpriced,
    TransactionUnderpriced,
    NetworkError,
    UserRejected,
    Timeout,
    Unknown,
}

impl TransactionFailureKind {
    pub fn from_raw(raw: &RawError) -> Self {
        let signal = RawSignal::new(raw, &ErrorContext::default());

        if rules::is_user_rejection(&signal) {
            TransactionFailureKind::UserRejected
        } else if rules::is_insufficient_funds(&signal) {
            TransactionFailureKind::InsufficientFunds
        } else if signal.named_code_in(&["NONCE_EXPIRED"])
            || signal.message_contains_any(&["nonce too low", "nonce has already been used"])
        {
            TransactionFailureKind::NonceTooLow
        } else if signal.message_contains_any(&["nonce too high"]) {
            TransactionFailureKind::NonceTooHigh
        } else if signal.named_code_in(&["REPLACEMENT_UNDERPRICED"])
            || signal.message_contains_any(&["replacement transaction underpriced", "replacement fee too low"])
        {
            TransactionFailureKind::ReplacementUnderpriced
        } else if rules::is_underpriced(&signal) {
            TransactionFailureKind::TransactionUnderpriced
        } else if rules::is_gas_too_low(&signal) {
            TransactionFailureKind::GasTooLow
        } else if signal.named_code_in(&["TIMEOUT", "ETIMEDOUT"])
            || signal.message_contains_any(&["timeout", "timed out"])
        {
            TransactionFailureKind::Timeout
        } else if signal.named_code_in(&["NETWORK_ERROR", "SERVER_ERROR", "ECONNREFUSED", "ECONNRESET"])
            || signal.message_contains_any(&["network", "failed to fetch", "connection"])
        {
            TransactionFailureKind::NetworkError
        } else {
            TransactionFailureKind::Unknown
        }
    }

    /// Whether another attempt may help. Unknown failures defer to the
    /// classifier's verdict.
    pub fn is_retryable(&self, report: &ErrorReport) -> bool {
        match self {
            TransactionFailureKind::UserRejected | TransactionFailureKind::InsufficientFunds => false,
            TransactionFailureKind::Unknown => report.retryable,
            _ => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionFailureKind::InsufficientFunds => "insufficient_funds",
            TransactionFailureKind::GasTooLow => "gas_too_low",
            TransactionFailureKind::NonceTooLow => "nonce_too_low",
            TransactionFailureKind::NonceTooHigh => "nonce_too_high",
            TransactionFailureKind::ReplacementUnderpriced => "replacement_underpriced",
            TransactionFailureKind::TransactionUnderpriced => "transaction_underpriced",
            TransactionFailureKind::NetworkError => "network_error",
            TransactionFailureKind::UserRejected => "user_rejected",
            TransactionFailureKind::Timeout => "timeout",
            TransactionFailureKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TransactionFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for retry number `retry` (1 for the first retry).
///
/// Fee fields restart from `original` so the multiplier never compounds on
/// top of a previous bump; gas limit and nonce carry over from `previous`.
pub fn adjust_params(
    original: &TransactionParams,
    previous: &TransactionParams,
    kind: TransactionFailureKind,
    retry: u32,
    config: &TransactionRetryConfig,
) -> TransactionParams {
    let mut next = previous.clone();
    next.gas_price = original.gas_price.clone();
    next.max_fee_per_gas = original.max_fee_per_gas.clone();
    next.max_priority_fee_per_gas = original.max_priority_fee_per_gas.clone();

    let multiplier = config
        .gas_multiplier
        .powi(retry.min(i32::MAX as u32) as i32)
        .min(config.max_gas_multiplier);
    let fee_millis = (multiplier * 1000.0).round().max(1000.0) as u128;
    for field in next.fee_fields_mut() {
        scale_field(field, fee_millis);
    }

    match kind {
        TransactionFailureKind::GasTooLow => {
            if let Some(limit) = previous.gas_limit_value() {
                let raised = (limit.saturating_mul(GAS_LIMIT_BUMP_PERCENT) / 100).max(limit.saturating_add(1));
                next.gas_limit = Some(raised.to_string());
            }
        }
        TransactionFailureKind::NonceTooLow => {
            if let Some(nonce) = previous.nonce_value() {
                next.nonce = Some(nonce.saturating_add(1).to_string());
            }
        }
        TransactionFailureKind::NonceTooHigh => next.nonce = None,
        TransactionFailureKind::ReplacementUnderpriced => {
            for field in next.fee_fields_mut() {
                scale_field(field, REPLACEMENT_BUMP_MILLIS);
            }
        }
        _ => {}
    }
    next
}

/// Result of a successful submission
pub trait SubmittedTransaction {
    /// Transaction hash, when the submission produced one
    fn hash(&self) -> Option<String>;
}

impl SubmittedTransaction for String {
    fn hash(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl SubmittedTransaction for Value {
    fn hash(&self) -> Option<String> {
        self.get("hash").and_then(Value::as_str).map(str::to_string)
    }
}

impl SubmittedTransaction for () {
    fn hash(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl RetryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionAttempt {
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub params: TransactionParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<TransactionFailureKind>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRetryState {
    pub id: String,
    pub original_params: TransactionParams,
    pub config: TransactionRetryConfig,
    pub attempts: Vec<TransactionAttempt>,
    pub status: RetryStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Timestamped for TransactionRetryState {
    fn timestamp(&self) -> DateTime<Utc> {
        self.start_time
    }
}

/// Retry executor for transactions
pub struct TransactionRetryEngine {
    config: RetryEngineConfig,
    clock: Arc<dyn Clock>,
    classifier: Option<Arc<ErrorClassifier>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    snapshots: SnapshotStore,
    states: Mutex<HashMap<String, TransactionRetryState>>,
}

impl TransactionRetryEngine {
    pub fn new(config: RetryEngineConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> TransactionRetryEngineBuilder {
        TransactionRetryEngineBuilder::default()
    }

    /// Submit with retries under a generated id
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        params: TransactionParams,
        config: Option<TransactionRetryConfig>,
        operation: F,
    ) -> WardenResult<T>
    where
        F: FnMut(TransactionParams) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
        T: SubmittedTransaction,
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.execute_tracked(id, params, config, operation).await
    }

    /// Submit with retries under a caller-chosen id, so the transaction can
    /// be inspected or cancelled while it runs
    pub async fn execute_tracked<F, Fut, T, E>(
        &self,
        id: impl Into<String>,
        params: TransactionParams,
        config: Option<TransactionRetryConfig>,
        mut operation: F,
    ) -> WardenResult<T>
    where
        F: FnMut(TransactionParams) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawError>,
        T: SubmittedTransaction,
    {
        let id = id.into();
        let config = config.unwrap_or_else(|| self.config.defaults.clone());
        let total = config.max_retries.saturating_add(1);
        let backoff = ExponentialBackoff::new(config.base_delay, config.max_delay, config.backoff_multiplier);

        self.track(TransactionRetryState {
            id: id.clone(),
            original_params: params.clone(),
            config: config.clone(),
            attempts: Vec::new(),
            status: RetryStatus::Pending,
            start_time: self.clock.now(),
            end_time: None,
        });

        let mut current = params.clone();
        let mut attempt = 0u32;
        let mut last_kind = TransactionFailureKind::Unknown;

        loop {
            attempt += 1;
            if attempt > 1 {
                if self.is_cancelled(&id) {
                    info!(transaction = %id, attempt, "Transaction retry cancelled");
                    return Err(WardenError::Cancelled { id });
                }
                current = adjust_params(&params, &current, last_kind, attempt - 1, &config);
                debug!(transaction = %id, attempt, kind = %last_kind, params = ?current, "Adjusted parameters");
                self.notify(Notification::new(
                    NotificationLevel::Info,
                    "Retrying transaction",
                    format!("Retrying transaction (attempt {}/{})", attempt, total),
                ));
            }

            let outcome = match tokio::time::timeout(config.timeout, operation(current.clone())).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(RawError::new(format!("Transaction timed out after {:?}", config.timeout))
                    .with_code("TIMEOUT")),
            };

            match outcome {
                Ok(submitted) => {
                    let hash = submitted.hash();
                    info!(transaction = %id, attempt, hash = ?hash, "Transaction succeeded");
                    self.record_attempt(&id, TransactionAttempt {
                        attempt_number: attempt,
                        timestamp: self.clock.now(),
                        params: current,
                        hash,
                        error: None,
                        failure_kind: None,
                        success: true,
                    });
                    self.finish(&id, RetryStatus::Success);
                    if attempt > 1 {
                        self.notify(Notification::new(
                            NotificationLevel::Success,
                            "Transaction confirmed",
                            format!("Transaction succeeded on attempt {}/{}", attempt, total),
                        ));
                    }
                    return Ok(submitted);
                }
                Err(raw) => {
                    let kind = TransactionFailureKind::from_raw(&raw);
                    let report = self.classifier_report(&raw, &id);
                    self.record_attempt(&id, TransactionAttempt {
                        attempt_number: attempt,
                        timestamp: self.clock.now(),
                        params: current.clone(),
                        hash: raw.tx_hash.clone(),
                        error: Some(raw.message.clone()),
                        failure_kind: Some(kind),
                        success: false,
                    });

                    if !kind.is_retryable(&report) || attempt >= total {
                        warn!(transaction = %id, attempt, %kind, error = %raw, "Transaction failed");
                        let report = self.final_report(raw.clone(), &id);
                        self.finish(&id, RetryStatus::Failed);
                        self.notify(Notification::new(
                            NotificationLevel::Error,
                            "Transaction failed",
                            report.user_friendly_message.clone(),
                        ));
                        return Err(WardenError::TransactionFailed {
                            id,
                            attempts: attempt,
                            kind: kind.to_string(),
                            report: Box::new(report),
                            source: raw,
                        });
                    }

                    let delay = backoff.delay(attempt);
                    warn!(transaction = %id, attempt, %kind, ?delay, "Transaction attempt failed, retrying");
                    last_kind = kind;
                    self.clock.sleep(delay).await;
                }
            }
        }
    }

    /// Request cancellation. Takes effect before the next attempt starts; an
    /// attempt already running still settles the final status.
    pub fn cancel(&self, id: &str) -> bool {
        let mut states = self.states.lock();
        match states.get_mut(id) {
            Some(state) if state.status == RetryStatus::Pending => {
                state.status = RetryStatus::Cancelled;
                state.end_time = Some(self.clock.now());
                drop(states);
                self.persist();
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, id: &str) -> Option<TransactionRetryState> {
        self.states.lock().get(id).cloned()
    }

    /// Transactions still in flight, oldest first
    pub fn active_retries(&self) -> Vec<TransactionRetryState> {
        let mut active: Vec<TransactionRetryState> = self
            .states
            .lock()
            .values()
            .filter(|s| s.status == RetryStatus::Pending)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.start_time);
        active
    }

    /// Drop terminal states that ended more than `max_age` ago
    pub fn cleanup_completed(&self, max_age: Option<Duration>) -> usize {
        let max_age = max_age.unwrap_or(self.config.completed_retention);
        let now = self.clock.now();
        let removed = {
            let mut states = self.states.lock();
            let before = states.len();
            states.retain(|_, s| match (s.status.is_terminal(), s.end_time) {
                (true, Some(end)) => elapsed_between(end, now) < max_age,
                _ => true,
            });
            before - states.len()
        };
        if removed > 0 {
            debug!(removed, "Cleaned up completed transaction retries");
            self.persist();
        }
        removed
    }

    /// Load persisted states. Anything still pending was interrupted and is
    /// marked failed.
    pub fn restore(&self) -> usize {
        let now = self.clock.now();
        let loaded: Vec<TransactionRetryState> = self.snapshots.load_collection(
            TRANSACTION_RETRIES,
            Retention::new(self.config.persisted_states, Some(self.config.completed_retention)),
            now,
        );
        let count = loaded.len();
        let mut states = self.states.lock();
        for mut state in loaded {
            if state.status == RetryStatus::Pending {
                state.status = RetryStatus::Failed;
                state.end_time = Some(now);
            }
            states.insert(state.id.clone(), state);
        }
        count
    }

    pub fn config(&self) -> &RetryEngineConfig {
        &self.config
    }

    fn track(&self, state: TransactionRetryState) {
        {
            let mut states = self.states.lock();
            states.insert(state.id.clone(), state);
            while states.len() > self.config.max_tracked_states {
                // Terminal states go first, then the oldest in-flight one
                let oldest = states
                    .values()
                    .filter(|s| s.status.is_terminal())
                    .min_by_key(|s| s.start_time)
                    .or_else(|| states.values().min_by_key(|s| s.start_time))
                    .map(|s| (s.id.clone(), s.status));
                let Some((id, status)) = oldest else {
                    break;
                };
                if status == RetryStatus::Pending {
                    warn!(transaction = %id, "Tracking capacity reached, dropping in-flight retry state");
                }
                states.remove(&id);
            }
        }
        self.persist();
    }

    fn record_attempt(&self, id: &str, attempt: TransactionAttempt) {
        if let Some(state) = self.states.lock().get_mut(id) {
            state.attempts.push(attempt);
        }
        self.persist();
    }

    /// Settle the outcome. A cancellation that arrived while the last attempt
    /// was running is overridden by that attempt's result.
    fn finish(&self, id: &str, status: RetryStatus) {
        if let Some(state) = self.states.lock().get_mut(id) {
            if matches!(state.status, RetryStatus::Pending | RetryStatus::Cancelled) {
                state.status = status;
                state.end_time = Some(self.clock.now());
            }
        }
        self.persist();
    }

    fn is_cancelled(&self, id: &str) -> bool {
        self.states
            .lock()
            .get(id)
            .map_or(false, |s| s.status == RetryStatus::Cancelled)
    }

    fn context(id: &str, raw: &RawError) -> ErrorContext {
        let mut context = ErrorContext::new().component("transaction_retry").action(id);
        if let Some(hash) = &raw.tx_hash {
            context = context.tx_hash(hash.clone());
        }
        context
    }

    /// Side-effect free classification for intermediate attempts
    fn classifier_report(&self, raw: &RawError, id: &str) -> ErrorReport {
        let context = Self::context(id, raw);
        match &self.classifier {
            Some(classifier) => classifier.classify(raw, &context),
            None => rules::build_report(raw, &context, self.clock.now()),
        }
    }

    /// Recorded classification for the error surfaced to the caller
    fn final_report(&self, raw: RawError, id: &str) -> ErrorReport {
        let context = Self::context(id, &raw);
        match &self.classifier {
            Some(classifier) => classifier.handle_error(raw, context, false),
            None => rules::build_report(&raw, &context, self.clock.now()),
        }
    }

    fn persist(&self) {
        if !self.snapshots.is_persistent() {
            return;
        }
        let mut states: Vec<TransactionRetryState> = self.states.lock().values().cloned().collect();
        states.sort_by_key(|s| s.start_time);
        self.snapshots.save_collection(
            TRANSACTION_RETRIES,
            &states,
            Retention::new(self.config.persisted_states, Some(self.config.completed_retention)),
            self.clock.now(),
        );
    }

    fn notify(&self, notification: Notification) {
        if let Some(sink) = &self.notifier {
            sink.notify(notification);
        }
    }
}

impl std::fmt::Debug for TransactionRetryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRetryEngine")
            .field("tracked", &self.states.lock().len())
            .finish()
    }
}

pub struct TransactionRetryEngineBuilder {
    config: RetryEngineConfig,
    clock: Arc<dyn Clock>,
    classifier: Option<Arc<ErrorClassifier>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    snapshots: SnapshotStore,
}

impl Default for TransactionRetryEngineBuilder {
    fn default() -> Self {
        Self {
            config: RetryEngineConfig::default(),
            clock: SystemClock::shared(),
            classifier: None,
            notifier: None,
            snapshots: SnapshotStore::in_memory(),
        }
    }
}

impl TransactionRetryEngineBuilder {
    pub fn config(mut self, config: RetryEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn classifier(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn build(self) -> TransactionRetryEngine {
        TransactionRetryEngine {
            config: self.config,
            clock: self.clock,
            classifier: self.classifier,
            notifier: self.notifier,
            snapshots: self.snapshots,
            states: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::{BufferedNotifier, MemoryStore, MockClock, PersistencePort};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn engine(clock: &MockClock) -> TransactionRetryEngine {
        TransactionRetryEngine::builder().clock(Arc::new(clock.clone())).build()
    }

    fn retry_config(max_retries: u32) -> TransactionRetryConfig {
        TransactionRetryConfig {
            max_retries,
            ..TransactionRetryConfig::default()
        }
    }

    #[test_case("user rejected transaction", TransactionFailureKind::UserRejected)]
    #[test_case("insufficient funds for gas * price + value", TransactionFailureKind::InsufficientFunds)]
    #[test_case("nonce too low", TransactionFailureKind::NonceTooLow)]
    #[test_case("nonce too high", TransactionFailureKind::NonceTooHigh)]
    #[test_case("replacement transaction underpriced", TransactionFailureKind::ReplacementUnderpriced)]
    #[test_case("transaction underpriced", TransactionFailureKind::TransactionUnderpriced)]
    #[test_case("intrinsic gas too low", TransactionFailureKind::GasTooLow)]
    #[test_case("request timed out", TransactionFailureKind::Timeout)]
    #[test_case("Failed to fetch", TransactionFailureKind::NetworkError)]
    #[test_case("something odd", TransactionFailureKind::Unknown)]
    fn test_failure_kind(message: &str, expected: TransactionFailureKind) {
        assert_eq!(TransactionFailureKind::from_raw(&RawError::new(message)), expected);
    }

    #[test]
    fn test_fee_multiplier_is_capped_and_not_compounded() {
        let config = TransactionRetryConfig {
            gas_multiplier: 1.5,
            max_gas_multiplier: 2.0,
            ..TransactionRetryConfig::default()
        };
        let original = TransactionParams::new().gas_price("1000").max_fee_per_gas("0x7d0");

        let first = adjust_params(&original, &original, TransactionFailureKind::NetworkError, 1, &config);
        assert_eq!(first.gas_price.as_deref(), Some("1500"));
        assert_eq!(first.max_fee_per_gas.as_deref(), Some("3000"));

        let fifth = adjust_params(&original, &first, TransactionFailureKind::NetworkError, 5, &config);
        assert_eq!(fifth.gas_price.as_deref(), Some("2000"));
    }

    #[test]
    fn test_kind_specific_adjustments() {
        let config = retry_config(3);
        let original = TransactionParams::new().gas_price("1000").gas_limit("21000").nonce("7");

        let gas = adjust_params(&original, &original, TransactionFailureKind::GasTooLow, 1, &config);
        assert_eq!(gas.gas_limit.as_deref(), Some("25200"));
        assert_eq!(gas.gas_price.as_deref(), Some("1100"));

        let low = adjust_params(&original, &original, TransactionFailureKind::NonceTooLow, 1, &config);
        assert_eq!(low.nonce.as_deref(), Some("8"));

        let high = adjust_params(&original, &original, TransactionFailureKind::NonceTooHigh, 1, &config);
        assert_eq!(high.nonce, None);

        let replacement =
            adjust_params(&original, &original, TransactionFailureKind::ReplacementUnderpriced, 1, &config);
        assert_eq!(replacement.gas_price.as_deref(), Some("1650"));
    }

    #[test]
    fn test_extra_fields_pass_through() {
        let params: TransactionParams =
            serde_json::from_value(serde_json::json!({"to": "0xabc", "gasLimit": "21000"})).unwrap();
        assert_eq!(params.gas_limit.as_deref(), Some("21000"));
        let back = serde_json::to_value(&params).unwrap();
        assert_eq!(back["to"], "0xabc");
    }

    #[tokio::test]
    async fn test_gas_too_low_retries_raise_gas_limit() {
        let clock = MockClock::new();
        let engine = engine(&clock);
        let mut seen = Vec::new();

        let result = engine
            .execute_with_retry(
                TransactionParams::new().gas_limit("21000").gas_price("100"),
                Some(retry_config(3)),
                |params| {
                    seen.push(params.gas_limit.clone().unwrap());
                    let attempt = seen.len();
                    async move {
                        if attempt <= 2 {
                            Err(RawError::new("intrinsic gas too low"))
                        } else {
                            Ok("0xhash".to_string())
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(result, "0xhash");
        let limits: Vec<u128> = seen.iter().map(|l| l.parse().unwrap()).collect();
        assert!(limits.windows(2).all(|w| w[1] > w[0]), "{:?}", limits);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_user_rejection_is_terminal() {
        let clock = MockClock::new();
        let engine = engine(&clock);
        let mut calls = 0;

        let err = engine
            .execute_tracked("tx-1", TransactionParams::new(), Some(retry_config(5)), |_| {
                calls += 1;
                async { Err::<String, _>(RawError::new("User rejected the request").with_code(4001)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, WardenError::TransactionFailed { attempts: 1, .. }));
        let state = engine.state("tx-1").unwrap();
        assert_eq!(state.status, RetryStatus::Failed);
        assert_eq!(state.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded_by_budget() {
        let clock = MockClock::new();
        let notifier = Arc::new(BufferedNotifier::default());
        let engine = TransactionRetryEngine::builder()
            .clock(Arc::new(clock.clone()))
            .notifier(notifier.clone())
            .build();
        let mut calls = 0;

        let err = engine
            .execute_with_retry(TransactionParams::new(), Some(retry_config(2)), |_| {
                calls += 1;
                async { Err::<(), _>(RawError::new("network error")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 3);
        assert!(matches!(err, WardenError::TransactionFailed { attempts: 3, .. }));
        let messages: Vec<String> = notifier.drain().into_iter().map(|n| n.message).collect();
        assert!(messages.contains(&"Retrying transaction (attempt 2/3)".to_string()));
        assert!(messages.contains(&"Retrying transaction (attempt 3/3)".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_timeout_is_classified() {
        let clock = MockClock::new();
        let engine = engine(&clock);
        let config = TransactionRetryConfig {
            max_retries: 0,
            timeout: Duration::from_secs(5),
            ..TransactionRetryConfig::default()
        };

        let err = engine
            .execute_with_retry(TransactionParams::new(), Some(config), |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), RawError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WardenError::TransactionFailed { ref kind, .. } if kind == "timeout"));
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_attempt() {
        let clock = MockClock::new();
        let engine = Arc::new(engine(&clock));
        let handle = engine.clone();
        let mut calls = 0;

        let err = engine
            .execute_tracked("tx-cancel", TransactionParams::new(), Some(retry_config(5)), |_| {
                calls += 1;
                assert!(handle.cancel("tx-cancel"));
                async { Err::<(), _>(RawError::new("network error")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, WardenError::Cancelled { .. }));
        assert_eq!(engine.state("tx-cancel").unwrap().status, RetryStatus::Cancelled);
        assert!(engine.active_retries().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_successful_attempt_reports_success() {
        let clock = MockClock::new();
        let engine = Arc::new(engine(&clock));
        let handle = engine.clone();

        let hash = engine
            .execute_tracked("tx-race", TransactionParams::new(), None, |_| {
                assert!(handle.cancel("tx-race"));
                async { Ok::<_, RawError>("0xfeed".to_string()) }
            })
            .await
            .unwrap();

        assert_eq!(hash, "0xfeed");
        let state = engine.state("tx-race").unwrap();
        assert_eq!(state.status, RetryStatus::Success);
        assert!(state.end_time.is_some());
    }

    #[tokio::test]
    async fn test_tracked_states_stay_bounded_while_in_flight() {
        let clock = MockClock::new();
        let engine = Arc::new(
            TransactionRetryEngine::builder()
                .config(RetryEngineConfig {
                    max_tracked_states: 2,
                    ..RetryEngineConfig::default()
                })
                .clock(Arc::new(clock.clone()))
                .build(),
        );

        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let mut handles = Vec::new();
        for i in 0..4 {
            let id = format!("tx-{}", i);
            let engine_ref = engine.clone();
            let gate_ref = gate.clone();
            let tracked = id.clone();
            handles.push(tokio::spawn(async move {
                engine_ref
                    .execute_tracked(tracked, TransactionParams::new(), None, move |_| {
                        let gate = gate_ref.clone();
                        async move {
                            let _permit = gate.acquire().await;
                            Ok::<_, RawError>(())
                        }
                    })
                    .await
            }));
            for _ in 0..100 {
                if engine.state(&id).is_some() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            clock.advance(Duration::from_secs(1));
        }

        // The two oldest in-flight states were dropped to stay at capacity
        assert_eq!(engine.active_retries().len(), 2);
        assert!(engine.state("tx-0").is_none());
        assert!(engine.state("tx-3").is_some());

        gate.add_permits(4);
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(engine.states.lock().len() <= 2);
    }

    #[tokio::test]
    async fn test_cleanup_and_restore() {
        let clock = MockClock::new();
        let port = Arc::new(MemoryStore::new());
        let engine = TransactionRetryEngine::builder()
            .clock(Arc::new(clock.clone()))
            .snapshots(SnapshotStore::new(Some(port.clone()), "test"))
            .build();

        engine
            .execute_tracked("tx-ok", TransactionParams::new(), None, |_| async {
                Ok::<_, RawError>(serde_json::json!({"hash": "0x1"}))
            })
            .await
            .unwrap();
        assert!(port.get("test:transaction_retries").unwrap().is_some());

        let restored = TransactionRetryEngine::builder()
            .clock(Arc::new(clock.clone()))
            .snapshots(SnapshotStore::new(Some(port), "test"))
            .build();
        assert_eq!(restored.restore(), 1);
        assert_eq!(
            restored.state("tx-ok").unwrap().attempts[0].hash.as_deref(),
            Some("0x1")
        );

        assert_eq!(engine.cleanup_completed(Some(Duration::from_secs(60))), 0);
        clock.advance(Duration::from_secs(61));
        assert_eq!(engine.cleanup_completed(Some(Duration::from_secs(60))), 1);
        assert!(engine.state("tx-ok").is_none());
    }
}
