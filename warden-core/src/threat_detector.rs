//! Request-rate limiting and abuse heuristics
//!
//! Every checked request is appended to a metric log which backs three
//! sliding windows (second, minute, hour). Fixed per-window caps deny
//! excess requests. Independently, a weighted heuristic score looks at
//! request frequency, failure ratio, identical-request repetition, latency
//! and endpoint scan breadth; a critical score blocks the client for a
//! while.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::abstractions::{
    elapsed_between, to_chrono, Clock, SecurityAuditTrail, SecurityEvent, SecurityEventKind, SecurityEventSink,
    SystemClock,
};
use crate::classifier::{ErrorContext, ErrorSeverity};
use crate::config::ThreatConfig;
use crate::patterns::BackgroundTasks;
use crate::storage::snapshot::{SnapshotStore, THREAT_BLOCK};

const WEIGHT_FREQUENCY: f64 = 35.0;
const WEIGHT_FAILURES: f64 = 25.0;
const WEIGHT_REPETITION: f64 = 20.0;
const WEIGHT_LATENCY: f64 = 10.0;
const WEIGHT_SCAN: f64 = 10.0;

/// Completed requests needed before the failure ratio counts
const MIN_COMPLETED_FOR_FAILURE_RATIO: usize = 5;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            ThreatLevel::Critical
        } else if score >= 60.0 {
            ThreatLevel::High
        } else if score >= 30.0 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl From<ThreatLevel> for ErrorSeverity {
    fn from(level: ThreatLevel) -> Self {
        match level {
            ThreatLevel::Low => ErrorSeverity::Low,
            ThreatLevel::Medium => ErrorSeverity::Medium,
            ThreatLevel::High => ErrorSeverity::High,
            ThreatLevel::Critical => ErrorSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetric {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub endpoint: String,
    #[serde(default, with = "humantime_serde")]
    pub response_time: Option<Duration>,
    #[serde(default)]
    pub success: Option<bool>,
}

/// Verdict for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCheck {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub retry_after: Option<Duration>,
    pub threat_level: ThreatLevel,
    /// Id to pass to [`ThreatDetector::complete_request`]; absent for
    /// whitelisted and denied requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestCheck {
    fn allow(level: ThreatLevel, request_id: Option<String>) -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: None,
            threat_level: level,
            request_id,
        }
    }

    fn deny(reason: impl Into<String>, retry_after: Duration, level: ThreatLevel) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            retry_after: Some(retry_after),
            threat_level: level,
            request_id: None,
        }
    }
}

/// Active temporary block, persisted so it survives a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockState {
    pub blocked_at: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatStats {
    pub tracked_requests: usize,
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub denied_total: u64,
    pub blocked_until: Option<DateTime<Utc>>,
    pub last_threat_level: ThreatLevel,
    pub security_events: usize,
}

/// Weighted heuristic inputs, each in `0.0..=1.0`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThreatSignals {
    pub frequency: f64,
    pub failures: f64,
    pub repetition: f64,
    pub latency: f64,
    pub scan: f64,
}

impl ThreatSignals {
    pub fn score(&self) -> f64 {
        let score = WEIGHT_FREQUENCY * self.frequency
            + WEIGHT_FAILURES * self.failures
            + WEIGHT_REPETITION * self.repetition
            + WEIGHT_LATENCY * self.latency
            + WEIGHT_SCAN * self.scan;
        score.clamp(0.0, 100.0)
    }
}

struct DetectorState {
    metrics: VecDeque<RequestMetric>,
    block: Option<BlockState>,
    denied_total: u64,
    last_level: ThreatLevel,
}

impl DetectorState {
    fn count_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.metrics.iter().rev().take_while(|m| m.timestamp > cutoff).count()
    }

    fn oldest_since(&self, cutoff: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.metrics
            .iter()
            .rev()
            .take_while(|m| m.timestamp > cutoff)
            .last()
            .map(|m| m.timestamp)
    }

    fn active_block(&self, now: DateTime<Utc>) -> Option<&BlockState> {
        self.block.as_ref().filter(|b| b.until > now)
    }
}

struct DetectorInner {
    config: ThreatConfig,
    clock: Arc<dyn Clock>,
    snapshots: SnapshotStore,
    audit: SecurityAuditTrail,
    sink: Option<Arc<dyn SecurityEventSink>>,
    tasks: BackgroundTasks,
    state: Mutex<DetectorState>,
}

/// Client-side rate limiter and abuse scorer
#[derive(Clone)]
pub struct ThreatDetector {
    inner: Arc<DetectorInner>,
}

impl ThreatDetector {
    pub fn new(config: ThreatConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ThreatDetectorBuilder {
        ThreatDetectorBuilder::default()
    }

    /// Start the periodic block expiry check
    pub fn start(&self) -> bool {
        let detector = self.clone();
        self.inner.tasks.spawn_periodic(
            "threat:block-expiry",
            self.inner.config.expiry_check_interval,
            move || {
                let detector = detector.clone();
                async move {
                    detector.expire_blocks();
                }
            },
        )
    }

    /// Decide whether a request may proceed and record it when it does
    pub fn check_request(&self, action: &str, endpoint: &str) -> RequestCheck {
        let config = &self.inner.config;
        if config.whitelisted_actions.iter().any(|a| a == action) {
            return RequestCheck::allow(ThreatLevel::Low, None);
        }

        let now = self.inner.clock.now();
        let mut events = Vec::new();
        let verdict = {
            let mut state = self.inner.state.lock();
            self.prune(&mut state, now);

            if let Some(block) = state.active_block(now) {
                let retry_after = elapsed_between(now, block.until).max(SECOND);
                state.denied_total += 1;
                return RequestCheck::deny("Temporarily blocked due to suspicious activity", retry_after, ThreatLevel::Critical);
            }

            let windows = [
                (SECOND, config.max_requests_per_second, "second"),
                (MINUTE, config.max_requests_per_minute, "minute"),
                (HOUR, config.max_requests_per_hour, "hour"),
            ];
            let mut limited = None;
            for (window, limit, label) in windows {
                let cutoff = now - to_chrono(window);
                if state.count_since(cutoff) >= limit as usize {
                    let retry_after = state
                        .oldest_since(cutoff)
                        .map(|oldest| elapsed_between(now, oldest + to_chrono(window)))
                        .unwrap_or(window)
                        .max(SECOND);
                    limited = Some((label, limit, retry_after));
                    break;
                }
            }

            if let Some((label, limit, retry_after)) = limited {
                state.denied_total += 1;
                let level = state.last_level;
                events.push((
                    SecurityEventKind::RateLimitExceeded,
                    ErrorSeverity::Medium,
                    format!("Rate limit of {} requests per {} exceeded", limit, label),
                ));
                RequestCheck::deny(
                    format!("Rate limit exceeded: max {} requests per {}", limit, label),
                    retry_after,
                    level,
                )
            } else {
                let id = uuid::Uuid::new_v4().to_string();
                state.metrics.push_back(RequestMetric {
                    id: id.clone(),
                    timestamp: now,
                    action: action.to_string(),
                    endpoint: endpoint.to_string(),
                    response_time: None,
                    success: None,
                });
                while state.metrics.len() > config.max_metrics {
                    state.metrics.pop_front();
                }

                let signals = self.signals(&state, action, endpoint, now);
                let score = signals.score();
                let level = ThreatLevel::from_score(score);
                state.last_level = level;
                debug!(action, endpoint, score, %level, "Request scored");

                match level {
                    ThreatLevel::Critical => {
                        let until = now + to_chrono(config.block_duration);
                        let reason = format!("Threat score {:.0} for {} {}", score, action, endpoint);
                        state.block = Some(BlockState {
                            blocked_at: now,
                            until,
                            reason: reason.clone(),
                        });
                        state.denied_total += 1;
                        events.push((SecurityEventKind::TemporaryBlock, ErrorSeverity::Critical, reason));
                        RequestCheck::deny(
                            "Temporarily blocked due to suspicious activity",
                            config.block_duration.max(SECOND),
                            level,
                        )
                    }
                    ThreatLevel::High => {
                        events.push((
                            SecurityEventKind::SuspiciousActivity,
                            ErrorSeverity::High,
                            format!("Suspicious request pattern, score {:.0}", score),
                        ));
                        RequestCheck::allow(level, Some(id))
                    }
                    _ => RequestCheck::allow(level, Some(id)),
                }
            }
        };

        if !verdict.allowed {
            warn!(action, endpoint, reason = ?verdict.reason, retry_after = ?verdict.retry_after, "Request denied");
        }
        let blocked = events.iter().any(|(kind, _, _)| *kind == SecurityEventKind::TemporaryBlock);
        for (kind, severity, description) in events {
            self.emit(kind, severity, description, action, endpoint, now);
        }
        if blocked {
            self.persist_block();
        }
        verdict
    }

    /// Feed the outcome of an allowed request back into the heuristics
    pub fn complete_request(&self, request_id: &str, response_time: Duration, success: bool) -> bool {
        let mut state = self.inner.state.lock();
        match state.metrics.iter_mut().rev().find(|m| m.id == request_id) {
            Some(metric) => {
                metric.response_time = Some(response_time);
                metric.success = Some(success);
                true
            }
            None => false,
        }
    }

    fn signals(&self, state: &DetectorState, action: &str, endpoint: &str, now: DateTime<Utc>) -> ThreatSignals {
        let config = &self.inner.config;
        let minute_cutoff = now - to_chrono(MINUTE);
        let recent: Vec<&RequestMetric> = state
            .metrics
            .iter()
            .rev()
            .take_while(|m| m.timestamp > minute_cutoff)
            .collect();

        let ratio = |count: usize, limit: u32| (count as f64 / limit.max(1) as f64).min(1.0);
        let frequency = [
            ratio(state.count_since(now - to_chrono(SECOND)), config.max_requests_per_second),
            ratio(recent.len(), config.max_requests_per_minute),
            ratio(state.count_since(now - to_chrono(HOUR)), config.max_requests_per_hour),
        ]
        .into_iter()
        .fold(0.0, f64::max);

        let completed: Vec<&&RequestMetric> = recent.iter().filter(|m| m.success.is_some()).collect();
        let failures = if completed.len() >= MIN_COMPLETED_FOR_FAILURE_RATIO {
            completed.iter().filter(|m| m.success == Some(false)).count() as f64 / completed.len() as f64
        } else {
            0.0
        };

        let identical = recent
            .iter()
            .filter(|m| m.action == action && m.endpoint == endpoint)
            .count();
        let repetition = ratio(identical, config.repetition_threshold);

        let timed: Vec<Duration> = recent.iter().filter_map(|m| m.response_time).collect();
        let latency = if timed.is_empty() {
            0.0
        } else {
            let mean = timed.iter().sum::<Duration>() / timed.len() as u32;
            (mean.as_secs_f64() / config.slow_response.as_secs_f64().max(0.001)).min(1.0)
        };

        let distinct: HashSet<&str> = recent.iter().map(|m| m.endpoint.as_str()).collect();
        let scan = ratio(distinct.len(), config.scan_threshold);

        ThreatSignals {
            frequency,
            failures,
            repetition,
            latency,
            scan,
        }
    }

    fn prune(&self, state: &mut DetectorState, now: DateTime<Utc>) {
        let cutoff = now - to_chrono(self.inner.config.metric_retention);
        while state.metrics.front().is_some_and(|m| m.timestamp < cutoff) {
            state.metrics.pop_front();
        }
    }

    /// Block all non-whitelisted requests for `duration`
    pub fn block(&self, duration: Duration, reason: impl Into<String>) {
        let now = self.inner.clock.now();
        let reason = reason.into();
        self.inner.state.lock().block = Some(BlockState {
            blocked_at: now,
            until: now + to_chrono(duration),
            reason: reason.clone(),
        });
        info!(?duration, reason = %reason, "Client blocked");
        self.emit(
            SecurityEventKind::TemporaryBlock,
            ErrorSeverity::High,
            reason,
            "manual_block",
            "",
            now,
        );
        self.persist_block();
    }

    pub fn unblock(&self) -> bool {
        let lifted = self.inner.state.lock().block.take().is_some();
        if lifted {
            info!("Client unblocked");
            self.inner.snapshots.remove(THREAT_BLOCK);
        }
        lifted
    }

    /// Lift an expired block. Returns whether one was lifted.
    pub fn expire_blocks(&self) -> bool {
        let now = self.inner.clock.now();
        let expired = {
            let mut state = self.inner.state.lock();
            match &state.block {
                Some(block) if block.until <= now => {
                    state.block = None;
                    true
                }
                _ => false,
            }
        };
        if expired {
            info!("Temporary block expired");
            self.inner.snapshots.remove(THREAT_BLOCK);
        }
        expired
    }

    pub fn is_blocked(&self) -> bool {
        let now = self.inner.clock.now();
        self.inner.state.lock().active_block(now).is_some()
    }

    pub fn block_state(&self) -> Option<BlockState> {
        self.inner.state.lock().block.clone()
    }

    /// Most recent `limit` security events, newest first
    pub fn security_events(&self, limit: usize) -> Vec<SecurityEvent> {
        self.inner.audit.recent(limit)
    }

    pub fn stats(&self) -> ThreatStats {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock();
        ThreatStats {
            tracked_requests: state.metrics.len(),
            requests_last_second: state.count_since(now - to_chrono(SECOND)),
            requests_last_minute: state.count_since(now - to_chrono(MINUTE)),
            requests_last_hour: state.count_since(now - to_chrono(HOUR)),
            denied_total: state.denied_total,
            blocked_until: state.active_block(now).map(|b| b.until),
            last_threat_level: state.last_level,
            security_events: self.inner.audit.len(),
        }
    }

    /// Reload a persisted block that has not expired yet
    pub fn restore(&self) -> bool {
        let Some(block) = self.inner.snapshots.load_document::<BlockState>(THREAT_BLOCK) else {
            return false;
        };
        if block.until <= self.inner.clock.now() {
            self.inner.snapshots.remove(THREAT_BLOCK);
            return false;
        }
        info!(until = %block.until, "Restored temporary block");
        self.inner.state.lock().block = Some(block);
        true
    }

    pub fn config(&self) -> &ThreatConfig {
        &self.inner.config
    }

    fn persist_block(&self) {
        if let Some(block) = self.block_state() {
            self.inner.snapshots.save_document(THREAT_BLOCK, &block);
        }
    }

    fn emit(
        &self,
        kind: SecurityEventKind,
        severity: ErrorSeverity,
        description: String,
        action: &str,
        endpoint: &str,
        now: DateTime<Utc>,
    ) {
        let mut context = ErrorContext::new().component("threat_detector").action(action);
        if !endpoint.is_empty() {
            context = context.metadata("endpoint", serde_json::Value::String(endpoint.to_string()));
        }
        let event = SecurityEvent {
            kind,
            severity,
            description,
            context,
            timestamp: now,
        };
        if let Some(sink) = &self.inner.sink {
            sink.record(event.clone());
        }
        self.inner.audit.record(event);
    }
}

impl std::fmt::Debug for ThreatDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreatDetector")
            .field("blocked", &self.is_blocked())
            .finish()
    }
}

pub struct ThreatDetectorBuilder {
    config: ThreatConfig,
    clock: Arc<dyn Clock>,
    snapshots: SnapshotStore,
    sink: Option<Arc<dyn SecurityEventSink>>,
    tasks: BackgroundTasks,
}

impl Default for ThreatDetectorBuilder {
    fn default() -> Self {
        Self {
            config: ThreatConfig::default(),
            clock: SystemClock::shared(),
            snapshots: SnapshotStore::in_memory(),
            sink: None,
            tasks: BackgroundTasks::new(),
        }
    }
}

impl ThreatDetectorBuilder {
    pub fn config(mut self, config: ThreatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn security_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn build(self) -> ThreatDetector {
        let capacity = self.config.security_event_capacity;
        ThreatDetector {
            inner: Arc::new(DetectorInner {
                config: self.config,
                clock: self.clock,
                snapshots: self.snapshots,
                audit: SecurityAuditTrail::new(capacity),
                sink: self.sink,
                tasks: self.tasks,
                state: Mutex::new(DetectorState {
                    metrics: VecDeque::new(),
                    block: None,
                    denied_total: 0,
                    last_level: ThreatLevel::Low,
                }),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::{MemoryStore, MockClock};
    use test_case::test_case;

    fn detector(clock: &MockClock, config: ThreatConfig) -> ThreatDetector {
        ThreatDetector::builder()
            .config(config)
            .clock(Arc::new(clock.clone()))
            .build()
    }

    #[test_case(0.0, ThreatLevel::Low)]
    #[test_case(29.9, ThreatLevel::Low)]
    #[test_case(30.0, ThreatLevel::Medium)]
    #[test_case(60.0, ThreatLevel::High)]
    #[test_case(80.0, ThreatLevel::Critical)]
    fn test_level_thresholds(score: f64, expected: ThreatLevel) {
        assert_eq!(ThreatLevel::from_score(score), expected);
    }

    #[test]
    fn test_signal_weights() {
        let all = ThreatSignals {
            frequency: 1.0,
            failures: 1.0,
            repetition: 1.0,
            latency: 1.0,
            scan: 1.0,
        };
        assert_eq!(all.score(), 100.0);
        let freq_only = ThreatSignals {
            frequency: 1.0,
            ..Default::default()
        };
        assert_eq!(freq_only.score(), 35.0);
    }

    #[test]
    fn test_whitelisted_actions_always_pass() {
        let clock = MockClock::new();
        let detector = detector(&clock, ThreatConfig::default());
        for _ in 0..50 {
            let check = detector.check_request("page_view", "/");
            assert!(check.allowed);
            assert!(check.request_id.is_none());
        }
        assert_eq!(detector.stats().tracked_requests, 0);
    }

    #[test]
    fn test_per_second_cap_denies_with_retry_after() {
        let clock = MockClock::new();
        let detector = detector(&clock, ThreatConfig::default());
        let limit = detector.config().max_requests_per_second;

        for i in 0..limit {
            let check = detector.check_request("fetch_listing", &format!("/listings/{}", i));
            assert!(check.allowed, "request {} denied: {:?}", i, check.reason);
        }
        let denied = detector.check_request("fetch_listing", "/listings/overflow");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));
        assert_eq!(detector.security_events(1)[0].kind, SecurityEventKind::RateLimitExceeded);

        clock.advance(Duration::from_millis(1001));
        assert!(detector.check_request("fetch_listing", "/listings/later").allowed);
    }

    #[test]
    fn test_critical_score_blocks_until_expiry() {
        let clock = MockClock::new();
        let config = ThreatConfig {
            repetition_threshold: 5,
            ..ThreatConfig::default()
        };
        let detector = detector(&clock, config);

        let mut blocked = None;
        // Slow failing repeats score critical before the per-second cap is reached
        for i in 0..10 {
            let check = detector.check_request("vote", "/governance/vote");
            if let Some(id) = &check.request_id {
                detector.complete_request(id, Duration::from_secs(6), false);
            }
            if !check.allowed {
                blocked = Some(i);
                break;
            }
        }
        assert!(blocked.is_some(), "never blocked");
        assert!(detector.is_blocked());

        let during = detector.check_request("vote", "/governance/vote");
        assert!(!during.allowed);
        assert_eq!(during.threat_level, ThreatLevel::Critical);

        clock.advance(Duration::from_secs(301));
        assert!(detector.expire_blocks());
        assert!(!detector.is_blocked());
    }

    #[test]
    fn test_block_survives_restart() {
        let clock = MockClock::new();
        let port = Arc::new(MemoryStore::new());
        let make = || {
            ThreatDetector::builder()
                .clock(Arc::new(clock.clone()))
                .snapshots(SnapshotStore::new(Some(port.clone()), "test"))
                .build()
        };

        make().block(Duration::from_secs(60), "manual");
        let restarted = make();
        assert!(restarted.restore());
        assert!(!restarted.check_request("bid", "/auction").allowed);

        clock.advance(Duration::from_secs(61));
        let later = make();
        assert!(!later.restore());
    }

    #[test]
    fn test_unblock() {
        let clock = MockClock::new();
        let detector = detector(&clock, ThreatConfig::default());
        detector.block(Duration::from_secs(60), "test");
        assert!(detector.unblock());
        assert!(detector.check_request("bid", "/auction").allowed);
    }
}
