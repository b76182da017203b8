//! Error analytics
//!
//! A periodic batch pass over the error log that
//!
//! 1. clusters reports into [`ErrorPattern`]s by normalized message,
//! 2. raises [`ErrorInsight`]s for spikes, new patterns, per-user
//!    correlations and hourly degradation,
//! 3. folds reports into hourly [`ErrorTrend`] buckets.
//!
//! [`ErrorAnalyticsEngine::get_system_health`] summarizes the current state
//! as a 0-100 score. It never mutates anything.

pub mod normalize;

use chrono::{DateTime, DurationRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::abstractions::{to_chrono, Clock, SystemClock};
use crate::classifier::{ErrorClassifier, ErrorReport, ErrorSeverity, ErrorType};
use crate::common::{BoundedLog, Timestamped};
use crate::config::AnalyticsConfig;
use crate::patterns::BackgroundTasks;
use crate::storage::snapshot::{Retention, SnapshotStore, ERROR_INSIGHTS, ERROR_PATTERNS, ERROR_TRENDS};

pub use normalize::{normalize_message, signature};

/// Messages listed per trend bucket
const TOP_MESSAGES: usize = 5;

/// Ratio between the two latest hourly buckets that counts as a change
const TREND_IMPROVING_RATIO: f64 = 0.8;
const TREND_DEGRADING_RATIO: f64 = 1.2;

/// A cluster of reports sharing one normalized message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPattern {
    pub id: String,
    pub signature: String,
    pub pattern: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub frequency: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub affected_users: BTreeSet<String>,
    pub severity: ErrorSeverity,
    pub resolved: bool,
    pub sample_message: String,
    pub components: BTreeSet<String>,
}

impl Timestamped for ErrorPattern {
    fn timestamp(&self) -> DateTime<Utc> {
        self.last_seen
    }
}

/// Hourly aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorTrend {
    pub hour: DateTime<Utc>,
    pub count: u64,
    pub by_type: BTreeMap<ErrorType, u64>,
    pub by_severity: BTreeMap<ErrorSeverity, u64>,
    pub top_messages: Vec<(String, u64)>,
    pub affected_users: usize,
    #[serde(default, with = "humantime_serde")]
    pub avg_resolution_time: Option<Duration>,
}

/// Running totals behind one [`ErrorTrend`]. Passes add to it, never replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HourlyBucket {
    hour: DateTime<Utc>,
    count: u64,
    by_type: BTreeMap<ErrorType, u64>,
    by_severity: BTreeMap<ErrorSeverity, u64>,
    messages: HashMap<String, u64>,
    users: BTreeSet<String>,
    #[serde(with = "humantime_serde")]
    resolution_total: Duration,
    resolved: u32,
}

impl HourlyBucket {
    fn new(hour: DateTime<Utc>) -> Self {
        Self {
            hour,
            count: 0,
            by_type: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            messages: HashMap::new(),
            users: BTreeSet::new(),
            resolution_total: Duration::ZERO,
            resolved: 0,
        }
    }

    fn add(&mut self, report: &ErrorReport) {
        self.count += 1;
        *self.by_type.entry(report.error_type).or_insert(0) += 1;
        *self.by_severity.entry(report.severity).or_insert(0) += 1;
        *self.messages.entry(report.message.clone()).or_insert(0) += 1;
        if let Some(user) = report.context.subject() {
            self.users.insert(user.to_string());
        }
    }

    fn add_resolution(&mut self, took: Duration) {
        self.resolution_total += took;
        self.resolved += 1;
    }

    fn trend(&self) -> ErrorTrend {
        let mut top_messages: Vec<(String, u64)> =
            self.messages.iter().map(|(m, n)| (m.clone(), *n)).collect();
        top_messages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_messages.truncate(TOP_MESSAGES);

        ErrorTrend {
            hour: self.hour,
            count: self.count,
            by_type: self.by_type.clone(),
            by_severity: self.by_severity.clone(),
            top_messages,
            affected_users: self.users.len(),
            avg_resolution_time: (self.resolved > 0).then(|| self.resolution_total / self.resolved),
        }
    }
}

impl Timestamped for HourlyBucket {
    fn timestamp(&self) -> DateTime<Utc> {
        self.hour
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Spike,
    Pattern,
    Correlation,
    Degradation,
}

impl std::fmt::Display for InsightKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InsightKind::Spike => "spike",
            InsightKind::Pattern => "pattern",
            InsightKind::Correlation => "correlation",
            InsightKind::Degradation => "degradation",
        };
        f.write_str(s)
    }
}

/// Derived alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInsight {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub severity: ErrorSeverity,
    pub title: String,
    pub description: String,
    pub recommendations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Timestamped for ErrorInsight {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub score: u8,
    pub status: HealthStatus,
    pub trend: TrendDirection,
    /// Errors per minute over the analysis window
    pub error_rate: f64,
    pub critical_errors: usize,
    pub active_patterns: usize,
    pub affected_users: usize,
    pub measured_at: DateTime<Utc>,
}

/// Result of one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub ingested: usize,
    pub new_insights: Vec<ErrorInsight>,
    pub health: SystemHealth,
}

struct AnalyticsState {
    patterns: HashMap<String, ErrorPattern>,
    trends: BTreeMap<DateTime<Utc>, HourlyBucket>,
    insights: BoundedLog<ErrorInsight>,
    /// Report ids already folded into patterns, with their timestamps
    ingested: HashMap<String, DateTime<Utc>>,
    /// Resolved report ids already counted toward a bucket's resolution time
    resolutions: HashMap<String, DateTime<Utc>>,
    /// Dedupe keys of raised insights
    announced: HashMap<String, DateTime<Utc>>,
    /// Reports seen by the latest pass, used when no classifier is attached
    last_batch: Vec<ErrorReport>,
}

/// Batch analytics over error reports
pub struct ErrorAnalyticsEngine {
    config: AnalyticsConfig,
    clock: Arc<dyn Clock>,
    source: Option<Arc<ErrorClassifier>>,
    snapshots: SnapshotStore,
    tasks: BackgroundTasks,
    state: Mutex<AnalyticsState>,
}

impl ErrorAnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ErrorAnalyticsEngineBuilder {
        ErrorAnalyticsEngineBuilder::default()
    }

    /// Run [`Self::run_analysis`] every `analysis_interval`
    pub fn start(self: &Arc<Self>) -> bool {
        let engine = self.clone();
        self.tasks.spawn_periodic("analytics:pass", self.config.analysis_interval, move || {
            let engine = engine.clone();
            async move {
                engine.run_analysis();
            }
        })
    }

    /// Analyze the attached classifier's log
    pub fn run_analysis(&self) -> Option<AnalysisSummary> {
        let Some(source) = &self.source else {
            warn!("No error source attached, skipping analysis pass");
            return None;
        };
        Some(self.analyze(&source.reports()))
    }

    pub fn analyze(&self, reports: &[ErrorReport]) -> AnalysisSummary {
        self.analyze_at(reports, self.clock.now())
    }

    /// Analyze `reports` as of `now`
    pub fn analyze_at(&self, reports: &[ErrorReport], now: DateTime<Utc>) -> AnalysisSummary {
        let (ingested, new_insights) = {
            let mut state = self.state.lock();
            let fresh = self.cluster(&mut state, reports);
            let ingested = fresh.len();
            self.bucket(&mut state, &fresh, reports);
            let new_insights = self.generate_insights(&mut state, reports, now);
            self.prune(&mut state, now);
            state.last_batch = reports.to_vec();
            (ingested, new_insights)
        };

        for insight in &new_insights {
            info!(kind = %insight.kind, severity = %insight.severity, "{}", insight.title);
        }
        debug!(ingested, insights = new_insights.len(), "Analysis pass finished");
        self.persist(now);

        AnalysisSummary {
            ingested,
            new_insights,
            health: self.health_at(reports, now),
        }
    }

    /// Fold unseen reports into patterns. Returns the reports taken in.
    fn cluster<'a>(&self, state: &mut AnalyticsState, reports: &'a [ErrorReport]) -> Vec<&'a ErrorReport> {
        let mut fresh = Vec::new();
        for report in reports {
            if state.ingested.contains_key(&report.id) {
                continue;
            }
            state.ingested.insert(report.id.clone(), report.timestamp);
            fresh.push(report);

            let key = signature(report.error_type, &report.message);
            let pattern = state.patterns.entry(key.clone()).or_insert_with(|| ErrorPattern {
                id: uuid::Uuid::new_v4().to_string(),
                signature: key.clone(),
                pattern: normalize_message(&report.message),
                error_type: report.error_type,
                frequency: 0,
                first_seen: report.timestamp,
                last_seen: report.timestamp,
                affected_users: BTreeSet::new(),
                severity: report.severity,
                resolved: false,
                sample_message: report.message.clone(),
                components: BTreeSet::new(),
            });

            pattern.frequency += 1;
            pattern.first_seen = pattern.first_seen.min(report.timestamp);
            if report.timestamp >= pattern.last_seen {
                pattern.last_seen = report.timestamp;
                // A recurrence reopens a resolved pattern
                pattern.resolved = false;
            }
            pattern.severity = pattern.severity.max(report.severity);
            if let Some(user) = report.context.subject() {
                pattern.affected_users.insert(user.to_string());
            }
            if let Some(component) = &report.context.component {
                pattern.components.insert(component.clone());
            }
        }

        let max = self.config.max_patterns;
        if state.patterns.len() > max {
            let mut by_age: Vec<(String, DateTime<Utc>)> =
                state.patterns.iter().map(|(k, p)| (k.clone(), p.last_seen)).collect();
            by_age.sort_by_key(|(_, seen)| *seen);
            let excess = state.patterns.len() - max;
            for (key, _) in by_age.into_iter().take(excess) {
                state.patterns.remove(&key);
            }
        }
        fresh
    }

    /// Add `fresh` reports to their hourly buckets, and count resolutions
    /// of any report in `reports` not counted before
    fn bucket(&self, state: &mut AnalyticsState, fresh: &[&ErrorReport], reports: &[ErrorReport]) {
        for report in fresh {
            let hour = hour_of(report.timestamp);
            state
                .trends
                .entry(hour)
                .or_insert_with(|| HourlyBucket::new(hour))
                .add(report);
        }

        for report in reports {
            let Some(took) = report.resolution_time() else {
                continue;
            };
            if state.resolutions.contains_key(&report.id) {
                continue;
            }
            if let Some(bucket) = state.trends.get_mut(&hour_of(report.timestamp)) {
                bucket.add_resolution(took);
                state.resolutions.insert(report.id.clone(), report.timestamp);
            }
        }

        while state.trends.len() > self.config.max_trends {
            if state.trends.pop_first().is_none() {
                break;
            }
        }
    }

    fn generate_insights(
        &self,
        state: &mut AnalyticsState,
        reports: &[ErrorReport],
        now: DateTime<Utc>,
    ) -> Vec<ErrorInsight> {
        let window_start = now - to_chrono(self.config.window);
        let recent: Vec<&ErrorReport> = reports
            .iter()
            .filter(|r| r.timestamp > window_start && r.timestamp <= now)
            .collect();
        let mut raised = Vec::new();

        // Spike: busiest minute against the window's per-minute average
        let mut per_minute: BTreeMap<i64, usize> = BTreeMap::new();
        for report in &recent {
            *per_minute.entry(report.timestamp.timestamp() / 60).or_insert(0) += 1;
        }
        if let Some((&minute, &peak)) = per_minute.iter().max_by_key(|(_, count)| **count) {
            let window_minutes = (self.config.window.as_secs() / 60).max(1) as f64;
            let average = recent.len() as f64 / window_minutes;
            if peak > self.config.spike_min_errors && peak as f64 > self.config.spike_multiplier * average {
                raised.push((
                    format!("spike:{}", minute),
                    self.insight(
                        InsightKind::Spike,
                        ErrorSeverity::High,
                        "Error spike detected",
                        format!(
                            "{} errors within one minute against an average of {:.1} per minute",
                            peak, average
                        ),
                        &[
                            "Check recent deployments and dependency status",
                            "Review the most frequent error patterns",
                        ],
                        now,
                    ),
                ));
            }
        }

        // New patterns first seen inside the window
        for pattern in state.patterns.values() {
            if pattern.first_seen > window_start && pattern.frequency >= self.config.new_pattern_min_frequency {
                raised.push((
                    format!("pattern:{}", pattern.id),
                    self.insight(
                        InsightKind::Pattern,
                        pattern.severity,
                        format!("New error pattern: {}", pattern.error_type.title()),
                        format!(
                            "\"{}\" occurred {} times, affecting {} user(s)",
                            pattern.sample_message,
                            pattern.frequency,
                            pattern.affected_users.len()
                        ),
                        &["Investigate the root cause of this new failure mode"],
                        now,
                    ),
                ));
            }
        }

        // Correlation: one user hitting many kinds of failure
        let mut per_user: HashMap<&str, (HashSet<ErrorType>, usize)> = HashMap::new();
        for report in &recent {
            if let Some(user) = report.context.subject() {
                let entry = per_user.entry(user).or_default();
                entry.0.insert(report.error_type);
                entry.1 += 1;
            }
        }
        for (user, (types, total)) in per_user {
            if types.len() >= self.config.correlation_min_types && total >= self.config.correlation_min_errors {
                raised.push((
                    format!("correlation:{}:{}", user, hour_of(now).timestamp()),
                    self.insight(
                        InsightKind::Correlation,
                        ErrorSeverity::Medium,
                        "Correlated errors for one user",
                        format!("User {} hit {} errors across {} error types", user, total, types.len()),
                        &[
                            "Check the user's wallet and session state",
                            "Look for a shared upstream cause",
                        ],
                        now,
                    ),
                ));
            }
        }

        // Degradation: last hour against the previous day's hourly average
        let last_hour = recent_count(reports, now - chrono::Duration::hours(1), now);
        let baseline_start = now - chrono::Duration::hours(25);
        let baseline = recent_count(reports, baseline_start, now - chrono::Duration::hours(1)) as f64 / 24.0;
        if baseline > 0.0 && last_hour as f64 > self.config.degradation_multiplier * baseline {
            raised.push((
                format!("degradation:{}", hour_of(now).timestamp()),
                self.insight(
                    InsightKind::Degradation,
                    ErrorSeverity::High,
                    "Error rate degrading",
                    format!(
                        "{} errors in the last hour against a daily average of {:.1} per hour",
                        last_hour, baseline
                    ),
                    &["Compare with the previous release", "Check upstream service health"],
                    now,
                ),
            ));
        }

        let mut fresh = Vec::new();
        for (key, insight) in raised {
            if state.announced.contains_key(&key) {
                continue;
            }
            state.announced.insert(key, now);
            state.insights.push(insight.clone());
            fresh.push(insight);
        }
        fresh
    }

    fn insight(
        &self,
        kind: InsightKind,
        severity: ErrorSeverity,
        title: impl Into<String>,
        description: String,
        recommendations: &[&str],
        now: DateTime<Utc>,
    ) -> ErrorInsight {
        ErrorInsight {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity,
            title: title.into(),
            description,
            recommendations: recommendations.iter().map(|r| r.to_string()).collect(),
            timestamp: now,
        }
    }

    fn prune(&self, state: &mut AnalyticsState, now: DateTime<Utc>) {
        let horizon = now - chrono::Duration::hours(self.config.max_trends as i64);
        state.ingested.retain(|_, seen| *seen >= horizon);
        state.resolutions.retain(|_, seen| *seen >= horizon);
        let window_start = now - to_chrono(self.config.window);
        state.announced.retain(|key, raised| {
            // Pattern insights are raised once per pattern
            (key.starts_with("pattern:") && *raised >= horizon) || *raised >= window_start
        });
    }

    /// Composite health of the current error log
    pub fn get_system_health(&self) -> SystemHealth {
        let now = self.clock.now();
        match &self.source {
            Some(source) => self.health_at(&source.reports(), now),
            None => {
                let batch = self.state.lock().last_batch.clone();
                self.health_at(&batch, now)
            }
        }
    }

    /// Health of `reports` as of `now`
    pub fn health_at(&self, reports: &[ErrorReport], now: DateTime<Utc>) -> SystemHealth {
        let window_start = now - to_chrono(self.config.window);
        let recent: Vec<&ErrorReport> = reports
            .iter()
            .filter(|r| r.timestamp > window_start && r.timestamp <= now)
            .collect();

        let window_minutes = (self.config.window.as_secs_f64() / 60.0).max(1.0);
        let error_rate = recent.len() as f64 / window_minutes;
        let critical_errors = recent
            .iter()
            .filter(|r| r.severity == ErrorSeverity::Critical && !r.resolved)
            .count();
        let affected_users = recent
            .iter()
            .filter_map(|r| r.context.subject())
            .collect::<HashSet<_>>()
            .len();

        let state = self.state.lock();
        let active_patterns = state
            .patterns
            .values()
            .filter(|p| !p.resolved && p.last_seen > window_start)
            .count();
        let trend = trend_direction(&state.trends);
        drop(state);

        let penalty = (error_rate * 10.0).min(40.0)
            + (critical_errors as f64 * 10.0).min(30.0)
            + (active_patterns as f64 * 5.0).min(20.0)
            + (affected_users as f64 * 2.0).min(10.0);
        let score = (100.0 - penalty).round().clamp(0.0, 100.0) as u8;
        let status = if score >= 80 {
            HealthStatus::Healthy
        } else if score >= 50 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Critical
        };

        SystemHealth {
            score,
            status,
            trend,
            error_rate,
            critical_errors,
            active_patterns,
            affected_users,
            measured_at: now,
        }
    }

    /// Most frequent patterns first
    pub fn get_error_patterns(&self, limit: usize) -> Vec<ErrorPattern> {
        let mut patterns: Vec<ErrorPattern> = self.state.lock().patterns.values().cloned().collect();
        patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| b.last_seen.cmp(&a.last_seen)));
        patterns.truncate(limit);
        patterns
    }

    /// Latest `limit` hourly buckets, oldest first
    pub fn get_error_trends(&self, limit: usize) -> Vec<ErrorTrend> {
        let state = self.state.lock();
        let skip = state.trends.len().saturating_sub(limit);
        state.trends.values().skip(skip).map(HourlyBucket::trend).collect()
    }

    /// Newest insights first
    pub fn get_insights(&self, limit: usize) -> Vec<ErrorInsight> {
        self.state.lock().insights.latest(limit)
    }

    /// Mark a pattern resolved by id
    pub fn resolve_pattern(&self, id: &str) -> bool {
        let resolved = {
            let mut state = self.state.lock();
            match state.patterns.values_mut().find(|p| p.id == id) {
                Some(pattern) => {
                    pattern.resolved = true;
                    true
                }
                None => false,
            }
        };
        if resolved {
            info!(pattern = id, "Error pattern resolved");
            self.persist(self.clock.now());
        }
        resolved
    }

    /// Load persisted patterns, trends and insights
    pub fn restore(&self) -> usize {
        let now = self.clock.now();
        let history = Some(Duration::from_secs(self.config.max_trends as u64 * 3600));
        let patterns: Vec<ErrorPattern> = self.snapshots.load_collection(
            ERROR_PATTERNS,
            Retention::new(self.config.max_patterns, history),
            now,
        );
        let trends: Vec<HourlyBucket> =
            self.snapshots
                .load_collection(ERROR_TRENDS, Retention::new(self.config.max_trends, history), now);
        let insights: Vec<ErrorInsight> =
            self.snapshots
                .load_collection(ERROR_INSIGHTS, Retention::new(self.config.max_insights, history), now);

        let count = patterns.len() + trends.len() + insights.len();
        let mut state = self.state.lock();
        for pattern in patterns {
            state.announced.insert(format!("pattern:{}", pattern.id), now);
            state.patterns.insert(pattern.signature.clone(), pattern);
        }
        for trend in trends {
            state.trends.insert(trend.hour, trend);
        }
        state.insights.extend(insights);
        count
    }

    fn persist(&self, now: DateTime<Utc>) {
        if !self.snapshots.is_persistent() {
            return;
        }
        let (patterns, trends, insights) = {
            let state = self.state.lock();
            let mut patterns: Vec<ErrorPattern> = state.patterns.values().cloned().collect();
            patterns.sort_by_key(|p| p.last_seen);
            let trends: Vec<HourlyBucket> = state.trends.values().cloned().collect();
            (patterns, trends, state.insights.to_vec())
        };
        let history = Some(Duration::from_secs(self.config.max_trends as u64 * 3600));
        self.snapshots.save_collection(
            ERROR_PATTERNS,
            &patterns,
            Retention::new(self.config.max_patterns, history),
            now,
        );
        self.snapshots
            .save_collection(ERROR_TRENDS, &trends, Retention::new(self.config.max_trends, history), now);
        self.snapshots.save_collection(
            ERROR_INSIGHTS,
            &insights,
            Retention::new(self.config.max_insights, history),
            now,
        );
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }
}

impl std::fmt::Debug for ErrorAnalyticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ErrorAnalyticsEngine")
            .field("patterns", &state.patterns.len())
            .field("trends", &state.trends.len())
            .field("insights", &state.insights.len())
            .finish()
    }
}

fn hour_of(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(chrono::Duration::hours(1))
        .unwrap_or(timestamp)
}

fn recent_count(reports: &[ErrorReport], from: DateTime<Utc>, to: DateTime<Utc>) -> usize {
    reports
        .iter()
        .filter(|r| r.timestamp > from && r.timestamp <= to)
        .count()
}

fn trend_direction(trends: &BTreeMap<DateTime<Utc>, HourlyBucket>) -> TrendDirection {
    let mut latest = trends.values().rev();
    let (Some(current), Some(previous)) = (latest.next(), latest.next()) else {
        return TrendDirection::Stable;
    };
    if previous.count == 0 {
        return if current.count > 0 {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        };
    }
    let ratio = current.count as f64 / previous.count as f64;
    if ratio < TREND_IMPROVING_RATIO {
        TrendDirection::Improving
    } else if ratio > TREND_DEGRADING_RATIO {
        TrendDirection::Degrading
    } else {
        TrendDirection::Stable
    }
}

pub struct ErrorAnalyticsEngineBuilder {
    config: AnalyticsConfig,
    clock: Arc<dyn Clock>,
    source: Option<Arc<ErrorClassifier>>,
    snapshots: SnapshotStore,
    tasks: BackgroundTasks,
}

impl Default for ErrorAnalyticsEngineBuilder {
    fn default() -> Self {
        Self {
            config: AnalyticsConfig::default(),
            clock: SystemClock::shared(),
            source: None,
            snapshots: SnapshotStore::in_memory(),
            tasks: BackgroundTasks::new(),
        }
    }
}

impl ErrorAnalyticsEngineBuilder {
    pub fn config(mut self, config: AnalyticsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Classifier whose log feeds periodic passes and health checks
    pub fn source(mut self, classifier: Arc<ErrorClassifier>) -> Self {
        self.source = Some(classifier);
        self
    }

    pub fn snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn build(self) -> ErrorAnalyticsEngine {
        let max_insights = self.config.max_insights;
        ErrorAnalyticsEngine {
            config: self.config,
            clock: self.clock,
            source: self.source,
            snapshots: self.snapshots,
            tasks: self.tasks,
            state: Mutex::new(AnalyticsState {
                patterns: HashMap::new(),
                trends: BTreeMap::new(),
                insights: BoundedLog::new(max_insights),
                ingested: HashMap::new(),
                resolutions: HashMap::new(),
                announced: HashMap::new(),
                last_batch: Vec::new(),
            }),
        }
    }
}
