//! Error classification
//!
//! ```text
//!   raw failure ──► RawError ──► RawSignal ──► rules::classify ──► ErrorReport
//!   (JSON/null,                 (lowercased,    (ordered            │
//!    io, reqwest)                codes, status)  predicates)        ├─► bounded log + persistence
//!                                                                   ├─► security sink
//!                                                                   ├─► notification sink
//!                                                                   └─► recovery probe (tracked task)
//! ```
//!
//! [`ErrorClassifier::handle_error`] never fails and never blocks: storage and
//! notification failures are logged and swallowed, and recovery probes run as
//! background tasks.

pub mod rules;
pub mod signal;
pub mod types;

pub use signal::{ErrorCode, RawError, RawSignal};
pub use types::{ErrorContext, ErrorReport, ErrorSeverity, ErrorStats, ErrorType};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::abstractions::{
    to_chrono, Clock, Notification, NotificationLevel, NotificationSink, SecurityEvent, SecurityEventKind,
    SecurityEventSink, SystemClock,
};
use crate::common::BoundedLog;
use crate::config::ClassifierConfig;
use crate::patterns::BackgroundTasks;
use crate::storage::snapshot::{Retention, SnapshotStore, ERROR_REPORTS};

/// Host-provided recovery actions used by the classifier's probes
#[async_trait]
pub trait RecoveryHooks: Send + Sync {
    /// Cheap connectivity check against the backend
    async fn ping(&self) -> Result<(), RawError>;

    /// Force a credential/session refresh
    async fn refresh_credentials(&self) -> Result<(), RawError>;

    /// Terminal fallback after a failed refresh
    async fn logout(&self);
}

struct ClassifierState {
    config: ClassifierConfig,
    clock: Arc<dyn Clock>,
    reports: Mutex<BoundedLog<ErrorReport>>,
    snapshots: SnapshotStore,
}

impl ClassifierState {
    fn retention(&self) -> Retention {
        Retention::new(self.config.persisted_reports, Some(self.config.max_age))
    }

    fn persist(&self) {
        if !self.snapshots.is_persistent() {
            return;
        }
        let reports = self.reports.lock().to_vec();
        self.snapshots
            .save_collection(ERROR_REPORTS, &reports, self.retention(), self.clock.now());
    }

    /// Apply a probe outcome to the stored report
    fn record_probe(&self, id: &str, recovered: bool) {
        let now = self.clock.now();
        let updated = {
            let mut reports = self.reports.lock();
            let updated = match reports.iter_mut().find(|r| r.id == id) {
                Some(report) => {
                    report.retry_count += 1;
                    if recovered {
                        report.mark_resolved(now);
                    }
                    true
                }
                None => false,
            };
            updated
        };
        if updated {
            self.persist();
        }
    }
}

/// Classifies failures and keeps the recent error log
pub struct ErrorClassifier {
    state: Arc<ClassifierState>,
    notifier: Option<Arc<dyn NotificationSink>>,
    security: Option<Arc<dyn SecurityEventSink>>,
    hooks: Option<Arc<dyn RecoveryHooks>>,
    tasks: BackgroundTasks,
}

impl ErrorClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ErrorClassifierBuilder {
        ErrorClassifierBuilder::default()
    }

    /// Classify, record and react to a failure. Never fails.
    pub fn handle_error(&self, raw: impl Into<RawError>, context: ErrorContext, show_toast: bool) -> ErrorReport {
        let raw = raw.into();
        let now = self.state.clock.now();
        let report = rules::build_report(&raw, &context, now);

        log_report(&report);
        self.record(report.clone());
        self.forward_security_event(&report);

        if show_toast && self.state.config.show_notifications {
            self.notify(&report);
        }
        if report.retryable {
            self.launch_recovery(&report);
        }
        report
    }

    /// Classify without recording or side effects
    pub fn classify(&self, raw: &RawError, context: &ErrorContext) -> ErrorReport {
        rules::build_report(raw, context, self.state.clock.now())
    }

    fn record(&self, report: ErrorReport) {
        let cutoff = report.timestamp - to_chrono(self.state.config.max_age);
        {
            let mut reports = self.state.reports.lock();
            reports.push(report);
            let pruned = reports.prune_before(cutoff);
            if pruned > 0 {
                debug!(pruned, "Pruned expired error reports");
            }
        }
        self.state.persist();
    }

    fn forward_security_event(&self, report: &ErrorReport) {
        let Some(sink) = &self.security else {
            return;
        };
        let kind = match report.error_type {
            ErrorType::Authentication => SecurityEventKind::AuthenticationFailure,
            ErrorType::SmartContract => SecurityEventKind::ContractFailure,
            ErrorType::Wallet => SecurityEventKind::WalletFailure,
            _ => return,
        };
        sink.record(SecurityEvent {
            kind,
            severity: report.severity,
            description: format!("{}: {}", report.error_type, report.message),
            context: report.context.clone(),
            timestamp: report.timestamp,
        });
    }

    fn notify(&self, report: &ErrorReport) {
        let Some(sink) = &self.notifier else {
            return;
        };
        let (level, duration) = match report.severity {
            ErrorSeverity::Critical => (NotificationLevel::Error, None),
            ErrorSeverity::High => (NotificationLevel::Error, Some(Duration::from_secs(8))),
            ErrorSeverity::Medium => (NotificationLevel::Warning, Some(Duration::from_secs(5))),
            ErrorSeverity::Low => (NotificationLevel::Info, Some(Duration::from_secs(3))),
        };
        sink.notify(
            Notification::new(level, report.error_type.title(), report.user_friendly_message.clone())
                .with_duration(duration),
        );
    }

    fn launch_recovery(&self, report: &ErrorReport) {
        let Some(hooks) = self.hooks.clone() else {
            return;
        };
        let kind = match report.error_type {
            ErrorType::Network | ErrorType::Timeout | ErrorType::RateLimit | ErrorType::Api => ProbeKind::Ping,
            ErrorType::Authentication if report.retry_count == 0 => ProbeKind::Refresh,
            _ => return,
        };

        let state = self.state.clone();
        let id = report.id.clone();
        let timeout = state.config.probe_timeout;
        let spawned = self.tasks.spawn(format!("recovery:{}", id), async move {
            let recovered = match kind {
                ProbeKind::Ping => matches!(tokio::time::timeout(timeout, hooks.ping()).await, Ok(Ok(()))),
                ProbeKind::Refresh => {
                    match tokio::time::timeout(timeout, hooks.refresh_credentials()).await {
                        Ok(Ok(())) => true,
                        outcome => {
                            warn!(report = %id, ?outcome, "Credential refresh failed, logging out");
                            hooks.logout().await;
                            false
                        }
                    }
                }
            };
            debug!(report = %id, recovered, "Recovery probe finished");
            state.record_probe(&id, recovered);
        });
        if !spawned {
            debug!(report = %report.id, "Recovery probe not launched");
        }
    }

    /// Newest `limit` reports, newest first
    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorReport> {
        self.state.reports.lock().latest(limit)
    }

    pub fn errors_by_type(&self, error_type: ErrorType) -> Vec<ErrorReport> {
        self.state
            .reports
            .lock()
            .iter()
            .filter(|r| r.error_type == error_type)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ErrorReport> {
        self.state.reports.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Mark a report resolved. Returns `false` for unknown ids.
    pub fn resolve_error(&self, id: &str) -> bool {
        let now = self.state.clock.now();
        let found = {
            let mut reports = self.state.reports.lock();
            let found = match reports.iter_mut().find(|r| r.id == id) {
                Some(report) => {
                    report.mark_resolved(now);
                    true
                }
                None => false,
            };
            found
        };
        if found {
            self.state.persist();
        }
        found
    }

    pub fn clear_errors(&self) {
        self.state.reports.lock().clear();
        self.state.snapshots.remove(ERROR_REPORTS);
        info!("Cleared error reports");
    }

    pub fn error_stats(&self) -> ErrorStats {
        let reports = self.state.reports.lock();
        let mut stats = ErrorStats::default();
        for report in reports.iter() {
            stats.total += 1;
            stats.resolved += usize::from(report.resolved);
            stats.retryable += usize::from(report.retryable);
            *stats.by_type.entry(report.error_type).or_default() += 1;
            *stats.by_severity.entry(report.severity).or_default() += 1;
        }
        stats
    }

    /// Snapshot of the whole log, oldest first
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.state.reports.lock().to_vec()
    }

    /// Reload persisted reports, replacing the in-memory log
    pub fn restore(&self) -> usize {
        let now = self.state.clock.now();
        let restored: Vec<ErrorReport> = self
            .state
            .snapshots
            .load_collection(ERROR_REPORTS, self.state.retention(), now);
        let count = restored.len();
        {
            let mut reports = self.state.reports.lock();
            reports.clear();
            reports.extend(restored);
        }
        if count > 0 {
            info!(count, "Restored error reports");
        }
        count
    }

    /// Await every in-flight recovery probe
    pub async fn wait_for_recovery(&self) {
        self.tasks.wait_idle().await;
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.state.config
    }
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("reports", &self.state.reports.lock().len())
            .field("snapshots", &self.state.snapshots)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum ProbeKind {
    Ping,
    Refresh,
}

fn log_report(report: &ErrorReport) {
    match report.severity {
        ErrorSeverity::Critical => error!(
            id = %report.id, error_type = %report.error_type, component = ?report.context.component,
            "Critical error: {}", report.message
        ),
        ErrorSeverity::High => warn!(
            id = %report.id, error_type = %report.error_type, component = ?report.context.component,
            "{}", report.message
        ),
        _ => debug!(
            id = %report.id, error_type = %report.error_type, severity = %report.severity,
            "{}", report.message
        ),
    }
}

/// Builder for [`ErrorClassifier`]
#[derive(Default)]
pub struct ErrorClassifierBuilder {
    config: ClassifierConfig,
    clock: Option<Arc<dyn Clock>>,
    snapshots: SnapshotStore,
    notifier: Option<Arc<dyn NotificationSink>>,
    security: Option<Arc<dyn SecurityEventSink>>,
    hooks: Option<Arc<dyn RecoveryHooks>>,
    tasks: Option<BackgroundTasks>,
}

impl ErrorClassifierBuilder {
    pub fn config(mut self, config: ClassifierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn security_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.security = Some(sink);
        self
    }

    pub fn recovery_hooks(mut self, hooks: Arc<dyn RecoveryHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn build(self) -> ErrorClassifier {
        let reports = BoundedLog::new(self.config.max_reports);
        ErrorClassifier {
            state: Arc::new(ClassifierState {
                config: self.config,
                clock: self.clock.unwrap_or_else(SystemClock::shared),
                reports: Mutex::new(reports),
                snapshots: self.snapshots,
            }),
            notifier: self.notifier,
            security: self.security,
            hooks: self.hooks,
            tasks: self.tasks.unwrap_or_default(),
        }
    }
}
