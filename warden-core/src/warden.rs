//! Registry object wiring every component together
//!
//! A [`Warden`] owns one instance of each component, all sharing a clock,
//! a snapshot store, the notification and security-event sinks, and one
//! [`BackgroundTasks`] set. Consumers receive it (or the parts they need)
//! by injection; nothing here is global.

use std::sync::Arc;
use tracing::{info, warn};

use crate::abstractions::{
    Clock, NotificationSink, PersistencePort, SecurityEventSink, SystemClock, TracingNotifier,
};
use crate::analytics::ErrorAnalyticsEngine;
use crate::classifier::{ErrorClassifier, RecoveryHooks};
use crate::config::WardenConfig;
use crate::error::WardenResult;
use crate::network_monitor::{ConnectivityProbe, HttpProbe, NetworkRecoveryMonitor, RecoveryActions};
use crate::patterns::{BackgroundTasks, CircuitBreakerRegistry};
use crate::storage::{RedbStore, SnapshotStore};
use crate::threat_detector::ThreatDetector;
use crate::transaction_retry::TransactionRetryEngine;

/// How many records each component loaded in [`Warden::restore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub error_reports: usize,
    pub circuit_breakers: usize,
    pub transaction_retries: usize,
    pub analytics_records: usize,
    pub threat_block: bool,
}

pub struct Warden {
    config: WardenConfig,
    clock: Arc<dyn Clock>,
    tasks: BackgroundTasks,
    snapshots: SnapshotStore,
    classifier: Arc<ErrorClassifier>,
    breakers: CircuitBreakerRegistry,
    retries: Arc<TransactionRetryEngine>,
    network: NetworkRecoveryMonitor,
    threats: ThreatDetector,
    analytics: Arc<ErrorAnalyticsEngine>,
}

impl Warden {
    /// Build with defaults for every collaborator
    pub fn new(config: WardenConfig) -> WardenResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: WardenConfig) -> WardenBuilder {
        WardenBuilder::new(config)
    }

    /// Reload persisted state into every component
    pub fn restore(&self) -> RestoreSummary {
        let summary = RestoreSummary {
            error_reports: self.classifier.restore(),
            circuit_breakers: self.breakers.restore(),
            transaction_retries: self.retries.restore(),
            analytics_records: self.analytics.restore(),
            threat_block: self.threats.restore(),
        };
        info!(?summary, "Restored persisted state");
        summary
    }

    /// Start the periodic background work
    pub fn start(&self) {
        let started = [
            ("network", self.network.start()),
            ("threat", self.threats.start()),
            ("analytics", self.analytics.start()),
        ];
        for (component, ok) in started {
            if !ok {
                warn!(component, "Background task not started, already shut down");
            }
        }
        info!(tasks = ?self.tasks.active(), "Warden started");
    }

    /// Stop background work and wait for it to finish
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
        self.breakers.persist();
        info!("Warden stopped");
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn retries(&self) -> &Arc<TransactionRetryEngine> {
        &self.retries
    }

    pub fn network(&self) -> &NetworkRecoveryMonitor {
        &self.network
    }

    pub fn threats(&self) -> &ThreatDetector {
        &self.threats
    }

    pub fn analytics(&self) -> &Arc<ErrorAnalyticsEngine> {
        &self.analytics
    }
}

impl std::fmt::Debug for Warden {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warden")
            .field("snapshots", &self.snapshots)
            .field("tasks", &self.tasks)
            .field("breakers", &self.breakers.names())
            .finish()
    }
}

/// Builder for [`Warden`]
pub struct WardenBuilder {
    config: WardenConfig,
    clock: Option<Arc<dyn Clock>>,
    persistence: Option<Arc<dyn PersistencePort>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    security_sink: Option<Arc<dyn SecurityEventSink>>,
    recovery_hooks: Option<Arc<dyn RecoveryHooks>>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    recovery_actions: Option<Arc<dyn RecoveryActions>>,
}

impl WardenBuilder {
    pub fn new(config: WardenConfig) -> Self {
        Self {
            config,
            clock: None,
            persistence: None,
            notifier: None,
            security_sink: None,
            recovery_hooks: None,
            probe: None,
            recovery_actions: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Persistence port; overrides `storage.path`
    pub fn persistence(mut self, port: Arc<dyn PersistencePort>) -> Self {
        self.persistence = Some(port);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn security_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.security_sink = Some(sink);
        self
    }

    pub fn recovery_hooks(mut self, hooks: Arc<dyn RecoveryHooks>) -> Self {
        self.recovery_hooks = Some(hooks);
        self
    }

    /// Connectivity probe; an [`HttpProbe`] when unset
    pub fn probe(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn recovery_actions(mut self, actions: Arc<dyn RecoveryActions>) -> Self {
        self.recovery_actions = Some(actions);
        self
    }

    pub fn build(self) -> WardenResult<Warden> {
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let tasks = BackgroundTasks::new();

        let persistence = match (self.persistence, &config.storage.path) {
            (Some(port), _) => Some(port),
            (None, Some(path)) => {
                let store: Arc<dyn PersistencePort> = Arc::new(RedbStore::open(path)?);
                Some(store)
            }
            (None, None) => None,
        };
        let snapshots = SnapshotStore::new(persistence, config.storage.namespace.clone());
        let notifier: Arc<dyn NotificationSink> = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));

        let mut classifier = ErrorClassifier::builder()
            .config(config.classifier.clone())
            .clock(clock.clone())
            .snapshots(snapshots.clone())
            .notifier(notifier.clone())
            .tasks(tasks.clone());
        if let Some(sink) = &self.security_sink {
            classifier = classifier.security_sink(sink.clone());
        }
        if let Some(hooks) = self.recovery_hooks {
            classifier = classifier.recovery_hooks(hooks);
        }
        let classifier = Arc::new(classifier.build());

        let breakers = CircuitBreakerRegistry::with_parts(
            config.circuit_breaker.clone(),
            config.circuit_breakers.clone(),
            clock.clone(),
            Some(classifier.clone()),
            snapshots.clone(),
        );

        let retries = Arc::new(
            TransactionRetryEngine::builder()
                .config(config.transaction_retry.clone())
                .clock(clock.clone())
                .classifier(classifier.clone())
                .notifier(notifier.clone())
                .snapshots(snapshots.clone())
                .build(),
        );

        let probe: Arc<dyn ConnectivityProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpProbe::new(config.network.probe_timeout)?),
        };
        let mut network = NetworkRecoveryMonitor::builder(probe)
            .config(config.network.clone())
            .clock(clock.clone())
            .classifier(classifier.clone())
            .notifier(notifier)
            .tasks(tasks.clone());
        if let Some(actions) = self.recovery_actions {
            network = network.recovery_actions(actions);
        }
        let network = network.build();

        let mut threats = ThreatDetector::builder()
            .config(config.threat.clone())
            .clock(clock.clone())
            .snapshots(snapshots.clone())
            .tasks(tasks.clone());
        if let Some(sink) = self.security_sink {
            threats = threats.security_sink(sink);
        }
        let threats = threats.build();

        let analytics = Arc::new(
            ErrorAnalyticsEngine::builder()
                .config(config.analytics.clone())
                .clock(clock.clone())
                .source(classifier.clone())
                .snapshots(snapshots.clone())
                .tasks(tasks.clone())
                .build(),
        );

        info!(persistent = snapshots.is_persistent(), "Warden assembled");

        Ok(Warden {
            config,
            clock,
            tasks,
            snapshots,
            classifier,
            breakers,
            retries,
            network,
            threats,
            analytics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::{BufferedNotifier, MemoryStore, MockClock, SecurityAuditTrail};
    use crate::classifier::{ErrorContext, RawError};
    use async_trait::async_trait;
    use std::time::Duration;

    struct InstantProbe;

    #[async_trait]
    impl ConnectivityProbe for InstantProbe {
        async fn probe(&self, _endpoint: &str) -> Result<Duration, RawError> {
            Ok(Duration::from_millis(20))
        }
    }

    fn builder(port: Arc<dyn PersistencePort>, clock: &MockClock) -> WardenBuilder {
        Warden::builder(WardenConfig::test())
            .clock(Arc::new(clock.clone()))
            .persistence(port)
            .probe(Arc::new(InstantProbe))
    }

    #[tokio::test]
    async fn test_components_share_classifier_log() {
        let clock = MockClock::new();
        let notifier = Arc::new(BufferedNotifier::default());
        let warden = builder(Arc::new(MemoryStore::new()), &clock)
            .notifier(notifier.clone())
            .build()
            .unwrap();

        warden
            .classifier()
            .handle_error(RawError::new("Failed to fetch"), ErrorContext::new().user("alice"), true);

        let summary = warden.analytics().run_analysis().unwrap();
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.health.affected_users, 1);
        assert_eq!(notifier.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_after_rebuild() {
        let clock = MockClock::new();
        let port: Arc<dyn PersistencePort> = Arc::new(MemoryStore::new());
        let audit = Arc::new(SecurityAuditTrail::new(10));

        let first = builder(port.clone(), &clock)
            .security_sink(audit.clone())
            .build()
            .unwrap();
        first
            .classifier()
            .handle_error(RawError::new("execution reverted"), ErrorContext::new(), false);
        first.threats().block(Duration::from_secs(60), "manual");
        first.analytics().run_analysis();

        let second = builder(port, &clock).build().unwrap();
        let summary = second.restore();
        assert_eq!(summary.error_reports, 1);
        assert!(summary.threat_block);
        assert!(summary.analytics_records >= 2);
        assert!(second.threats().is_blocked());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let clock = MockClock::new();
        let warden = builder(Arc::new(MemoryStore::new()), &clock).build().unwrap();

        warden.start();
        assert_eq!(warden.tasks().active().len(), 3);

        warden.shutdown().await;
        assert!(warden.tasks().is_shutdown());
        assert!(!warden.network().start());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = WardenConfig::test();
        config.storage.namespace = String::new();
        assert!(Warden::builder(config).probe(Arc::new(InstantProbe)).build().is_err());
    }
}
