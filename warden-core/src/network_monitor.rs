//! Connectivity tracking, offline queueing and staged recovery
//!
//! The monitor probes a set of endpoints on a fixed interval and turns the
//! results into a [`ConnectionQuality`]. While offline, work handed to
//! [`NetworkRecoveryMonitor::queue_request`] is parked in a bounded FIFO
//! queue and replayed once connectivity returns. Sustained poor quality
//! triggers a recovery ladder:
//!
//! ```text
//!   force probe ──> clear caches ──> reset worker ──> reload
//!        │               │                │              │
//!        └───────────────┴── stop at the first step that lifts quality above poor
//! ```
//!
//! Each rung only runs when its precondition holds and its cooldown has
//! passed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::abstractions::{
    elapsed_between, Clock, Notification, NotificationLevel, NotificationSink, SystemClock,
};
use crate::classifier::{rules, ErrorClassifier, ErrorContext, ErrorReport, ErrorType, RawError};
use crate::config::NetworkConfig;
use crate::error::{WardenError, WardenResult};
use crate::patterns::{retry, BackgroundTasks, ExponentialBackoff, RetryConfig};

/// Re-runnable async operation producing `T`
pub type OperationFactory<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, RawError>> + Send + Sync>;

/// Wrap a closure returning a future into an [`OperationFactory`]
pub fn operation<T, F, Fut>(f: F) -> OperationFactory<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RawError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<T, RawError>> { Box::pin(f()) })
}

/// Coarse connection quality, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Offline,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLevel {
    pub fn from_score(score: u8, reachable: bool) -> Self {
        if !reachable {
            return QualityLevel::Offline;
        }
        match score {
            80.. => QualityLevel::Excellent,
            60..=79 => QualityLevel::Good,
            40..=59 => QualityLevel::Fair,
            _ => QualityLevel::Poor,
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QualityLevel::Offline => "offline",
            QualityLevel::Poor => "poor",
            QualityLevel::Fair => "fair",
            QualityLevel::Good => "good",
            QualityLevel::Excellent => "excellent",
        };
        f.write_str(s)
    }
}

/// Link type reported by the host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Ethernet,
    Wifi,
    Cellular4g,
    Cellular3g,
    Cellular2g,
    #[default]
    Unknown,
}

impl ConnectionType {
    /// Stability weight in `0.0..=1.0`
    pub fn stability(&self) -> f64 {
        match self {
            ConnectionType::Ethernet => 1.0,
            ConnectionType::Wifi => 0.9,
            ConnectionType::Cellular4g => 0.8,
            ConnectionType::Unknown => 0.7,
            ConnectionType::Cellular3g => 0.6,
            ConnectionType::Cellular2g => 0.4,
        }
    }
}

/// Bandwidth and link hints, when the platform exposes them
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionHint {
    pub connection_type: ConnectionType,
    pub downlink_mbps: Option<f64>,
}

/// One quality measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionQuality {
    pub level: QualityLevel,
    pub score: u8,
    /// Mean latency of the successful probes
    #[serde(with = "humantime_serde")]
    pub latency: Option<Duration>,
    pub bandwidth: Option<f64>,
    pub stability: f64,
    pub measured_at: DateTime<Utc>,
}

impl ConnectionQuality {
    /// Score probe results. `latencies` holds one entry per probed endpoint.
    pub fn from_probes(latencies: &[Option<Duration>], hint: ConnectionHint, now: DateTime<Utc>) -> Self {
        let successes: Vec<Duration> = latencies.iter().flatten().copied().collect();
        if successes.is_empty() {
            return Self {
                level: QualityLevel::Offline,
                score: 0,
                latency: None,
                bandwidth: hint.downlink_mbps,
                stability: 0.0,
                measured_at: now,
            };
        }

        let mean = successes.iter().sum::<Duration>() / successes.len() as u32;
        let latency_score = (100.0 * (1.0 - mean.as_millis() as f64 / 2000.0)).clamp(0.0, 100.0);
        let bandwidth_score = match hint.downlink_mbps {
            Some(mbps) => (mbps * 10.0).clamp(0.0, 100.0),
            None => 70.0,
        };
        let success_ratio = successes.len() as f64 / latencies.len().max(1) as f64;
        let stability = hint.connection_type.stability() * success_ratio;

        let raw = 0.6 * latency_score + 0.2 * bandwidth_score + 0.2 * stability * 100.0;
        let score = raw.round().clamp(1.0, 100.0) as u8;

        Self {
            level: QualityLevel::from_score(score, true),
            score,
            latency: Some(mean),
            bandwidth: hint.downlink_mbps,
            stability,
            measured_at: now,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.level > QualityLevel::Poor
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.level, self.score)
    }
}

/// Measures round-trip time to an endpoint
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> Result<Duration, RawError>;

    fn connection_hint(&self) -> ConnectionHint {
        ConnectionHint::default()
    }
}

/// Probe issuing HEAD requests with reqwest
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> WardenResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WardenError::configuration("network.probe", e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self, endpoint: &str) -> Result<Duration, RawError> {
        let started = Instant::now();
        let response = self.client.head(endpoint).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(RawError::new(format!("Probe of {} returned {}", endpoint, status))
                .with_status(status.as_u16()));
        }
        Ok(started.elapsed())
    }
}

/// Host-side actions used by the recovery ladder
#[async_trait]
pub trait RecoveryActions: Send + Sync {
    fn has_caches(&self) -> bool {
        false
    }

    async fn clear_caches(&self) -> Result<(), RawError> {
        Ok(())
    }

    fn has_worker(&self) -> bool {
        false
    }

    async fn reset_worker(&self) -> Result<(), RawError> {
        Ok(())
    }

    async fn reload(&self) -> Result<(), RawError>;
}

/// Rungs of the recovery ladder, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    ForceProbe,
    ClearCaches,
    ResetWorker,
    Reload,
}

impl RecoveryStep {
    pub const LADDER: [RecoveryStep; 4] = [
        RecoveryStep::ForceProbe,
        RecoveryStep::ClearCaches,
        RecoveryStep::ResetWorker,
        RecoveryStep::Reload,
    ];
}

impl std::fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryStep::ForceProbe => "force_probe",
            RecoveryStep::ClearCaches => "clear_caches",
            RecoveryStep::ResetWorker => "reset_worker",
            RecoveryStep::Reload => "reload",
        };
        f.write_str(s)
    }
}

/// Type-erased queued request
trait DeferredOp: Send {
    /// Run once. Success is delivered to the waiting caller; a failure is
    /// handed back so the drainer can decide between requeue and rejection.
    fn run(&mut self) -> BoxFuture<'_, Option<RawError>>;

    fn reject(&mut self, error: WardenError);
}

struct Deferred<T> {
    operation: OperationFactory<T>,
    reply: Option<oneshot::Sender<WardenResult<T>>>,
}

impl<T: Send + 'static> DeferredOp for Deferred<T> {
    fn run(&mut self) -> BoxFuture<'_, Option<RawError>> {
        Box::pin(async move {
            match (self.operation)().await {
                Ok(value) => {
                    if let Some(reply) = self.reply.take() {
                        let _ = reply.send(Ok(value));
                    }
                    None
                }
                Err(error) => Some(error),
            }
        })
    }

    fn reject(&mut self, error: WardenError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }
}

struct QueuedRequest {
    id: String,
    enqueued_at: DateTime<Utc>,
    requeues: u32,
    op: Box<dyn DeferredOp>,
}

/// Queue entry summary for inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineQueueItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub requeue_count: u32,
}

/// Releases the drain flag on every exit. A request still in flight when the
/// drain is dropped goes back to the front of the queue.
struct DrainGuard<'a> {
    inner: &'a MonitorInner,
    in_flight: Option<QueuedRequest>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if let Some(item) = self.in_flight.take() {
            debug!(request = %item.id, "Drain interrupted, request put back");
            self.inner.state.lock().queue.push_front(item);
        }
        self.inner.draining.store(false, Ordering::Release);
    }
}

struct MonitorState {
    online: bool,
    quality: Option<ConnectionQuality>,
    consecutive_poor: u32,
    last_step_run: HashMap<RecoveryStep, DateTime<Utc>>,
    queue: VecDeque<QueuedRequest>,
}

struct MonitorInner {
    config: NetworkConfig,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ConnectivityProbe>,
    actions: Option<Arc<dyn RecoveryActions>>,
    classifier: Option<Arc<ErrorClassifier>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    tasks: BackgroundTasks,
    state: Mutex<MonitorState>,
    draining: AtomicBool,
}

/// Network quality tracker with offline queue
#[derive(Clone)]
pub struct NetworkRecoveryMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkRecoveryMonitor {
    pub fn builder(probe: Arc<dyn ConnectivityProbe>) -> NetworkRecoveryMonitorBuilder {
        NetworkRecoveryMonitorBuilder::new(probe)
    }

    /// Start the periodic quality check
    pub fn start(&self) -> bool {
        let monitor = self.clone();
        self.inner
            .tasks
            .spawn_periodic("network:quality-check", self.inner.config.check_interval, move || {
                let monitor = monitor.clone();
                async move {
                    monitor.check_quality().await;
                }
            })
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.lock().online
    }

    /// Latest measurement, if any check has run
    pub fn quality(&self) -> Option<ConnectionQuality> {
        self.inner.state.lock().quality.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn queued(&self) -> Vec<OfflineQueueItem> {
        self.inner
            .state
            .lock()
            .queue
            .iter()
            .map(|q| OfflineQueueItem {
                id: q.id.clone(),
                timestamp: q.enqueued_at,
                requeue_count: q.requeues,
            })
            .collect()
    }

    /// Probe every endpoint concurrently and score the result
    pub async fn measure(&self) -> ConnectionQuality {
        let inner = &self.inner;
        let timeout = inner.config.probe_timeout;
        let probes = inner.config.endpoints.iter().map(|endpoint| {
            let probe = inner.probe.clone();
            async move {
                match tokio::time::timeout(timeout, probe.probe(endpoint)).await {
                    Ok(Ok(latency)) => Some(latency),
                    Ok(Err(e)) => {
                        debug!(endpoint = %endpoint, error = %e, "Probe failed");
                        None
                    }
                    Err(_) => {
                        debug!(endpoint = %endpoint, ?timeout, "Probe timed out");
                        None
                    }
                }
            }
        });
        let latencies = join_all(probes).await;
        ConnectionQuality::from_probes(&latencies, inner.probe.connection_hint(), inner.clock.now())
    }

    /// Measure, apply online/offline transitions, and react to sustained
    /// poor quality
    pub async fn check_quality(&self) -> ConnectionQuality {
        let quality = self.measure().await;
        let reachable = quality.level != QualityLevel::Offline;

        let (went_offline, came_online, has_queue, run_ladder) = {
            let mut state = self.inner.state.lock();
            let was_online = state.online;
            state.online = reachable;
            state.quality = Some(quality.clone());
            if quality.level == QualityLevel::Poor {
                state.consecutive_poor += 1;
            } else {
                state.consecutive_poor = 0;
            }
            (
                was_online && !reachable,
                !was_online && reachable,
                !state.queue.is_empty(),
                state.consecutive_poor >= self.inner.config.poor_checks_before_recovery,
            )
        };

        debug!(quality = %quality, "Connection quality measured");
        if went_offline {
            self.on_offline();
        }
        if came_online {
            self.on_online();
        }
        // Requests deferred while still online wait for any reachable check
        if reachable && has_queue {
            self.drain_queue().await;
        }
        if run_ladder {
            self.run_recovery().await;
        }
        quality
    }

    /// Feed a platform connectivity event. Going online is only accepted
    /// after a successful multi-endpoint probe.
    pub async fn handle_connectivity_change(&self, online: bool) {
        if online {
            self.check_quality().await;
        } else {
            let was_online = std::mem::replace(&mut self.inner.state.lock().online, false);
            if was_online {
                self.on_offline();
            }
        }
    }

    fn on_offline(&self) {
        warn!(queued = self.queue_len(), "Connection lost, queueing requests");
        self.notify(Notification::new(
            NotificationLevel::Warning,
            "Connection lost",
            "You're offline. Requests will be sent when the connection returns.",
        ));
    }

    fn on_online(&self) {
        info!(queued = self.queue_len(), "Connection restored");
        self.notify(Notification::new(
            NotificationLevel::Success,
            "Back online",
            "Connection restored.",
        ));
    }

    /// Run `operation` now when online, otherwise defer it until
    /// connectivity returns. A failure while online is only deferred when it
    /// classifies as a network problem.
    pub async fn queue_request<T: Send + 'static>(&self, operation: OperationFactory<T>) -> WardenResult<T> {
        let mut deferred_while_online = false;
        if self.is_online() {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(raw) => {
                    let report = self.classify(&raw);
                    if !is_network_failure(&report) {
                        return Err(WardenError::operation(report, raw));
                    }
                    debug!(error = %raw, "Network failure while online, deferring request");
                    deferred_while_online = true;
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.enqueue(Box::new(Deferred {
            operation,
            reply: Some(tx),
        }))?;
        if deferred_while_online {
            self.schedule_check();
        }
        rx.await.map_err(|_| WardenError::QueueCleared)?
    }

    fn enqueue(&self, op: Box<dyn DeferredOp>) -> WardenResult<()> {
        let capacity = self.inner.config.max_queue_size;
        let mut state = self.inner.state.lock();
        if state.queue.len() >= capacity {
            warn!(capacity, "Offline queue full, rejecting request");
            return Err(WardenError::QueueFull { capacity });
        }
        let id = uuid::Uuid::new_v4().to_string();
        debug!(request = %id, depth = state.queue.len() + 1, "Request queued");
        state.queue.push_back(QueuedRequest {
            id,
            enqueued_at: self.inner.clock.now(),
            requeues: 0,
            op,
        });
        Ok(())
    }

    fn schedule_check(&self) {
        let monitor = self.clone();
        self.inner.tasks.spawn("network:verify", async move {
            monitor.check_quality().await;
        });
    }

    /// Replay queued requests in FIFO order. Stops at the first request that
    /// fails with a network error, putting it and everything behind it back.
    pub async fn drain_queue(&self) -> usize {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let mut guard = DrainGuard {
            inner: &self.inner,
            in_flight: None,
        };
        let mut completed = 0;

        loop {
            let Some(next) = self.inner.state.lock().queue.pop_front() else {
                break;
            };
            let item = guard.in_flight.insert(next);
            let outcome = item.op.run().await;
            let Some(mut item) = guard.in_flight.take() else {
                break;
            };
            let Some(raw) = outcome else {
                completed += 1;
                continue;
            };

            let report = self.classify(&raw);
            if is_network_failure(&report) && item.requeues < self.inner.config.max_requeues {
                item.requeues += 1;
                debug!(request = %item.id, requeues = item.requeues, "Request failed again, requeued");
                self.inner.state.lock().queue.push_front(item);
                break;
            }
            warn!(request = %item.id, error = %raw, "Queued request rejected");
            item.op.reject(WardenError::operation(report, raw));
        }

        drop(guard);
        if completed > 0 {
            info!(completed, "Offline queue drained");
        }
        completed
    }

    /// Reject every pending request. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<QueuedRequest> = self.inner.state.lock().queue.drain(..).collect();
        let count = drained.len();
        for mut item in drained {
            item.op.reject(WardenError::QueueCleared);
        }
        if count > 0 {
            info!(count, "Offline queue cleared");
        }
        count
    }

    /// Walk the recovery ladder. Returns the step that restored quality.
    pub async fn run_recovery(&self) -> Option<RecoveryStep> {
        for step in RecoveryStep::LADDER {
            if !self.precondition_holds(step) || !self.claim_step(step) {
                continue;
            }
            info!(%step, "Running network recovery step");

            let quality = match self.execute_step(step).await {
                Ok(quality) => quality,
                Err(e) => {
                    warn!(%step, error = %e, "Recovery step failed");
                    continue;
                }
            };

            if quality.is_usable() {
                let has_queue = {
                    let mut state = self.inner.state.lock();
                    state.online = true;
                    state.quality = Some(quality.clone());
                    state.consecutive_poor = 0;
                    !state.queue.is_empty()
                };
                info!(%step, quality = %quality, "Network recovered");
                if has_queue {
                    self.drain_queue().await;
                }
                return Some(step);
            }
        }
        warn!("Recovery ladder exhausted without restoring quality");
        None
    }

    fn precondition_holds(&self, step: RecoveryStep) -> bool {
        let actions = self.inner.actions.as_ref();
        match step {
            RecoveryStep::ForceProbe => true,
            RecoveryStep::ClearCaches => actions.is_some_and(|a| a.has_caches()),
            RecoveryStep::ResetWorker => actions.is_some_and(|a| a.has_worker()),
            RecoveryStep::Reload => self.inner.config.allow_reload && actions.is_some(),
        }
    }

    /// Mark `step` as run unless it is still cooling down
    fn claim_step(&self, step: RecoveryStep) -> bool {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        if let Some(last) = state.last_step_run.get(&step) {
            if elapsed_between(*last, now) < self.inner.config.strategy_cooldown {
                debug!(%step, "Recovery step cooling down");
                return false;
            }
        }
        state.last_step_run.insert(step, now);
        true
    }

    async fn execute_step(&self, step: RecoveryStep) -> Result<ConnectionQuality, RawError> {
        match step {
            RecoveryStep::ForceProbe => {
                let config = RetryConfig::new(
                    "network:force-probe",
                    3,
                    ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), 2.0),
                );
                let outcome = retry(&config, self.inner.clock.as_ref(), |_| async {
                    let quality = self.measure().await;
                    if quality.is_usable() {
                        Ok(quality)
                    } else {
                        Err(quality)
                    }
                })
                .await;
                return Ok(outcome.unwrap_or_else(|quality| quality));
            }
            RecoveryStep::ClearCaches => {
                if let Some(actions) = &self.inner.actions {
                    actions.clear_caches().await?;
                }
            }
            RecoveryStep::ResetWorker => {
                if let Some(actions) = &self.inner.actions {
                    actions.reset_worker().await?;
                }
            }
            RecoveryStep::Reload => {
                if let Some(actions) = &self.inner.actions {
                    actions.reload().await?;
                }
            }
        }
        Ok(self.measure().await)
    }

    fn classify(&self, raw: &RawError) -> ErrorReport {
        let context = ErrorContext::new().component("network_monitor");
        match &self.inner.classifier {
            Some(classifier) => classifier.handle_error(raw.clone(), context, false),
            None => rules::build_report(raw, &context, self.inner.clock.now()),
        }
    }

    fn notify(&self, notification: Notification) {
        if let Some(sink) = &self.inner.notifier {
            sink.notify(notification);
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }
}

fn is_network_failure(report: &ErrorReport) -> bool {
    matches!(report.error_type, ErrorType::Network | ErrorType::Timeout)
}

impl std::fmt::Debug for NetworkRecoveryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRecoveryMonitor")
            .field("online", &self.is_online())
            .field("queued", &self.queue_len())
            .finish()
    }
}

/// Builder for [`NetworkRecoveryMonitor`]
pub struct NetworkRecoveryMonitorBuilder {
    config: NetworkConfig,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ConnectivityProbe>,
    actions: Option<Arc<dyn RecoveryActions>>,
    classifier: Option<Arc<ErrorClassifier>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    tasks: BackgroundTasks,
}

impl NetworkRecoveryMonitorBuilder {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            config: NetworkConfig::default(),
            clock: SystemClock::shared(),
            probe,
            actions: None,
            classifier: None,
            notifier: None,
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn recovery_actions(mut self, actions: Arc<dyn RecoveryActions>) -> Self {
        self.actions = Some(actions);
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

    pub fn tasks(mut self, tasks: BackgroundTasks) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn build(self) -> NetworkRecoveryMonitor {
        NetworkRecoveryMonitor {
            inner: Arc::new(MonitorInner {
                config: self.config,
                clock: self.clock,
                probe: self.probe,
                actions: self.actions,
                classifier: self.classifier,
                notifier: self.notifier,
                tasks: self.tasks,
                state: Mutex::new(MonitorState {
                    online: true,
                    quality: None,
                    consecutive_poor: 0,
                    last_step_run: HashMap::new(),
                    queue: VecDeque::new(),
                }),
                draining: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::MockClock;
    use std::sync::atomic::AtomicU32;

    /// Probe whose latency can be changed between checks; `None` means down
    struct ScriptedProbe {
        latency: Mutex<Option<Duration>>,
        hint: ConnectionHint,
    }

    impl ScriptedProbe {
        fn new(latency: Option<Duration>) -> Arc<Self> {
            Self::with_hint(
                latency,
                ConnectionHint {
                    connection_type: ConnectionType::Ethernet,
                    downlink_mbps: Some(50.0),
                },
            )
        }

        fn with_hint(latency: Option<Duration>, hint: ConnectionHint) -> Arc<Self> {
            Arc::new(Self {
                latency: Mutex::new(latency),
                hint,
            })
        }

        fn set(&self, latency: Option<Duration>) {
            *self.latency.lock() = latency;
        }
    }

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn probe(&self, _endpoint: &str) -> Result<Duration, RawError> {
            let latency = *self.latency.lock();
            latency.ok_or_else(|| RawError::new("Failed to fetch").with_code("NETWORK_ERROR"))
        }

        fn connection_hint(&self) -> ConnectionHint {
            self.hint
        }
    }

    #[derive(Default)]
    struct CountingActions {
        cleared: AtomicU32,
        reloaded: AtomicU32,
        fixes_on_clear: Option<Arc<ScriptedProbe>>,
    }

    #[async_trait]
    impl RecoveryActions for CountingActions {
        fn has_caches(&self) -> bool {
            true
        }

        async fn clear_caches(&self) -> Result<(), RawError> {
            self.cleared.fetch_add(1, Ordering::SeqCst);
            if let Some(probe) = &self.fixes_on_clear {
                probe.set(Some(Duration::from_millis(20)));
            }
            Ok(())
        }

        async fn reload(&self) -> Result<(), RawError> {
            self.reloaded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn monitor(probe: Arc<ScriptedProbe>, clock: MockClock) -> NetworkRecoveryMonitor {
        NetworkRecoveryMonitor::builder(probe)
            .config(NetworkConfig {
                max_queue_size: 3,
                max_requeues: 1,
                ..NetworkConfig::default()
            })
            .clock(Arc::new(clock))
            .build()
    }

    async fn wait_for_queue(monitor: &NetworkRecoveryMonitor, len: usize) {
        for _ in 0..100 {
            if monitor.queue_len() == len {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("queue never reached {}", len);
    }

    #[test]
    fn test_quality_levels() {
        let now = Utc::now();
        let hint = ConnectionHint {
            connection_type: ConnectionType::Ethernet,
            downlink_mbps: Some(20.0),
        };
        let fast = ConnectionQuality::from_probes(&[Some(Duration::from_millis(50)); 3], hint, now);
        assert_eq!(fast.level, QualityLevel::Excellent);

        let slow = ConnectionQuality::from_probes(
            &[Some(Duration::from_millis(1900)), None, None],
            ConnectionHint {
                connection_type: ConnectionType::Cellular2g,
                downlink_mbps: Some(0.2),
            },
            now,
        );
        assert_eq!(slow.level, QualityLevel::Poor);
        assert!(slow.score > 0);

        let down = ConnectionQuality::from_probes(&[None, None], hint, now);
        assert_eq!(down.level, QualityLevel::Offline);
        assert_eq!(down.score, 0);
    }

    #[tokio::test]
    async fn test_online_request_runs_immediately() {
        let monitor = monitor(ScriptedProbe::new(Some(Duration::from_millis(20))), MockClock::new());
        let value = monitor
            .queue_request(operation(|| async { Ok::<_, RawError>(7) }))
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(monitor.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_non_network_failure_is_not_deferred() {
        let monitor = monitor(ScriptedProbe::new(Some(Duration::from_millis(20))), MockClock::new());
        let err = monitor
            .queue_request(operation(|| async { Err::<(), _>(RawError::new("Invalid input: amount")) }))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Validation);
        assert_eq!(monitor.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_queued_requests_replay_once_in_order() {
        let probe = ScriptedProbe::new(None);
        let monitor = monitor(probe.clone(), MockClock::new());
        monitor.check_quality().await;
        assert!(!monitor.is_online());

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let order = order.clone();
            let m = monitor.clone();
            handles.push(tokio::spawn(async move {
                m.queue_request(operation(move || {
                    let order = order.clone();
                    async move {
                        order.lock().push(i);
                        Ok::<_, RawError>(i)
                    }
                }))
                .await
            }));
            wait_for_queue(&monitor, i + 1).await;
        }

        probe.set(Some(Duration::from_millis(30)));
        monitor.check_quality().await;

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), i);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(monitor.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_queue_capacity_and_clear() {
        let monitor = monitor(ScriptedProbe::new(None), MockClock::new());
        monitor.handle_connectivity_change(false).await;

        let mut handles = Vec::new();
        for i in 0..3 {
            let m = monitor.clone();
            handles.push(tokio::spawn(async move {
                m.queue_request(operation(|| async { Ok::<_, RawError>(()) })).await
            }));
            wait_for_queue(&monitor, i + 1).await;
        }

        let overflow = monitor
            .queue_request(operation(|| async { Ok::<_, RawError>(()) }))
            .await;
        assert!(matches!(overflow, Err(WardenError::QueueFull { capacity: 3 })));

        assert_eq!(monitor.clear_queue(), 3);
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), Err(WardenError::QueueCleared)));
        }
    }

    #[tokio::test]
    async fn test_network_failure_during_drain_is_requeued_then_rejected() {
        let probe = ScriptedProbe::new(None);
        let monitor = monitor(probe.clone(), MockClock::new());
        monitor.check_quality().await;

        let m = monitor.clone();
        let handle = tokio::spawn(async move {
            m.queue_request(operation(|| async {
                Err::<(), _>(RawError::new("Network request failed"))
            }))
            .await
        });
        wait_for_queue(&monitor, 1).await;

        probe.set(Some(Duration::from_millis(10)));
        monitor.check_quality().await;
        assert_eq!(monitor.queued()[0].requeue_count, 1);

        monitor.drain_queue().await;
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Network);
        assert_eq!(monitor.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_recovery_ladder_stops_at_first_successful_step() {
        let clock = MockClock::new();
        let probe = ScriptedProbe::with_hint(
            Some(Duration::from_millis(1990)),
            ConnectionHint {
                connection_type: ConnectionType::Cellular2g,
                downlink_mbps: Some(0.5),
            },
        );
        let actions = Arc::new(CountingActions {
            fixes_on_clear: Some(probe.clone()),
            ..Default::default()
        });
        let monitor = NetworkRecoveryMonitor::builder(probe.clone())
            .config(NetworkConfig {
                poor_checks_before_recovery: 2,
                ..NetworkConfig::default()
            })
            .clock(Arc::new(clock.clone()))
            .recovery_actions(actions.clone())
            .build();

        assert_eq!(monitor.check_quality().await.level, QualityLevel::Poor);
        assert_eq!(actions.cleared.load(Ordering::SeqCst), 0);

        monitor.check_quality().await;
        assert_eq!(actions.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(actions.reloaded.load(Ordering::SeqCst), 0);
        assert!(monitor.quality().unwrap().is_usable());
        // Three failed force-probe measurements backed off 1s then 2s
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_recovery_steps_respect_cooldown() {
        let clock = MockClock::new();
        let probe = ScriptedProbe::new(None);
        let actions = Arc::new(CountingActions::default());
        let monitor = NetworkRecoveryMonitor::builder(probe)
            .clock(Arc::new(clock.clone()))
            .recovery_actions(actions.clone())
            .build();

        assert_eq!(monitor.run_recovery().await, None);
        assert_eq!(actions.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(actions.reloaded.load(Ordering::SeqCst), 1);

        // Force-probe sleeps advanced the clock a little, still within cooldown
        assert_eq!(monitor.run_recovery().await, None);
        assert_eq!(actions.cleared.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(31));
        monitor.run_recovery().await;
        assert_eq!(actions.cleared.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_failure_while_online_is_retried_after_check() {
        let monitor = monitor(ScriptedProbe::new(Some(Duration::from_millis(20))), MockClock::new());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            monitor.queue_request(operation(move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(RawError::new("Failed to fetch").with_code("NETWORK_ERROR"))
                    } else {
                        Ok(attempt)
                    }
                }
            })),
        )
        .await
        .expect("deferred request never settled");

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.queue_len(), 0);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_requeued_request_drains_on_next_reachable_check() {
        let probe = ScriptedProbe::new(None);
        let monitor = monitor(probe.clone(), MockClock::new());
        monitor.check_quality().await;
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let m = monitor.clone();
        let handle = tokio::spawn(async move {
            m.queue_request(operation(move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(RawError::new("Network request failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            }))
            .await
        });
        wait_for_queue(&monitor, 1).await;

        // The reconnect drain puts the request back
        probe.set(Some(Duration::from_millis(10)));
        monitor.check_quality().await;
        assert!(monitor.is_online());
        assert_eq!(monitor.queue_len(), 1);

        // No offline-to-online edge this time
        monitor.check_quality().await;
        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert_eq!(monitor.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_drain_keeps_queue_usable() {
        let monitor = monitor(ScriptedProbe::new(None), MockClock::new());
        monitor.check_quality().await;
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..2 {
            let counter = calls.clone();
            let m = monitor.clone();
            handles.push(tokio::spawn(async move {
                m.queue_request(operation(move || {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == 0 {
                            futures::future::pending::<()>().await;
                        }
                        Ok::<_, RawError>(i)
                    }
                }))
                .await
            }));
            wait_for_queue(&monitor, i + 1).await;
        }

        let cancelled = tokio::time::timeout(Duration::from_millis(50), monitor.drain_queue()).await;
        assert!(cancelled.is_err());
        assert_eq!(monitor.queue_len(), 2);
        assert!(!handles[0].is_finished());

        assert_eq!(monitor.drain_queue().await, 2);
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap().unwrap(), i);
        }
        assert_eq!(monitor.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_successful_recovery_drains_queue() {
        let clock = MockClock::new();
        let probe = ScriptedProbe::with_hint(
            Some(Duration::from_millis(1990)),
            ConnectionHint {
                connection_type: ConnectionType::Cellular2g,
                downlink_mbps: Some(0.5),
            },
        );
        let actions = Arc::new(CountingActions {
            fixes_on_clear: Some(probe.clone()),
            ..Default::default()
        });
        let monitor = NetworkRecoveryMonitor::builder(probe)
            .clock(Arc::new(clock))
            .recovery_actions(actions)
            .build();
        monitor.handle_connectivity_change(false).await;

        let m = monitor.clone();
        let handle = tokio::spawn(async move {
            m.queue_request(operation(|| async { Ok::<_, RawError>("sent") })).await
        });
        wait_for_queue(&monitor, 1).await;

        assert_eq!(monitor.run_recovery().await, Some(RecoveryStep::ClearCaches));
        assert!(monitor.is_online());
        assert_eq!(handle.await.unwrap().unwrap(), "sent");
        assert_eq!(monitor.queue_len(), 0);
    }
}
