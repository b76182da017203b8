//! Tracked background tasks with a shared shutdown signal
//!
//! Recovery probes, periodic quality checks, analytics passes and block
//! expiry all run through [`BackgroundTasks`]. Every task is named, observes
//! the shutdown signal, and can be awaited so tests complete deterministically.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle states for the task set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Stopping,
    Stopped,
}

struct TrackedTask {
    name: String,
    handle: JoinHandle<()>,
}

struct TasksInner {
    state: Mutex<LifecycleState>,
    oneshot: Mutex<Vec<TrackedTask>>,
    periodic: Mutex<Vec<TrackedTask>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Shared handle to a set of named tasks
#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<TasksInner>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(TasksInner {
                state: Mutex::new(LifecycleState::Running),
                oneshot: Mutex::new(Vec::new()),
                periodic: Mutex::new(Vec::new()),
                shutdown_tx,
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() != LifecycleState::Running
    }

    /// Receiver that flips to `true` once shutdown starts
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Spawn a one-shot task on the current runtime.
    ///
    /// Returns `false` without running anything when there is no runtime or
    /// the set is shutting down.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.is_shutdown() {
            debug!(task = %name, "Task set is shut down, not spawning");
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(task = %name, "No async runtime available, skipping task");
            return false;
        };

        let mut shutdown = self.shutdown_signal();
        let handle = runtime.spawn(async move {
            tokio::select! {
                _ = future => {}
                _ = wait_for_shutdown(&mut shutdown) => {}
            }
        });

        let mut tasks = self.inner.oneshot.lock();
        tasks.retain(|t| !t.handle.is_finished());
        tasks.push(TrackedTask { name, handle });
        true
    }

    /// Run `tick` every `interval` until shutdown. The first tick happens
    /// after one full interval.
    pub fn spawn_periodic<F, Fut>(&self, name: impl Into<String>, interval: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if self.is_shutdown() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(task = %name, "No async runtime available, periodic task not started");
            return false;
        };

        let mut shutdown = self.shutdown_signal();
        let task_name = name.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
            debug!(task = %task_name, "Periodic task stopped");
        });

        info!(task = %name, interval = ?interval, "Started periodic task");
        self.inner.periodic.lock().push(TrackedTask { name, handle });
        true
    }

    /// Names of tasks that have not finished yet
    pub fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .oneshot
            .lock()
            .iter()
            .chain(self.inner.periodic.lock().iter())
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Per-task running status
    pub fn task_status(&self) -> HashMap<String, bool> {
        self.inner
            .oneshot
            .lock()
            .iter()
            .chain(self.inner.periodic.lock().iter())
            .map(|t| (t.name.clone(), !t.handle.is_finished()))
            .collect()
    }

    /// Wait until every one-shot task (including ones spawned while waiting)
    /// has completed. Periodic tasks are not awaited.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<TrackedTask> = std::mem::take(&mut *self.inner.oneshot.lock());
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.handle.await {
                    warn!(task = %task.name, error = %e, "Background task ended abnormally");
                }
            }
        }
    }

    /// Signal shutdown and wait for every task to stop
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != LifecycleState::Running {
                return;
            }
            *state = LifecycleState::Stopping;
        }
        info!("Shutting down background tasks");
        let _ = self.inner.shutdown_tx.send(true);

        let tasks: Vec<TrackedTask> = {
            let mut all = std::mem::take(&mut *self.inner.periodic.lock());
            all.extend(std::mem::take(&mut *self.inner.oneshot.lock()));
            all
        };
        for task in tasks {
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!(task = %task.name, error = %e, "Background task failed during shutdown");
                }
            }
        }
        *self.inner.state.lock() = LifecycleState::Stopped;
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("state", &self.state())
            .field("active", &self.active())
            .finish()
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Sender dropped, never signals
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_wait_idle_awaits_spawned_tasks() {
        let tasks = BackgroundTasks::new();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            assert!(tasks.spawn("probe", async move {
                tokio::task::yield_now().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        tasks.wait_idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_stops_on_shutdown() {
        let tasks = BackgroundTasks::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let t = ticks.clone();
        tasks.spawn_periodic("tick", Duration::from_secs(10), move || {
            let t = t.clone();
            async move {
                t.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        tasks.shutdown().await;
        assert_eq!(tasks.state(), LifecycleState::Stopped);
        assert!(!tasks.spawn("late", async {}));
    }

    #[test]
    fn test_spawn_without_runtime_is_skipped() {
        let tasks = BackgroundTasks::new();
        assert!(!tasks.spawn("orphan", async {}));
    }
}
