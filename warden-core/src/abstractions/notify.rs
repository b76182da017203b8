//! User-facing notification and security-event sinks
//!
//! Both sinks are optional collaborators. Components hold an
//! `Option<Arc<dyn ...>>` and treat a missing sink as a no-op.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::classifier::{ErrorContext, ErrorSeverity};

/// Visual weight of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message for the front end to display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    /// How long the toast should stay visible; `None` means until dismissed
    #[serde(with = "humantime_serde")]
    pub duration: Option<Duration>,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            duration: Some(Duration::from_secs(5)),
        }
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }
}

/// Receives user-facing notifications
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that forwards notifications to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => {
                error!(title = %notification.title, "{}", notification.message)
            }
            NotificationLevel::Warning => {
                warn!(title = %notification.title, "{}", notification.message)
            }
            _ => info!(title = %notification.title, "{}", notification.message),
        }
    }
}

/// Bounded buffer a UI can poll and drain
#[derive(Debug)]
pub struct BufferedNotifier {
    capacity: usize,
    pending: Mutex<VecDeque<Notification>>,
}

impl BufferedNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Take every pending notification, oldest first
    pub fn drain(&self) -> Vec<Notification> {
        self.pending.lock().drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<Notification> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for BufferedNotifier {
    fn default() -> Self {
        Self::new(50)
    }
}

impl NotificationSink for BufferedNotifier {
    fn notify(&self, notification: Notification) {
        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            pending.pop_front();
        }
        pending.push_back(notification);
    }
}

/// Category of a forwarded security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    AuthenticationFailure,
    ContractFailure,
    WalletFailure,
    SuspiciousActivity,
    RateLimitExceeded,
    TemporaryBlock,
}

/// Audit record forwarded to the security sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub severity: ErrorSeverity,
    pub description: String,
    #[serde(default)]
    pub context: ErrorContext,
    pub timestamp: DateTime<Utc>,
}

/// Receives security events (audit backend, SIEM forwarder, ...)
pub trait SecurityEventSink: Send + Sync {
    fn record(&self, event: SecurityEvent);
}

/// Bounded in-memory audit trail
#[derive(Debug)]
pub struct SecurityAuditTrail {
    capacity: usize,
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl SecurityAuditTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Most recent `limit` events, newest first
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        self.events.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn count_of(&self, kind: SecurityEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Default for SecurityAuditTrail {
    fn default() -> Self {
        Self::new(100)
    }
}

impl SecurityEventSink for SecurityAuditTrail {
    fn record(&self, event: SecurityEvent) {
        warn!(kind = ?event.kind, severity = %event.severity, "security event: {}", event.description);
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}
