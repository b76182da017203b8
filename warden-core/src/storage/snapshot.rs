//! Namespaced snapshot collections on top of a [`PersistencePort`]
//!
//! Writes are best-effort: every failure is logged and swallowed so that a
//! broken or missing store never affects the hot path.

use crate::abstractions::PersistencePort;
use crate::common::Timestamped;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const ERROR_REPORTS: &str = "error_reports";
pub const CIRCUIT_BREAKERS: &str = "circuit_breakers";
pub const TRANSACTION_RETRIES: &str = "transaction_retries";
pub const ERROR_PATTERNS: &str = "error_patterns";
pub const ERROR_TRENDS: &str = "error_trends";
pub const ERROR_INSIGHTS: &str = "error_insights";
pub const THREAT_BLOCK: &str = "threat_block";

/// Retention applied to a collection on every write
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub max_items: usize,
    pub max_age: Option<Duration>,
}

impl Retention {
    pub fn new(max_items: usize, max_age: Option<Duration>) -> Self {
        Self { max_items, max_age }
    }
}

/// Optional persistence with a key namespace
#[derive(Clone, Default)]
pub struct SnapshotStore {
    port: Option<Arc<dyn PersistencePort>>,
    namespace: String,
}

impl SnapshotStore {
    pub fn new(port: Option<Arc<dyn PersistencePort>>, namespace: impl Into<String>) -> Self {
        Self {
            port,
            namespace: namespace.into(),
        }
    }

    /// Store that never persists anything
    pub fn in_memory() -> Self {
        Self::new(None, "warden")
    }

    pub fn is_persistent(&self) -> bool {
        self.port.is_some()
    }

    pub fn key(&self, collection: &str) -> String {
        format!("{}:{}", self.namespace, collection)
    }

    /// Serialize a single document
    pub fn save_document<T: Serialize>(&self, collection: &str, value: &T) {
        let Some(port) = &self.port else {
            return;
        };
        let key = self.key(collection);
        let result = serde_json::to_string(value)
            .map_err(crate::error::WardenError::from)
            .and_then(|json| port.set(&key, &json));
        if let Err(e) = result {
            warn!(key = %key, error = %e, "Failed to persist snapshot");
        }
    }

    pub fn load_document<T: DeserializeOwned>(&self, collection: &str) -> Option<T> {
        let port = self.port.as_ref()?;
        let key = self.key(collection);
        match port.get(&key) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding unreadable snapshot");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read snapshot");
                None
            }
        }
    }

    /// Persist the newest `retention.max_items` records not older than `max_age`
    pub fn save_collection<T>(&self, collection: &str, items: &[T], retention: Retention, now: DateTime<Utc>)
    where
        T: Serialize + Timestamped,
    {
        if self.port.is_none() {
            return;
        }
        let kept = retain_recent(items, retention, now);
        debug!(collection, kept = kept.len(), total = items.len(), "Persisting snapshot collection");
        self.save_document(collection, &kept);
    }

    /// Load a collection, applying the same retention as on write
    pub fn load_collection<T>(&self, collection: &str, retention: Retention, now: DateTime<Utc>) -> Vec<T>
    where
        T: DeserializeOwned + Timestamped,
    {
        let mut items: Vec<T> = self.load_document(collection).unwrap_or_default();
        if let Some(age) = retention.max_age {
            let cutoff = now - crate::abstractions::to_chrono(age);
            items.retain(|item| item.timestamp() >= cutoff);
        }
        let excess = items.len().saturating_sub(retention.max_items);
        items.drain(..excess);
        items
    }

    pub fn remove(&self, collection: &str) {
        if let Some(port) = &self.port {
            let key = self.key(collection);
            if let Err(e) = port.remove(&key) {
                warn!(key = %key, error = %e, "Failed to remove snapshot");
            }
        }
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("namespace", &self.namespace)
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

/// References to the newest items inside the retention window, oldest first
fn retain_recent<T: Timestamped>(items: &[T], retention: Retention, now: DateTime<Utc>) -> Vec<&T> {
    let cutoff = retention
        .max_age
        .map(|age| now - crate::abstractions::to_chrono(age));
    let fresh: Vec<&T> = items
        .iter()
        .filter(|item| cutoff.map_or(true, |c| item.timestamp() >= c))
        .collect();
    let skip = fresh.len().saturating_sub(retention.max_items);
    fresh.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        n: u32,
        at: DateTime<Utc>,
    }

    impl Timestamped for Entry {
        fn timestamp(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn test_collection_is_capped_and_age_pruned() {
        let port = Arc::new(MemoryStore::new());
        let store = SnapshotStore::new(Some(port.clone()), "test");
        let now = Utc::now();
        let items: Vec<Entry> = (0..10)
            .map(|n| Entry {
                n,
                at: now - chrono::Duration::hours(10 - n as i64),
            })
            .collect();

        let retention = Retention::new(3, Some(Duration::from_secs(5 * 3600)));
        store.save_collection("entries", &items, retention, now);

        let loaded: Vec<Entry> = store.load_collection("entries", retention, now);
        assert_eq!(loaded.iter().map(|e| e.n).collect::<Vec<_>>(), vec![7, 8, 9]);
        assert_eq!(port.keys(), vec!["test:entries".to_string()]);
    }

    #[test]
    fn test_in_memory_store_is_noop() {
        let store = SnapshotStore::in_memory();
        store.save_document("anything", &vec![1, 2, 3]);
        assert!(store.load_document::<Vec<u32>>("anything").is_none());
    }
}
