//! Persistence port
//!
//! The resilience core snapshots its bounded collections through this narrow
//! key/value interface at defined checkpoints only. A missing port degrades
//! every component to in-memory operation.

use crate::error::WardenResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Key/value persistence used for snapshots
pub trait PersistencePort: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> WardenResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> WardenResult<()>;

    /// Delete `key`; deleting a missing key is not an error
    fn remove(&self, key: &str) -> WardenResult<()>;
}

/// In-process map implementation
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl PersistencePort for MemoryStore {
    fn get(&self, key: &str) -> WardenResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> WardenResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> WardenResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());

        store.set("warden:a", "[1,2]").unwrap();
        assert_eq!(store.get("warden:a").unwrap().as_deref(), Some("[1,2]"));

        store.remove("warden:a").unwrap();
        store.remove("warden:a").unwrap();
        assert!(store.is_empty());
    }
}
