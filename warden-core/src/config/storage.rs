//! Storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;
use crate::error::{WardenError, WardenResult};

/// Where snapshots are persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file; in-memory only when unset
    pub path: Option<PathBuf>,

    /// Key prefix for every persisted collection
    pub namespace: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> WardenResult<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("WARDEN_STORAGE_PATH") {
            config.path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Ok(ns) = std::env::var("WARDEN_STORAGE_NAMESPACE") {
            config.namespace = ns;
        }
        Ok(config)
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(WardenError::configuration(
                "storage.namespace",
                "must be non-empty and must not contain ':'",
            ));
        }
        Ok(())
    }
}
