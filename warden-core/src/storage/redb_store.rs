//! Embedded file-backed persistence port
//!
//! Stores every snapshot collection as one JSON string keyed by its
//! namespaced collection name in a single redb table.

use crate::{abstractions::PersistencePort, error::WardenResult};
use redb::{Database, ReadableTable, TableDefinition, TableError};
use std::path::Path;
use tracing::debug;

/// Snapshot table: namespaced key -> JSON document
pub const SNAPSHOT_TABLE: TableDefinition<&str, &str> = TableDefinition::new("warden_snapshots");

/// redb-backed [`PersistencePort`]
pub struct RedbStore {
    database: Database,
}

impl RedbStore {
    /// Open or create the database file and make sure the snapshot table exists
    pub fn open(path: impl AsRef<Path>) -> WardenResult<Self> {
        let path = path.as_ref();
        let database = Database::create(path)?;

        let txn = database.begin_write()?;
        {
            txn.open_table(SNAPSHOT_TABLE)?;
        }
        txn.commit()?;

        debug!(path = %path.display(), "Opened snapshot database");
        Ok(Self { database })
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl PersistencePort for RedbStore {
    fn get(&self, key: &str) -> WardenResult<Option<String>> {
        let txn = self.database.begin_read()?;
        let table = match txn.open_table(SNAPSHOT_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = table.get(key)?.map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> WardenResult<()> {
        let txn = self.database.begin_write()?;
        {
            let mut table = txn.open_table(SNAPSHOT_TABLE)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> WardenResult<()> {
        let txn = self.database.begin_write()?;
        {
            let mut table = txn.open_table(SNAPSHOT_TABLE)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_redb_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = RedbStore::open(dir.path().join("warden.redb")).unwrap();

        assert!(store.get("warden:error_reports").unwrap().is_none());
        store.set("warden:error_reports", "[]").unwrap();
        assert_eq!(store.get("warden:error_reports").unwrap().as_deref(), Some("[]"));

        store.remove("warden:error_reports").unwrap();
        assert!(store.get("warden:error_reports").unwrap().is_none());
    }

    #[test]
    fn test_redb_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("warden.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            store.set("warden:threat_block", "{\"until\":1}").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert!(store.get("warden:threat_block").unwrap().is_some());
    }
}
