//! Storage layer modules
//!
//! Persistence adapters for the [`crate::abstractions::PersistencePort`] and
//! the snapshot helpers the components use at their checkpoints.

pub mod redb_store;
pub mod snapshot;

pub use redb_store::{RedbStore, SNAPSHOT_TABLE};
pub use snapshot::{Retention, SnapshotStore};
