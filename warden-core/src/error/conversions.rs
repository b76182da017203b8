//! Error conversion implementations for WardenError
//!
//! This module provides From trait implementations for converting
//! external error types into WardenError variants.

use super::types::WardenError;

// Storage error conversions
impl From<redb::Error> for WardenError {
    fn from(err: redb::Error) -> Self {
        WardenError::storage("redb", err)
    }
}

impl From<redb::DatabaseError> for WardenError {
    fn from(err: redb::DatabaseError) -> Self {
        WardenError::storage("open_database", err)
    }
}

impl From<redb::TransactionError> for WardenError {
    fn from(err: redb::TransactionError) -> Self {
        WardenError::storage("begin_transaction", err)
    }
}

impl From<redb::TableError> for WardenError {
    fn from(err: redb::TableError) -> Self {
        WardenError::storage("open_table", err)
    }
}

impl From<redb::StorageError> for WardenError {
    fn from(err: redb::StorageError) -> Self {
        WardenError::storage("storage_operation", err)
    }
}

impl From<redb::CommitError> for WardenError {
    fn from(err: redb::CommitError) -> Self {
        WardenError::storage("commit", err)
    }
}

// Serialization error conversions
impl From<serde_json::Error> for WardenError {
    fn from(err: serde_json::Error) -> Self {
        WardenError::serialization("json", err)
    }
}

impl From<toml::de::Error> for WardenError {
    fn from(err: toml::de::Error) -> Self {
        WardenError::configuration("toml", err.to_string())
    }
}

impl From<toml::ser::Error> for WardenError {
    fn from(err: toml::ser::Error) -> Self {
        WardenError::serialization("toml", err)
    }
}

// System error conversions
impl From<std::io::Error> for WardenError {
    fn from(err: std::io::Error) -> Self {
        WardenError::storage("io", err)
    }
}

impl From<tokio::task::JoinError> for WardenError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            WardenError::Internal {
                message: format!("Task panicked: {}", err),
            }
        } else {
            WardenError::Internal {
                message: format!("Task cancelled: {}", err),
            }
        }
    }
}
