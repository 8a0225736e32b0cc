//! Storage layer error types
//!
//! All errors that can occur while talking to the relational store are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying SQLite library
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// invalid identifier (sha, branch, tag, repository name)
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the database file does not exist and creation was not requested
    #[error("database not found: {0}")]
    NotInitialized(PathBuf),

    /// the repository was not found (or is soft-deleted)
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// a repository with the same workspace and name already exists
    #[error("repository already exists: {workspace}/{name}")]
    RepositoryAlreadyExists { workspace: String, name: String },

    /// row was updated by another writer between read and write
    #[error("concurrent modification of {entity}: expected version {expected}, found {actual}")]
    Conflict {
        entity: String,
        expected: i64,
        actual: i64,
    },

    /// data integrity check failed
    #[error("corrupted row in {table}: {reason}")]
    CorruptedData { table: String, reason: String },

    /// the session pool was shut down
    #[error("session pool closed")]
    PoolClosed,
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RepositoryNotFound(_)
                | StorageError::NotInitialized(_)
                | StorageError::Sqlite(rusqlite::Error::QueryReturnedNoRows)
        )
    }

    /// check if this error is a uniqueness or version conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::RepositoryAlreadyExists { .. } | StorageError::Conflict { .. }
        ) || self.sqlite_code() == Some(ErrorCode::ConstraintViolation)
    }

    /// check if this error is recoverable by replaying the operation
    ///
    /// Busy/locked databases and optimistic version conflicts are transient;
    /// every other failure is terminal.
    pub fn is_retriable(&self) -> bool {
        match self {
            StorageError::Conflict { .. } => true,
            _ => matches!(
                self.sqlite_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
        }
    }

    fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.code),
            _ => None,
        }
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
