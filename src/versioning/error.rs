//! Versioning error types.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::query::QueryError;
use crate::retry::Retryable;
use crate::storage::{InvalidNameError, StorageError};

/// Result type for versioning operations.
pub type VersioningResult<T> = Result<T, VersioningError>;

/// Status code attached to every versioning failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Unimplemented,
    Internal,
    Unavailable,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::Unimplemented => "UNIMPLEMENTED",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::Unavailable => "UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// Errors raised by the commit graph, refs, metadata and deletion paths.
#[derive(Debug, Error)]
pub enum VersioningError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("commit {sha} not found in repository {repository}")]
    CommitNotFound { sha: String, repository: String },

    #[error("parent commit {sha} not found in repository {repository}")]
    ParentNotFound { sha: String, repository: String },

    #[error("{kind} '{name}' not found in repository {repository}")]
    RefNotFound {
        kind: &'static str,
        name: String,
        repository: String,
    },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VersioningError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        VersioningError::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        VersioningError::Internal(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        VersioningError::FailedPrecondition(msg.into())
    }

    /// Map onto the status code surfaced to callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            VersioningError::Storage(err) => storage_code(err),
            VersioningError::Query(QueryError::InvalidArgument(_)) => ErrorCode::InvalidArgument,
            VersioningError::Query(QueryError::Unimplemented(_)) => ErrorCode::Unimplemented,
            VersioningError::Query(QueryError::Storage(err)) => storage_code(err),
            VersioningError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            VersioningError::CommitNotFound { .. }
            | VersioningError::ParentNotFound { .. }
            | VersioningError::RefNotFound { .. } => ErrorCode::NotFound,
            VersioningError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            VersioningError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            VersioningError::Unimplemented(_) => ErrorCode::Unimplemented,
            VersioningError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == ErrorCode::NotFound
    }

    /// Whether replaying the whole operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            VersioningError::Storage(err) => err.is_retriable(),
            VersioningError::Query(err) => err.is_retryable(),
            _ => false,
        }
    }
}

fn storage_code(err: &StorageError) -> ErrorCode {
    match err {
        StorageError::InvalidName(_) => ErrorCode::InvalidArgument,
        StorageError::RepositoryAlreadyExists { .. } => ErrorCode::AlreadyExists,
        StorageError::CorruptedData { .. } | StorageError::Serialization(_) => ErrorCode::Internal,
        e if e.is_not_found() => ErrorCode::NotFound,
        _ => ErrorCode::Unavailable,
    }
}

impl From<rusqlite::Error> for VersioningError {
    fn from(e: rusqlite::Error) -> Self {
        VersioningError::Storage(StorageError::Sqlite(e))
    }
}

impl From<InvalidNameError> for VersioningError {
    fn from(e: InvalidNameError) -> Self {
        VersioningError::InvalidArgument(e.to_string())
    }
}

impl From<serde_json::Error> for VersioningError {
    fn from(e: serde_json::Error) -> Self {
        VersioningError::Storage(StorageError::Serialization(e))
    }
}

impl Retryable for VersioningError {
    fn is_retryable(&self) -> bool {
        VersioningError::is_retryable(self)
    }
}
