//! Query compilation and execution errors.

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while compiling or running a predicate query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed predicate, key, operator/field combination or sort key.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Predicate value of a kind the engine does not handle.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl QueryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        QueryError::InvalidArgument(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        QueryError::Unimplemented(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Storage(err) => err.is_retriable(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(e: rusqlite::Error) -> Self {
        QueryError::Storage(StorageError::Sqlite(e))
    }
}
