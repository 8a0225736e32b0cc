//! Service configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::lock::DEFAULT_SOFT_CAPACITY;
use crate::retry::RetryPolicy;
use crate::storage::{PoolOptions, RefName, StorageResult};
use crate::versioning::VersioningResult;

/// Configuration for a [`VersioningService`](crate::service::VersioningService).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Create the database if it doesn't exist.
    pub create_if_missing: bool,
    /// Upper bound on pooled sessions.
    pub max_sessions: usize,
    /// How long a statement waits on a locked database.
    pub busy_timeout_ms: u64,
    /// Lock table size above which a warning is logged.
    pub lock_soft_capacity: usize,
    /// Branch created alongside a repository's initial commit.
    pub default_branch: String,
    pub retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("versiondb.sqlite"),
            create_if_missing: true,
            max_sessions: 8,
            busy_timeout_ms: 5_000,
            lock_soft_capacity: DEFAULT_SOFT_CAPACITY,
            default_branch: RefName::MASTER.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn max_sessions(mut self, value: usize) -> Self {
        self.max_sessions = value;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn lock_soft_capacity(mut self, value: usize) -> Self {
        self.lock_soft_capacity = value;
        self
    }

    pub fn default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub(crate) fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            path: self.path.clone(),
            create_if_missing: self.create_if_missing,
            max_sessions: self.max_sessions.max(1),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    pub(crate) fn default_branch_name(&self) -> VersioningResult<RefName> {
        Ok(RefName::new(self.default_branch.as_str())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"path": "/tmp/x.db", "max_sessions": 2, "retry": {{"max_attempts": 3}}}}"#
        )
        .unwrap();

        let config = ServiceConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
        assert_eq!(config.default_branch, "master");
        assert!(config.create_if_missing);
    }

    #[test]
    fn test_builder_and_pool_options() {
        let config = ServiceConfig::new("/data/meta.db")
            .max_sessions(0)
            .busy_timeout(Duration::from_millis(250))
            .default_branch("main");
        let options = config.pool_options();
        assert_eq!(options.max_sessions, 1);
        assert_eq!(options.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.default_branch_name().unwrap().as_str(), "main");

        assert!(ServiceConfig::default().default_branch("bad name").default_branch_name().is_err());
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            ServiceConfig::from_json_file(file.path()),
            Err(crate::storage::StorageError::Serialization(_))
        ));
    }
}
