//! Versioning engine: commit graph, refs, metadata and deletion.
//!
//! Every function here takes a `&Connection` that is really a transaction
//! opened by the caller (see `service`). Nothing in this module commits.
//!
//! # Architecture
//!
//! ```text
//!   CreateCommitRequest ──► sha::commit_lock_key ──► LockManager
//!                                                       │ guard
//!                                                       ▼
//!   BlobBuilder ─────────────────────────────► graph::CommitGraph ──► commits
//!                                                       │              commit_parents
//!                                                       │              repository_commits
//!            ┌──────────────────────────┬───────────────┘
//!            ▼                          ▼
//!   ┌─────────────────┐       ┌───────────────────┐
//!   │ refs            │◄──────│ deletion          │
//!   │ branches, tags  │       │ plain / splice    │
//!   └─────────────────┘       └───────────────────┘
//!                                       │
//!                                       ▼
//!                             metadata::MetadataService
//!                             (labels, properties, key/values)
//! ```

mod collaborators;
mod commit;
mod deletion;
mod error;
mod graph;
mod metadata;
mod refs;
mod sha;

pub use collaborators::{
    AccessProvider, AllowAll, BlobAttributeSetter, BlobBuilder, FixedRootHash, RepositoryRef, RepositoryResolver,
    StaticAccess,
};
pub use commit::{Commit, CreateCommitRequest};
pub use deletion::{DeletionCoordinator, DeletionOutcome};
pub use error::{ErrorCode, VersioningError, VersioningResult};
pub use graph::{CommitGraph, ListCommitsRequest, Page};
pub use metadata::{AttributeWriter, KeyValue, MetadataService, SqlMetadata};
pub use refs::{NamedRef, RefDirectory, RefKind};
pub use sha::{commit_lock_key, compute_commit_sha};

#[cfg(test)]
pub(crate) mod testing {
    use rusqlite::Connection;

    use crate::lock::LockManager;
    use crate::storage::{NewRepository, Repositories, RepositoryHandle, RepositoryKind};

    use super::{CommitGraph, Commit, CreateCommitRequest, FixedRootHash};

    pub(crate) struct TestRepo {
        pub(crate) handle: RepositoryHandle,
    }

    impl TestRepo {
        pub(crate) fn create(conn: &Connection, name: &str) -> Self {
            let new = NewRepository::new("ws", name).kind(RepositoryKind::Dataset);
            let handle = Repositories::create(conn, &new, 1).unwrap();
            Self { handle }
        }
    }

    /// Commit with a root hash derived from the message.
    pub(crate) fn commit_at(conn: &Connection, repo: &TestRepo, parents: &[&Commit], message: &str, millis: i64) -> Commit {
        let locks = LockManager::new();
        let guard = locks.acquire_write_lock(message);
        let request = CreateCommitRequest::new(message, "tester")
            .parents(parents.iter().map(|p| p.sha.to_string()))
            .at(millis);
        let root = FixedRootHash::new(format!("tree-{}", message)).unwrap();
        CommitGraph::create_commit(conn, &guard, &repo.handle, &request, &root).unwrap()
    }
}
