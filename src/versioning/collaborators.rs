//! Seams to the systems around the commit graph.
//!
//! Blob/tree construction, repository resolution and authorization live
//! outside this crate in a full deployment. Each is a trait here with a small
//! implementation so the crate works on its own.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::query::AccessScope;
use crate::storage::{CommitSha, Repositories, RepositoryHandle, RepositoryId, TreeHash};
use crate::versioning::error::VersioningResult;

/// Produces the root hash of a commit's content tree.
///
/// Called inside the commit's write transaction, so anything it writes
/// commits or rolls back with the commit.
pub trait BlobBuilder {
    fn build(&self, conn: &Connection) -> VersioningResult<TreeHash>;
}

impl<F> BlobBuilder for F
where
    F: Fn(&Connection) -> VersioningResult<TreeHash>,
{
    fn build(&self, conn: &Connection) -> VersioningResult<TreeHash> {
        self(conn)
    }
}

/// A blob builder whose content hash is already known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedRootHash(pub TreeHash);

impl FixedRootHash {
    pub fn new(hash: impl Into<String>) -> VersioningResult<Self> {
        Ok(Self(TreeHash::new(hash)?))
    }
}

impl BlobBuilder for FixedRootHash {
    fn build(&self, _conn: &Connection) -> VersioningResult<TreeHash> {
        Ok(self.0.clone())
    }
}

/// Writes per-blob attributes once the commit row exists.
pub trait BlobAttributeSetter {
    fn apply(&self, conn: &Connection, repository_id: RepositoryId, sha: &CommitSha) -> VersioningResult<()>;
}

impl<F> BlobAttributeSetter for F
where
    F: Fn(&Connection, RepositoryId, &CommitSha) -> VersioningResult<()>,
{
    fn apply(&self, conn: &Connection, repository_id: RepositoryId, sha: &CommitSha) -> VersioningResult<()> {
        self(conn, repository_id, sha)
    }
}

/// Resolves the repository an operation targets.
pub trait RepositoryResolver {
    fn resolve(&self, conn: &Connection) -> VersioningResult<RepositoryHandle>;
}

/// Repository addressed by id or by `(workspace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepositoryRef {
    Id(RepositoryId),
    Name { workspace: String, name: String },
}

impl RepositoryRef {
    pub fn name(workspace: impl Into<String>, name: impl Into<String>) -> Self {
        RepositoryRef::Name {
            workspace: workspace.into(),
            name: name.into(),
        }
    }
}

impl From<RepositoryId> for RepositoryRef {
    fn from(id: RepositoryId) -> Self {
        RepositoryRef::Id(id)
    }
}

impl RepositoryResolver for RepositoryRef {
    fn resolve(&self, conn: &Connection) -> VersioningResult<RepositoryHandle> {
        let handle = match self {
            RepositoryRef::Id(id) => Repositories::get(conn, *id)?,
            RepositoryRef::Name { workspace, name } => Repositories::find(conn, workspace, name)?,
        };
        Ok(handle)
    }
}

impl RepositoryResolver for RepositoryHandle {
    fn resolve(&self, conn: &Connection) -> VersioningResult<RepositoryHandle> {
        Ok(Repositories::get(conn, self.id)?)
    }
}

/// Which repositories the caller may read.
pub trait AccessProvider: Send + Sync {
    fn accessible_repository_ids(&self, conn: &Connection, workspace: Option<&str>) -> VersioningResult<AccessScope>;
}

/// Every live repository, optionally narrowed to a workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessProvider for AllowAll {
    fn accessible_repository_ids(&self, conn: &Connection, workspace: Option<&str>) -> VersioningResult<AccessScope> {
        match workspace {
            None => Ok(AccessScope::All),
            Some(ws) => Ok(AccessScope::Only(Repositories::list_ids(conn, Some(ws))?)),
        }
    }
}

/// A fixed allow-list, for tests and single-tenant setups.
#[derive(Debug, Clone, Default)]
pub struct StaticAccess(pub Vec<RepositoryId>);

impl AccessProvider for StaticAccess {
    fn accessible_repository_ids(&self, conn: &Connection, workspace: Option<&str>) -> VersioningResult<AccessScope> {
        let ids = match workspace {
            None => self.0.clone(),
            Some(ws) => {
                let in_workspace = Repositories::list_ids(conn, Some(ws))?;
                self.0.iter().copied().filter(|id| in_workspace.contains(id)).collect()
            }
        };
        Ok(AccessScope::Only(ids))
    }
}
