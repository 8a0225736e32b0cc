//! Commit deletion.
//!
//! Two paths:
//! - plain delete: a batch of leaf commits without refs, removed in one
//!   transaction; shared commits only lose their membership
//! - dataset-version delete: splice a commit out of its chain, reattaching
//!   children and branches to its first parent
//!
//! Both clean up metadata at the default blob location.

use rusqlite::{params, Connection};

use crate::storage::{CommitSha, MetadataIdentity, Repositories, RepositoryHandle, RepositoryId};
use crate::versioning::error::{VersioningError, VersioningResult};
use crate::versioning::graph::CommitGraph;
use crate::versioning::metadata::MetadataService;
use crate::versioning::refs::{RefDirectory, RefKind};

/// What happened to one dataset version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted {
        repository_id: RepositoryId,
        retargeted_branches: usize,
    },
    /// No such commit (possibly removed by an earlier attempt).
    Missing,
    /// Root commits have nothing to splice onto.
    Parentless,
}

pub struct DeletionCoordinator;

impl DeletionCoordinator {
    /// Delete leaf commits of `repository`.
    ///
    /// The whole batch is validated before anything is written, so a failure
    /// leaves the store untouched.
    pub fn delete_commits(
        conn: &Connection,
        metadata: &dyn MetadataService,
        repository: &RepositoryHandle,
        shas: &[CommitSha],
    ) -> VersioningResult<()> {
        let mut batch: Vec<&CommitSha> = Vec::with_capacity(shas.len());
        for sha in shas {
            if !batch.contains(&sha) {
                batch.push(sha);
            }
        }

        for sha in &batch {
            CommitGraph::require_member(conn, repository, sha)?;
        }
        for sha in &batch {
            Self::check_deletable(conn, repository.id, sha)?;
        }

        for sha in batch {
            conn.execute(
                "DELETE FROM repository_commits WHERE repository_id = ?1 AND commit_sha = ?2",
                params![repository.id.get(), sha.as_str()],
            )?;
            let remaining_owners = CommitGraph::owners(conn, sha)?;
            let child_edges = Self::child_edge_count(conn, sha)?;
            if remaining_owners.is_empty() && child_edges == 0 {
                conn.execute("DELETE FROM commits WHERE sha = ?1", params![sha.as_str()])?;
                tracing::info!(sha = %sha.short(), repository_id = %repository.id, "deleted commit");
            } else {
                tracing::info!(
                    sha = %sha.short(),
                    repository_id = %repository.id,
                    owners = remaining_owners.len(),
                    "detached shared commit"
                );
            }
            let identity = MetadataIdentity::at_default_location(repository.id, sha.clone());
            metadata.delete_all(conn, &identity)?;
        }
        Ok(())
    }

    fn check_deletable(conn: &Connection, repository_id: RepositoryId, sha: &CommitSha) -> VersioningResult<()> {
        let children = CommitGraph::children_of(conn, repository_id, sha)?;
        if !children.is_empty() {
            return Err(VersioningError::precondition(format!(
                "commit {} has {} child commit(s); delete the children first",
                sha,
                children.len()
            )));
        }

        let branches = RefDirectory::pointing_at(conn, RefKind::Branch, repository_id, sha)?;
        let tags = RefDirectory::pointing_at(conn, RefKind::Tag, repository_id, sha)?;
        if branches.is_empty() && tags.is_empty() {
            return Ok(());
        }
        let mut refs = Vec::new();
        if !branches.is_empty() {
            refs.push(format!("branches [{}]", branches.join(", ")));
        }
        if !tags.is_empty() {
            refs.push(format!("tags [{}]", tags.join(", ")));
        }
        Err(VersioningError::precondition(format!(
            "commit {} is referenced by {}",
            sha,
            refs.join(" and ")
        )))
    }

    fn child_edge_count(conn: &Connection, sha: &CommitSha) -> VersioningResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM commit_parents WHERE parent_sha = ?1",
            params![sha.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Remove one dataset version, reattaching its children to its first parent.
    ///
    /// Runs inside the caller's immediate transaction. When `expected` is set,
    /// the owning repository must match it.
    pub fn delete_dataset_version(
        conn: &Connection,
        metadata: &dyn MetadataService,
        expected: Option<&RepositoryHandle>,
        sha: &CommitSha,
    ) -> VersioningResult<DeletionOutcome> {
        let commit = match CommitGraph::load(conn, sha)? {
            Some(commit) => commit,
            None => {
                tracing::info!(sha = %sha.short(), "dataset version not found, skipping");
                return Ok(DeletionOutcome::Missing);
            }
        };
        let first_parent = match commit.first_parent() {
            Some(parent) => parent.clone(),
            None => {
                tracing::info!(sha = %sha.short(), "dataset version has no parent, skipping");
                return Ok(DeletionOutcome::Parentless);
            }
        };

        let owners = CommitGraph::owners(conn, sha)?;
        let repository_id = match owners.as_slice() {
            [only] => *only,
            [] => return Err(VersioningError::internal(format!("commit {} belongs to no repository", sha))),
            many => {
                return Err(VersioningError::internal(format!(
                    "commit {} belongs to {} repositories",
                    sha,
                    many.len()
                )))
            }
        };
        let repository = Repositories::get(conn, repository_id)?;
        if let Some(expected) = expected {
            if expected.id != repository.id {
                return Err(VersioningError::internal(format!(
                    "commit {} belongs to repository {}, not {}",
                    sha, repository.id, expected.id
                )));
            }
        }

        let tags = RefDirectory::pointing_at(conn, RefKind::Tag, repository.id, sha)?;
        if !tags.is_empty() {
            return Err(VersioningError::precondition(format!(
                "commit {} is referenced by tags [{}]",
                sha,
                tags.join(", ")
            )));
        }
        let retargeted_branches = RefDirectory::retarget_branches(conn, repository.id, sha, &first_parent)?;

        let mut locked = vec![sha.clone()];
        locked.extend(Self::all_children(conn, sha)?);
        CommitGraph::lock_rows(conn, &locked)?;

        // a child already listing the first parent would end up with it twice
        conn.execute(
            "DELETE FROM commit_parents WHERE parent_sha = ?1
               AND child_sha IN (SELECT child_sha FROM commit_parents WHERE parent_sha = ?2)",
            params![sha.as_str(), first_parent.as_str()],
        )?;
        let rewired = conn.execute(
            "UPDATE commit_parents SET parent_sha = ?2 WHERE parent_sha = ?1",
            params![sha.as_str(), first_parent.as_str()],
        )?;

        let identity = MetadataIdentity::at_default_location(repository.id, sha.clone());
        metadata.delete_all(conn, &identity)?;
        conn.execute("DELETE FROM commits WHERE sha = ?1", params![sha.as_str()])?;

        tracing::info!(
            sha = %sha.short(),
            repository_id = %repository.id,
            parent = %first_parent.short(),
            rewired,
            retargeted_branches,
            "deleted dataset version"
        );
        Ok(DeletionOutcome::Deleted {
            repository_id: repository.id,
            retargeted_branches,
        })
    }

    /// Children across every repository.
    fn all_children(conn: &Connection, sha: &CommitSha) -> VersioningResult<Vec<CommitSha>> {
        let mut stmt = conn.prepare("SELECT DISTINCT child_sha FROM commit_parents WHERE parent_sha = ?1")?;
        let raw = stmt
            .query_map(params![sha.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|s| CommitSha::new(s).map_err(VersioningError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RefName;
    use crate::versioning::error::ErrorCode;
    use crate::versioning::metadata::SqlMetadata;
    use crate::versioning::testing::{commit_at, TestRepo};
    use crate::storage::testing::open_temp_store;

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_delete_commit_with_child_mutates_nothing() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "r");
        let a = commit_at(&tx, &repo, &[], "a", 1);
        let b = commit_at(&tx, &repo, &[&a], "b", 2);

        let err = DeletionCoordinator::delete_commits(&tx, &SqlMetadata, &repo.handle, &[b.sha.clone(), a.sha.clone()])
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
        assert_eq!(count(&tx, "SELECT COUNT(*) FROM commits"), 2);
        assert_eq!(count(&tx, "SELECT COUNT(*) FROM repository_commits"), 2);
    }

    #[test]
    fn test_delete_names_blocking_refs() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "r");
        let a = commit_at(&tx, &repo, &[], "a", 1);
        RefDirectory::set_branch(&tx, &repo.handle, &RefName::master(), &a.sha).unwrap();
        RefDirectory::set_tag(&tx, &repo.handle, &RefName::new("v1").unwrap(), &a.sha).unwrap();

        let err = DeletionCoordinator::delete_commits(&tx, &SqlMetadata, &repo.handle, &[a.sha.clone()]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("master"), "{}", msg);
        assert!(msg.contains("v1"), "{}", msg);
    }

    #[test]
    fn test_delete_leaf_and_metadata() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "r");
        let a = commit_at(&tx, &repo, &[], "a", 1);
        let b = commit_at(&tx, &repo, &[&a], "b", 2);
        let identity = MetadataIdentity::at_default_location(repo.handle.id, b.sha.clone());
        SqlMetadata.add_labels(&tx, &identity, &["x".to_string()]).unwrap();

        DeletionCoordinator::delete_commits(&tx, &SqlMetadata, &repo.handle, &[b.sha.clone()]).unwrap();
        assert!(CommitGraph::load(&tx, &b.sha).unwrap().is_none());
        assert!(SqlMetadata.get_labels(&tx, &identity).unwrap().is_empty());
        assert_eq!(count(&tx, "SELECT COUNT(*) FROM commit_parents"), 0);

        // now a leaf
        DeletionCoordinator::delete_commits(&tx, &SqlMetadata, &repo.handle, &[a.sha.clone()]).unwrap();
        assert_eq!(count(&tx, "SELECT COUNT(*) FROM commits"), 0);

        let err = DeletionCoordinator::delete_commits(&tx, &SqlMetadata, &repo.handle, &[a.sha.clone()]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_shared_commit_only_detached() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let r1 = TestRepo::create(&tx, "one");
        let r2 = TestRepo::create(&tx, "two");
        let a = commit_at(&tx, &r1, &[], "same", 1);
        commit_at(&tx, &r2, &[], "same", 1);

        DeletionCoordinator::delete_commits(&tx, &SqlMetadata, &r1.handle, &[a.sha.clone()]).unwrap();
        assert!(CommitGraph::load(&tx, &a.sha).unwrap().is_some());
        assert_eq!(CommitGraph::owners(&tx, &a.sha).unwrap(), vec![r2.handle.id]);
    }

    #[test]
    fn test_dataset_version_splice_retargets_master() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "ds");
        let root = commit_at(&tx, &repo, &[], "root", 1);
        let a = commit_at(&tx, &repo, &[&root], "a", 2);
        let b = commit_at(&tx, &repo, &[&a], "b", 3);
        let master = RefName::master();
        let dev = RefName::new("dev").unwrap();
        RefDirectory::set_branch(&tx, &repo.handle, &master, &a.sha).unwrap();
        RefDirectory::set_branch(&tx, &repo.handle, &dev, &b.sha).unwrap();

        let outcome =
            DeletionCoordinator::delete_dataset_version(&tx, &SqlMetadata, Some(&repo.handle), &a.sha).unwrap();
        assert_eq!(
            outcome,
            DeletionOutcome::Deleted {
                repository_id: repo.handle.id,
                retargeted_branches: 1
            }
        );

        assert_eq!(CommitGraph::parents_of(&tx, &b.sha).unwrap(), vec![root.sha.clone()]);
        assert_eq!(
            RefDirectory::resolve(&tx, RefKind::Branch, repo.handle.id, &master).unwrap(),
            Some(root.sha.clone())
        );
        assert_eq!(
            RefDirectory::resolve(&tx, RefKind::Branch, repo.handle.id, &dev).unwrap(),
            Some(b.sha.clone())
        );
        assert!(CommitGraph::load(&tx, &a.sha).unwrap().is_none());
    }

    #[test]
    fn test_dataset_version_skips_and_guards() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "ds");
        let other = TestRepo::create(&tx, "other");
        let root = commit_at(&tx, &repo, &[], "root", 1);
        let a = commit_at(&tx, &repo, &[&root], "a", 2);

        assert_eq!(
            DeletionCoordinator::delete_dataset_version(&tx, &SqlMetadata, None, &root.sha).unwrap(),
            DeletionOutcome::Parentless
        );
        let missing = CommitSha::new("0".repeat(64)).unwrap();
        assert_eq!(
            DeletionCoordinator::delete_dataset_version(&tx, &SqlMetadata, None, &missing).unwrap(),
            DeletionOutcome::Missing
        );

        let err = DeletionCoordinator::delete_dataset_version(&tx, &SqlMetadata, Some(&other.handle), &a.sha)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);

        RefDirectory::set_tag(&tx, &repo.handle, &RefName::new("v1").unwrap(), &a.sha).unwrap();
        let err = DeletionCoordinator::delete_dataset_version(&tx, &SqlMetadata, None, &a.sha).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
        assert!(CommitGraph::load(&tx, &a.sha).unwrap().is_some());
    }

    #[test]
    fn test_dataset_version_merge_child_keeps_unique_parents() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "ds");
        let root = commit_at(&tx, &repo, &[], "root", 1);
        let a = commit_at(&tx, &repo, &[&root], "a", 2);
        let merge = commit_at(&tx, &repo, &[&a, &root], "merge", 3);

        DeletionCoordinator::delete_dataset_version(&tx, &SqlMetadata, None, &a.sha).unwrap();
        assert_eq!(CommitGraph::parents_of(&tx, &merge.sha).unwrap(), vec![root.sha.clone()]);
    }
}
