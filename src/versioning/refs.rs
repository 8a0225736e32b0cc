//!  Branch and tag management.
//!
//!  Refs are named pointers to commits, scoped to one repository:
//! - branches are mutable and upserted by `set_branch`
//! - tags are immutable once set
//! - a commit referenced by either can't be removed by a plain delete
//!
//! Branches pointing at a dataset version that is being deleted are
//! retargeted to its first parent via `retarget_branches`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::storage::{CommitSha, RefName, RepositoryHandle, RepositoryId};
use crate::versioning::commit::Commit;
use crate::versioning::error::{VersioningError, VersioningResult};
use crate::versioning::graph::CommitGraph;

/// Kind of named reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    fn table(self) -> &'static str {
        match self {
            RefKind::Branch => "branches",
            RefKind::Tag => "tags",
        }
    }

    fn label(self) -> &'static str {
        match self {
            RefKind::Branch => "branch",
            RefKind::Tag => "tag",
        }
    }
}

/// A branch or tag row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub repository_id: RepositoryId,
    pub name: RefName,
    pub commit_sha: CommitSha,
}

/// Manages branches and tags.
pub struct RefDirectory;

impl RefDirectory {
    /// Point a branch at `sha`, creating it if needed.
    pub fn set_branch(
        conn: &Connection,
        repository: &RepositoryHandle,
        name: &RefName,
        sha: &CommitSha,
    ) -> VersioningResult<NamedRef> {
        CommitGraph::require_member(conn, repository, sha)?;
        conn.execute(
            "INSERT INTO branches (repository_id, name, commit_sha) VALUES (?1, ?2, ?3)
             ON CONFLICT(repository_id, name) DO UPDATE SET commit_sha = excluded.commit_sha",
            params![repository.id.get(), name.as_str(), sha.as_str()],
        )?;
        tracing::debug!(repository_id = %repository.id, branch = %name, sha = %sha.short(), "set branch");
        Ok(NamedRef {
            repository_id: repository.id,
            name: name.clone(),
            commit_sha: sha.clone(),
        })
    }

    /// Create a tag. Tags can't be moved once set.
    pub fn set_tag(
        conn: &Connection,
        repository: &RepositoryHandle,
        name: &RefName,
        sha: &CommitSha,
    ) -> VersioningResult<NamedRef> {
        CommitGraph::require_member(conn, repository, sha)?;
        if Self::resolve(conn, RefKind::Tag, repository.id, name)?.is_some() {
            return Err(VersioningError::AlreadyExists(format!(
                "tag '{}' in repository {}",
                name, repository.id
            )));
        }
        conn.execute(
            "INSERT INTO tags (repository_id, name, commit_sha) VALUES (?1, ?2, ?3)",
            params![repository.id.get(), name.as_str(), sha.as_str()],
        )?;
        Ok(NamedRef {
            repository_id: repository.id,
            name: name.clone(),
            commit_sha: sha.clone(),
        })
    }

    /// Resolve a ref name to the commit it targets, if it exists.
    pub fn resolve(
        conn: &Connection,
        kind: RefKind,
        repository_id: RepositoryId,
        name: &RefName,
    ) -> VersioningResult<Option<CommitSha>> {
        let sql = format!(
            "SELECT commit_sha FROM {} WHERE repository_id = ?1 AND name = ?2",
            kind.table()
        );
        let sha: Option<String> = conn
            .query_row(&sql, params![repository_id.get(), name.as_str()], |row| row.get(0))
            .optional()?;
        Ok(sha.map(CommitSha::new).transpose()?)
    }

    /// Load the commit a branch or tag points to.
    pub fn get(
        conn: &Connection,
        kind: RefKind,
        repository: &RepositoryHandle,
        name: &RefName,
    ) -> VersioningResult<Commit> {
        let sha = Self::resolve(conn, kind, repository.id, name)?.ok_or_else(|| VersioningError::RefNotFound {
            kind: kind.label(),
            name: name.to_string(),
            repository: repository.id.to_string(),
        })?;
        CommitGraph::get_commit(conn, &sha, repository)
    }

    /// All refs of one kind in a repository, by name.
    pub fn list(conn: &Connection, kind: RefKind, repository_id: RepositoryId) -> VersioningResult<Vec<NamedRef>> {
        let sql = format!(
            "SELECT name, commit_sha FROM {} WHERE repository_id = ?1 ORDER BY name",
            kind.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![repository_id.get()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut refs = Vec::with_capacity(rows.len());
        for (name, sha) in rows {
            refs.push(NamedRef {
                repository_id,
                name: RefName::new(name)?,
                commit_sha: CommitSha::new(sha)?,
            });
        }
        Ok(refs)
    }

    pub fn delete(conn: &Connection, kind: RefKind, repository_id: RepositoryId, name: &RefName) -> VersioningResult<()> {
        let sql = format!("DELETE FROM {} WHERE repository_id = ?1 AND name = ?2", kind.table());
        let deleted = conn.execute(&sql, params![repository_id.get(), name.as_str()])?;
        if deleted == 0 {
            return Err(VersioningError::RefNotFound {
                kind: kind.label(),
                name: name.to_string(),
                repository: repository_id.to_string(),
            });
        }
        Ok(())
    }

    /// Names of refs of one kind pointing at `sha` in a repository.
    pub fn pointing_at(
        conn: &Connection,
        kind: RefKind,
        repository_id: RepositoryId,
        sha: &CommitSha,
    ) -> VersioningResult<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {} WHERE repository_id = ?1 AND commit_sha = ?2 ORDER BY name",
            kind.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let names = stmt
            .query_map(params![repository_id.get(), sha.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    /// Move every branch targeting `from` to `to`. Returns how many moved.
    pub fn retarget_branches(
        conn: &Connection,
        repository_id: RepositoryId,
        from: &CommitSha,
        to: &CommitSha,
    ) -> VersioningResult<usize> {
        let moved = conn.execute(
            "UPDATE branches SET commit_sha = ?3 WHERE repository_id = ?1 AND commit_sha = ?2",
            params![repository_id.get(), from.as_str(), to.as_str()],
        )?;
        if moved > 0 {
            tracing::info!(
                repository_id = %repository_id,
                from = %from.short(),
                to = %to.short(),
                moved,
                "retargeted branches"
            );
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::open_temp_store;
    use crate::storage::{NewRepository, Repositories};
    use crate::versioning::testing::{commit_at, TestRepo};

    #[test]
    fn test_branch_upsert_and_get() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "r");
        let a = commit_at(&tx, &repo, &[], "a", 1);
        let b = commit_at(&tx, &repo, &[&a], "b", 2);
        let master = RefName::master();

        RefDirectory::set_branch(&tx, &repo.handle, &master, &a.sha).unwrap();
        RefDirectory::set_branch(&tx, &repo.handle, &master, &b.sha).unwrap();

        let head = RefDirectory::get(&tx, RefKind::Branch, &repo.handle, &master).unwrap();
        assert_eq!(head.sha, b.sha);
        assert_eq!(RefDirectory::list(&tx, RefKind::Branch, repo.handle.id).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_refs_and_foreign_commits() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "r");
        let other = TestRepo::create(&tx, "other");
        let foreign = commit_at(&tx, &other, &[], "x", 1);

        let err = RefDirectory::get(&tx, RefKind::Branch, &repo.handle, &RefName::master()).unwrap_err();
        assert!(err.is_not_found());

        let err = RefDirectory::set_branch(&tx, &repo.handle, &RefName::master(), &foreign.sha).unwrap_err();
        assert!(err.is_not_found());

        let err = RefDirectory::delete(&tx, RefKind::Tag, repo.handle.id, &RefName::new("v1").unwrap()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_tags_are_immutable() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "r");
        let a = commit_at(&tx, &repo, &[], "a", 1);
        let b = commit_at(&tx, &repo, &[&a], "b", 2);
        let v1 = RefName::new("v1").unwrap();

        RefDirectory::set_tag(&tx, &repo.handle, &v1, &a.sha).unwrap();
        let err = RefDirectory::set_tag(&tx, &repo.handle, &v1, &b.sha).unwrap_err();
        assert_eq!(err.code(), crate::versioning::ErrorCode::AlreadyExists);

        assert_eq!(
            RefDirectory::pointing_at(&tx, RefKind::Tag, repo.handle.id, &a.sha).unwrap(),
            vec!["v1"]
        );
        RefDirectory::delete(&tx, RefKind::Tag, repo.handle.id, &v1).unwrap();
        assert!(RefDirectory::list(&tx, RefKind::Tag, repo.handle.id).unwrap().is_empty());
    }

    #[test]
    fn test_retarget_branches() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        let repo = TestRepo::create(&tx, "r");
        let a = commit_at(&tx, &repo, &[], "a", 1);
        let b = commit_at(&tx, &repo, &[&a], "b", 2);

        for name in ["master", "dev"] {
            RefDirectory::set_branch(&tx, &repo.handle, &RefName::new(name).unwrap(), &b.sha).unwrap();
        }
        let moved = RefDirectory::retarget_branches(&tx, repo.handle.id, &b.sha, &a.sha).unwrap();
        assert_eq!(moved, 2);
        assert!(RefDirectory::pointing_at(&tx, RefKind::Branch, repo.handle.id, &b.sha)
            .unwrap()
            .is_empty());

        // branches in other repositories are untouched
        let other = Repositories::create(&tx, &NewRepository::new("w", "o"), 1).unwrap();
        assert_eq!(
            RefDirectory::retarget_branches(&tx, other.id, &a.sha, &b.sha).unwrap(),
            0
        );
    }
}
