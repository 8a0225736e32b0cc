//!  Commit creation and history traversal
//!
//!  commits are rows in `commits`, ordered parent edges in `commit_parents`
//!  and membership rows in `repository_commits`:
//! - parents must already be members of the repository, so the graph stays acyclic
//! - identical content yields the same sha; a second create reuses the row
//! - history is walked through parent edges restricted to one repository

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::lock::WriteLockGuard;
use crate::query::page_offset;
use crate::storage::{now_millis, CommitSha, RepositoryHandle, RepositoryId, StorageError};
use crate::versioning::collaborators::BlobBuilder;
use crate::versioning::commit::{Commit, CreateCommitRequest};
use crate::versioning::error::{VersioningError, VersioningResult};
use crate::versioning::sha::compute_commit_sha;

/// A page of results plus the total across all pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_records: u64,
}

/// Parameters of `list_commits`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListCommitsRequest {
    /// oldest commit of the range (inclusive, by creation time)
    pub base_sha: Option<String>,
    /// newest commit of the range (inclusive, by creation time)
    pub head_sha: Option<String>,
    pub ascending: bool,
    pub page_number: u32,
    pub page_limit: u32,
}

const COMMIT_COLUMNS: &str = "sha, root_sha, author, message, date_created, date_updated, version_number";

struct CommitRow {
    sha: String,
    root_sha: String,
    author: String,
    message: String,
    date_created: i64,
    date_updated: i64,
    version_number: i64,
}

impl CommitRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sha: row.get(0)?,
            root_sha: row.get(1)?,
            author: row.get(2)?,
            message: row.get(3)?,
            date_created: row.get(4)?,
            date_updated: row.get(5)?,
            version_number: row.get(6)?,
        })
    }
}

fn parse_sha(raw: String, table: &str) -> VersioningResult<CommitSha> {
    CommitSha::new(raw.as_str()).map_err(|e| {
        VersioningError::Storage(StorageError::CorruptedData {
            table: table.to_string(),
            reason: format!("bad sha '{}': {}", raw, e),
        })
    })
}

fn not_found(sha: &CommitSha, repository_id: RepositoryId) -> VersioningError {
    VersioningError::CommitNotFound {
        sha: sha.to_string(),
        repository: repository_id.to_string(),
    }
}

/// Commit graph store.
pub struct CommitGraph;

impl CommitGraph {
    /// Create a commit in `repository`.
    ///
    /// The caller holds the write lock for the candidate commit identity;
    /// `_lock` is proof of that. Parents are resolved inside the repository
    /// and kept in request order. When a commit with the computed sha already
    /// exists, the row is reused and only membership is added.
    pub fn create_commit(
        conn: &Connection,
        _lock: &WriteLockGuard,
        repository: &RepositoryHandle,
        request: &CreateCommitRequest,
        blob_builder: &dyn BlobBuilder,
    ) -> VersioningResult<Commit> {
        let parents = request.parsed_parents()?;
        for parent in &parents {
            if !Self::is_member(conn, repository.id, parent)? {
                return Err(VersioningError::ParentNotFound {
                    sha: parent.to_string(),
                    repository: repository.id.to_string(),
                });
            }
        }

        let date_created = request.date_created.unwrap_or_else(now_millis);
        let root = blob_builder.build(conn)?;
        let sha = compute_commit_sha(&root, &parents, &request.message, &request.author, date_created);

        if Self::exists(conn, &sha)? {
            let added = conn.execute(
                "INSERT OR IGNORE INTO repository_commits (repository_id, commit_sha) VALUES (?1, ?2)",
                params![repository.id.get(), sha.as_str()],
            )?;
            tracing::debug!(sha = %sha.short(), repository_id = %repository.id, grafted = added > 0, "commit already exists");
        } else {
            conn.execute(
                "INSERT INTO commits (sha, root_sha, author, message, date_created, date_updated, version_number)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)",
                params![sha.as_str(), root.as_str(), request.author, request.message, date_created],
            )?;
            let mut edge = conn.prepare(
                "INSERT INTO commit_parents (child_sha, parent_sha, parent_order) VALUES (?1, ?2, ?3)",
            )?;
            for (order, parent) in parents.iter().enumerate() {
                edge.execute(params![sha.as_str(), parent.as_str(), order as i64])?;
            }
            conn.execute(
                "INSERT INTO repository_commits (repository_id, commit_sha) VALUES (?1, ?2)",
                params![repository.id.get(), sha.as_str()],
            )?;
            tracing::info!(sha = %sha.short(), repository_id = %repository.id, parents = parents.len(), "created commit");
        }

        Self::load(conn, &sha)?.ok_or_else(|| not_found(&sha, repository.id))
    }

    /// Fetch a commit that belongs to `repository`.
    pub fn get_commit(conn: &Connection, sha: &CommitSha, repository: &RepositoryHandle) -> VersioningResult<Commit> {
        if !Self::is_member(conn, repository.id, sha)? {
            return Err(not_found(sha, repository.id));
        }
        Self::load(conn, sha)?.ok_or_else(|| not_found(sha, repository.id))
    }

    /// Fetch a commit row regardless of membership.
    pub fn load(conn: &Connection, sha: &CommitSha) -> VersioningResult<Option<Commit>> {
        let sql = format!("SELECT {} FROM commits WHERE sha = ?1", COMMIT_COLUMNS);
        let row = conn
            .query_row(&sql, params![sha.as_str()], CommitRow::from_row)
            .optional()?;
        match row {
            Some(row) => Ok(Some(Self::assemble(conn, row)?)),
            None => Ok(None),
        }
    }

    fn assemble(conn: &Connection, row: CommitRow) -> VersioningResult<Commit> {
        let sha = parse_sha(row.sha, "commits")?;
        let parent_shas = Self::parents_of(conn, &sha)?;
        Ok(Commit {
            sha,
            root_sha: row.root_sha,
            author: row.author,
            message: row.message,
            date_created: row.date_created,
            date_updated: row.date_updated,
            version_number: row.version_number,
            parent_shas,
        })
    }

    pub fn exists(conn: &Connection, sha: &CommitSha) -> VersioningResult<bool> {
        let hit = conn
            .query_row("SELECT 1 FROM commits WHERE sha = ?1", params![sha.as_str()], |_| Ok(()))
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn is_member(conn: &Connection, repository_id: RepositoryId, sha: &CommitSha) -> VersioningResult<bool> {
        let hit = conn
            .query_row(
                "SELECT 1 FROM repository_commits WHERE repository_id = ?1 AND commit_sha = ?2",
                params![repository_id.get(), sha.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    /// `NotFound` unless `sha` belongs to `repository`.
    pub fn require_member(conn: &Connection, repository: &RepositoryHandle, sha: &CommitSha) -> VersioningResult<()> {
        if Self::is_member(conn, repository.id, sha)? {
            Ok(())
        } else {
            Err(not_found(sha, repository.id))
        }
    }

    /// Repositories a commit belongs to.
    pub fn owners(conn: &Connection, sha: &CommitSha) -> VersioningResult<Vec<RepositoryId>> {
        let mut stmt = conn.prepare(
            "SELECT repository_id FROM repository_commits WHERE commit_sha = ?1 ORDER BY repository_id",
        )?;
        let ids = stmt
            .query_map(params![sha.as_str()], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(RepositoryId))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Parents in their stored order (mainline first).
    pub fn parents_of(conn: &Connection, sha: &CommitSha) -> VersioningResult<Vec<CommitSha>> {
        let mut stmt = conn.prepare(
            "SELECT parent_sha FROM commit_parents WHERE child_sha = ?1 ORDER BY parent_order",
        )?;
        let raw = stmt
            .query_map(params![sha.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(|s| parse_sha(s, "commit_parents")).collect()
    }

    /// Children of `sha` that belong to `repository_id`.
    pub fn children_of(
        conn: &Connection,
        repository_id: RepositoryId,
        sha: &CommitSha,
    ) -> VersioningResult<Vec<CommitSha>> {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT p.child_sha FROM commit_parents p
             INNER JOIN repository_commits rc ON rc.commit_sha = p.child_sha AND rc.repository_id = ?1
             WHERE p.parent_sha = ?2
             ORDER BY p.child_sha",
        )?;
        let raw = stmt
            .query_map(params![repository_id.get(), sha.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(|s| parse_sha(s, "commit_parents")).collect()
    }

    /// Root hash only, for light projections.
    pub fn root_sha_of(conn: &Connection, sha: &CommitSha) -> VersioningResult<Option<String>> {
        let root = conn
            .query_row("SELECT root_sha FROM commits WHERE sha = ?1", params![sha.as_str()], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(root)
    }

    /// Bump `date_updated` and `version_number`. Returns the new version.
    pub fn touch_commit(conn: &Connection, sha: &CommitSha, now: i64) -> VersioningResult<i64> {
        let version: Option<i64> = conn
            .query_row(
                "UPDATE commits SET date_updated = MAX(date_updated, ?2), version_number = version_number + 1
                 WHERE sha = ?1 RETURNING version_number",
                params![sha.as_str(), now],
                |row| row.get(0),
            )
            .optional()?;
        version.ok_or_else(|| VersioningError::CommitNotFound {
            sha: sha.to_string(),
            repository: "*".into(),
        })
    }

    /// Write-lock rows about to be rewritten.
    ///
    /// Inside a `BEGIN IMMEDIATE` transaction this is a no-op update that
    /// also verifies every row is still present; a row that vanished since it
    /// was read surfaces as a retryable conflict.
    pub fn lock_rows(conn: &Connection, shas: &[CommitSha]) -> VersioningResult<()> {
        let mut stmt = conn.prepare("UPDATE commits SET version_number = version_number WHERE sha = ?1")?;
        for sha in shas {
            let touched = stmt.execute(params![sha.as_str()])?;
            if touched != 1 {
                return Err(StorageError::Conflict {
                    entity: format!("commit {}", sha.short()),
                    expected: 1,
                    actual: touched as i64,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Commits of a repository, optionally bounded by a base and head commit.
    ///
    /// Bounds use each endpoint's own creation time, inclusive. Results are
    /// ordered by `date_updated`, then sha.
    pub fn list_commits(
        conn: &Connection,
        repository: &RepositoryHandle,
        request: &ListCommitsRequest,
    ) -> VersioningResult<Page<Commit>> {
        let bound = |raw: &Option<String>| -> VersioningResult<Option<i64>> {
            match raw {
                None => Ok(None),
                Some(raw) => {
                    let sha = CommitSha::new(raw.as_str())?;
                    Ok(Some(Self::get_commit(conn, &sha, repository)?.date_created))
                }
            }
        };
        let lower = bound(&request.base_sha)?;
        let upper = bound(&request.head_sha)?;

        let filter = "FROM repository_commits rc INNER JOIN commits c ON c.sha = rc.commit_sha
             WHERE rc.repository_id = ?1
               AND (?2 IS NULL OR c.date_created >= ?2)
               AND (?3 IS NULL OR c.date_created <= ?3)";

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {}", filter),
            params![repository.id.get(), lower, upper],
            |row| row.get(0),
        )?;
        let total_records = total.max(0) as u64;

        let direction = if request.ascending { "ASC" } else { "DESC" };
        let mut sql = format!(
            "SELECT c.sha, c.root_sha, c.author, c.message, c.date_created, c.date_updated, c.version_number {}
             ORDER BY c.date_updated {}, c.sha ASC",
            filter, direction
        );
        if request.page_number > 0 && request.page_limit > 0 {
            match page_offset(request.page_number, request.page_limit) {
                Some(offset) if offset < total => {
                    sql.push_str(&format!(" LIMIT {} OFFSET {}", request.page_limit, offset));
                }
                _ => {
                    return Ok(Page {
                        items: Vec::new(),
                        total_records,
                    })
                }
            }
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![repository.id.get(), lower, upper], CommitRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let items = rows
            .into_iter()
            .map(|row| Self::assemble(conn, row))
            .collect::<VersioningResult<Vec<_>>>()?;

        Ok(Page { items, total_records })
    }

    /// `sha` and every ancestor reachable inside the repository, newest first.
    pub fn commit_log(conn: &Connection, repository: &RepositoryHandle, sha: &CommitSha) -> VersioningResult<Vec<Commit>> {
        Self::require_member(conn, repository, sha)?;

        let mut stmt = conn.prepare(
            "WITH RECURSIVE ancestors(sha) AS (
                 SELECT ?2
                 UNION
                 SELECT p.parent_sha FROM commit_parents p
                 INNER JOIN ancestors a ON p.child_sha = a.sha
                 INNER JOIN repository_commits rc ON rc.commit_sha = p.parent_sha AND rc.repository_id = ?1
             )
             SELECT c.sha, c.root_sha, c.author, c.message, c.date_created, c.date_updated, c.version_number
             FROM ancestors a INNER JOIN commits c ON c.sha = a.sha
             ORDER BY c.date_created DESC, c.sha ASC",
        )?;
        let rows = stmt
            .query_map(params![repository.id.get(), sha.as_str()], CommitRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|row| Self::assemble(conn, row)).collect()
    }
}
