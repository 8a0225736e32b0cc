//! Runs compiled commit queries against a store connection.

use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::query::ast::CompiledQuery;
use crate::query::compiler::{compile, AccessScope, CommitQuery};
use crate::query::error::QueryResult;
use crate::storage::{CommitSha, RepositoryId, StorageError};

/// One matching (repository, commit) membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedCommit {
    pub repository_id: RepositoryId,
    pub sha: CommitSha,
}

/// A page of matches plus the total across all pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPage {
    pub matches: Vec<MatchedCommit>,
    pub total_records: u64,
}

/// Predicate query engine.
pub struct QueryEngine;

impl QueryEngine {
    /// Find commits matching `query` within `scope`.
    ///
    /// Returns an empty page without touching the main tables when the scope
    /// is empty or any positive child predicate matches nothing at all.
    pub fn find(conn: &Connection, scope: &AccessScope, query: &CommitQuery) -> QueryResult<QueryPage> {
        let Some(plan) = compile(scope, query)? else {
            tracing::debug!("empty access scope, skipping query");
            return Ok(QueryPage::default());
        };

        for probe in &plan.probes {
            if !Self::exists(conn, probe)? {
                tracing::debug!(probe = %probe.sql, "predicate matches no rows, skipping query");
                return Ok(QueryPage::default());
            }
        }

        let total: i64 = conn.query_row(
            &plan.count.sql,
            params_from_iter(plan.count.params.iter()),
            |row| row.get(0),
        )?;
        if total == 0 {
            return Ok(QueryPage::default());
        }
        let total_records = total.max(0) as u64;
        match plan.offset {
            Some(offset) if offset < total => {}
            _ => {
                tracing::debug!(total, offset = ?plan.offset, "page starts past the last match");
                return Ok(QueryPage {
                    matches: Vec::new(),
                    total_records,
                });
            }
        }

        let mut stmt = conn.prepare(&plan.page.sql)?;
        let rows = stmt
            .query_map(params_from_iter(plan.page.params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut matches = Vec::with_capacity(rows.len());
        for (repository_id, sha) in rows {
            matches.push(MatchedCommit {
                repository_id: RepositoryId(repository_id),
                sha: CommitSha::new(sha).map_err(StorageError::from)?,
            });
        }

        tracing::debug!(total, returned = matches.len(), "commit query");
        Ok(QueryPage { matches, total_records })
    }

    fn exists(conn: &Connection, probe: &CompiledQuery) -> QueryResult<bool> {
        let hit = conn
            .query_row(&probe.sql, params_from_iter(probe.params.iter()), |_| Ok(()))
            .optional()?;
        Ok(hit.is_some())
    }
}
