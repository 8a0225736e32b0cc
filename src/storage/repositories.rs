//! Repository rows.
//!
//! Only the slice of repository management the commit graph needs: create,
//! look up by id or `(workspace, name)`, soft-delete, and list ids for access
//! scoping.

use std::fmt;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{InvalidNameError, RepositoryId};

/// Kind of repository. Dataset repositories hold dataset versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    Regular,
    Dataset,
}

impl RepositoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RepositoryKind::Regular => "regular",
            RepositoryKind::Dataset => "dataset",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(RepositoryKind::Regular),
            "dataset" => Some(RepositoryKind::Dataset),
            _ => None,
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live (not soft-deleted) repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryHandle {
    pub id: RepositoryId,
    pub workspace: String,
    pub name: String,
    pub owner: String,
    pub kind: RepositoryKind,
    pub date_created: i64,
    pub date_updated: i64,
}

/// Fields supplied when creating a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRepository {
    #[serde(default)]
    pub workspace: String,
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default = "default_kind")]
    pub kind: RepositoryKind,
}

fn default_kind() -> RepositoryKind {
    RepositoryKind::Regular
}

impl NewRepository {
    pub fn new(workspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            name: name.into(),
            owner: String::new(),
            kind: RepositoryKind::Regular,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn kind(mut self, kind: RepositoryKind) -> Self {
        self.kind = kind;
        self
    }
}

fn validate_repository_name(name: &str) -> Result<(), InvalidNameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 256 {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if let Some((position, char)) = name.chars().enumerate().find(|(_, c)| c.is_control() || *c == '/') {
        return Err(InvalidNameError::InvalidCharacter { char, position });
    }
    Ok(())
}

const COLUMNS: &str = "id, workspace, name, owner, kind, date_created, date_updated";

fn from_row(row: &Row<'_>) -> rusqlite::Result<(RepositoryHandle, String)> {
    let kind: String = row.get(4)?;
    Ok((
        RepositoryHandle {
            id: RepositoryId(row.get(0)?),
            workspace: row.get(1)?,
            name: row.get(2)?,
            owner: row.get(3)?,
            kind: RepositoryKind::Regular,
            date_created: row.get(5)?,
            date_updated: row.get(6)?,
        },
        kind,
    ))
}

fn finish(raw: (RepositoryHandle, String)) -> StorageResult<RepositoryHandle> {
    let (mut handle, kind) = raw;
    handle.kind = RepositoryKind::parse(&kind).ok_or_else(|| StorageError::CorruptedData {
        table: "repositories".into(),
        reason: format!("unknown repository kind '{}' for id {}", kind, handle.id),
    })?;
    Ok(handle)
}

/// Repository table access.
pub struct Repositories;

impl Repositories {
    /// Insert a new repository row.
    pub fn create(conn: &Connection, new: &NewRepository, now: i64) -> StorageResult<RepositoryHandle> {
        validate_repository_name(&new.name)?;

        let exists = conn
            .query_row(
                "SELECT 1 FROM repositories WHERE workspace = ?1 AND name = ?2",
                params![new.workspace, new.name],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StorageError::RepositoryAlreadyExists {
                workspace: new.workspace.clone(),
                name: new.name.clone(),
            });
        }

        conn.execute(
            "INSERT INTO repositories (workspace, name, owner, kind, date_created, date_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![new.workspace, new.name, new.owner, new.kind.as_str(), now],
        )?;

        Ok(RepositoryHandle {
            id: RepositoryId(conn.last_insert_rowid()),
            workspace: new.workspace.clone(),
            name: new.name.clone(),
            owner: new.owner.clone(),
            kind: new.kind,
            date_created: now,
            date_updated: now,
        })
    }

    /// Fetch a live repository by id.
    pub fn get(conn: &Connection, id: RepositoryId) -> StorageResult<RepositoryHandle> {
        let sql = format!("SELECT {} FROM repositories WHERE id = ?1 AND deleted = 0", COLUMNS);
        let raw = conn
            .query_row(&sql, params![id.get()], from_row)
            .optional()?
            .ok_or_else(|| StorageError::RepositoryNotFound(id.to_string()))?;
        finish(raw)
    }

    /// Fetch a live repository by workspace and name.
    pub fn find(conn: &Connection, workspace: &str, name: &str) -> StorageResult<RepositoryHandle> {
        let sql = format!(
            "SELECT {} FROM repositories WHERE workspace = ?1 AND name = ?2 AND deleted = 0",
            COLUMNS
        );
        let raw = conn
            .query_row(&sql, params![workspace, name], from_row)
            .optional()?
            .ok_or_else(|| StorageError::RepositoryNotFound(format!("{}/{}", workspace, name)))?;
        finish(raw)
    }

    /// Mark a repository deleted. Its commits stay in place.
    pub fn soft_delete(conn: &Connection, id: RepositoryId, now: i64) -> StorageResult<()> {
        let changed = conn.execute(
            "UPDATE repositories SET deleted = 1, date_updated = ?2 WHERE id = ?1 AND deleted = 0",
            params![id.get(), now],
        )?;
        if changed == 0 {
            return Err(StorageError::RepositoryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Ids of every live repository, optionally restricted to one workspace.
    pub fn list_ids(conn: &Connection, workspace: Option<&str>) -> StorageResult<Vec<RepositoryId>> {
        let mut stmt = conn.prepare(
            "SELECT id FROM repositories
             WHERE deleted = 0 AND (?1 IS NULL OR workspace = ?1)
             ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![workspace], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(RepositoryId))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::open_temp_store;

    #[test]
    fn test_create_and_lookup() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();

        let created = Repositories::create(
            &tx,
            &NewRepository::new("team", "mnist").kind(RepositoryKind::Dataset),
            100,
        )
        .unwrap();
        assert_eq!(created.kind, RepositoryKind::Dataset);

        let by_id = Repositories::get(&tx, created.id).unwrap();
        let by_name = Repositories::find(&tx, "team", "mnist").unwrap();
        assert_eq!(by_id, created);
        assert_eq!(by_name, created);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();

        Repositories::create(&tx, &NewRepository::new("w", "r"), 1).unwrap();
        let err = Repositories::create(&tx, &NewRepository::new("w", "r"), 2).unwrap_err();
        assert!(err.is_conflict());

        // same name in another workspace is fine
        Repositories::create(&tx, &NewRepository::new("other", "r"), 3).unwrap();
    }

    #[test]
    fn test_soft_delete_hides_repository() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();

        let repo = Repositories::create(&tx, &NewRepository::new("w", "r"), 1).unwrap();
        Repositories::soft_delete(&tx, repo.id, 2).unwrap();

        assert!(Repositories::get(&tx, repo.id).unwrap_err().is_not_found());
        assert!(Repositories::soft_delete(&tx, repo.id, 3).unwrap_err().is_not_found());
        assert!(Repositories::list_ids(&tx, None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_names() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();

        assert!(matches!(
            Repositories::create(&tx, &NewRepository::new("w", "  "), 1),
            Err(StorageError::InvalidName(InvalidNameError::Empty))
        ));
        assert!(matches!(
            Repositories::create(&tx, &NewRepository::new("w", "a/b"), 1),
            Err(StorageError::InvalidName(InvalidNameError::InvalidCharacter { char: '/', .. }))
        ));
    }

    #[test]
    fn test_list_ids_by_workspace() {
        let (_dir, pool) = open_temp_store();
        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();

        let a = Repositories::create(&tx, &NewRepository::new("w1", "a"), 1).unwrap();
        let b = Repositories::create(&tx, &NewRepository::new("w2", "b"), 1).unwrap();

        assert_eq!(Repositories::list_ids(&tx, Some("w1")).unwrap(), vec![a.id]);
        assert_eq!(Repositories::list_ids(&tx, None).unwrap(), vec![a.id, b.id]);
    }
}
