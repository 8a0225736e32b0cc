//! Labels, properties and key/value attributes keyed by `MetadataIdentity`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::query::KeyValueKind;
use crate::storage::{CommitSha, MetadataIdentity, RepositoryId, StorageError};
use crate::versioning::collaborators::BlobAttributeSetter;
use crate::versioning::error::{VersioningError, VersioningResult};

/// One key/value row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub kind: KeyValueKind,
    pub key: String,
    pub value: JsonValue,
}

impl KeyValue {
    pub fn new(kind: KeyValueKind, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn attribute(key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::new(KeyValueKind::Attributes, key, value)
    }
}

fn value_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "struct",
    }
}

/// Metadata storage consumed by the versioning engine.
pub trait MetadataService: Send + Sync {
    fn add_labels(&self, conn: &Connection, id: &MetadataIdentity, labels: &[String]) -> VersioningResult<()>;

    fn get_labels(&self, conn: &Connection, id: &MetadataIdentity) -> VersioningResult<Vec<String>>;

    /// Remove `labels`, or every label when `delete_all` is set.
    fn delete_labels(
        &self,
        conn: &Connection,
        id: &MetadataIdentity,
        labels: &[String],
        delete_all: bool,
    ) -> VersioningResult<()>;

    fn add_property(&self, conn: &Connection, id: &MetadataIdentity, name: &str, value: &str) -> VersioningResult<()>;

    fn get_property(&self, conn: &Connection, id: &MetadataIdentity, name: &str) -> VersioningResult<Option<String>>;

    fn delete_property(&self, conn: &Connection, id: &MetadataIdentity, name: &str) -> VersioningResult<()>;

    /// Insert or replace key/value rows.
    fn put_key_values(&self, conn: &Connection, id: &MetadataIdentity, entries: &[KeyValue]) -> VersioningResult<()>;

    fn get_key_values(
        &self,
        conn: &Connection,
        id: &MetadataIdentity,
        kind: Option<KeyValueKind>,
    ) -> VersioningResult<Vec<KeyValue>>;

    /// Drop every label, property and key/value row of `id`.
    fn delete_all(&self, conn: &Connection, id: &MetadataIdentity) -> VersioningResult<()>;
}

/// Metadata rows in the same SQLite store as the commit graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlMetadata;

impl MetadataService for SqlMetadata {
    fn add_labels(&self, conn: &Connection, id: &MetadataIdentity, labels: &[String]) -> VersioningResult<()> {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO labels (repository_id, commit_sha, location, label) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for label in labels {
            if label.trim().is_empty() {
                return Err(VersioningError::invalid("label is empty"));
            }
            stmt.execute(params![id.repository_id.get(), id.commit_sha.as_str(), id.location, label])?;
        }
        Ok(())
    }

    fn get_labels(&self, conn: &Connection, id: &MetadataIdentity) -> VersioningResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT label FROM labels
             WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3
             ORDER BY label",
        )?;
        let labels = stmt
            .query_map(
                params![id.repository_id.get(), id.commit_sha.as_str(), id.location],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(labels)
    }

    fn delete_labels(
        &self,
        conn: &Connection,
        id: &MetadataIdentity,
        labels: &[String],
        delete_all: bool,
    ) -> VersioningResult<()> {
        if delete_all {
            conn.execute(
                "DELETE FROM labels WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3",
                params![id.repository_id.get(), id.commit_sha.as_str(), id.location],
            )?;
            return Ok(());
        }
        let mut stmt = conn.prepare(
            "DELETE FROM labels WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3 AND label = ?4",
        )?;
        for label in labels {
            stmt.execute(params![id.repository_id.get(), id.commit_sha.as_str(), id.location, label])?;
        }
        Ok(())
    }

    fn add_property(&self, conn: &Connection, id: &MetadataIdentity, name: &str, value: &str) -> VersioningResult<()> {
        if name.trim().is_empty() {
            return Err(VersioningError::invalid("property name is empty"));
        }
        conn.execute(
            "INSERT INTO properties (repository_id, commit_sha, location, name, value)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(repository_id, commit_sha, location, name) DO UPDATE SET value = excluded.value",
            params![id.repository_id.get(), id.commit_sha.as_str(), id.location, name, value],
        )?;
        Ok(())
    }

    fn get_property(&self, conn: &Connection, id: &MetadataIdentity, name: &str) -> VersioningResult<Option<String>> {
        let value = conn
            .query_row(
                "SELECT value FROM properties
                 WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3 AND name = ?4",
                params![id.repository_id.get(), id.commit_sha.as_str(), id.location, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn delete_property(&self, conn: &Connection, id: &MetadataIdentity, name: &str) -> VersioningResult<()> {
        conn.execute(
            "DELETE FROM properties WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3 AND name = ?4",
            params![id.repository_id.get(), id.commit_sha.as_str(), id.location, name],
        )?;
        Ok(())
    }

    fn put_key_values(&self, conn: &Connection, id: &MetadataIdentity, entries: &[KeyValue]) -> VersioningResult<()> {
        let mut stmt = conn.prepare(
            "INSERT INTO key_values
                 (repository_id, commit_sha, location, field_type, kv_key, kv_value, value_type, num_value, str_value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(repository_id, commit_sha, location, field_type, kv_key) DO UPDATE SET
                 kv_value = excluded.kv_value,
                 value_type = excluded.value_type,
                 num_value = excluded.num_value,
                 str_value = excluded.str_value",
        )?;
        for entry in entries {
            if entry.key.trim().is_empty() {
                return Err(VersioningError::invalid(format!("empty {} key", entry.kind)));
            }
            let json = serde_json::to_string(&entry.value)?;
            let num_value = entry.value.as_f64();
            let str_value = entry.value.as_str();
            stmt.execute(params![
                id.repository_id.get(),
                id.commit_sha.as_str(),
                id.location,
                entry.kind.as_str(),
                entry.key,
                json,
                value_type(&entry.value),
                num_value,
                str_value,
            ])?;
        }
        Ok(())
    }

    fn get_key_values(
        &self,
        conn: &Connection,
        id: &MetadataIdentity,
        kind: Option<KeyValueKind>,
    ) -> VersioningResult<Vec<KeyValue>> {
        let mut stmt = conn.prepare(
            "SELECT field_type, kv_key, kv_value FROM key_values
             WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3
               AND (?4 IS NULL OR field_type = ?4)
             ORDER BY field_type, kv_key",
        )?;
        let rows = stmt
            .query_map(
                params![
                    id.repository_id.get(),
                    id.commit_sha.as_str(),
                    id.location,
                    kind.map(KeyValueKind::as_str)
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (field_type, key, json) in rows {
            let kind = KeyValueKind::parse(&field_type).ok_or_else(|| StorageError::CorruptedData {
                table: "key_values".into(),
                reason: format!("unknown field type '{}'", field_type),
            })?;
            out.push(KeyValue {
                kind,
                key,
                value: serde_json::from_str(&json)?,
            });
        }
        Ok(out)
    }

    fn delete_all(&self, conn: &Connection, id: &MetadataIdentity) -> VersioningResult<()> {
        let key = params![id.repository_id.get(), id.commit_sha.as_str(), id.location];
        let labels = conn.execute(
            "DELETE FROM labels WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3",
            key,
        )?;
        let properties = conn.execute(
            "DELETE FROM properties WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3",
            key,
        )?;
        let key_values = conn.execute(
            "DELETE FROM key_values WHERE repository_id = ?1 AND commit_sha = ?2 AND location = ?3",
            key,
        )?;
        tracing::debug!(identity = %id, labels, properties, key_values, "deleted metadata");
        Ok(())
    }
}

/// Attribute setter that writes key/value rows at one blob location.
#[derive(Debug, Clone)]
pub struct AttributeWriter<M = SqlMetadata> {
    metadata: M,
    location: String,
    entries: Vec<KeyValue>,
}

impl AttributeWriter<SqlMetadata> {
    pub fn new(location: impl Into<String>, entries: Vec<KeyValue>) -> Self {
        Self::with_metadata(SqlMetadata, location, entries)
    }
}

impl<M: MetadataService> AttributeWriter<M> {
    pub fn with_metadata(metadata: M, location: impl Into<String>, entries: Vec<KeyValue>) -> Self {
        Self {
            metadata,
            location: location.into(),
            entries,
        }
    }
}

impl<M: MetadataService> BlobAttributeSetter for AttributeWriter<M> {
    fn apply(&self, conn: &Connection, repository_id: RepositoryId, sha: &CommitSha) -> VersioningResult<()> {
        let id = MetadataIdentity::new(repository_id, sha.clone(), self.location.clone());
        self.metadata.put_key_values(conn, &id, &self.entries)
    }
}
