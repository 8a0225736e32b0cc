//! Relational schema for the commit graph and its metadata tables.

use rusqlite::Connection;

use crate::storage::error::StorageResult;

/// Bumped whenever the DDL below changes shape.
pub const SCHEMA_VERSION: i64 = 1;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    workspace      TEXT    NOT NULL DEFAULT '',
    name           TEXT    NOT NULL,
    owner          TEXT    NOT NULL DEFAULT '',
    kind           TEXT    NOT NULL DEFAULT 'regular',
    date_created   INTEGER NOT NULL,
    date_updated   INTEGER NOT NULL,
    deleted        INTEGER NOT NULL DEFAULT 0,
    UNIQUE (workspace, name)
);

CREATE TABLE IF NOT EXISTS commits (
    sha            TEXT    PRIMARY KEY,
    root_sha       TEXT    NOT NULL,
    author         TEXT    NOT NULL,
    message        TEXT    NOT NULL,
    date_created   INTEGER NOT NULL,
    date_updated   INTEGER NOT NULL,
    version_number INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS commit_parents (
    child_sha      TEXT    NOT NULL REFERENCES commits(sha) ON DELETE CASCADE,
    parent_sha     TEXT    NOT NULL REFERENCES commits(sha),
    parent_order   INTEGER NOT NULL,
    PRIMARY KEY (child_sha, parent_order)
);
CREATE INDEX IF NOT EXISTS idx_commit_parents_parent ON commit_parents(parent_sha);

CREATE TABLE IF NOT EXISTS repository_commits (
    repository_id  INTEGER NOT NULL REFERENCES repositories(id),
    commit_sha     TEXT    NOT NULL REFERENCES commits(sha) ON DELETE CASCADE,
    PRIMARY KEY (repository_id, commit_sha)
);
CREATE INDEX IF NOT EXISTS idx_repository_commits_sha ON repository_commits(commit_sha);

CREATE TABLE IF NOT EXISTS branches (
    repository_id  INTEGER NOT NULL REFERENCES repositories(id),
    name           TEXT    NOT NULL,
    commit_sha     TEXT    NOT NULL REFERENCES commits(sha),
    PRIMARY KEY (repository_id, name)
);
CREATE INDEX IF NOT EXISTS idx_branches_commit ON branches(commit_sha);

CREATE TABLE IF NOT EXISTS tags (
    repository_id  INTEGER NOT NULL REFERENCES repositories(id),
    name           TEXT    NOT NULL,
    commit_sha     TEXT    NOT NULL REFERENCES commits(sha),
    PRIMARY KEY (repository_id, name)
);
CREATE INDEX IF NOT EXISTS idx_tags_commit ON tags(commit_sha);

CREATE TABLE IF NOT EXISTS labels (
    repository_id  INTEGER NOT NULL,
    commit_sha     TEXT    NOT NULL,
    location       TEXT    NOT NULL,
    label          TEXT    NOT NULL,
    PRIMARY KEY (repository_id, commit_sha, location, label)
);
CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);

CREATE TABLE IF NOT EXISTS properties (
    repository_id  INTEGER NOT NULL,
    commit_sha     TEXT    NOT NULL,
    location       TEXT    NOT NULL,
    name           TEXT    NOT NULL,
    value          TEXT    NOT NULL,
    PRIMARY KEY (repository_id, commit_sha, location, name)
);

CREATE TABLE IF NOT EXISTS key_values (
    repository_id  INTEGER NOT NULL,
    commit_sha     TEXT    NOT NULL,
    location       TEXT    NOT NULL,
    field_type     TEXT    NOT NULL,
    kv_key         TEXT    NOT NULL,
    kv_value       TEXT    NOT NULL,
    value_type     TEXT    NOT NULL,
    num_value      REAL,
    str_value      TEXT,
    PRIMARY KEY (repository_id, commit_sha, location, field_type, kv_key)
);
CREATE INDEX IF NOT EXISTS idx_key_values_key ON key_values(field_type, kv_key);
"#;

/// Install (or verify) the schema on a freshly opened connection.
pub fn install_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(DDL)?;
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

/// Per-connection settings applied to every pooled session.
pub fn configure_connection(conn: &Connection) -> StorageResult<()> {
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
    Ok(())
}
