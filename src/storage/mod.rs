//! storage layer for versiondb
//!
//! this module owns the relational store: schema installation, pooled
//! sessions, typed identifiers and the repository table. Upper layers
//! (commit graph, query engine, deletion) receive a `rusqlite::Transaction`
//! from a checked-out `Session` and never open connections themselves.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SessionPool                          │
//! │      (bounded, blocking checkout, schema on first open)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                       ┌─────────────┐
//!                       │   Session   │──── write(): BEGIN IMMEDIATE
//!                       │ (1 conn)    │──── read():  BEGIN DEFERRED
//!                       └─────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ repositories│       │   commits   │       │  metadata   │
//!  │   (rows)    │       │ edges, refs │       │ kv, labels  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use versiondb::storage::{NewRepository, PoolOptions, Repositories, SessionPool};
//!
//! let pool = SessionPool::open(PoolOptions::new("./meta.db"))?;
//! let mut session = pool.get()?;
//! let tx = session.write()?;
//! let repo = Repositories::create(&tx, &NewRepository::new("team", "mnist"), now)?;
//! tx.commit()?;
//! ```

mod error;
mod repositories;
mod schema;
mod session;
mod types;

// Re-export public API
pub use error::{StorageError, StorageResult};
pub use repositories::{NewRepository, Repositories, RepositoryHandle, RepositoryKind};
pub use schema::SCHEMA_VERSION;
pub use session::{PoolOptions, Session, SessionPool};
pub use types::{
    millis_to_datetime, now_millis, CommitSha, InvalidNameError, MetadataIdentity, RefName,
    RepositoryId, TreeHash, DEFAULT_BLOB_LOCATION, SHA_HEX_LEN,
};
