//! versiondb - a versioned metadata store
//!
//! Dataset and model snapshots are recorded as immutable commits in a
//! content-addressed graph kept in SQLite, next to the labels, properties
//! and key/value attributes that describe them. Commits can be filtered,
//! sorted and paged with typed predicates over those attributes.
//!
//! # Example
//!
//! ```no_run
//! use versiondb::service::{ServiceConfig, VersioningService};
//! use versiondb::storage::NewRepository;
//! use versiondb::versioning::{CreateCommitRequest, FixedRootHash};
//!
//! let service = VersioningService::open(ServiceConfig::new("./meta.db")).unwrap();
//! let repo = service.create_repository(&NewRepository::new("team", "mnist")).unwrap();
//! let root = FixedRootHash::new("tree-0").unwrap();
//! let commit = service
//!     .create_commit(&repo, &CreateCommitRequest::new("initial import", "alice"), &root, None)
//!     .unwrap();
//! service.set_branch(&repo, "master", commit.sha.as_str()).unwrap();
//! ```

pub mod lock;
pub mod query;
pub mod retry;
pub mod service;
pub mod storage;
pub mod versioning;

pub use service::{ServiceConfig, VersioningService};
pub use versioning::{ErrorCode, VersioningError, VersioningResult};
