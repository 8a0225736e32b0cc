//! Service facade.
//!
//! `VersioningService` owns the session pool, the lock manager and the
//! collaborator implementations, and exposes every versioning operation.
//! Each call:
//! - runs inside an `info_span` tagged with a fresh ulid
//! - checks out a session and opens one transaction (immediate for writes)
//! - is replayed from scratch by the retry policy on transient failures

mod api;
mod config;

pub use api::{FindCommitsRequest, FindCommitsResponse, FoundCommit, Projection, VersioningService, DESCRIPTION_PROPERTY};
pub use config::ServiceConfig;
