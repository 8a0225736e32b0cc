//! Retry wrapper for transient store failures.
//!
//! SQLite `BUSY`/`LOCKED` and optimistic version conflicts are replayed by
//! re-running the whole top-level operation under a bounded backoff policy.

mod policy;

pub use policy::{RetryPolicy, Retryable, DEFAULT_MAX_ATTEMPTS};
