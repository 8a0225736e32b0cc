//! In-process lock manager.
//!
//! Writers that may produce the same commit serialize on a string key (the
//! candidate commit identity). Entries are reference counted: created on the
//! first acquire, removed when the last guard or waiter lets go.
//!
//! ```text
//!   acquire_write_lock("k") ──► table["k"] (Arc<RwLock>) ──► WriteLockGuard
//!                                     ▲                            │
//!                                     └──── removed when unused ◄──┘ drop
//! ```
//!
//! There is no cross-process guarantee here; `BEGIN IMMEDIATE` transactions
//! cover that at the store level.

mod manager;

pub use manager::{LockManager, ReadLockGuard, WriteLockGuard, DEFAULT_SOFT_CAPACITY};
