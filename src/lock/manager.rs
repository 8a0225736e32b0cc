//! Reference-counted table of named read/write locks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};

/// Default soft capacity of the lock table.
pub const DEFAULT_SOFT_CAPACITY: usize = 1000;

type Entry = Arc<RwLock<()>>;

struct LockTable {
    entries: Mutex<HashMap<String, Entry>>,
    soft_capacity: usize,
}

impl LockTable {
    /// Get or create the entry for `key`, returning a clone the caller owns.
    fn checkout(&self, key: &str) -> Entry {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone();
        if entries.len() > self.soft_capacity {
            tracing::warn!(
                live = entries.len(),
                soft_capacity = self.soft_capacity,
                "lock table above soft capacity"
            );
        }
        entry
    }

    /// Drop the entry for `key` once nobody but the table references it.
    fn release(&self, key: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if Arc::strong_count(entry) == 1 {
                entries.remove(key);
            }
        }
    }
}

/// In-process advisory lock broker keyed by string.
///
/// Entries live exactly as long as some guard or waiter references them, so
/// a held lock is never evicted. Cloning shares the same table.
#[derive(Clone)]
pub struct LockManager {
    table: Arc<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_soft_capacity(DEFAULT_SOFT_CAPACITY)
    }

    pub fn with_soft_capacity(soft_capacity: usize) -> Self {
        Self {
            table: Arc::new(LockTable {
                entries: Mutex::new(HashMap::new()),
                soft_capacity,
            }),
        }
    }

    /// Block until an exclusive lock on `key` is held.
    pub fn acquire_write_lock(&self, key: &str) -> WriteLockGuard {
        let entry = self.table.checkout(key);
        let guard = entry.write_arc();
        tracing::trace!(key, "write lock acquired");
        WriteLockGuard {
            key: key.to_string(),
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Block until a shared lock on `key` is held.
    pub fn acquire_read_lock(&self, key: &str) -> ReadLockGuard {
        let entry = self.table.checkout(key);
        let guard = entry.read_arc();
        ReadLockGuard {
            key: key.to_string(),
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("live", &self.len())
            .field("soft_capacity", &self.table.soft_capacity)
            .finish()
    }
}

/// Exclusive lock on one key. Released on drop.
pub struct WriteLockGuard {
    key: String,
    guard: Option<ArcRwLockWriteGuard<RawRwLock, ()>>,
    table: Arc<LockTable>,
}

impl WriteLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for WriteLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}

impl fmt::Debug for WriteLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteLockGuard").field(&self.key).finish()
    }
}

/// Shared lock on one key. Released on drop.
pub struct ReadLockGuard {
    key: String,
    guard: Option<ArcRwLockReadGuard<RawRwLock, ()>>,
    table: Arc<LockTable>,
}

impl ReadLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ReadLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}

impl fmt::Debug for ReadLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadLockGuard").field(&self.key).finish()
    }
}
