//! Session pooling for store access.
//!
//! A `Session` wraps one SQLite connection checked out of a bounded pool.
//! When every session is in use, `SessionPool::get` blocks until one is
//! returned. Sessions go back to the pool on drop.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema;

/// Options used to open a [`SessionPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub path: PathBuf,
    pub create_if_missing: bool,
    pub max_sessions: usize,
    pub busy_timeout: Duration,
}

impl PoolOptions {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            create_if_missing: true,
            max_sessions: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// A store session checked out of the pool.
pub struct Session {
    id: usize,
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Session {
    /// identifier of the underlying pooled connection
    pub fn id(&self) -> usize {
        self.id
    }

    /// Raw connection access, for statements outside an explicit transaction.
    pub fn connection(&mut self) -> StorageResult<&mut Connection> {
        self.conn.as_mut().ok_or(StorageError::PoolClosed)
    }

    /// Begin a write transaction (`BEGIN IMMEDIATE`).
    ///
    /// Takes SQLite's reserved lock up front so two writers never both read
    /// and then collide on upgrade.
    pub fn write(&mut self) -> StorageResult<Transaction<'_>> {
        let conn = self.connection()?;
        Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Begin a read transaction (`BEGIN DEFERRED`).
    pub fn read(&mut self) -> StorageResult<Transaction<'_>> {
        let conn = self.connection()?;
        Ok(conn.transaction_with_behavior(TransactionBehavior::Deferred)?)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut state = self.pool.state.lock();
        if state.closed {
            state.created = state.created.saturating_sub(1);
            drop(conn);
        } else {
            state.idle.push_back((self.id, conn));
        }
        self.pool.available.notify_one();
    }
}

struct PoolState {
    idle: VecDeque<(usize, Connection)>,
    created: usize,
    next_id: usize,
    closed: bool,
}

struct PoolInner {
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn connect(&self) -> StorageResult<Connection> {
        let conn = Connection::open(&self.options.path)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        schema::configure_connection(&conn)?;
        Ok(conn)
    }
}

/// Bounded pool of store sessions.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl SessionPool {
    /// Open the store at `options.path`, installing the schema if needed.
    pub fn open(options: PoolOptions) -> StorageResult<Self> {
        if !options.path.exists() {
            if !options.create_if_missing {
                return Err(StorageError::NotInitialized(options.path.clone()));
            }
            if let Some(parent) = options.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let max_sessions = options.max_sessions.max(1);
        let inner = Arc::new(PoolInner {
            options: PoolOptions {
                max_sessions,
                ..options
            },
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                created: 0,
                next_id: 0,
                closed: false,
            }),
            available: Condvar::new(),
        });

        let first = inner.connect()?;
        schema::install_schema(&first)?;
        {
            let mut state = inner.state.lock();
            state.next_id = 1;
            state.created = 1;
            state.idle.push_back((1, first));
        }

        tracing::debug!(path = %inner.options.path.display(), max_sessions, "opened session pool");
        Ok(Self { inner })
    }

    /// Check out a session, blocking while the pool is exhausted.
    pub fn get(&self) -> StorageResult<Session> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(StorageError::PoolClosed);
            }

            if let Some((id, conn)) = state.idle.pop_front() {
                return Ok(Session {
                    id,
                    conn: Some(conn),
                    pool: self.inner.clone(),
                });
            }

            if state.created < self.inner.options.max_sessions {
                state.created += 1;
                state.next_id += 1;
                let id = state.next_id;
                drop(state);

                return match self.inner.connect() {
                    Ok(conn) => Ok(Session {
                        id,
                        conn: Some(conn),
                        pool: self.inner.clone(),
                    }),
                    Err(err) => {
                        let mut state = self.inner.state.lock();
                        state.created = state.created.saturating_sub(1);
                        self.inner.available.notify_one();
                        Err(err)
                    }
                };
            }

            self.inner.available.wait(&mut state);
        }
    }

    /// Shut the pool down; outstanding sessions are closed when dropped.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let idle = state.idle.len();
        state.idle.clear();
        state.created = state.created.saturating_sub(idle);
        self.inner.available.notify_all();
    }

    /// Number of idle sessions.
    pub fn available(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of live connections (idle or checked out).
    pub fn created(&self) -> usize {
        self.inner.state.lock().created
    }

    pub fn path(&self) -> &Path {
        &self.inner.options.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn options(dir: &TempDir, max: usize) -> PoolOptions {
        PoolOptions {
            max_sessions: max,
            ..PoolOptions::new(dir.path().join("store.db"))
        }
    }

    #[test]
    fn test_pool_reuse() {
        let dir = TempDir::new().unwrap();
        let pool = SessionPool::open(options(&dir, 4)).unwrap();
        assert_eq!(pool.created(), 1);

        {
            let _s1 = pool.get().unwrap();
            let _s2 = pool.get().unwrap();
            assert_eq!(pool.created(), 2);
        }

        assert_eq!(pool.available(), 2);
        let _s3 = pool.get().unwrap();
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_missing_store_without_create() {
        let dir = TempDir::new().unwrap();
        let opts = PoolOptions {
            create_if_missing: false,
            ..options(&dir, 1)
        };
        let err = SessionPool::open(opts).err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_exhausted_pool_blocks_until_release() {
        let dir = TempDir::new().unwrap();
        let pool = SessionPool::open(options(&dir, 1)).unwrap();

        let held = pool.get().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.get().map(|s| s.id()))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        let held_id = held.id();
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_write_transaction_commits() {
        let dir = TempDir::new().unwrap();
        let pool = SessionPool::open(options(&dir, 2)).unwrap();

        let mut session = pool.get().unwrap();
        let tx = session.write().unwrap();
        tx.execute(
            "INSERT INTO repositories (workspace, name, date_created, date_updated) VALUES ('w', 'r', 1, 1)",
            [],
        )
        .unwrap();
        tx.commit().unwrap();
        drop(session);

        let mut other = pool.get().unwrap();
        let tx = other.read().unwrap();
        let count: i64 = tx
            .query_row("SELECT COUNT(*) FROM repositories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_closed_pool_rejects_checkout() {
        let dir = TempDir::new().unwrap();
        let pool = SessionPool::open(options(&dir, 2)).unwrap();
        pool.close();
        assert!(matches!(pool.get(), Err(StorageError::PoolClosed)));
    }
}
