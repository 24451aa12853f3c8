use rusqlite::{Connection, OpenFlags};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::PoolError;

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub path: PathBuf,
    pub size: usize,
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
}

struct PoolState {
    idle: Vec<Connection>,
    checked_out: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A panic while holding this lock cannot leave the Vec half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size pool of SQLite connections.
///
/// Connections are opened eagerly. [`DbPool::get`] blocks the calling worker
/// until a connection is free or `acquire_timeout` elapses; the returned
/// guard puts the connection back on drop, so every exit path of a request
/// (including a panic unwinding through it) releases it.
#[derive(Clone)]
pub struct DbPool {
    inner: Arc<PoolInner>,
}

impl DbPool {
    pub fn open(config: PoolConfig) -> Result<Self, PoolError> {
        let mut idle = Vec::with_capacity(config.size);
        for _ in 0..config.size {
            idle.push(open_connection(&config.path, config.busy_timeout)?);
        }
        info!(
            path = %config.path.display(),
            size = config.size,
            "Database pool opened"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(PoolState {
                    idle,
                    checked_out: 0,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Check out one connection for the lifetime of the returned guard.
    pub fn get(&self) -> Result<PooledConnection, PoolError> {
        let timeout = self.inner.config.acquire_timeout;
        // `None` waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(conn) = state.idle.pop() {
                state.checked_out += 1;
                debug!(
                    checked_out = state.checked_out,
                    idle = state.idle.len(),
                    "Connection checked out"
                );
                return Ok(PooledConnection {
                    conn: Some(conn),
                    pool: Arc::clone(&self.inner),
                });
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                            "Connection pool exhausted"
                        );
                        return Err(PoolError::Timeout(timeout));
                    }
                    self.inner
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .inner
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Drop idle connections and refuse further checkouts. Connections still
    /// checked out are closed when their guard drops.
    ///
    /// Returns false when the pool was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.inner.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let dropped = state.idle.len();
        state.idle.clear();
        let in_use = state.checked_out;
        drop(state);
        self.inner.available.notify_all();
        info!(closed = dropped, in_use = in_use, "Database pool closed");
        true
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Idle connection count, for diagnostics and tests.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.config.size
    }

    /// Run a SQL script (schema bootstrap) on one pooled connection.
    pub fn run_script(&self, script: &str) -> anyhow::Result<()> {
        let conn = self.get()?;
        conn.execute_batch(script)?;
        Ok(())
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags).map_err(PoolError::Open)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(PoolError::Open)?;
    conn.busy_timeout(busy_timeout).map_err(PoolError::Open)?;
    Ok(conn)
}

/// A connection checked out of a [`DbPool`].
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable_conn())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable_conn())
    }
}

#[cold]
fn unreachable_conn() -> ! {
    #[allow(clippy::panic)]
    {
        panic!("pooled connection used after release")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut state = self.pool.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        if state.closed {
            drop(state);
            drop(conn);
            return;
        }
        if !conn.is_autocommit() {
            // A transaction left open would leak into the next request.
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Failed to roll back connection on release; discarding it");
                drop(state);
                return;
            }
        }
        state.idle.push(conn);
        debug!(checked_out = state.checked_out, "Connection returned");
        drop(state);
        self.pool.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(dir: &tempfile::TempDir, size: usize) -> DbPool {
        DbPool::open(PoolConfig {
            path: dir.path().join("pool.db"),
            size,
            busy_timeout: Duration::from_millis(500),
            acquire_timeout: Duration::from_millis(50),
        })
        .unwrap()
    }

    #[test]
    fn test_guard_returns_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 2);
        {
            let _a = pool.get().unwrap();
            let _b = pool.get().unwrap();
            assert_eq!(pool.idle_count(), 0);
        }
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1);
        let _held = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(PoolError::Timeout(_))));
    }

    #[test]
    fn test_close_refuses_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1);
        let held = pool.get().unwrap();
        assert!(pool.close());
        assert!(!pool.close());
        assert!(matches!(pool.get(), Err(PoolError::Closed)));
        drop(held);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_open_transaction_rolled_back_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(&dir, 1);
        pool.run_script("CREATE TABLE t (v TEXT);").unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch("BEGIN; INSERT INTO t VALUES ('x');").unwrap();
        }
        let conn = pool.get().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_unbounded_timeout_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DbPool::open(PoolConfig {
            path: dir.path().join("pool.db"),
            size: 1,
            busy_timeout: Duration::from_millis(500),
            acquire_timeout: Duration::MAX,
        })
        .unwrap();
        let held = pool.get().unwrap();
        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.get().map(|_| ()))
        };
        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }
}
