//! SQLite connection pool
//!
//! A fixed-ceiling pool shared by every operation on one collection.
//! Up to `max_open` connections exist at once; at most `max_idle` are kept
//! when returned. Connections never expire by age.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;

use crate::dsn::PoolSettings;
use crate::error::{StoreError, StoreResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

pub struct ConnectionPool {
    path: PathBuf,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Open a pool on the database file at `path`
    ///
    /// One connection is opened eagerly so that an unusable database is
    /// reported here rather than on first use.
    pub fn open(path: &Path, settings: PoolSettings) -> StoreResult<Self> {
        let settings = PoolSettings {
            max_open: settings.max_open.max(1),
            max_idle: settings.max_idle.max(1).min(settings.max_open.max(1)),
        };
        let first = open_connection(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            settings,
            state: Mutex::new(PoolState {
                idle: vec![first],
                open: 1,
            }),
            available: Condvar::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check out a connection, blocking while the pool is exhausted
    pub fn get(&self) -> StoreResult<PooledConnection<'_>> {
        let mut state = self.lock_state();
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if state.open < self.settings.max_open {
                state.open += 1;
                drop(state);
                return match open_connection(&self.path) {
                    Ok(conn) => Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    }),
                    Err(e) => {
                        self.lock_state().open -= 1;
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Close every idle connection
    ///
    /// Connections still checked out are closed when they are dropped.
    pub fn close(&self) -> StoreResult<()> {
        let idle = {
            let mut state = self.lock_state();
            let idle = std::mem::take(&mut state.idle);
            state.open -= idle.len();
            idle
        };
        for conn in idle {
            conn.close().map_err(|(_, e)| StoreError::Database(e))?;
        }
        Ok(())
    }

    fn release(&self, conn: Connection) {
        let mut state = self.lock_state();
        if state.idle.len() < self.settings.max_idle {
            state.idle.push(conn);
        } else {
            state.open -= 1;
            drop(conn);
        }
        drop(state);
        self.available.notify_one();
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path).map_err(|e| StoreError::BackendUnavailable {
        details: format!("cannot open sqlite database {:?}: {}", path, e),
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // journal_mode reports the resulting mode as a row
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(conn)
}

/// A connection checked out of a [`ConnectionPool`]
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
