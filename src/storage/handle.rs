//! The process-wide SQLite handle and its readiness gate.
//!
//! `DbHandle::open` starts initialization on a blocking worker and returns at
//! once. Every caller reaches the connection through `ready().await`, which
//! resolves to the initialized database or to the initialization error, so
//! an uninitialized connection is never observable.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::watch;

use crate::error::StorageError;

/// Where the cache database lives.
#[derive(Debug, Clone)]
pub enum DbConfig {
    File(PathBuf),
    InMemory,
}

/// An open SQLite connection. Access is serialized through a mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    fn open(config: &DbConfig) -> Result<Self, StorageError> {
        let conn = match config {
            DbConfig::File(path) => {
                let conn = Connection::open(path).map_err(|e| StorageError::Connection {
                    message: format!("cannot open {}: {e}", path.display()),
                    source: Some(e),
                })?;
                let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                    row.get(0)
                })?;
                tracing::debug!(path = %path.display(), journal_mode = %mode, "opened cache database");
                conn
            }
            DbConfig::InMemory => Connection::open_in_memory()?,
        };
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }
}

enum DbState {
    Pending,
    Ready(Arc<Database>),
    Failed(String),
}

/// Cloneable handle to the shared database. Cheap to clone.
#[derive(Clone)]
pub struct DbHandle {
    state: watch::Receiver<DbState>,
}

impl DbHandle {
    /// Begin opening the database in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: DbConfig) -> Self {
        let (tx, rx) = watch::channel(DbState::Pending);
        tokio::task::spawn_blocking(move || {
            let state = match Database::open(&config) {
                Ok(db) => DbState::Ready(Arc::new(db)),
                Err(e) => {
                    tracing::warn!(error = %e, "cache database failed to open");
                    DbState::Failed(e.to_string())
                }
            };
            tx.send_replace(state);
        });
        Self { state: rx }
    }

    /// Wait until initialization has finished and return the database.
    pub async fn ready(&self) -> Result<Arc<Database>, StorageError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|s| !matches!(s, DbState::Pending))
            .await
            .map_err(|_| StorageError::Connection {
                message: "database initializer exited before completing".into(),
                source: None,
            })?;
        match &*state {
            DbState::Ready(db) => Ok(Arc::clone(db)),
            DbState::Failed(message) => Err(StorageError::Connection {
                message: message.clone(),
                source: None,
            }),
            DbState::Pending => Err(StorageError::Connection {
                message: "database is still initializing".into(),
                source: None,
            }),
        }
    }
}
