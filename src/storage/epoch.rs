//! Cache epoch guard.
//!
//! The boot store holds the epoch tag the local cache was built under. When it
//! is missing or differs from the expected tag, the relational cache and the
//! boot store are wiped and the expected tag is written. There is no
//! migration: a new epoch means a full resync.

use rusqlite::Connection;

use super::boot_store::BootStore;
use super::handle::DbHandle;
use super::schema::quote;
use crate::error::StorageError;

/// Epoch tag compiled into this build. Bump on any change to what is cached.
pub const CACHE_EPOCH: &str = "3";

/// Boot store key holding the epoch tag.
pub const CACHE_EPOCH_KEY: &str = "cache_epoch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochOutcome {
    /// Stored tag matched; nothing was touched.
    Valid,
    /// Local state was wiped. `previous` is the tag that was found, if any.
    Rebuilt { previous: Option<String> },
}

/// Proof that the epoch check ran to completion in this process.
///
/// Only [`CacheEpochGuard::run`] can produce one, and
/// [`CacheStore::new`](super::cache_store::CacheStore::new) requires it.
#[derive(Debug, Clone)]
pub struct StorageReady {
    outcome: EpochOutcome,
}

impl StorageReady {
    pub fn outcome(&self) -> &EpochOutcome {
        &self.outcome
    }
}

pub struct CacheEpochGuard {
    expected: String,
}

impl Default for CacheEpochGuard {
    fn default() -> Self {
        Self::new(CACHE_EPOCH)
    }
}

impl CacheEpochGuard {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Validate the stored epoch, wiping local state on mismatch.
    ///
    /// Call once at process start before anything else touches storage.
    pub async fn run(
        &self,
        db: &DbHandle,
        boot: &dyn BootStore,
    ) -> Result<StorageReady, StorageError> {
        let stored = boot.get(CACHE_EPOCH_KEY).await?;
        if stored.as_deref() == Some(self.expected.as_str()) {
            // Still wait for the database so the token implies a usable handle.
            db.ready().await?;
            tracing::debug!(epoch = %self.expected, "cache epoch valid");
            return Ok(StorageReady {
                outcome: EpochOutcome::Valid,
            });
        }

        tracing::info!(
            previous = ?stored,
            expected = %self.expected,
            "cache epoch changed; wiping local state"
        );
        self.clear(db, boot).await?;
        Ok(StorageReady {
            outcome: EpochOutcome::Rebuilt { previous: stored },
        })
    }

    /// Wipe the cache and boot store, then record the expected epoch.
    ///
    /// Also used on logout. The tag is written last, so an interrupted clear
    /// is repeated on the next start.
    pub async fn clear(&self, db: &DbHandle, boot: &dyn BootStore) -> Result<(), StorageError> {
        wipe_local_state(db, boot).await?;
        boot.set(CACHE_EPOCH_KEY, &self.expected).await
    }
}

/// Drop every cached table (watermarks included) and clear the boot store.
pub async fn wipe_local_state(db: &DbHandle, boot: &dyn BootStore) -> Result<(), StorageError> {
    let dropped = db.ready().await?.with_conn(drop_all_tables)?;
    boot.clear().await?;
    tracing::info!(tables = dropped, "local cache wiped");
    Ok(())
}

fn drop_all_tables(conn: &mut Connection) -> Result<usize, StorageError> {
    let names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };

    let tx = conn.transaction()?;
    for name in &names {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote(name)))?;
    }
    tx.commit()?;
    Ok(names.len())
}
