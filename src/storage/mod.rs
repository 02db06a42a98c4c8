//! Local persistence: the SQLite cache, the boot store and the epoch guard.

mod boot_store;
mod cache_store;
mod epoch;
mod handle;
mod schema;

pub use boot_store::{BootStore, JsonFileBootStore, MemoryBootStore};
pub use cache_store::{BatchReport, CacheOptions, CacheStore, Row, DEFAULT_BATCH_SIZE};
pub use epoch::{
    wipe_local_state, CacheEpochGuard, EpochOutcome, StorageReady, CACHE_EPOCH, CACHE_EPOCH_KEY,
};
pub use handle::{Database, DbConfig, DbHandle};
pub use schema::{collection, validate_identifier, CollectionSchema, ColumnType, SchemaBuilder, ID_COLUMN};
