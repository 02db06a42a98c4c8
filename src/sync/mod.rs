//! Incremental sync of encrypted remote collections into the local cache.

mod engine;
mod manager;
mod types;

pub use engine::{PageCursor, SyncEngine};
pub use manager::{RefreshOutcome, SyncManager};
pub use types::{
    CollectionSync, DecryptedRecord, PageRequest, RemotePage, RemoteRecord, RemoteSource,
    SyncOptions, SyncProgress, SyncProgressCallback, SyncTransportError, SyncedPage,
    DEFAULT_PAGE_SIZE,
};
