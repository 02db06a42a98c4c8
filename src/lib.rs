//! Encrypted local case cache.
//!
//! Remote case records arrive sealed under per-record entity keys wrapped by
//! the user's master key (see [`fieldcase_crypto`]). This crate holds the
//! master key for the session, pulls changed records page by page, decrypts
//! them, and keeps them in a local SQLite cache with a per-collection refresh
//! watermark. A compiled-in cache epoch invalidates the whole cache when what
//! is cached changes shape.
//!
//! Startup order:
//!
//! 1. [`storage::DbHandle::open`] starts opening the database.
//! 2. [`storage::CacheEpochGuard::run`] checks the epoch and returns a
//!    [`storage::StorageReady`] token.
//! 3. [`storage::CacheStore::new`] takes that token.
//! 4. [`sync::SyncManager`] refreshes collections into the cache.

pub mod error;
pub mod session;
pub mod storage;
pub mod sync;

pub use error::{CryptoError, Error, Result, SessionError, StorageError, SyncError};
pub use fieldcase_crypto as crypto;
pub use session::Session;
