//! Error taxonomy for the cache, sync, and session layers.

use thiserror::Error;

pub use fieldcase_crypto::CryptoError;

/// Failures of the local relational store. Never retried implicitly.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Constraint violation: {message}")]
    Constraint {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Record does not match schema for \"{table}\": {message}")]
    Schema { table: String, message: String },

    #[error("Invalid SQL identifier: \"{0}\"")]
    InvalidIdentifier(String),

    #[error("Boot store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Boot store data is invalid: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        let message = e.to_string();
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => StorageError::Constraint {
                message,
                source: Some(e),
            },
            Some(
                rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::DatabaseBusy
                | rusqlite::ErrorCode::DatabaseLocked
                | rusqlite::ErrorCode::NotADatabase,
            ) => StorageError::Connection {
                message,
                source: Some(e),
            },
            _ => StorageError::Query {
                message,
                source: Some(e),
            },
        }
    }
}

/// Failures of an incremental sync. The watermark is never advanced on any of these.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch of \"{collection}\" was not ok: {response}")]
    Fetch { collection: String, response: String },

    #[error("Transport error for \"{collection}\": {message}")]
    Transport { collection: String, message: String },

    #[error("Failed to decrypt record {id} in \"{collection}\": {source}")]
    Decrypt {
        collection: String,
        id: String,
        #[source]
        source: CryptoError,
    },

    #[error(
        "More than {page_size} records in \"{collection}\" share updated_at {updated_at}; \
         a larger page size is needed"
    )]
    PageOverflow {
        collection: String,
        updated_at: i64,
        page_size: usize,
    },

    #[error("Record {id} in \"{collection}\" has invalid content: {message}")]
    Content {
        collection: String,
        id: String,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is locked")]
    Locked,

    /// Deliberately says nothing about which step failed.
    #[error("Cannot unlock")]
    CannotUnlock,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
