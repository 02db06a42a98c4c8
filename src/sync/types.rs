//! Sync-specific types: the remote source trait, page wire shapes, and
//! options for incremental refresh.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// RemoteSource — user-provided network layer
// ============================================================================

/// User-implemented access to the remote record API.
///
/// Implementations perform the actual request (typically
/// `GET {PageRequest::path()}`) and return the decoded body. A body with
/// `ok: false` is returned as a page, not as an error; the engine turns it
/// into a fetch failure carrying the raw response.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn fetch_page(
        &self,
        request: &PageRequest,
    ) -> std::result::Result<RemotePage, SyncTransportError>;
}

/// Transport-level error (the request itself could not be made or decoded).
#[derive(Debug, Clone)]
pub struct SyncTransportError {
    pub message: String,
}

impl SyncTransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SyncTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SyncTransportError {}

// ============================================================================
// Wire Types
// ============================================================================

/// One page request against a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub collection: String,
    /// Only records modified strictly after this timestamp.
    pub after: i64,
    /// Include soft-deleted records. Off for a first full sync.
    pub with_deleted: bool,
    /// Page size.
    pub batch: usize,
}

impl PageRequest {
    /// Relative URL of this request on the remote API.
    pub fn path(&self) -> String {
        format!(
            "/{}?after={}&withDeleted={}&batch={}",
            self.collection, self.after, self.with_deleted, self.batch
        )
    }
}

/// Response body of a page request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotePage {
    pub ok: bool,
    #[serde(default)]
    pub data: Vec<RemoteRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemotePage {
    pub fn ok(data: Vec<RemoteRecord>) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// A record as the server stores it: metadata in the clear, content sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    /// Server-side modification time (ms since epoch).
    pub updated_at: i64,
    #[serde(default)]
    pub deleted: bool,
    /// Absent on tombstones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_entity_key: Option<String>,
}

// ============================================================================
// Sync Result Types
// ============================================================================

/// A live record after decryption.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedRecord {
    pub id: String,
    pub updated_at: i64,
    /// Decrypted JSON object.
    pub data: Map<String, Value>,
}

impl DecryptedRecord {
    /// The row to hand to the cache: decrypted fields plus `id` and
    /// `updated_at`, which override any same-named fields in the content.
    pub fn into_row(self) -> Value {
        let mut row = self.data;
        row.insert("id".into(), Value::String(self.id));
        row.insert("updated_at".into(), Value::from(self.updated_at));
        Value::Object(row)
    }
}

/// One decrypted page.
#[derive(Debug, Clone, Default)]
pub struct SyncedPage {
    /// New or changed live records, in server order.
    pub records: Vec<DecryptedRecord>,
    /// Ids of tombstoned records.
    pub deleted_ids: Vec<String>,
    /// Highest `updated_at` among the records kept from this page; safe to
    /// commit as the watermark once the page is persisted.
    pub max_updated_at: Option<i64>,
    /// Records the server returned, before filtering.
    pub fetched: usize,
}

/// Everything a full incremental sync of one collection produced.
#[derive(Debug, Clone, Default)]
pub struct CollectionSync {
    pub records: Vec<DecryptedRecord>,
    pub deleted_ids: Vec<String>,
    /// Watermark to store once all of the above is persisted.
    pub watermark: i64,
}

/// Progress callback payload, fired after each page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub collection: String,
    /// Pages fetched so far in this sync.
    pub pages: usize,
    /// Records fetched so far, before filtering.
    pub fetched: usize,
    /// Highest `updated_at` that is safe to commit so far.
    pub watermark: i64,
}

pub type SyncProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

// ============================================================================
// SyncEngine Options
// ============================================================================

/// Default records per page request.
pub const DEFAULT_PAGE_SIZE: usize = 5000;

/// Configuration for `SyncEngine`.
#[derive(Clone)]
pub struct SyncOptions {
    /// Records per page request (default: 5000)
    pub page_size: usize,
    /// Called after each fetched page
    pub on_progress: Option<SyncProgressCallback>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            on_progress: None,
        }
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("page_size", &self.page_size)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}
