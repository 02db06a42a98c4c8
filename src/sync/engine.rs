//! Incremental fetch and decryption of remote collections.

use std::sync::Arc;

use fieldcase_crypto::decrypt;
use serde_json::Value;

use super::types::{
    CollectionSync, DecryptedRecord, PageRequest, RemotePage, RemoteRecord, RemoteSource,
    SyncOptions, SyncProgress, SyncedPage,
};
use crate::error::{Result, SyncError};
use crate::session::Session;

/// Pulls pages of encrypted records modified after a watermark and decrypts
/// them with the session's master key.
///
/// The engine does not persist anything; see
/// [`SyncManager`](super::manager::SyncManager) for the persisting loop.
pub struct SyncEngine {
    remote: Arc<dyn RemoteSource>,
    session: Arc<Session>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteSource>, session: Arc<Session>, options: SyncOptions) -> Self {
        Self {
            remote,
            session,
            options: SyncOptions {
                page_size: options.page_size.max(1),
                ..options
            },
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Start paging through `collection` from `watermark`.
    pub fn pages(&self, collection: &str, watermark: i64) -> PageCursor<'_> {
        PageCursor {
            engine: self,
            collection: collection.to_owned(),
            with_deleted: watermark > 0,
            after: watermark,
            high: watermark,
            pages: 0,
            fetched: 0,
            done: false,
        }
    }

    /// Fetch and decrypt everything in `collection` newer than `watermark`.
    ///
    /// Any failure aborts the whole call; nothing is returned partially.
    pub async fn sync_collection(&self, collection: &str, watermark: i64) -> Result<CollectionSync> {
        let mut cursor = self.pages(collection, watermark);
        let mut out = CollectionSync {
            watermark,
            ..Default::default()
        };
        while let Some(page) = cursor.next_page().await? {
            out.records.extend(page.records);
            out.deleted_ids.extend(page.deleted_ids);
            if let Some(max) = page.max_updated_at {
                out.watermark = out.watermark.max(max);
            }
        }
        Ok(out)
    }

    /// Decrypt one live record into a JSON object.
    pub fn decrypt_record(&self, collection: &str, record: &RemoteRecord) -> Result<DecryptedRecord> {
        let content_error = |message: &str| SyncError::Content {
            collection: collection.to_owned(),
            id: record.id.clone(),
            message: message.to_owned(),
        };

        let (Some(content), Some(entity_key)) = (
            record.encrypted_content.as_deref(),
            record.encrypted_entity_key.as_deref(),
        ) else {
            return Err(content_error("missing encrypted content or entity key").into());
        };

        let decrypted = self
            .session
            .with_master_key(|key| decrypt(content, entity_key, key))?
            .map_err(|source| SyncError::Decrypt {
                collection: collection.to_owned(),
                id: record.id.clone(),
                source,
            })?;

        match serde_json::from_str::<Value>(&decrypted.plaintext) {
            Ok(Value::Object(data)) => Ok(DecryptedRecord {
                id: record.id.clone(),
                updated_at: record.updated_at,
                data,
            }),
            Ok(_) => Err(content_error("decrypted content is not a JSON object").into()),
            Err(e) => Err(content_error(&format!("decrypted content is not JSON: {e}")).into()),
        }
    }
}

/// Walks the pages of one incremental sync in server order.
pub struct PageCursor<'a> {
    engine: &'a SyncEngine,
    collection: String,
    with_deleted: bool,
    /// `after` for the next request.
    after: i64,
    /// Highest `updated_at` seen so far.
    high: i64,
    pages: usize,
    fetched: usize,
    done: bool,
}

impl PageCursor<'_> {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Highest committable `updated_at` among pages returned so far.
    pub fn high_water(&self) -> i64 {
        self.high
    }

    /// Fetch and decrypt the next page. Returns `None` once paging is done.
    ///
    /// Records at or below the request's `after` are dropped. Tombstones are
    /// returned as ids and never decrypted. A decryption failure is fatal.
    ///
    /// When the page is full, records carrying its highest `updated_at` are
    /// left for the next request, so the page's `max_updated_at` is always
    /// safe to commit as a watermark. A full page whose records all share one
    /// timestamp cannot make progress and fails with
    /// [`SyncError::PageOverflow`].
    pub async fn next_page(&mut self) -> Result<Option<SyncedPage>> {
        if self.done {
            return Ok(None);
        }

        let page_size = self.engine.options.page_size;
        let request = PageRequest {
            collection: self.collection.clone(),
            after: self.after,
            with_deleted: self.with_deleted,
            batch: page_size,
        };
        let page = self
            .engine
            .remote
            .fetch_page(&request)
            .await
            .map_err(|e| SyncError::Transport {
                collection: self.collection.clone(),
                message: e.to_string(),
            })?;

        if !page.ok {
            tracing::warn!(collection = %self.collection, error = ?page.error, "page fetch not ok");
            return Err(SyncError::Fetch {
                collection: self.collection.clone(),
                response: raw_response(&page),
            }
            .into());
        }

        let full = page.data.len() >= page_size;
        let fresh: Vec<&RemoteRecord> = page
            .data
            .iter()
            .filter(|r| r.updated_at > request.after)
            .collect();

        // On a full page, more records with the page's highest timestamp may
        // follow. Hold them back so the next request (strictly after) picks
        // them up again.
        let held_back = match fresh.iter().map(|r| r.updated_at).max() {
            Some(top) if full => {
                if fresh.iter().all(|r| r.updated_at == top) {
                    tracing::warn!(
                        collection = %self.collection,
                        updated_at = top,
                        page_size,
                        "full page shares one timestamp"
                    );
                    return Err(SyncError::PageOverflow {
                        collection: self.collection.clone(),
                        updated_at: top,
                        page_size,
                    }
                    .into());
                }
                Some(top)
            }
            _ => None,
        };

        let mut out = SyncedPage {
            fetched: page.data.len(),
            ..Default::default()
        };
        for record in fresh {
            if held_back.is_some_and(|top| record.updated_at >= top) {
                continue;
            }
            out.max_updated_at = Some(
                out.max_updated_at
                    .map_or(record.updated_at, |m| m.max(record.updated_at)),
            );
            if record.deleted {
                out.deleted_ids.push(record.id.clone());
            } else {
                out.records.push(self.engine.decrypt_record(&self.collection, record)?);
            }
        }

        self.pages += 1;
        self.fetched += out.fetched;
        if let Some(max) = out.max_updated_at {
            self.high = self.high.max(max);
        }

        tracing::debug!(
            collection = %self.collection,
            page = self.pages,
            fetched = out.fetched,
            live = out.records.len(),
            deleted = out.deleted_ids.len(),
            held_back = ?held_back,
            "fetched page"
        );

        match out.max_updated_at {
            Some(max) if full => self.after = max,
            Some(_) => self.done = true,
            None => {
                if full {
                    // Every record was at or below `after`; asking again would repeat forever.
                    tracing::warn!(
                        collection = %self.collection,
                        after = self.after,
                        "full page did not advance; stopping"
                    );
                }
                self.done = true;
            }
        }

        if let Some(on_progress) = &self.engine.options.on_progress {
            on_progress(&SyncProgress {
                collection: self.collection.clone(),
                pages: self.pages,
                fetched: self.fetched,
                watermark: self.high,
            });
        }

        Ok(Some(out))
    }
}

fn raw_response(page: &RemotePage) -> String {
    serde_json::to_string(page).unwrap_or_else(|_| format!("{page:?}"))
}
