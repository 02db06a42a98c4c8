//! Persisting refresh loop: fetch, decrypt, write, then advance the watermark.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::engine::SyncEngine;
use super::types::DecryptedRecord;
use crate::error::{Result, StorageError};
use crate::storage::{CacheStore, CollectionSchema};

/// Summary of one [`SyncManager::refresh_collection`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    pub collection: String,
    pub pages: usize,
    /// Rows upserted into the cache.
    pub persisted: usize,
    /// Rows removed because of remote tombstones.
    pub deleted: usize,
    /// Watermark stored after the refresh.
    pub watermark: i64,
    pub finished_at: DateTime<Utc>,
}

/// Keeps the local cache of each registered collection in step with the remote.
pub struct SyncManager {
    engine: SyncEngine,
    cache: Arc<CacheStore>,
    schemas: BTreeMap<String, CollectionSchema>,
}

impl SyncManager {
    pub fn new(
        engine: SyncEngine,
        cache: Arc<CacheStore>,
        schemas: impl IntoIterator<Item = CollectionSchema>,
    ) -> Self {
        Self {
            engine,
            cache,
            schemas: schemas.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Registered collection names, sorted.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Bring one collection up to date.
    ///
    /// Each page is written (upserts, then tombstone deletes) before the
    /// watermark moves to that page's maximum. On failure the watermark stays
    /// at the last fully persisted page, so the next call resumes from there.
    pub async fn refresh_collection(&self, collection: &str) -> Result<RefreshOutcome> {
        let schema = self
            .schemas
            .get(collection)
            .ok_or_else(|| StorageError::Schema {
                table: collection.to_owned(),
                message: "no schema registered for collection".into(),
            })?;

        let start = self.cache.watermark(collection).await?;
        tracing::info!(collection, watermark = start, "refreshing collection");

        let mut outcome = RefreshOutcome {
            collection: collection.to_owned(),
            pages: 0,
            persisted: 0,
            deleted: 0,
            watermark: start,
            finished_at: Utc::now(),
        };

        let mut cursor = self.engine.pages(collection, start);
        while let Some(page) = cursor.next_page().await? {
            outcome.pages += 1;

            let rows: Vec<_> = page
                .records
                .into_iter()
                .map(DecryptedRecord::into_row)
                .collect();
            outcome.persisted += self.cache.upsert_batch(schema, &rows).await?.persisted;
            outcome.deleted += self
                .cache
                .delete_by_ids(&schema.name, &page.deleted_ids)
                .await?;

            if let Some(max) = page.max_updated_at {
                outcome.watermark = self.cache.advance_watermark(collection, max).await?;
            }
        }

        outcome.finished_at = Utc::now();
        tracing::info!(
            collection,
            pages = outcome.pages,
            persisted = outcome.persisted,
            deleted = outcome.deleted,
            watermark = outcome.watermark,
            "collection refreshed"
        );
        Ok(outcome)
    }

    /// Refresh every registered collection in name order, stopping at the
    /// first failure.
    pub async fn refresh_all(&self) -> Result<Vec<RefreshOutcome>> {
        let mut outcomes = Vec::with_capacity(self.schemas.len());
        for name in self.schemas.keys() {
            outcomes.push(self.refresh_collection(name).await?);
        }
        Ok(outcomes)
    }
}
