//! Batched reads and writes against the local cache tables.
//!
//! Writes are split into chunks of `batch_size` records. Each chunk is
//! validated against the collection schema up front and then committed in its
//! own transaction with multi-row `INSERT OR REPLACE` statements, so a failure
//! leaves earlier chunks committed and later ones untouched.

use std::future::Future;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::epoch::StorageReady;
use super::handle::DbHandle;
use super::schema::{json_to_sql, quote, sql_to_json, validate_identifier, CollectionSchema, ID_COLUMN};
use crate::error::{Result, StorageError};

/// Default number of records per committed chunk.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` for bundled builds.
const MAX_BIND_VARIABLES: usize = 32_766;

const WATERMARK_TABLE: &str = "_refresh_watermarks";

/// A row returned by [`CacheStore::select`], keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Records per committed chunk (default: 500)
    pub batch_size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// What an upsert call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows written.
    pub persisted: usize,
    /// Items the prepare step filtered out.
    pub skipped: usize,
    /// Rows written per committed chunk, in order.
    pub batches: Vec<usize>,
}

pub struct CacheStore {
    db: DbHandle,
    batch_size: usize,
}

impl CacheStore {
    /// Open the cache over `db`. Requires the epoch check to have run.
    pub async fn new(
        db: DbHandle,
        _ready: StorageReady,
        options: CacheOptions,
    ) -> std::result::Result<Self, StorageError> {
        let store = Self {
            db,
            batch_size: options.batch_size.max(1),
        };
        store.db.ready().await?.with_conn(ensure_watermark_table)?;
        Ok(store)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Create the collection's table if it does not exist.
    pub async fn ensure_table(&self, schema: &CollectionSchema) -> std::result::Result<(), StorageError> {
        let sql = schema.create_table_sql();
        self.db
            .ready()
            .await?
            .with_conn(|conn| Ok(conn.execute_batch(&sql)?))
    }

    /// Upsert records in chunks of `batch_size`.
    pub async fn upsert_batch(
        &self,
        schema: &CollectionSchema,
        records: &[Value],
    ) -> std::result::Result<BatchReport, StorageError> {
        self.ensure_table(schema).await?;
        let mut report = BatchReport::default();
        for chunk in records.chunks(self.batch_size) {
            let written = self.write_chunk(schema, chunk).await?;
            report.persisted += written;
            report.batches.push(written);
        }
        Ok(report)
    }

    /// Upsert items in chunks, running `prepare` over each chunk first.
    ///
    /// `prepare` returns one slot per input item; `None` means the item is not
    /// persisted in this call. Callers must treat skipped items as "not yet
    /// persisted", not as failures.
    pub async fn upsert_batch_with<T, F, Fut>(
        &self,
        schema: &CollectionSchema,
        items: Vec<T>,
        mut prepare: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<Vec<Option<Value>>>>,
    {
        self.ensure_table(schema).await?;
        let mut report = BatchReport::default();
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            let chunk: Vec<T> = items.by_ref().take(self.batch_size).collect();
            let input_len = chunk.len();
            let prepared: Vec<Value> = prepare(chunk).await?.into_iter().flatten().collect();
            report.skipped += input_len.saturating_sub(prepared.len());
            if prepared.is_empty() {
                continue;
            }
            let written = self.write_chunk(schema, &prepared).await?;
            report.persisted += written;
            report.batches.push(written);
        }
        Ok(report)
    }

    async fn write_chunk(
        &self,
        schema: &CollectionSchema,
        records: &[Value],
    ) -> std::result::Result<usize, StorageError> {
        // Validate the whole chunk before touching SQL.
        let rows = records
            .iter()
            .map(|r| schema.project(r))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let columns = schema.column_names();
        let rows_per_statement = (MAX_BIND_VARIABLES / columns.len()).max(1);
        let insert_prefix = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ",
            quote(&schema.name),
            columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
        );
        let placeholder = format!("({})", vec!["?"; columns.len()].join(", "));

        let written = self.db.ready().await?.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut written = 0;
            for group in rows.chunks(rows_per_statement) {
                let sql = format!(
                    "{insert_prefix}{}",
                    vec![placeholder.as_str(); group.len()].join(", ")
                );
                let params = group.iter().flatten();
                written += tx.execute(&sql, params_from_iter(params))?;
            }
            tx.commit()?;
            Ok(written)
        })?;

        tracing::debug!(table = %schema.name, rows = written, "committed cache batch");
        Ok(written)
    }

    /// Delete exactly the rows whose id is in `ids`. Returns the number removed.
    pub async fn delete_by_ids(
        &self,
        table: &str,
        ids: &[String],
    ) -> std::result::Result<usize, StorageError> {
        validate_identifier(table)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let prefix = format!("DELETE FROM {} WHERE {} IN ", quote(table), quote(ID_COLUMN));
        let deleted = self.db.ready().await?.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut deleted = 0;
            for group in ids.chunks(MAX_BIND_VARIABLES) {
                let sql = format!("{prefix}({})", vec!["?"; group.len()].join(", "));
                deleted += tx.execute(&sql, params_from_iter(group.iter()))?;
            }
            tx.commit()?;
            Ok(deleted)
        })?;
        tracing::debug!(table, rows = deleted, "deleted cached rows");
        Ok(deleted)
    }

    /// Run a parameterized read and return rows keyed by column name.
    pub async fn select(
        &self,
        query: &str,
        params: &[Value],
    ) -> std::result::Result<Vec<Row>, StorageError> {
        let params: Vec<SqlValue> = params.iter().map(json_to_sql).collect();
        self.db
            .ready()
            .await?
            .with_conn(|conn| select_rows(conn, query, &params))
    }

    /// Read every cached record of a collection, decoded through its schema.
    pub async fn load_all(
        &self,
        schema: &CollectionSchema,
    ) -> std::result::Result<Vec<Value>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            schema
                .column_names()
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join(", "),
            quote(&schema.name),
            quote(ID_COLUMN)
        );
        self.db.ready().await?.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], |row| schema.decode_row(row))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Number of rows in a table.
    pub async fn count(&self, table: &str) -> std::result::Result<usize, StorageError> {
        validate_identifier(table)?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote(table));
        let count: i64 = self
            .db
            .ready()
            .await?
            .with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Last committed refresh watermark for a collection (0 if never synced).
    pub async fn watermark(&self, collection: &str) -> std::result::Result<i64, StorageError> {
        self.db.ready().await?.with_conn(|conn| {
            ensure_watermark_table(conn)?;
            let value = conn
                .query_row(
                    &format!(
                        "SELECT watermark FROM {} WHERE collection = ?1",
                        quote(WATERMARK_TABLE)
                    ),
                    [collection],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(value.unwrap_or(0))
        })
    }

    /// Raise a collection's watermark. Never lowers it; returns the stored value.
    pub async fn advance_watermark(
        &self,
        collection: &str,
        watermark: i64,
    ) -> std::result::Result<i64, StorageError> {
        let stored = self.db.ready().await?.with_conn(|conn| {
            ensure_watermark_table(conn)?;
            Ok(conn.query_row(
                &format!(
                    "INSERT INTO {t} (collection, watermark) VALUES (?1, ?2) \
                     ON CONFLICT(collection) DO UPDATE SET watermark = MAX(watermark, excluded.watermark) \
                     RETURNING watermark",
                    t = quote(WATERMARK_TABLE)
                ),
                rusqlite::params![collection, watermark],
                |row| row.get::<_, i64>(0),
            )?)
        })?;
        tracing::info!(collection, watermark = stored, "refresh watermark advanced");
        Ok(stored)
    }
}

fn ensure_watermark_table(conn: &mut Connection) -> std::result::Result<(), StorageError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (collection TEXT PRIMARY KEY NOT NULL, watermark INTEGER NOT NULL)",
        quote(WATERMARK_TABLE)
    ))?;
    Ok(())
}

fn select_rows(
    conn: &mut Connection,
    query: &str,
    params: &[SqlValue],
) -> std::result::Result<Vec<Row>, StorageError> {
    let mut stmt = conn.prepare(query)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = Map::new();
        for (i, name) in names.iter().enumerate() {
            obj.insert(name.clone(), sql_to_json(row.get_ref(i)?));
        }
        out.push(obj);
    }
    Ok(out)
}
