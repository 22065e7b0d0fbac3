//! Sync cursor over the `sync` bookkeeping table.
//!
//! One row per raw message that has been noticed. The row records where
//! the message sits on chain (height, block hash, tx hash, index within
//! the tx), whether its payload has been materialized yet, and the error
//! text if materialization failed for good.
//!
//! # Crash resumption
//!
//! The cursor has two phases:
//!
//! - **fetch** - scan the raw category table from the highest height
//!   already recorded and insert a pending entry per message. The height
//!   scan is inclusive and the unique index on
//!   (category_name, hash, tx_hash, index) absorbs the overlap, so a
//!   crash between fetch and processing never loses or doubles a
//!   message.
//! - **replay** - hand out the oldest pending entry (synced = false and
//!   no recorded error), ordered by (height, tx_hash, index).
//!
//! An entry that failed on a malformed payload keeps `synced = false`
//! but gets its error text set, which retires it from replay without
//! pretending it was materialized.

use std::sync::Arc;

use strata_core::{ColumnType, TableDefinition};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{column, Direction, Query, SqlValue, Store};

/// Name of the bookkeeping table.
pub const SYNC_TABLE: &str = "sync";

/// One pending message handed out for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEntry {
    pub id: Uuid,
    pub category: String,
    pub height: i64,
    pub hash: String,
    pub tx_hash: String,
    pub index: i64,
}

pub struct SyncCursor<S> {
    store: Arc<S>,
}

impl<S: Store> SyncCursor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create the `sync` table and its uniqueness index if absent.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut table = TableDefinition {
            name: SYNC_TABLE.to_string(),
            columns: Default::default(),
            unique_pair: None,
        };
        for (name, ty) in [
            ("category_name", ColumnType::Text),
            ("height", ColumnType::BigInt),
            ("hash", ColumnType::Text),
            ("tx_hash", ColumnType::Text),
            ("index", ColumnType::BigInt),
            ("synced", ColumnType::Boolean),
            ("error", ColumnType::Text),
        ] {
            table.columns.insert(name.to_string(), ty);
        }
        self.store.create_table(&table).await?;
        self.store
            .create_unique_index(
                SYNC_TABLE,
                "sync_message_idx",
                &["category_name", "hash", "tx_hash", "index"],
            )
            .await
    }

    /// Highest height recorded for `category`, or 0 when none is.
    pub async fn last_height(&self, category: &str) -> Result<i64> {
        let rows = self
            .store
            .select(
                SYNC_TABLE,
                &["height"],
                &Query::new()
                    .eq("category_name", category)
                    .order_by("height", Direction::Desc)
                    .limit(1),
            )
            .await?;
        match rows.first() {
            Some(row) => column(row, 0, SYNC_TABLE)?
                .as_i64()
                .ok_or_else(|| decode_err("height")),
            None => Ok(0),
        }
    }

    /// Scan the raw `category` table from the last recorded height and
    /// insert a pending entry per message found. Returns the number of
    /// rows scanned; re-scanned messages are absorbed by the uniqueness
    /// index.
    pub async fn fetch(&self, category: &str) -> Result<usize> {
        let from = self.last_height(category).await?;
        let rows = self
            .store
            .select(
                category,
                &["height", "hash", "tx_hash", "index"],
                &Query::new().min_height(from),
            )
            .await?;

        for row in &rows {
            let height = column(row, 0, category)?
                .as_i64()
                .ok_or_else(|| decode_err("height"))?;
            let hash = column(row, 1, category)?
                .as_text()
                .ok_or_else(|| decode_err("hash"))?;
            let tx_hash = column(row, 2, category)?
                .as_text()
                .ok_or_else(|| decode_err("tx_hash"))?;
            let index = column(row, 3, category)?
                .as_i64()
                .ok_or_else(|| decode_err("index"))?;

            self.store
                .insert(
                    SYNC_TABLE,
                    &[
                        "id",
                        "category_name",
                        "height",
                        "hash",
                        "tx_hash",
                        "index",
                        "synced",
                        "error",
                    ],
                    &[
                        Uuid::new_v4().into(),
                        category.into(),
                        height.into(),
                        hash.into(),
                        tx_hash.into(),
                        index.into(),
                        false.into(),
                        SqlValue::Null,
                    ],
                )
                .await?;
        }

        debug!(category, from, scanned = rows.len(), "fetched sync entries");
        Ok(rows.len())
    }

    /// The oldest pending entry for `category`, in (height, tx_hash,
    /// index) order. Entries with a recorded error are skipped.
    pub async fn next_unsynced(&self, category: &str) -> Result<Option<SyncEntry>> {
        let rows = self
            .store
            .select(
                SYNC_TABLE,
                &["id", "height", "hash", "tx_hash", "index"],
                &Query::new()
                    .eq("category_name", category)
                    .eq("synced", false)
                    .eq("error", SqlValue::Null)
                    .order_by("height", Direction::Asc)
                    .order_by("tx_hash", Direction::Asc)
                    .order_by("index", Direction::Asc)
                    .limit(1),
            )
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        Ok(Some(SyncEntry {
            id: column(row, 0, SYNC_TABLE)?
                .as_uuid()
                .ok_or_else(|| decode_err("id"))?,
            category: category.to_string(),
            height: column(row, 1, SYNC_TABLE)?
                .as_i64()
                .ok_or_else(|| decode_err("height"))?,
            hash: column(row, 2, SYNC_TABLE)?
                .as_text()
                .ok_or_else(|| decode_err("hash"))?
                .to_string(),
            tx_hash: column(row, 3, SYNC_TABLE)?
                .as_text()
                .ok_or_else(|| decode_err("tx_hash"))?
                .to_string(),
            index: column(row, 4, SYNC_TABLE)?
                .as_i64()
                .ok_or_else(|| decode_err("index"))?,
        }))
    }

    /// Mark an entry as materialized.
    pub async fn mark_synced(&self, id: Uuid) -> Result<()> {
        self.store
            .update(
                SYNC_TABLE,
                &[("id".to_string(), id.into())],
                &[("synced".to_string(), true.into())],
            )
            .await
    }

    /// Record a permanent failure. The entry stays unsynced but the
    /// error text retires it from replay.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        self.store
            .update(
                SYNC_TABLE,
                &[("id".to_string(), id.into())],
                &[("error".to_string(), error.into())],
            )
            .await
    }
}

fn decode_err(columns: &str) -> Error {
    Error::Decode {
        table: SYNC_TABLE.to_string(),
        reason: format!("unexpected type for '{columns}'"),
    }
}
