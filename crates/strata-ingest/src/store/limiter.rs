//! Connection limiter wrapping a [`Store`].
//!
//! Every trait method acquires a permit from a counting semaphore before
//! touching the inner store, so at most `capacity` operations are in
//! flight at once regardless of how many workers share the store.
//! Callers past the limit queue on the semaphore rather than failing.

use std::sync::Arc;

use async_trait::async_trait;
use strata_core::{ColumnType, TableDefinition};
use tokio::sync::{Semaphore, SemaphorePermit};

use super::{Query, Row, SqlValue, Store};
use crate::error::{Error, Result};

/// Default permit count, sized just under a stock Postgres server's
/// `max_connections` of 100.
pub const DEFAULT_CAPACITY: usize = 98;

/// [`Store`] decorator bounding in-flight operations.
pub struct LimitedStore<S> {
    inner: S,
    permits: Arc<Semaphore>,
}

impl<S: Store> LimitedStore<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn with_default_capacity(inner: S) -> Self {
        Self::new(inner, DEFAULT_CAPACITY)
    }

    async fn permit(&self, op: &'static str) -> Result<SemaphorePermit<'_>> {
        // Only fails if the semaphore is closed, which never happens here.
        self.permits.acquire().await.map_err(|err| Error::Store {
            op,
            table: String::new(),
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl<S: Store> Store for LimitedStore<S> {
    async fn create_table(&self, table: &TableDefinition) -> Result<()> {
        let _permit = self.permit("create_table").await?;
        self.inner.create_table(table).await
    }

    async fn add_column(&self, table: &str, column: &str, ty: &ColumnType) -> Result<()> {
        let _permit = self.permit("add_column").await?;
        self.inner.add_column(table, column, ty).await
    }

    async fn create_unique_index(
        &self,
        table: &str,
        index: &str,
        columns: &[&str],
    ) -> Result<()> {
        let _permit = self.permit("create_unique_index").await?;
        self.inner.create_unique_index(table, index, columns).await
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let _permit = self.permit("table_exists").await?;
        self.inner.table_exists(table).await
    }

    async fn select(&self, table: &str, columns: &[&str], query: &Query) -> Result<Vec<Row>> {
        let _permit = self.permit("select").await?;
        self.inner.select(table, columns, query).await
    }

    async fn insert(&self, table: &str, columns: &[&str], values: &[SqlValue]) -> Result<()> {
        let _permit = self.permit("insert").await?;
        self.inner.insert(table, columns, values).await
    }

    async fn update(
        &self,
        table: &str,
        filters: &[(String, SqlValue)],
        assignments: &[(String, SqlValue)],
    ) -> Result<()> {
        let _permit = self.permit("update").await?;
        self.inner.update(table, filters, assignments).await
    }
}
