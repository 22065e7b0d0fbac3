//! Store access contract shared by every component.
//!
//! All reads and writes - dynamic DDL included - go through the [`Store`]
//! trait. Two implementations exist:
//!
//! - [`PostgresStore`] - the production backend (`tokio-postgres`)
//! - [`MemoryStore`] - an in-process backend used by the test suites
//!
//! [`LimitedStore`] wraps either one behind a counting semaphore so the
//! total number of in-flight store operations stays under the backing
//! store's connection ceiling.
//!
//! Identifiers passed to a store always originate from schema inference,
//! never from payload values; payload values are always bound parameters.
//! Implementations apply [`strata_core::names::fit`] to every identifier,
//! so callers work with full readable names throughout.

pub mod limiter;
pub mod memory;
pub mod postgres;

pub use limiter::LimitedStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use strata_core::{ColumnType, TableDefinition};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A value bound into a store operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    BigInt(i64),
    Bool(bool),
    TextArray(Vec<String>),
    BoolArray(Vec<bool>),
    Uuid(Uuid),
    Null,
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::BigInt(n)
    }
}

impl From<bool> for SqlValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Uuid> for SqlValue {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

/// Sort direction for an `order by` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Filter, ordering, and limit parameters for [`Store::select`].
///
/// Equality on a [`SqlValue::Null`] filter matches rows where the column
/// is null (`IS NULL` semantics).
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub eq: Vec<(String, SqlValue)>,
    pub min_height: Option<i64>,
    pub max_height: Option<i64>,
    pub order_by: Vec<(String, Direction)>,
    pub limit: Option<i64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.eq.push((column.to_string(), value.into()));
        self
    }

    pub fn min_height(mut self, height: i64) -> Self {
        self.min_height = Some(height);
        self
    }

    pub fn max_height(mut self, height: i64) -> Self {
        self.max_height = Some(height);
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order_by.push((column.to_string(), direction));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One selected row, positional per the requested column list.
pub type Row = Vec<SqlValue>;

/// Helper for decoding a positional column or failing with context.
pub(crate) fn column<'a>(row: &'a Row, idx: usize, table: &str) -> Result<&'a SqlValue> {
    row.get(idx).ok_or_else(|| Error::Decode {
        table: table.to_string(),
        reason: format!("missing column {idx}"),
    })
}

/// Bounded-concurrency store access contract.
///
/// Inserts are conflict-do-nothing: a row that violates a uniqueness
/// constraint is silently skipped, which is the correctness backstop for
/// at-least-once replay.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a table if absent: `id` primary key plus the declared
    /// columns; `Reference` columns become foreign keys.
    async fn create_table(&self, table: &TableDefinition) -> Result<()>;

    /// Add a column if absent. Existing columns are never altered.
    async fn add_column(&self, table: &str, column: &str, ty: &ColumnType) -> Result<()>;

    /// Create a unique index over `columns` if absent.
    async fn create_unique_index(&self, table: &str, index: &str, columns: &[&str])
        -> Result<()>;

    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn select(&self, table: &str, columns: &[&str], query: &Query) -> Result<Vec<Row>>;

    /// Insert one row; conflict-do-nothing on any uniqueness violation.
    async fn insert(&self, table: &str, columns: &[&str], values: &[SqlValue]) -> Result<()>;

    /// Update rows matching all equality `filters`, applying `assignments`.
    async fn update(
        &self,
        table: &str,
        filters: &[(String, SqlValue)],
        assignments: &[(String, SqlValue)],
    ) -> Result<()>;
}
