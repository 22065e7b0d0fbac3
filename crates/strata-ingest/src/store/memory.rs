//! In-process store implementation.
//!
//! Implements the full [`Store`] contract - dynamic tables, additive
//! columns, unique indexes with conflict-do-nothing inserts, equality and
//! height-range filters, multi-column ordering, limits - over plain maps.
//! The test suites run the whole pipeline against it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use strata_core::{names, ColumnType, TableDefinition};

use super::{Direction, Query, Row, SqlValue, Store};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct MemTable {
    columns: BTreeMap<String, ColumnType>,
    rows: Vec<BTreeMap<String, SqlValue>>,
    uniques: Vec<Vec<String>>,
}

/// In-memory [`Store`] backed by a mutex-guarded table map.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn missing_table(op: &'static str, table: &str) -> Error {
        Error::Store {
            op,
            table: table.to_string(),
            reason: "table does not exist".to_string(),
        }
    }

    /// Declared column types of a table, for test assertions.
    #[cfg(test)]
    pub(crate) fn columns(&self, table: &str) -> BTreeMap<String, ColumnType> {
        let tables = self.tables.lock();
        tables
            .get(&names::fit(table))
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }
}

/// Ordering for sort keys; values of different kinds compare equal, which
/// never happens for well-typed columns.
fn compare(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a, b) {
        (SqlValue::Text(x), SqlValue::Text(y)) => x.cmp(y),
        (SqlValue::BigInt(x), SqlValue::BigInt(y)) => x.cmp(y),
        (SqlValue::Bool(x), SqlValue::Bool(y)) => x.cmp(y),
        (SqlValue::Uuid(x), SqlValue::Uuid(y)) => x.cmp(y),
        (SqlValue::Null, SqlValue::Null) => Ordering::Equal,
        (SqlValue::Null, _) => Ordering::Less,
        (_, SqlValue::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn matches_filters(row: &BTreeMap<String, SqlValue>, query: &Query) -> bool {
    for (col, want) in &query.eq {
        let col = names::fit(col);
        let got = row.get(&col).unwrap_or(&SqlValue::Null);
        if want.is_null() {
            if !got.is_null() {
                return false;
            }
        } else if got != want {
            return false;
        }
    }

    if query.min_height.is_some() || query.max_height.is_some() {
        let Some(height) = row.get("height").and_then(SqlValue::as_i64) else {
            return false;
        };
        if query.min_height.is_some_and(|min| height < min) {
            return false;
        }
        if query.max_height.is_some_and(|max| height > max) {
            return false;
        }
    }

    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_table(&self, table: &TableDefinition) -> Result<()> {
        let name = names::fit(&table.name);
        let mut tables = self.tables.lock();
        if tables.contains_key(&name) {
            return Ok(());
        }

        let mut mem = MemTable::default();
        mem.columns.insert("id".to_string(), ColumnType::Text);
        mem.uniques.push(vec!["id".to_string()]);
        for (col, ty) in &table.columns {
            mem.columns.insert(names::fit(col), ty.clone());
        }
        tables.insert(name, mem);
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &str, ty: &ColumnType) -> Result<()> {
        let name = names::fit(table);
        let mut tables = self.tables.lock();
        let mem = tables
            .get_mut(&name)
            .ok_or_else(|| Self::missing_table("add_column", table))?;

        // Additive only: a column that already exists keeps its
        // first-seen type.
        mem.columns.entry(names::fit(column)).or_insert_with(|| ty.clone());
        Ok(())
    }

    async fn create_unique_index(
        &self,
        table: &str,
        _index: &str,
        columns: &[&str],
    ) -> Result<()> {
        let name = names::fit(table);
        let mut tables = self.tables.lock();
        let mem = tables
            .get_mut(&name)
            .ok_or_else(|| Self::missing_table("create_unique_index", table))?;

        let cols: Vec<String> = columns.iter().map(|c| names::fit(c)).collect();
        if !mem.uniques.contains(&cols) {
            mem.uniques.push(cols);
        }
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.lock().contains_key(&names::fit(table)))
    }

    async fn select(&self, table: &str, columns: &[&str], query: &Query) -> Result<Vec<Row>> {
        let name = names::fit(table);
        let tables = self.tables.lock();
        let mem = tables
            .get(&name)
            .ok_or_else(|| Self::missing_table("select", table))?;

        let mut hits: Vec<&BTreeMap<String, SqlValue>> = mem
            .rows
            .iter()
            .filter(|row| matches_filters(row, query))
            .collect();

        hits.sort_by(|a, b| {
            for (col, direction) in &query.order_by {
                let col = names::fit(col);
                let av = a.get(&col).unwrap_or(&SqlValue::Null);
                let bv = b.get(&col).unwrap_or(&SqlValue::Null);
                let ord = match direction {
                    Direction::Asc => compare(av, bv),
                    Direction::Desc => compare(bv, av),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        if let Some(limit) = query.limit {
            hits.truncate(limit as usize);
        }

        Ok(hits
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(&names::fit(c)).cloned().unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect())
    }

    async fn insert(&self, table: &str, columns: &[&str], values: &[SqlValue]) -> Result<()> {
        if columns.len() != values.len() {
            return Err(Error::Store {
                op: "insert",
                table: table.to_string(),
                reason: format!("{} columns but {} values", columns.len(), values.len()),
            });
        }

        let name = names::fit(table);
        let mut tables = self.tables.lock();
        let mem = tables
            .get_mut(&name)
            .ok_or_else(|| Self::missing_table("insert", table))?;

        let mut row = BTreeMap::new();
        for (col, value) in columns.iter().zip(values) {
            let col = names::fit(col);
            if !mem.columns.contains_key(&col) {
                return Err(Error::Store {
                    op: "insert",
                    table: table.to_string(),
                    reason: format!("unknown column '{col}'"),
                });
            }
            row.insert(col, value.clone());
        }

        // Conflict-do-nothing: skip the row when any unique index already
        // holds the same key.
        for unique in &mem.uniques {
            let conflict = mem.rows.iter().any(|existing| {
                unique.iter().all(|col| {
                    let new = row.get(col).unwrap_or(&SqlValue::Null);
                    let old = existing.get(col).unwrap_or(&SqlValue::Null);
                    !new.is_null() && new == old
                })
            });
            if conflict {
                return Ok(());
            }
        }

        mem.rows.push(row);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        filters: &[(String, SqlValue)],
        assignments: &[(String, SqlValue)],
    ) -> Result<()> {
        let name = names::fit(table);
        let mut tables = self.tables.lock();
        let mem = tables
            .get_mut(&name)
            .ok_or_else(|| Self::missing_table("update", table))?;

        for (col, _) in assignments {
            let col = names::fit(col);
            if !mem.columns.contains_key(&col) {
                return Err(Error::Store {
                    op: "update",
                    table: table.to_string(),
                    reason: format!("unknown column '{col}'"),
                });
            }
        }

        for row in &mut mem.rows {
            let hit = filters.iter().all(|(col, want)| {
                let got = row.get(&names::fit(col)).unwrap_or(&SqlValue::Null);
                if want.is_null() { got.is_null() } else { got == want }
            });
            if hit {
                for (col, value) in assignments {
                    row.insert(names::fit(col), value.clone());
                }
            }
        }
        Ok(())
    }
}
