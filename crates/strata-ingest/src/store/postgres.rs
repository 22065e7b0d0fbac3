//! Postgres store implementation over `tokio-postgres`.
//!
//! All generated identifiers are fitted and double-quoted; payload values
//! are always bound parameters, never spliced into SQL text. DDL is
//! idempotent (`IF NOT EXISTS` everywhere) so reconciling a schema that
//! already exists is a no-op.
//!
//! Every table lives in a dedicated schema (default `app`) rather than
//! `public`, keeping generated tables apart from anything else in the
//! database.

use async_trait::async_trait;
use strata_core::{names, ColumnType, TableDefinition};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};
use uuid::Uuid;

use super::{Query, Row, SqlValue, Store};
use crate::error::{Error, Result};

/// Schema name used when none is configured.
pub const DEFAULT_SCHEMA: &str = "app";

/// [`Store`] backed by a single Postgres connection.
pub struct PostgresStore {
    client: Client,
    schema: String,
}

impl PostgresStore {
    /// Connect with a `tokio-postgres` parameter string and ensure the
    /// target schema exists.
    pub async fn connect(params: &str, schema: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(params, NoTls)
            .await
            .map_err(|source| pg("connect", schema, source))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(%err, "postgres connection closed");
            }
        });

        let store = Self {
            client,
            schema: schema.to_string(),
        };
        store
            .client
            .execute(
                &format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", store.schema),
                &[],
            )
            .await
            .map_err(|source| pg("create_schema", schema, source))?;
        Ok(store)
    }

    fn qualified(&self, table: &str) -> String {
        format!("\"{}\".\"{}\"", self.schema, names::fit(table))
    }
}

fn pg(op: &'static str, table: &str, source: tokio_postgres::Error) -> Error {
    Error::Postgres {
        op,
        table: table.to_string(),
        source,
    }
}

/// SQL type for a column, with `Reference` expanding into a foreign key.
fn column_sql(schema: &str, ty: &ColumnType) -> String {
    match ty {
        ColumnType::Text => "text".to_string(),
        ColumnType::BigInt => "bigint".to_string(),
        ColumnType::Boolean => "boolean".to_string(),
        ColumnType::TextArray => "text[]".to_string(),
        ColumnType::BooleanArray => "boolean[]".to_string(),
        ColumnType::Reference(target) => {
            format!(
                "uuid REFERENCES \"{schema}\".\"{}\" (id)",
                names::fit(target)
            )
        }
    }
}

fn create_table_sql(schema: &str, table: &TableDefinition) -> String {
    let mut columns = vec!["id uuid PRIMARY KEY".to_string()];
    for (col, ty) in &table.columns {
        columns.push(format!(
            "\"{}\" {}",
            names::fit(col),
            column_sql(schema, ty)
        ));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS \"{schema}\".\"{}\" ({})",
        names::fit(&table.name),
        columns.join(", ")
    )
}

/// Bind a non-null value as a SQL parameter.
fn bind(value: &SqlValue) -> &(dyn ToSql + Sync) {
    static NONE: Option<String> = None;
    match value {
        SqlValue::Text(s) => s,
        SqlValue::BigInt(n) => n,
        SqlValue::Bool(b) => b,
        SqlValue::TextArray(v) => v,
        SqlValue::BoolArray(v) => v,
        SqlValue::Uuid(u) => u,
        SqlValue::Null => &NONE,
    }
}

/// Append equality and height-range clauses, pushing bound parameters.
/// Null equality becomes `IS NULL` with nothing bound.
fn push_filters<'a>(
    eq: &'a [(String, SqlValue)],
    min_height: Option<&'a i64>,
    max_height: Option<&'a i64>,
    clauses: &mut Vec<String>,
    params: &mut Vec<&'a (dyn ToSql + Sync)>,
) {
    for (col, value) in eq {
        let col = names::fit(col);
        if value.is_null() {
            clauses.push(format!("\"{col}\" IS NULL"));
        } else {
            params.push(bind(value));
            clauses.push(format!("\"{col}\" = ${}", params.len()));
        }
    }
    if let Some(min) = min_height {
        params.push(min);
        clauses.push(format!("height >= ${}", params.len()));
    }
    if let Some(max) = max_height {
        params.push(max);
        clauses.push(format!("height <= ${}", params.len()));
    }
}

fn decode(row: &tokio_postgres::Row, table: &str) -> Result<Row> {
    let mut out = Vec::with_capacity(row.len());
    for (idx, col) in row.columns().iter().enumerate() {
        let ty = col.type_();
        let value = if *ty == Type::TEXT || *ty == Type::VARCHAR {
            row.try_get::<_, Option<String>>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::Text))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::BigInt))
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::Bool))
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<Uuid>>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::Uuid))
        } else if *ty == Type::TEXT_ARRAY || *ty == Type::VARCHAR_ARRAY {
            row.try_get::<_, Option<Vec<String>>>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::TextArray))
        } else if *ty == Type::BOOL_ARRAY {
            row.try_get::<_, Option<Vec<bool>>>(idx)
                .map(|v| v.map_or(SqlValue::Null, SqlValue::BoolArray))
        } else {
            return Err(Error::Decode {
                table: table.to_string(),
                reason: format!("unsupported column type {ty}"),
            });
        };
        out.push(value.map_err(|err| Error::Decode {
            table: table.to_string(),
            reason: err.to_string(),
        })?);
    }
    Ok(out)
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_table(&self, table: &TableDefinition) -> Result<()> {
        let sql = create_table_sql(&self.schema, table);
        debug!(table = %table.name, "creating table");
        self.client
            .execute(&sql, &[])
            .await
            .map_err(|source| pg("create_table", &table.name, source))?;
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &str, ty: &ColumnType) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS \"{}\" {}",
            self.qualified(table),
            names::fit(column),
            column_sql(&self.schema, ty)
        );
        self.client
            .execute(&sql, &[])
            .await
            .map_err(|source| pg("add_column", table, source))?;
        Ok(())
    }

    async fn create_unique_index(
        &self,
        table: &str,
        index: &str,
        columns: &[&str],
    ) -> Result<()> {
        let cols: Vec<String> = columns
            .iter()
            .map(|c| format!("\"{}\"", names::fit(c)))
            .collect();
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"{}\" ON {} ({})",
            names::fit(index),
            self.qualified(table),
            cols.join(", ")
        );
        self.client
            .execute(&sql, &[])
            .await
            .map_err(|source| pg("create_unique_index", table, source))?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let name = names::fit(table);
        let row = self
            .client
            .query_opt(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&self.schema, &name],
            )
            .await
            .map_err(|source| pg("table_exists", table, source))?;
        Ok(row.is_some())
    }

    async fn select(&self, table: &str, columns: &[&str], query: &Query) -> Result<Vec<Row>> {
        let projection: Vec<String> = columns
            .iter()
            .map(|c| format!("\"{}\"", names::fit(c)))
            .collect();
        let mut sql = format!(
            "SELECT {} FROM {}",
            projection.join(", "),
            self.qualified(table)
        );

        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        push_filters(
            &query.eq,
            query.min_height.as_ref(),
            query.max_height.as_ref(),
            &mut clauses,
            &mut params,
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !query.order_by.is_empty() {
            let order: Vec<String> = query
                .order_by
                .iter()
                .map(|(col, dir)| {
                    let dir = match dir {
                        super::Direction::Asc => "ASC",
                        super::Direction::Desc => "DESC",
                    };
                    format!("\"{}\" {dir}", names::fit(col))
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        if let Some(limit) = query.limit.as_ref() {
            params.push(limit);
            sql.push_str(&format!(" LIMIT ${}", params.len()));
        }

        let rows = self
            .client
            .query(&sql, &params)
            .await
            .map_err(|source| pg("select", table, source))?;
        rows.iter().map(|row| decode(row, table)).collect()
    }

    async fn insert(&self, table: &str, columns: &[&str], values: &[SqlValue]) -> Result<()> {
        if columns.len() != values.len() {
            return Err(Error::Store {
                op: "insert",
                table: table.to_string(),
                reason: format!("{} columns but {} values", columns.len(), values.len()),
            });
        }

        let mut cols = Vec::with_capacity(columns.len());
        let mut placeholders = Vec::with_capacity(values.len());
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        for (col, value) in columns.iter().zip(values) {
            cols.push(format!("\"{}\"", names::fit(col)));
            if value.is_null() {
                placeholders.push("NULL".to_string());
            } else {
                params.push(bind(value));
                placeholders.push(format!("${}", params.len()));
            }
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            self.qualified(table),
            cols.join(", "),
            placeholders.join(", ")
        );
        self.client
            .execute(&sql, &params)
            .await
            .map_err(|source| pg("insert", table, source))?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        filters: &[(String, SqlValue)],
        assignments: &[(String, SqlValue)],
    ) -> Result<()> {
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let mut sets = Vec::with_capacity(assignments.len());
        for (col, value) in assignments {
            let col = names::fit(col);
            if value.is_null() {
                sets.push(format!("\"{col}\" = NULL"));
            } else {
                params.push(bind(value));
                sets.push(format!("\"{col}\" = ${}", params.len()));
            }
        }

        let mut clauses = Vec::new();
        push_filters(filters, None, None, &mut clauses, &mut params);

        let mut sql = format!("UPDATE {} SET {}", self.qualified(table), sets.join(", "));
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        self.client
            .execute(&sql, &params)
            .await
            .map_err(|source| pg("update", table, source))?;
        Ok(())
    }
}
