//! Recursive schema inference from JSON payloads.
//!
//! Contract messages arrive as arbitrary nested JSON. [`infer`] walks a
//! payload object and derives the relational shape needed to store it:
//! one table per object, a reference column per nested object, an
//! array-typed column per uniform scalar array, and a relation (junction)
//! table per array of objects.
//!
//! # Creation order
//!
//! The returned [`SchemaPlan`] carries an explicit topological order:
//! child tables first, then their owner, then relation tables. Walking
//! `order` and creating each table in turn never references a table that
//! does not exist yet.
//!
//! # Shape rules
//!
//! | JSON value        | Column                                  |
//! |-------------------|-----------------------------------------|
//! | string            | `Text`                                  |
//! | integer number    | `BigInt`                                |
//! | boolean           | `Boolean`                               |
//! | object            | `Reference` to child table `{ctx}_{key}`|
//! | `[string, ...]`   | `TextArray`                             |
//! | `[bool, ...]`     | `BooleanArray`                          |
//! | `[object, ...]`   | child table + relation table `{child}_r`|
//!
//! A heterogeneous array's first element decides the shape for all
//! elements. Nulls, empty arrays, number arrays, and nested arrays are
//! hard inference failures reported as typed errors; they never abort
//! the process.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::names;

/// Column type inferred for a payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    BigInt,
    Boolean,
    TextArray,
    BooleanArray,
    /// Foreign key to the named table's `id` column.
    Reference(String),
}

/// One table derived from a payload, keyed by full (uncompressed) name.
///
/// Every materialized table additionally carries an implicit `id`
/// primary key that is not listed in `columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: BTreeMap<String, ColumnType>,
    /// Set on relation tables: the two reference columns whose pair must
    /// be unique, i.e. one edge per (parent id, child id).
    pub unique_pair: Option<(String, String)>,
}

impl TableDefinition {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: BTreeMap::new(),
            unique_pair: None,
        }
    }

    /// Whether this is a relation (junction) table.
    pub fn is_relation(&self) -> bool {
        self.unique_pair.is_some()
    }
}

/// The full output of inference: table definitions plus the order in
/// which they must be created.
#[derive(Debug, Clone, Default)]
pub struct SchemaPlan {
    /// Dependency-respecting creation order: children, then owners, then
    /// relation tables.
    pub order: Vec<String>,
    pub tables: BTreeMap<String, TableDefinition>,
}

/// Derive the table definitions needed to store `object` under the table
/// named by `context`.
///
/// `context` is the accumulated field path (e.g. the entity table name
/// `msg_execute_contract_7`); it is singularized before use. Inference is
/// pure: the same payload and context always yield the same plan.
pub fn infer(object: &Map<String, Value>, context: &str) -> Result<SchemaPlan> {
    let mut plan = SchemaPlan::default();
    infer_object(object, names::singular(context), context, &mut plan)?;
    Ok(plan)
}

/// Recursive worker: infers one table, appending children to `plan`
/// before the table itself and relation tables after it.
fn infer_object(
    object: &Map<String, Value>,
    name: &str,
    path: &str,
    plan: &mut SchemaPlan,
) -> Result<()> {
    let mut table = TableDefinition::new(name);
    let mut relations: Vec<String> = Vec::new();

    for (raw_key, value) in object {
        let key = names::snake(names::singular(raw_key));
        let field_path = format!("{path}.{raw_key}");

        match value {
            Value::String(_) => {
                table.columns.insert(key, ColumnType::Text);
            }
            Value::Number(n) => {
                if n.as_i64().is_none() {
                    return Err(Error::NonIntegerNumber {
                        path: field_path,
                        value: n.to_string(),
                    });
                }
                table.columns.insert(key, ColumnType::BigInt);
            }
            Value::Bool(_) => {
                table.columns.insert(key, ColumnType::Boolean);
            }
            Value::Object(nested) => {
                let child = names::child(name, &key);
                infer_object(nested, &child, &field_path, plan)?;
                table
                    .columns
                    .insert(child.clone(), ColumnType::Reference(child));
            }
            Value::Array(elements) => {
                infer_array(elements, name, &key, &field_path, &mut table, &mut relations, plan)?;
            }
            Value::Null => {
                return Err(Error::unsupported(&field_path, "null value"));
            }
        }
    }

    plan.order.push(name.to_string());
    plan.tables.insert(name.to_string(), table);
    plan.order.append(&mut relations);
    Ok(())
}

/// Infer the shape of an array field. The first element decides the
/// shape for all elements.
fn infer_array(
    elements: &[Value],
    name: &str,
    key: &str,
    path: &str,
    table: &mut TableDefinition,
    relations: &mut Vec<String>,
    plan: &mut SchemaPlan,
) -> Result<()> {
    let Some(first) = elements.first() else {
        return Err(Error::unsupported(path, "empty array"));
    };

    match first {
        Value::String(_) => {
            table.columns.insert(key.to_string(), ColumnType::TextArray);
        }
        Value::Bool(_) => {
            table
                .columns
                .insert(key.to_string(), ColumnType::BooleanArray);
        }
        Value::Object(nested) => {
            let child = names::child(name, key);
            let element_path = format!("{path}[0]");
            infer_object(nested, &child, &element_path, plan)?;

            let relation = relation_table(name, &child);
            relations.push(relation.name.clone());
            plan.tables.insert(relation.name.clone(), relation);
        }
        Value::Number(_) => {
            return Err(Error::unsupported(path, "array of numbers"));
        }
        Value::Array(_) => {
            return Err(Error::unsupported(path, "nested array"));
        }
        Value::Null => {
            return Err(Error::unsupported(path, "array of nulls"));
        }
    }

    Ok(())
}

/// Build the relation (junction) table linking `parent` rows to `child`
/// rows: two reference columns named after the tables they point at,
/// unique per pair.
fn relation_table(parent: &str, child: &str) -> TableDefinition {
    let mut table = TableDefinition::new(&format!("{child}_r"));
    table
        .columns
        .insert(parent.to_string(), ColumnType::Reference(parent.to_string()));
    table
        .columns
        .insert(child.to_string(), ColumnType::Reference(child.to_string()));
    table.unique_pair = Some((parent.to_string(), child.to_string()));
    table
}
