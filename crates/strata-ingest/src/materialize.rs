//! Schema reconciliation: turning an inferred plan into store DDL.
//!
//! [`Materializer::materialize`] walks a plan in its creation order and
//! makes the store match it. A table that does not exist yet is created
//! whole; one that does is only extended with columns it is missing.
//! Columns are never dropped or retyped, so payload variants accumulate
//! additively.
//!
//! A registry of fitted identifiers is kept across calls. Compression is
//! not collision-free, and materializing a second full name onto an
//! already-claimed short name would silently alias two tables, so that
//! case fails with [`Error::IdentifierCollision`] before any DDL runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_core::{names, ColumnType, SchemaPlan};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::Store;

pub struct Materializer<S> {
    store: Arc<S>,
    /// fitted name -> full name it was claimed by
    registry: Mutex<HashMap<String, String>>,
}

impl<S: Store> Materializer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the fitted form of `full`, failing if another full name
    /// already owns it.
    fn register(&self, full: &str) -> Result<()> {
        let short = names::fit(full);
        let mut registry = self.registry.lock();
        match registry.get(&short) {
            Some(existing) if existing != full => Err(Error::IdentifierCollision {
                short,
                existing: existing.clone(),
                incoming: full.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                registry.insert(short, full.to_string());
                Ok(())
            }
        }
    }

    /// Reconcile the store with `plan`, creating or extending each table
    /// in dependency order.
    pub async fn materialize(&self, plan: &SchemaPlan) -> Result<()> {
        for name in &plan.order {
            let table = plan.tables.get(name).ok_or_else(|| Error::Store {
                op: "materialize",
                table: name.clone(),
                reason: "plan order references an undefined table".to_string(),
            })?;

            self.register(name)?;
            for column in table.columns.keys() {
                self.register(column)?;
            }

            if self.store.table_exists(name).await? {
                for (column, ty) in &table.columns {
                    self.store.add_column(name, column, ty).await?;
                }
            } else {
                debug!(table = %name, "creating table");
                self.store.create_table(table).await?;
            }

            if let Some((parent, child)) = &table.unique_pair {
                let index = format!("{name}_idx");
                self.store
                    .create_unique_index(name, &index, &[parent, child])
                    .await?;
            }
        }
        Ok(())
    }

    /// Add a reference column named after `entity_table` to the category
    /// table, so each raw message row can point at its materialized root
    /// entity.
    pub async fn link_parent_column(&self, category_table: &str, entity_table: &str) -> Result<()> {
        self.register(entity_table)?;
        self.store
            .add_column(
                category_table,
                entity_table,
                &ColumnType::Reference(entity_table.to_string()),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Query, SqlValue};
    use serde_json::json;
    use strata_core::infer;

    fn payload(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_materialize_creates_all_plan_tables() {
        let store = Arc::new(MemoryStore::new());
        let materializer = Materializer::new(Arc::clone(&store));

        let plan = infer(
            &payload(json!({
                "amount": "5",
                "votes": [{ "voter": "a" }],
            })),
            "msg_execute_contract_7",
        )
        .unwrap();
        materializer.materialize(&plan).await.unwrap();

        for table in [
            "msg_execute_contract_7",
            "msg_execute_contract_7_vote",
            "msg_execute_contract_7_vote_r",
        ] {
            assert!(store.table_exists(table).await.unwrap(), "{table}");
        }
    }

    #[tokio::test]
    async fn test_existing_table_gains_missing_columns_only() {
        let store = Arc::new(MemoryStore::new());
        let materializer = Materializer::new(Arc::clone(&store));

        let first = infer(&payload(json!({ "amount": "5" })), "entity").unwrap();
        materializer.materialize(&first).await.unwrap();

        // A later payload variant with an extra field extends the table.
        let second = infer(
            &payload(json!({ "amount": "5", "recipient": "addr2" })),
            "entity",
        )
        .unwrap();
        materializer.materialize(&second).await.unwrap();

        let columns = store.columns("entity");
        assert!(columns.contains_key("amount"));
        assert!(columns.contains_key("recipient"));
    }

    #[tokio::test]
    async fn test_relation_table_pair_is_unique() {
        let store = Arc::new(MemoryStore::new());
        let materializer = Materializer::new(Arc::clone(&store));

        let plan = infer(
            &payload(json!({ "votes": [{ "voter": "a" }] })),
            "msg_execute_contract_7",
        )
        .unwrap();
        materializer.materialize(&plan).await.unwrap();

        for id in ["e1", "e2"] {
            store
                .insert(
                    "msg_execute_contract_7_vote_r",
                    &["id", "msg_execute_contract_7", "msg_execute_contract_7_vote"],
                    &[id.into(), "p".into(), "c".into()],
                )
                .await
                .unwrap();
        }
        let rows = store
            .select("msg_execute_contract_7_vote_r", &["id"], &Query::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_identifier_collision_is_a_hard_error() {
        let store = Arc::new(MemoryStore::new());
        let materializer = Materializer::new(store);

        // Two long names whose compressed forms coincide.
        let stem = "segment_".repeat(9);
        let a = format!("{stem}alpha_tail_end");
        let b = format!("{stem}another_tail_end");
        assert!(a.len() > names::MAX_IDENTIFIER_LEN);
        assert_ne!(a, b);
        assert_eq!(names::fit(&a), names::fit(&b));

        materializer.register(&a).unwrap();
        let err = materializer.register(&b).unwrap_err();
        assert!(matches!(err, Error::IdentifierCollision { .. }));
    }

    #[tokio::test]
    async fn test_link_parent_column() {
        let store = Arc::new(MemoryStore::new());
        let materializer = Materializer::new(Arc::clone(&store));

        store
            .create_table(&strata_core::TableDefinition {
                name: "msg_execute_contracts".to_string(),
                columns: Default::default(),
                unique_pair: None,
            })
            .await
            .unwrap();
        let plan = infer(&payload(json!({ "amount": "5" })), "msg_execute_contract_7").unwrap();
        materializer.materialize(&plan).await.unwrap();
        materializer
            .link_parent_column("msg_execute_contracts", "msg_execute_contract_7")
            .await
            .unwrap();

        let columns = store.columns("msg_execute_contracts");
        assert_eq!(
            columns["msg_execute_contract_7"],
            strata_core::ColumnType::Reference("msg_execute_contract_7".to_string())
        );
        // The filter still resolves rows by the new column being unset.
        let rows = store
            .select(
                "msg_execute_contracts",
                &["id"],
                &Query::new().eq("msg_execute_contract_7", SqlValue::Null),
            )
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
