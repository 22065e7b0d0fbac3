//! Row persistence for materialized payloads.
//!
//! [`Persister::persist`] walks a payload object the same way inference
//! does and inserts one row per object, bottom-up: children first so
//! reference columns always point at rows that exist, then the owner,
//! then one relation row per array element.
//!
//! # Deterministic ids
//!
//! Entity ids are UUIDv5 digests of the message coordinates (category,
//! height, tx hash, index) plus the field path inside the payload.
//! Replaying the same message therefore regenerates the same ids, and
//! conflict-do-nothing inserts absorb the duplicates. A crash between
//! the insert and the sync-entry update is repaired by replay instead of
//! leaving half-written duplicates behind.

use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::sync::Arc;
use strata_core::names;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{SqlValue, Store};

/// Namespace for entity id digests. Changing it would re-key every
/// materialized row, so it is fixed for the lifetime of a deployment.
const ID_NAMESPACE: Uuid = Uuid::from_bytes(*b"strata.entity.id");

/// The coordinates of one raw message, mixed into every entity id
/// derived from its payload. The block hash is part of the identity so
/// fork twins at the same (height, tx, index) keep distinct rows.
#[derive(Debug, Clone)]
pub struct IdSeed {
    pub category: String,
    pub height: i64,
    pub hash: String,
    pub tx_hash: String,
    pub index: i64,
}

impl IdSeed {
    /// Entity id for one object at `path` inside this message's payload.
    fn entity_id(&self, path: &str) -> Uuid {
        let name = format!(
            "{}/{}/{}/{}/{}/{}",
            self.category, self.height, self.hash, self.tx_hash, self.index, path
        );
        Uuid::new_v5(&ID_NAMESPACE, name.as_bytes())
    }
}

pub struct Persister<S> {
    store: Arc<S>,
}

impl<S: Store> Persister<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Persist `object` into `table` and return the root entity id.
    ///
    /// The target tables must already be materialized from the same
    /// payload shape.
    pub async fn persist(
        &self,
        object: &Map<String, Value>,
        table: &str,
        seed: &IdSeed,
    ) -> Result<Uuid> {
        self.persist_object(object, table.to_string(), table.to_string(), seed)
            .await
    }

    fn persist_object<'a>(
        &'a self,
        object: &'a Map<String, Value>,
        table: String,
        path: String,
        seed: &'a IdSeed,
    ) -> BoxFuture<'a, Result<Uuid>> {
        async move {
            let id = seed.entity_id(&path);
            let mut columns: Vec<String> = vec!["id".to_string()];
            let mut values: Vec<SqlValue> = vec![id.into()];
            let mut object_arrays: Vec<(String, &'a str, &'a [Value])> = Vec::new();

            for (raw_key, value) in object {
                let key = names::snake(names::singular(raw_key));
                // Error paths carry the raw key, matching what the
                // operator sees in the payload.
                let field_path = format!("{path}.{raw_key}");

                match value {
                    Value::String(s) => {
                        columns.push(key);
                        values.push(s.as_str().into());
                    }
                    Value::Number(n) => {
                        let n = n.as_i64().ok_or_else(|| strata_core::Error::NonIntegerNumber {
                            path: field_path,
                            value: n.to_string(),
                        })?;
                        columns.push(key);
                        values.push(n.into());
                    }
                    Value::Bool(b) => {
                        columns.push(key);
                        values.push((*b).into());
                    }
                    Value::Object(nested) => {
                        let child = names::child(&table, &key);
                        let child_id = self
                            .persist_object(nested, child.clone(), field_path, seed)
                            .await?;
                        columns.push(child);
                        values.push(child_id.into());
                    }
                    Value::Array(elements) => match elements.first() {
                        Some(Value::String(_)) => {
                            let items = elements
                                .iter()
                                .map(|e| {
                                    e.as_str().map(str::to_string).ok_or_else(|| {
                                        mixed_array(&field_path)
                                    })
                                })
                                .collect::<Result<Vec<_>>>()?;
                            columns.push(key);
                            values.push(SqlValue::TextArray(items));
                        }
                        Some(Value::Bool(_)) => {
                            let items = elements
                                .iter()
                                .map(|e| e.as_bool().ok_or_else(|| mixed_array(&field_path)))
                                .collect::<Result<Vec<_>>>()?;
                            columns.push(key);
                            values.push(SqlValue::BoolArray(items));
                        }
                        Some(Value::Object(_)) => {
                            object_arrays.push((key, raw_key.as_str(), elements.as_slice()));
                        }
                        _ => return Err(unsupported(&field_path, "unsupported array shape")),
                    },
                    Value::Null => return Err(unsupported(&field_path, "null value")),
                }
            }

            let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
            self.store.insert(&table, &column_refs, &values).await?;

            for (key, raw_key, elements) in object_arrays {
                let child = names::child(&table, &key);
                let relation = format!("{child}_r");
                for (i, element) in elements.iter().enumerate() {
                    let child_path = format!("{path}.{raw_key}[{i}]");
                    let Value::Object(nested) = element else {
                        return Err(mixed_array(&child_path));
                    };
                    let child_id = self
                        .persist_object(nested, child.clone(), child_path.clone(), seed)
                        .await?;
                    let edge_id = seed.entity_id(&format!("{child_path}#r"));
                    self.store
                        .insert(
                            &relation,
                            &["id", table.as_str(), child.as_str()],
                            &[edge_id.into(), id.into(), child_id.into()],
                        )
                        .await?;
                }
            }

            Ok(id)
        }
        .boxed()
    }
}

fn unsupported(path: &str, detail: &str) -> Error {
    Error::Inference(strata_core::Error::UnsupportedShape {
        path: path.to_string(),
        detail: detail.to_string(),
    })
}

fn mixed_array(path: &str) -> Error {
    unsupported(path, "array elements do not match the first element")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::Materializer;
    use crate::store::{MemoryStore, Query};
    use serde_json::json;
    use strata_core::infer;

    fn payload(value: serde_json::Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    fn seed() -> IdSeed {
        IdSeed {
            category: "msg_execute_contracts".to_string(),
            height: 100,
            hash: "block100".to_string(),
            tx_hash: "ab12".to_string(),
            index: 0,
        }
    }

    async fn prepare(store: &Arc<MemoryStore>, body: &Map<String, Value>, table: &str) {
        let plan = infer(body, table).unwrap();
        Materializer::new(Arc::clone(store))
            .materialize(&plan)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scalar_row() {
        let store = Arc::new(MemoryStore::new());
        let body = payload(json!({ "amount": "5", "recipient": "addr2", "count": 3 }));
        prepare(&store, &body, "msg_execute_contract_7").await;

        let persister = Persister::new(Arc::clone(&store));
        persister
            .persist(&body, "msg_execute_contract_7", &seed())
            .await
            .unwrap();

        let rows = store
            .select(
                "msg_execute_contract_7",
                &["amount", "recipient", "count"],
                &Query::new(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].as_text(), Some("5"));
        assert_eq!(rows[0][1].as_text(), Some("addr2"));
        assert_eq!(rows[0][2].as_i64(), Some(3));
    }

    #[tokio::test]
    async fn test_nested_object_reference() {
        let store = Arc::new(MemoryStore::new());
        let body = payload(json!({ "admin": { "addr": "a1" } }));
        prepare(&store, &body, "entity").await;

        let persister = Persister::new(Arc::clone(&store));
        persister.persist(&body, "entity", &seed()).await.unwrap();

        let children = store
            .select("entity_admin", &["id", "addr"], &Query::new())
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        let child_id = children[0][0].as_uuid().unwrap();

        let owners = store
            .select("entity", &["entity_admin"], &Query::new())
            .await
            .unwrap();
        assert_eq!(owners[0][0].as_uuid(), Some(child_id));
    }

    #[tokio::test]
    async fn test_object_array_builds_relation_rows() {
        let store = Arc::new(MemoryStore::new());
        let body = payload(json!({
            "votes": [{ "voter": "a" }, { "voter": "b" }],
        }));
        prepare(&store, &body, "msg_execute_contract_7").await;

        let persister = Persister::new(Arc::clone(&store));
        let root = persister
            .persist(&body, "msg_execute_contract_7", &seed())
            .await
            .unwrap();

        let children = store
            .select("msg_execute_contract_7_vote", &["voter"], &Query::new())
            .await
            .unwrap();
        assert_eq!(children.len(), 2);

        let edges = store
            .select(
                "msg_execute_contract_7_vote_r",
                &["msg_execute_contract_7"],
                &Query::new(),
            )
            .await
            .unwrap();
        assert_eq!(edges.len(), 2);
        for edge in &edges {
            assert_eq!(edge[0].as_uuid(), Some(root));
        }
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let body = payload(json!({
            "amount": "5",
            "votes": [{ "voter": "a" }],
        }));
        prepare(&store, &body, "msg_execute_contract_7").await;

        let persister = Persister::new(Arc::clone(&store));
        let first = persister
            .persist(&body, "msg_execute_contract_7", &seed())
            .await
            .unwrap();
        let second = persister
            .persist(&body, "msg_execute_contract_7", &seed())
            .await
            .unwrap();
        assert_eq!(first, second);

        for table in [
            "msg_execute_contract_7",
            "msg_execute_contract_7_vote",
            "msg_execute_contract_7_vote_r",
        ] {
            let rows = store.select(table, &["id"], &Query::new()).await.unwrap();
            assert_eq!(rows.len(), 1, "{table}");
        }
    }

    #[tokio::test]
    async fn test_distinct_messages_get_distinct_ids() {
        let store = Arc::new(MemoryStore::new());
        let body = payload(json!({ "amount": "5" }));
        prepare(&store, &body, "entity").await;

        let persister = Persister::new(Arc::clone(&store));
        let a = persister.persist(&body, "entity", &seed()).await.unwrap();
        let mut other = seed();
        other.index = 1;
        let b = persister.persist(&body, "entity", &other).await.unwrap();
        assert_ne!(a, b);

        let rows = store.select("entity", &["id"], &Query::new()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_same_coordinates_different_block_hash_get_distinct_ids() {
        let store = Arc::new(MemoryStore::new());
        let body = payload(json!({ "amount": "5" }));
        prepare(&store, &body, "entity").await;

        let persister = Persister::new(Arc::clone(&store));
        let a = persister.persist(&body, "entity", &seed()).await.unwrap();
        let mut forked = seed();
        forked.hash = "block100b".to_string();
        let b = persister.persist(&body, "entity", &forked).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_error_paths_carry_raw_payload_keys() {
        let store = Arc::new(MemoryStore::new());
        let persister = Persister::new(store);
        let body = payload(json!({ "badValues": null }));

        let err = persister
            .persist(&body, "entity", &seed())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("entity.badValues"));
    }

    #[tokio::test]
    async fn test_text_array_column() {
        let store = Arc::new(MemoryStore::new());
        let body = payload(json!({ "validators": ["a", "b"] }));
        prepare(&store, &body, "entity").await;

        let persister = Persister::new(Arc::clone(&store));
        persister.persist(&body, "entity", &seed()).await.unwrap();

        let rows = store
            .select("entity", &["validator"], &Query::new())
            .await
            .unwrap();
        assert_eq!(
            rows[0][0],
            SqlValue::TextArray(vec!["a".to_string(), "b".to_string()])
        );
    }
}
