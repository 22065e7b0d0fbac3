//! Per-category ingestion worker.
//!
//! Each worker owns one message category and loops through two phases:
//! fetch new raw messages into the sync table, then replay pending
//! entries oldest-first. For every entry it loads the raw payload,
//! derives the entity table from the contract code id, materializes the
//! inferred schema, persists the payload rows, and finally points the
//! raw message row at its materialized root entity.
//!
//! Transient store failures are retried with exponential backoff and, if
//! they persist, left pending for the next poll. Failures that are a
//! property of the message itself (unsupported payload shapes, missing
//! code id) retire the entry with an error instead of wedging the
//! queue behind it.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use serde_json::{Map, Value};
use strata_core::{infer, names};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::ContractDirectory;
use crate::error::{Error, Result};
use crate::materialize::Materializer;
use crate::persist::{IdSeed, Persister};
use crate::store::{column, Query, Store};
use crate::sync::{SyncCursor, SyncEntry};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub category: String,
    pub poll_interval: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            poll_interval: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

pub struct Worker<S> {
    store: Arc<S>,
    materializer: Materializer<S>,
    persister: Persister<S>,
    cursor: SyncCursor<S>,
    directory: Option<Arc<dyn ContractDirectory>>,
    config: WorkerConfig,
}

impl<S: Store> Worker<S> {
    pub fn new(
        store: Arc<S>,
        directory: Option<Arc<dyn ContractDirectory>>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            materializer: Materializer::new(Arc::clone(&store)),
            persister: Persister::new(Arc::clone(&store)),
            cursor: SyncCursor::new(Arc::clone(&store)),
            store,
            directory,
            config,
        }
    }

    /// Poll loop; returns when `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(category = %self.config.category, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_once().await {
                error!(category = %self.config.category, %err, "ingestion pass failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!(category = %self.config.category, "worker stopped");
    }

    /// One fetch-then-replay pass over the category.
    pub async fn run_once(&self) -> Result<()> {
        let category = &self.config.category;
        self.cursor.fetch(category).await?;

        while let Some(entry) = self.cursor.next_unsynced(category).await? {
            match self.process_with_retry(&entry).await {
                Ok(()) => {
                    self.cursor.mark_synced(entry.id).await?;
                    counter!("ingest_messages_processed_total", "category" => category.clone())
                        .increment(1);
                    gauge!("ingest_sync_height", "category" => category.clone())
                        .set(entry.height as f64);
                }
                Err(err) if err.is_transient() => {
                    // Leave the entry pending; the next poll retries it.
                    warn!(%category, height = entry.height, %err, "store unavailable, backing off");
                    break;
                }
                Err(err) => {
                    warn!(
                        %category,
                        height = entry.height,
                        tx_hash = %entry.tx_hash,
                        index = entry.index,
                        %err,
                        "message failed to materialize"
                    );
                    self.diagnose(&entry).await;
                    self.cursor.mark_failed(entry.id, &err.to_string()).await?;
                    counter!("ingest_messages_failed_total", "category" => category.clone())
                        .increment(1);
                }
            }
        }
        Ok(())
    }

    async fn process_with_retry(&self, entry: &SyncEntry) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.process(entry).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(%err, attempt, "transient store failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn process(&self, entry: &SyncEntry) -> Result<()> {
        let (raw_id, payload) = self.load_raw(entry).await?;

        // A message without a msg object carries nothing to materialize;
        // it still counts as processed.
        let Some(body) = payload.get("msg").and_then(Value::as_object) else {
            debug!(
                category = %entry.category,
                height = entry.height,
                tx_hash = %entry.tx_hash,
                "no msg object in payload, skipping"
            );
            return Ok(());
        };

        let code = discriminator(&payload, entry)?;
        let entity = format!("{}_{code}", names::singular(&entry.category));

        let plan = infer(body, &entity)?;
        self.materializer.materialize(&plan).await?;
        self.materializer
            .link_parent_column(&entry.category, &entity)
            .await?;

        let seed = IdSeed {
            category: entry.category.clone(),
            height: entry.height,
            hash: entry.hash.clone(),
            tx_hash: entry.tx_hash.clone(),
            index: entry.index,
        };
        let root = self.persister.persist(body, &entity, &seed).await?;

        self.store
            .update(
                &entry.category,
                &[("id".to_string(), raw_id.into())],
                &[(entity.clone(), root.into())],
            )
            .await?;

        debug!(
            category = %entry.category,
            height = entry.height,
            table = %entity,
            "message materialized"
        );
        Ok(())
    }

    /// Load the raw message row behind a sync entry.
    async fn load_raw(&self, entry: &SyncEntry) -> Result<(Uuid, Map<String, Value>)> {
        let rows = self
            .store
            .select(
                &entry.category,
                &["id", "value"],
                &Query::new()
                    .eq("height", entry.height)
                    .eq("hash", entry.hash.as_str())
                    .eq("tx_hash", entry.tx_hash.as_str())
                    .eq("index", entry.index)
                    .limit(1),
            )
            .await?;

        let Some(row) = rows.first() else {
            return Err(Error::RawMessageMissing {
                category: entry.category.clone(),
                height: entry.height,
                tx_hash: entry.tx_hash.clone(),
                index: entry.index,
            });
        };

        let id = column(row, 0, &entry.category)?
            .as_uuid()
            .ok_or_else(|| Error::Decode {
                table: entry.category.clone(),
                reason: "unexpected type for 'id'".to_string(),
            })?;
        let value = column(row, 1, &entry.category)?
            .as_text()
            .ok_or_else(|| Error::Decode {
                table: entry.category.clone(),
                reason: "unexpected type for 'value'".to_string(),
            })?;

        let payload: Value = serde_json::from_str(value)?;
        match payload {
            Value::Object(map) => Ok((id, map)),
            _ => Err(Error::Inference(strata_core::Error::UnsupportedShape {
                path: String::new(),
                detail: "payload is not a JSON object".to_string(),
            })),
        }
    }

    /// Best-effort contract metadata log for a permanently failed entry.
    async fn diagnose(&self, entry: &SyncEntry) {
        let Some(directory) = &self.directory else {
            return;
        };
        let Ok((_, payload)) = self.load_raw(entry).await else {
            return;
        };
        let Some(address) = payload.get("contract").and_then(Value::as_str) else {
            return;
        };
        match directory.contract_info(address).await {
            Ok(info) => warn!(address, ?info, "contract behind failed message"),
            Err(err) => debug!(address, %err, "contract metadata lookup failed"),
        }
    }
}

/// Extract the contract code id from a raw payload. Accepts the decoded
/// long form (`{"low": 7, ...}`), a bare integer, or a numeric string.
fn discriminator(payload: &Map<String, Value>, entry: &SyncEntry) -> Result<String> {
    let code = payload.get("codeId").or_else(|| payload.get("code_id"));
    let code = match code {
        Some(Value::Object(parts)) => parts.get("low").and_then(Value::as_i64),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        _ => None,
    };
    code.map(|n| n.to_string())
        .ok_or_else(|| Error::MissingDiscriminator {
            category: entry.category.clone(),
            height: entry.height,
            tx_hash: entry.tx_hash.clone(),
            index: entry.index,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ContractInfo;
    use crate::store::MemoryStore;
    use crate::sync::SYNC_TABLE;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use strata_core::{ColumnType, TableDefinition};

    const CATEGORY: &str = "msg_execute_contracts";

    async fn setup(store: &Arc<MemoryStore>) {
        SyncCursor::new(Arc::clone(store))
            .ensure_schema()
            .await
            .unwrap();
        let mut table = TableDefinition {
            name: CATEGORY.to_string(),
            columns: Default::default(),
            unique_pair: None,
        };
        for (name, ty) in [
            ("height", ColumnType::BigInt),
            ("hash", ColumnType::Text),
            ("tx_hash", ColumnType::Text),
            ("index", ColumnType::BigInt),
            ("value", ColumnType::Text),
        ] {
            table.columns.insert(name.to_string(), ty);
        }
        store.create_table(&table).await.unwrap();
    }

    async fn raw_message(
        store: &Arc<MemoryStore>,
        height: i64,
        tx_hash: &str,
        index: i64,
        value: serde_json::Value,
    ) {
        store
            .insert(
                CATEGORY,
                &["id", "height", "hash", "tx_hash", "index", "value"],
                &[
                    Uuid::new_v4().into(),
                    height.into(),
                    format!("block{height}").into(),
                    tx_hash.into(),
                    index.into(),
                    value.to_string().into(),
                ],
            )
            .await
            .unwrap();
    }

    fn worker(store: &Arc<MemoryStore>) -> Worker<MemoryStore> {
        let mut config = WorkerConfig::new(CATEGORY);
        config.retry_backoff = Duration::from_millis(1);
        Worker::new(Arc::clone(store), None, config)
    }

    #[tokio::test]
    async fn test_materializes_execute_message() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(
            &store,
            100,
            "ab12",
            0,
            json!({
                "codeId": { "low": 7, "high": 0, "unsigned": true },
                "contract": "wasm1xyz",
                "msg": { "amount": "5", "recipient": "addr2" },
            }),
        )
        .await;

        worker(&store).run_once().await.unwrap();

        let rows = store
            .select(
                "msg_execute_contract_7",
                &["amount", "recipient"],
                &Query::new(),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].as_text(), Some("5"));
        assert_eq!(rows[0][1].as_text(), Some("addr2"));

        // The raw message row now points at the materialized entity.
        let linked = store
            .select(CATEGORY, &["msg_execute_contract_7"], &Query::new())
            .await
            .unwrap();
        assert!(linked[0][0].as_uuid().is_some());

        // And the sync entry is done.
        let sync = store
            .select(SYNC_TABLE, &["synced"], &Query::new().eq("category_name", CATEGORY))
            .await
            .unwrap();
        assert_eq!(sync[0][0].as_bool(), Some(true));
    }

    #[tokio::test]
    async fn test_object_array_payload_and_replay() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(
            &store,
            100,
            "ab12",
            0,
            json!({
                "codeId": { "low": 7 },
                "msg": { "votes": [{ "voter": "a" }, { "voter": "b" }] },
            }),
        )
        .await;

        let worker = worker(&store);
        worker.run_once().await.unwrap();
        // A second pass over the same chain state changes nothing.
        worker.run_once().await.unwrap();

        let children = store
            .select("msg_execute_contract_7_vote", &["voter"], &Query::new())
            .await
            .unwrap();
        assert_eq!(children.len(), 2);
        let edges = store
            .select("msg_execute_contract_7_vote_r", &["id"], &Query::new())
            .await
            .unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[tokio::test]
    async fn test_fork_twins_at_same_coordinates_both_materialize() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        // Two raw rows at the same (height, tx_hash, index) from
        // different blocks.
        for (hash, amount) in [("blockA", "5"), ("blockB", "99")] {
            store
                .insert(
                    CATEGORY,
                    &["id", "height", "hash", "tx_hash", "index", "value"],
                    &[
                        Uuid::new_v4().into(),
                        100i64.into(),
                        hash.into(),
                        "t1".into(),
                        0i64.into(),
                        json!({ "codeId": 7, "msg": { "amount": amount } })
                            .to_string()
                            .into(),
                    ],
                )
                .await
                .unwrap();
        }

        worker(&store).run_once().await.unwrap();

        let sync = store
            .select(
                SYNC_TABLE,
                &["synced"],
                &Query::new().eq("category_name", CATEGORY).eq("synced", true),
            )
            .await
            .unwrap();
        assert_eq!(sync.len(), 2);

        // Each entry replayed its own row, so both payloads landed.
        let rows = store
            .select("msg_execute_contract_7", &["amount"], &Query::new())
            .await
            .unwrap();
        let mut amounts: Vec<_> = rows
            .iter()
            .filter_map(|row| row[0].as_text().map(str::to_string))
            .collect();
        amounts.sort();
        assert_eq!(amounts, ["5", "99"]);
    }

    #[tokio::test]
    async fn test_payload_without_msg_is_a_synced_no_op() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(&store, 100, "t1", 0, json!({ "codeId": 7 })).await;

        worker(&store).run_once().await.unwrap();

        let sync = store
            .select(
                SYNC_TABLE,
                &["synced", "error"],
                &Query::new().eq("tx_hash", "t1"),
            )
            .await
            .unwrap();
        assert_eq!(sync[0][0].as_bool(), Some(true));
        assert!(sync[0][1].is_null());
        assert!(!store.table_exists("msg_execute_contract_7").await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_payload_is_retired_and_queue_moves_on() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(
            &store,
            100,
            "t1",
            0,
            json!({ "codeId": 7, "msg": { "gone": null } }),
        )
        .await;
        raw_message(
            &store,
            101,
            "t2",
            0,
            json!({ "codeId": 7, "msg": { "amount": "5" } }),
        )
        .await;

        worker(&store).run_once().await.unwrap();

        // The bad entry carries an error and stays unsynced.
        let failed = store
            .select(
                SYNC_TABLE,
                &["synced", "error"],
                &Query::new().eq("tx_hash", "t1"),
            )
            .await
            .unwrap();
        assert_eq!(failed[0][0].as_bool(), Some(false));
        assert!(failed[0][1].as_text().unwrap_or_default().contains("null"));

        // The good one behind it still landed.
        let rows = store
            .select("msg_execute_contract_7", &["amount"], &Query::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_code_id_is_a_permanent_failure() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(&store, 100, "t1", 0, json!({ "msg": { "amount": "5" } })).await;

        worker(&store).run_once().await.unwrap();

        let failed = store
            .select(SYNC_TABLE, &["error"], &Query::new().eq("tx_hash", "t1"))
            .await
            .unwrap();
        assert!(failed[0][0]
            .as_text()
            .unwrap_or_default()
            .contains("missing discriminator"));
    }

    #[tokio::test]
    async fn test_new_payload_variant_extends_entity_table() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(
            &store,
            100,
            "t1",
            0,
            json!({ "codeId": 7, "msg": { "amount": "5" } }),
        )
        .await;
        raw_message(
            &store,
            101,
            "t2",
            0,
            json!({ "codeId": 7, "msg": { "amount": "6", "recipient": "addr2" } }),
        )
        .await;

        worker(&store).run_once().await.unwrap();

        let columns = store.columns("msg_execute_contract_7");
        assert!(columns.contains_key("amount"));
        assert!(columns.contains_key("recipient"));
        let rows = store
            .select("msg_execute_contract_7", &["recipient"], &Query::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    struct RecordingDirectory {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContractDirectory for RecordingDirectory {
        async fn contract_info(&self, address: &str) -> Result<ContractInfo> {
            self.calls.lock().push(address.to_string());
            Ok(ContractInfo {
                code_id: Some("7".to_string()),
                label: Some("cw20-base".to_string()),
                creator: None,
            })
        }
    }

    #[tokio::test]
    async fn test_failed_message_triggers_contract_lookup() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(
            &store,
            100,
            "t1",
            0,
            json!({
                "codeId": 7,
                "contract": "wasm1xyz",
                "msg": { "gone": null },
            }),
        )
        .await;

        let directory = Arc::new(RecordingDirectory {
            calls: Mutex::new(Vec::new()),
        });
        let mut config = WorkerConfig::new(CATEGORY);
        config.retry_backoff = Duration::from_millis(1);
        let worker = Worker::new(
            Arc::clone(&store),
            Some(Arc::clone(&directory) as Arc<dyn ContractDirectory>),
            config,
        );
        worker.run_once().await.unwrap();

        assert_eq!(directory.calls.lock().as_slice(), ["wasm1xyz"]);
    }

    #[test]
    fn test_discriminator_forms() {
        let entry = SyncEntry {
            id: Uuid::nil(),
            category: CATEGORY.to_string(),
            height: 100,
            hash: "b".to_string(),
            tx_hash: "t".to_string(),
            index: 0,
        };

        let long = json!({ "codeId": { "low": 7, "high": 0 } });
        let bare = json!({ "codeId": 7 });
        let text = json!({ "code_id": "7" });
        for payload in [long, bare, text] {
            let Value::Object(map) = payload else { unreachable!() };
            assert_eq!(discriminator(&map, &entry).unwrap(), "7");
        }

        let missing = json!({ "funds": [] });
        let Value::Object(map) = missing else { unreachable!() };
        assert!(matches!(
            discriminator(&map, &entry),
            Err(Error::MissingDiscriminator { .. })
        ));
    }

    #[tokio::test]
    async fn test_later_heights_picked_up_on_next_pass() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        raw_message(
            &store,
            100,
            "t1",
            0,
            json!({ "codeId": 7, "msg": { "amount": "5" } }),
        )
        .await;

        let worker = worker(&store);
        worker.run_once().await.unwrap();

        raw_message(
            &store,
            101,
            "t2",
            0,
            json!({ "codeId": 7, "msg": { "amount": "6" } }),
        )
        .await;
        worker.run_once().await.unwrap();

        let rows = store
            .select("msg_execute_contract_7", &["amount"], &Query::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let sync = store
            .select(
                SYNC_TABLE,
                &["synced"],
                &Query::new().eq("category_name", CATEGORY).eq("synced", true),
            )
            .await
            .unwrap();
        assert_eq!(sync.len(), 2);
    }
}
